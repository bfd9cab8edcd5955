//! Incremental odd-even merge sort along the half-vector
//!
//! The network sorts particles by their projection onto the half-vector,
//! ascending. A complete sort over `N = 2^k` particles takes `k(k+1)/2`
//! compare-exchange steps. Outside of view flips the steps are spread over
//! several frames, which keeps an almost-sorted order as particles move.

use crate::grid::{DoubleBuffer, ParticleGrid, ParticleRecord};
use crate::stepper::dispatch;
use glam::Vec3;

/// One compare-exchange step, as base-2 logarithms of stage width and pass distance
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SortStep {
    pub stage: u32,
    pub pass: u32,
}

impl SortStep {
    pub fn stage_width(&self) -> u32 {
        1 << self.stage
    }

    pub fn pass_distance(&self) -> u32 {
        1 << self.pass
    }
}

/// Steps in one complete sort of `count` particles
pub fn total_steps(count: u32) -> u32 {
    let k = count.max(1).trailing_zeros();
    k * (k + 1) / 2
}

/// Progress through the sort schedule
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SortState {
    stage: i32,
    pass: i32,
    steps_left: u32,
    total_steps: u32,
}

impl SortState {
    pub fn new(count: u32) -> Self {
        let total = total_steps(count);
        Self {
            stage: -1,
            pass: -1,
            steps_left: total,
            total_steps: total,
        }
    }

    pub fn reset(&mut self) {
        self.stage = -1;
        self.pass = -1;
        self.steps_left = self.total_steps;
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    pub fn steps_left(&self) -> u32 {
        self.steps_left
    }

    /// True when no step of the current sweep has run yet
    pub fn at_start(&self) -> bool {
        self.stage == -1 && self.pass == -1 && self.steps_left == self.total_steps
    }

    /// Produce the next step and advance; wraps to a fresh sweep after the last one
    pub fn advance(&mut self) -> Option<SortStep> {
        if self.total_steps == 0 {
            return None;
        }

        self.pass -= 1;
        if self.pass < 0 {
            self.stage += 1;
            self.pass = self.stage;
        }
        let step = SortStep {
            stage: self.stage as u32,
            pass: self.pass as u32,
        };

        self.steps_left -= 1;
        if self.steps_left == 0 {
            self.reset();
        }
        Some(step)
    }

    /// Steps to run this frame: a full sort after a flip, otherwise a bounded slice
    pub fn plan(&mut self, flipped_this_frame: bool, passes_per_frame: u32) -> Vec<SortStep> {
        let budget = if flipped_this_frame {
            self.reset();
            self.total_steps
        } else {
            passes_per_frame
        };
        (0..budget).map_while(|_| self.advance()).collect()
    }
}

/// Which neighbour an element is compared with in a step
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Partner {
    /// Outside the active comparison window
    None,
    /// Compared with `index + distance`, keeps the smaller value
    Above(u32),
    /// Compared with `index - distance`, keeps the larger value
    Below(u32),
}

pub fn partner(index: u32, step: SortStep) -> Partner {
    let stage = step.stage_width();
    let pass = step.pass_distance();
    let j = index & (2 * stage - 1);
    let offset = pass & (stage - 1);

    if j < offset || j > 2 * stage - offset - 1 {
        Partner::None
    } else if (j + offset) & pass == 0 {
        Partner::Above(index + pass)
    } else {
        Partner::Below(index - pass)
    }
}

/// Value of element `index` after one compare-exchange step
pub fn sort_record(grid: &ParticleGrid, index: u32, step: SortStep, half_vector: Vec3) -> ParticleRecord {
    let own = grid.get(index);
    let (other, direction) = match partner(index, step) {
        Partner::None => return own,
        Partner::Above(other) => (other, 1.0),
        Partner::Below(other) => (other, -1.0),
    };
    let theirs = grid.get(other);

    let own_depth = own.position().dot(half_vector) * direction;
    let their_depth = theirs.position().dot(half_vector) * direction;
    if own_depth < their_depth {
        own
    } else {
        theirs
    }
}

pub fn sort_pass(state: &mut DoubleBuffer<ParticleGrid>, step: SortStep, half_vector: Vec3) {
    state.pass(|read, write| {
        dispatch(write, |index| sort_record(read, index, step, half_vector));
    });
}

/// Number of adjacent pairs out of ascending order
pub fn count_inversions(grid: &ParticleGrid, half_vector: Vec3) -> usize {
    grid.records()
        .windows(2)
        .filter(|pair| pair[0].position().dot(half_vector) > pair[1].position().dot(half_vector))
        .count()
}
