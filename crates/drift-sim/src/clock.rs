//! Frame clock feeding wall-clock deltas to the pipeline

use std::time::Instant;

/// Measures the time between display refreshes.
///
/// The clock does not clamp; the pipeline decides what to do with long
/// frames (it simulates them with a zero step).
pub struct FrameClock {
    /// Total wall time since the first tick, in seconds
    pub total_time: f64,
    /// Time since the previous tick, in seconds
    pub delta_time: f32,
    pub frame_count: u64,
    last_instant: Option<Instant>,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self {
            total_time: 0.0,
            delta_time: 0.0,
            frame_count: 0,
            last_instant: None,
        }
    }
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to now. Call once per refresh.
    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    /// Advance to `now`; the first tick always reports zero
    pub fn tick_at(&mut self, now: Instant) -> f32 {
        let elapsed = match self.last_instant {
            Some(last) => now.saturating_duration_since(last).as_secs_f64(),
            None => 0.0,
        };
        self.last_instant = Some(now);
        self.total_time += elapsed;
        self.delta_time = elapsed as f32;
        self.frame_count += 1;
        self.delta_time
    }
}
