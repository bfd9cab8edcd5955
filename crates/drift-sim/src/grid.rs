//! Particle state grids and the tagged double buffer

use bytemuck::{Pod, Zeroable};
use drift_core::{DriftError, Result};
use glam::Vec3;

/// One particle slot. Matches an `rgba32float` texel: xyz = position, w = lifetime.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ParticleRecord {
    pub position: [f32; 3],
    pub lifetime: f32,
}

impl ParticleRecord {
    pub fn new(position: Vec3, lifetime: f32) -> Self {
        Self {
            position: position.to_array(),
            lifetime,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|c| c.is_finite()) && self.lifetime.is_finite()
    }
}

/// Grid dimensions. Both sides and the product are powers of two.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let count = width.checked_mul(height).unwrap_or(0);
        if !width.is_power_of_two() || !height.is_power_of_two() || !count.is_power_of_two() {
            return Err(DriftError::InvalidResolution { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn count(&self) -> u32 {
        self.width * self.height
    }

    /// Flattened row-major index of a cell
    pub fn index(&self, x: u32, y: u32) -> u32 {
        y * self.width + x
    }

    pub fn coord(&self, index: u32) -> (u32, u32) {
        (index % self.width, index / self.width)
    }

    /// Normalized coordinate of a cell centre
    pub fn cell_center(&self, x: u32, y: u32) -> (f32, f32) {
        (
            (x as f32 + 0.5) / self.width as f32,
            (y as f32 + 0.5) / self.height as f32,
        )
    }

    /// Cell containing a normalized coordinate (point sampling, clamped to edge)
    pub fn cell_at(&self, u: f32, v: f32) -> (u32, u32) {
        let x = ((u * self.width as f32).floor() as i64).clamp(0, self.width as i64 - 1);
        let y = ((v * self.height as f32).floor() as i64).clamp(0, self.height as i64 - 1);
        (x as u32, y as u32)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A full grid of particle records
#[derive(Clone, Debug)]
pub struct ParticleGrid {
    resolution: Resolution,
    records: Vec<ParticleRecord>,
}

impl ParticleGrid {
    /// Allocate a zeroed grid. Contents are meaningless until a pass writes them.
    pub fn allocate(resolution: Resolution) -> Self {
        Self {
            resolution,
            records: vec![ParticleRecord::zeroed(); resolution.count() as usize],
        }
    }

    pub fn from_records(resolution: Resolution, records: Vec<ParticleRecord>) -> Result<Self> {
        if records.len() != resolution.count() as usize {
            return Err(DriftError::InvalidConfig(format!(
                "{} records do not fill a {} grid",
                records.len(),
                resolution
            )));
        }
        Ok(Self {
            resolution,
            records,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: u32) -> ParticleRecord {
        self.records[index as usize]
    }

    /// Point-sample the grid at a normalized coordinate
    pub fn sample(&self, u: f32, v: f32) -> ParticleRecord {
        let (x, y) = self.resolution.cell_at(u, v);
        self.get(self.resolution.index(x, y))
    }

    pub fn records(&self) -> &[ParticleRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [ParticleRecord] {
        &mut self.records
    }
}

/// Two owned buffers and a tag selecting the current one.
///
/// Every write-producing pass reads `current`, writes the other buffer and
/// then flips the tag, so a pass never reads and writes the same buffer.
#[derive(Clone, Debug)]
pub struct DoubleBuffer<T> {
    buffers: [T; 2],
    current: usize,
}

impl<T> DoubleBuffer<T> {
    /// `first` starts as the current buffer
    pub fn new(first: T, second: T) -> Self {
        Self {
            buffers: [first, second],
            current: 0,
        }
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &T {
        &self.buffers[self.current]
    }

    /// The buffer the next pass will write
    pub fn target(&self) -> &T {
        &self.buffers[1 - self.current]
    }

    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    /// Borrow (read, write) without aliasing
    pub fn read_write(&mut self) -> (&T, &mut T) {
        let (first, second) = self.buffers.split_at_mut(1);
        if self.current == 0 {
            (&first[0], &mut second[0])
        } else {
            (&second[0], &mut first[0])
        }
    }

    /// Run one write-producing pass and flip the tag afterwards
    pub fn pass<R>(&mut self, f: impl FnOnce(&T, &mut T) -> R) -> R {
        let result = {
            let (read, write) = self.read_write();
            f(read, write)
        };
        self.swap();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout_matches_texel() {
        assert_eq!(std::mem::size_of::<ParticleRecord>(), 16);
        assert_eq!(std::mem::align_of::<ParticleRecord>(), 4);
    }

    #[test]
    fn resolution_requires_powers_of_two() {
        assert!(Resolution::new(256, 256).is_ok());
        assert!(Resolution::new(2048, 1024).is_ok());
        assert!(Resolution::new(300, 256).is_err());
        assert!(Resolution::new(0, 256).is_err());
    }

    #[test]
    fn index_and_coord_agree() {
        let res = Resolution::new(8, 4).unwrap();
        for i in 0..res.count() {
            let (x, y) = res.coord(i);
            assert_eq!(res.index(x, y), i);
        }
    }

    #[test]
    fn cell_center_maps_back_to_cell() {
        let res = Resolution::new(16, 8).unwrap();
        for y in 0..8 {
            for x in 0..16 {
                let (u, v) = res.cell_center(x, y);
                assert_eq!(res.cell_at(u, v), (x, y));
            }
        }
        // Out of range coordinates clamp to the edge
        assert_eq!(res.cell_at(1.5, -0.2), (15, 0));
    }

    #[test]
    fn double_buffer_pass_writes_other_buffer() {
        let mut buffer = DoubleBuffer::new(vec![1, 2, 3], vec![0, 0, 0]);
        assert_eq!(buffer.current_index(), 0);

        buffer.pass(|read, write| {
            for (dst, src) in write.iter_mut().zip(read.iter()) {
                *dst = src * 10;
            }
        });

        assert_eq!(buffer.current_index(), 1);
        assert_eq!(buffer.current(), &vec![10, 20, 30]);
        assert_eq!(buffer.target(), &vec![1, 2, 3]);
    }
}
