//! GPU uniform layouts and the per-frame dynamic uniform arena

use crate::context::RenderError;
use bytemuck::{Pod, Zeroable};

/// Dynamic offsets must be multiples of this
pub const UNIFORM_ALIGNMENT: u64 = 256;

/// Matches `SimulateUniforms` in simulate.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct SimulateUniforms {
    pub base_velocity: [f32; 3],
    pub delta_time: f32,
    pub time: f32,
    pub persistence: f32,
    pub position_scale: f32,
    pub time_scale: f32,
    pub velocity_scale: f32,
    pub octaves: u32,
    pub count: u32,
    pub _pad: u32,
}

/// Matches `SortUniforms` in sort.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct SortUniforms {
    pub half_vector: [f32; 3],
    pub count: u32,
    pub stage: u32,
    pub pass_log: u32,
    pub _pad: [u32; 2],
}

/// Matches `ResampleUniforms` in resample.wgsl
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct ResampleUniforms {
    pub old_size: [u32; 2],
    pub new_size: [u32; 2],
    pub offset_size: [u32; 2],
    pub offset_scale: f32,
    pub _pad: u32,
}

/// Shared by every render pipeline. Matches `DrawUniforms` in the render shaders.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct DrawUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub light_view: [[f32; 4]; 4],
    pub light_projection: [[f32; 4]; 4],
    pub color: [f32; 3],
    pub alpha: f32,
    pub diameter: f32,
    pub opacity_scale: f32,
    pub floor_y: f32,
    pub shadow_strength: f32,
    pub background_scale: f32,
    pub _pad: [f32; 3],
}

/// One uniform buffer carved into 256-byte slots, bound with dynamic offsets.
///
/// Compute passes push their parameters while commands are recorded; the
/// staged bytes are uploaded once, before the frame's command buffer is
/// submitted.
pub struct UniformArena {
    pub buffer: wgpu::Buffer,
    staged: Vec<u8>,
    slots: u32,
}

impl UniformArena {
    pub fn new(device: &wgpu::Device, slots: u32) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pass Uniform Arena"),
            size: UNIFORM_ALIGNMENT * slots.max(1) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            staged: Vec::new(),
            slots: slots.max(1),
        }
    }

    /// Stage a value and return its dynamic offset
    pub fn push<T: Pod>(&mut self, value: &T) -> Result<u32, RenderError> {
        let used = (self.staged.len() as u64 / UNIFORM_ALIGNMENT) as u32;
        if used >= self.slots {
            return Err(RenderError::UniformArenaFull(self.slots));
        }
        let offset = self.staged.len();
        self.staged.extend_from_slice(bytemuck::bytes_of(value));
        self.staged.resize(offset + UNIFORM_ALIGNMENT as usize, 0);
        Ok(offset as u32)
    }

    /// Upload everything staged this frame and start over
    pub fn flush(&mut self, queue: &wgpu::Queue) {
        if !self.staged.is_empty() {
            queue.write_buffer(&self.buffer, 0, &self.staged);
            self.staged.clear();
        }
    }

    /// Binding for a `T`-sized window at a dynamic offset
    pub fn binding<T>(&self) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: wgpu::BufferSize::new(std::mem::size_of::<T>() as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_sizes_match_wgsl_layouts() {
        assert_eq!(std::mem::size_of::<SimulateUniforms>(), 48);
        assert_eq!(std::mem::size_of::<SortUniforms>(), 32);
        assert_eq!(std::mem::size_of::<ResampleUniforms>(), 32);
        assert_eq!(std::mem::size_of::<DrawUniforms>(), 304);
    }

    #[test]
    fn every_uniform_fits_one_arena_slot() {
        for size in [
            std::mem::size_of::<SimulateUniforms>(),
            std::mem::size_of::<SortUniforms>(),
            std::mem::size_of::<ResampleUniforms>(),
        ] {
            assert!(size as u64 <= UNIFORM_ALIGNMENT);
        }
    }
}
