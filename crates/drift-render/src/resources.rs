//! GPU buffers and textures owned by the flow
//!
//! Session tables are uploaded once. The particle state is a pair of storage
//! buffers with their bind groups precomputed for both orientations, so a
//! pass only has to pick the pair matching the current tag.

use crate::context::RenderError;
use crate::pipelines::{FlowPipelines, OPACITY_FORMAT};
use crate::uniforms::{ResampleUniforms, SimulateUniforms, SortUniforms, UniformArena};
use drift_core::RenderConfig;
use drift_sim::{DoubleBuffer, FlowTables, ParticleGrid, ParticleRecord, Resolution};
use wgpu::util::DeviceExt;

const RECORD_SIZE: u64 = std::mem::size_of::<ParticleRecord>() as u64;

/// Bytes needed for one state buffer at `resolution`
pub fn state_size(resolution: Resolution) -> u64 {
    resolution.count() as u64 * RECORD_SIZE
}

/// Floor quad as a triangle strip
pub fn floor_vertices(render: &RenderConfig) -> [[f32; 3]; 4] {
    let [x, y, z] = render.floor_origin;
    let w = render.floor_width;
    let d = render.floor_depth;
    [[x, y, z], [x, y, z + d], [x + w, y, z], [x + w, y, z + d]]
}

fn state_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    })
}

fn buffer_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

/// Tables uploaded once per session plus the opacity target
pub struct FlowResources {
    /// Respawn tables, one per quality level
    pub spawn: Vec<wgpu::Buffer>,
    pub spawn_resolutions: Vec<Resolution>,
    pub offsets: wgpu::Buffer,
    pub offset_resolution: Resolution,
    pub opacity_texture: wgpu::Texture,
    pub opacity_view: wgpu::TextureView,
    pub opacity_bind_group: wgpu::BindGroup,
    pub floor_vertices: wgpu::Buffer,
    pub draw_uniforms: wgpu::Buffer,
    pub draw_bind_group: wgpu::BindGroup,
}

impl FlowResources {
    pub fn new(
        device: &wgpu::Device,
        pipelines: &FlowPipelines,
        tables: &FlowTables,
        render: &RenderConfig,
    ) -> Result<Self, RenderError> {
        let limit = device.limits().max_storage_buffer_binding_size as u64;
        let required = state_size(tables.offsets.resolution());
        if required > limit {
            return Err(RenderError::StateTooLarge { required, limit });
        }

        let spawn: Vec<wgpu::Buffer> = tables
            .spawn
            .iter()
            .enumerate()
            .map(|(level, table)| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("Spawn Table {level}")),
                    contents: bytemuck::cast_slice(table.grid().records()),
                    usage: wgpu::BufferUsages::STORAGE,
                })
            })
            .collect();
        let spawn_resolutions = tables.spawn.iter().map(|table| table.resolution()).collect();

        let offsets = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Offset Table"),
            contents: bytemuck::cast_slice(tables.offsets.texels()),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let size = render.opacity_resolution.min(device.limits().max_texture_dimension_2d);
        let opacity_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Opacity Texture"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OPACITY_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let opacity_view = opacity_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let opacity_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Opacity Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let opacity_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Opacity Bind Group"),
            layout: &pipelines.opacity_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&opacity_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&opacity_sampler),
                },
            ],
        });

        let floor_vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Floor Vertex Buffer"),
            contents: bytemuck::cast_slice(&floor_vertices(render)),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let draw_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Draw Uniform Buffer"),
            size: std::mem::size_of::<crate::uniforms::DrawUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let draw_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Draw Uniform Bind Group"),
            layout: &pipelines.draw_layout,
            entries: &[buffer_entry(0, &draw_uniforms)],
        });

        tracing::debug!(
            levels = spawn.len(),
            offset_resolution = %tables.offsets.resolution(),
            opacity_resolution = size,
            "Flow resources uploaded"
        );

        Ok(Self {
            spawn,
            spawn_resolutions,
            offsets,
            offset_resolution: tables.offsets.resolution(),
            opacity_texture,
            opacity_view,
            opacity_bind_group,
            floor_vertices,
            draw_uniforms,
            draw_bind_group,
        })
    }

    pub fn opacity_resolution(&self) -> u32 {
        self.opacity_texture.width()
    }
}

/// Bind groups for one orientation of the buffer pair
pub struct StateBindGroups {
    pub simulate: wgpu::BindGroup,
    pub sort: wgpu::BindGroup,
    /// Read-only view of the buffer this orientation reads, for drawing
    pub particles: wgpu::BindGroup,
}

/// Particle state of the active level: two storage buffers and the bind
/// groups for reading either one.
pub struct ParticleBuffers {
    pub resolution: Resolution,
    pub buffers: DoubleBuffer<wgpu::Buffer>,
    pub groups: DoubleBuffer<StateBindGroups>,
}

impl ParticleBuffers {
    /// Allocate a pair; `seed`, when given, becomes the current buffer's contents
    pub fn new(
        device: &wgpu::Device,
        pipelines: &FlowPipelines,
        arena: &UniformArena,
        spawn: &wgpu::Buffer,
        resolution: Resolution,
        seed: Option<&ParticleGrid>,
    ) -> Result<Self, RenderError> {
        let size = state_size(resolution);
        let limit = device.limits().max_storage_buffer_binding_size as u64;
        if size > limit {
            return Err(RenderError::StateTooLarge {
                required: size,
                limit,
            });
        }

        let first = match seed {
            Some(grid) => device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Particle State A"),
                contents: bytemuck::cast_slice(grid.records()),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            }),
            None => state_buffer(device, "Particle State A", size),
        };
        let second = state_buffer(device, "Particle State B", size);

        let forward = Self::bind_groups(device, pipelines, arena, spawn, &first, &second);
        let backward = Self::bind_groups(device, pipelines, arena, spawn, &second, &first);

        Ok(Self {
            resolution,
            buffers: DoubleBuffer::new(first, second),
            groups: DoubleBuffer::new(forward, backward),
        })
    }

    fn bind_groups(
        device: &wgpu::Device,
        pipelines: &FlowPipelines,
        arena: &UniformArena,
        spawn: &wgpu::Buffer,
        src: &wgpu::Buffer,
        dst: &wgpu::Buffer,
    ) -> StateBindGroups {
        let simulate = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Simulate Bind Group"),
            layout: &pipelines.simulate_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: arena.binding::<SimulateUniforms>(),
                },
                buffer_entry(1, src),
                buffer_entry(2, dst),
                buffer_entry(3, spawn),
            ],
        });
        let sort = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Sort Bind Group"),
            layout: &pipelines.sort_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: arena.binding::<SortUniforms>(),
                },
                buffer_entry(1, src),
                buffer_entry(2, dst),
            ],
        });
        let particles = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Particle State Bind Group"),
            layout: &pipelines.particles_layout,
            entries: &[buffer_entry(0, src)],
        });
        StateBindGroups {
            simulate,
            sort,
            particles,
        }
    }

    pub fn count(&self) -> u32 {
        self.resolution.count()
    }

    /// Flip after a pass wrote the target buffer
    pub fn swap(&mut self) {
        self.buffers.swap();
        self.groups.swap();
    }

    /// Bind group that resamples `self`'s current buffer into `target`'s current buffer
    pub fn resample_group(
        &self,
        device: &wgpu::Device,
        pipelines: &FlowPipelines,
        arena: &UniformArena,
        offsets: &wgpu::Buffer,
        target: &ParticleBuffers,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Resample Bind Group"),
            layout: &pipelines.resample_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: arena.binding::<ResampleUniforms>(),
                },
                buffer_entry(1, self.buffers.current()),
                buffer_entry(2, offsets),
                buffer_entry(3, target.buffers.current()),
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_size_is_sixteen_bytes_per_particle() {
        let resolution = Resolution::new(2048, 1024).unwrap();
        assert_eq!(state_size(resolution), 2048 * 1024 * 16);
    }

    #[test]
    fn floor_strip_spans_width_and_depth() {
        let render = RenderConfig::default();
        let [a, b, c, d] = floor_vertices(&render);
        assert_eq!(a, render.floor_origin);
        assert_eq!(b[2] - a[2], render.floor_depth);
        assert_eq!(c[0] - a[0], render.floor_width);
        assert_eq!(d, [c[0], a[1], b[2]]);
        assert!([a, b, c, d].iter().all(|v| v[1] == render.floor_origin[1]));
    }
}
