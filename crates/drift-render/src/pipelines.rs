//! Compute and render pipelines for the particle flow
//!
//! Compute passes (simulate, sort, resample) share one pattern: group 0 holds
//! a dynamically offset uniform window followed by storage bindings. Render
//! passes pull particles from a read-only storage buffer and shade them with
//! the opacity target.

/// Threads per compute workgroup, matching `@workgroup_size` in the shaders
pub const WORKGROUP_SIZE: u32 = 256;

/// Opacity target format; only the alpha channel is read back
pub const OPACITY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Workgroups needed to cover `count` invocations
pub fn workgroups(count: u32) -> u32 {
    count.div_ceil(WORKGROUP_SIZE)
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages, dynamic: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, visibility: wgpu::ShaderStages, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    entry_point: &str,
    layout: &wgpu::BindGroupLayout,
) -> wgpu::ComputePipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

/// Viewer pass blend when particles arrive nearest first: composite under
const UNDER_BLENDING: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::OneMinusDstAlpha,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::OneMinusDstAlpha,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

/// Premultiplied "over"
const OVER_BLENDING: wgpu::BlendState = wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING;

struct RenderPipelineDesc<'a> {
    label: &'a str,
    layout: &'a wgpu::PipelineLayout,
    shader: &'a wgpu::ShaderModule,
    vs: &'a str,
    fs: &'a str,
    buffers: &'a [wgpu::VertexBufferLayout<'a>],
    format: wgpu::TextureFormat,
    blend: wgpu::BlendState,
    topology: wgpu::PrimitiveTopology,
}

fn render_pipeline(device: &wgpu::Device, desc: RenderPipelineDesc<'_>) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(desc.label),
        layout: Some(desc.layout),
        vertex: wgpu::VertexState {
            module: desc.shader,
            entry_point: Some(desc.vs),
            buffers: desc.buffers,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: desc.shader,
            entry_point: Some(desc.fs),
            targets: &[Some(wgpu::ColorTargetState {
                format: desc.format,
                blend: Some(desc.blend),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: desc.topology,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        // Splats are sorted, not depth tested
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Every pipeline and bind group layout the flow uses
pub struct FlowPipelines {
    pub simulate_layout: wgpu::BindGroupLayout,
    pub sort_layout: wgpu::BindGroupLayout,
    pub resample_layout: wgpu::BindGroupLayout,
    pub draw_layout: wgpu::BindGroupLayout,
    pub particles_layout: wgpu::BindGroupLayout,
    pub opacity_layout: wgpu::BindGroupLayout,

    pub simulate: wgpu::ComputePipeline,
    pub sort: wgpu::ComputePipeline,
    pub resample: wgpu::ComputePipeline,

    pub viewer_front_to_back: wgpu::RenderPipeline,
    pub viewer_back_to_front: wgpu::RenderPipeline,
    pub light: wgpu::RenderPipeline,
    pub floor: wgpu::RenderPipeline,
    pub background: wgpu::RenderPipeline,
}

impl FlowPipelines {
    /// `format` is the format of the final color target
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        let compute = wgpu::ShaderStages::COMPUTE;

        // Group 0 of simulate.wgsl: uniforms, src, dst, spawn
        let simulate_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Simulate Bind Group Layout"),
            entries: &[
                uniform_entry(0, compute, true),
                storage_entry(1, compute, true),
                storage_entry(2, compute, false),
                storage_entry(3, compute, true),
            ],
        });

        // Group 0 of sort.wgsl: uniforms, src, dst
        let sort_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sort Bind Group Layout"),
            entries: &[
                uniform_entry(0, compute, true),
                storage_entry(1, compute, true),
                storage_entry(2, compute, false),
            ],
        });

        // Group 0 of resample.wgsl: uniforms, old state, offsets, dst
        let resample_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Resample Bind Group Layout"),
            entries: &[
                uniform_entry(0, compute, true),
                storage_entry(1, compute, true),
                storage_entry(2, compute, true),
                storage_entry(3, compute, false),
            ],
        });

        let simulate = compute_pipeline(
            device,
            "Simulate Pipeline",
            include_str!("simulate_shader.wgsl"),
            "simulate",
            &simulate_layout,
        );
        let sort = compute_pipeline(
            device,
            "Sort Pipeline",
            include_str!("sort_shader.wgsl"),
            "sort",
            &sort_layout,
        );
        let resample = compute_pipeline(
            device,
            "Resample Pipeline",
            include_str!("resample_shader.wgsl"),
            "resample",
            &resample_layout,
        );

        let draw_stages = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;

        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Draw Uniform Bind Group Layout"),
            entries: &[uniform_entry(0, draw_stages, false)],
        });

        let particles_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Particle State Bind Group Layout"),
            entries: &[storage_entry(0, wgpu::ShaderStages::VERTEX, true)],
        });

        // The viewer samples opacity per particle, the floor per fragment
        let opacity_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Opacity Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: draw_stages,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: draw_stages,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let particle_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Particle Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("particle_shader.wgsl").into()),
        });
        let floor_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Floor Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("floor_shader.wgsl").into()),
        });
        let background_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Background Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("background_shader.wgsl").into()),
        });

        let viewer_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Viewer Pipeline Layout"),
            bind_group_layouts: &[&draw_layout, &particles_layout, &opacity_layout],
            push_constant_ranges: &[],
        });
        // No opacity binding: the light pass renders into the opacity target
        let light_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Light Pipeline Layout"),
            bind_group_layouts: &[&draw_layout, &particles_layout],
            push_constant_ranges: &[],
        });
        let floor_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Floor Pipeline Layout"),
            bind_group_layouts: &[&draw_layout, &opacity_layout],
            push_constant_ranges: &[],
        });
        let background_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Background Pipeline Layout"),
            bind_group_layouts: &[&draw_layout],
            push_constant_ranges: &[],
        });

        let viewer = |label, blend| {
            render_pipeline(
                device,
                RenderPipelineDesc {
                    label,
                    layout: &viewer_layout,
                    shader: &particle_shader,
                    vs: "vs_viewer",
                    fs: "fs_viewer",
                    buffers: &[],
                    format,
                    blend,
                    topology: wgpu::PrimitiveTopology::TriangleList,
                },
            )
        };
        let viewer_front_to_back = viewer("Viewer Front-To-Back Pipeline", UNDER_BLENDING);
        let viewer_back_to_front = viewer("Viewer Back-To-Front Pipeline", OVER_BLENDING);

        let light = render_pipeline(
            device,
            RenderPipelineDesc {
                label: "Light Pipeline",
                layout: &light_layout,
                shader: &particle_shader,
                vs: "vs_light",
                fs: "fs_light",
                buffers: &[],
                format: OPACITY_FORMAT,
                blend: OVER_BLENDING,
                topology: wgpu::PrimitiveTopology::TriangleList,
            },
        );

        let floor_vertex_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 3]>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &wgpu::vertex_attr_array![0 => Float32x3],
        };
        let floor = render_pipeline(
            device,
            RenderPipelineDesc {
                label: "Floor Pipeline",
                layout: &floor_layout,
                shader: &floor_shader,
                vs: "vs_floor",
                fs: "fs_floor",
                buffers: &[floor_vertex_layout],
                format,
                blend: UNDER_BLENDING,
                topology: wgpu::PrimitiveTopology::TriangleStrip,
            },
        );

        let background = render_pipeline(
            device,
            RenderPipelineDesc {
                label: "Background Pipeline",
                layout: &background_layout,
                shader: &background_shader,
                vs: "vs_background",
                fs: "fs_background",
                buffers: &[],
                format,
                blend: UNDER_BLENDING,
                topology: wgpu::PrimitiveTopology::TriangleStrip,
            },
        );

        Self {
            simulate_layout,
            sort_layout,
            resample_layout,
            draw_layout,
            particles_layout,
            opacity_layout,
            simulate,
            sort,
            resample,
            viewer_front_to_back,
            viewer_back_to_front,
            light,
            floor,
            background,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroups_cover_every_particle() {
        assert_eq!(workgroups(0), 0);
        assert_eq!(workgroups(1), 1);
        assert_eq!(workgroups(256), 1);
        assert_eq!(workgroups(257), 2);
        assert_eq!(workgroups(2048 * 1024), 8192);
    }
}
