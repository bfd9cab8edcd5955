//! wgpu execution of the flow passes
//!
//! `GpuFlow` owns everything that outlives a frame. Each frame borrows it as a
//! `GpuFrame`, which records every pass of one pipeline tick into a single
//! command encoder and submits it when finished.

use crate::context::RenderError;
use crate::pipelines::{workgroups, FlowPipelines};
use crate::readback;
use crate::resources::{FlowResources, ParticleBuffers};
use crate::uniforms::{DrawUniforms, ResampleUniforms, SimulateUniforms, SortUniforms, UniformArena};
use drift_core::{DriftError, FlowConfig, NoiseConfig, RenderConfig, Result};
use drift_sim::sort::total_steps;
use drift_sim::{
    BlendOrder, FlowBackend, FlowTables, LightProjection, ParticleDraw, ParticleGrid, ParticleRecord,
    ResamplePass, SortStep, StepParams,
};
use glam::Vec3;
use std::ops::Range;

/// Per-session GPU state of the flow
pub struct GpuFlow {
    pipelines: FlowPipelines,
    resources: FlowResources,
    arena: UniformArena,
    light: LightProjection,
    noise: NoiseConfig,
    render: RenderConfig,
    base_velocity: [f32; 3],
    active_level: Option<usize>,
    state: Option<ParticleBuffers>,
    /// Replaced state still referenced by recorded commands
    retired: Vec<ParticleBuffers>,
}

impl GpuFlow {
    /// Upload the session tables and build every pipeline for a target of `format`
    pub fn new(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        config: &FlowConfig,
        tables: &FlowTables,
    ) -> std::result::Result<Self, RenderError> {
        let pipelines = FlowPipelines::new(device, format);
        let resources = FlowResources::new(device, &pipelines, tables, &config.render)?;

        // Worst frame: warm-up burst, one resample and a complete sort of the largest level
        let max_sort = total_steps(config.max_particle_count()).max(config.sort.passes_per_frame);
        let slots = config.simulation.presimulation_steps() + max_sort + 2;
        let arena = UniformArena::new(device, slots);

        tracing::info!(
            format = ?format,
            uniform_slots = slots,
            "GPU flow created"
        );

        Ok(Self {
            pipelines,
            resources,
            arena,
            light: LightProjection::new(&config.light),
            noise: config.noise.clone(),
            render: config.render.clone(),
            base_velocity: config.simulation.base_velocity,
            active_level: None,
            state: None,
            retired: Vec::new(),
        })
    }

    pub fn active_level(&self) -> Option<usize> {
        self.active_level
    }

    pub fn particle_count(&self) -> u32 {
        self.state.as_ref().map(ParticleBuffers::count).unwrap_or(0)
    }

    pub fn opacity_resolution(&self) -> u32 {
        self.resources.opacity_resolution()
    }

    /// Start recording one frame into `target`
    pub fn frame<'a>(
        &'a mut self,
        device: &'a wgpu::Device,
        queue: &'a wgpu::Queue,
        target: &'a wgpu::TextureView,
    ) -> GpuFrame<'a> {
        let encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Flow Frame Encoder"),
        });
        GpuFrame {
            flow: self,
            device,
            queue,
            target,
            encoder,
        }
    }

    /// Copy the current particle state back to the host
    pub fn read_particles(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> std::result::Result<Vec<ParticleRecord>, RenderError> {
        let state = self.state.as_ref().ok_or(RenderError::NotBootstrapped)?;
        let size = crate::resources::state_size(state.resolution);

        let staging = readback::staging_buffer(device, "Particle Readback Buffer", size);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Particle Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(state.buffers.current(), 0, &staging, 0, size);

        let data = readback::submit_and_map(device, queue, encoder, &staging)?;
        Ok(data
            .chunks_exact(std::mem::size_of::<ParticleRecord>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    fn state(&self) -> std::result::Result<&ParticleBuffers, RenderError> {
        self.state.as_ref().ok_or(RenderError::NotBootstrapped)
    }

    fn spawn_buffer(&self) -> std::result::Result<&wgpu::Buffer, RenderError> {
        let level = self.active_level.ok_or(RenderError::NotBootstrapped)?;
        self.resources.spawn.get(level).ok_or_else(|| {
            RenderError::Flow(DriftError::InvalidQualityLevel {
                index: level,
                count: self.resources.spawn.len(),
            })
        })
    }

    fn draw_uniforms(&self, draw: &ParticleDraw) -> DrawUniforms {
        DrawUniforms {
            view: draw.view.to_cols_array_2d(),
            projection: draw.projection.to_cols_array_2d(),
            light_view: self.light.view.to_cols_array_2d(),
            light_projection: self.light.projection.to_cols_array_2d(),
            color: draw.color,
            alpha: draw.alpha,
            diameter: draw.diameter,
            opacity_scale: self.render.opacity_scale,
            floor_y: self.render.floor_origin[1],
            shadow_strength: self.render.floor_shadow_strength,
            background_scale: self.render.background_distance_scale,
            _pad: [0.0; 3],
        }
    }

    fn replace_state(&mut self, state: ParticleBuffers) {
        if let Some(old) = self.state.replace(state) {
            self.retired.push(old);
        }
    }
}

/// One frame being recorded. Implements the pass sequence of a pipeline tick.
pub struct GpuFrame<'a> {
    flow: &'a mut GpuFlow,
    device: &'a wgpu::Device,
    queue: &'a wgpu::Queue,
    target: &'a wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
}

impl GpuFrame<'_> {
    /// Upload this frame's pass uniforms and submit every recorded command
    pub fn submit(self) -> wgpu::SubmissionIndex {
        let GpuFrame {
            flow,
            queue,
            encoder,
            ..
        } = self;
        flow.arena.flush(queue);
        let index = queue.submit(std::iter::once(encoder.finish()));
        flow.retired.clear();
        index
    }

    fn push<T: bytemuck::Pod>(&mut self, value: &T) -> Result<u32> {
        Ok(self.flow.arena.push(value)?)
    }
}

impl FlowBackend for GpuFrame<'_> {
    fn select_quality(&mut self, level: usize) -> Result<()> {
        if level >= self.flow.resources.spawn.len() {
            return Err(DriftError::InvalidQualityLevel {
                index: level,
                count: self.flow.resources.spawn.len(),
            });
        }
        self.flow.active_level = Some(level);
        Ok(())
    }

    fn bootstrap(&mut self, seed: &ParticleGrid) -> Result<()> {
        let spawn = self.flow.spawn_buffer()?;
        let state = ParticleBuffers::new(
            self.device,
            &self.flow.pipelines,
            &self.flow.arena,
            spawn,
            seed.resolution(),
            Some(seed),
        )?;
        self.flow.replace_state(state);
        tracing::debug!(resolution = %seed.resolution(), "Particle state bootstrapped");
        Ok(())
    }

    fn resample(&mut self, pass: &ResamplePass) -> Result<()> {
        let flow = &mut *self.flow;
        let spawn = flow.spawn_buffer()?;
        let next = ParticleBuffers::new(self.device, &flow.pipelines, &flow.arena, spawn, pass.new, None)?;
        let (group, old) = {
            let current = flow.state()?;
            let group = current.resample_group(
                self.device,
                &flow.pipelines,
                &flow.arena,
                &flow.resources.offsets,
                &next,
            );
            (group, current.resolution)
        };

        let offset_resolution = flow.resources.offset_resolution;
        let offset = flow.arena.push(&ResampleUniforms {
            old_size: [old.width, old.height],
            new_size: [pass.new.width, pass.new.height],
            offset_size: [offset_resolution.width, offset_resolution.height],
            offset_scale: pass.offset_scale,
            _pad: 0,
        })?;

        let pipeline = &flow.pipelines.resample;
        {
            let mut compute = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Resample Pass"),
                timestamp_writes: None,
            });
            compute.set_pipeline(pipeline);
            compute.set_bind_group(0, &group, &[offset]);
            compute.dispatch_workgroups(workgroups(pass.new.count()), 1, 1);
        }

        flow.replace_state(next);
        tracing::debug!(old = %pass.old, new = %pass.new, offset_scale = pass.offset_scale, "Particle state resampled");
        Ok(())
    }

    fn simulate(&mut self, params: &StepParams) -> Result<()> {
        let count = self.flow.state()?.count();
        let noise = &self.flow.noise;
        let uniforms = SimulateUniforms {
            base_velocity: self.flow.base_velocity,
            delta_time: params.delta_time,
            time: params.time,
            persistence: params.persistence,
            position_scale: noise.position_scale,
            time_scale: noise.time_scale,
            velocity_scale: noise.velocity_scale,
            octaves: noise.octaves,
            count,
            _pad: 0,
        };
        let offset = self.push(&uniforms)?;

        let flow = &mut *self.flow;
        let state = flow.state.as_mut().ok_or(RenderError::NotBootstrapped)?;
        {
            let mut pass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Simulate Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&flow.pipelines.simulate);
            pass.set_bind_group(0, &state.groups.current().simulate, &[offset]);
            pass.dispatch_workgroups(workgroups(count), 1, 1);
        }
        state.swap();
        Ok(())
    }

    fn sort(&mut self, step: SortStep, half_vector: Vec3) -> Result<()> {
        let count = self.flow.state()?.count();
        let offset = self.push(&SortUniforms {
            half_vector: half_vector.to_array(),
            count,
            stage: step.stage,
            pass_log: step.pass,
            _pad: [0; 2],
        })?;

        let flow = &mut *self.flow;
        let state = flow.state.as_mut().ok_or(RenderError::NotBootstrapped)?;
        {
            let mut pass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Sort Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&flow.pipelines.sort);
            pass.set_bind_group(0, &state.groups.current().sort, &[offset]);
            pass.dispatch_workgroups(workgroups(count), 1, 1);
        }
        state.swap();
        Ok(())
    }

    fn begin_particles(&mut self, draw: &ParticleDraw) -> Result<()> {
        let uniforms = self.flow.draw_uniforms(draw);
        self.queue
            .write_buffer(&self.flow.resources.draw_uniforms, 0, bytemuck::bytes_of(&uniforms));

        self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Target Pass"),
            color_attachments: &[Some(clear_attachment(self.target))],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Opacity Pass"),
            color_attachments: &[Some(clear_attachment(&self.flow.resources.opacity_view))],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        Ok(())
    }

    fn draw_viewer_slice(&mut self, draw: &ParticleDraw, slice: Range<u32>) -> Result<()> {
        let flow = &*self.flow;
        let state = flow.state()?;
        let pipeline = match draw.blend {
            BlendOrder::FrontToBack => &flow.pipelines.viewer_front_to_back,
            BlendOrder::BackToFront => &flow.pipelines.viewer_back_to_front,
        };

        let mut pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Viewer Slice Pass"),
            color_attachments: &[Some(load_attachment(self.target))],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &flow.resources.draw_bind_group, &[]);
        pass.set_bind_group(1, &state.groups.current().particles, &[]);
        pass.set_bind_group(2, &flow.resources.opacity_bind_group, &[]);
        pass.draw(0..6, slice);
        Ok(())
    }

    fn draw_light_slice(&mut self, _draw: &ParticleDraw, slice: Range<u32>) -> Result<()> {
        let flow = &*self.flow;
        let state = flow.state()?;

        let mut pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Light Slice Pass"),
            color_attachments: &[Some(load_attachment(&flow.resources.opacity_view))],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&flow.pipelines.light);
        pass.set_bind_group(0, &flow.resources.draw_bind_group, &[]);
        pass.set_bind_group(1, &state.groups.current().particles, &[]);
        pass.draw(0..6, slice);
        Ok(())
    }

    fn draw_floor(&mut self, _draw: &ParticleDraw) -> Result<()> {
        let flow = &*self.flow;
        let mut pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Floor Pass"),
            color_attachments: &[Some(load_attachment(self.target))],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&flow.pipelines.floor);
        pass.set_bind_group(0, &flow.resources.draw_bind_group, &[]);
        pass.set_bind_group(1, &flow.resources.opacity_bind_group, &[]);
        pass.set_vertex_buffer(0, flow.resources.floor_vertices.slice(..));
        pass.draw(0..4, 0..1);
        Ok(())
    }

    fn draw_background(&mut self, _draw: &ParticleDraw) -> Result<()> {
        let flow = &*self.flow;
        let mut pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Background Pass"),
            color_attachments: &[Some(load_attachment(self.target))],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&flow.pipelines.background);
        pass.set_bind_group(0, &flow.resources.draw_bind_group, &[]);
        pass.draw(0..4, 0..1);
        Ok(())
    }
}

fn clear_attachment(view: &wgpu::TextureView) -> wgpu::RenderPassColorAttachment<'_> {
    wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            store: wgpu::StoreOp::Store,
        },
    }
}

fn load_attachment(view: &wgpu::TextureView) -> wgpu::RenderPassColorAttachment<'_> {
    wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load: wgpu::LoadOp::Load,
            store: wgpu::StoreOp::Store,
        },
    }
}
