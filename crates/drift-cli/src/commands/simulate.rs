//! CPU reference run with a statistics report

use super::FlowArgs;
use anyhow::{Context, Result};
use drift_core::Result as FlowResult;
use drift_render::OrbitCamera;
use drift_sim::sort::count_inversions;
use drift_sim::{
    CpuBackend, FlowBackend, FlowPipeline, ParticleDraw, ParticleGrid, ResamplePass, SortStep,
    StepParams, ViewSource,
};
use glam::Vec3;
use serde::Serialize;
use std::ops::Range;

pub struct SimulateArgs {
    pub flow: FlowArgs,
    pub frames: u32,
    pub frame_time: f32,
    pub opacity_resolution: u32,
    pub format: String,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub quality_level: usize,
    pub resolution: String,
    pub particles: usize,
    pub frames: u32,
    pub simulation_steps: u32,
    pub simulated_time: f64,
    pub max_distance: f32,
    pub min_lifetime: f32,
    pub max_lifetime: f32,
    pub respawns: u64,
    pub sort_steps: u32,
    pub sort_inversions: usize,
    pub flipped: bool,
    pub max_opacity: f32,
    pub max_floor_shadow: f32,
}

/// Counts particles that expired and respawned during simulation passes
struct RespawnCounter<'a> {
    inner: &'a mut CpuBackend,
    respawns: u64,
}

impl FlowBackend for RespawnCounter<'_> {
    fn select_quality(&mut self, level: usize) -> FlowResult<()> {
        self.inner.select_quality(level)
    }

    fn bootstrap(&mut self, seed: &ParticleGrid) -> FlowResult<()> {
        self.inner.bootstrap(seed)
    }

    fn resample(&mut self, pass: &ResamplePass) -> FlowResult<()> {
        self.inner.resample(pass)
    }

    fn simulate(&mut self, params: &StepParams) -> FlowResult<()> {
        let before: Vec<f32> = self
            .inner
            .particles()
            .map(|grid| grid.records().iter().map(|r| r.lifetime).collect())
            .unwrap_or_default();
        self.inner.simulate(params)?;

        // Simulation keeps indices stable; only a respawn raises a lifetime
        if let Some(after) = self.inner.particles() {
            self.respawns += after
                .records()
                .iter()
                .zip(&before)
                .filter(|(record, old)| record.lifetime > **old)
                .count() as u64;
        }
        Ok(())
    }

    fn sort(&mut self, step: SortStep, half_vector: Vec3) -> FlowResult<()> {
        self.inner.sort(step, half_vector)
    }

    fn begin_particles(&mut self, draw: &ParticleDraw) -> FlowResult<()> {
        self.inner.begin_particles(draw)
    }

    fn draw_viewer_slice(&mut self, draw: &ParticleDraw, slice: Range<u32>) -> FlowResult<()> {
        self.inner.draw_viewer_slice(draw, slice)
    }

    fn draw_light_slice(&mut self, draw: &ParticleDraw, slice: Range<u32>) -> FlowResult<()> {
        self.inner.draw_light_slice(draw, slice)
    }

    fn draw_floor(&mut self, draw: &ParticleDraw) -> FlowResult<()> {
        self.inner.draw_floor(draw)
    }

    fn draw_background(&mut self, draw: &ParticleDraw) -> FlowResult<()> {
        self.inner.draw_background(draw)
    }
}

pub fn run(args: SimulateArgs) -> Result<()> {
    let config = args.flow.load()?;
    let mut pipeline = FlowPipeline::new(config.clone()).context("Failed to create flow pipeline")?;
    let mut backend = CpuBackend::new(&config, pipeline.tables().clone(), args.opacity_resolution);
    let camera = OrbitCamera::new(&config.camera);

    let mut counter = RespawnCounter {
        inner: &mut backend,
        respawns: 0,
    };
    let mut simulation_steps = 0;
    let mut sort_steps = 0;
    let mut flipped = false;

    // Tick zero bootstraps and warms up; the requested frames follow
    for frame in 0..=args.frames {
        let elapsed = if frame == 0 { 0.0 } else { args.frame_time };
        let report = pipeline
            .tick(&mut counter, &camera, elapsed)
            .with_context(|| format!("Frame {frame} failed"))?;
        simulation_steps += report.simulation_steps;
        sort_steps += report.sort_steps;
        flipped = report.flipped;
    }
    let respawns = counter.respawns;

    let grid = backend
        .particles()
        .context("Particle state missing after simulation")?;
    let records = grid.records();

    let mut view = pipeline.state().view;
    let half_vector = view
        .update(camera.view_direction(), pipeline.light().direction)
        .half_vector;

    let report = SimulationReport {
        quality_level: pipeline.state().quality_index.unwrap_or_default(),
        resolution: grid.resolution().to_string(),
        particles: records.len(),
        frames: args.frames,
        simulation_steps,
        simulated_time: pipeline.state().simulation_time,
        max_distance: records
            .iter()
            .map(|r| r.position().length())
            .fold(0.0, f32::max),
        min_lifetime: records
            .iter()
            .map(|r| r.lifetime)
            .fold(f32::INFINITY, f32::min),
        max_lifetime: records
            .iter()
            .map(|r| r.lifetime)
            .fold(f32::NEG_INFINITY, f32::max),
        respawns,
        sort_steps,
        sort_inversions: count_inversions(grid, half_vector),
        flipped,
        max_opacity: backend.opacity().texels().iter().copied().fold(0.0, f32::max),
        max_floor_shadow: backend.floor().shadows().iter().copied().fold(0.0, f32::max),
    };

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text(&report),
    }

    Ok(())
}

fn print_text(report: &SimulationReport) {
    println!("Quality level:    {} ({})", report.quality_level, report.resolution);
    println!("Particles:        {}", report.particles);
    println!(
        "Frames:           {} ({} simulation steps, {:.2}s simulated)",
        report.frames, report.simulation_steps, report.simulated_time
    );
    println!("Max distance:     {:.4}", report.max_distance);
    println!(
        "Lifetime range:   {:.3} .. {:.3}",
        report.min_lifetime, report.max_lifetime
    );
    println!("Respawns:         {}", report.respawns);
    println!(
        "Sort:             {} steps, {} inversions{}",
        report.sort_steps,
        report.sort_inversions,
        if report.flipped { " (flipped)" } else { "" }
    );
    println!("Max opacity:      {:.3}", report.max_opacity);
    println!("Max floor shadow: {:.3}", report.max_floor_shadow);
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::{FlowConfig, QualityLevelConfig, RenderConfig, SimulationConfig};

    #[test]
    fn respawns_are_counted_through_the_wrapper() {
        let config = FlowConfig {
            quality: vec![QualityLevelConfig::new(16, 16, 0.05, 0.5)],
            simulation: SimulationConfig {
                base_lifetime: 0.5,
                max_additional_lifetime: 0.0,
                presimulation_delta_time: 0.125,
                ..SimulationConfig::default()
            },
            render: RenderConfig {
                slices: 4,
                ..RenderConfig::default()
            },
            ..FlowConfig::default()
        };
        let mut pipeline = FlowPipeline::new(config.clone()).unwrap();
        let mut backend = CpuBackend::new(&config, pipeline.tables().clone(), 16);
        let camera = OrbitCamera::new(&config.camera);
        let mut counter = RespawnCounter {
            inner: &mut backend,
            respawns: 0,
        };

        // Four warm-up steps of 0.125s against lifetimes below 0.5s: every particle expires once
        let report = pipeline.tick(&mut counter, &camera, 0.0).unwrap();
        assert_eq!(report.simulation_steps, 4);
        assert_eq!(counter.respawns, 256);
    }
}
