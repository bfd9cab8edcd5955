//! Frame orchestration
//!
//! `FlowPipeline` owns the state that persists across ticks (quality level,
//! pending transition, sort schedule, view flip, live controls) and drives a
//! [`FlowBackend`] through one fixed pass order per tick:
//!
//! 1. quality transition (bootstrap or resample), if one is pending
//! 2. simulation (a warm-up burst on the very first tick)
//! 3. the frame's sort budget
//! 4. viewer and light passes, interleaved per slice
//! 5. floor, then background

use crate::backend::{FlowBackend, ParticleDraw, ResamplePass};
use crate::grid::Resolution;
use crate::opacity::LightProjection;
use crate::quality::QualityLadder;
use crate::resample::{bootstrap_grid, offset_scale};
use crate::sort::SortState;
use crate::stepper::StepParams;
use crate::tables::FlowTables;
use crate::view::{BlendOrder, ViewSource, ViewState};
use drift_core::{hsv_to_rgb, DriftError, FlowConfig, Result};
use glam::Mat4;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::ops::Range;

/// Lifecycle of the particle state
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowPhase {
    /// No tick has run; the initial level is pending
    Uninitialized,
    /// First tick in progress: bootstrap plus warm-up
    Bootstrapping,
    Steady,
}

/// A quality change waiting for the next tick
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PendingTransition {
    pub level: usize,
    /// Resolution and splat diameter the state had when the change was requested
    pub previous: Option<(Resolution, f32)>,
}

/// What a tick did to the particle state's shape
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Transition {
    Bootstrap { level: usize },
    Resample { level: usize, pass: ResamplePass },
}

/// Summary of one tick
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub delta_time: f32,
    pub transition: Option<Transition>,
    pub simulation_steps: u32,
    pub sort_steps: u32,
    pub flipped: bool,
    pub flipped_this_frame: bool,
    pub slices: u32,
}

/// State that persists between ticks
#[derive(Clone, Debug)]
pub struct PipelineState {
    pub phase: FlowPhase,
    pub quality_index: Option<usize>,
    pub resolution: Option<Resolution>,
    pub diameter: f32,
    pub alpha: f32,
    pub pending: Option<PendingTransition>,
    pub sort: SortState,
    pub view: ViewState,
    pub simulation_time: f64,
    pub hue: f32,
    pub time_scale: f32,
    pub persistence: f32,
    pub aspect_ratio: f32,
}

/// Equal particle ranges drawn per slice
pub fn slice_ranges(count: u32, slices: u32) -> impl Iterator<Item = Range<u32>> {
    let slices = slices.max(1);
    let size = count / slices;
    (0..slices).map(move |i| i * size..(i + 1) * size)
}

pub struct FlowPipeline {
    config: FlowConfig,
    ladder: QualityLadder,
    tables: FlowTables,
    light: LightProjection,
    rng: StdRng,
    state: PipelineState,
}

impl FlowPipeline {
    /// Validate the config, build the session tables and queue the initial level
    pub fn new(config: FlowConfig) -> Result<Self> {
        config.validate()?;
        let ladder = QualityLadder::from_config(&config)?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let tables = FlowTables::build(&ladder, &config.simulation, &mut rng)?;
        let light = LightProjection::new(&config.light);

        let controls = &config.controls;
        let state = PipelineState {
            phase: FlowPhase::Uninitialized,
            quality_index: None,
            resolution: None,
            diameter: 0.0,
            alpha: 0.0,
            pending: Some(PendingTransition {
                level: controls.initial_quality,
                previous: None,
            }),
            sort: SortState::new(0),
            view: ViewState::default(),
            simulation_time: 0.0,
            hue: controls.initial_hue,
            time_scale: controls.initial_time_scale,
            persistence: controls.initial_persistence,
            aspect_ratio: 16.0 / 9.0,
        };

        tracing::info!(
            levels = ladder.len(),
            initial_level = controls.initial_quality,
            seed = config.seed,
            "Flow pipeline created"
        );

        Ok(Self {
            config,
            ladder,
            tables,
            light,
            rng,
            state,
        })
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn ladder(&self) -> &QualityLadder {
        &self.ladder
    }

    pub fn tables(&self) -> &FlowTables {
        &self.tables
    }

    pub fn light(&self) -> &LightProjection {
        &self.light
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Active particle count, zero before the first tick
    pub fn particle_count(&self) -> u32 {
        self.state.resolution.map(|r| r.count()).unwrap_or(0)
    }

    /// Hue wraps into [0, 1)
    pub fn set_hue(&mut self, hue: f32) {
        self.state.hue = hue.rem_euclid(1.0);
    }

    pub fn set_time_scale(&mut self, time_scale: f32) {
        self.state.time_scale = time_scale.clamp(0.0, self.config.controls.max_time_scale);
    }

    pub fn set_persistence(&mut self, persistence: f32) {
        self.state.persistence = persistence.clamp(0.0, self.config.controls.max_persistence);
    }

    pub fn set_aspect_ratio(&mut self, aspect_ratio: f32) {
        if aspect_ratio.is_finite() && aspect_ratio > 0.0 {
            self.state.aspect_ratio = aspect_ratio;
        }
    }

    /// Request a quality level; applied at the start of the next tick.
    ///
    /// Selecting the active level is a no-op that also drops any pending
    /// change. Transitions always start from the state as it was last
    /// applied, so several requests within one frame collapse into one.
    pub fn change_quality_level(&mut self, level: usize) -> Result<()> {
        if level >= self.ladder.len() {
            return Err(DriftError::InvalidQualityLevel {
                index: level,
                count: self.ladder.len(),
            });
        }

        if self.state.quality_index == Some(level) {
            if self.state.pending.take().is_some() {
                tracing::debug!(level, "Quality change cancelled");
            }
            return Ok(());
        }

        let previous = self
            .state
            .resolution
            .map(|resolution| (resolution, self.state.diameter));
        self.state.pending = Some(PendingTransition { level, previous });
        tracing::debug!(level, "Quality change requested");
        Ok(())
    }

    pub fn projection(&self) -> Mat4 {
        let render = &self.config.render;
        Mat4::perspective_rh(
            render.fov_degrees.to_radians(),
            self.state.aspect_ratio,
            render.near,
            render.far,
        )
    }

    /// Run one full iteration. `elapsed` is wall time since the last tick in seconds.
    pub fn tick<B, V>(&mut self, backend: &mut B, camera: &V, elapsed: f32) -> Result<FrameReport>
    where
        B: FlowBackend + ?Sized,
        V: ViewSource + ?Sized,
    {
        let mut delta_time = if elapsed.is_finite() && elapsed <= self.config.simulation.max_delta_time {
            elapsed.max(0.0)
        } else {
            0.0
        };

        let mut transition = None;
        if let Some(pending) = self.state.pending.take() {
            delta_time = 0.0;
            transition = Some(self.apply_transition(backend, pending)?);
        }

        let resolution = self
            .state
            .resolution
            .ok_or_else(|| DriftError::InvalidConfig("no quality level applied".to_string()))?;
        let count = resolution.count();

        let view = self
            .state
            .view
            .update(camera.view_direction(), self.light.direction);

        let simulation_steps = self.simulate(backend, delta_time)?;

        let steps = self
            .state
            .sort
            .plan(view.flipped_this_frame, self.config.sort.passes_per_frame);
        for step in &steps {
            backend.sort(*step, view.half_vector)?;
        }

        let render = &self.config.render;
        let draw = ParticleDraw {
            view: camera.view_matrix(),
            projection: self.projection(),
            particle_count: count,
            diameter: self.state.diameter,
            alpha: self.state.alpha,
            color: hsv_to_rgb(self.state.hue, render.particle_saturation, render.particle_value),
            blend: BlendOrder::from_flipped(view.flipped),
        };
        backend.begin_particles(&draw)?;
        for slice in slice_ranges(count, render.slices) {
            backend.draw_viewer_slice(&draw, slice.clone())?;
            backend.draw_light_slice(&draw, slice)?;
        }
        backend.draw_floor(&draw)?;
        backend.draw_background(&draw)?;

        Ok(FrameReport {
            delta_time,
            transition,
            simulation_steps,
            sort_steps: steps.len() as u32,
            flipped: view.flipped,
            flipped_this_frame: view.flipped_this_frame,
            slices: render.slices,
        })
    }

    fn apply_transition<B>(&mut self, backend: &mut B, pending: PendingTransition) -> Result<Transition>
    where
        B: FlowBackend + ?Sized,
    {
        let level = *self.ladder.get(pending.level)?;
        backend.select_quality(pending.level)?;

        let transition = match pending.previous {
            None => {
                let spawn = self.tables.spawn_table(pending.level).ok_or(
                    DriftError::InvalidQualityLevel {
                        index: pending.level,
                        count: self.tables.spawn.len(),
                    },
                )?;
                let seed = bootstrap_grid(spawn, self.config.simulation.base_lifetime, &mut self.rng);
                backend.bootstrap(&seed)?;
                Transition::Bootstrap {
                    level: pending.level,
                }
            }
            Some((old, old_diameter)) => {
                let pass = ResamplePass {
                    old,
                    new: level.resolution,
                    offset_scale: offset_scale(old.count(), level.particle_count(), old_diameter),
                };
                backend.resample(&pass)?;
                Transition::Resample {
                    level: pending.level,
                    pass,
                }
            }
        };

        self.state.quality_index = Some(pending.level);
        self.state.resolution = Some(level.resolution);
        self.state.diameter = level.diameter;
        self.state.alpha = level.alpha;
        self.state.sort = SortState::new(level.particle_count());

        tracing::info!(
            level = pending.level,
            resolution = %level.resolution,
            particles = level.particle_count(),
            "Quality level applied"
        );
        Ok(transition)
    }

    fn simulate<B>(&mut self, backend: &mut B, delta_time: f32) -> Result<u32>
    where
        B: FlowBackend + ?Sized,
    {
        let persistence = self.state.persistence;

        if self.state.phase != FlowPhase::Steady {
            self.state.phase = FlowPhase::Bootstrapping;
            let sim = &self.config.simulation;
            let steps = sim.presimulation_steps();
            let step = sim.presimulation_delta_time;
            for _ in 0..steps {
                self.state.simulation_time += step as f64;
                backend.simulate(&StepParams {
                    delta_time: step,
                    time: self.state.simulation_time as f32,
                    persistence,
                })?;
            }
            self.state.phase = FlowPhase::Steady;
            tracing::debug!(steps, "Warm-up burst complete");
            return Ok(steps);
        }

        let step = delta_time * self.state.time_scale;
        self.state.simulation_time += step as f64;
        backend.simulate(&StepParams {
            delta_time: step,
            time: self.state.simulation_time as f32,
            persistence,
        })?;
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::sort::count_inversions;
    use drift_core::{QualityLevelConfig, RenderConfig, SimulationConfig};
    use glam::Vec3;

    /// Fixed camera for tests
    struct TestView {
        direction: Vec3,
    }

    impl ViewSource for TestView {
        fn view_direction(&self) -> Vec3 {
            self.direction
        }

        fn view_matrix(&self) -> Mat4 {
            Mat4::look_to_rh(-self.direction * 3.0, self.direction, Vec3::Y)
        }
    }

    // Looking down and forward: same hemisphere as the light
    fn toward_light() -> TestView {
        TestView {
            direction: Vec3::new(0.0, -0.6, -0.8),
        }
    }

    fn away_from_light() -> TestView {
        TestView {
            direction: Vec3::new(0.0, 0.6, -0.8),
        }
    }

    fn small_config() -> FlowConfig {
        FlowConfig {
            quality: vec![
                QualityLevelConfig::new(16, 16, 0.05, 0.5),
                QualityLevelConfig::new(32, 16, 0.04, 0.4),
                QualityLevelConfig::new(32, 32, 0.03, 0.3),
            ],
            simulation: SimulationConfig {
                base_lifetime: 1.0,
                ..SimulationConfig::default()
            },
            render: RenderConfig {
                slices: 8,
                ..RenderConfig::default()
            },
            ..FlowConfig::default()
        }
    }

    fn setup() -> (FlowPipeline, CpuBackend) {
        let config = small_config();
        let pipeline = FlowPipeline::new(config.clone()).unwrap();
        let backend = CpuBackend::new(&config, pipeline.tables().clone(), 256);
        (pipeline, backend)
    }

    #[test]
    fn first_tick_bootstraps_and_warms_up() {
        let (mut pipeline, mut backend) = setup();
        assert_eq!(pipeline.state().phase, FlowPhase::Uninitialized);
        assert_eq!(pipeline.particle_count(), 0);

        let report = pipeline.tick(&mut backend, &toward_light(), 0.016).unwrap();

        assert_eq!(report.transition, Some(Transition::Bootstrap { level: 0 }));
        assert_eq!(report.delta_time, 0.0);
        assert_eq!(report.simulation_steps, 10);
        assert_eq!(pipeline.state().phase, FlowPhase::Steady);
        assert_eq!(pipeline.particle_count(), 256);

        let log = backend.log();
        assert_eq!(log.bootstraps, 1);
        assert_eq!(log.simulations, 10);
        assert_eq!(log.viewer_slices, 8);
        assert_eq!(log.light_slices, 8);
        assert_eq!(log.floors, 1);
        assert_eq!(log.backgrounds, 1);
    }

    #[test]
    fn bootstrap_fills_buffer_a_and_allocates_b() {
        let (mut pipeline, mut backend) = setup();
        let spawn = pipeline.tables().spawn[0].clone();
        let mut recorder = RecordingBackend::default();
        pipeline.tick(&mut recorder, &toward_light(), 0.0).unwrap();

        let seed = recorder.seed.unwrap();
        assert_eq!(seed.len(), 256);
        for (record, source) in seed.records().iter().zip(spawn.grid().records()) {
            assert_eq!(record.position, source.position);
            assert!((0.0..1.0).contains(&record.lifetime));
        }

        // The reference backend keeps the scratch buffer at the same size
        backend.bootstrap(&seed).unwrap();
        let state = backend.state().unwrap();
        assert_eq!(state.current_index(), 0);
        assert_eq!(state.current().records(), seed.records());
        assert_eq!(state.target().len(), 256);
    }

    #[test]
    fn long_frames_simulate_with_zero_step() {
        let (mut pipeline, mut backend) = setup();
        pipeline.tick(&mut backend, &toward_light(), 0.0).unwrap();

        let before = backend.particles().unwrap().clone();
        let report = pipeline.tick(&mut backend, &toward_light(), 0.5).unwrap();
        assert_eq!(report.delta_time, 0.0);

        // Zero-step simulation plus sort is a permutation with identical records
        let mut a: Vec<_> = before.records().iter().map(|r| r.lifetime.to_bits()).collect();
        let mut b: Vec<_> = backend
            .particles()
            .unwrap()
            .records()
            .iter()
            .map(|r| r.lifetime.to_bits())
            .collect();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
    }

    #[test]
    fn steady_ticks_scale_delta_by_time_scale() {
        let (mut pipeline, mut backend) = setup();
        pipeline.tick(&mut backend, &toward_light(), 0.0).unwrap();
        let start = pipeline.state().simulation_time;

        pipeline.set_time_scale(2.0);
        let report = pipeline.tick(&mut backend, &toward_light(), 0.05).unwrap();
        assert_eq!(report.simulation_steps, 1);
        assert!((pipeline.state().simulation_time - start - 0.1).abs() < 1e-6);
    }

    #[test]
    fn quality_change_resamples_on_next_tick() {
        let (mut pipeline, mut backend) = setup();
        pipeline.tick(&mut backend, &toward_light(), 0.0).unwrap();

        pipeline.change_quality_level(2).unwrap();
        let report = pipeline.tick(&mut backend, &toward_light(), 0.016).unwrap();

        let old = Resolution::new(16, 16).unwrap();
        let new = Resolution::new(32, 32).unwrap();
        assert_eq!(
            report.transition,
            Some(Transition::Resample {
                level: 2,
                pass: ResamplePass {
                    old,
                    new,
                    offset_scale: 0.05,
                },
            })
        );
        assert_eq!(report.delta_time, 0.0);
        assert_eq!(pipeline.particle_count(), 1024);
        assert_eq!(backend.particles().unwrap().len(), 1024);
        assert_eq!(backend.active_level(), Some(2));
        assert_eq!(pipeline.state().sort.total_steps(), 55);
        assert_eq!(backend.log().bootstraps, 1);

        // Downsampling applies no offsets
        pipeline.change_quality_level(0).unwrap();
        let report = pipeline.tick(&mut backend, &toward_light(), 0.016).unwrap();
        match report.transition {
            Some(Transition::Resample { pass, .. }) => assert_eq!(pass.offset_scale, 0.0),
            other => panic!("expected a resample, got {other:?}"),
        }
        assert_eq!(backend.particles().unwrap().len(), 256);
    }

    #[test]
    fn quality_round_trip_keeps_count_and_valid_lifetimes() {
        let (mut pipeline, mut backend) = setup();
        let sim = pipeline.config().simulation.clone();
        let max_lifetime = sim.base_lifetime + sim.max_additional_lifetime;
        pipeline.tick(&mut backend, &toward_light(), 0.0).unwrap();

        for level in [1, 0, 2, 0, 1, 0] {
            pipeline.change_quality_level(level).unwrap();
            for _ in 0..30 {
                pipeline.tick(&mut backend, &toward_light(), 1.0 / 60.0).unwrap();
            }

            let expected = pipeline.ladder().get(level).unwrap().particle_count();
            let grid = backend.particles().unwrap();
            assert_eq!(grid.len(), expected as usize, "level {level}");
            for record in grid.records() {
                assert!(record.is_finite(), "level {level}: {record:?}");
                assert!(
                    (0.0..=max_lifetime).contains(&record.lifetime),
                    "level {level}: lifetime {} outside [0, {max_lifetime}]",
                    record.lifetime
                );
            }
        }
        assert_eq!(backend.log().bootstraps, 1);
        assert_eq!(backend.log().resamples, 6);
    }

    #[test]
    fn reselecting_active_level_is_a_no_op() {
        let (mut pipeline, mut backend) = setup();
        pipeline.tick(&mut backend, &toward_light(), 0.0).unwrap();

        pipeline.change_quality_level(0).unwrap();
        assert!(pipeline.state().pending.is_none());
        let report = pipeline.tick(&mut backend, &toward_light(), 0.016).unwrap();
        assert!(report.transition.is_none());
        assert_eq!(backend.log().resamples, 0);
    }

    #[test]
    fn rejects_out_of_range_level() {
        let (mut pipeline, _) = setup();
        assert!(matches!(
            pipeline.change_quality_level(3),
            Err(DriftError::InvalidQualityLevel { index: 3, count: 3 })
        ));
    }

    #[test]
    fn controls_are_clamped() {
        let (mut pipeline, _) = setup();
        pipeline.set_time_scale(12.0);
        pipeline.set_persistence(-1.0);
        pipeline.set_hue(1.25);
        assert_eq!(pipeline.state().time_scale, 5.0);
        assert_eq!(pipeline.state().persistence, 0.0);
        assert!((pipeline.state().hue - 0.25).abs() < 1e-6);
    }

    #[test]
    fn view_flip_forces_complete_sort() {
        let (mut pipeline, mut backend) = setup();
        pipeline.tick(&mut backend, &toward_light(), 0.0).unwrap();
        let report = pipeline.tick(&mut backend, &toward_light(), 0.016).unwrap();
        assert!(!report.flipped_this_frame);
        // The budget wraps into the next sweep once 36 steps are done
        assert_eq!(report.sort_steps, 50);

        let report = pipeline.tick(&mut backend, &away_from_light(), 0.016).unwrap();
        assert!(report.flipped);
        assert!(report.flipped_this_frame);
        assert_eq!(report.sort_steps, 36);
        assert!(pipeline.state().sort.at_start());

        // After a full sort the state is ordered along the new half-vector
        let half = (pipeline.light().direction - away_from_light().direction).normalize();
        assert_eq!(count_inversions(backend.particles().unwrap(), half), 0);
    }

    #[test]
    fn sort_budget_is_bounded_outside_flips() {
        let mut config = small_config();
        config.sort.passes_per_frame = 7;
        let mut pipeline = FlowPipeline::new(config.clone()).unwrap();
        let mut backend = CpuBackend::new(&config, pipeline.tables().clone(), 16);

        pipeline.tick(&mut backend, &toward_light(), 0.0).unwrap();
        for _ in 0..5 {
            let report = pipeline.tick(&mut backend, &toward_light(), 0.016).unwrap();
            assert_eq!(report.sort_steps, 7);
        }
    }

    #[test]
    fn opacity_accumulates_across_slices() {
        let (mut pipeline, mut backend) = setup();
        pipeline.tick(&mut backend, &toward_light(), 0.0).unwrap();

        let opacity = backend.opacity();
        assert!(opacity.texels().iter().all(|a| (0.0..=1.0).contains(a)));
        assert!(opacity.texels().iter().any(|a| *a > 0.0));
        // The first slice is drawn before anything has been accumulated
        assert!(backend.shadows()[..32].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn slice_ranges_cover_every_particle_once() {
        let ranges: Vec<_> = slice_ranges(256, 8).collect();
        assert_eq!(ranges.len(), 8);
        assert_eq!(ranges[0], 0..32);
        assert_eq!(ranges[7], 224..256);
        assert_eq!(ranges.iter().map(|r| r.len()).sum::<usize>(), 256);
    }

    /// Records the bootstrap seed and ignores everything else
    #[derive(Default)]
    struct RecordingBackend {
        seed: Option<crate::grid::ParticleGrid>,
    }

    impl FlowBackend for RecordingBackend {
        fn select_quality(&mut self, _level: usize) -> Result<()> {
            Ok(())
        }
        fn bootstrap(&mut self, seed: &crate::grid::ParticleGrid) -> Result<()> {
            self.seed = Some(seed.clone());
            Ok(())
        }
        fn resample(&mut self, _pass: &ResamplePass) -> Result<()> {
            Ok(())
        }
        fn simulate(&mut self, _params: &StepParams) -> Result<()> {
            Ok(())
        }
        fn sort(&mut self, _step: crate::sort::SortStep, _half_vector: Vec3) -> Result<()> {
            Ok(())
        }
        fn begin_particles(&mut self, _draw: &ParticleDraw) -> Result<()> {
            Ok(())
        }
        fn draw_viewer_slice(&mut self, _draw: &ParticleDraw, _slice: Range<u32>) -> Result<()> {
            Ok(())
        }
        fn draw_light_slice(&mut self, _draw: &ParticleDraw, _slice: Range<u32>) -> Result<()> {
            Ok(())
        }
        fn draw_floor(&mut self, _draw: &ParticleDraw) -> Result<()> {
            Ok(())
        }
        fn draw_background(&mut self, _draw: &ParticleDraw) -> Result<()> {
            Ok(())
        }
    }
}
