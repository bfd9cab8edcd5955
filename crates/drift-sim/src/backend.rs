//! Backend seam between the frame pipeline and whatever executes its passes
//!
//! The pipeline decides *what* runs each tick and in which order; a backend
//! owns the particle state, the tables and the opacity target and executes
//! each pass. `CpuBackend` runs every pass on the host and serves as the
//! reference used by tests and the `simulate` command.

use crate::floor::{BackgroundGradient, FloorShadow};
use crate::grid::{DoubleBuffer, ParticleGrid, Resolution};
use crate::opacity::{projected_half_size, LightProjection, OpacityField};
use crate::resample::resample_grid;
use crate::sort::{sort_pass, SortStep};
use crate::stepper::{SimulationStepper, StepParams};
use crate::tables::FlowTables;
use crate::view::BlendOrder;
use drift_core::{DriftError, FlowConfig, Result};
use glam::{Mat4, Vec3};
use std::ops::Range;

/// Upsample/downsample request for the active state
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ResamplePass {
    pub old: Resolution,
    pub new: Resolution,
    pub offset_scale: f32,
}

/// Per-frame inputs shared by every draw in a tick
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ParticleDraw {
    pub view: Mat4,
    pub projection: Mat4,
    pub particle_count: u32,
    pub diameter: f32,
    pub alpha: f32,
    pub color: [f32; 3],
    pub blend: BlendOrder,
}

/// Executes the passes of one pipeline tick, in the order they are called
pub trait FlowBackend {
    /// Make `level`'s spawn table and particle vertex data current
    fn select_quality(&mut self, level: usize) -> Result<()>;

    /// Replace the state with `seed` (buffer A) plus a same-size scratch buffer
    fn bootstrap(&mut self, seed: &ParticleGrid) -> Result<()>;

    /// Resample the current state to a new resolution
    fn resample(&mut self, pass: &ResamplePass) -> Result<()>;

    fn simulate(&mut self, params: &StepParams) -> Result<()>;

    fn sort(&mut self, step: SortStep, half_vector: Vec3) -> Result<()>;

    /// Clear the opacity target before the first slice
    fn begin_particles(&mut self, draw: &ParticleDraw) -> Result<()>;

    /// Draw one slice from the viewer, shaded by opacity accumulated so far
    fn draw_viewer_slice(&mut self, draw: &ParticleDraw, slice: Range<u32>) -> Result<()>;

    /// Accumulate one slice into the opacity target from the light
    fn draw_light_slice(&mut self, draw: &ParticleDraw, slice: Range<u32>) -> Result<()>;

    fn draw_floor(&mut self, draw: &ParticleDraw) -> Result<()>;

    fn draw_background(&mut self, draw: &ParticleDraw) -> Result<()>;
}

/// Pass counters, useful for checking the tick order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassLog {
    pub bootstraps: u32,
    pub resamples: u32,
    pub simulations: u32,
    pub sort_steps: u32,
    pub viewer_slices: u32,
    pub light_slices: u32,
    pub floors: u32,
    pub backgrounds: u32,
}

/// Host-side reference backend
pub struct CpuBackend {
    stepper: SimulationStepper,
    tables: FlowTables,
    light: LightProjection,
    floor_y: f32,
    active_level: Option<usize>,
    state: Option<DoubleBuffer<ParticleGrid>>,
    opacity: OpacityField,
    /// Opacity each particle saw in the viewer pass, indexed like the state
    shadows: Vec<f32>,
    floor: FloorShadow,
    background: BackgroundGradient,
    log: PassLog,
}

impl CpuBackend {
    /// `opacity_resolution` overrides the configured size; the host field is
    /// usually kept much coarser than the GPU target. The floor and background
    /// are sampled at the same resolution.
    pub fn new(config: &FlowConfig, tables: FlowTables, opacity_resolution: u32) -> Self {
        Self {
            stepper: SimulationStepper::new(config),
            tables,
            light: LightProjection::new(&config.light),
            floor_y: config.render.floor_origin[1],
            active_level: None,
            state: None,
            opacity: OpacityField::new(opacity_resolution.max(1)),
            shadows: Vec::new(),
            floor: FloorShadow::new(&config.render, opacity_resolution),
            background: BackgroundGradient::new(&config.render, opacity_resolution),
            log: PassLog::default(),
        }
    }

    pub fn state(&self) -> Option<&DoubleBuffer<ParticleGrid>> {
        self.state.as_ref()
    }

    /// The particle grid the next pass will read
    pub fn particles(&self) -> Option<&ParticleGrid> {
        self.state.as_ref().map(DoubleBuffer::current)
    }

    pub fn active_level(&self) -> Option<usize> {
        self.active_level
    }

    pub fn opacity(&self) -> &OpacityField {
        &self.opacity
    }

    pub fn shadows(&self) -> &[f32] {
        &self.shadows
    }

    pub fn floor(&self) -> &FloorShadow {
        &self.floor
    }

    pub fn background(&self) -> &BackgroundGradient {
        &self.background
    }

    pub fn log(&self) -> &PassLog {
        &self.log
    }

    pub fn stepper(&self) -> &SimulationStepper {
        &self.stepper
    }

    fn state_mut(&mut self) -> Result<&mut DoubleBuffer<ParticleGrid>> {
        self.state
            .as_mut()
            .ok_or_else(|| DriftError::Backend("particle state used before bootstrap".to_string()))
    }

    fn visible(&self, position: Vec3) -> bool {
        position.y >= self.floor_y
    }
}

impl FlowBackend for CpuBackend {
    fn select_quality(&mut self, level: usize) -> Result<()> {
        if self.tables.spawn_table(level).is_none() {
            return Err(DriftError::InvalidQualityLevel {
                index: level,
                count: self.tables.spawn.len(),
            });
        }
        self.active_level = Some(level);
        Ok(())
    }

    fn bootstrap(&mut self, seed: &ParticleGrid) -> Result<()> {
        let scratch = ParticleGrid::allocate(seed.resolution());
        self.state = Some(DoubleBuffer::new(seed.clone(), scratch));
        self.shadows = vec![0.0; seed.len()];
        self.log.bootstraps += 1;
        Ok(())
    }

    fn resample(&mut self, pass: &ResamplePass) -> Result<()> {
        let offsets = &self.tables.offsets;
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| DriftError::Backend("resample before bootstrap".to_string()))?;
        let resampled = resample_grid(state.current(), offsets, pass.new, pass.offset_scale);
        self.state = Some(DoubleBuffer::new(resampled, ParticleGrid::allocate(pass.new)));
        self.shadows = vec![0.0; pass.new.count() as usize];
        self.log.resamples += 1;
        Ok(())
    }

    fn simulate(&mut self, params: &StepParams) -> Result<()> {
        let level = self
            .active_level
            .ok_or_else(|| DriftError::Backend("no quality level selected".to_string()))?;
        let mut state = self
            .state
            .take()
            .ok_or_else(|| DriftError::Backend("simulate before bootstrap".to_string()))?;
        let result = match self.tables.spawn_table(level) {
            Some(spawn) => {
                self.stepper.step(&mut state, spawn, params);
                Ok(())
            }
            None => Err(DriftError::InvalidQualityLevel {
                index: level,
                count: self.tables.spawn.len(),
            }),
        };
        self.state = Some(state);
        self.log.simulations += 1;
        result
    }

    fn sort(&mut self, step: SortStep, half_vector: Vec3) -> Result<()> {
        sort_pass(self.state_mut()?, step, half_vector);
        self.log.sort_steps += 1;
        Ok(())
    }

    fn begin_particles(&mut self, _draw: &ParticleDraw) -> Result<()> {
        self.opacity.clear();
        Ok(())
    }

    fn draw_viewer_slice(&mut self, _draw: &ParticleDraw, slice: Range<u32>) -> Result<()> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| DriftError::Backend("draw before bootstrap".to_string()))?;
        let grid = state.current();
        for index in slice {
            let position = grid.get(index).position();
            self.shadows[index as usize] = if self.visible(position) {
                self.opacity.opacity_at(&self.light, position)
            } else {
                0.0
            };
        }
        self.log.viewer_slices += 1;
        Ok(())
    }

    fn draw_light_slice(&mut self, draw: &ParticleDraw, slice: Range<u32>) -> Result<()> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| DriftError::Backend("draw before bootstrap".to_string()))?;
        let grid = state.current();
        for index in slice {
            let position = grid.get(index).position();
            let view_position = self.light.view.transform_point3(position);
            let half_ndc = projected_half_size(self.light.projection, view_position, draw.diameter);
            let center = self.light.texture_coordinates(position);
            self.opacity.splat(center, half_ndc * 0.5, draw.alpha);
        }
        self.log.light_slices += 1;
        Ok(())
    }

    fn draw_floor(&mut self, _draw: &ParticleDraw) -> Result<()> {
        self.floor.shade(&self.opacity, &self.light);
        self.log.floors += 1;
        Ok(())
    }

    fn draw_background(&mut self, _draw: &ParticleDraw) -> Result<()> {
        self.background.fill();
        self.log.backgrounds += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::ParticleRecord;
    use crate::quality::QualityLadder;
    use drift_core::{QualityLevelConfig, RenderConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn floor_config() -> FlowConfig {
        FlowConfig {
            quality: vec![QualityLevelConfig::new(8, 8, 0.5, 0.5)],
            render: RenderConfig {
                slices: 1,
                floor_origin: [-10.0, -0.75, -10.0],
                floor_width: 20.0,
                floor_depth: 20.0,
                ..RenderConfig::default()
            },
            ..FlowConfig::default()
        }
    }

    fn draw(config: &FlowConfig, count: u32) -> ParticleDraw {
        ParticleDraw {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            particle_count: count,
            diameter: config.quality[0].diameter,
            alpha: config.quality[0].alpha,
            color: [1.0; 3],
            blend: BlendOrder::FrontToBack,
        }
    }

    #[test]
    fn floor_is_darkened_under_the_cloud_only() {
        let config = floor_config();
        let ladder = QualityLadder::from_config(&config).unwrap();
        let tables = FlowTables::build(&ladder, &config.simulation, &mut StdRng::seed_from_u64(3)).unwrap();
        let mut backend = CpuBackend::new(&config, tables, 64);

        // Every particle stacked above one floor point
        let cloud = Vec3::new(0.5, 0.0, 0.5);
        let mut grid = ParticleGrid::allocate(Resolution::new(8, 8).unwrap());
        for record in grid.records_mut() {
            *record = ParticleRecord::new(cloud, 1.0);
        }
        backend.bootstrap(&grid).unwrap();

        let draw = draw(&config, 64);
        backend.begin_particles(&draw).unwrap();
        backend.draw_light_slice(&draw, 0..64).unwrap();
        assert!(backend.floor().shadows().iter().all(|&s| s == 0.0));

        backend.draw_floor(&draw).unwrap();
        let strength = config.render.floor_shadow_strength;

        let under = backend
            .floor()
            .cells()
            .filter(|(center, _)| (center.x - cloud.x).abs() < 0.2 && (center.z - cloud.z).abs() < 0.2)
            .map(|(_, shadow)| shadow)
            .fold(0.0, f32::max);
        assert!(under > 0.5 * strength, "shadow under the cloud was {under}");
        assert!(backend.floor().shadows().iter().all(|&s| s <= strength));

        // The light box spans five units either side of the origin
        for (center, shadow) in backend.floor().cells() {
            if center.x.abs() > 5.0 || center.z.abs() > 5.0 {
                assert_eq!(shadow, 0.0, "lit cell at {center} was shadowed");
            }
        }
        assert_eq!(backend.log().floors, 1);
    }

    #[test]
    fn background_pass_fills_the_gradient() {
        let config = floor_config();
        let ladder = QualityLadder::from_config(&config).unwrap();
        let tables = FlowTables::build(&ladder, &config.simulation, &mut StdRng::seed_from_u64(3)).unwrap();
        let mut backend = CpuBackend::new(&config, tables, 16);
        assert!(backend.background().shades().iter().all(|&s| s == 0.0));

        backend.draw_background(&draw(&config, 64)).unwrap();
        let scale = config.render.background_distance_scale;
        let shades = backend.background().shades();
        assert!(shades.iter().all(|&s| s > 1.0 - 2f32.sqrt() * scale && s < 1.0));
        assert_eq!(backend.log().backgrounds, 1);
    }
}
