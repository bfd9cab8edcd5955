//! Simulation kernel and the CPU dispatch loop

use crate::curl::CurlNoise;
use crate::grid::{DoubleBuffer, ParticleGrid, ParticleRecord};
use crate::tables::SpawnTable;
use drift_core::FlowConfig;
use glam::Vec3;

/// One simulation step's uniforms
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StepParams {
    pub delta_time: f32,
    /// Accumulated simulated time, drives the noise field's evolution
    pub time: f32,
    pub persistence: f32,
}

/// Run `kernel` for every cell of `target`, writing its result in place.
///
/// This is the CPU counterpart of a full-screen compute dispatch: each cell
/// is computed independently from read-only inputs.
pub fn dispatch(target: &mut ParticleGrid, kernel: impl Fn(u32) -> ParticleRecord) {
    for (index, record) in target.records_mut().iter_mut().enumerate() {
        *record = kernel(index as u32);
    }
}

/// Advects particles through the base flow plus curl noise
pub struct SimulationStepper {
    field: CurlNoise,
    base_velocity: Vec3,
}

impl SimulationStepper {
    pub fn new(config: &FlowConfig) -> Self {
        Self {
            field: CurlNoise::new(&config.noise),
            base_velocity: Vec3::from_array(config.simulation.base_velocity),
        }
    }

    pub fn field(&self) -> &CurlNoise {
        &self.field
    }

    pub fn base_velocity(&self) -> Vec3 {
        self.base_velocity
    }

    pub fn velocity(&self, position: Vec3, time: f32, persistence: f32) -> Vec3 {
        self.base_velocity + self.field.velocity(position, time, persistence)
    }

    /// Advance one particle. Expired particles respawn at `spawn` and carry
    /// the overshoot into their new lifetime.
    pub fn step_record(
        &self,
        record: ParticleRecord,
        spawn: ParticleRecord,
        params: &StepParams,
    ) -> ParticleRecord {
        let position = record.position();
        let velocity = self.velocity(position, params.time, params.persistence);
        let lifetime = record.lifetime - params.delta_time;

        if lifetime < 0.0 {
            ParticleRecord::new(spawn.position(), spawn.lifetime + lifetime)
        } else {
            ParticleRecord::new(position + velocity * params.delta_time, lifetime)
        }
    }

    /// One simulation pass over the whole state, then flip the buffers
    pub fn step(
        &self,
        state: &mut DoubleBuffer<ParticleGrid>,
        spawn: &SpawnTable,
        params: &StepParams,
    ) {
        state.pass(|read, write| {
            dispatch(write, |index| {
                self.step_record(read.get(index), spawn.get(index), params)
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Resolution;
    use crate::quality::QualityLadder;
    use crate::resample::bootstrap_grid;
    use crate::tables::FlowTables;
    use drift_core::QualityLevelConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params(delta_time: f32) -> StepParams {
        StepParams {
            delta_time,
            time: 2.0,
            persistence: 0.2,
        }
    }

    fn spawn_record() -> ParticleRecord {
        ParticleRecord::new(Vec3::new(0.01, 0.02, -0.03), 12.0)
    }

    #[test]
    fn zero_step_is_identity() {
        let stepper = SimulationStepper::new(&FlowConfig::default());
        let record = ParticleRecord::new(Vec3::new(0.4, -0.1, 0.2), 3.5);
        assert_eq!(stepper.step_record(record, spawn_record(), &params(0.0)), record);

        let fresh = ParticleRecord::new(Vec3::new(0.4, -0.1, 0.2), 0.0);
        assert_eq!(stepper.step_record(fresh, spawn_record(), &params(0.0)), fresh);
    }

    #[test]
    fn live_particles_advect_and_age() {
        let stepper = SimulationStepper::new(&FlowConfig::default());
        let record = ParticleRecord::new(Vec3::ZERO, 5.0);
        let next = stepper.step_record(record, spawn_record(), &params(0.1));

        let expected = stepper.velocity(Vec3::ZERO, 2.0, 0.2) * 0.1;
        assert!((next.position() - expected).length() < 1e-6);
        assert!((next.lifetime - 4.9).abs() < 1e-6);
    }

    #[test]
    fn expired_particles_respawn_with_carried_overshoot() {
        let stepper = SimulationStepper::new(&FlowConfig::default());
        let record = ParticleRecord::new(Vec3::new(3.0, 0.0, 0.0), 0.05);
        let next = stepper.step_record(record, spawn_record(), &params(0.2));

        assert_eq!(next.position(), spawn_record().position());
        assert!((next.lifetime - (12.0 - 0.15)).abs() < 1e-5);
    }

    #[test]
    fn step_flips_the_double_buffer() {
        let config = FlowConfig {
            quality: vec![QualityLevelConfig::new(4, 4, 0.1, 0.5)],
            render: drift_core::RenderConfig {
                slices: 4,
                ..Default::default()
            },
            ..FlowConfig::default()
        };
        let ladder = QualityLadder::from_config(&config).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let tables = FlowTables::build(&ladder, &config.simulation, &mut rng).unwrap();
        let seed = bootstrap_grid(&tables.spawn[0], config.simulation.base_lifetime, &mut rng);
        let resolution = Resolution::new(4, 4).unwrap();
        let mut state = DoubleBuffer::new(seed.clone(), ParticleGrid::allocate(resolution));

        let stepper = SimulationStepper::new(&config);
        stepper.step(&mut state, &tables.spawn[0], &params(0.0));

        assert_eq!(state.current_index(), 1);
        assert_eq!(state.current().records(), seed.records());
    }

    #[test]
    fn one_second_stays_within_noise_bound() {
        // 256x256 particles for one simulated second at 60 Hz
        let config = FlowConfig {
            quality: vec![drift_core::DEFAULT_QUALITY_LADDER[0]],
            ..FlowConfig::default()
        };
        let ladder = QualityLadder::from_config(&config).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let tables = FlowTables::build(&ladder, &config.simulation, &mut rng).unwrap();
        let spawn = &tables.spawn[0];
        let seed = bootstrap_grid(spawn, config.simulation.base_lifetime, &mut rng);
        let resolution = seed.resolution();
        let mut state = DoubleBuffer::new(seed, ParticleGrid::allocate(resolution));

        let stepper = SimulationStepper::new(&config);
        let persistence = config.controls.initial_persistence;
        let dt = 1.0 / 60.0;
        for frame in 0..60 {
            let params = StepParams {
                delta_time: dt,
                time: frame as f32 * dt,
                persistence,
            };
            stepper.step(&mut state, spawn, &params);
        }

        let bound = config.simulation.spawn_radius
            + Vec3::from_array(config.simulation.base_velocity).length()
            + stepper.field().speed_bound(persistence);
        for record in state.current().records() {
            assert!(record.is_finite());
            assert!(record.position().length() <= bound);
        }
    }
}
