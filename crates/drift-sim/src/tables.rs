//! Spawn and offset tables
//!
//! Both tables are generated once per session from the same pool of random
//! points inside the unit sphere. Spawn tables exist per quality level and
//! hold respawn positions plus full lifetimes. The offset table has the
//! resolution of the highest level and holds the small displacements used to
//! separate duplicated particles when upsampling.

use crate::grid::{ParticleGrid, ParticleRecord, Resolution};
use crate::quality::QualityLadder;
use drift_core::{Result, SimulationConfig};
use glam::Vec3;
use rand::Rng;
use std::f32::consts::TAU;

/// Uniform point inside the unit sphere
pub fn random_point_in_sphere<R: Rng + ?Sized>(rng: &mut R) -> Vec3 {
    let radius = rng.gen::<f32>().cbrt();
    let cos_theta = rng.gen_range(-1.0f32..=1.0);
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = rng.gen::<f32>() * TAU;
    Vec3::new(
        radius * sin_theta * phi.cos(),
        radius * sin_theta * phi.sin(),
        radius * cos_theta,
    )
}

/// Respawn source for one quality level
#[derive(Clone, Debug)]
pub struct SpawnTable {
    grid: ParticleGrid,
}

impl SpawnTable {
    pub fn grid(&self) -> &ParticleGrid {
        &self.grid
    }

    pub fn resolution(&self) -> Resolution {
        self.grid.resolution()
    }

    pub fn get(&self, index: u32) -> ParticleRecord {
        self.grid.get(index)
    }
}

/// De-duplication offsets at the highest level's resolution
#[derive(Clone, Debug)]
pub struct OffsetTable {
    resolution: Resolution,
    offsets: Vec<[f32; 4]>,
}

impl OffsetTable {
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Texel data (xyz offset, w unused)
    pub fn texels(&self) -> &[[f32; 4]] {
        &self.offsets
    }

    /// Point-sample the offset at a normalized coordinate
    pub fn sample(&self, u: f32, v: f32) -> Vec3 {
        let (x, y) = self.resolution.cell_at(u, v);
        let texel = self.offsets[self.resolution.index(x, y) as usize];
        Vec3::new(texel[0], texel[1], texel[2])
    }
}

/// All per-session tables
#[derive(Clone, Debug)]
pub struct FlowTables {
    pub spawn: Vec<SpawnTable>,
    pub offsets: OffsetTable,
}

impl FlowTables {
    pub fn build<R: Rng + ?Sized>(
        ladder: &QualityLadder,
        simulation: &SimulationConfig,
        rng: &mut R,
    ) -> Result<Self> {
        let max_resolution = ladder.highest().resolution;
        let max_count = max_resolution.count() as usize;

        // One shared pool: point j seeds spawn slot j at every level and offset slot j
        let points: Vec<Vec3> = (0..max_count).map(|_| random_point_in_sphere(rng)).collect();
        let lifetimes: Vec<f32> = (0..max_count)
            .map(|_| simulation.base_lifetime + rng.gen::<f32>() * simulation.max_additional_lifetime)
            .collect();

        let spawn = ladder
            .iter()
            .map(|level| {
                let count = level.particle_count() as usize;
                let records = points[..count]
                    .iter()
                    .zip(&lifetimes[..count])
                    .map(|(point, lifetime)| {
                        ParticleRecord::new(*point * simulation.spawn_radius, *lifetime)
                    })
                    .collect();
                Ok(SpawnTable {
                    grid: ParticleGrid::from_records(level.resolution, records)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let offsets = points
            .iter()
            .map(|point| {
                let offset = *point * simulation.offset_radius;
                [offset.x, offset.y, offset.z, 0.0]
            })
            .collect();

        tracing::debug!(
            levels = spawn.len(),
            offset_resolution = %max_resolution,
            "Built spawn and offset tables"
        );

        Ok(Self {
            spawn,
            offsets: OffsetTable {
                resolution: max_resolution,
                offsets,
            },
        })
    }

    pub fn spawn_table(&self, level: usize) -> Option<&SpawnTable> {
        self.spawn.get(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::{FlowConfig, QualityLevelConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> FlowConfig {
        FlowConfig {
            quality: vec![
                QualityLevelConfig::new(8, 8, 0.1, 0.5),
                QualityLevelConfig::new(16, 8, 0.08, 0.4),
                QualityLevelConfig::new(16, 16, 0.05, 0.3),
            ],
            ..FlowConfig::default()
        }
    }

    #[test]
    fn sphere_points_stay_inside_unit_ball() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10_000 {
            assert!(random_point_in_sphere(&mut rng).length() <= 1.0 + 1e-5);
        }
    }

    #[test]
    fn spawn_tables_respect_radius_and_lifetime() {
        let config = small_config();
        let ladder = QualityLadder::from_config(&config).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let tables = FlowTables::build(&ladder, &config.simulation, &mut rng).unwrap();

        let sim = &config.simulation;
        assert_eq!(tables.spawn.len(), 3);
        for (table, level) in tables.spawn.iter().zip(ladder.iter()) {
            assert_eq!(table.resolution(), level.resolution);
            for record in table.grid().records() {
                assert!(record.position().length() <= sim.spawn_radius + 1e-5);
                assert!(record.lifetime >= sim.base_lifetime);
                assert!(record.lifetime <= sim.base_lifetime + sim.max_additional_lifetime);
            }
        }
    }

    #[test]
    fn levels_share_the_point_pool() {
        let config = small_config();
        let ladder = QualityLadder::from_config(&config).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let tables = FlowTables::build(&ladder, &config.simulation, &mut rng).unwrap();

        let low = tables.spawn[0].grid().records();
        let high = tables.spawn[2].grid().records();
        assert_eq!(low, &high[..low.len()]);

        // Offsets are the same points scaled by the offset radius
        let scale = config.simulation.offset_radius / config.simulation.spawn_radius;
        for (record, texel) in high.iter().zip(tables.offsets.texels()) {
            let expected = record.position() * scale;
            assert!((Vec3::new(texel[0], texel[1], texel[2]) - expected).length() < 1e-4);
        }
        assert_eq!(tables.offsets.resolution(), ladder.highest().resolution);
    }
}
