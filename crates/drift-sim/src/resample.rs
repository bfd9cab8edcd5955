//! Bootstrap and resample kernels for quality transitions

use crate::grid::{ParticleGrid, ParticleRecord, Resolution};
use crate::stepper::dispatch;
use crate::tables::{OffsetTable, SpawnTable};
use rand::Rng;

/// Fresh state for a level: spawn positions with lifetimes spread over
/// `[0, base_lifetime)` so respawns are staggered from the first frame.
pub fn bootstrap_grid<R: Rng + ?Sized>(
    spawn: &SpawnTable,
    base_lifetime: f32,
    rng: &mut R,
) -> ParticleGrid {
    let mut grid = ParticleGrid::allocate(spawn.resolution());
    for (record, source) in grid.records_mut().iter_mut().zip(spawn.grid().records()) {
        *record = ParticleRecord {
            position: source.position,
            lifetime: rng.gen::<f32>() * base_lifetime,
        };
    }
    grid
}

/// Scale applied to de-duplication offsets.
///
/// Upsampling duplicates old particles, so the copies are pushed apart by up
/// to one old splat diameter. Downsampling drops particles and needs none.
pub fn offset_scale(old_count: u32, new_count: u32, old_diameter: f32) -> f32 {
    if new_count > old_count {
        old_diameter
    } else {
        0.0
    }
}

/// One output cell of a resample pass
pub fn resample_record(
    old: &ParticleGrid,
    offsets: &OffsetTable,
    new_resolution: Resolution,
    index: u32,
    offset_scale: f32,
) -> ParticleRecord {
    let (x, y) = new_resolution.coord(index);
    let (u, v) = new_resolution.cell_center(x, y);
    let source = old.sample(u, v);
    let offset = offsets.sample(u, v) * offset_scale;
    ParticleRecord::new(source.position() + offset, source.lifetime)
}

/// Map the old state onto a grid of `new_resolution`
pub fn resample_grid(
    old: &ParticleGrid,
    offsets: &OffsetTable,
    new_resolution: Resolution,
    offset_scale: f32,
) -> ParticleGrid {
    let mut grid = ParticleGrid::allocate(new_resolution);
    dispatch(&mut grid, |index| {
        resample_record(old, offsets, new_resolution, index, offset_scale)
    });
    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::QualityLadder;
    use crate::tables::FlowTables;
    use drift_core::{FlowConfig, QualityLevelConfig, RenderConfig};
    use glam::Vec3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup() -> (FlowConfig, QualityLadder, FlowTables) {
        let config = FlowConfig {
            quality: vec![
                QualityLevelConfig::new(8, 8, 0.1, 0.5),
                QualityLevelConfig::new(16, 8, 0.08, 0.4),
                QualityLevelConfig::new(16, 16, 0.05, 0.3),
            ],
            render: RenderConfig {
                slices: 8,
                ..RenderConfig::default()
            },
            ..FlowConfig::default()
        };
        let ladder = QualityLadder::from_config(&config).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let tables = FlowTables::build(&ladder, &config.simulation, &mut rng).unwrap();
        (config, ladder, tables)
    }

    #[test]
    fn bootstrap_seeds_spawn_positions() {
        let (config, _, tables) = setup();
        let mut rng = StdRng::seed_from_u64(2);
        let grid = bootstrap_grid(&tables.spawn[1], config.simulation.base_lifetime, &mut rng);

        assert_eq!(grid.len(), 128);
        for (record, spawn) in grid.records().iter().zip(tables.spawn[1].grid().records()) {
            assert_eq!(record.position, spawn.position);
            assert!((0.0..config.simulation.base_lifetime).contains(&record.lifetime));
        }
    }

    #[test]
    fn offsets_only_when_upsampling() {
        assert_eq!(offset_scale(64, 128, 0.1), 0.1);
        assert_eq!(offset_scale(128, 64, 0.1), 0.0);
        assert_eq!(offset_scale(64, 64, 0.1), 0.0);
    }

    #[test]
    fn upsample_copies_nearest_and_offsets_within_diameter() {
        let (config, ladder, tables) = setup();
        let mut rng = StdRng::seed_from_u64(4);
        let old = bootstrap_grid(&tables.spawn[0], config.simulation.base_lifetime, &mut rng);
        let old_level = ladder.get(0).unwrap();
        let new_level = ladder.get(2).unwrap();

        let scale = offset_scale(
            old_level.particle_count(),
            new_level.particle_count(),
            old_level.diameter,
        );
        let new = resample_grid(&old, &tables.offsets, new_level.resolution, scale);
        assert_eq!(new.len(), 256);

        let max_offset = config.simulation.offset_radius * old_level.diameter + 1e-5;
        let res = new_level.resolution;
        for index in 0..res.count() {
            let (x, y) = res.coord(index);
            // 16x16 -> 8x8 nearest is an exact 2x2 block
            let source = old.get(old.resolution().index(x / 2, y / 2));
            let record = new.get(index);
            assert_eq!(record.lifetime, source.lifetime);
            assert!((record.position() - source.position()).length() <= max_offset);
        }
    }

    #[test]
    fn downsample_is_a_pure_subset() {
        let (config, ladder, tables) = setup();
        let mut rng = StdRng::seed_from_u64(8);
        let old = bootstrap_grid(&tables.spawn[2], config.simulation.base_lifetime, &mut rng);
        let new_level = ladder.get(0).unwrap();

        let scale = offset_scale(256, 64, ladder.get(2).unwrap().diameter);
        let new = resample_grid(&old, &tables.offsets, new_level.resolution, scale);

        for record in new.records() {
            assert!(old.records().contains(record));
        }
    }

    #[test]
    fn non_square_ratio_uses_normalized_coordinates() {
        let (_, ladder, tables) = setup();
        let res = ladder.get(1).unwrap().resolution; // 16x8
        let records = (0..res.count())
            .map(|i| ParticleRecord::new(Vec3::splat(i as f32), i as f32))
            .collect();
        let old = ParticleGrid::from_records(res, records).unwrap();

        let target = ladder.get(2).unwrap().resolution; // 16x16
        let new = resample_grid(&old, &tables.offsets, target, 0.0);
        for index in 0..target.count() {
            let (x, y) = target.coord(index);
            let expected = res.index(x, y / 2);
            assert_eq!(new.get(index).lifetime, expected as f32);
        }
    }
}
