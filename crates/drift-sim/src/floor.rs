//! Host evaluation of the floor and background passes

use crate::opacity::{LightProjection, OpacityField};
use drift_core::RenderConfig;
use glam::{Vec2, Vec3};

/// Radial background shade at a normalized device coordinate
pub fn background_shade(ndc: Vec2, distance_scale: f32) -> f32 {
    1.0 - ndc.length() * distance_scale
}

/// Contact shadow sampled over a regular grid of floor cells.
///
/// Cells run along +x for the floor width and +z for its depth, starting at
/// the floor origin, like the floor quad the GPU draws.
#[derive(Clone, Debug)]
pub struct FloorShadow {
    resolution: u32,
    origin: Vec3,
    extent: Vec2,
    strength: f32,
    shadow: Vec<f32>,
}

impl FloorShadow {
    pub fn new(render: &RenderConfig, resolution: u32) -> Self {
        let resolution = resolution.max(1);
        Self {
            resolution,
            origin: Vec3::from_array(render.floor_origin),
            extent: Vec2::new(render.floor_width, render.floor_depth),
            strength: render.floor_shadow_strength,
            shadow: vec![0.0; (resolution * resolution) as usize],
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Shadow per cell, row-major with x fastest
    pub fn shadows(&self) -> &[f32] {
        &self.shadow
    }

    /// World position of a cell centre on the floor plane
    pub fn cell_center(&self, x: u32, z: u32) -> Vec3 {
        let cell = (Vec2::new(x as f32, z as f32) + 0.5) / self.resolution as f32 * self.extent;
        self.origin + Vec3::new(cell.x, 0.0, cell.y)
    }

    /// Cell centres paired with their shadow
    pub fn cells(&self) -> impl Iterator<Item = (Vec3, f32)> + '_ {
        let res = self.resolution;
        (0..res * res).map(move |i| (self.cell_center(i % res, i / res), self.shadow[i as usize]))
    }

    /// Darken every cell by the opacity in front of it. Cells outside the
    /// light frustum sample no opacity and stay lit.
    pub fn shade(&mut self, opacity: &OpacityField, light: &LightProjection) {
        let res = self.resolution;
        for i in 0..res * res {
            let world = self.cell_center(i % res, i / res);
            self.shadow[i as usize] = opacity.opacity_at(light, world) * self.strength;
        }
    }
}

/// Background gradient over a square grid of NDC samples
#[derive(Clone, Debug)]
pub struct BackgroundGradient {
    resolution: u32,
    distance_scale: f32,
    shade: Vec<f32>,
}

impl BackgroundGradient {
    pub fn new(render: &RenderConfig, resolution: u32) -> Self {
        let resolution = resolution.max(1);
        Self {
            resolution,
            distance_scale: render.background_distance_scale,
            shade: vec![0.0; (resolution * resolution) as usize],
        }
    }

    pub fn shades(&self) -> &[f32] {
        &self.shade
    }

    pub fn fill(&mut self) {
        let res = self.resolution as f32;
        for (i, value) in self.shade.iter_mut().enumerate() {
            let pixel = Vec2::new((i as u32 % self.resolution) as f32, (i as u32 / self.resolution) as f32);
            let ndc = (pixel + 0.5) / res * 2.0 - 1.0;
            *value = background_shade(ndc, self.distance_scale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_span_the_floor_from_its_origin() {
        let render = RenderConfig {
            floor_origin: [-2.0, -0.75, -5.0],
            floor_width: 4.0,
            floor_depth: 8.0,
            ..RenderConfig::default()
        };
        let floor = FloorShadow::new(&render, 4);
        assert_eq!(floor.cell_center(0, 0), Vec3::new(-1.5, -0.75, -4.0));
        assert_eq!(floor.cell_center(3, 3), Vec3::new(1.5, -0.75, 4.0));
        assert_eq!(floor.cells().count(), 16);
    }

    #[test]
    fn background_falls_off_with_distance_from_centre() {
        assert_eq!(background_shade(Vec2::ZERO, 0.1), 1.0);
        assert!((background_shade(Vec2::new(1.0, 1.0), 0.1) - (1.0 - 2f32.sqrt() * 0.1)).abs() < 1e-6);

        let mut gradient = BackgroundGradient::new(&RenderConfig::default(), 8);
        gradient.fill();
        let shades = gradient.shades();
        let centre = shades[4 * 8 + 4];
        let corner = shades[0];
        assert!(centre > corner);
        assert!(shades.iter().all(|&s| s <= 1.0 && s > 0.8));
    }
}
