//! Light-space projection and the CPU opacity accumulation field

use drift_core::LightConfig;
use glam::{Mat4, Vec2, Vec3, Vec4Swizzles};

/// Orthographic shadow volume of the directional light
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LightProjection {
    pub direction: Vec3,
    pub view: Mat4,
    pub projection: Mat4,
}

impl LightProjection {
    pub fn new(config: &LightConfig) -> Self {
        let direction = Vec3::from_array(config.direction).normalize_or_zero();
        let view = Mat4::look_at_rh(Vec3::ZERO, direction, Vec3::from_array(config.up));
        let h = config.half_extent;
        let projection = Mat4::orthographic_rh(-h, h, -h, h, config.near, config.far);
        Self {
            direction,
            view,
            projection,
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Opacity texture coordinate of a world point; v grows downwards
    pub fn texture_coordinates(&self, world: Vec3) -> Vec2 {
        let clip = self.view_projection() * world.extend(1.0);
        let ndc = clip.xy() / clip.w;
        Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5)
    }
}

/// Half extent of a splat in NDC, found by projecting a billboard corner
/// placed at the particle's view-space depth.
pub fn projected_half_size(projection: Mat4, view_position: Vec3, diameter: f32) -> Vec2 {
    let radius = diameter * 0.5;
    let center = projection * view_position.extend(1.0);
    let corner = projection * (view_position + Vec3::new(radius, radius, 0.0)).extend(1.0);
    (corner.xy() / corner.w - center.xy() / center.w).abs()
}

/// Soft circular falloff. `distance` is measured from the splat centre in
/// units of the splat's full width, so the edge sits at 0.5.
pub fn splat_alpha(distance: f32, alpha: f32) -> f32 {
    (1.0 - 2.0 * distance).clamp(0.0, 1.0) * alpha
}

/// Running alpha composite of all particles as seen from the light
#[derive(Clone, Debug)]
pub struct OpacityField {
    resolution: u32,
    alpha: Vec<f32>,
}

impl OpacityField {
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution,
            alpha: vec![0.0; (resolution * resolution) as usize],
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn clear(&mut self) {
        self.alpha.fill(0.0);
    }

    pub fn texels(&self) -> &[f32] {
        &self.alpha
    }

    /// Point-sample at a texture coordinate. Outside the light frustum there is no opacity.
    pub fn sample(&self, uv: Vec2) -> f32 {
        if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) {
            return 0.0;
        }
        let max = self.resolution as i64 - 1;
        let x = ((uv.x * self.resolution as f32) as i64).clamp(0, max) as usize;
        let y = ((uv.y * self.resolution as f32) as i64).clamp(0, max) as usize;
        self.alpha[y * self.resolution as usize + x]
    }

    /// Composite one splat over the field (`ONE, ONE_MINUS_SRC_ALPHA` on alpha).
    ///
    /// Only texels whose centres fall inside the splat's square are touched,
    /// matching how a rasterizer covers a quad.
    pub fn splat(&mut self, center: Vec2, half_size: Vec2, alpha: f32) {
        if half_size.x <= 0.0 || half_size.y <= 0.0 {
            return;
        }
        let res = self.resolution as f32;
        let min = ((center - half_size) * res - 0.5).ceil().max(Vec2::ZERO);
        let max = ((center + half_size) * res - 0.5).floor().min(Vec2::splat(res - 1.0));
        if min.x > max.x || min.y > max.y {
            return;
        }

        for y in min.y as u32..=max.y as u32 {
            for x in min.x as u32..=max.x as u32 {
                let texel = Vec2::new(x as f32 + 0.5, y as f32 + 0.5) / res;
                let local = (texel - center) / (2.0 * half_size);
                let src = splat_alpha(local.length(), alpha);
                let dst = &mut self.alpha[(y * self.resolution + x) as usize];
                *dst = src + *dst * (1.0 - src);
            }
        }
    }

    /// Opacity accumulated in front of a world point
    pub fn opacity_at(&self, light: &LightProjection, world: Vec3) -> f32 {
        self.sample(light.texture_coordinates(world))
    }
}
