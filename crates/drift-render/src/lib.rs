//! Drift Render - wgpu backend for the particle flow
//!
//! Executes every pass a `FlowPipeline` tick asks for on the GPU:
//! - Compute: curl-noise simulation, sort steps, quality resampling
//! - Render: sliced viewer and light splats, floor shadows, background
//!
//! Windowed output goes through [`RenderContext`]; [`HeadlessContext`]
//! renders the same frames into an offscreen texture for image export.

mod backend;
mod camera;
mod context;
mod headless;
mod pipelines;
mod readback;
mod resources;
mod uniforms;

pub use backend::{GpuFlow, GpuFrame};
pub use camera::OrbitCamera;
pub use context::{RenderContext, RenderError};
pub use headless::HeadlessContext;
pub use pipelines::{workgroups, FlowPipelines, OPACITY_FORMAT, WORKGROUP_SIZE};
pub use resources::{floor_vertices, state_size};
pub use uniforms::{DrawUniforms, UNIFORM_ALIGNMENT};

#[cfg(test)]
mod tests {
    use naga::valid::{Capabilities, ValidationFlags, Validator};

    fn validate(source: &str) -> naga::Module {
        let module = naga::front::wgsl::parse_str(source).expect("WGSL should parse");
        Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .expect("WGSL should validate");
        module
    }

    fn entry_points(module: &naga::Module) -> Vec<&str> {
        module.entry_points.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn compute_shaders_are_valid() {
        let simulate = validate(include_str!("simulate_shader.wgsl"));
        assert_eq!(entry_points(&simulate), ["simulate"]);
        assert_eq!(simulate.entry_points[0].workgroup_size, [256, 1, 1]);

        let sort = validate(include_str!("sort_shader.wgsl"));
        assert_eq!(entry_points(&sort), ["sort"]);

        let resample = validate(include_str!("resample_shader.wgsl"));
        assert_eq!(entry_points(&resample), ["resample"]);
    }

    #[test]
    fn render_shaders_are_valid() {
        let particle = validate(include_str!("particle_shader.wgsl"));
        let names = entry_points(&particle);
        for name in ["vs_viewer", "fs_viewer", "vs_light", "fs_light"] {
            assert!(names.contains(&name), "missing {name}");
        }

        let floor = validate(include_str!("floor_shader.wgsl"));
        assert_eq!(entry_points(&floor), ["vs_floor", "fs_floor"]);

        let background = validate(include_str!("background_shader.wgsl"));
        assert_eq!(entry_points(&background), ["vs_background", "fs_background"]);
    }

    #[test]
    fn draw_uniform_layout_matches_shaders() {
        let module = validate(include_str!("particle_shader.wgsl"));
        let span = module
            .types
            .iter()
            .find(|(_, ty)| ty.name.as_deref() == Some("DrawUniforms"))
            .map(|(_, ty)| ty.inner.size(module.to_ctx()))
            .expect("DrawUniforms type");
        assert_eq!(span as usize, std::mem::size_of::<super::DrawUniforms>());
    }
}
