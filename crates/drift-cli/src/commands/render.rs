//! Headless flow-to-PNG render command

use super::FlowArgs;
use anyhow::{Context, Result};
use drift_render::{GpuFlow, HeadlessContext, OrbitCamera};
use drift_sim::FlowPipeline;

pub struct RenderArgs {
    pub flow: FlowArgs,
    pub output: String,
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub frame_time: f32,
    pub azimuth: Option<f32>,
    pub elevation: Option<f32>,
}

pub fn run(args: RenderArgs) -> Result<()> {
    let config = args.flow.load()?;

    let ctx = pollster::block_on(HeadlessContext::new(args.width, args.height))
        .context("Failed to create headless render context")?;

    let mut pipeline = FlowPipeline::new(config.clone()).context("Failed to create flow pipeline")?;
    pipeline.set_aspect_ratio(ctx.aspect_ratio());

    let mut camera = OrbitCamera::new(&config.camera);
    camera.set_angles(
        args.azimuth.map(f32::to_radians).unwrap_or(camera.azimuth),
        args.elevation.map(f32::to_radians).unwrap_or(camera.elevation),
    );

    let mut flow = GpuFlow::new(&ctx.device, ctx.format, &config, pipeline.tables())
        .context("Failed to create GPU flow")?;

    // At least one frame so the state is bootstrapped before capture
    for _ in 0..args.frames.max(1) {
        let mut frame = flow.frame(&ctx.device, &ctx.queue, &ctx.color_view);
        pipeline
            .tick(&mut frame, &camera, args.frame_time)
            .context("Frame failed")?;
        frame.submit();
    }

    let particles = flow
        .read_particles(&ctx.device, &ctx.queue)
        .context("Failed to read particle state")?;
    let non_finite = particles.iter().filter(|p| !p.is_finite()).count();
    if non_finite > 0 {
        tracing::warn!(non_finite, "Particle state contains non-finite records");
    }

    let pixels = ctx.read_pixels().context("Failed to read rendered pixels")?;
    let img = image::RgbaImage::from_raw(args.width, args.height, pixels)
        .context("Failed to create image from pixel data")?;
    img.save(&args.output)
        .with_context(|| format!("Failed to save image to {}", args.output))?;

    println!(
        "Rendered {}x{} image of {} particles after {} frames to {}",
        args.width,
        args.height,
        particles.len(),
        args.frames.max(1),
        args.output
    );

    Ok(())
}
