//! Interactive windowed flow

use super::FlowArgs;
use anyhow::{Context, Result};
use drift_core::FlowConfig;
use drift_render::{GpuFlow, OrbitCamera, RenderContext};
use drift_sim::{FlowPipeline, FrameClock};
use std::sync::Arc;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

const HUE_STEP: f32 = 0.05;
const TIME_SCALE_STEP: f32 = 0.25;
const PERSISTENCE_STEP: f32 = 0.05;

pub struct RunArgs {
    pub flow: FlowArgs,
    pub width: u32,
    pub height: u32,
}

pub fn run(args: RunArgs) -> Result<()> {
    let config = args.flow.load()?;
    let pipeline = FlowPipeline::new(config.clone()).context("Failed to create flow pipeline")?;

    println!("Quality levels: {}", pipeline.ladder().len());
    println!("Controls: 1-6 quality, H hue, Up/Down speed, Left/Right turbulence, drag to orbit");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = FlowApp::new(config, pipeline, PhysicalSize::new(args.width, args.height));
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// GPU state that only exists once the window does
struct Surface {
    window: Arc<Window>,
    context: RenderContext,
    flow: GpuFlow,
}

struct FlowApp {
    config: FlowConfig,
    pipeline: FlowPipeline,
    camera: OrbitCamera,
    clock: FrameClock,
    initial_size: PhysicalSize<u32>,
    surface: Option<Surface>,
    error: Option<anyhow::Error>,

    // Input state
    mouse_pressed: bool,
    last_mouse_pos: Option<(f64, f64)>,
}

impl FlowApp {
    fn new(config: FlowConfig, pipeline: FlowPipeline, initial_size: PhysicalSize<u32>) -> Self {
        Self {
            camera: OrbitCamera::new(&config.camera),
            config,
            pipeline,
            clock: FrameClock::new(),
            initial_size,
            surface: None,
            error: None,
            mouse_pressed: false,
            last_mouse_pos: None,
        }
    }

    fn initialize(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window_attrs = Window::default_attributes()
            .with_title("Drift")
            .with_inner_size(self.initial_size);

        let window = Arc::new(
            event_loop
                .create_window(window_attrs)
                .context("Failed to create window")?,
        );
        let context = pollster::block_on(RenderContext::new(window.clone()))
            .context("Failed to create render context")?;
        let flow = GpuFlow::new(
            &context.device,
            context.format(),
            &self.config,
            self.pipeline.tables(),
        )
        .context("Failed to create GPU flow")?;

        self.pipeline.set_aspect_ratio(context.aspect_ratio());
        self.surface = Some(Surface {
            window,
            context,
            flow,
        });
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        tracing::error!("{err:#}");
        self.error = Some(err);
        event_loop.exit();
    }

    fn render(&mut self) -> Result<()> {
        let elapsed = self.clock.tick();
        let Some(surface) = &mut self.surface else {
            return Ok(());
        };

        let output = match surface.context.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let size = surface.context.size;
                surface.context.resize(size);
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                tracing::warn!("Surface timeout, skipping frame");
                return Ok(());
            }
            Err(e) => return Err(anyhow::anyhow!("Surface error: {e}")),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let context = &surface.context;
        let mut frame = surface.flow.frame(&context.device, &context.queue, &view);
        let report = self.pipeline.tick(&mut frame, &self.camera, elapsed)?;
        frame.submit();
        output.present();

        if let Some(transition) = report.transition {
            tracing::info!(
                ?transition,
                particles = self.pipeline.particle_count(),
                "Quality level applied"
            );
        }
        Ok(())
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        let level = match key {
            KeyCode::Digit1 => Some(0),
            KeyCode::Digit2 => Some(1),
            KeyCode::Digit3 => Some(2),
            KeyCode::Digit4 => Some(3),
            KeyCode::Digit5 => Some(4),
            KeyCode::Digit6 => Some(5),
            _ => None,
        };
        if let Some(level) = level {
            if let Err(e) = self.pipeline.change_quality_level(level) {
                tracing::warn!("{e}");
            }
            return;
        }

        let state = self.pipeline.state();
        match key {
            KeyCode::Escape => event_loop.exit(),
            KeyCode::KeyH => {
                let hue = state.hue + HUE_STEP;
                self.pipeline.set_hue(hue);
            }
            KeyCode::ArrowUp => {
                let time_scale = state.time_scale + TIME_SCALE_STEP;
                self.pipeline.set_time_scale(time_scale);
            }
            KeyCode::ArrowDown => {
                let time_scale = state.time_scale - TIME_SCALE_STEP;
                self.pipeline.set_time_scale(time_scale);
            }
            KeyCode::ArrowRight => {
                let persistence = state.persistence + PERSISTENCE_STEP;
                self.pipeline.set_persistence(persistence);
            }
            KeyCode::ArrowLeft => {
                let persistence = state.persistence - PERSISTENCE_STEP;
                self.pipeline.set_persistence(persistence);
            }
            _ => return,
        }

        let state = self.pipeline.state();
        tracing::debug!(
            hue = state.hue,
            time_scale = state.time_scale,
            persistence = state.persistence,
            "Controls changed"
        );
    }
}

impl ApplicationHandler for FlowApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.surface.is_none() {
            if let Err(e) = self.initialize(event_loop) {
                self.fail(event_loop, e);
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                if let Some(surface) = &mut self.surface {
                    surface.context.resize(new_size);
                    self.pipeline.set_aspect_ratio(surface.context.aspect_ratio());
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed && !event.repeat {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        self.handle_key(event_loop, key);
                    }
                }
            }

            WindowEvent::MouseInput { state, button, .. } => {
                if button == MouseButton::Left {
                    self.mouse_pressed = state == ElementState::Pressed;
                }
            }

            WindowEvent::CursorMoved { position, .. } => {
                if let Some((last_x, last_y)) = self.last_mouse_pos {
                    if self.mouse_pressed {
                        let dx = (position.x - last_x) as f32;
                        let dy = (position.y - last_y) as f32;
                        self.camera.drag(dx, dy);
                    }
                }
                self.last_mouse_pos = Some((position.x, position.y));
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    self.fail(event_loop, e);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(surface) = &self.surface {
            surface.window.request_redraw();
        }
    }
}
