//! Offscreen flow rendering for image export

use crate::context::{create_instance, request_adapter, request_device, RenderError};
use crate::readback::{self, RowLayout};

/// Target format of offscreen frames. Flow colours are display-space values,
/// so the target stores them unencoded like the windowed surface does.
const HEADLESS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Device, queue and a colour target to render frames into without a window
pub struct HeadlessContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
    pub color_view: wgpu::TextureView,
    color_texture: wgpu::Texture,
}

impl HeadlessContext {
    pub async fn new(width: u32, height: u32) -> Result<Self, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::SurfaceError(format!(
                "offscreen target must not be empty, got {width}x{height}"
            )));
        }

        let instance = create_instance();
        let adapter = request_adapter(&instance, None).await?;
        let (device, queue) = request_device(&adapter, "Drift Headless Device").await?;

        let color_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Headless Flow Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HEADLESS_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let color_view = color_texture.create_view(&wgpu::TextureViewDescriptor::default());

        tracing::debug!(width, height, "Headless target created");

        Ok(Self {
            device,
            queue,
            format: HEADLESS_FORMAT,
            width,
            height,
            color_view,
            color_texture,
        })
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// Copy the target back as tightly packed RGBA8 rows, top row first.
    /// Waits for every previously submitted frame.
    pub fn read_pixels(&self) -> Result<Vec<u8>, RenderError> {
        let layout = RowLayout::new(self.width, self.height, 4);
        let staging = readback::staging_buffer(&self.device, "Flow Pixel Readback", layout.buffer_size());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Flow Pixel Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            self.color_texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(layout.padded),
                    rows_per_image: Some(layout.rows),
                },
            },
            self.color_texture.size(),
        );

        let data = readback::submit_and_map(&self.device, &self.queue, encoder, &staging)?;
        Ok(layout.strip(&data))
    }
}
