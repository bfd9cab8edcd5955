//! Blocking GPU-to-host copies

use crate::context::RenderError;

/// Row layout of a texture copied into a buffer. wgpu requires each row of
/// a texture-to-buffer copy to start on a 256-byte boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct RowLayout {
    pub unpadded: u32,
    pub padded: u32,
    pub rows: u32,
}

impl RowLayout {
    pub fn new(width: u32, height: u32, bytes_per_texel: u32) -> Self {
        let unpadded = width * bytes_per_texel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        Self {
            unpadded,
            padded: unpadded.div_ceil(align) * align,
            rows: height,
        }
    }

    pub fn buffer_size(&self) -> u64 {
        self.padded as u64 * self.rows as u64
    }

    /// Drop the per-row padding
    pub fn strip(&self, data: &[u8]) -> Vec<u8> {
        if self.padded == self.unpadded {
            return data[..self.unpadded as usize * self.rows as usize].to_vec();
        }
        data.chunks(self.padded as usize)
            .take(self.rows as usize)
            .flat_map(|row| &row[..self.unpadded as usize])
            .copied()
            .collect()
    }
}

/// Create a buffer the size of `size` that a copy can land in and the host can map
pub(crate) fn staging_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    })
}

/// Submit `encoder`, wait for the device and return the staging buffer's bytes
pub(crate) fn submit_and_map(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    encoder: wgpu::CommandEncoder,
    staging: &wgpu::Buffer,
) -> Result<Vec<u8>, RenderError> {
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|e| RenderError::BufferReadFailed(e.to_string()))?
        .map_err(|e| RenderError::BufferReadFailed(e.to_string()))?;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}
