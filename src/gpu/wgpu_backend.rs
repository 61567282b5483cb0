//! wgpu implementation of the GPU collaborators
//!
//! Transfer buffers are `MAP_WRITE | COPY_SRC` buffers created mapped. A
//! buffer moves through three states:
//! - `Mapped` - the host may write, the GPU does not touch it
//! - `Unmapped` - a copy out of it has been recorded for the current frame
//! - `Remapping` - the frame was submitted and `map_async` is pending
//! - `Failed` - `map_async` reported an error, retried on the next poll
//!
//! The completion poll is simply "not `Mapped` yet", which is exactly when
//! the pool may hand the slot out again.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::gpu::{Gpu, GpuError, PlaneData, PlaneSource, Swapchain, SwapchainFrame, TransferBuffer};
use crate::gpu_context::GpuContext;
use crate::video::{Chroma, PlaneFormat};

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSFER BUFFERS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapState {
    Mapped,
    Unmapped,
    Remapping,
    Failed,
}

impl MapState {
    /// State reached when a pending `map_async` completes
    fn after_map(ok: bool) -> Self {
        if ok {
            MapState::Mapped
        } else {
            MapState::Failed
        }
    }

    /// State to restart from when the buffer is polled
    fn retried(self) -> Self {
        match self {
            MapState::Failed => MapState::Unmapped,
            other => other,
        }
    }
}

pub(crate) struct BufferInner {
    buffer: wgpu::Buffer,
    size: usize,
    state: Mutex<MapState>,
}

impl BufferInner {
    /// Start mapping the buffer again after the frame using it was submitted
    fn remap(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != MapState::Unmapped {
                return;
            }
            *state = MapState::Remapping;
        }

        let weak: Weak<BufferInner> = Arc::downgrade(self);
        self.buffer
            .slice(..)
            .map_async(wgpu::MapMode::Write, move |result| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = &result {
                    tracing::warn!("Transfer buffer remap failed, retrying on next poll: {}", e);
                }
                *inner.state.lock() = MapState::after_map(result.is_ok());
            });
    }

    /// Restart mapping after a failed `map_async`
    fn retry_failed(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != MapState::Failed {
                return;
            }
            *state = state.retried();
        }
        self.remap();
    }
}

/// A host-mapped upload buffer backing one picture slot
pub struct WgpuTransferBuffer {
    inner: Arc<BufferInner>,
}

impl WgpuTransferBuffer {
    /// Whether the host currently owns the buffer
    pub fn is_mapped(&self) -> bool {
        *self.inner.state.lock() == MapState::Mapped
    }
}

impl TransferBuffer for WgpuTransferBuffer {
    fn size(&self) -> usize {
        self.inner.size
    }

    fn with_mapped(&self, f: &mut dyn FnMut(&mut [u8])) -> Result<(), GpuError> {
        // Held for the whole write so the uploader cannot unmap underneath us
        let state = self.inner.state.lock();
        if *state != MapState::Mapped {
            return Err(GpuError::NotMapped);
        }
        let mut view = self.inner.buffer.slice(..).get_mapped_range_mut();
        f(&mut view[..]);
        drop(view);
        drop(state);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEXTURES AND TARGETS
// ═══════════════════════════════════════════════════════════════════════════════

/// Texture format used for a plane
pub fn texture_format(format: PlaneFormat) -> wgpu::TextureFormat {
    match format {
        PlaneFormat::R8 => wgpu::TextureFormat::R8Unorm,
        PlaneFormat::R16 => wgpu::TextureFormat::R16Unorm,
        PlaneFormat::Rg8 => wgpu::TextureFormat::Rg8Unorm,
        PlaneFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        PlaneFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
    }
}

/// A sampled texture holding one uploaded plane
pub struct WgpuPlaneTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: PlaneFormat,
}

/// A render target, usually the current surface image
pub struct WgpuTarget {
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
}

// ═══════════════════════════════════════════════════════════════════════════════
// GPU
// ═══════════════════════════════════════════════════════════════════════════════

/// Upload and clear operations on the shared device
pub struct WgpuGpu {
    ctx: Arc<GpuContext>,
}

impl WgpuGpu {
    pub fn new(ctx: Arc<GpuContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    /// Block until a remapping buffer is host-owned again
    fn wait_mapped(&self, inner: &BufferInner) -> Result<(), GpuError> {
        loop {
            match *inner.state.lock() {
                MapState::Mapped => return Ok(()),
                MapState::Unmapped | MapState::Failed => {
                    return Err(GpuError::Device("Transfer buffer failed to remap".to_string()))
                }
                MapState::Remapping => {}
            }
            let _ = self.ctx.device.poll(wgpu::Maintain::Wait);
        }
    }

    /// Give the mapped buffer to the GPU for this frame
    fn release_to_gpu(&self, buffer: &WgpuTransferBuffer) -> Result<(), GpuError> {
        let inner = &buffer.inner;
        let current = *inner.state.lock();
        if current == MapState::Remapping {
            tracing::debug!("Uploading from a buffer still being remapped, waiting");
            self.wait_mapped(inner)?;
        }

        let mut state = inner.state.lock();
        if *state == MapState::Mapped {
            inner.buffer.unmap();
            *state = MapState::Unmapped;
            self.ctx.queue_remap(Arc::clone(inner));
        }
        Ok(())
    }

    fn ensure_texture(&self, texture: &mut Option<WgpuPlaneTexture>, data: &PlaneData<'_, WgpuTransferBuffer>) {
        let reusable = texture
            .as_ref()
            .is_some_and(|t| t.width == data.width && t.height == data.height && t.format == data.format);
        if reusable {
            return;
        }

        tracing::debug!(
            plane = data.index,
            width = data.width,
            height = data.height,
            "Creating plane texture"
        );
        let tex = self.ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Vout Plane Texture"),
            size: wgpu::Extent3d {
                width: data.width,
                height: data.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(data.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = tex.create_view(&wgpu::TextureViewDescriptor::default());
        *texture = Some(WgpuPlaneTexture {
            texture: tex,
            view,
            width: data.width,
            height: data.height,
            format: data.format,
        });
    }
}

impl Gpu for WgpuGpu {
    type Buffer = WgpuTransferBuffer;
    type Texture = WgpuPlaneTexture;
    type Fbo = WgpuTarget;

    fn pitch_alignment(&self) -> usize {
        wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize
    }

    fn format_supported(&self, chroma: Chroma) -> bool {
        chroma
            .description()
            .planes
            .iter()
            .all(|p| p.format != PlaneFormat::R16 || self.ctx.norm16_supported)
    }

    fn create_transfer_buffer(&self, size: usize) -> Result<Self::Buffer, GpuError> {
        let aligned = size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize);
        if aligned as u64 > self.ctx.device.limits().max_buffer_size {
            return Err(GpuError::OutOfMemory(format!(
                "{} bytes exceeds the device buffer limit",
                aligned
            )));
        }

        self.ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Vout Transfer Buffer"),
            size: aligned as u64,
            usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: true,
        });
        if let Some(err) = pollster::block_on(self.ctx.device.pop_error_scope()) {
            return Err(GpuError::OutOfMemory(err.to_string()));
        }

        Ok(WgpuTransferBuffer {
            inner: Arc::new(BufferInner {
                buffer,
                size: aligned,
                state: Mutex::new(MapState::Mapped),
            }),
        })
    }

    fn poll_buffer(&self, buffer: &Self::Buffer) -> bool {
        buffer.inner.retry_failed();
        let _ = self.ctx.device.poll(wgpu::Maintain::Poll);
        !buffer.is_mapped()
    }

    fn upload_plane(
        &self,
        texture: &mut Option<Self::Texture>,
        data: &PlaneData<'_, Self::Buffer>,
    ) -> Result<(), GpuError> {
        if data.width == 0 || data.height == 0 {
            return Err(GpuError::InvalidPlane(format!("plane {} is empty", data.index)));
        }
        let row_bytes = data.width as usize * data.format.bytes_per_texel();
        if data.pitch < row_bytes {
            return Err(GpuError::InvalidPlane(format!(
                "plane {} pitch {} below row size {}",
                data.index, data.pitch, row_bytes
            )));
        }

        self.ensure_texture(texture, data);
        let Some(tex) = texture.as_ref() else {
            return Err(GpuError::Device("plane texture missing".to_string()));
        };

        let extent = wgpu::Extent3d {
            width: data.width,
            height: data.height,
            depth_or_array_layers: 1,
        };
        let layout = |offset: u64| wgpu::TexelCopyBufferLayout {
            offset,
            bytes_per_row: Some(data.pitch as u32),
            rows_per_image: Some(data.height),
        };
        let destination = wgpu::TexelCopyTextureInfo {
            texture: &tex.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        };

        match &data.source {
            PlaneSource::Buffer { buffer, offset } => {
                if data.pitch % self.pitch_alignment() != 0 {
                    return Err(GpuError::Unaligned(format!(
                        "plane {} pitch {} is not a multiple of {}",
                        data.index,
                        data.pitch,
                        self.pitch_alignment()
                    )));
                }
                if offset + data.byte_len() > buffer.size() {
                    return Err(GpuError::InvalidPlane(format!(
                        "plane {} overruns its transfer buffer",
                        data.index
                    )));
                }
                self.release_to_gpu(buffer)?;
                self.ctx.with_encoder(|encoder| {
                    encoder.copy_buffer_to_texture(
                        wgpu::TexelCopyBufferInfo {
                            buffer: &buffer.inner.buffer,
                            layout: layout(*offset as u64),
                        },
                        destination,
                        extent,
                    );
                });
            }
            PlaneSource::Host(bytes) => {
                if bytes.len() < data.byte_len() {
                    return Err(GpuError::InvalidPlane(format!(
                        "plane {} has {} bytes, needs {}",
                        data.index,
                        bytes.len(),
                        data.byte_len()
                    )));
                }
                self.ctx.queue.write_texture(destination, bytes, layout(0), extent);
            }
        }
        Ok(())
    }

    fn clear(&self, fbo: &Self::Fbo, rgba: [f32; 4]) {
        self.ctx.with_encoder(|encoder| {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Vout Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &fbo.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: rgba[0] as f64,
                            g: rgba[1] as f64,
                            b: rgba[2] as f64,
                            a: rgba[3] as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        });
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SWAPCHAIN
// ═══════════════════════════════════════════════════════════════════════════════

/// Window surface presentation
pub struct WgpuSwapchain {
    ctx: Arc<GpuContext>,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    current: Option<wgpu::SurfaceTexture>,
}

impl WgpuSwapchain {
    /// Configure `surface` for presenting at `width`x`height`
    pub fn new(ctx: Arc<GpuContext>, surface: wgpu::Surface<'static>, width: u32, height: u32, vsync: bool) -> Self {
        let surface_caps = surface.get_capabilities(&ctx.adapter);

        let present_mode = if vsync {
            wgpu::PresentMode::Fifo
        } else if surface_caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
            wgpu::PresentMode::Mailbox
        } else if surface_caps.present_modes.contains(&wgpu::PresentMode::Immediate) {
            wgpu::PresentMode::Immediate
        } else {
            wgpu::PresentMode::Fifo
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: ctx.surface_format,
            width: width.max(1),
            height: height.max(1),
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&ctx.device, &config);
        tracing::info!(width = config.width, height = config.height, ?present_mode, "Swapchain configured");

        Self {
            ctx,
            surface,
            config,
            current: None,
        }
    }

    /// Current surface size
    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    fn acquire(&mut self) -> Option<wgpu::SurfaceTexture> {
        match self.surface.get_current_texture() {
            Ok(tex) => Some(tex),
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                tracing::warn!("Surface lost, reconfiguring...");
                self.surface.configure(&self.ctx.device, &self.config);
                self.surface.get_current_texture().ok()
            }
            Err(wgpu::SurfaceError::Timeout) => {
                tracing::trace!("Surface image not ready");
                None
            }
            Err(e) => {
                tracing::warn!("Surface error: {:?}", e);
                None
            }
        }
    }
}

impl Swapchain<WgpuGpu> for WgpuSwapchain {
    fn start_frame(&mut self) -> Option<SwapchainFrame<WgpuTarget>> {
        // An image acquired by a cycle that never presented is dropped unused
        self.current = None;

        let tex = self.acquire()?;
        let view = tex.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let (width, height) = (tex.texture.width(), tex.texture.height());
        let format = tex.texture.format();
        self.current = Some(tex);

        Some(SwapchainFrame {
            fbo: WgpuTarget {
                view,
                width,
                height,
                format,
            },
            width,
            height,
        })
    }

    fn submit_frame(&mut self) -> bool {
        let encoder = self.ctx.take_encoder().unwrap_or_else(|| {
            self.ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Vout Empty Encoder"),
                })
        });

        self.ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        let error = pollster::block_on(self.ctx.device.pop_error_scope());

        // Buffers go back to the host once this submission has executed
        for inner in self.ctx.take_remaps() {
            inner.remap();
        }

        match error {
            Some(e) => {
                tracing::error!("Frame submission failed: {}", e);
                false
            }
            None => true,
        }
    }

    fn swap_buffers(&mut self) {
        if let Some(tex) = self.current.take() {
            tex.present();
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.ctx.device, &self.config);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_texture_formats() {
        assert_eq!(texture_format(PlaneFormat::R8), wgpu::TextureFormat::R8Unorm);
        assert_eq!(texture_format(PlaneFormat::R16), wgpu::TextureFormat::R16Unorm);
        assert_eq!(texture_format(PlaneFormat::Rg8), wgpu::TextureFormat::Rg8Unorm);
        assert_eq!(texture_format(PlaneFormat::Bgra8), wgpu::TextureFormat::Bgra8Unorm);
    }

    #[test]
    fn test_texel_sizes_match_texture_formats() {
        for format in [
            PlaneFormat::R8,
            PlaneFormat::R16,
            PlaneFormat::Rg8,
            PlaneFormat::Rgba8,
            PlaneFormat::Bgra8,
        ] {
            assert_eq!(
                texture_format(format).block_copy_size(None),
                Some(format.bytes_per_texel() as u32)
            );
        }
    }

    #[test]
    fn test_failed_remap_is_retried() {
        assert_eq!(MapState::after_map(true), MapState::Mapped);
        let failed = MapState::after_map(false);
        assert_eq!(failed, MapState::Failed);

        // A failure must lead back into a new map request, not stay busy
        assert_eq!(failed.retried(), MapState::Unmapped);
        assert_eq!(MapState::Remapping.retried(), MapState::Remapping);
        assert_eq!(MapState::Mapped.retried(), MapState::Mapped);
    }
}
