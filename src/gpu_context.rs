//! Shared GPU context
//!
//! Owns the wgpu device and queue plus the per-frame state shared by the
//! upload backend, the renderer and the swapchain: the command encoder
//! collecting this frame's work and the transfer buffers that must be
//! mapped again once that work is submitted.

use std::sync::Arc;

use parking_lot::Mutex;
use winit::window::Window;

use crate::gpu::GpuError;

// ═══════════════════════════════════════════════════════════════════════════════
// GPU CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Device-level resources, shared as `Arc<GpuContext>`
pub struct GpuContext {
    /// The wgpu instance
    pub instance: wgpu::Instance,
    /// The selected GPU adapter
    pub adapter: wgpu::Adapter,
    /// The GPU device for creating resources
    pub device: wgpu::Device,
    /// The command queue for submitting GPU work
    pub queue: wgpu::Queue,
    /// The preferred surface format
    pub surface_format: wgpu::TextureFormat,
    /// Whether R16Unorm planes (high bit depth video) can be sampled
    pub norm16_supported: bool,
    /// Work recorded for the frame being prepared
    pending: Mutex<Option<wgpu::CommandEncoder>>,
    /// Buffers unmapped for this frame, mapped again after submission
    remap: Mutex<Vec<Arc<crate::gpu::wgpu_backend::BufferInner>>>,
}

impl GpuContext {
    /// Create the device for the given window
    ///
    /// Returns the context and the surface created for adapter selection,
    /// which the caller keeps for presenting.
    pub async fn new(window: Arc<Window>) -> Result<(Self, wgpu::Surface<'static>), GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| GpuError::Device(format!("Failed to create surface: {}", e)))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| GpuError::Device("Failed to find suitable GPU adapter".to_string()))?;

        tracing::info!("Using GPU: {}", adapter.get_info().name);
        tracing::info!("Backend: {:?}", adapter.get_info().backend);

        let norm16_supported = adapter
            .features()
            .contains(wgpu::Features::TEXTURE_FORMAT_16BIT_NORM);
        let mut required_features = wgpu::Features::empty();
        if norm16_supported {
            required_features |= wgpu::Features::TEXTURE_FORMAT_16BIT_NORM;
            tracing::info!("16 bit normalized textures enabled (high bit depth video)");
        } else {
            tracing::warn!("16 bit normalized textures not available - high bit depth video will be converted");
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Immersive Vout Device"),
                    required_features,
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| GpuError::Device(format!("Failed to create device: {}", e)))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| GpuError::Device("Surface reports no formats".to_string()))?;

        tracing::info!("Surface format: {:?}", surface_format);

        Ok((
            Self {
                instance,
                adapter,
                device,
                queue,
                surface_format,
                norm16_supported,
                pending: Mutex::new(None),
                remap: Mutex::new(Vec::new()),
            },
            surface,
        ))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FRAME STATE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record into the current frame's command encoder
    pub fn with_encoder<T>(&self, f: impl FnOnce(&mut wgpu::CommandEncoder) -> T) -> T {
        let mut pending = self.pending.lock();
        let encoder = pending.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Vout Frame Encoder"),
                })
        });
        f(encoder)
    }

    /// Take the current frame's encoder, if anything was recorded
    pub fn take_encoder(&self) -> Option<wgpu::CommandEncoder> {
        self.pending.lock().take()
    }

    pub(crate) fn queue_remap(&self, buffer: Arc<crate::gpu::wgpu_backend::BufferInner>) {
        self.remap.lock().push(buffer);
    }

    pub(crate) fn take_remaps(&self) -> Vec<Arc<crate::gpu::wgpu_backend::BufferInner>> {
        std::mem::take(&mut *self.remap.lock())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
