//! GPU collaborator interfaces
//!
//! The video output core never talks to a graphics API directly. It drives
//! these traits instead:
//! - `Gpu` - transfer buffers, plane uploads, clears and completion polling
//! - `Swapchain` - acquiring, submitting and presenting surface images
//! - `Renderer` - the opaque "render this image into that target" operation
//!
//! `wgpu_backend` and `renderer` provide the wgpu implementation.

pub mod renderer;
pub mod wgpu_backend;

#[cfg(test)]
pub(crate) mod mock;

pub use renderer::WgpuRenderer;
pub use wgpu_backend::{WgpuGpu, WgpuSwapchain, WgpuTarget, WgpuTransferBuffer};

use crate::settings::RenderParams;
use crate::video::colorspace::{ColorRepr, ColorSpace};
use crate::video::{Chroma, PlaneFormat, PlaneKind};

/// Errors reported by a GPU backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The device could not satisfy an allocation
    OutOfMemory(String),
    /// Host access to a buffer that is currently owned by the GPU
    NotMapped,
    /// Data does not satisfy the backend's copy alignment rules
    Unaligned(String),
    /// Plane description is inconsistent with its data
    InvalidPlane(String),
    /// Any other device-level failure
    Device(String),
}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuError::OutOfMemory(msg) => write!(f, "Out of GPU memory: {}", msg),
            GpuError::NotMapped => write!(f, "Buffer is not mapped for host access"),
            GpuError::Unaligned(msg) => write!(f, "Unaligned transfer: {}", msg),
            GpuError::InvalidPlane(msg) => write!(f, "Invalid plane: {}", msg),
            GpuError::Device(msg) => write!(f, "Device error: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {}

/// A GPU-visible, host-mapped memory region used for texture uploads
pub trait TransferBuffer: Send + Sync + 'static {
    /// Size in bytes
    fn size(&self) -> usize;

    /// Run `f` with host write access to the whole buffer
    ///
    /// Fails with [`GpuError::NotMapped`] while the GPU owns the buffer.
    fn with_mapped(&self, f: &mut dyn FnMut(&mut [u8])) -> Result<(), GpuError>;
}

/// Where a plane's bytes come from
pub enum PlaneSource<'a, B> {
    /// Zero-copy: bytes live in a mapped transfer buffer at `offset`
    Buffer { buffer: &'a B, offset: usize },
    /// Copy path: bytes live in host memory
    Host(&'a [u8]),
}

/// Everything needed to upload one plane
pub struct PlaneData<'a, B> {
    pub index: usize,
    pub kind: PlaneKind,
    pub format: PlaneFormat,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Bytes per line in the source
    pub pitch: usize,
    pub source: PlaneSource<'a, B>,
}

impl<B> PlaneData<'_, B> {
    /// Bytes covered by this plane in its source
    pub fn byte_len(&self) -> usize {
        self.pitch * self.height as usize
    }
}

/// Integer rectangle, `x1`/`y1` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl Rect {
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> i32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> i32 {
        self.y1 - self.y0
    }

    /// Intersection with `other`, `None` when empty
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::new(
            self.x0.max(other.x0),
            self.y0.max(other.y0),
            self.x1.min(other.x1),
            self.y1.min(other.y1),
        );
        (r.width() > 0 && r.height() > 0).then_some(r)
    }
}

/// One uploaded plane as seen by the renderer
pub struct Plane<'a, T> {
    pub texture: &'a T,
    pub kind: PlaneKind,
    pub format: PlaneFormat,
    /// Sub-texel offset of this plane relative to luma, in plane texels
    pub shift_x: f32,
    pub shift_y: f32,
}

/// A fully uploaded picture ready for rendering
pub struct Image<'a, T> {
    /// Monotonic per-display frame counter
    pub signature: u64,
    pub chroma: Chroma,
    pub width: u32,
    pub height: u32,
    /// Visible source rectangle in luma pixels
    pub src_rect: Rect,
    pub color: ColorSpace,
    pub repr: ColorRepr,
    pub planes: Vec<Plane<'a, T>>,
}

/// A subpicture region drawn on top of the video
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    /// Destination in target pixels
    pub rect: Rect,
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8, premultiplied alpha
    pub rgba: Vec<u8>,
}

/// Where and how to draw a frame
pub struct RenderTarget<'a, F> {
    pub fbo: &'a F,
    /// Full target extent
    pub width: u32,
    pub height: u32,
    /// Where the picture lands inside the target
    pub dst_rect: Rect,
    pub overlays: &'a [Overlay],
}

/// A presentable image handed out by the swapchain
pub struct SwapchainFrame<F> {
    pub fbo: F,
    pub width: u32,
    pub height: u32,
}

/// Device-side operations the upload and present loop depend on
pub trait Gpu {
    type Buffer: TransferBuffer;
    type Texture;
    type Fbo;

    /// Required pitch alignment for zero-copy uploads from transfer buffers
    fn pitch_alignment(&self) -> usize {
        1
    }

    /// Whether pictures of `chroma` can be uploaded and rendered
    fn format_supported(&self, chroma: Chroma) -> bool;

    /// Allocate a host-mapped transfer buffer of `size` bytes
    fn create_transfer_buffer(&self, size: usize) -> Result<Self::Buffer, GpuError>;

    /// Zero-timeout completion query, `true` while the GPU still uses `buffer`
    fn poll_buffer(&self, buffer: &Self::Buffer) -> bool;

    /// Upload a plane into `texture`, (re)creating it when needed
    fn upload_plane(
        &self,
        texture: &mut Option<Self::Texture>,
        data: &PlaneData<'_, Self::Buffer>,
    ) -> Result<(), GpuError>;

    /// Fill the whole target with `rgba`
    fn clear(&self, fbo: &Self::Fbo, rgba: [f32; 4]);
}

/// Presentation surface
pub trait Swapchain<G: Gpu> {
    /// Acquire the next image, `None` when nothing is ready (not an error)
    fn start_frame(&mut self) -> Option<SwapchainFrame<G::Fbo>>;

    /// Submit all work recorded for the current image
    fn submit_frame(&mut self) -> bool;

    /// Present the last submitted image
    fn swap_buffers(&mut self);

    /// Adapt to a new surface size
    fn resize(&mut self, _width: u32, _height: u32) {}
}

/// The external rendering engine
pub trait Renderer<G: Gpu> {
    /// Render `image` into `target`, returning `false` on failure
    fn render(
        &mut self,
        gpu: &G,
        image: &Image<'_, G::Texture>,
        target: &RenderTarget<'_, G::Fbo>,
        params: &RenderParams,
    ) -> bool;
}
