//! Immersive Vout Library
//!
//! GPU video output core: decoded pictures are written straight into
//! host-mapped transfer buffers, uploaded to plane textures, rendered into
//! a swapchain image and presented. Transfer buffers are recycled once the
//! GPU is done reading them.

pub mod display;
pub mod error;
pub mod gpu;
pub mod gpu_context;
pub mod pool;
pub mod settings;
pub mod telemetry;
pub mod upload;
pub mod video;

pub use display::{ControlQuery, Display, DisplayConfig, HAlign, Placement, Subpicture, SubpictureRegion, VAlign};
pub use error::VoutError;
pub use gpu::{Gpu, GpuError, Renderer, Swapchain, TransferBuffer, WgpuGpu, WgpuRenderer, WgpuSwapchain};
pub use gpu_context::GpuContext;
pub use pool::{InFlightTracker, PicturePool, TransferPool};
pub use settings::{DisplaySettings, RenderParams};
pub use upload::FrameUploader;
pub use video::{Chroma, FrameRef, Picture, TestPattern, VideoFormat};
