//! Video pictures, formats and color metadata
//!
//! Describes decoded pictures and how they are laid out in memory, and
//! translates their color tags into what the renderer consumes.

pub mod colorspace;
mod format;
mod frame;
mod pattern;

pub use format::{
    Chroma, ChromaDescription, ChromaLocation, ColorPrimaries, PictureLayout, PlaneDesc, PlaneFormat,
    PlaneGeometry, PlaneKind, TransferFunc, VideoFormat, YuvSpace, HOST_PITCH_ALIGN, MAX_PLANES,
};
pub use frame::{FrameRef, Picture, PictureSource, ReleaseHook};
pub use pattern::TestPattern;
