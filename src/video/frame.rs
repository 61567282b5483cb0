//! Decoded picture representation
//!
//! A `Picture` is what the decoder writes into and what the display uploads.
//! It is backed either by a pool slot (zero-copy transfer buffer or host
//! allocation) or by a standalone host buffer. Shared as [`FrameRef`].

use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::error::VoutError;
use crate::gpu::TransferBuffer;
use crate::pool::{Backing, Slot};

use super::format::{PictureLayout, VideoFormat};

/// Shared handle to a picture, released when the last clone drops
pub type FrameRef<B> = Arc<Picture<B>>;

/// Callback run once when a picture is finally released
pub type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

/// Where a picture's bytes live
pub enum PictureSource<'a, B> {
    /// Slot `index` of a mapped pool, uploaded straight from `buffer`
    Pooled { index: usize, buffer: &'a B },
    /// Host memory, copied on upload
    Copied(&'a [u8]),
}

/// A decoded picture
pub struct Picture<B> {
    format: VideoFormat,
    layout: Arc<PictureLayout>,
    slot: Option<Slot<B>>,
    /// Return path to the owning pool, if any
    recycle: Option<Sender<Slot<B>>>,
    release: Option<ReleaseHook>,
}

impl<B: TransferBuffer> Picture<B> {
    pub(crate) fn pooled(
        format: VideoFormat,
        layout: Arc<PictureLayout>,
        slot: Slot<B>,
        recycle: Sender<Slot<B>>,
    ) -> Self {
        Self {
            format,
            layout,
            slot: Some(slot),
            recycle: Some(recycle),
            release: None,
        }
    }

    /// Wrap decoder-owned host memory laid out as `layout`
    pub fn from_host(format: VideoFormat, layout: PictureLayout, data: Vec<u8>) -> Result<Self, VoutError> {
        if layout.chroma != format.chroma {
            return Err(VoutError::InvalidFormat(format!(
                "layout is {:?} but format is {:?}",
                layout.chroma, format.chroma
            )));
        }
        if data.len() < layout.size() {
            return Err(VoutError::InvalidFormat(format!(
                "{} bytes given, layout needs {}",
                data.len(),
                layout.size()
            )));
        }
        Ok(Self {
            format,
            layout: Arc::new(layout),
            slot: Some(Slot::new(0, Backing::Host(data))),
            recycle: None,
            release: None,
        })
    }

    /// Attach a hook run exactly once when the picture is released
    ///
    /// Replaces any previously attached hook.
    pub fn with_release(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    /// Freeze the picture into a shareable frame
    pub fn into_frame(self) -> FrameRef<B> {
        Arc::new(self)
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    pub fn layout(&self) -> &PictureLayout {
        &self.layout
    }

    pub fn plane_count(&self) -> usize {
        self.layout.planes.len()
    }

    /// Slot index when the picture belongs to a pool
    pub fn slot_index(&self) -> Option<usize> {
        match (&self.slot, &self.recycle) {
            (Some(slot), Some(_)) => Some(slot.index()),
            _ => None,
        }
    }

    /// Generation of the pool the picture was leased from
    pub fn pool_generation(&self) -> Option<u64> {
        match (&self.slot, &self.recycle) {
            (Some(slot), Some(_)) => Some(slot.generation()),
            _ => None,
        }
    }

    /// Whether the bytes live in a GPU transfer buffer
    pub fn is_pooled(&self) -> bool {
        matches!(self.source(), PictureSource::Pooled { .. })
    }

    /// Backing of the picture
    pub fn source(&self) -> PictureSource<'_, B> {
        match self.slot.as_ref().map(Slot::backing) {
            Some(Backing::Mapped(buffer)) => PictureSource::Pooled {
                index: self.slot.as_ref().map_or(0, Slot::index),
                buffer,
            },
            Some(Backing::Host(data)) => PictureSource::Copied(data),
            None => PictureSource::Copied(&[]),
        }
    }

    /// Visit every row of `plane`, `f(line, row_bytes)`
    ///
    /// Rows exclude pitch padding. For pooled pictures this writes straight
    /// into the transfer buffer and fails while the GPU still owns it.
    pub fn map_plane_rows<F>(&mut self, plane: usize, mut f: F) -> Result<(), VoutError>
    where
        F: FnMut(usize, &mut [u8]),
    {
        let geom = *self.layout.planes.get(plane).ok_or_else(|| {
            VoutError::InvalidFormat(format!(
                "plane {} of {} planes",
                plane,
                self.layout.planes.len()
            ))
        })?;
        let desc = self.layout.chroma.description().planes[plane];
        let row_bytes = geom.width as usize * desc.format.bytes_per_texel();
        let offset = self.layout.slot.offsets[plane];
        let needed = self.layout.size();

        let slot = self
            .slot
            .as_mut()
            .ok_or_else(|| VoutError::InvalidFormat("picture has no backing".to_string()))?;
        if slot.size() < needed {
            return Err(VoutError::InvalidFormat(format!(
                "backing of {} bytes is smaller than layout ({})",
                slot.size(),
                needed
            )));
        }

        let mut visit = |bytes: &mut [u8]| {
            for line in 0..geom.height as usize {
                let start = offset + line * geom.pitch;
                f(line, &mut bytes[start..start + row_bytes]);
            }
        };

        match slot.backing_mut() {
            Backing::Mapped(buffer) => buffer.with_mapped(&mut visit).map_err(VoutError::from),
            Backing::Host(data) => {
                visit(data);
                Ok(())
            }
        }
    }

    /// Copy `src`, laid out with `src_pitch` bytes per line, into `plane`
    pub fn write_plane(&mut self, plane: usize, src: &[u8], src_pitch: usize) -> Result<(), VoutError> {
        let geom = *self
            .layout
            .planes
            .get(plane)
            .ok_or_else(|| VoutError::InvalidFormat(format!("no plane {}", plane)))?;
        let row_bytes =
            geom.width as usize * self.layout.chroma.description().planes[plane].format.bytes_per_texel();
        let lines = geom.height as usize;
        let needed = (lines - 1) * src_pitch + row_bytes;
        if src_pitch < row_bytes || src.len() < needed {
            return Err(VoutError::InvalidFormat(format!(
                "plane {}: {} bytes at pitch {} for {} rows of {} bytes",
                plane,
                src.len(),
                src_pitch,
                lines,
                row_bytes
            )));
        }
        self.map_plane_rows(plane, |line, row| {
            let start = line * src_pitch;
            row.copy_from_slice(&src[start..start + row_bytes]);
        })
    }
}

impl<B> Drop for Picture<B> {
    fn drop(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
        if let (Some(slot), Some(recycle)) = (self.slot.take(), self.recycle.take()) {
            // Fails only once the pool is gone, the slot is then destroyed here
            let _ = recycle.send(slot);
        }
    }
}
