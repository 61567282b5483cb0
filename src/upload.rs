//! Frame upload
//!
//! Splits a picture into per-plane upload descriptors, pushes each plane
//! into a texture that is kept across frames, and works out the sub-texel
//! shift chroma planes need for their siting.

use crate::error::VoutError;
use crate::gpu::{Gpu, Plane, PlaneData, PlaneSource};
use crate::video::colorspace::chroma_location_offset;
use crate::video::{Picture, PictureSource, PlaneDesc, PlaneKind, VideoFormat, MAX_PLANES};

/// Sub-texel shift for plane `desc` of a picture in `fmt`
///
/// Only subsampled chroma planes of YUV pictures move; luma, alpha and
/// packed RGB planes stay put.
pub fn plane_shift(fmt: &VideoFormat, desc: &PlaneDesc) -> (f32, f32) {
    if desc.kind == PlaneKind::Chroma && fmt.chroma.is_yuv() && desc.is_subsampled() {
        chroma_location_offset(fmt.chroma_location)
    } else {
        (0.0, 0.0)
    }
}

/// Describe every plane of `frame` for upload
///
/// Pooled planes must start on a `pitch_align` boundary per line so they
/// can be copied straight out of the transfer buffer.
pub fn decompose<B>(frame: &Picture<B>, pitch_align: usize) -> Result<Vec<PlaneData<'_, B>>, String>
where
    B: crate::gpu::TransferBuffer,
{
    let layout = frame.layout();
    let desc = layout.chroma.description();
    if layout.planes.len() > MAX_PLANES || layout.planes.len() != desc.planes.len() {
        return Err(format!(
            "{} planes for {:?} (max {})",
            layout.planes.len(),
            layout.chroma,
            MAX_PLANES
        ));
    }

    let (buffer, host) = match frame.source() {
        PictureSource::Pooled { buffer, .. } => (Some(buffer), None),
        PictureSource::Copied(bytes) => (None, Some(bytes)),
    };
    let backing_len = buffer.map_or(0, |b| b.size()) + host.map_or(0, |h| h.len());

    let mut planes = Vec::with_capacity(layout.planes.len());
    for (index, (geom, pd)) in layout.planes.iter().zip(desc.planes).enumerate() {
        let bytes = geom.pitch * geom.lines;
        let range = layout
            .slot
            .plane_range(index, bytes)
            .filter(|r| r.end <= backing_len)
            .ok_or_else(|| format!("plane {} ({} bytes) outside {} byte backing", index, bytes, backing_len))?;

        let source = match (buffer, host) {
            (Some(buffer), _) => {
                if geom.pitch % pitch_align.max(1) != 0 {
                    return Err(format!(
                        "plane {} pitch {} not aligned to {}",
                        index, geom.pitch, pitch_align
                    ));
                }
                PlaneSource::Buffer {
                    buffer,
                    offset: range.start,
                }
            }
            (None, Some(data)) => PlaneSource::Host(&data[range]),
            (None, None) => return Err("picture has no backing".to_string()),
        };

        planes.push(PlaneData {
            index,
            kind: pd.kind,
            format: pd.format,
            width: geom.width,
            height: geom.height,
            pitch: geom.pitch,
            source,
        });
    }
    Ok(planes)
}

/// Uploads pictures into textures recycled per plane index
pub struct FrameUploader<G: Gpu> {
    textures: [Option<G::Texture>; MAX_PLANES],
}

impl<G: Gpu> Default for FrameUploader<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Gpu> FrameUploader<G> {
    pub fn new() -> Self {
        Self {
            textures: std::array::from_fn(|_| None),
        }
    }

    /// Upload every plane of `frame`, returning the bound planes
    ///
    /// Any failing plane aborts the whole upload. A pooled picture that
    /// cannot be decomposed breaks the pool's layout guarantees and panics.
    pub fn upload(&mut self, gpu: &G, frame: &Picture<G::Buffer>) -> Result<Vec<Plane<'_, G::Texture>>, VoutError> {
        let planes = match decompose(frame, gpu.pitch_alignment()) {
            Ok(planes) => planes,
            Err(reason) if frame.is_pooled() => {
                panic!("pooled picture does not match its slot layout: {}", reason)
            }
            Err(reason) => {
                tracing::warn!(%reason, "Cannot decompose picture");
                return Err(VoutError::Upload { plane: 0, reason });
            }
        };

        let fmt = frame.format();
        let descs = frame.layout().chroma.description().planes;
        let mut shifts = [(0.0f32, 0.0f32); MAX_PLANES];

        for data in &planes {
            if let Err(e) = gpu.upload_plane(&mut self.textures[data.index], data) {
                tracing::warn!(plane = data.index, error = %e, "Plane upload failed");
                return Err(VoutError::Upload {
                    plane: data.index,
                    reason: e.to_string(),
                });
            }
            shifts[data.index] = plane_shift(fmt, &descs[data.index]);
        }

        planes
            .iter()
            .map(|data| {
                let texture = self.textures[data.index].as_ref().ok_or_else(|| VoutError::Upload {
                    plane: data.index,
                    reason: "backend left no texture".to_string(),
                })?;
                let (shift_x, shift_y) = shifts[data.index];
                Ok(Plane {
                    texture,
                    kind: data.kind,
                    format: data.format,
                    shift_x,
                    shift_y,
                })
            })
            .collect()
    }

    /// Drop every cached texture
    pub fn flush(&mut self) {
        self.textures = std::array::from_fn(|_| None);
    }

    /// Cached texture for plane `index`
    pub fn texture(&self, index: usize) -> Option<&G::Texture> {
        self.textures.get(index)?.as_ref()
    }
}
