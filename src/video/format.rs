//! Video formats, plane descriptions and picture layouts
//!
//! Describes how a chroma format splits into planes, which GPU texel
//! format each plane uploads as, and how a picture of a given size is laid
//! out in memory (pitch, lines and byte offsets per plane).

use crate::error::VoutError;
use crate::pool::SlotLayout;

/// Maximum number of planes a picture may carry
pub const MAX_PLANES: usize = 4;

/// Pitch alignment used for host-memory pictures
pub const HOST_PITCH_ALIGN: usize = 16;

/// Chroma (pixel layout) tag of a picture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chroma {
    /// Planar YUV 4:2:0, 8 bit
    I420,
    /// Planar YUV 4:2:0, 10 bit in 16 bit little-endian samples
    I420P10,
    /// Planar YUV 4:2:2, 8 bit
    I422,
    /// Planar YUV 4:4:4, 8 bit
    I444,
    /// Semi-planar YUV 4:2:0 (Y plane + interleaved UV plane)
    Nv12,
    /// Planar YUV 4:2:0 with a full resolution alpha plane
    Yuva420,
    /// Luma only
    Gray8,
    /// Packed 8 bit RGBA
    Rgba,
    /// Packed 8 bit BGRA
    Bgra,
}

/// What a plane's samples represent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneKind {
    Luma,
    /// Cb, Cr or an interleaved CbCr plane
    Chroma,
    Alpha,
    /// Packed RGB(A) samples
    Rgb,
}

/// Texel format a plane is uploaded as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneFormat {
    R8,
    R16,
    Rg8,
    Rgba8,
    Bgra8,
}

impl PlaneFormat {
    /// Bytes per texel
    pub fn bytes_per_texel(self) -> usize {
        match self {
            PlaneFormat::R8 => 1,
            PlaneFormat::R16 | PlaneFormat::Rg8 => 2,
            PlaneFormat::Rgba8 | PlaneFormat::Bgra8 => 4,
        }
    }

    /// Number of components per texel
    pub fn components(self) -> usize {
        match self {
            PlaneFormat::R8 | PlaneFormat::R16 => 1,
            PlaneFormat::Rg8 => 2,
            PlaneFormat::Rgba8 | PlaneFormat::Bgra8 => 4,
        }
    }
}

/// Static description of one plane of a chroma format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneDesc {
    pub kind: PlaneKind,
    pub format: PlaneFormat,
    /// Horizontal subsampling divisor relative to luma
    pub w_div: u32,
    /// Vertical subsampling divisor relative to luma
    pub h_div: u32,
}

impl PlaneDesc {
    const fn new(kind: PlaneKind, format: PlaneFormat, w_div: u32, h_div: u32) -> Self {
        Self { kind, format, w_div, h_div }
    }

    /// Whether this plane is stored at a lower resolution than luma
    pub fn is_subsampled(&self) -> bool {
        self.w_div > 1 || self.h_div > 1
    }
}

/// Static description of a chroma format
#[derive(Debug, Clone, Copy)]
pub struct ChromaDescription {
    pub planes: &'static [PlaneDesc],
    /// Bytes per stored sample
    pub pixel_size: u32,
    /// Significant bits per sample
    pub pixel_bits: u32,
}

const LUMA8: PlaneDesc = PlaneDesc::new(PlaneKind::Luma, PlaneFormat::R8, 1, 1);
const LUMA16: PlaneDesc = PlaneDesc::new(PlaneKind::Luma, PlaneFormat::R16, 1, 1);
const ALPHA8: PlaneDesc = PlaneDesc::new(PlaneKind::Alpha, PlaneFormat::R8, 1, 1);

const I420_PLANES: [PlaneDesc; 3] = [
    LUMA8,
    PlaneDesc::new(PlaneKind::Chroma, PlaneFormat::R8, 2, 2),
    PlaneDesc::new(PlaneKind::Chroma, PlaneFormat::R8, 2, 2),
];
const I420P10_PLANES: [PlaneDesc; 3] = [
    LUMA16,
    PlaneDesc::new(PlaneKind::Chroma, PlaneFormat::R16, 2, 2),
    PlaneDesc::new(PlaneKind::Chroma, PlaneFormat::R16, 2, 2),
];
const I422_PLANES: [PlaneDesc; 3] = [
    LUMA8,
    PlaneDesc::new(PlaneKind::Chroma, PlaneFormat::R8, 2, 1),
    PlaneDesc::new(PlaneKind::Chroma, PlaneFormat::R8, 2, 1),
];
const I444_PLANES: [PlaneDesc; 3] = [
    LUMA8,
    PlaneDesc::new(PlaneKind::Chroma, PlaneFormat::R8, 1, 1),
    PlaneDesc::new(PlaneKind::Chroma, PlaneFormat::R8, 1, 1),
];
const NV12_PLANES: [PlaneDesc; 2] = [
    LUMA8,
    PlaneDesc::new(PlaneKind::Chroma, PlaneFormat::Rg8, 2, 2),
];
const YUVA420_PLANES: [PlaneDesc; 4] = [
    LUMA8,
    PlaneDesc::new(PlaneKind::Chroma, PlaneFormat::R8, 2, 2),
    PlaneDesc::new(PlaneKind::Chroma, PlaneFormat::R8, 2, 2),
    ALPHA8,
];
const GRAY_PLANES: [PlaneDesc; 1] = [LUMA8];
const RGBA_PLANES: [PlaneDesc; 1] = [PlaneDesc::new(PlaneKind::Rgb, PlaneFormat::Rgba8, 1, 1)];
const BGRA_PLANES: [PlaneDesc; 1] = [PlaneDesc::new(PlaneKind::Rgb, PlaneFormat::Bgra8, 1, 1)];

impl Chroma {
    /// Plane layout and sample depth of this chroma
    pub fn description(self) -> ChromaDescription {
        let (planes, pixel_size, pixel_bits): (&'static [PlaneDesc], u32, u32) = match self {
            Chroma::I420 => (&I420_PLANES, 1, 8),
            Chroma::I420P10 => (&I420P10_PLANES, 2, 10),
            Chroma::I422 => (&I422_PLANES, 1, 8),
            Chroma::I444 => (&I444_PLANES, 1, 8),
            Chroma::Nv12 => (&NV12_PLANES, 1, 8),
            Chroma::Yuva420 => (&YUVA420_PLANES, 1, 8),
            Chroma::Gray8 => (&GRAY_PLANES, 1, 8),
            Chroma::Rgba => (&RGBA_PLANES, 1, 8),
            Chroma::Bgra => (&BGRA_PLANES, 1, 8),
        };
        ChromaDescription {
            planes,
            pixel_size,
            pixel_bits,
        }
    }

    /// Number of planes
    pub fn plane_count(self) -> usize {
        self.description().planes.len()
    }

    /// Whether samples are YCbCr (luma only formats count as YUV)
    pub fn is_yuv(self) -> bool {
        !matches!(self, Chroma::Rgba | Chroma::Bgra)
    }

    /// Ordered list of chromas to try when this one cannot be displayed
    pub fn fallbacks(self) -> &'static [Chroma] {
        match self {
            Chroma::I420 => &[Chroma::Nv12, Chroma::I444, Chroma::Rgba],
            Chroma::I420P10 => &[Chroma::I420, Chroma::Nv12, Chroma::Rgba],
            Chroma::I422 => &[Chroma::I444, Chroma::I420, Chroma::Rgba],
            Chroma::I444 => &[Chroma::I422, Chroma::I420, Chroma::Rgba],
            Chroma::Nv12 => &[Chroma::I420, Chroma::Rgba],
            Chroma::Yuva420 => &[Chroma::I420, Chroma::Rgba],
            Chroma::Gray8 => &[Chroma::I420, Chroma::Rgba],
            Chroma::Rgba => &[Chroma::Bgra],
            Chroma::Bgra => &[Chroma::Rgba],
        }
    }
}

/// Color primaries tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorPrimaries {
    #[default]
    Undef,
    Bt601_525,
    Bt601_625,
    Bt709,
    Bt2020,
    DciP3,
    Bt470M,
}

/// Transfer function tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferFunc {
    #[default]
    Undef,
    Linear,
    Srgb,
    SmpteSt2084,
    Hlg,
    Bt470Bg,
    Bt470M,
    Bt709,
    Smpte240,
}

/// YCbCr matrix tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YuvSpace {
    #[default]
    Undef,
    Bt601,
    Bt709,
    Bt2020,
}

/// Siting of chroma samples relative to luma samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChromaLocation {
    #[default]
    Undef,
    Left,
    Center,
    TopLeft,
    TopCenter,
    BottomLeft,
    BottomCenter,
}

/// Format of a decoded picture
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFormat {
    pub chroma: Chroma,
    /// Allocated width in pixels
    pub width: u32,
    /// Allocated height in pixels
    pub height: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub visible_width: u32,
    pub visible_height: u32,
    /// Sample aspect ratio numerator
    pub sar_num: u32,
    /// Sample aspect ratio denominator
    pub sar_den: u32,
    pub primaries: ColorPrimaries,
    pub transfer: TransferFunc,
    pub space: YuvSpace,
    pub chroma_location: ChromaLocation,
    pub full_range: bool,
    /// Maximum content light level, cd/m²
    pub max_cll: u16,
    /// Maximum frame-average light level, cd/m²
    pub max_fall: u16,
    /// Mastering display peak luminance, cd/m²
    pub mastering_max_luminance: f32,
}

impl VideoFormat {
    /// Create a format with the whole picture visible and square samples
    pub fn new(chroma: Chroma, width: u32, height: u32) -> Self {
        Self {
            chroma,
            width,
            height,
            x_offset: 0,
            y_offset: 0,
            visible_width: width,
            visible_height: height,
            sar_num: 1,
            sar_den: 1,
            primaries: ColorPrimaries::default(),
            transfer: TransferFunc::default(),
            space: YuvSpace::default(),
            chroma_location: ChromaLocation::default(),
            full_range: false,
            max_cll: 0,
            max_fall: 0,
            mastering_max_luminance: 0.0,
        }
    }

    /// Same format with a different chroma
    pub fn with_chroma(&self, chroma: Chroma) -> Self {
        Self {
            chroma,
            ..self.clone()
        }
    }
}

/// Geometry of one plane of a laid-out picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Bytes per line
    pub pitch: usize,
    /// Number of lines stored
    pub lines: usize,
}

/// Memory layout of a picture: per-plane geometry plus byte offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureLayout {
    pub chroma: Chroma,
    pub planes: Vec<PlaneGeometry>,
    pub slot: SlotLayout,
}

impl PictureLayout {
    /// Lay out a picture of `width`x`height` with every pitch rounded up to `pitch_align`
    pub fn new(chroma: Chroma, width: u32, height: u32, pitch_align: usize) -> Result<Self, VoutError> {
        if width == 0 || height == 0 {
            return Err(VoutError::InvalidFormat(format!(
                "empty picture {}x{}",
                width, height
            )));
        }
        let align = pitch_align.max(1);
        let planes = chroma
            .description()
            .planes
            .iter()
            .map(|desc| {
                let plane_w = width.div_ceil(desc.w_div);
                let plane_h = height.div_ceil(desc.h_div);
                let row = plane_w as usize * desc.format.bytes_per_texel();
                PlaneGeometry {
                    width: plane_w,
                    height: plane_h,
                    pitch: row.next_multiple_of(align),
                    lines: plane_h as usize,
                }
            })
            .collect();
        Self::from_planes(chroma, planes)
    }

    /// Build a layout from explicit plane geometry
    pub fn from_planes(chroma: Chroma, planes: Vec<PlaneGeometry>) -> Result<Self, VoutError> {
        let desc = chroma.description();
        if planes.len() != desc.planes.len() {
            return Err(VoutError::InvalidFormat(format!(
                "{:?} needs {} planes, got {}",
                chroma,
                desc.planes.len(),
                planes.len()
            )));
        }
        for (i, (plane, pd)) in planes.iter().zip(desc.planes).enumerate() {
            let row = plane.width as usize * pd.format.bytes_per_texel();
            if plane.pitch < row || plane.lines < plane.height as usize {
                return Err(VoutError::InvalidFormat(format!(
                    "plane {} geometry {:?} too small for {} byte rows",
                    i, plane, row
                )));
            }
        }
        let extents: Vec<(usize, usize)> = planes.iter().map(|p| (p.pitch, p.lines)).collect();
        let slot = SlotLayout::from_planes(&extents)?;
        Ok(Self {
            chroma,
            planes,
            slot,
        })
    }

    /// Total bytes needed to hold the picture
    pub fn size(&self) -> usize {
        self.slot.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i420_layout() {
        let layout = PictureLayout::new(Chroma::I420, 640, 480, 1).unwrap();
        assert_eq!(layout.planes.len(), 3);
        assert_eq!(layout.planes[0].pitch, 640);
        assert_eq!(layout.planes[1].pitch, 320);
        assert_eq!(layout.planes[2].lines, 240);
        assert_eq!(layout.size(), 640 * 480 + 320 * 240 * 2);
    }

    #[test]
    fn test_odd_sizes_round_up_chroma() {
        let layout = PictureLayout::new(Chroma::I420, 33, 17, 1).unwrap();
        assert_eq!(layout.planes[1].width, 17);
        assert_eq!(layout.planes[1].height, 9);
    }

    #[test]
    fn test_pitch_alignment() {
        let layout = PictureLayout::new(Chroma::Nv12, 100, 50, 256).unwrap();
        assert_eq!(layout.planes[0].pitch, 256);
        // 50 interleaved CbCr texels of 2 bytes
        assert_eq!(layout.planes[1].pitch, 256);
        assert_eq!(layout.slot.offsets, vec![0, 256 * 50]);
    }

    #[test]
    fn test_from_planes_rejects_short_pitch() {
        let planes = vec![PlaneGeometry {
            width: 64,
            height: 8,
            pitch: 128,
            lines: 8,
        }];
        assert!(PictureLayout::from_planes(Chroma::Rgba, planes).is_err());
    }

    #[test]
    fn test_plane_kinds() {
        let desc = Chroma::Yuva420.description();
        assert_eq!(desc.planes[0].kind, PlaneKind::Luma);
        assert_eq!(desc.planes[3].kind, PlaneKind::Alpha);
        assert!(desc.planes[1].is_subsampled());
        assert!(!Chroma::I444.description().planes[1].is_subsampled());
        assert!(!Chroma::Rgba.is_yuv());
    }
}
