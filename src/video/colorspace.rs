//! Color metadata translation
//!
//! Pure mappings from a picture's format tags to the color space,
//! representation and chroma siting the renderer works with.

use super::format::{Chroma, ChromaLocation, ColorPrimaries, TransferFunc, VideoFormat, YuvSpace};

/// Reference white in cd/m² used to normalise light level metadata
pub const REFERENCE_WHITE: f32 = 100.0;

/// Transfer curve as understood by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GammaCurve {
    #[default]
    Unknown,
    Linear,
    Srgb,
    Bt1886,
    Pq,
    Hlg,
}

/// Color space of the decoded signal
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColorSpace {
    pub primaries: ColorPrimaries,
    pub transfer: GammaCurve,
    /// Signal peak relative to reference white, 0 when unknown
    pub sig_peak: f32,
    /// Frame-average signal relative to reference white, 0 when unknown
    pub sig_avg: f32,
}

/// Encoding system of the samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSystem {
    Rgb,
    Bt601,
    Bt709,
    Bt2020Nc,
}

/// Quantization range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorLevels {
    /// Limited ("TV") range
    Tv,
    /// Full ("PC") range
    Pc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    Premultiplied,
}

/// How sample values map to color values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorRepr {
    pub system: ColorSystem,
    pub levels: ColorLevels,
    pub alpha: AlphaMode,
    /// Bits per stored sample
    pub sample_depth: u32,
    /// Significant bits per sample
    pub color_depth: u32,
}

/// Linear decoding transform: `rgb = matrix * sample + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeTransform {
    /// Row-major 3x3 matrix
    pub matrix: [[f32; 3]; 3],
    pub offset: [f32; 3],
}

impl ColorRepr {
    /// Transform turning normalised samples into full-range RGB
    ///
    /// Samples stored in more bits than they carry (e.g. 10 in 16) are
    /// rescaled so that the significant range maps onto 0..1.
    pub fn decode_transform(&self) -> DecodeTransform {
        let bit_scale = if self.sample_depth > self.color_depth && self.color_depth > 0 {
            ((1u64 << self.sample_depth) - 1) as f32 / ((1u64 << self.color_depth) - 1) as f32
        } else {
            1.0
        };

        let (kr, kb) = match self.system {
            ColorSystem::Rgb => {
                let s = bit_scale;
                return DecodeTransform {
                    matrix: [[s, 0.0, 0.0], [0.0, s, 0.0], [0.0, 0.0, s]],
                    offset: [0.0; 3],
                };
            }
            ColorSystem::Bt601 => (0.299, 0.114),
            ColorSystem::Bt709 => (0.2126, 0.0722),
            ColorSystem::Bt2020Nc => (0.2627, 0.0593),
        };
        let kg = 1.0 - kr - kb;

        // YCbCr -> RGB on full-range, zero-centred chroma
        let base = [
            [1.0, 0.0, 2.0 * (1.0 - kr)],
            [1.0, -2.0 * kb * (1.0 - kb) / kg, -2.0 * kr * (1.0 - kr) / kg],
            [1.0, 2.0 * (1.0 - kb), 0.0],
        ];

        let (y_scale, c_scale, y_off) = match self.levels {
            ColorLevels::Tv => (255.0 / 219.0, 255.0 / 224.0, 16.0 / 255.0),
            ColorLevels::Pc => (1.0, 1.0, 0.0),
        };
        let c_off = 128.0 / 255.0;
        let scales = [y_scale * bit_scale, c_scale * bit_scale, c_scale * bit_scale];
        let offs = [y_off, c_off, c_off];

        let mut matrix = [[0.0f32; 3]; 3];
        let mut offset = [0.0f32; 3];
        for row in 0..3 {
            for col in 0..3 {
                matrix[row][col] = base[row][col] * scales[col];
                offset[row] -= base[row][col] * scales[col] * offs[col] / bit_scale;
            }
        }

        DecodeTransform { matrix, offset }
    }
}

/// Color space of `fmt`
pub fn color_space(fmt: &VideoFormat) -> ColorSpace {
    let transfer = match fmt.transfer {
        TransferFunc::Undef => GammaCurve::Unknown,
        TransferFunc::Linear => GammaCurve::Linear,
        TransferFunc::Srgb => GammaCurve::Srgb,
        TransferFunc::SmpteSt2084 => GammaCurve::Pq,
        TransferFunc::Hlg => GammaCurve::Hlg,
        // Content mastered for BT.1886 displays
        TransferFunc::Bt470Bg | TransferFunc::Bt470M | TransferFunc::Bt709 | TransferFunc::Smpte240 => {
            GammaCurve::Bt1886
        }
    };

    let mut sig_peak = fmt.max_cll as f32 / REFERENCE_WHITE;
    let sig_avg = fmt.max_fall as f32 / REFERENCE_WHITE;
    if sig_peak == 0.0 {
        sig_peak = fmt.mastering_max_luminance / REFERENCE_WHITE;
    }

    // Badly tagged sources are common, drop anything implausible
    let sig_peak = if sig_peak > 1.0 && sig_peak <= 100.0 { sig_peak } else { 0.0 };
    let sig_avg = if (0.0..=1.0).contains(&sig_avg) { sig_avg } else { 0.0 };

    ColorSpace {
        primaries: fmt.primaries,
        transfer,
        sig_peak,
        sig_avg,
    }
}

/// Sample representation of `fmt`
pub fn color_repr(fmt: &VideoFormat) -> ColorRepr {
    let system = if fmt.chroma.is_yuv() {
        match fmt.space {
            // An untagged YUV source is most likely BT.709
            YuvSpace::Undef | YuvSpace::Bt709 => ColorSystem::Bt709,
            YuvSpace::Bt601 => ColorSystem::Bt601,
            YuvSpace::Bt2020 => ColorSystem::Bt2020Nc,
        }
    } else {
        ColorSystem::Rgb
    };

    let desc = fmt.chroma.description();
    ColorRepr {
        system,
        levels: if fmt.full_range {
            ColorLevels::Pc
        } else {
            ColorLevels::Tv
        },
        alpha: AlphaMode::Premultiplied,
        sample_depth: desc.pixel_size * 8,
        color_depth: desc.pixel_bits,
    }
}

/// Offset of chroma samples relative to luma, in chroma texels
///
/// Untagged content uses the MPEG-2 default (left siting).
pub fn chroma_location_offset(loc: ChromaLocation) -> (f32, f32) {
    match loc {
        ChromaLocation::Undef | ChromaLocation::Left => (-0.5, 0.0),
        ChromaLocation::Center => (0.0, 0.0),
        ChromaLocation::TopLeft => (-0.5, -0.5),
        ChromaLocation::TopCenter => (0.0, -0.5),
        ChromaLocation::BottomLeft => (-0.5, 0.5),
        ChromaLocation::BottomCenter => (0.0, 0.5),
    }
}

/// Whether `chroma` needs chroma siting at all
pub fn is_subsampled_yuv(chroma: Chroma) -> bool {
    chroma.is_yuv() && chroma.description().planes.iter().any(|p| p.is_subsampled())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(t: &DecodeTransform, s: [f32; 3]) -> [f32; 3] {
        let mut out = [0.0; 3];
        for (row, o) in out.iter_mut().enumerate() {
            *o = t.matrix[row][0] * s[0] + t.matrix[row][1] * s[1] + t.matrix[row][2] * s[2]
                + t.offset[row];
        }
        out
    }

    fn assert_close(a: [f32; 3], b: [f32; 3]) {
        for i in 0..3 {
            assert!((a[i] - b[i]).abs() < 1e-3, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn test_transfer_mapping() {
        let mut fmt = VideoFormat::new(Chroma::I420, 16, 16);
        fmt.transfer = TransferFunc::Bt709;
        assert_eq!(color_space(&fmt).transfer, GammaCurve::Bt1886);
        fmt.transfer = TransferFunc::SmpteSt2084;
        assert_eq!(color_space(&fmt).transfer, GammaCurve::Pq);
    }

    #[test]
    fn test_signal_peak_sanitized() {
        let mut fmt = VideoFormat::new(Chroma::I420, 16, 16);
        fmt.max_cll = 1000;
        fmt.max_fall = 50;
        let cs = color_space(&fmt);
        assert_eq!(cs.sig_peak, 10.0);
        assert_eq!(cs.sig_avg, 0.5);

        // Peak below reference white is bogus
        fmt.max_cll = 80;
        assert_eq!(color_space(&fmt).sig_peak, 0.0);

        // Mastering metadata as fallback
        fmt.max_cll = 0;
        fmt.mastering_max_luminance = 4000.0;
        assert_eq!(color_space(&fmt).sig_peak, 40.0);

        // Average above reference white is bogus
        fmt.max_fall = 400;
        assert_eq!(color_space(&fmt).sig_avg, 0.0);
    }

    #[test]
    fn test_color_repr() {
        let mut fmt = VideoFormat::new(Chroma::I420, 16, 16);
        assert_eq!(color_repr(&fmt).system, ColorSystem::Bt709);
        assert_eq!(color_repr(&fmt).levels, ColorLevels::Tv);
        fmt.space = YuvSpace::Bt2020;
        fmt.full_range = true;
        assert_eq!(color_repr(&fmt).system, ColorSystem::Bt2020Nc);
        assert_eq!(color_repr(&fmt).levels, ColorLevels::Pc);

        let rgb = VideoFormat::new(Chroma::Rgba, 16, 16);
        assert_eq!(color_repr(&rgb).system, ColorSystem::Rgb);

        let hbd = VideoFormat::new(Chroma::I420P10, 16, 16);
        let repr = color_repr(&hbd);
        assert_eq!(repr.sample_depth, 16);
        assert_eq!(repr.color_depth, 10);
    }

    #[test]
    fn test_tv_range_decode() {
        let fmt = VideoFormat::new(Chroma::I420, 16, 16);
        let t = color_repr(&fmt).decode_transform();
        let grey = 128.0 / 255.0;
        assert_close(apply(&t, [16.0 / 255.0, grey, grey]), [0.0, 0.0, 0.0]);
        assert_close(apply(&t, [235.0 / 255.0, grey, grey]), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_pc_range_decode() {
        let mut fmt = VideoFormat::new(Chroma::I444, 16, 16);
        fmt.full_range = true;
        fmt.space = YuvSpace::Bt601;
        let t = color_repr(&fmt).decode_transform();
        let grey = 128.0 / 255.0;
        assert_close(apply(&t, [1.0, grey, grey]), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_chroma_offsets() {
        assert_eq!(chroma_location_offset(ChromaLocation::Left), (-0.5, 0.0));
        assert_eq!(chroma_location_offset(ChromaLocation::Undef), (-0.5, 0.0));
        assert_eq!(chroma_location_offset(ChromaLocation::Center), (0.0, 0.0));
        assert_eq!(chroma_location_offset(ChromaLocation::BottomCenter), (0.0, 0.5));
        assert!(is_subsampled_yuv(Chroma::Nv12));
        assert!(!is_subsampled_yuv(Chroma::I444));
        assert!(!is_subsampled_yuv(Chroma::Rgba));
    }
}
