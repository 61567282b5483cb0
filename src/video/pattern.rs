//! Moving test pattern
//!
//! Fills pictures with vertical color bars and a sweeping luma bar so the
//! demo has something to present without a decoder.

use crate::error::VoutError;
use crate::gpu::TransferBuffer;

use super::format::{Chroma, PlaneKind};
use super::frame::Picture;

/// 75% color bars, BT.709 limited range (Y, Cb, Cr)
const BARS_YUV: [[u8; 3]; 7] = [
    [180, 128, 128],
    [168, 44, 136],
    [145, 147, 44],
    [133, 63, 52],
    [63, 193, 204],
    [51, 109, 212],
    [28, 212, 120],
];

/// Same bars in RGB
const BARS_RGB: [[u8; 3]; 7] = [
    [191, 191, 191],
    [191, 191, 0],
    [0, 191, 191],
    [0, 191, 0],
    [191, 0, 191],
    [191, 0, 0],
    [0, 0, 191],
];

/// Generates successive pattern frames
#[derive(Debug, Default)]
pub struct TestPattern {
    frame_index: u64,
}

impl TestPattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the next frame to be drawn
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Draw the next frame into `pic`
    pub fn fill<B: TransferBuffer>(&mut self, pic: &mut Picture<B>) -> Result<(), VoutError> {
        let chroma = pic.format().chroma;
        let width = pic.format().width as usize;
        let desc = chroma.description();
        let sweep = (self.frame_index as usize * 4) % width.max(1);

        for (plane, pd) in desc.planes.iter().enumerate() {
            let geom = pic.layout().planes[plane];
            let plane_w = geom.width as usize;
            let sweep_x = sweep / pd.w_div as usize;
            let bpt = pd.format.bytes_per_texel();
            let comps = pd.format.components();

            pic.map_plane_rows(plane, |_line, row| {
                for x in 0..plane_w {
                    let bar = (x * BARS_YUV.len()) / plane_w.max(1);
                    let texel = &mut row[x * bpt..(x + 1) * bpt];
                    let on_sweep = x.abs_diff(sweep_x) < 2;
                    match pd.kind {
                        PlaneKind::Luma => {
                            let y = if on_sweep { 235 } else { BARS_YUV[bar][0] };
                            write_sample(texel, y, bpt);
                        }
                        PlaneKind::Chroma if comps == 2 => {
                            texel[0] = BARS_YUV[bar][1];
                            texel[1] = BARS_YUV[bar][2];
                        }
                        PlaneKind::Chroma => {
                            // Planes are ordered Cb then Cr
                            let c = if plane == 1 { BARS_YUV[bar][1] } else { BARS_YUV[bar][2] };
                            write_sample(texel, c, bpt);
                        }
                        PlaneKind::Alpha => write_sample(texel, 255, bpt),
                        PlaneKind::Rgb => {
                            let rgb = if on_sweep { [255, 255, 255] } else { BARS_RGB[bar] };
                            let (r, b) = if chroma == Chroma::Bgra { (2, 0) } else { (0, 2) };
                            texel[r] = rgb[0];
                            texel[1] = rgb[1];
                            texel[b] = rgb[2];
                            texel[3] = 255;
                        }
                    }
                }
            })?;
        }

        self.frame_index += 1;
        Ok(())
    }
}

/// Store an 8 bit value, scaled up for 16 bit samples holding 10 bits
fn write_sample(texel: &mut [u8], value: u8, bytes: usize) {
    if bytes == 2 {
        let v = (value as u16) << 2;
        texel.copy_from_slice(&v.to_le_bytes());
    } else {
        texel[0] = value;
    }
}
