//! Subpicture overlays
//!
//! Regions are positioned in the subpicture's own coordinate space and
//! scaled onto the picture's destination rectangle for drawing.

use crate::gpu::{Overlay, Rect};

/// One RGBA bitmap of a subpicture
#[derive(Debug, Clone, PartialEq)]
pub struct SubpictureRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Tightly packed premultiplied RGBA8
    pub rgba: Vec<u8>,
}

/// Set of regions drawn on top of a frame (subtitles, OSD)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Subpicture {
    /// Coordinate space of the regions, usually the video size
    pub original_width: u32,
    pub original_height: u32,
    pub regions: Vec<SubpictureRegion>,
}

impl Subpicture {
    /// Overlays for a picture drawn at `dst`
    ///
    /// Regions with inconsistent pixel data are skipped.
    pub fn overlays(&self, dst: Rect) -> Vec<Overlay> {
        if self.original_width == 0 || self.original_height == 0 {
            return Vec::new();
        }
        let sx = dst.width() as f64 / self.original_width as f64;
        let sy = dst.height() as f64 / self.original_height as f64;

        self.regions
            .iter()
            .filter(|r| {
                let ok = r.width > 0 && r.height > 0 && r.rgba.len() == r.width as usize * r.height as usize * 4;
                if !ok {
                    tracing::debug!(width = r.width, height = r.height, len = r.rgba.len(), "Skipping bad region");
                }
                ok
            })
            .map(|r| {
                let x0 = dst.x0 + (r.x as f64 * sx).round() as i32;
                let y0 = dst.y0 + (r.y as f64 * sy).round() as i32;
                let x1 = dst.x0 + ((r.x as f64 + r.width as f64) * sx).round() as i32;
                let y1 = dst.y0 + ((r.y as f64 + r.height as f64) * sy).round() as i32;
                Overlay {
                    rect: Rect::new(x0, y0, x1, y1),
                    width: r.width,
                    height: r.height,
                    rgba: r.rgba.clone(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: i32, y: i32, w: u32, h: u32) -> SubpictureRegion {
        SubpictureRegion {
            x,
            y,
            width: w,
            height: h,
            rgba: vec![255; (w * h * 4) as usize],
        }
    }

    #[test]
    fn test_regions_scaled_into_destination() {
        let spu = Subpicture {
            original_width: 1920,
            original_height: 1080,
            regions: vec![region(960, 540, 192, 108)],
        };
        let overlays = spu.overlays(Rect::new(0, 152, 1280, 872));
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0].rect, Rect::new(640, 512, 768, 584));
    }

    #[test]
    fn test_bad_region_skipped() {
        let mut bad = region(0, 0, 4, 4);
        bad.rgba.truncate(3);
        let spu = Subpicture {
            original_width: 100,
            original_height: 100,
            regions: vec![bad, region(0, 0, 2, 2)],
        };
        assert_eq!(spu.overlays(Rect::new(0, 0, 100, 100)).len(), 1);
    }
}
