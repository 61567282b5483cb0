//! Picture placement inside the display
//!
//! Works out where the visible part of the source lands on the surface,
//! honouring sample aspect ratios, zoom and alignment. Pure geometry.

use crate::gpu::Rect;
use crate::video::VideoFormat;

/// Horizontal alignment of the picture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HAlign {
    Left,
    #[default]
    Center,
    Right,
}

/// Vertical alignment of the picture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VAlign {
    Top,
    #[default]
    Center,
    Bottom,
}

/// Display geometry the picture is placed into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    /// Scale the picture to fill the display rather than using its own size
    pub is_filled: bool,
    pub zoom_num: u32,
    pub zoom_den: u32,
    /// Display pixel aspect ratio
    pub sar_num: u32,
    pub sar_den: u32,
    pub h_align: HAlign,
    pub v_align: VAlign,
}

impl DisplayConfig {
    /// A filled, centered display with square pixels
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            is_filled: true,
            zoom_num: 1,
            zoom_den: 1,
            sar_num: 1,
            sar_den: 1,
            h_align: HAlign::Center,
            v_align: VAlign::Center,
        }
    }
}

/// Destination of the picture in display pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Placement {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Placement {
    pub fn to_rect(self) -> Rect {
        Rect::new(
            self.x,
            self.y,
            self.x + self.width as i32,
            self.y + self.height as i32,
        )
    }

    /// Whether the placement covers the whole `width`x`height` area
    pub fn covers(&self, width: u32, height: u32) -> bool {
        self.x <= 0
            && self.y <= 0
            && self.x as i64 + self.width as i64 >= width as i64
            && self.y as i64 + self.height as i64 >= height as i64
    }
}

fn nonzero(v: u32) -> u64 {
    v.max(1) as u64
}

/// Size the source would have at the configured zoom, in display pixels
pub fn default_display_size(source: &VideoFormat, cfg: &DisplayConfig) -> (u32, u32) {
    let vw = source.visible_width as u64;
    let vh = source.visible_height as u64;
    let (sar_num, sar_den) = (nonzero(source.sar_num), nonzero(source.sar_den));
    let (zoom_num, zoom_den) = (cfg.zoom_num as u64, nonzero(cfg.zoom_den));

    // Stretch along whichever axis the sample aspect widens
    let (w, h) = if sar_num >= sar_den {
        (vw * sar_num * zoom_num / sar_den / zoom_den, vh * zoom_num / zoom_den)
    } else {
        (vw * zoom_num / zoom_den, vh * sar_den * zoom_num / sar_num / zoom_den)
    };

    let w = w * nonzero(cfg.sar_den) / nonzero(cfg.sar_num);
    let h = h * nonzero(cfg.sar_num) / nonzero(cfg.sar_den);
    (w.min(u32::MAX as u64) as u32, h.min(u32::MAX as u64) as u32)
}

/// Place the visible part of `source` inside the display described by `cfg`
///
/// The picture keeps its aspect ratio and is not clipped to the display
/// when zoomed beyond it. An empty display gives an empty placement.
pub fn place_picture(source: &VideoFormat, cfg: &DisplayConfig) -> Placement {
    if cfg.width == 0 || cfg.height == 0 || source.visible_width == 0 || source.visible_height == 0 {
        return Placement::default();
    }

    let (display_w, display_h) = if cfg.is_filled {
        (cfg.width, cfg.height)
    } else {
        default_display_size(source, cfg)
    };

    let w = source.visible_width as u64;
    let h = source.visible_height as u64;
    let (src_num, src_den) = (nonzero(source.sar_num), nonzero(source.sar_den));
    let (dpy_num, dpy_den) = (nonzero(cfg.sar_num), nonzero(cfg.sar_den));

    // Height when filling display_w, and width when filling display_h
    let scaled_h = h * display_w as u64 * dpy_num * src_den / (w * src_num * dpy_den);
    let scaled_w = w * display_h as u64 * dpy_den * src_num / (h * src_den * dpy_num);

    let (width, height) = if scaled_w <= cfg.width as u64 {
        (scaled_w, display_h as u64)
    } else {
        (display_w as u64, scaled_h)
    };
    let width = width.min(i32::MAX as u64) as u32;
    let height = height.min(i32::MAX as u64) as u32;

    let x = match cfg.h_align {
        HAlign::Left => 0,
        HAlign::Right => cfg.width as i32 - width as i32,
        HAlign::Center => (cfg.width as i32 - width as i32) / 2,
    };
    let y = match cfg.v_align {
        VAlign::Top => 0,
        VAlign::Bottom => cfg.height as i32 - height as i32,
        VAlign::Center => (cfg.height as i32 - height as i32) / 2,
    };

    Placement { x, y, width, height }
}
