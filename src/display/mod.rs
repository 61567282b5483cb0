//! Video display
//!
//! Drives one presentation surface: hands out pooled pictures to the
//! decoder, then for every frame acquires a swapchain image, uploads the
//! planes, reclaims finished transfer buffers, renders and submits.
//! Upload and render failures are drawn as a solid fail color instead of
//! being returned; only a failed submission reaches the caller.

mod placement;
mod subpicture;

pub use placement::{default_display_size, place_picture, DisplayConfig, HAlign, Placement, VAlign};
pub use subpicture::{Subpicture, SubpictureRegion};

use std::time::Duration;

use crate::error::VoutError;
use crate::gpu::{Gpu, Image, Rect, RenderTarget, Renderer, Swapchain};
use crate::pool::{InFlightTracker, PicturePool, TransferPool};
use crate::settings::{DisplaySettings, RenderParams};
use crate::telemetry::{CycleProfiler, CycleStats, DisplayStats};
use crate::upload::FrameUploader;
use crate::video::colorspace::{color_repr, color_space};
use crate::video::{Chroma, FrameRef, PictureLayout, PictureSource, VideoFormat, HOST_PITCH_ALIGN};

/// Runtime requests from the video output core
#[derive(Debug, Clone, PartialEq)]
pub enum ControlQuery {
    /// Drop every picture and cached texture, the pool is rebuilt on demand
    ResetPictures,
    /// The surface changed size
    DisplaySize(DisplayConfig),
    /// Toggle between filling the surface and using the source size
    DisplayFilled(DisplayConfig),
    Zoom(DisplayConfig),
    /// Sample aspect ratio of the source changed
    SourceAspect { sar_num: u32, sar_den: u32 },
    /// Visible area of the source changed
    SourceCrop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

/// Pick the chroma pictures should be decoded to for this GPU
pub fn select_chroma<G: Gpu>(gpu: &G, wanted: Chroma) -> Chroma {
    if gpu.format_supported(wanted) {
        return wanted;
    }
    if let Some(&fallback) = wanted.fallbacks().iter().find(|c| gpu.format_supported(**c)) {
        tracing::info!(?wanted, ?fallback, "Source chroma not supported, converting");
        return fallback;
    }
    tracing::warn!(?wanted, "No supported chroma found, using RGBA");
    Chroma::Rgba
}

/// One video output surface
pub struct Display<G, S, R>
where
    G: Gpu,
    S: Swapchain<G>,
    R: Renderer<G>,
{
    gpu: G,
    swapchain: S,
    renderer: R,
    /// Format pictures are produced in
    source: VideoFormat,
    cfg: DisplayConfig,
    settings: DisplaySettings,
    placement: Placement,
    pool: Option<PicturePool<G::Buffer>>,
    tracker: InFlightTracker<G::Buffer>,
    uploader: FrameUploader<G>,
    signature: u64,
    stats: DisplayStats,
    profiler: CycleProfiler,
}

impl<G, S, R> Display<G, S, R>
where
    G: Gpu,
    S: Swapchain<G>,
    R: Renderer<G>,
{
    pub fn new(gpu: G, swapchain: S, renderer: R, source: VideoFormat, cfg: DisplayConfig, settings: DisplaySettings) -> Self {
        let chroma = select_chroma(&gpu, source.chroma);
        let source = source.with_chroma(chroma);
        let placement = place_picture(&source, &cfg);

        tracing::info!(
            chroma = ?source.chroma,
            width = source.width,
            height = source.height,
            display_width = cfg.width,
            display_height = cfg.height,
            "Display opened"
        );

        Self {
            gpu,
            swapchain,
            renderer,
            source,
            cfg,
            settings,
            placement,
            pool: None,
            tracker: InFlightTracker::new(),
            uploader: FrameUploader::new(),
            signature: 0,
            stats: DisplayStats::default(),
            profiler: CycleProfiler::new(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PICTURE POOL
    // ═══════════════════════════════════════════════════════════════════════════

    /// Picture pool for the decoder, created on first use
    ///
    /// `requested` of 0 uses the configured pool size. Mapped transfer
    /// buffers are preferred; the pool falls back to host pictures when they
    /// cannot be allocated. Later calls return the same pool until a reset.
    pub fn pool(&mut self, requested: usize) -> Result<&mut PicturePool<G::Buffer>, VoutError> {
        if self.pool.is_none() {
            let capacity = if requested == 0 {
                self.settings.pool_size
            } else {
                requested
            };
            let pool = create_pool(&self.gpu, &self.source, capacity)?;
            self.pool = Some(pool);
        }
        self.pool
            .as_mut()
            .ok_or_else(|| VoutError::Allocation("picture pool unavailable".to_string()))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RENDER CYCLE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Upload and render `frame` into the next swapchain image and submit it
    ///
    /// A cycle with no swapchain image ready is skipped and still returns
    /// `Ok`. Fails only with [`VoutError::FatalPresent`].
    pub fn prepare(
        &mut self,
        frame: &FrameRef<G::Buffer>,
        subpicture: Option<&Subpicture>,
        pts: Duration,
    ) -> Result<(), VoutError> {
        self.profiler.begin_cycle();

        let Some(sc_frame) = self.swapchain.start_frame() else {
            self.stats.skipped += 1;
            tracing::trace!(?pts, "No swapchain image ready, skipping");
            return Ok(());
        };

        let signature = self.signature;
        self.signature += 1;

        let slot = match frame.source() {
            PictureSource::Pooled { index, .. } => Some(index),
            PictureSource::Copied(_) => None,
        };
        let uploaded = self.uploader.upload(&self.gpu, frame);

        // Planes copied so far may still be read by the GPU
        if let Some(index) = slot {
            let current = self.pool.as_ref().map(PicturePool::generation);
            if current.is_some() && frame.pool_generation() == current {
                self.tracker.mark_busy(index, frame);
            } else {
                tracing::debug!(index, "Picture from a replaced pool, holding it apart");
                self.tracker.retain_detached(frame);
            }
        }
        self.stats.reclaimed += self.tracker.poll_and_reclaim(&self.gpu) as u64;

        let dst_rect = self.placement.to_rect();
        if !self.placement.covers(sc_frame.width, sc_frame.height) {
            self.gpu.clear(&sc_frame.fbo, self.settings.background.to_array());
        }

        let overlays = subpicture.map(|s| s.overlays(dst_rect)).unwrap_or_default();
        let target = RenderTarget {
            fbo: &sc_frame.fbo,
            width: sc_frame.width,
            height: sc_frame.height,
            dst_rect,
            overlays: &overlays,
        };

        let failed = match uploaded {
            Ok(planes) => {
                let fmt = frame.format();
                let image = Image {
                    signature,
                    chroma: fmt.chroma,
                    width: fmt.width,
                    height: fmt.height,
                    src_rect: source_rect(&self.source, fmt),
                    color: color_space(fmt),
                    repr: color_repr(fmt),
                    planes,
                };
                let ok = self.renderer.render(&self.gpu, &image, &target, &self.settings.render);
                if !ok {
                    tracing::warn!(signature, "Failed rendering frame");
                }
                !ok
            }
            Err(e) => {
                tracing::warn!(signature, error = %e, "Failed uploading frame");
                true
            }
        };

        if failed {
            self.stats.failed += 1;
            self.gpu.clear(&sc_frame.fbo, self.settings.fail_color.to_array());
        }

        self.stats.cycles += 1;
        if !self.swapchain.submit_frame() {
            self.stats.submit_failures += 1;
            tracing::error!(signature, "Failed submitting frame");
            return Err(VoutError::FatalPresent("swapchain submission failed".to_string()));
        }
        Ok(())
    }

    /// Present the last submitted frame and release the caller's reference
    pub fn display(&mut self, frame: FrameRef<G::Buffer>, _subpicture: Option<&Subpicture>) {
        drop(frame);
        self.swapchain.swap_buffers();
        self.stats.presented += 1;
        self.profiler.end_cycle();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONTROL
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn control(&mut self, query: ControlQuery) -> Result<(), VoutError> {
        match query {
            ControlQuery::ResetPictures => {
                self.reset_pictures();
                return Ok(());
            }
            ControlQuery::DisplaySize(cfg) => {
                if cfg.width != self.cfg.width || cfg.height != self.cfg.height {
                    self.swapchain.resize(cfg.width, cfg.height);
                }
                self.cfg = cfg;
            }
            ControlQuery::DisplayFilled(cfg) | ControlQuery::Zoom(cfg) => {
                self.cfg = cfg;
            }
            ControlQuery::SourceAspect { sar_num, sar_den } => {
                if sar_num == 0 || sar_den == 0 {
                    return Err(VoutError::InvalidFormat(format!(
                        "sample aspect {}:{}",
                        sar_num, sar_den
                    )));
                }
                self.source.sar_num = sar_num;
                self.source.sar_den = sar_den;
            }
            ControlQuery::SourceCrop { x, y, width, height } => {
                let fits = width > 0
                    && height > 0
                    && x as u64 + width as u64 <= self.source.width as u64
                    && y as u64 + height as u64 <= self.source.height as u64;
                if !fits {
                    return Err(VoutError::InvalidFormat(format!(
                        "crop {}x{}+{}+{} outside {}x{}",
                        width, height, x, y, self.source.width, self.source.height
                    )));
                }
                self.source.x_offset = x;
                self.source.y_offset = y;
                self.source.visible_width = width;
                self.source.visible_height = height;
            }
        }

        self.placement = place_picture(&self.source, &self.cfg);
        tracing::debug!(placement = ?self.placement, "Picture placed");
        Ok(())
    }

    fn reset_pictures(&mut self) {
        tracing::debug!(in_flight = self.tracker.busy_count(), "Resetting pictures");
        self.tracker.release_all();
        self.uploader.flush();
        self.pool = None;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Format pictures must be produced in
    pub fn format(&self) -> &VideoFormat {
        &self.source
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn stats(&self) -> DisplayStats {
        self.stats
    }

    pub fn cycle_stats(&self) -> CycleStats {
        self.profiler.stats()
    }

    pub fn fps(&self) -> f64 {
        self.profiler.fps()
    }

    /// Number of pooled pictures the GPU may still be reading
    pub fn in_flight(&self) -> usize {
        self.tracker.busy_count() + self.tracker.detached_count()
    }

    pub fn set_render_params(&mut self, params: RenderParams) {
        self.settings.render = params;
    }

    pub fn settings(&self) -> &DisplaySettings {
        &self.settings
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn swapchain(&self) -> &S {
        &self.swapchain
    }

    pub fn swapchain_mut(&mut self) -> &mut S {
        &mut self.swapchain
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }
}

impl<G, S, R> Drop for Display<G, S, R>
where
    G: Gpu,
    S: Swapchain<G>,
    R: Renderer<G>,
{
    fn drop(&mut self) {
        // Frames hold slots, let them go back before the pool disappears
        self.tracker.release_all();
        self.pool = None;
        tracing::debug!(stats = ?self.stats, "Display closed");
    }
}

fn create_pool<G: Gpu>(gpu: &G, source: &VideoFormat, capacity: usize) -> Result<PicturePool<G::Buffer>, VoutError> {
    let layout = PictureLayout::new(source.chroma, source.width, source.height, gpu.pitch_alignment())?;
    match TransferPool::allocate(gpu, layout, capacity) {
        Ok(transfer) => {
            tracing::info!(count = transfer.slots.len(), "Using mapped picture pool");
            Ok(PicturePool::mapped(source.clone(), transfer))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Mapped pool unavailable, falling back to copied pictures");
            let layout = PictureLayout::new(source.chroma, source.width, source.height, HOST_PITCH_ALIGN)?;
            Ok(PicturePool::copied(source.clone(), layout, capacity))
        }
    }
}

/// Source rectangle for a frame: the display crop when it fits the frame,
/// otherwise the frame's own visible area
fn source_rect(crop: &VideoFormat, fmt: &VideoFormat) -> Rect {
    let bounds = Rect::new(0, 0, fmt.width as i32, fmt.height as i32);
    let rect_of = |f: &VideoFormat| {
        Rect::new(
            f.x_offset as i32,
            f.y_offset as i32,
            (f.x_offset + f.visible_width) as i32,
            (f.y_offset + f.visible_height) as i32,
        )
    };
    rect_of(crop)
        .intersect(&bounds)
        .or_else(|| rect_of(fmt).intersect(&bounds))
        .unwrap_or(bounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::mock::{MockGpu, MockRenderer, MockSwapchain};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type TestDisplay = Display<MockGpu, MockSwapchain, MockRenderer>;

    fn display_with(gpu: MockGpu, w: u32, h: u32, dw: u32, dh: u32) -> TestDisplay {
        Display::new(
            gpu,
            MockSwapchain::new(dw, dh),
            MockRenderer::new(),
            VideoFormat::new(Chroma::I420, w, h),
            DisplayConfig::new(dw, dh),
            DisplaySettings::default(),
        )
    }

    fn display() -> TestDisplay {
        display_with(MockGpu::new(), 64, 32, 64, 32)
    }

    fn next_frame(d: &mut TestDisplay) -> FrameRef<crate::gpu::mock::MockBuffer> {
        d.pool(2).unwrap().get().unwrap().into_frame()
    }

    #[test]
    fn test_busy_slot_skipped_by_pool() {
        let mut d = display();
        let f0 = next_frame(&mut d);
        assert_eq!(f0.slot_index(), Some(0));
        d.prepare(&f0, None, Duration::ZERO).unwrap();
        d.display(f0, None);
        assert_eq!(d.in_flight(), 1);

        // Slot 0 still being read, the decoder gets slot 1
        let f1 = next_frame(&mut d);
        assert_eq!(f1.slot_index(), Some(1));
        assert!(d.pool(2).unwrap().get().is_none());

        // Completion is noticed on the next cycle
        d.gpu().complete_all();
        d.prepare(&f1, None, Duration::from_millis(40)).unwrap();
        d.display(f1, None);
        assert_eq!(d.stats().reclaimed, 1);
        assert_eq!(d.pool(2).unwrap().get().map(|p| p.slot_index()), Some(Some(0)));
    }

    #[test]
    fn test_render_failure_draws_fail_color() {
        let mut d = display();
        d.renderer_mut().succeed = false;
        let f = next_frame(&mut d);
        assert!(d.prepare(&f, None, Duration::ZERO).is_ok());
        d.display(f, None);

        assert_eq!(d.gpu().last_clear(), Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(d.swapchain().submitted, 1);
        assert_eq!(d.swapchain().swapped, 1);
        assert_eq!(d.stats().failed, 1);
    }

    #[test]
    fn test_upload_failure_draws_fail_color_and_keeps_slot_busy() {
        let mut d = display_with(MockGpu::new().fail_upload_plane(1), 64, 32, 64, 32);
        let f = next_frame(&mut d);
        d.prepare(&f, None, Duration::ZERO).unwrap();
        assert!(d.renderer().calls.is_empty());
        assert_eq!(d.gpu().last_clear(), Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(d.swapchain().submitted, 1);
        // Plane 0 was copied out of the buffer before plane 1 failed
        assert_eq!(d.in_flight(), 1);
    }

    #[test]
    fn test_no_swapchain_image_skips_cycle() {
        let mut d = display();
        d.swapchain_mut().ready = false;
        let f = next_frame(&mut d);
        assert!(d.prepare(&f, None, Duration::ZERO).is_ok());
        assert_eq!(d.stats().skipped, 1);
        assert_eq!(d.stats().cycles, 0);
        assert_eq!(d.swapchain().submitted, 0);
        assert!(d.renderer().calls.is_empty());
        assert_eq!(d.in_flight(), 0);
    }

    #[test]
    fn test_submit_failure_is_fatal() {
        let mut d = display();
        d.swapchain_mut().submit_ok = false;
        let f = next_frame(&mut d);
        assert!(matches!(
            d.prepare(&f, None, Duration::ZERO),
            Err(VoutError::FatalPresent(_))
        ));
        assert_eq!(d.stats().submit_failures, 1);
    }

    #[test]
    fn test_letterbox_clears_background_first() {
        let mut d = display_with(MockGpu::new(), 1920, 1080, 1280, 1024);
        let f = next_frame(&mut d);
        d.prepare(&f, None, Duration::ZERO).unwrap();
        assert_eq!(*d.gpu().clears.borrow(), vec![[0.0; 4]]);
        let call = &d.renderer().calls[0];
        assert_eq!(call.dst_rect, Rect::new(0, 152, 1280, 872));
        assert_eq!(call.src_rect, Rect::new(0, 0, 1920, 1080));
    }

    #[test]
    fn test_full_cover_does_not_clear() {
        let mut d = display();
        let f = next_frame(&mut d);
        d.prepare(&f, None, Duration::ZERO).unwrap();
        assert!(d.gpu().clears.borrow().is_empty());
    }

    #[test]
    fn test_image_carries_shifts_and_signature() {
        let mut d = display();
        let f = next_frame(&mut d);
        d.prepare(&f, None, Duration::ZERO).unwrap();
        d.prepare(&f, None, Duration::ZERO).unwrap();
        let calls = &d.renderer().calls;
        assert_eq!(calls[0].signature + 1, calls[1].signature);
        assert_eq!(calls[0].shifts[0], (0.0, 0.0));
        assert_eq!(calls[0].shifts[1], (-0.5, 0.0));
    }

    #[test]
    fn test_render_params_passed_through() {
        let mut d = display();
        let mut params = RenderParams::default();
        params.deband = true;
        params.color.contrast = 1.2;
        d.set_render_params(params.clone());
        let f = next_frame(&mut d);
        d.prepare(&f, None, Duration::ZERO).unwrap();
        assert_eq!(d.renderer().calls[0].params, params);
    }

    #[test]
    fn test_subpicture_overlays_reach_renderer() {
        let mut d = display();
        let spu = Subpicture {
            original_width: 64,
            original_height: 32,
            regions: vec![SubpictureRegion {
                x: 0,
                y: 0,
                width: 2,
                height: 2,
                rgba: vec![0; 16],
            }],
        };
        let f = next_frame(&mut d);
        d.prepare(&f, Some(&spu), Duration::ZERO).unwrap();
        assert_eq!(d.renderer().calls[0].overlays, 1);
    }

    #[test]
    fn test_copied_fallback_pool() {
        let mut d = display_with(MockGpu::new().fail_allocation_after(1), 64, 32, 64, 32);
        let pool = d.pool(4).unwrap();
        assert!(!pool.is_mapped());
        assert_eq!(pool.capacity(), 4);
        // The lone mapped buffer was given back
        assert_eq!(d.gpu().live_buffers(), 0);

        let f = next_frame(&mut d);
        d.prepare(&f, None, Duration::ZERO).unwrap();
        assert_eq!(d.in_flight(), 0);
        assert_eq!(d.renderer().calls.len(), 1);
    }

    #[test]
    fn test_pool_is_idempotent() {
        let mut d = display();
        assert_eq!(d.pool(3).unwrap().capacity(), 3);
        assert_eq!(d.pool(10).unwrap().capacity(), 3);
        assert_eq!(d.gpu().live_buffers(), 3);
    }

    #[test]
    fn test_pool_uses_configured_size() {
        let mut d = display();
        assert_eq!(d.pool(0).unwrap().capacity(), DisplaySettings::default().pool_size);
    }

    #[test]
    fn test_format_fallback() {
        let d = display_with(MockGpu::new().without_formats(&[Chroma::I420]), 64, 32, 64, 32);
        assert_eq!(d.format().chroma, Chroma::Nv12);

        let all = [Chroma::I420, Chroma::Nv12, Chroma::I444];
        let d = display_with(MockGpu::new().without_formats(&all), 64, 32, 64, 32);
        assert_eq!(d.format().chroma, Chroma::Rgba);
    }

    #[test]
    fn test_reset_pictures_flushes_and_continues() {
        let mut d = display();
        let f = next_frame(&mut d);
        d.prepare(&f, None, Duration::ZERO).unwrap();
        d.display(f, None);
        assert_eq!(d.in_flight(), 1);

        d.control(ControlQuery::ResetPictures).unwrap();
        assert_eq!(d.in_flight(), 0);
        assert_eq!(d.gpu().live_buffers(), 0);

        // A fresh pool is built on demand
        let f = next_frame(&mut d);
        assert_eq!(f.slot_index(), Some(0));
        d.prepare(&f, None, Duration::ZERO).unwrap();
        assert_eq!(d.renderer().calls.len(), 2);
    }

    #[test]
    fn test_picture_kept_across_reset_never_frees_busy_slot() {
        let mut d = display();
        let old = next_frame(&mut d);
        assert_eq!(old.slot_index(), Some(0));

        d.control(ControlQuery::ResetPictures).unwrap();
        d.prepare(&old, None, Duration::ZERO).unwrap();
        d.display(old, None);
        assert_eq!(d.in_flight(), 1);

        let new0 = next_frame(&mut d);
        assert_eq!(new0.slot_index(), Some(0));
        d.prepare(&new0, None, Duration::from_millis(40)).unwrap();
        let reading = Arc::clone(&new0);
        d.display(new0, None);

        // Slot 0 of the new pool is still read by the GPU
        assert!(d.gpu().poll_buffer(match reading.source() {
            PictureSource::Pooled { buffer, .. } => buffer,
            PictureSource::Copied(_) => panic!("expected pooled picture"),
        }));
        drop(reading);
        let next = d.pool(2).unwrap().get().unwrap();
        assert_eq!(next.slot_index(), Some(1));
        assert!(d.pool(2).unwrap().get().is_none());
        drop(next);

        d.gpu().complete_all();
        let f = next_frame(&mut d);
        assert_eq!(f.slot_index(), Some(1));
        d.prepare(&f, None, Duration::from_millis(80)).unwrap();
        assert_eq!(d.in_flight(), 1);
    }

    #[test]
    fn test_geometry_controls() {
        let mut d = display_with(MockGpu::new(), 1920, 1080, 1920, 1080);
        assert!(d.placement().covers(1920, 1080));

        d.control(ControlQuery::DisplaySize(DisplayConfig::new(1280, 1024))).unwrap();
        assert_eq!(d.swapchain().width, 1280);
        assert_eq!(d.placement().y, 152);

        d.control(ControlQuery::SourceAspect { sar_num: 4, sar_den: 3 }).unwrap();
        assert_eq!(d.placement().height, 540);

        let mut cfg = DisplayConfig::new(1280, 1024);
        cfg.is_filled = false;
        cfg.zoom_num = 1;
        cfg.zoom_den = 2;
        d.control(ControlQuery::Zoom(cfg)).unwrap();
        assert_eq!(d.placement().width, 1280);

        assert!(d
            .control(ControlQuery::SourceCrop {
                x: 100,
                y: 0,
                width: 1900,
                height: 1080
            })
            .is_err());
        d.control(ControlQuery::SourceCrop {
            x: 0,
            y: 0,
            width: 960,
            height: 1080,
        })
        .unwrap();
        assert_eq!(d.format().visible_width, 960);
    }

    #[test]
    fn test_drop_releases_tracked_frames() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let mut d = display();
        let f = d
            .pool(2)
            .unwrap()
            .get()
            .unwrap()
            .with_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .into_frame();
        d.prepare(&f, None, Duration::ZERO).unwrap();
        d.display(f, None);
        assert_eq!(released.load(Ordering::SeqCst), 0);

        drop(d);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
