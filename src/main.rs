//! Immersive Vout - test pattern player
//!
//! Opens a window and plays an animated color bar pattern through the
//! mapped upload path. Keys: F toggles fill, +/- zoom, R resets the
//! picture pool, Escape quits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use immersive_vout::gpu::WgpuTransferBuffer;
use immersive_vout::telemetry::{init_logging, LogConfig};
use immersive_vout::{
    Chroma, ControlQuery, Display, DisplayConfig, DisplaySettings, FrameRef, GpuContext, TestPattern, VideoFormat,
    VoutError, WgpuGpu, WgpuRenderer, WgpuSwapchain,
};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

const WINDOW_TITLE: &str = "Immersive Vout";
const PATTERN_WIDTH: u32 = 1920;
const PATTERN_HEIGHT: u32 = 1080;
const STATS_INTERVAL: Duration = Duration::from_secs(5);

type WgpuDisplay = Display<WgpuGpu, WgpuSwapchain, WgpuRenderer>;

struct VoutApp {
    settings: DisplaySettings,
    source: VideoFormat,
    cfg: DisplayConfig,
    window: Option<Arc<Window>>,
    display: Option<WgpuDisplay>,
    pattern: TestPattern,
    /// Shown again when every pooled picture is still in flight
    last_frame: Option<FrameRef<WgpuTransferBuffer>>,
    started: Instant,
    last_stats: Instant,
}

impl VoutApp {
    fn new(settings: DisplaySettings) -> Self {
        let cfg = DisplayConfig::new(settings.window_width, settings.window_height);
        Self {
            settings,
            source: VideoFormat::new(Chroma::I420, PATTERN_WIDTH, PATTERN_HEIGHT),
            cfg,
            window: None,
            display: None,
            pattern: TestPattern::new(),
            last_frame: None,
            started: Instant::now(),
            last_stats: Instant::now(),
        }
    }

    fn open_display(&mut self, window: Arc<Window>) -> Result<WgpuDisplay, String> {
        let (ctx, surface) = pollster::block_on(GpuContext::new(Arc::clone(&window))).map_err(|e| e.to_string())?;
        let ctx = Arc::new(ctx);

        let size = window.inner_size();
        self.cfg.width = size.width;
        self.cfg.height = size.height;

        let swapchain = WgpuSwapchain::new(Arc::clone(&ctx), surface, size.width, size.height, self.settings.vsync);
        let renderer = WgpuRenderer::new(&ctx.device);
        let gpu = WgpuGpu::new(ctx);

        Ok(Display::new(
            gpu,
            swapchain,
            renderer,
            self.source.clone(),
            self.cfg,
            self.settings.clone(),
        ))
    }

    /// A fresh pattern frame, or the previous one when the pool is drained
    fn next_frame(&mut self) -> Option<FrameRef<WgpuTransferBuffer>> {
        let display = self.display.as_mut()?;
        let pool = match display.pool(0) {
            Ok(pool) => pool,
            Err(e) => {
                tracing::error!("Failed to create picture pool: {}", e);
                return self.last_frame.clone();
            }
        };

        let Some(mut picture) = pool.get() else {
            tracing::trace!("Picture pool drained, repeating last frame");
            return self.last_frame.clone();
        };
        if let Err(e) = self.pattern.fill(&mut picture) {
            tracing::warn!("Failed to draw pattern: {}", e);
        }
        Some(picture.into_frame())
    }

    fn render(&mut self, event_loop: &ActiveEventLoop) {
        let Some(frame) = self.next_frame() else {
            return;
        };
        let Some(display) = self.display.as_mut() else {
            return;
        };

        let pts = self.started.elapsed();
        match display.prepare(&frame, None, pts) {
            Ok(()) => display.display(Arc::clone(&frame), None),
            Err(VoutError::FatalPresent(msg)) => {
                tracing::error!("Presentation failed, closing: {}", msg);
                event_loop.exit();
                return;
            }
            Err(e) => tracing::warn!("Frame dropped: {}", e),
        }
        self.last_frame = Some(frame);

        if self.last_stats.elapsed() >= STATS_INTERVAL {
            self.last_stats = Instant::now();
            let stats = display.stats();
            let cycle = display.cycle_stats();
            // Bound outside the macro: `display` inside tracing macros names tracing::field::display
            let fps = display.fps();
            let in_flight = display.in_flight();
            tracing::info!(
                fps = fps,
                presented = stats.presented,
                skipped = stats.skipped,
                failed = stats.failed,
                in_flight = in_flight,
                avg_ms = cycle.avg_ms,
                "Display stats"
            );
        }
    }

    fn control(&mut self, query: ControlQuery) {
        let Some(display) = self.display.as_mut() else {
            return;
        };
        if matches!(query, ControlQuery::ResetPictures) {
            // Our own reference would otherwise keep a slot of the old pool alive
            self.last_frame = None;
        }
        if let Err(e) = display.control(query) {
            tracing::warn!("Display control failed: {}", e);
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        match key {
            KeyCode::Escape => event_loop.exit(),
            KeyCode::KeyF => {
                self.cfg.is_filled = !self.cfg.is_filled;
                tracing::info!(filled = self.cfg.is_filled, "Toggled fill");
                self.control(ControlQuery::DisplayFilled(self.cfg));
            }
            KeyCode::Equal | KeyCode::NumpadAdd => {
                self.cfg.zoom_num = (self.cfg.zoom_num * 2).min(8 * self.cfg.zoom_den);
                self.control(ControlQuery::Zoom(self.cfg));
            }
            KeyCode::Minus | KeyCode::NumpadSubtract => {
                if self.cfg.zoom_num > 1 {
                    self.cfg.zoom_num /= 2;
                } else {
                    self.cfg.zoom_den = (self.cfg.zoom_den * 2).min(8);
                }
                self.control(ControlQuery::Zoom(self.cfg));
            }
            KeyCode::KeyR => {
                tracing::info!("Resetting picture pool");
                self.control(ControlQuery::ResetPictures);
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for VoutApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = WindowAttributes::default()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(self.settings.window_width, self.settings.window_height));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                tracing::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match self.open_display(Arc::clone(&window)) {
            Ok(display) => self.display = Some(display),
            Err(e) => {
                tracing::error!("Failed to open display: {}", e);
                event_loop.exit();
                return;
            }
        }
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if size.width > 0 && size.height > 0 {
                    self.cfg.width = size.width;
                    self.cfg.height = size.height;
                    self.control(ControlQuery::DisplaySize(self.cfg));
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.handle_key(event_loop, key),
            WindowEvent::RedrawRequested => self.render(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Frames must go back to the pool before the display tears it down
        self.last_frame = None;
        self.display = None;
    }
}

fn main() {
    let log_config = LogConfig {
        console_enabled: true,
        file_enabled: false,
        log_dir: None,
        json_format: false,
        default_level: "info".to_string(),
    };
    // Keep the guard alive for the program duration
    let _log_guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    tracing::info!("Immersive Vout v{}", env!("CARGO_PKG_VERSION"));

    let settings = DisplaySettings::load();
    tracing::info!(pool_size = settings.pool_size, vsync = settings.vsync, "Display settings loaded");

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            tracing::error!("Failed to create event loop: {}", e);
            return;
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = VoutApp::new(settings);
    if let Err(e) = event_loop.run_app(&mut app) {
        tracing::error!("Event loop error: {}", e);
    }
}
