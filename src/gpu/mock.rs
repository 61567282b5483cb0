//! In-memory GPU backend for tests
//!
//! Transfer buffers are plain byte vectors with a "GPU busy" flag that is
//! raised when a plane is uploaded from them and lowered by the test.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::settings::RenderParams;
use crate::video::{Chroma, Picture, PictureSource, PlaneFormat, PlaneKind};

use super::{
    Gpu, GpuError, Image, PlaneData, PlaneSource, Rect, RenderTarget, Renderer, Swapchain, SwapchainFrame,
    TransferBuffer,
};

pub const MOCK_PITCH_ALIGN: usize = 4;

// ═══════════════════════════════════════════════════════════════════════════════
// RESOURCES
// ═══════════════════════════════════════════════════════════════════════════════

pub struct MockBuffer {
    data: Mutex<Vec<u8>>,
    busy: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
}

impl MockBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

impl Drop for MockBuffer {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TransferBuffer for MockBuffer {
    fn size(&self) -> usize {
        self.data.lock().len()
    }

    fn with_mapped(&self, f: &mut dyn FnMut(&mut [u8])) -> Result<(), GpuError> {
        if self.is_busy() {
            return Err(GpuError::NotMapped);
        }
        let mut data = self.data.lock();
        f(data.as_mut_slice());
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockTexture {
    pub width: u32,
    pub height: u32,
    pub format: PlaneFormat,
    pub uploads: usize,
    /// Last uploaded texels, tightly packed
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockFbo {
    pub width: u32,
    pub height: u32,
}

// ═══════════════════════════════════════════════════════════════════════════════
// GPU
// ═══════════════════════════════════════════════════════════════════════════════

pub struct MockGpu {
    alloc_limit: Option<usize>,
    allocated: Cell<usize>,
    fail_plane: Option<usize>,
    unsupported: Vec<Chroma>,
    flags: RefCell<Vec<Arc<AtomicBool>>>,
    live: Arc<AtomicUsize>,
    polls: Cell<usize>,
    textures_created: Cell<usize>,
    pub clears: RefCell<Vec<[f32; 4]>>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self {
            alloc_limit: None,
            allocated: Cell::new(0),
            fail_plane: None,
            unsupported: Vec::new(),
            flags: RefCell::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
            polls: Cell::new(0),
            textures_created: Cell::new(0),
            clears: RefCell::new(Vec::new()),
        }
    }

    /// Buffer creation fails once `n` buffers exist
    pub fn fail_allocation_after(mut self, n: usize) -> Self {
        self.alloc_limit = Some(n);
        self
    }

    /// Uploads of plane `index` fail
    pub fn fail_upload_plane(mut self, index: usize) -> Self {
        self.fail_plane = Some(index);
        self
    }

    pub fn without_formats(mut self, chromas: &[Chroma]) -> Self {
        self.unsupported.extend_from_slice(chromas);
        self
    }

    pub fn set_fail_upload_plane(&mut self, index: Option<usize>) {
        self.fail_plane = index;
    }

    /// Force the busy state of a pooled picture's buffer
    pub fn set_busy(&self, pic: &Picture<MockBuffer>, busy: bool) {
        if let PictureSource::Pooled { buffer, .. } = pic.source() {
            buffer.busy.store(busy, Ordering::SeqCst);
        }
    }

    /// Signal completion of all GPU work
    pub fn complete_all(&self) {
        for flag in self.flags.borrow().iter() {
            flag.store(false, Ordering::SeqCst);
        }
    }

    pub fn poll_count(&self) -> usize {
        self.polls.get()
    }

    pub fn live_buffers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn textures_created(&self) -> usize {
        self.textures_created.get()
    }

    pub fn last_clear(&self) -> Option<[f32; 4]> {
        self.clears.borrow().last().copied()
    }
}

impl Gpu for MockGpu {
    type Buffer = MockBuffer;
    type Texture = MockTexture;
    type Fbo = MockFbo;

    fn pitch_alignment(&self) -> usize {
        MOCK_PITCH_ALIGN
    }

    fn format_supported(&self, chroma: Chroma) -> bool {
        !self.unsupported.contains(&chroma)
    }

    fn create_transfer_buffer(&self, size: usize) -> Result<MockBuffer, GpuError> {
        if self.alloc_limit.is_some_and(|limit| self.allocated.get() >= limit) {
            return Err(GpuError::OutOfMemory(format!("{} bytes", size)));
        }
        self.allocated.set(self.allocated.get() + 1);
        self.live.fetch_add(1, Ordering::SeqCst);
        let busy = Arc::new(AtomicBool::new(false));
        self.flags.borrow_mut().push(Arc::clone(&busy));
        Ok(MockBuffer {
            data: Mutex::new(vec![0; size]),
            busy,
            live: Arc::clone(&self.live),
        })
    }

    fn poll_buffer(&self, buffer: &MockBuffer) -> bool {
        self.polls.set(self.polls.get() + 1);
        buffer.is_busy()
    }

    fn upload_plane(
        &self,
        texture: &mut Option<MockTexture>,
        data: &PlaneData<'_, MockBuffer>,
    ) -> Result<(), GpuError> {
        if self.fail_plane == Some(data.index) {
            return Err(GpuError::Device(format!("injected failure on plane {}", data.index)));
        }

        let row = data.width as usize * data.format.bytes_per_texel();
        let mut texels = Vec::with_capacity(row * data.height as usize);
        match &data.source {
            PlaneSource::Buffer { buffer, offset } => {
                let offset = *offset;
                if offset % MOCK_PITCH_ALIGN != 0 {
                    return Err(GpuError::Unaligned(format!("offset {}", offset)));
                }
                let bytes = buffer.data.lock();
                for line in 0..data.height as usize {
                    let start = offset + line * data.pitch;
                    texels.extend_from_slice(&bytes[start..start + row]);
                }
                buffer.busy.store(true, Ordering::SeqCst);
            }
            PlaneSource::Host(bytes) => {
                if bytes.len() < data.byte_len() {
                    return Err(GpuError::InvalidPlane(format!(
                        "{} bytes for {}",
                        bytes.len(),
                        data.byte_len()
                    )));
                }
                for line in 0..data.height as usize {
                    let start = line * data.pitch;
                    texels.extend_from_slice(&bytes[start..start + row]);
                }
            }
        }

        let reuse = matches!(texture, Some(t) if t.width == data.width && t.height == data.height && t.format == data.format);
        if !reuse {
            self.textures_created.set(self.textures_created.get() + 1);
            *texture = Some(MockTexture {
                width: data.width,
                height: data.height,
                format: data.format,
                uploads: 0,
                data: Vec::new(),
            });
        }
        if let Some(tex) = texture.as_mut() {
            tex.uploads += 1;
            tex.data = texels;
        }
        Ok(())
    }

    fn clear(&self, _fbo: &MockFbo, rgba: [f32; 4]) {
        self.clears.borrow_mut().push(rgba);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SWAPCHAIN
// ═══════════════════════════════════════════════════════════════════════════════

pub struct MockSwapchain {
    pub width: u32,
    pub height: u32,
    pub ready: bool,
    pub submit_ok: bool,
    pub started: usize,
    pub submitted: usize,
    pub swapped: usize,
}

impl MockSwapchain {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ready: true,
            submit_ok: true,
            started: 0,
            submitted: 0,
            swapped: 0,
        }
    }
}

impl Swapchain<MockGpu> for MockSwapchain {
    fn start_frame(&mut self) -> Option<SwapchainFrame<MockFbo>> {
        if !self.ready {
            return None;
        }
        self.started += 1;
        Some(SwapchainFrame {
            fbo: MockFbo {
                width: self.width,
                height: self.height,
            },
            width: self.width,
            height: self.height,
        })
    }

    fn submit_frame(&mut self) -> bool {
        self.submitted += 1;
        self.submit_ok
    }

    fn swap_buffers(&mut self) {
        self.swapped += 1;
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERER
// ═══════════════════════════════════════════════════════════════════════════════

/// What the renderer saw for one call
#[derive(Debug, Clone)]
pub struct RenderCall {
    pub signature: u64,
    pub src_rect: Rect,
    pub dst_rect: Rect,
    pub kinds: Vec<PlaneKind>,
    pub shifts: Vec<(f32, f32)>,
    pub overlays: usize,
    pub params: RenderParams,
}

pub struct MockRenderer {
    pub succeed: bool,
    pub calls: Vec<RenderCall>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self {
            succeed: true,
            calls: Vec::new(),
        }
    }
}

impl Renderer<MockGpu> for MockRenderer {
    fn render(
        &mut self,
        _gpu: &MockGpu,
        image: &Image<'_, MockTexture>,
        target: &RenderTarget<'_, MockFbo>,
        params: &RenderParams,
    ) -> bool {
        self.calls.push(RenderCall {
            signature: image.signature,
            src_rect: image.src_rect,
            dst_rect: target.dst_rect,
            kinds: image.planes.iter().map(|p| p.kind).collect(),
            shifts: image.planes.iter().map(|p| (p.shift_x, p.shift_y)).collect(),
            overlays: target.overlays.len(),
            params: params.clone(),
        });
        self.succeed
    }
}
