//! Transfer buffer pool
//!
//! A fixed set of slots, each owning one host-mapped transfer buffer (or a
//! plain host allocation when the copy-based fallback is in use). Slots are
//! leased to pictures and come back through a return channel when the last
//! reference to the picture drops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use crate::error::VoutError;
use crate::gpu::{Gpu, TransferBuffer};
use crate::video::{Picture, PictureLayout, VideoFormat};

/// Hard ceiling on pool capacity, one bit per slot in the in-flight mask
pub const MAX_BUFFERS: usize = 128;

/// Fewer slots than this and a mapped pool is not worth keeping
pub const MIN_MAPPED_SLOTS: usize = 2;

/// Source of pool generations, 0 is never handed out
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

// ═══════════════════════════════════════════════════════════════════════════════
// SLOTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Memory behind a slot
pub enum Backing<B> {
    /// GPU-visible transfer buffer, uploaded from without copying
    Mapped(B),
    /// Host allocation, copied into the texture on upload
    Host(Vec<u8>),
}

/// One reusable buffer bound to one pooled picture
pub struct Slot<B> {
    index: usize,
    /// Generation of the pool that owns the slot, 0 when unpooled
    generation: u64,
    backing: Backing<B>,
}

impl<B: TransferBuffer> Slot<B> {
    pub(crate) fn new(index: usize, backing: Backing<B>) -> Self {
        Self {
            index,
            generation: 0,
            backing,
        }
    }

    /// Position in the pool, `0..capacity`
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn backing(&self) -> &Backing<B> {
        &self.backing
    }

    pub(crate) fn backing_mut(&mut self) -> &mut Backing<B> {
        &mut self.backing
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        match &self.backing {
            Backing::Mapped(buffer) => buffer.size(),
            Backing::Host(data) => data.len(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSFER POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Freshly allocated mapped slots for one picture layout
pub struct TransferPool<B> {
    pub layout: Arc<PictureLayout>,
    pub slots: Vec<Slot<B>>,
}

impl<B: TransferBuffer> TransferPool<B> {
    /// Allocate up to `capacity` transfer buffers sized for `layout`
    ///
    /// Keeps a partial pool when at least [`MIN_MAPPED_SLOTS`] buffers could
    /// be allocated. Below that the buffers are dropped and an allocation
    /// error is returned so the caller can fall back to host pictures.
    pub fn allocate<G>(gpu: &G, layout: PictureLayout, capacity: usize) -> Result<Self, VoutError>
    where
        G: Gpu<Buffer = B>,
    {
        let capacity = clamp_capacity(capacity);
        let size = layout.size();
        let mut slots = Vec::with_capacity(capacity);

        for index in 0..capacity {
            match gpu.create_transfer_buffer(size) {
                Ok(buffer) => slots.push(Slot::new(index, Backing::Mapped(buffer))),
                Err(e) => {
                    tracing::warn!(
                        allocated = slots.len(),
                        requested = capacity,
                        error = %e,
                        "Transfer buffer allocation failed"
                    );
                    break;
                }
            }
        }

        if slots.len() < MIN_MAPPED_SLOTS {
            return Err(VoutError::Allocation(format!(
                "only {} of {} transfer buffers ({} bytes each)",
                slots.len(),
                capacity,
                size
            )));
        }

        tracing::debug!(count = slots.len(), size, "Allocated transfer buffers");

        Ok(Self {
            layout: Arc::new(layout),
            slots,
        })
    }
}

fn clamp_capacity(capacity: usize) -> usize {
    if capacity > MAX_BUFFERS {
        tracing::warn!(
            requested = capacity,
            max = MAX_BUFFERS,
            "Pool capacity above ceiling, clamping"
        );
        MAX_BUFFERS
    } else {
        capacity
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PICTURE POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounded pool of pictures handed to the decoder
pub struct PicturePool<B> {
    format: VideoFormat,
    /// Distinguishes this pool's slots from those of earlier pools
    generation: u64,
    layout: Arc<PictureLayout>,
    /// Parked slots by index, `None` while leased
    parked: Vec<Option<Slot<B>>>,
    /// Bit `i` set when slot `i` is parked
    free: u128,
    returns_tx: Sender<Slot<B>>,
    returns_rx: Receiver<Slot<B>>,
    mapped: bool,
}

impl<B: TransferBuffer> PicturePool<B> {
    /// Pool over previously allocated transfer buffers
    pub fn mapped(format: VideoFormat, transfer: TransferPool<B>) -> Self {
        Self::from_slots(format, transfer.layout, transfer.slots, true)
    }

    /// Copy-based fallback pool of `capacity` host pictures
    pub fn copied(format: VideoFormat, layout: PictureLayout, capacity: usize) -> Self {
        let capacity = clamp_capacity(capacity.max(1));
        let size = layout.size();
        let slots = (0..capacity)
            .map(|index| Slot::new(index, Backing::Host(vec![0; size])))
            .collect();
        Self::from_slots(format, Arc::new(layout), slots, false)
    }

    fn from_slots(format: VideoFormat, layout: Arc<PictureLayout>, slots: Vec<Slot<B>>, mapped: bool) -> Self {
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        let (returns_tx, returns_rx) = mpsc::channel();
        let mut parked: Vec<Option<Slot<B>>> = (0..slots.len()).map(|_| None).collect();
        let mut free = 0u128;
        for mut slot in slots {
            slot.generation = generation;
            free |= 1u128 << slot.index;
            let index = slot.index;
            parked[index] = Some(slot);
        }
        Self {
            format,
            generation,
            layout,
            parked,
            free,
            returns_tx,
            returns_rx,
            mapped,
        }
    }

    /// Lease the lowest-index free slot as a picture
    ///
    /// Returns `None` when every slot is leased or still in flight.
    pub fn get(&mut self) -> Option<Picture<B>> {
        self.collect_returns();
        if self.free == 0 {
            return None;
        }
        let index = self.free.trailing_zeros() as usize;
        self.free &= !(1u128 << index);
        let slot = self.parked[index].take()?;
        Some(Picture::pooled(
            self.format.clone(),
            Arc::clone(&self.layout),
            slot,
            self.returns_tx.clone(),
        ))
    }

    fn collect_returns(&mut self) {
        while let Ok(slot) = self.returns_rx.try_recv() {
            let index = slot.index;
            self.free |= 1u128 << index;
            self.parked[index] = Some(slot);
        }
    }

    /// Whether pictures are backed by GPU transfer buffers
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Identity of this pool, unique within the process
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.parked.len()
    }

    /// Number of slots ready to be leased
    pub fn available(&mut self) -> usize {
        self.collect_returns();
        self.free.count_ones() as usize
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    pub fn layout(&self) -> &PictureLayout {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::mock::MockGpu;
    use crate::video::Chroma;

    fn layout(gpu: &MockGpu) -> PictureLayout {
        PictureLayout::new(Chroma::I420, 64, 32, gpu.pitch_alignment()).unwrap()
    }

    #[test]
    fn test_allocates_exact_capacity() {
        let gpu = MockGpu::new();
        let pool = TransferPool::allocate(&gpu, layout(&gpu), 6).unwrap();
        assert_eq!(pool.slots.len(), 6);
        for (i, slot) in pool.slots.iter().enumerate() {
            assert_eq!(slot.index(), i);
            assert_eq!(slot.size(), pool.layout.size());
        }
    }

    #[test]
    fn test_partial_pool_kept() {
        let gpu = MockGpu::new().fail_allocation_after(3);
        let pool = TransferPool::allocate(&gpu, layout(&gpu), 8).unwrap();
        assert_eq!(pool.slots.len(), 3);
    }

    #[test]
    fn test_pool_never_below_two_slots() {
        for working in 0..4 {
            let gpu = MockGpu::new().fail_allocation_after(working);
            match TransferPool::allocate(&gpu, layout(&gpu), 8) {
                Ok(pool) => {
                    assert!(pool.slots.len() >= MIN_MAPPED_SLOTS);
                    assert_eq!(pool.slots.len(), working);
                }
                Err(e) => {
                    assert!(working < MIN_MAPPED_SLOTS);
                    assert!(matches!(e, VoutError::Allocation(_)));
                }
            }
        }
    }

    #[test]
    fn test_capacity_clamped() {
        let gpu = MockGpu::new();
        let pool = TransferPool::allocate(&gpu, layout(&gpu), 500).unwrap();
        assert_eq!(pool.slots.len(), MAX_BUFFERS);
    }

    #[test]
    fn test_get_lowest_free_and_exhaustion() {
        let gpu = MockGpu::new();
        let fmt = VideoFormat::new(Chroma::I420, 64, 32);
        let transfer = TransferPool::allocate(&gpu, layout(&gpu), 3).unwrap();
        let mut pool = PicturePool::mapped(fmt, transfer);
        assert!(pool.is_mapped());

        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        let c = pool.get().unwrap();
        assert_eq!(a.slot_index(), Some(0));
        assert_eq!(b.slot_index(), Some(1));
        assert_eq!(c.slot_index(), Some(2));
        assert!(pool.get().is_none());

        drop(b);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.get().unwrap().slot_index(), Some(1));
    }

    #[test]
    fn test_slot_returns_after_last_reference() {
        let gpu = MockGpu::new();
        let fmt = VideoFormat::new(Chroma::I420, 64, 32);
        let transfer = TransferPool::allocate(&gpu, layout(&gpu), 2).unwrap();
        let mut pool = PicturePool::mapped(fmt, transfer);

        let frame = Arc::new(pool.get().unwrap());
        let extra = Arc::clone(&frame);
        drop(frame);
        assert_eq!(pool.available(), 1);
        drop(extra);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_picture_outlives_pool() {
        let gpu = MockGpu::new();
        let fmt = VideoFormat::new(Chroma::I420, 64, 32);
        let transfer = TransferPool::allocate(&gpu, layout(&gpu), 2).unwrap();
        let mut pool = PicturePool::mapped(fmt, transfer);
        let pic = pool.get().unwrap();
        drop(pool);
        // The slot has nowhere to go and is destroyed with the picture
        drop(pic);
        assert_eq!(gpu.live_buffers(), 0);
    }

    #[test]
    fn test_pools_have_distinct_generations() {
        let gpu = MockGpu::new();
        let fmt = VideoFormat::new(Chroma::I420, 64, 32);
        let mut first = PicturePool::mapped(fmt.clone(), TransferPool::allocate(&gpu, layout(&gpu), 2).unwrap());
        let mut second = PicturePool::mapped(fmt, TransferPool::allocate(&gpu, layout(&gpu), 2).unwrap());
        assert_ne!(first.generation(), second.generation());

        let a = first.get().unwrap();
        let b = second.get().unwrap();
        assert_eq!(a.slot_index(), b.slot_index());
        assert_eq!(a.pool_generation(), Some(first.generation()));
        assert_eq!(b.pool_generation(), Some(second.generation()));
    }

    #[test]
    fn test_copied_pool() {
        let fmt = VideoFormat::new(Chroma::Nv12, 32, 16);
        let layout = PictureLayout::new(Chroma::Nv12, 32, 16, 16).unwrap();
        let size = layout.size();
        let mut pool: PicturePool<crate::gpu::mock::MockBuffer> = PicturePool::copied(fmt, layout, 4);
        assert!(!pool.is_mapped());
        assert_eq!(pool.capacity(), 4);
        let pic = pool.get().unwrap();
        match pic.source() {
            crate::video::PictureSource::Copied(bytes) => assert_eq!(bytes.len(), size),
            crate::video::PictureSource::Pooled { .. } => panic!("expected host picture"),
        }
    }
}
