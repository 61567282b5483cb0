//! In-flight tracking of pooled pictures
//!
//! A slot stays busy from the moment its picture is uploaded until the GPU
//! reports it is done reading the transfer buffer. The tracker keeps a
//! strong reference to the picture for that whole time, which keeps the
//! slot out of the pool's free list.
//!
//! Pictures leased from a pool that has since been replaced are held apart
//! from the slot mask, so they never occupy a bit of the current pool.

use crate::gpu::Gpu;
use crate::video::{FrameRef, PictureSource};

use super::transfer::MAX_BUFFERS;

/// Bitset-indexed ledger of slots the GPU may still be reading
pub struct InFlightTracker<B> {
    /// Bit `i` set iff `frames[i]` is `Some`
    busy: u128,
    frames: Vec<Option<FrameRef<B>>>,
    /// Frames of a previous pool still read by the GPU
    detached: Vec<FrameRef<B>>,
}

impl<B> Default for InFlightTracker<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> InFlightTracker<B> {
    pub fn new() -> Self {
        Self {
            busy: 0,
            frames: (0..MAX_BUFFERS).map(|_| None).collect(),
            detached: Vec::new(),
        }
    }

    /// Record that `frame` occupies slot `index` on the GPU
    ///
    /// Returns `false` if the slot was already tracked, leaving it untouched.
    pub fn mark_busy(&mut self, index: usize, frame: &FrameRef<B>) -> bool {
        assert!(index < MAX_BUFFERS, "slot index {} out of range", index);
        let bit = 1u128 << index;
        if self.busy & bit != 0 {
            return false;
        }
        self.busy |= bit;
        self.frames[index] = Some(FrameRef::clone(frame));
        true
    }

    /// Keep a frame whose pool is gone until the GPU is done with it
    pub fn retain_detached(&mut self, frame: &FrameRef<B>) {
        if !self.detached.iter().any(|f| FrameRef::ptr_eq(f, frame)) {
            self.detached.push(FrameRef::clone(frame));
        }
    }

    /// Whether slot `index` is in flight
    pub fn is_busy(&self, index: usize) -> bool {
        index < MAX_BUFFERS && self.busy & (1u128 << index) != 0
    }

    /// Number of slots in flight
    pub fn busy_count(&self) -> usize {
        self.busy.count_ones() as usize
    }

    /// Number of frames from replaced pools still in flight
    pub fn detached_count(&self) -> usize {
        self.detached.len()
    }

    /// Release every tracked frame without asking the GPU
    pub fn release_all(&mut self) {
        let mut mask = self.busy;
        while mask != 0 {
            let index = mask.trailing_zeros() as usize;
            mask &= mask - 1;
            self.frames[index] = None;
        }
        self.busy = 0;
        self.detached.clear();
    }

    /// Poll the GPU for each busy slot and release the finished ones
    ///
    /// Never blocks. Returns the number of slots reclaimed.
    pub fn poll_and_reclaim<G>(&mut self, gpu: &G) -> usize
    where
        G: Gpu<Buffer = B>,
        B: crate::gpu::TransferBuffer,
    {
        let before = self.detached.len();
        self.detached.retain(|f| match f.source() {
            PictureSource::Pooled { buffer, .. } => gpu.poll_buffer(buffer),
            PictureSource::Copied(_) => false,
        });
        let mut reclaimed = before - self.detached.len();

        if self.busy == 0 {
            return reclaimed;
        }

        let mut mask = self.busy;
        while mask != 0 {
            let index = mask.trailing_zeros() as usize;
            mask &= mask - 1;

            let done = match self.frames[index].as_deref().map(|f| f.source()) {
                Some(PictureSource::Pooled { buffer, .. }) => !gpu.poll_buffer(buffer),
                // Nothing to wait for
                _ => true,
            };

            if done {
                self.busy &= !(1u128 << index);
                self.frames[index] = None;
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            tracing::trace!(reclaimed, still_busy = self.busy_count(), "Reclaimed slots");
        }
        reclaimed
    }
}
