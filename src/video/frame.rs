//! Decoded frame storage
//!
//! Native frames are allocated once at load time into a fixed pool and cycled
//! between the decode thread and the presentation stage. A slot is either
//! resting in the pool or owned by exactly one `DecodedFrame`.

/// A pooled native frame together with its presentation timestamp
#[derive(Debug)]
pub struct DecodedFrame<F> {
    /// Pool slot this storage belongs to
    slot: usize,
    /// Native frame storage (reused between packets)
    pub storage: F,
    /// Presentation timestamp in stream time base ticks
    pub pts: i64,
}

impl<F> DecodedFrame<F> {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// Fixed arena of reusable frames with a rotating acquire cursor
#[derive(Debug)]
pub struct FramePool<F> {
    /// `None` while the slot is checked out
    slots: Vec<Option<F>>,
    /// Next slot to try
    cursor: usize,
}

impl<F> FramePool<F> {
    /// Allocate `size` frames up front
    pub fn new(size: usize, mut allocate: impl FnMut() -> F) -> Self {
        let slots = (0..size.max(1)).map(|_| Some(allocate())).collect();
        Self { slots, cursor: 0 }
    }

    /// Check out the next free slot, scanning forward from the cursor
    pub fn acquire(&mut self) -> Option<DecodedFrame<F>> {
        let len = self.slots.len();
        for offset in 0..len {
            let slot = (self.cursor + offset) % len;
            if let Some(storage) = self.slots[slot].take() {
                self.cursor = (slot + 1) % len;
                return Some(DecodedFrame {
                    slot,
                    storage,
                    pts: 0,
                });
            }
        }
        None
    }

    /// Return a frame to its slot
    pub fn release(&mut self, frame: DecodedFrame<F>) {
        let DecodedFrame { slot, storage, .. } = frame;
        debug_assert!(self.slots[slot].is_none(), "frame slot {} released twice", slot);
        self.slots[slot] = Some(storage);
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently resting in the pool
    pub fn available(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Slots currently checked out
    pub fn in_use(&self) -> usize {
        self.capacity() - self.available()
    }
}
