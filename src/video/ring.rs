//! Bounded frame queue
//!
//! A fixed-capacity FIFO shared by the decode path (decoded frames waiting to
//! be presented) and the export path (readbacks waiting to be encoded).
//! Producers check `is_full()` and wait instead of overflowing.

use std::collections::VecDeque;

/// Fixed-capacity double-ended queue
#[derive(Debug)]
pub struct FrameRingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    /// Highest length observed since creation
    high_water: usize,
}

impl<T> FrameRingBuffer<T> {
    /// Create a queue holding at most `capacity` items (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            high_water: 0,
        }
    }

    /// Append to the back, handing the item back if the queue is full
    pub fn push_back(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push_back(item);
        self.high_water = self.high_water.max(self.items.len());
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }

    /// Pop the front item only if it satisfies `pred`
    pub fn pop_front_if(&mut self, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        match self.items.front() {
            Some(item) if pred(item) => self.items.pop_front(),
            _ => None,
        }
    }

    /// Remove every queued item in order
    pub fn drain(&mut self) -> std::collections::vec_deque::Drain<'_, T> {
        self.items.drain(..)
    }

    pub fn contains_where(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.items.iter().any(pred)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }
}
