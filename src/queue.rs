//! Bounded FIFO of pending single-register writes.

use heapless::Deque;

/// Default number of writes that may be waiting at once.
pub const WRITE_QUEUE_CAPACITY: usize = 16;

/// One register write waiting for its transmit slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingWrite {
    pub index: u16,
    pub value: u16,
}

/// Ring buffer of [`PendingWrite`]s. Duplicates are kept; coalescing happens when draining.
#[derive(Debug)]
pub struct WriteQueue<const C: usize = WRITE_QUEUE_CAPACITY> {
    writes: Deque<PendingWrite, C>,
}

impl<const C: usize> Default for WriteQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const C: usize> WriteQueue<C> {
    pub const fn new() -> Self {
        Self {
            writes: Deque::new(),
        }
    }

    /// Append a write. Returns `false` and leaves the queue untouched when full.
    pub fn push(&mut self, index: u16, value: u16) -> bool {
        self.writes.push_back(PendingWrite { index, value }).is_ok()
    }

    pub fn pop(&mut self) -> Option<PendingWrite> {
        self.writes.pop_front()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.writes.is_full()
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }
}
