use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use super::layout::QueueHeader;
use super::Queue::{QueueSlot, TokenQueue};
use crate::Core::futex::{futex_wait, futex_wake_all};

impl TokenQueue {
    /// Create a queue view over a control block and its cell band.
    ///
    /// # Safety
    /// `header` must point at an initialized [`QueueHeader`] whose capacity is
    /// a power of two, and `slots` at a band of at least `capacity` cells.
    /// Both must stay mapped for the lifetime of the view.
    pub unsafe fn new(header: *const QueueHeader, slots: *mut QueueSlot) -> Self {
        Self { header, slots }
    }

    /// Initialize per-cell sequence numbers to k for k in 0..capacity.
    /// Safety: caller guarantees exclusive access during initialization.
    pub unsafe fn init_slots(&self) {
        for k in 0..self.capacity() {
            self.slot(k).sequence.store(k as u64, Relaxed);
        }
    }

    #[inline]
    fn header(&self) -> &QueueHeader {
        unsafe { &*self.header }
    }

    #[inline]
    fn slot(&self, index: usize) -> &QueueSlot {
        unsafe { &*self.slots.add(index) }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.header().capacity as usize
    }

    /// Tokens currently enqueued. Racy by nature; suitable for stats only.
    pub fn len(&self) -> usize {
        let header = self.header();
        let tail = header.tail.load(Relaxed);
        let head = header.head.load(Relaxed);
        tail.saturating_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue a token. The protocol keeps at most `slot_count` indices plus
    /// one sentinel in circulation, so a full queue means a token was
    /// duplicated or returned twice; that is unrecoverable corruption.
    pub fn push(&self, value: u64) {
        let header = self.header();
        let mask = header.mask as usize;
        loop {
            let tail = header.tail.load(Relaxed);
            let cell = self.slot((tail as usize) & mask);
            let seq = cell.sequence.load(Acquire);
            let dif = seq as i64 - tail as i64;
            if dif == 0 {
                if header
                    .tail
                    .compare_exchange_weak(tail, tail + 1, AcqRel, Relaxed)
                    .is_ok()
                {
                    // We own this cell now
                    cell.value.store(value, Relaxed);
                    // publish
                    cell.sequence.store(tail + 1, Release);
                    self.wake_all();
                    return;
                }
                continue;
            } else if dif < 0 {
                panic!(
                    "token queue overflow: tail={tail} capacity={} (token returned twice?)",
                    header.capacity
                );
            } else {
                // someone else is producing; backoff and retry
                std::hint::spin_loop();
                continue;
            }
        }
    }

    /// Dequeue a token immediately, or report the queue empty.
    pub fn pop(&self) -> Option<u64> {
        let header = self.header();
        let mask = header.mask as usize;
        loop {
            let head = header.head.load(Relaxed);
            let cell = self.slot((head as usize) & mask);
            let seq = cell.sequence.load(Acquire);
            let dif = seq as i64 - (head as i64 + 1);
            if dif == 0 {
                if header
                    .head
                    .compare_exchange_weak(head, head + 1, AcqRel, Relaxed)
                    .is_ok()
                {
                    let value = cell.value.load(Relaxed);
                    // free the cell for future pushes
                    cell.sequence
                        .store(head + header.capacity, Release);
                    return Some(value);
                }
                continue;
            } else if dif < 0 {
                // empty
                return None;
            } else {
                // producer not finished; retry
                std::hint::spin_loop();
                continue;
            }
        }
    }

    /// Dequeue a token, sleeping on the epoch word while the queue is empty.
    ///
    /// `cancelled` is polled before every sleep and after every wakeup; when
    /// it reports true the wait is abandoned and `None` is returned. This is
    /// how flush propagates to writers blocked on the empty queue.
    pub fn pop_blocking<F: Fn() -> bool>(&self, cancelled: F) -> Option<u64> {
        loop {
            if let Some(value) = self.pop() {
                return Some(value);
            }
            if cancelled() {
                return None;
            }
            let epoch = self.header().epoch.load(Acquire);
            // The push may have landed between the failed pop and the epoch
            // read; recheck before committing to the wait.
            if let Some(value) = self.pop() {
                return Some(value);
            }
            if cancelled() {
                return None;
            }
            futex_wait(&self.header().epoch, epoch);
        }
    }

    /// Bump the epoch word and wake every sleeper on this queue.
    pub fn wake_all(&self) {
        self.header().epoch.fetch_add(1, Release);
        futex_wake_all(&self.header().epoch);
    }
}
