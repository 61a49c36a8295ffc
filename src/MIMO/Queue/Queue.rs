// This is the cross-process FIFO of slot tokens - one per direction (empty, filled)

use crate::MIMO::Queue::layout::QueueHeader;
use std::sync::atomic::AtomicU64;

/// One cell of a token queue, based on the Vyukov MPMC design.
///
/// It is marked `#[repr(C)]` to ensure a defined and stable memory layout,
/// which is critical for shared memory and inter-process communication.
#[repr(C)]
pub struct QueueSlot {
    /// The sequence number of the cell. This is the core of the synchronization.
    /// - A producer claims a `tail` sequence and waits for the `sequence` in
    ///   the target cell to equal `tail`.
    /// - After writing, it sets the `sequence` to `tail + 1`, signaling completion.
    /// - A consumer waits for the `sequence` in its `head` cell to equal
    ///   `head + 1`, and frees the cell by setting it to `head + capacity`.
    pub sequence: AtomicU64,

    /// The token carried by this cell: a slot index, or the flush sentinel.
    pub value: AtomicU64,
}

/// A multi-producer, multi-consumer FIFO of slot tokens, shared across processes.
///
/// The cursors and the wait word live in the segment's [`QueueHeader`]; the
/// cell array lives in a band of the same segment. Any process that maps the
/// segment can push and pop.
///
/// ### Concurrency Design:
/// - **Push**: producers claim a cell by atomically incrementing `tail`,
///   publish the token, then bump the epoch word and wake sleepers.
/// - **Pop**: consumers claim a token by atomically incrementing `head`.
///   Competing consumers always receive disjoint tokens, which is what makes
///   the consumption contract of the filled queue hold.
/// - **Blocking**: a consumer that finds the queue empty futex-waits on the
///   epoch word; every push wakes all sleepers. Spurious wakeups only cost a
///   retry of the pop loop.
pub struct TokenQueue {
    /// Control block of this queue inside the segment header.
    pub(crate) header: *const QueueHeader,

    /// First cell of this queue's band.
    pub(crate) slots: *mut QueueSlot,
}

unsafe impl Send for TokenQueue {}
unsafe impl Sync for TokenQueue {}
