use crate::MIMO::Queue::Queue::QueueSlot;
use crossbeam_utils::CachePadded;
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64};

/// Current version of the shared segment layout.
pub const LAYOUT_VERSION: u32 = 1;

/// A "magic number" identifying a segment as a MIMO ring buffer.
pub const MAGIC_NUMBER: u64 = 0x4D494D4F5F524221; // "MIMO_RB!"

/// Control block of one token queue, embedded in the [`BufferHeader`].
///
/// The queue's slot array lives elsewhere in the segment (at `slots_offset`);
/// only the cursors and the wait word are kept here so that both queues of a
/// buffer share one control page.
#[repr(C)]
pub struct QueueHeader {
    /// Capacity of the queue in slots. Always a power of two so the cursors
    /// can be wrapped with a bitwise AND.
    pub capacity: u64,

    /// The bitmask for this queue, calculated as `capacity - 1`.
    pub mask: u64,

    /// Byte offset from the start of the segment to this queue's slot array.
    pub slots_offset: u64,

    /// Wait word for blocking consumers. Bumped on every push and on flush;
    /// sleepers futex-wait on it.
    pub epoch: AtomicU32,

    pub _pad: u32,

    /// The "tail" cursor for producers. Atomically incremented to claim a slot for writing.
    /// Padded to prevent false sharing with the head cursor.
    pub tail: CachePadded<AtomicU64>,

    /// The "head" cursor for consumers. Atomically incremented to claim a slot for reading.
    /// Padded to prevent false sharing with the tail cursor.
    pub head: CachePadded<AtomicU64>,
}

/// The global header located at the very beginning of a buffer's segment.
///
/// It acts as the entry point for any process: immutable geometry first,
/// then the shared counters and flags, then the two queue control blocks.
#[repr(C)]
pub struct BufferHeader {
    /// Identifies the segment as a MIMO ring buffer.
    pub magic: u64,

    /// The version of the memory layout.
    pub version: u32,

    /// Overwrite policy flag (0 or 1). Immutable after construction.
    pub overwrite: u32,

    /// Number of data slots in the segment.
    pub slot_count: u64,

    /// Elements per slot's data array.
    pub data_length: u64,

    /// Byte size of one slot's data array (`data_length * dtype.size()`).
    pub data_bytes: u64,

    /// Byte size of one full slot (data array + metadata record).
    pub slot_bytes: u64,

    /// FNV-1a checksum over the data dtype's field names and codes, used to
    /// reject attaches with a mismatched record layout.
    pub dtype_checksum: u64,

    /// Byte offset from the start of the segment to slot 0.
    pub data_offset: u64,

    /// Byte offset from the start of the segment to the trash slot used while
    /// the buffer is paused.
    pub trash_offset: u64,

    /// Total successful writes. The value after each increment is stamped
    /// into the written slot's metadata counter.
    pub event_count: CachePadded<AtomicU64>,

    /// Filled slots reclaimed by writers under overwrite pressure.
    pub overwrite_count: CachePadded<AtomicU64>,

    /// Writes discarded whilst the buffer was paused.
    pub paused_count: AtomicU64,

    /// Accumulated metadata deadtime, stored as f64 bits.
    pub total_deadtime_bits: AtomicU64,

    /// Pause flag (0 or 1). While set, write sessions are served the trash slot.
    pub paused: AtomicU32,

    /// Set once `send_flush_event` has enqueued the sentinel. Later calls
    /// become no-ops and writers stop acquiring tokens.
    pub flush_sent: AtomicU32,

    /// Set by the first reader that consumes the flush sentinel.
    pub flush_received: AtomicU32,

    pub _pad: u32,

    /// Control block of the empty-token queue.
    pub empty: QueueHeader,

    /// Control block of the filled-token queue.
    pub filled: QueueHeader,
}

/// Byte offsets of every region inside a buffer segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    pub queue_capacity: usize,
    pub empty_slots_offset: usize,
    pub filled_slots_offset: usize,
    pub data_offset: usize,
    pub trash_offset: usize,
    pub total_size: usize,
}

/// Round up to the next multiple of 128 bytes.
pub const fn align128(value: usize) -> usize {
    (value + 127) & !127
}

/// Compute the region offsets for a buffer with `slot_count` slots of
/// `slot_bytes` each. Every region starts 128-byte aligned.
///
/// Queue capacity is `slot_count` tokens plus headroom for the flush sentinel,
/// rounded up to a power of two.
pub fn segment_layout(slot_count: usize, slot_bytes: usize) -> SegmentLayout {
    let queue_capacity = (slot_count + 2).next_power_of_two();
    let queue_band = queue_capacity * size_of::<QueueSlot>();

    let empty_slots_offset = align128(size_of::<BufferHeader>());
    let filled_slots_offset = align128(empty_slots_offset + queue_band);
    let data_offset = align128(filled_slots_offset + queue_band);
    let trash_offset = align128(data_offset + slot_count * slot_bytes);
    let total_size = align128(trash_offset + slot_bytes);

    SegmentLayout {
        queue_capacity,
        empty_slots_offset,
        filled_slots_offset,
        data_offset,
        trash_offset,
        total_size,
    }
}
