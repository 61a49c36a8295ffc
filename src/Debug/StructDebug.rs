use std::fmt;

use crate::MIMO::MimoBuffer;
use crate::MIMO::Queue::TokenQueue;

/// Debug function for MimoBuffer
///
/// Provides a safe debug representation that shows:
/// - Name and geometry
/// - Queue occupancy at the time of the call (racy, informational only)
/// - Flush and pause state
pub fn debug_mimo_buffer(buffer: &MimoBuffer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MimoBuffer")
        .field("name", &buffer.name())
        .field("slot_count", &buffer.slot_count())
        .field("data_length", &buffer.data_length())
        .field("overwrite", &buffer.overwrite())
        .field("empty", &buffer.empty_count())
        .field("filled", &buffer.filled_count())
        .field("flush_received", &buffer.flush_received())
        .field("paused", &buffer.is_paused())
        .finish()
}

/// Debug function for TokenQueue
///
/// Safely displays occupancy without walking the cell band
pub fn debug_token_queue(queue: &TokenQueue, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TokenQueue")
        .field("capacity", &queue.capacity())
        .field("len", &queue.len())
        .finish_non_exhaustive()
}

impl fmt::Debug for MimoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_mimo_buffer(self, f)
    }
}

impl fmt::Debug for TokenQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_token_queue(self, f)
    }
}
