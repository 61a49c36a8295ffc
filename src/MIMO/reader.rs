use std::sync::Arc;

use crate::MIMO::buffer::MimoBuffer;
use crate::MIMO::dtype::DataView;
use crate::MIMO::Structs::Buffer_Structs::MetadataView;

/// A reader for consuming records from a MIMO buffer.
///
/// Each [`Reader::acquire`] call checks out one filled slot and yields a
/// [`ReadSlot`] guard; dropping the guard recycles the slot into the empty
/// queue on every exit path. Competing readers on the same buffer receive
/// disjoint records.
pub struct Reader {
    buffer: Arc<MimoBuffer>,
}

impl Reader {
    pub fn new(buffer: Arc<MimoBuffer>) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> &MimoBuffer {
        &self.buffer
    }

    /// Acquire the next filled slot, waiting for one if the buffer is empty.
    ///
    /// Returns `None` on end-of-stream: the flush sentinel has been observed
    /// (and re-broadcast for peer readers). The caller should wind down and
    /// flush its own sinks.
    pub fn acquire(&self) -> Option<ReadSlot<'_>> {
        let index = self.buffer.get_read_token()?;
        Some(ReadSlot {
            buffer: &self.buffer,
            index,
        })
    }
}

/// An acquired record, readable in place for the lifetime of the guard.
pub struct ReadSlot<'a> {
    buffer: &'a MimoBuffer,
    index: u32,
}

impl<'a> ReadSlot<'a> {
    /// In-place view of the slot's data array.
    pub fn data(&self) -> DataView<'_> {
        unsafe { self.buffer.data_view(Some(self.index)) }
    }

    /// In-place view of the slot's metadata record.
    pub fn metadata(&self) -> MetadataView<'_> {
        unsafe { self.buffer.metadata_view(Some(self.index)) }
    }

    pub fn parts(&self) -> (DataView<'_>, MetadataView<'_>) {
        (self.data(), self.metadata())
    }
}

impl Drop for ReadSlot<'_> {
    fn drop(&mut self) {
        self.buffer.return_read_token(self.index);
    }
}
