use std::sync::Arc;

use crate::MIMO::buffer::MimoBuffer;
use crate::MIMO::dtype::DataView;
use crate::MIMO::Structs::Buffer_Structs::MetadataView;

/// An observer for sampling records without consuming them.
///
/// [`Observer::acquire`] never blocks and must tolerate misses; the borrowed
/// slot goes back to the tail of the filled queue when the [`ObserveSlot`]
/// guard drops, so a real reader still receives it. The snapshot is only
/// valid during the guard's lifetime: once released, the slot may be
/// reclaimed and rewritten under overwrite pressure. Copy out anything you
/// need before dropping the guard.
pub struct Observer {
    buffer: Arc<MimoBuffer>,
}

impl Observer {
    pub fn new(buffer: Arc<MimoBuffer>) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> &MimoBuffer {
        &self.buffer
    }

    /// Borrow the oldest filled slot, if any.
    ///
    /// Returns `None` when nothing is filled right now and on end-of-stream;
    /// observers poll, they are never woken.
    pub fn acquire(&self) -> Option<ObserveSlot<'_>> {
        let index = self.buffer.get_observe_token()?;
        Some(ObserveSlot {
            buffer: &self.buffer,
            index,
        })
    }
}

/// A borrowed record, readable in place for the lifetime of the guard.
pub struct ObserveSlot<'a> {
    buffer: &'a MimoBuffer,
    index: u32,
}

impl<'a> ObserveSlot<'a> {
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

impl Drop for ObserveSlot<'_> {
    fn drop(&mut self) {
        self.buffer.return_observe_token(self.index);
    }
}
