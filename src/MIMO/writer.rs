use std::sync::Arc;

use crate::MIMO::buffer::MimoBuffer;
use crate::MIMO::dtype::DataViewMut;
use crate::MIMO::Structs::Buffer_Structs::{MetadataViewMut, WriteToken};

/// A writer for publishing records into a MIMO buffer.
///
/// Each [`Writer::acquire`] call checks out one slot for exclusive mutation
/// and yields a [`WriteSlot`] guard; dropping the guard publishes the record
/// to readers on every exit path, including panics. The writer also carries
/// the shutdown hook for its buffer: a worker that runs out of input releases
/// its sinks by calling [`Writer::send_flush_event`].
pub struct Writer {
    buffer: Arc<MimoBuffer>,
}

impl Writer {
    pub fn new(buffer: Arc<MimoBuffer>) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> &MimoBuffer {
        &self.buffer
    }

    /// Acquire a slot for writing.
    ///
    /// Blocks while every slot is checked out and the overwrite policy
    /// forbids reclaiming one. Returns `None` once a flush event has been
    /// sent on this buffer; the caller should wind down and flush its own
    /// sinks.
    pub fn acquire(&self) -> Option<WriteSlot<'_>> {
        let token = self.buffer.get_write_token()?;
        Some(WriteSlot {
            buffer: &self.buffer,
            token: Some(token),
        })
    }

    /// Signal end-of-stream to this buffer's readers.
    pub fn send_flush_event(&self) {
        self.buffer.send_flush_event();
    }
}

/// An acquired slot, writable in place for the lifetime of the guard.
///
/// The record is published (or discarded, while the buffer is paused) when
/// the guard drops.
pub struct WriteSlot<'a> {
    buffer: &'a MimoBuffer,
    token: Option<WriteToken>,
}

impl<'a> WriteSlot<'a> {
    fn slot(&self) -> Option<u32> {
        match self.token {
            Some(WriteToken::Slot(index)) => Some(index),
            _ => None,
        }
    }

    /// True while the buffer is paused and this write lands in the trash
    /// slot instead of the pool.
    pub fn is_discarded(&self) -> bool {
        matches!(self.token, Some(WriteToken::Trash))
    }

    /// In-place view of the slot's data array.
    pub fn data(&mut self) -> DataViewMut<'_> {
        unsafe { self.buffer.data_view_mut(self.slot()) }
    }

    /// In-place view of the slot's metadata record. Fields left at zero are
    /// stamped by the buffer on release.
    pub fn metadata(&mut self) -> MetadataViewMut<'_> {
        unsafe { self.buffer.metadata_view_mut(self.slot()) }
    }

    /// Both views at once, for workers that fill data and metadata together.
    pub fn parts(&mut self) -> (DataViewMut<'_>, MetadataViewMut<'_>) {
        let slot = self.slot();
        unsafe {
            (
                self.buffer.data_view_mut(slot),
                self.buffer.metadata_view_mut(slot),
            )
        }
    }
}

impl Drop for WriteSlot<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.buffer.return_write_token(token);
        }
    }
}
