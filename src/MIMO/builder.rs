use crate::error::{BufferError, Result};
use crate::MIMO::buffer::MimoBuffer;
use crate::MIMO::dtype::StructuredDtype;

/// Builder for creating or attaching to a named MIMO buffer.
pub struct BufferBuilder {
    name: String,
    slot_count: usize,
    data_length: usize,
    data_dtype: Option<StructuredDtype>,
    overwrite: bool,
}

impl BufferBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot_count: 16,
            data_length: 1,
            data_dtype: None,
            overwrite: true, // Default policy: reclaim oldest under pressure
        }
    }

    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    pub fn with_data_length(mut self, data_length: usize) -> Self {
        self.data_length = data_length;
        self
    }

    pub fn with_dtype(mut self, data_dtype: StructuredDtype) -> Self {
        self.data_dtype = Some(data_dtype);
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    fn dtype(&mut self) -> Result<StructuredDtype> {
        self.data_dtype
            .take()
            .ok_or_else(|| BufferError::Config("data dtype is required".into()))
    }

    /// Create the buffer segment. Fails if the name is already taken on this
    /// host.
    pub fn create(mut self) -> Result<MimoBuffer> {
        let dtype = self.dtype()?;
        MimoBuffer::create(
            &self.name,
            self.slot_count,
            self.data_length,
            dtype,
            self.overwrite,
        )
    }

    /// Attach to an existing buffer segment of the same name.
    ///
    /// Geometry and the overwrite policy are read from the segment header;
    /// the dtype set on this builder is validated against it. Slot count and
    /// data length settings are ignored here.
    pub fn attach(mut self) -> Result<MimoBuffer> {
        let dtype = self.dtype()?;
        MimoBuffer::attach(&self.name, dtype)
    }
}
