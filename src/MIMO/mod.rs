mod buffer;
mod builder;
mod observer;
mod reader;
mod writer;

pub mod dtype;

pub use buffer::MimoBuffer;
pub use builder::BufferBuilder;
pub use dtype::{DataView, DataViewMut, FieldView, FieldViewMut, ScalarType, StructuredDtype};
pub use observer::{ObserveSlot, Observer};
pub use reader::{ReadSlot, Reader};
pub use writer::{WriteSlot, Writer};

pub mod Queue {
    pub mod Queue;
    pub mod Queue_impl;
    pub mod layout;
    pub use Queue::{QueueSlot, TokenQueue}; // re-export for stable path
}

pub mod Structs {
    pub mod Buffer_Structs;
    pub use Buffer_Structs::{
        BufferStats, Metadata, MetadataView, MetadataViewMut, Token, WriteToken, FLUSH_TOKEN,
        METADATA_BYTES,
    }; // re-export for stable path
}
