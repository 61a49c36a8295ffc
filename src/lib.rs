// Module naming follows project convention (MIMO = Multiple In Multiple Out)
#[allow(non_snake_case)]
pub mod MIMO;

pub mod error;

// Debug implementations for various types
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

#[allow(non_snake_case)]
pub mod Core {
    pub mod SharedMemory;
    pub use SharedMemory::{SharedMemoryBackend, RawHandle, create_shared_memory, attach_shared_memory};
    pub mod futex;
}

pub use error::{BufferError, Result};
