use std::io;

use thiserror::Error;

/// Errors raised while constructing or attaching a buffer.
///
/// Token acquisition never appears here: a miss or a flush-triggered shutdown
/// is reported as `None` by the acquire calls, and protocol violations
/// (unknown token, double release, queue overflow) are fatal panics rather
/// than recoverable errors.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Rejected configuration: zero slot count, zero data length, an empty or
    /// duplicated dtype field, or an unusable buffer name.
    #[error("invalid buffer configuration: {0}")]
    Config(String),

    /// The OS refused the shared-memory operation, or the segment name is
    /// already taken on create.
    #[error("shared memory error: {0}")]
    SharedMemory(#[from] io::Error),

    /// An attached segment does not match the expected layout (magic,
    /// version, geometry or dtype checksum mismatch).
    #[error("incompatible buffer segment: {0}")]
    Incompatible(String),
}

pub type Result<T> = std::result::Result<T, BufferError>;
