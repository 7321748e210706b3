//! Error types for the bridge serialization core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Shared memory error: {0}")]
    SharedMemory(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Returned by the native-shaped adapter interfaces when an index is out of
/// the declared range. This mirrors the plugin APIs' `kInvalidArgument`
/// result code: the caller checks it and reports failure through whatever
/// its own interface dictates, nothing is propagated further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid argument")]
pub struct InvalidArgument;
