//! Error types for Oxbow.

use thiserror::Error;

/// Result type alias using OxbowError.
pub type Result<T> = std::result::Result<T, OxbowError>;

/// Errors that can occur in Oxbow storage operations.
#[derive(Debug, Error)]
pub enum OxbowError {
    /// Every frame in the chosen replacement path was pinned. The request
    /// cannot be satisfied; retrying would risk an unbounded loop.
    #[error("no unpinned buffers available")]
    NoUnpinnedBuffers,

    /// Victim selection fell through every policy path. This is an internal
    /// invariant violation, not an operational condition.
    #[error("reached end of get_victim() without selecting a buffer")]
    VictimSearchExhausted,

    /// An integer policy value did not map to a known replacement policy.
    #[error("invalid buffer pool replacement policy {0}")]
    InvalidReplacementPolicy(i32),

    /// An integer access-strategy value did not map to a known kind.
    #[error("unrecognized buffer access strategy: {0}")]
    UnrecognizedAccessStrategy(i32),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },
}
