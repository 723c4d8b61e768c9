//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur during sync operations.
///
/// Peer unavailability is deliberately *not* an error: transient network
/// failures resolve by advancing to the next candidate and surface to the
/// owner only as [`crate::SyncNotice`] values.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level send or connection failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Envelope (de)serialization failed.
    #[error("codec error: {0}")]
    Codec(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
