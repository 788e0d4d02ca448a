//! Error types shared by the wire codec, the impairment channel, and both
//! ARQ transports.

use std::io;

/// Errors surfaced across the crate's public API.
///
/// Protocol-normal events (out-of-window data, stale ACKs, malformed
/// frames, timeouts, oversized messages) are handled internally and never
/// produce one of these variants; only failures a caller could not
/// reasonably recover from on its own reach this type.
#[derive(Debug, thiserror::Error)]
pub enum ArteryError {
    /// The underlying datagram substrate failed (anything other than a
    /// timeout, which is reported as `Ok(0)` instead).
    #[error("datagram substrate error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ArteryError>;
