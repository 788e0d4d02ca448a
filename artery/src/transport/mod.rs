//! The shared ARQ transport contract, and the two implementations behind it.
//!
//! [`Transport`] replaces the compile-time GBN/SR symbol-selection shim
//! described in the design notes: [`new_gbn`] and [`new_sr`] both return a
//! value implementing the same trait, so a caller (a server thread, say)
//! can hold either behind `Box<dyn Transport>` chosen at runtime from a
//! `--proto` flag.

mod gbn;
mod sr;

pub use gbn::GbnTransport;
pub use sr::SrTransport;

use std::time::Duration;

use crate::channel::Channel;
use crate::config::TransportConfig;
use crate::error::Result;

/// A reliable transport fragmenting application messages into frames over
/// an impairment [`Channel`], delivering one payload per [`Transport::recv`]
/// call.
pub trait Transport {
    /// Fragment and transmit an application message.
    ///
    /// Neither implementation blocks for acknowledgment indefinitely: GBN
    /// never blocks at all (progress is driven by the caller's receive
    /// loop), SR blocks only until *this* message has fully drained.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for exactly one delivered in-order payload.
    ///
    /// Returns `Ok(0)` on timeout. A `timeout` of zero performs a single
    /// non-blocking poll.
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Idempotent teardown. Calling this is optional: dropping the
    /// transport releases the same resources (channel, buffered payloads,
    /// timers) via ordinary `Drop`.
    fn close(&mut self) {}
}

/// Construct a Go-Back-N transport bound to `channel`.
pub fn new_gbn(channel: Channel, cfg: TransportConfig) -> GbnTransport {
    GbnTransport::new(channel, cfg)
}

/// Construct a Selective Repeat transport bound to `channel`.
pub fn new_sr(channel: Channel, cfg: TransportConfig) -> SrTransport {
    SrTransport::new(channel, cfg)
}
