//! A reliable-transport core: Go-Back-N and Selective Repeat ARQ behind one
//! [`Transport`] trait, running over a configurable impairment [`Channel`].
//!
//! The crate is deliberately silent about what the transported bytes mean;
//! it fragments and reassembles opaque application messages, nothing more.
//! `artery-cli` builds a tiny restaurant-order protocol on top of it.

pub mod channel;
pub mod checksum;
pub mod config;
pub mod error;
pub mod seq;
pub mod transport;
pub mod wire;

pub use channel::Channel;
pub use checksum::ChecksumKind;
pub use config::{ChannelConfig, TransportConfig};
pub use error::{ArteryError, Result};
pub use transport::{new_gbn, new_sr, GbnTransport, SrTransport, Transport};
