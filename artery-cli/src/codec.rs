//! The ASCII application-layer codec carried over an `artery` transport.
//!
//! This is the "external collaborator" the transport core deliberately
//! knows nothing about: a one-line-per-message text protocol good enough to
//! exercise GBN/SR end to end.
//!
//! ```text
//! ORDER <id> <items...>\n
//! REPLY <id> <elapsed_ms> <items...>\n
//! ```

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: u64,
    pub items: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub id: u64,
    pub elapsed_ms: u64,
    pub items: String,
}

#[derive(Debug)]
pub struct CodecError(pub String);

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CodecError {}

pub fn encode_order(order: &Order) -> Vec<u8> {
    format!("ORDER {} {}\n", order.id, order.items).into_bytes()
}

pub fn decode_order(line: &str) -> Result<Order, CodecError> {
    let line = line.trim_end_matches('\n');
    let mut parts = line.splitn(3, ' ');
    let tag = parts.next().unwrap_or("");
    if tag != "ORDER" {
        return Err(CodecError(format!("expected ORDER, got {tag:?}")));
    }
    let id = parts
        .next()
        .ok_or_else(|| CodecError("missing order id".into()))?
        .parse::<u64>()
        .map_err(|e| CodecError(format!("bad order id: {e}")))?;
    let items = parts.next().unwrap_or("").to_string();
    Ok(Order { id, items })
}

pub fn encode_reply(reply: &Reply) -> Vec<u8> {
    format!("REPLY {} {} {}\n", reply.id, reply.elapsed_ms, reply.items).into_bytes()
}

pub fn decode_reply(line: &str) -> Result<Reply, CodecError> {
    let line = line.trim_end_matches('\n');
    let mut parts = line.splitn(4, ' ');
    let tag = parts.next().unwrap_or("");
    if tag != "REPLY" {
        return Err(CodecError(format!("expected REPLY, got {tag:?}")));
    }
    let id = parts
        .next()
        .ok_or_else(|| CodecError("missing reply id".into()))?
        .parse::<u64>()
        .map_err(|e| CodecError(format!("bad reply id: {e}")))?;
    let elapsed_ms = parts
        .next()
        .ok_or_else(|| CodecError("missing elapsed_ms".into()))?
        .parse::<u64>()
        .map_err(|e| CodecError(format!("bad elapsed_ms: {e}")))?;
    let items = parts.next().unwrap_or("").to_string();
    Ok(Reply { id, elapsed_ms, items })
}

/// Marker datagram a client sends before engaging the transport, so the
/// server's first received datagram seeds its peer address.
pub const HELLO: &[u8] = b"HELLO";
