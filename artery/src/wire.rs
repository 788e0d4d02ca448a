//! Frame header packing and parsing.
//!
//! Wire layout (18 bytes, little-endian), followed by `len` payload bytes:
//!
//! ```text
//!  0       1       2       3       4       5       6       7
//! +-------+-------+-------+-------+-------+-------+-------+-------+
//! | magic (u16)   | flags | hdrlen|          seq (u32)             |
//! +-------+-------+-------+-------+-------+-------+-------+-------+
//! |          ack (u32)           |     len (u16) |
//! +-------+-------+-------+-------+-------+-------+-------+-------+
//! |     crc32c (u32)             |
//! +-------+-------+-------+-------+
//! ```

use std::io::Cursor;

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::checksum::ChecksumKind;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 18;

/// Constant magic value identifying an artery frame.
pub const MAGIC: u16 = 0xB17E;

/// Fixed value of the `hdrlen` field: the number of header bytes following
/// that field, up to (not including) the payload.
pub const HDRLEN: u8 = 10;

/// Frame flag bits, a thin newtype over `u8` rather than a full `bitflags`
/// dependency for three bits. Multiple bits may coexist (a piggyback ACK
/// rides on a DATA frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(pub u8);

impl Flags {
    pub const ACK: Flags = Flags(0x01);
    pub const DATA: Flags = Flags(0x02);
    /// Reserved; declared but never acted upon by this crate.
    pub const FIN: Flags = Flags(0x04);

    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Self;
    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Flags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A parsed (or about-to-be-packed) frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub flags: Flags,
    pub seq: u32,
    pub ack: u32,
    pub len: u16,
}

/// Errors returned while parsing a received datagram.
///
/// All variants mean the same thing to a caller: drop the frame silently.
/// They are distinguished only for tracing/diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    TooShort,
    BadMagic,
    BadHdrlen,
    ChecksumMismatch,
    DeclaredLenExceedsReceived,
}

/// Pack a header and payload into `buf`, returning the number of bytes
/// written, or `None` if `buf` is not large enough to hold
/// `HEADER_LEN + payload.len()` bytes.
///
/// The checksum field is computed over the full header+payload span with
/// itself zeroed, then written back into place, per the wire format.
pub fn pack(
    buf: &mut [u8],
    flags: Flags,
    seq: u32,
    ack: u32,
    payload: &[u8],
    checksum: ChecksumKind,
) -> Option<usize> {
    let total = HEADER_LEN + payload.len();
    if buf.len() < total || payload.len() > u16::MAX as usize {
        return None;
    }

    {
        let mut cursor = Cursor::new(&mut buf[..HEADER_LEN]);
        cursor.write_u16::<LE>(MAGIC).ok()?;
        cursor.write_u8(flags.bits()).ok()?;
        cursor.write_u8(HDRLEN).ok()?;
        cursor.write_u32::<LE>(seq).ok()?;
        cursor.write_u32::<LE>(ack).ok()?;
        cursor.write_u16::<LE>(payload.len() as u16).ok()?;
        cursor.write_u32::<LE>(0).ok()?; // crc32c placeholder, zeroed for computation
    }

    buf[HEADER_LEN..total].copy_from_slice(payload);

    let digest = checksum.compute(&buf[..total]);
    (&mut buf[14..18]).write_u32::<LE>(digest).ok()?;

    Some(total)
}

/// Parse a received datagram of `n` bytes from `buf`, returning the header
/// and the payload slice.
///
/// Fails silently (no partial mutation, nothing retained) on any of the
/// conditions in [`ParseError`].
pub fn parse(buf: &[u8], n: usize, checksum: ChecksumKind) -> Result<(Header, &[u8]), ParseError> {
    if n < HEADER_LEN {
        return Err(ParseError::TooShort);
    }

    let mut cursor = Cursor::new(&buf[..HEADER_LEN]);
    let magic = cursor.read_u16::<LE>().map_err(|_| ParseError::TooShort)?;
    if magic != MAGIC {
        return Err(ParseError::BadMagic);
    }

    let flags = Flags(cursor.read_u8().map_err(|_| ParseError::TooShort)?);
    let hdrlen = cursor.read_u8().map_err(|_| ParseError::TooShort)?;
    if hdrlen != HDRLEN {
        return Err(ParseError::BadHdrlen);
    }

    let seq = cursor.read_u32::<LE>().map_err(|_| ParseError::TooShort)?;
    let ack = cursor.read_u32::<LE>().map_err(|_| ParseError::TooShort)?;
    let len = cursor.read_u16::<LE>().map_err(|_| ParseError::TooShort)?;
    let stored_checksum = cursor.read_u32::<LE>().map_err(|_| ParseError::TooShort)?;

    let total = HEADER_LEN + len as usize;
    if n < total {
        return Err(ParseError::DeclaredLenExceedsReceived);
    }

    // Recompute the checksum over the received span with the crc32c field
    // zeroed, exactly as it was when packed.
    let mut verify_buf = buf[..total].to_vec();
    (&mut verify_buf[14..18]).write_u32::<LE>(0).ok();
    let computed = checksum.compute(&verify_buf);

    if computed != stored_checksum {
        return Err(ParseError::ChecksumMismatch);
    }

    let header = Header {
        flags,
        seq,
        ack,
        len,
    };

    Ok((header, &buf[HEADER_LEN..total]))
}
