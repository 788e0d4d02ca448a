//! Integrity checksums used by the wire codec.
//!
//! Two algorithms are supported: CRC32C (Castagnoli), preferred whenever the
//! host CPU offers a hardware CRC32C instruction, and Fletcher-32 as a
//! portable software fallback. The two endpoints of a session must agree on
//! which one they use; see [`ChecksumKind`].

use std::sync::OnceLock;

/// Which checksum algorithm a session has settled on.
///
/// Both endpoints of a session must pick the same kind, or every frame will
/// fail its checksum check on the receiving side. [`ChecksumKind::preferred`]
/// implements the crate's default selection policy (CRC32C when the host
/// supports it, Fletcher-32 otherwise); callers that need to pin the
/// algorithm across two hosts with differing hardware support should set it
/// explicitly instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Crc32c,
    Fletcher32,
}

impl ChecksumKind {
    /// The crate's default selection policy: CRC32C when hardware support is
    /// available, Fletcher-32 otherwise.
    pub fn preferred() -> Self {
        if crc32c_hw_available() {
            ChecksumKind::Crc32c
        } else {
            ChecksumKind::Fletcher32
        }
    }

    /// Compute this checksum over `bytes`.
    pub fn compute(self, bytes: &[u8]) -> u32 {
        match self {
            ChecksumKind::Crc32c => crc32c_hw(bytes),
            ChecksumKind::Fletcher32 => fletcher32(bytes),
        }
    }
}

/// Fletcher-32, processed in blocks of up to 360 bytes to avoid intermediate
/// overflow of the 16-bit accumulators, both seeded at `0xFFFF`.
///
/// The accumulators are complemented before combining, mirroring the
/// one's-complement finalization used by [`crc32c_hw`]; this is what makes
/// the empty input hash to zero like CRC32C does, rather than to the raw
/// `0xFFFFFFFF` seed.
///
/// Endian-neutral: operates on the byte sequence directly rather than on
/// `u16`/`u32` words, so it does not depend on the host's byte order.
pub fn fletcher32(bytes: &[u8]) -> u32 {
    const BLOCK: usize = 360;

    let mut c0: u32 = 0xFFFF;
    let mut c1: u32 = 0xFFFF;

    for chunk in bytes.chunks(BLOCK) {
        for &byte in chunk {
            c0 += byte as u32;
            c1 += c0;
        }
        c0 %= 65535;
        c1 %= 65535;
    }

    c0 ^= 0xFFFF;
    c1 ^= 0xFFFF;

    (c1 << 16) | c0
}

fn crc32c_supported() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::is_x86_feature_detected!("sse4.2")
    }
    #[cfg(target_arch = "aarch64")]
    {
        std::arch::is_aarch64_feature_detected!("crc")
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

/// True iff the host CPU offers a CRC32C instruction, detected once at
/// runtime and cached for subsequent calls.
pub fn crc32c_hw_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(crc32c_supported)
}

/// Castagnoli CRC32C (polynomial `0x1EDC6F41`), standard one's-complement
/// finalization. Returns `0` if hardware support is unavailable, so callers
/// can detect this and fall back to [`fletcher32`]. Behavior does not depend
/// on how the input is sliced: `crc32c_hw(a) ^ ...` isn't meaningful, but
/// `crc32c_hw(&[a, b].concat())` always equals the same value regardless of
/// how many calls produced the bytes being hashed.
pub fn crc32c_hw(bytes: &[u8]) -> u32 {
    if !crc32c_hw_available() {
        return 0;
    }
    crc32c::crc32c(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fletcher32_empty_is_zero() {
        assert_eq!(fletcher32(&[]), 0);
    }

    #[test]
    fn fletcher32_deterministic() {
        let data = b"the quick brown fox jumps over the lazy dog";
        assert_eq!(fletcher32(data), fletcher32(data));
    }

    #[test]
    fn fletcher32_single_bit_flip_changes_checksum() {
        let mut data = b"abcdefgh".to_vec();
        let before = fletcher32(&data);
        data[3] ^= 0x01;
        let after = fletcher32(&data);
        assert_ne!(before, after);
    }

    #[test]
    fn fletcher32_spans_block_boundary() {
        // Exercise the 360-byte chunking boundary explicitly.
        let data = vec![0x5Au8; 1000];
        assert_eq!(fletcher32(&data), fletcher32(&data));
        assert_ne!(fletcher32(&data), 0);
    }

    #[test]
    fn crc32c_hw_empty_is_zero_or_unsupported() {
        let v = crc32c_hw(&[]);
        if crc32c_hw_available() {
            assert_eq!(v, 0);
        } else {
            assert_eq!(v, 0);
        }
    }

    #[test]
    fn crc32c_hw_deterministic_regardless_of_slicing() {
        if !crc32c_hw_available() {
            return;
        }
        let whole = b"0123456789".to_vec();
        let a = crc32c_hw(&whole);
        let mut combined = Vec::new();
        combined.extend_from_slice(&whole[..4]);
        combined.extend_from_slice(&whole[4..]);
        let b = crc32c_hw(&combined);
        assert_eq!(a, b);
    }
}
