//! Configuration structs for the impairment channel and the ARQ transports.
//!
//! Every numeric field follows the spec's "zero means use the default"
//! convention: a freshly-parsed CLI value of `0` is indistinguishable from
//! "not set" and falls back to the values below.

use std::time::Duration;

use crate::checksum::ChecksumKind;

/// Default window size (frames).
pub const DEFAULT_WINDOW: u32 = 32;
/// Default maximum segment size (bytes).
pub const DEFAULT_MSS: u16 = 512;
/// Default retransmission timeout for both transports.
pub const DEFAULT_RTO_MS: u64 = 120;
/// Internal hard cap on Selective Repeat's window, regardless of requested size.
pub const SR_MAX_WINDOW: u32 = 256;

/// Configuration for a [`crate::channel::Channel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Per-send Bernoulli drop probability, in \[0, 100\].
    pub loss_pct: u8,
    /// Per-send Bernoulli duplication probability, in \[0, 100\].
    pub dup_pct: u8,
    /// Probability of swapping the outbound queue's head with its
    /// successor after each enqueue, in \[0, 100\].
    pub reorder_pct: u8,
    /// Mean per-frame scheduled-release delay.
    pub delay_mean_ms: u32,
    /// Jitter applied symmetrically around `delay_mean_ms`.
    pub delay_jitter_ms: u32,
    /// Token-bucket rate limit in Mbps; `0` means unlimited.
    pub rate_mbps: u32,
    /// PRNG seed; `0` selects a fixed nonzero default so runs stay
    /// deterministic and reproducible even when the caller passes `0`.
    pub seed: u64,
}

impl ChannelConfig {
    /// A channel configuration with every impairment disabled: no loss, no
    /// duplication, no reordering, no delay, no rate limit.
    pub fn lossless() -> Self {
        Self {
            loss_pct: 0,
            dup_pct: 0,
            reorder_pct: 0,
            delay_mean_ms: 0,
            delay_jitter_ms: 0,
            rate_mbps: 0,
            seed: 0,
        }
    }

    /// Resolve the configured seed to the nonzero value the PRNG actually
    /// uses: seed `0` maps to a fixed nonzero default.
    pub fn resolved_seed(&self) -> u64 {
        if self.seed == 0 {
            0x9E3779B97F4A7C15 // a fixed nonzero default (golden-ratio constant)
        } else {
            self.seed
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::lossless()
    }
}

/// Configuration for a GBN or SR transport.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Initial sequence number for `snd_nxt`/`rcv_nxt`; `0` is a perfectly
    /// valid explicit value, callers who want "the default" should just not
    /// call `with_init_seq`.
    pub init_seq: u32,
    /// Window size in frames; `0` means [`DEFAULT_WINDOW`]. Selective
    /// Repeat additionally clamps the resolved value to [`SR_MAX_WINDOW`].
    pub wnd: u32,
    /// Maximum segment size in bytes; `0` means [`DEFAULT_MSS`].
    pub mss: u16,
    /// Retransmission timeout; `0` means [`DEFAULT_RTO_MS`].
    pub rto_ms: u64,
    /// Checksum algorithm both endpoints of this session must agree on.
    /// `None` resolves to [`ChecksumKind::preferred`] at construction time;
    /// pin this explicitly (e.g. to [`ChecksumKind::Fletcher32`] on both
    /// ends) to test interoperation without depending on host CPU features,
    /// per the spec's own warning that autodetecting per endpoint risks the
    /// two sides silently disagreeing.
    pub checksum: Option<ChecksumKind>,
}

impl TransportConfig {
    pub const fn new() -> Self {
        Self {
            init_seq: 0,
            wnd: 0,
            mss: 0,
            rto_ms: 0,
            checksum: None,
        }
    }

    pub fn resolved_window(&self) -> u32 {
        if self.wnd == 0 {
            DEFAULT_WINDOW
        } else {
            self.wnd
        }
    }

    pub fn resolved_sr_window(&self) -> u32 {
        self.resolved_window().min(SR_MAX_WINDOW)
    }

    pub fn resolved_mss(&self) -> u16 {
        if self.mss == 0 {
            DEFAULT_MSS
        } else {
            self.mss
        }
    }

    pub fn resolved_rto(&self) -> Duration {
        let ms = if self.rto_ms == 0 {
            DEFAULT_RTO_MS
        } else {
            self.rto_ms
        };
        Duration::from_millis(ms)
    }

    pub fn resolved_checksum(&self) -> ChecksumKind {
        self.checksum.unwrap_or_else(ChecksumKind::preferred)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_fields_resolve_to_defaults() {
        let cfg = TransportConfig::new();
        assert_eq!(cfg.resolved_window(), DEFAULT_WINDOW);
        assert_eq!(cfg.resolved_mss(), DEFAULT_MSS);
        assert_eq!(cfg.resolved_rto(), Duration::from_millis(DEFAULT_RTO_MS));
    }

    #[test]
    fn sr_window_is_clamped() {
        let cfg = TransportConfig {
            wnd: 10_000,
            ..TransportConfig::new()
        };
        assert_eq!(cfg.resolved_sr_window(), SR_MAX_WINDOW);
    }

    #[test]
    fn zero_seed_resolves_to_fixed_nonzero_default() {
        let cfg = ChannelConfig {
            seed: 0,
            ..ChannelConfig::lossless()
        };
        assert_ne!(cfg.resolved_seed(), 0);
    }

    #[test]
    fn unset_checksum_resolves_to_preferred() {
        let cfg = TransportConfig::new();
        assert_eq!(cfg.resolved_checksum(), ChecksumKind::preferred());
    }

    #[test]
    fn pinned_checksum_overrides_preferred() {
        let cfg = TransportConfig {
            checksum: Some(ChecksumKind::Fletcher32),
            ..TransportConfig::new()
        };
        assert_eq!(cfg.resolved_checksum(), ChecksumKind::Fletcher32);
    }
}
