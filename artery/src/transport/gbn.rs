//! Go-Back-N: cumulative ACKs, a single retransmission timer covering the
//! whole outstanding window, batch retransmission on timeout.

use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::channel::Channel;
use crate::checksum::ChecksumKind;
use crate::config::TransportConfig;
use crate::error::{ArteryError, Result};
use crate::seq::{seq_in_range_inclusive, seq_lt};
use crate::wire::{self, Flags};

use super::Transport;

/// Bound on the size of the application message snapshotted for
/// retransmission. Excess bytes passed to [`GbnTransport::send`] are
/// truncated, as specified.
const SNAPSHOT_CAP: usize = 64 * 1024;

/// Maximum wire frame size: header plus the largest payload a `u16` length
/// field can declare.
const RX_BUF_LEN: usize = wire::HEADER_LEN + u16::MAX as usize;

pub struct GbnTransport {
    channel: Channel,
    checksum: ChecksumKind,

    window: u32,
    mss: u16,
    rto: Duration,

    snd_una: u32,
    snd_nxt: u32,
    rcv_nxt: u32,

    /// Snapshot of the message currently being transmitted, used to
    /// regenerate frames for retransmission without per-frame copies.
    snapshot: Vec<u8>,
    /// Sequence number assigned to `snapshot[0]`.
    base_seq: u32,
    /// How many bytes of `snapshot` have already been turned into frames.
    send_offset: usize,
    /// A message queued because `send` was called while the previous one
    /// had not yet fully drained.
    pending: Option<Vec<u8>>,

    timer: Option<Instant>,

    /// Per spec: a previously-latched in-order payload delivered at the
    /// top of the next `recv` call. This implementation's receive path
    /// never buffers anything but the next-expected frame, so in practice
    /// this is always `None` — it is still checked every call for fidelity
    /// to the documented algorithm.
    latched: Option<Vec<u8>>,

    rx_buf: Vec<u8>,
}

impl GbnTransport {
    pub(super) fn new(channel: Channel, cfg: TransportConfig) -> Self {
        let snd_nxt = cfg.init_seq;
        Self {
            channel,
            checksum: cfg.resolved_checksum(),
            window: cfg.resolved_window(),
            mss: cfg.resolved_mss(),
            rto: cfg.resolved_rto(),
            snd_una: snd_nxt,
            snd_nxt,
            rcv_nxt: 0,
            snapshot: Vec::new(),
            base_seq: snd_nxt,
            send_offset: 0,
            pending: None,
            timer: None,
            latched: None,
            rx_buf: vec![0u8; RX_BUF_LEN],
        }
    }

    #[inline]
    fn outstanding(&self) -> bool {
        self.snd_una != self.snd_nxt
    }

    #[inline]
    fn window_has_room(&self) -> bool {
        let outstanding = self.snd_nxt.wrapping_sub(self.snd_una);
        (outstanding as u64) < self.window as u64
    }

    fn arm_timer(&mut self) {
        self.timer = Some(Instant::now() + self.rto);
    }

    fn disarm_timer(&mut self) {
        self.timer = None;
    }

    fn timer_expired(&self) -> bool {
        match self.timer {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    fn transmit_data(&mut self, seq: u32, payload: &[u8]) -> Result<()> {
        let mut buf = vec![0u8; wire::HEADER_LEN + payload.len()];
        let n = wire::pack(&mut buf, Flags::DATA, seq, self.rcv_nxt, payload, self.checksum)
            .expect("buffer sized exactly for this payload");
        self.channel.send(&buf[..n])?;
        Ok(())
    }

    fn transmit_ack(&mut self) -> Result<()> {
        let mut buf = [0u8; wire::HEADER_LEN];
        let n = wire::pack(&mut buf, Flags::ACK, 0, self.rcv_nxt, &[], self.checksum)
            .expect("header-only buffer always fits");
        self.channel.send(&buf[..n])?;
        Ok(())
    }

    /// Fragment as much of the current snapshot as the window allows.
    fn push_frames_while_room(&mut self) -> Result<()> {
        while self.send_offset < self.snapshot.len() && self.window_has_room() {
            let start = self.send_offset;
            let end = (start + self.mss as usize).min(self.snapshot.len());
            let payload = self.snapshot[start..end].to_vec();
            let seq = self.snd_nxt;

            self.transmit_data(seq, &payload)?;

            self.snd_nxt = self.snd_nxt.wrapping_add(1);
            self.send_offset = end;
        }

        if self.outstanding() && self.timer.is_none() {
            self.arm_timer();
        }

        // The current message finished draining: if another one was
        // queued while we were busy, start it now.
        if !self.outstanding() && self.send_offset >= self.snapshot.len() {
            if let Some(next) = self.pending.take() {
                self.start_message(next);
                self.push_frames_while_room()?;
            }
        }

        Ok(())
    }

    fn start_message(&mut self, data: Vec<u8>) {
        let len = data.len().min(SNAPSHOT_CAP);
        if data.len() > SNAPSHOT_CAP {
            warn!(len = data.len(), cap = SNAPSHOT_CAP, "truncating oversized message");
        }
        self.snapshot = data[..len].to_vec();
        self.send_offset = 0;
        self.base_seq = self.snd_nxt;
    }

    fn retransmit_window(&mut self) -> Result<()> {
        let mut seq = self.snd_una;
        while seq_lt(seq, self.snd_nxt) {
            let frame_idx = seq.wrapping_sub(self.base_seq) as usize;
            let start = frame_idx * self.mss as usize;
            if start < self.snapshot.len() {
                let end = (start + self.mss as usize).min(self.snapshot.len());
                let payload = self.snapshot[start..end].to_vec();
                self.transmit_data(seq, &payload)?;
            }
            seq = seq.wrapping_add(1);
        }
        trace!(snd_una = self.snd_una, snd_nxt = self.snd_nxt, "gbn retransmitted window");
        self.arm_timer();
        Ok(())
    }

    fn check_timer(&mut self) -> Result<()> {
        if self.outstanding() && self.timer_expired() {
            self.retransmit_window()?;
        }
        Ok(())
    }
}

impl Transport for GbnTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.outstanding() || self.send_offset < self.snapshot.len() {
            // Previous message hasn't fully drained; queue this one.
            self.pending = Some(data.to_vec());
            return Ok(());
        }

        self.start_message(data.to_vec());
        self.push_frames_while_room()
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if let Some(payload) = self.latched.take() {
            let n = payload.len().min(buf.len());
            buf[..n].copy_from_slice(&payload[..n]);
            return Ok(n);
        }

        self.check_timer()?;

        let n = match self.channel.recv(&mut self.rx_buf, timeout) {
            Ok(n) => n,
            Err(e) => return Err(ArteryError::Io(e)),
        };

        if n == 0 {
            self.check_timer()?;
            return Ok(0);
        }

        let Ok((header, payload)) = wire::parse(&self.rx_buf, n, self.checksum) else {
            return Ok(0);
        };
        let payload = payload.to_vec();

        // ACK handling: every frame (pure ACK or piggybacked on DATA)
        // carries the sender's cumulative ack.
        if seq_in_range_inclusive(header.ack, self.snd_una, self.snd_nxt) {
            self.snd_una = header.ack;
            if self.outstanding() {
                self.arm_timer();
            } else {
                self.disarm_timer();
            }
            self.push_frames_while_room()?;
        }

        if !header.flags.contains(Flags::DATA) {
            return Ok(0);
        }

        if header.seq == self.rcv_nxt {
            let delivered = payload.len().min(buf.len());
            buf[..delivered].copy_from_slice(&payload[..delivered]);
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            self.transmit_ack()?;
            Ok(delivered)
        } else {
            self.transmit_ack()?;
            Ok(0)
        }
    }
}
