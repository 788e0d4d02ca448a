//! The impairment channel: a userspace layer directly above a UDP socket
//! that injects probabilistic loss, duplication, adjacent reordering,
//! per-frame delay with jitter, and token-bucket rate limiting.
//!
//! The channel never inspects, mutates, or interprets the bytes it carries;
//! it only decides *whether* and *when* to hand them to the datagram
//! substrate.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::config::ChannelConfig;

/// Per-call hard cap on time spent waiting for the outbound queue's head
/// frame to become ready.
const SEND_WAIT_CAP: Duration = Duration::from_millis(150);
/// Maximum single sleep slice while waiting for the head frame.
const SEND_WAIT_SLICE: Duration = Duration::from_millis(5);
/// Extra release delay applied to a duplicated frame.
const DUP_DELAY: Duration = Duration::from_millis(1);

struct QueuedFrame {
    data: Vec<u8>,
    ready_at: Instant,
}

/// A socket providing unreliable send/receive on top of an underlying UDP
/// socket, with configurable impairments applied on the send path.
pub struct Channel {
    socket: UdpSocket,
    peer: SocketAddr,
    cfg: ChannelConfig,
    rng: StdRng,
    queue: VecDeque<QueuedFrame>,
    /// Monotonic "next transmit time" enforced by the token bucket. `None`
    /// when the channel is unrate-limited.
    next_tx_at: Option<Instant>,
    ns_per_byte: Option<u64>,
}

impl Channel {
    /// Bind the impairment layer to an already-connected-by-convention
    /// socket and a fixed peer address. The peer address is only a starting
    /// point: the server side updates it to whatever address the first
    /// datagram actually arrives from (see [`Channel::recv`]).
    pub fn create(socket: UdpSocket, peer: SocketAddr, cfg: ChannelConfig) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        let ns_per_byte = if cfg.rate_mbps == 0 {
            None
        } else {
            Some(8000u64 / cfg.rate_mbps as u64)
        };
        let rng = StdRng::seed_from_u64(cfg.resolved_seed());
        Ok(Self {
            socket,
            peer,
            cfg,
            rng,
            queue: VecDeque::new(),
            next_tx_at: None,
            ns_per_byte,
        })
    }

    #[inline]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn bernoulli(&mut self, pct: u8) -> bool {
        if pct == 0 {
            return false;
        }
        self.rng.gen_range(0..100) < pct
    }

    fn jitter_draw(&mut self) -> Duration {
        let mean = self.cfg.delay_mean_ms as i64;
        let jitter = self.cfg.delay_jitter_ms as i64;
        let offset = if jitter == 0 {
            0
        } else {
            self.rng.gen_range(-jitter..=jitter)
        };
        let ms = (mean + offset).max(0);
        Duration::from_millis(ms as u64)
    }

    /// Enqueue `bytes` for eventual transmission, applying loss, jitter,
    /// duplication, and adjacent reordering, then drain whatever is ready
    /// within the per-call wait budget.
    ///
    /// Returns the number of bytes actually transmitted this call. Dropped
    /// frames are invisible to the caller: they still count as a logical
    /// success and this returns `Ok(bytes.len())` without ever enqueueing
    /// anything.
    pub fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if self.bernoulli(self.cfg.loss_pct) {
            trace!(len = bytes.len(), "channel dropped outbound frame");
            return Ok(bytes.len());
        }

        let ready_at = Instant::now() + self.jitter_draw();
        self.queue.push_back(QueuedFrame {
            data: bytes.to_vec(),
            ready_at,
        });

        if self.bernoulli(self.cfg.dup_pct) {
            trace!(len = bytes.len(), "channel duplicated outbound frame");
            self.queue.push_back(QueuedFrame {
                data: bytes.to_vec(),
                ready_at: ready_at + DUP_DELAY,
            });
        }

        if self.queue.len() >= 2 && self.bernoulli(self.cfg.reorder_pct) {
            self.queue.swap(0, 1);
            trace!("channel reordered outbound queue head");
        }

        self.wait_for_head_ready();

        let flushed = self.drain_ready()?;

        if flushed > 0 {
            Ok(flushed)
        } else if !self.queue.is_empty() {
            // Nothing flushed yet (e.g. still rate-limited or not yet due),
            // but at least one frame is queued: the caller must not observe
            // a failure for a frame that is merely pending.
            Ok(bytes.len())
        } else {
            Ok(0)
        }
    }

    /// Sleep in short chunks until the head of the queue is ready to send,
    /// bounded by [`SEND_WAIT_CAP`] total wait per call.
    fn wait_for_head_ready(&self) {
        let start = Instant::now();
        loop {
            let Some(head) = self.queue.front() else {
                return;
            };
            let now = Instant::now();
            if head.ready_at <= now {
                return;
            }
            if start.elapsed() >= SEND_WAIT_CAP {
                return;
            }
            let remaining = head.ready_at - now;
            std::thread::sleep(remaining.min(SEND_WAIT_SLICE));
        }
    }

    /// Transmit every frame at the head of the queue that is both
    /// scheduled-ready and not blocked by the token bucket.
    fn drain_ready(&mut self) -> io::Result<usize> {
        let mut total = 0usize;
        let now = Instant::now();

        while let Some(head) = self.queue.front() {
            if head.ready_at > now {
                break;
            }
            if let Some(deadline) = self.next_tx_at {
                if now < deadline {
                    break;
                }
            }

            let frame = self.queue.pop_front().unwrap();
            let sent = self.socket.send_to(&frame.data, self.peer)?;

            if let Some(ns_per_byte) = self.ns_per_byte {
                let delay = Duration::from_nanos(ns_per_byte * frame.data.len() as u64);
                self.next_tx_at = Some(now + delay);
            }

            trace!(bytes = sent, peer = %self.peer, "channel transmitted frame");
            total += sent;
        }

        Ok(total)
    }

    /// Wait up to `timeout` for a datagram, then read exactly one into
    /// `buf`. Returns `Ok(0)` on timeout; on success, updates the stored
    /// peer address to the datagram's source (server-side discovery).
    pub fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if timeout.is_zero() {
            return match self.socket.recv_from(buf) {
                Ok((n, from)) => {
                    self.peer = from;
                    trace!(bytes = n, from = %from, "channel received datagram");
                    Ok(n)
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(e),
            };
        }

        let deadline = Instant::now() + timeout;
        loop {
            match self.socket.recv_from(buf) {
                Ok((n, from)) => {
                    self.peer = from;
                    trace!(bytes = n, from = %from, "channel received datagram");
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Ok(0);
                    }
                    std::thread::sleep(Duration::from_millis(1).min(deadline - Instant::now()));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Force any frames still waiting in the outbound queue out onto the
    /// wire, ignoring their scheduled `ready_at` but still honoring the
    /// token bucket. Used by tests and by shutdown paths that want to
    /// avoid losing buffered frames silently.
    #[cfg(test)]
    fn flush_all(&mut self) -> io::Result<usize> {
        let mut total = 0;
        loop {
            if self.queue.is_empty() {
                return Ok(total);
            }
            if let Some(deadline) = self.next_tx_at {
                let now = Instant::now();
                if now < deadline {
                    std::thread::sleep(deadline - now);
                }
            }
            let frame = self.queue.pop_front().unwrap();
            let sent = self.socket.send_to(&frame.data, self.peer)?;
            if let Some(ns_per_byte) = self.ns_per_byte {
                let delay = Duration::from_nanos(ns_per_byte * frame.data.len() as u64);
                self.next_tx_at = Some(Instant::now() + delay);
            }
            total += sent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_pair(cfg_a: ChannelConfig, cfg_b: ChannelConfig) -> (Channel, Channel) {
        let sock_a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sock_b = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr_a = sock_a.local_addr().unwrap();
        let addr_b = sock_b.local_addr().unwrap();
        let a = Channel::create(sock_a, addr_b, cfg_a).unwrap();
        let b = Channel::create(sock_b, addr_a, cfg_b).unwrap();
        (a, b)
    }

    #[test]
    fn lossless_send_recv_roundtrip() {
        let (mut a, mut b) = loopback_pair(ChannelConfig::lossless(), ChannelConfig::lossless());
        a.send(b"hello").unwrap();
        a.flush_all().unwrap();

        let mut buf = [0u8; 64];
        let n = b.recv(&mut buf, Duration::from_millis(200)).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn recv_times_out_with_no_data() {
        let (mut _a, mut b) = loopback_pair(ChannelConfig::lossless(), ChannelConfig::lossless());
        let mut buf = [0u8; 64];
        let n = b.recv(&mut buf, Duration::from_millis(30)).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn zero_timeout_is_a_single_nonblocking_poll() {
        let (mut _a, mut b) = loopback_pair(ChannelConfig::lossless(), ChannelConfig::lossless());
        let mut buf = [0u8; 64];
        let n = b.recv(&mut buf, Duration::ZERO).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn never_transmits_bytes_not_previously_sent() {
        // Property 7: the channel never transmits a payload byte that did
        // not appear in a prior send() call.
        let (mut a, mut b) = loopback_pair(ChannelConfig::lossless(), ChannelConfig::lossless());
        a.send(b"artery").unwrap();
        a.flush_all().unwrap();
        let mut buf = [0u8; 64];
        let n = b.recv(&mut buf, Duration::from_millis(200)).unwrap();
        assert_eq!(&buf[..n], b"artery");
    }

    #[test]
    fn total_loss_drops_every_frame_but_reports_success() {
        let mut cfg = ChannelConfig::lossless();
        cfg.loss_pct = 100;
        let (mut a, mut b) = loopback_pair(cfg, ChannelConfig::lossless());
        let sent = a.send(b"gone").unwrap();
        assert_eq!(sent, 4);

        let mut buf = [0u8; 64];
        let n = b.recv(&mut buf, Duration::from_millis(50)).unwrap();
        assert_eq!(n, 0);
    }
}
