//! Full loopback sessions over both ARQ transports, exercising the
//! properties a unit test inside one module can't: two independent
//! transport instances actually exchanging datagrams over real sockets.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use artery::{new_gbn, new_sr, ChannelConfig, Channel, Transport, TransportConfig};

fn loopback_channels(cfg: ChannelConfig) -> (Channel, Channel) {
    let sock_a = UdpSocket::bind("127.0.0.1:0").unwrap();
    let sock_b = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr_a = sock_a.local_addr().unwrap();
    let addr_b = sock_b.local_addr().unwrap();
    let chan_a = Channel::create(sock_a, addr_b, cfg.clone()).unwrap();
    let chan_b = Channel::create(sock_b, addr_a, cfg).unwrap();
    (chan_a, chan_b)
}

fn drain_into(transport: &mut dyn Transport, out: &mut Vec<u8>, total: usize, deadline: Instant) {
    while out.len() < total && Instant::now() < deadline {
        let mut buf = [0u8; 256];
        if let Ok(n) = transport.recv(&mut buf, Duration::from_millis(200)) {
            if n > 0 {
                out.extend_from_slice(&buf[..n]);
            }
        }
    }
}

#[test]
fn gbn_lossless_session_delivers_every_byte_in_order() {
    let (chan_a, chan_b) = loopback_channels(ChannelConfig::lossless());
    let cfg = TransportConfig {
        wnd: 8,
        mss: 8,
        rto_ms: 80,
        ..TransportConfig::new()
    };
    let mut sender = new_gbn(chan_a, cfg);
    let mut receiver = new_gbn(chan_b, cfg);

    let message = b"the quick brown fox jumps over the lazy dog".to_vec();
    sender.send(&message).unwrap();

    let mut received = Vec::new();
    drain_into(&mut receiver, &mut received, message.len(), Instant::now() + Duration::from_secs(3));
    assert_eq!(received, message);
}

#[test]
fn sr_lossless_session_delivers_every_byte_in_order() {
    let (chan_a, chan_b) = loopback_channels(ChannelConfig::lossless());
    let cfg = TransportConfig {
        wnd: 8,
        mss: 8,
        rto_ms: 80,
        ..TransportConfig::new()
    };
    let mut sender = new_sr(chan_a, cfg);
    let mut receiver = new_sr(chan_b, cfg);

    let message = b"pack my box with five dozen liquor jugs".to_vec();
    let expected = message.clone();
    // SR's send() blocks until fully acknowledged, so it must run
    // concurrently with the receiver's recv() loop rather than before it.
    let sender_thread = std::thread::spawn(move || sender.send(&message).unwrap());

    let mut received = Vec::new();
    drain_into(&mut receiver, &mut received, expected.len(), Instant::now() + Duration::from_secs(3));
    assert_eq!(received, expected);
    sender_thread.join().unwrap();
}

#[test]
fn gbn_retransmits_under_moderate_loss_and_still_delivers_everything() {
    let mut impaired_cfg = ChannelConfig::lossless();
    impaired_cfg.loss_pct = 15;
    impaired_cfg.seed = 42;
    let (chan_a, chan_b) = loopback_channels(impaired_cfg);

    let cfg = TransportConfig {
        wnd: 8,
        mss: 4,
        rto_ms: 40,
        ..TransportConfig::new()
    };
    let mut sender = new_gbn(chan_a, cfg);
    let mut receiver = new_gbn(chan_b, cfg);

    let message = b"0123456789abcdef0123456789abcdef".to_vec();
    sender.send(&message).unwrap();

    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while received.len() < message.len() && Instant::now() < deadline {
        let mut buf = [0u8; 64];
        if let Ok(n) = receiver.recv(&mut buf, Duration::from_millis(100)) {
            if n > 0 {
                received.extend_from_slice(&buf[..n]);
            }
        }
        // GBN never blocks on send; re-drive outstanding retransmissions
        // by letting the sender observe ACKs via its own recv calls too.
        let mut ack_buf = [0u8; 64];
        let _ = sender.recv(&mut ack_buf, Duration::from_millis(0));
    }
    assert_eq!(received, message);
}

#[test]
fn sr_session_survives_duplication_and_reordering_settings() {
    // The exact reassembly-order scenario (seq 2,3,1 -> delivered 1,2,3)
    // is covered directly against handle_data in sr.rs's unit tests; this
    // integration test instead checks that a full SR session still
    // delivers the complete, correctly-ordered message when the channel
    // is configured to duplicate and reorder frames, rather than relying
    // on this channel model to force a specific reordering to occur.
    let mut cfg = ChannelConfig::lossless();
    cfg.dup_pct = 30;
    cfg.reorder_pct = 100;
    cfg.seed = 7;
    let (chan_a, chan_b) = loopback_channels(cfg);

    let transport_cfg = TransportConfig {
        wnd: 8,
        mss: 2,
        rto_ms: 60,
        ..TransportConfig::new()
    };
    let mut sender = new_sr(chan_a, transport_cfg);
    let mut receiver = new_sr(chan_b, transport_cfg);

    let message = b"abcdefghij".to_vec();
    let expected = message.clone();
    let sender_thread = std::thread::spawn(move || sender.send(&message).unwrap());

    let mut received = Vec::new();
    drain_into(&mut receiver, &mut received, expected.len(), Instant::now() + Duration::from_secs(3));
    assert_eq!(received, expected);
    sender_thread.join().unwrap();
}
