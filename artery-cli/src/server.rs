//! The artery order server: binds one socket, serves one client session to
//! completion, then accepts the next.
//!
//! A session answers each received `ORDER` line with a `REPLY` line after a
//! fixed simulated cook time, over whichever ARQ transport `--proto`
//! selects.

use std::net::UdpSocket;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{arg, crate_authors, crate_description, crate_version, ArgMatches, Command};
use tracing::{info, warn};

use artery::{new_gbn, new_sr, ChannelConfig, Transport, TransportConfig};

mod codec;

/// Fixed simulated cook time before a reply is sent, per spec's baseline
/// scenario.
const COOK_TIME: Duration = Duration::from_millis(40);

/// How long a session may sit idle (no delivered payload) before the
/// server gives up on it and returns to accepting a new client.
const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

type CmdResult<T> = Result<T, String>;

fn main() -> ExitCode {
    let matches = Command::new("arteryd")
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .disable_help_subcommand(true)
        .arg(arg!(--port <PORT> "UDP port to bind").default_value("7070"))
        .arg(arg!(--proto <PROTO> "ARQ transport: gbn or sr").default_value("gbn"))
        .arg(arg!(--loss <PCT> "Percent packet loss").default_value("0"))
        .arg(arg!(--dup <PCT> "Percent packet duplication").default_value("0"))
        .arg(arg!(--reorder <PCT> "Percent adjacent reordering").default_value("0"))
        .arg(arg!(--dmean <MS> "Mean per-frame delay in ms").default_value("0"))
        .arg(arg!(--djitter <MS> "Delay jitter in ms").default_value("0"))
        .arg(arg!(--rate <MBPS> "Token-bucket rate limit in Mbps, 0 = unlimited").default_value("0"))
        .arg(arg!(--seed <SEED> "PRNG seed, 0 = fixed default").default_value("0"))
        .get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run(&matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(matches: &ArgMatches) -> CmdResult<()> {
    let port = parse_arg::<u16>(matches, "port")?;
    let proto = matches.get_one::<String>("proto").unwrap().as_str();
    let channel_cfg = ChannelConfig {
        loss_pct: parse_arg(matches, "loss")?,
        dup_pct: parse_arg(matches, "dup")?,
        reorder_pct: parse_arg(matches, "reorder")?,
        delay_mean_ms: parse_arg(matches, "dmean")?,
        delay_jitter_ms: parse_arg(matches, "djitter")?,
        rate_mbps: parse_arg(matches, "rate")?,
        seed: parse_arg(matches, "seed")?,
    };

    info!(port, proto, "arteryd listening");

    loop {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .map_err(|e| format!("failed to bind port {port}: {e}"))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| format!("failed to set nonblocking: {e}"))?;

        let peer = match wait_for_hello(&socket) {
            Some(addr) => addr,
            None => continue,
        };
        info!(%peer, "accepted session");

        let channel = artery::Channel::create(socket, peer, channel_cfg.clone())
            .map_err(|e| format!("failed to create channel: {e}"))?;

        let result = match proto {
            "gbn" => serve_session(Box::new(new_gbn(channel, TransportConfig::new()))),
            "sr" => serve_session(Box::new(new_sr(channel, TransportConfig::new()))),
            other => return Err(format!("unknown --proto {other:?}, expected gbn or sr")),
        };

        if let Err(e) = result {
            warn!(%peer, error = %e, "session ended with error");
        } else {
            info!(%peer, "session ended");
        }
    }
}

/// Block (with a short poll loop so Ctrl-C remains responsive) until a
/// datagram arrives; its source becomes the session peer regardless of
/// its contents, matching the spec's "first received datagram seeds the
/// peer address" rule.
fn wait_for_hello(socket: &UdpSocket) -> Option<std::net::SocketAddr> {
    let mut buf = [0u8; 64];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((_, addr)) => return Some(addr),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(_) => return None,
        }
    }
}

fn serve_session(mut transport: Box<dyn Transport>) -> Result<(), artery::ArteryError> {
    let mut last_activity = Instant::now();
    let mut buf = vec![0u8; 4096];

    while last_activity.elapsed() < SESSION_IDLE_TIMEOUT {
        let n = transport.recv(&mut buf, Duration::from_millis(200))?;
        if n == 0 {
            continue;
        }
        last_activity = Instant::now();

        let line = String::from_utf8_lossy(&buf[..n]);
        let order = match codec::decode_order(&line) {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, "discarding malformed order");
                continue;
            }
        };

        std::thread::sleep(COOK_TIME);

        let reply = codec::Reply {
            id: order.id,
            elapsed_ms: COOK_TIME.as_millis() as u64,
            items: order.items,
        };
        transport.send(&codec::encode_reply(&reply))?;
    }

    Ok(())
}

fn parse_arg<T>(matches: &ArgMatches, name: &str) -> CmdResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    matches
        .get_one::<String>(name)
        .unwrap()
        .parse::<T>()
        .map_err(|e| format!("invalid --{name}: {e}"))
}
