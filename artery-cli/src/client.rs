//! The artery order client: `-c` concurrent workers each send `-n` orders
//! over their own transport instance and report round-trip times.

use std::net::UdpSocket;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{arg, crate_authors, crate_description, crate_version, ArgMatches, Command};
use tracing::{info, warn};

use artery::{new_gbn, new_sr, ChannelConfig, Transport, TransportConfig};

mod codec;

type CmdResult<T> = Result<T, String>;

fn main() -> ExitCode {
    let matches = Command::new("arteryc")
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .disable_help_subcommand(true)
        .arg(arg!(--addr <ADDR> "Server address, e.g. 127.0.0.1:7070"))
        .arg(arg!(--proto <PROTO> "ARQ transport: gbn or sr").default_value("gbn"))
        .arg(arg!(-c --concurrency <N> "Number of concurrent worker sessions").default_value("1"))
        .arg(arg!(-n --count <N> "Number of orders each worker sends").default_value("10"))
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
    let addr = matches
        .get_one::<String>("addr")
        .ok_or("--addr is required")?
        .clone();
    let proto = matches.get_one::<String>("proto").unwrap().clone();
    let concurrency: usize = parse_arg(matches, "concurrency")?;
    let count: u64 = parse_arg(matches, "count")?;

    let mut workers = Vec::with_capacity(concurrency);
    for worker_id in 0..concurrency {
        let addr = addr.clone();
        let proto = proto.clone();
        workers.push(std::thread::spawn(move || run_worker(worker_id, &addr, &proto, count)));
    }

    let mut failures = 0;
    for (worker_id, handle) in workers.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(worker_id, error = %e, "worker failed");
                failures += 1;
            }
            Err(_) => {
                warn!(worker_id, "worker panicked");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        Err(format!("{failures} of {concurrency} workers failed"))
    } else {
        Ok(())
    }
}

fn run_worker(worker_id: usize, addr: &str, proto: &str, count: u64) -> CmdResult<()> {
    let server_addr = addr
        .parse()
        .map_err(|e| format!("invalid --addr {addr:?}: {e}"))?;

    let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| format!("bind failed: {e}"))?;
    socket
        .send_to(codec::HELLO, server_addr)
        .map_err(|e| format!("failed to send HELLO: {e}"))?;

    let channel = artery::Channel::create(socket, server_addr, ChannelConfig::lossless())
        .map_err(|e| format!("failed to create channel: {e}"))?;

    let mut transport: Box<dyn Transport> = match proto {
        "gbn" => Box::new(new_gbn(channel, TransportConfig::new())),
        "sr" => Box::new(new_sr(channel, TransportConfig::new())),
        other => return Err(format!("unknown --proto {other:?}, expected gbn or sr")),
    };

    let mut buf = vec![0u8; 4096];
    for i in 0..count {
        let order = codec::Order {
            id: (worker_id as u64) * 1_000_000 + i,
            items: "pasta".to_string(),
        };

        let sent_at = Instant::now();
        transport
            .send(&codec::encode_order(&order))
            .map_err(|e| format!("send failed: {e}"))?;

        loop {
            let n = transport
                .recv(&mut buf, Duration::from_secs(5))
                .map_err(|e| format!("recv failed: {e}"))?;
            if n == 0 {
                return Err(format!("worker {worker_id} timed out waiting for order {}", order.id));
            }
            let line = String::from_utf8_lossy(&buf[..n]);
            match codec::decode_reply(&line) {
                Ok(reply) if reply.id == order.id => {
                    let rtt = sent_at.elapsed();
                    info!(worker_id, order_id = order.id, rtt_ms = rtt.as_millis() as u64, "reply received");
                    break;
                }
                _ => continue,
            }
        }
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
