//! qnetsim CLI
//!
//! Loads a JSON topology, runs every network for a while and prints each
//! simulation event as one JSON line on stdout. Logs go to stderr.
//!
//! # Example
//!
//! ```bash
//! qnetsim --topology demos/hybrid.json --duration-ms 2000 \
//!     --send alice_pc,bob_pc,"hello over qkd"
//! ```

use clap::Parser;
use qnetsim::build_and_wire;
use qnetsim::config::TopologyDescription;
use qnetsim::events::ChannelSink;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// A message injected once the networks are running.
#[derive(Debug, Clone)]
struct Outgoing {
    from: String,
    to: String,
    message: String,
}

fn parse_send(value: &str) -> Result<Outgoing, String> {
    let mut parts = value.splitn(3, ',');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(from), Some(to), Some(message)) if !from.is_empty() && !to.is_empty() => Ok(Outgoing {
            from: from.trim().to_owned(),
            to: to.trim().to_owned(),
            message: message.to_owned(),
        }),
        _ => Err(format!("expected FROM,TO,MESSAGE, got {value:?}")),
    }
}

/// Hybrid classical/quantum network simulator
#[derive(Parser, Debug)]
#[command(name = "qnetsim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Topology description (JSON)
    #[arg(short, long)]
    topology: PathBuf,

    /// How long to run before stopping every network
    #[arg(short, long, default_value = "1000")]
    duration_ms: u64,

    /// Message to send between two hosts, as FROM,TO,MESSAGE. Repeatable.
    #[arg(long = "send", value_parser = parse_send)]
    sends: Vec<Outgoing>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,qnetsim=info")),
        )
        .init();

    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.topology)?;
    let description: TopologyDescription = serde_json::from_str(&raw)?;

    let (sink, mut events) = ChannelSink::new();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(%err, "event could not be encoded"),
            }
        }
    });

    let world = build_and_wire(&description, Arc::new(sink))?;
    info!(
        world = world.name(),
        duration_ms = args.duration_ms,
        "starting simulation"
    );
    world.start_all()?;

    for send in &args.sends {
        if let Err(err) = world.send_message(&send.from, &send.to, send.message.as_bytes()) {
            warn!(from = %send.from, to = %send.to, %err, "message not sent");
        }
    }

    tokio::time::sleep(Duration::from_millis(args.duration_ms)).await;
    world.stop_all();

    for node in world.nodes() {
        if let Some(host) = node.as_host() {
            for message in host.received() {
                info!(host = %host.identity().name, from = %message.from, text = %message.text(), "received");
            }
        }
    }

    // the sink closes once the world and any in-flight deliveries are gone
    drop(world);
    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        warn!("event stream still open after shutdown");
    }
    Ok(())
}
