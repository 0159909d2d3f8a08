// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Mocap Relay CLI
//!
//! Streams rigid body poses to UDP subscribers that register on the control
//! port. Frames come from the built-in synthetic producer.
//!
//! # Usage
//!
//! ```bash
//! # Default port (64923), three synthetic bodies at 120 Hz
//! mocap-relay
//!
//! # Custom port and config
//! mocap-relay --port 7000 --config relay.toml
//!
//! # More bodies, verbose
//! mocap-relay --synthetic-bodies 16 --log-level debug
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use mocap_relay::{Relay, RelayConfig, SyntheticProducer};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Mocap Relay - per-subscriber rigid body streaming over UDP
#[derive(Parser, Debug)]
#[command(name = "mocap-relay")]
#[command(author = "naskel.com")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about, long_about = None)]
struct Args {
    /// Configuration file (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address for the control port (0.0.0.0 for all interfaces)
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// UDP control port receiving registration requests
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum number of subscriptions
    #[arg(long)]
    max_subscriptions: Option<usize>,

    /// Maximum number of rigid bodies per frame
    #[arg(long)]
    max_rigid_bodies: Option<usize>,

    /// Warn when no frame arrives within this many milliseconds
    #[arg(long)]
    stall_timeout_ms: Option<u64>,

    /// Seconds between status lines (0 disables)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,

    /// Number of synthetic rigid bodies
    #[arg(long, default_value = "3")]
    synthetic_bodies: u16,

    /// Synthetic frame rate in Hz
    #[arg(long, default_value = "120", value_parser = clap::value_parser!(u32).range(1..=10_000))]
    synthetic_rate: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = build_config(&args)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mocap_relay={}", config.log_level)));
    fmt().with_env_filter(filter).with_thread_names(true).init();

    info!("+----------------------------------------------------+");
    info!(
        "|       Mocap Relay v{:<32}|",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Control:       {:35}|", config.control_addr());
    info!("|  Rigid bodies:  {:35}|", config.max_rigid_bodies);
    info!("|  Subscriptions: {:35}|", config.max_subscriptions);
    info!(
        "|  Stall timeout: {:35}|",
        format!("{}ms", config.stall_timeout_ms)
    );
    info!("+----------------------------------------------------+");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    let stats_interval = config.stats_interval();
    let relay = Relay::start(config).context("Failed to start relay")?;

    let producer = SyntheticProducer::new(args.synthetic_bodies, args.synthetic_rate)
        .spawn(relay.ingest())
        .context("Failed to start synthetic producer")?;

    info!(control = %relay.control_addr(), "Relay ready (Ctrl+C to stop)");

    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));

        if let Some(interval) = stats_interval {
            if last_report.elapsed() >= interval {
                log_status(&relay);
                last_report = Instant::now();
            }
        }
    }

    info!("Shutdown signal received, stopping relay...");
    let stats = relay.stats();
    relay.shutdown().context("Relay did not shut down cleanly")?;
    let frames = producer.stop();

    info!(
        frames_produced = frames,
        frames_dispatched = stats.frames_dispatched,
        datagrams_sent = stats.datagrams_sent,
        subscriptions = stats.subscriptions,
        "Relay shutdown complete"
    );
    Ok(())
}

fn build_config(args: &Args) -> Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => RelayConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => RelayConfig::default(),
    };

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.control_port = port;
    }
    if let Some(max) = args.max_subscriptions {
        config.max_subscriptions = max;
    }
    if let Some(max) = args.max_rigid_bodies {
        config.max_rigid_bodies = max;
    }
    if let Some(ms) = args.stall_timeout_ms {
        config.stall_timeout_ms = ms;
    }
    if let Some(secs) = args.stats_interval {
        config.stats_interval_secs = secs;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn log_status(relay: &Relay) {
    let stats = relay.stats();
    info!(
        frame = stats.frame_index,
        rigid_bodies = stats.tracked_rigid_bodies,
        subscriptions = stats.subscriptions,
        active = stats.active_subscriptions,
        datagrams = stats.datagrams_sent,
        send_errors = stats.send_errors,
        stalled = stats.frame_clock_stalled,
        "Relay status"
    );
}
