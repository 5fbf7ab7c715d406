//! # CRSF Bridge
//!
//! Ground-side CRSF bridge process.
//!
//! Owns the serial device and wires the three long-lived loops: the receive
//! loop (link engine), the send scheduler (~100 Hz RC frames) and the
//! telemetry snapshot publisher. Control arrives through the command file;
//! telemetry leaves through the snapshot file. The HTTP surfaces live in the
//! `gateway` and `interpreter` binaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crsf_bridge::channels::ChannelStore;
use crsf_bridge::config::Config;
use crsf_bridge::joystick::Joystick;
use crsf_bridge::link::{receive_loop, Counters, LinkEngine, LinkEvents, LinkShared};
use crsf_bridge::scheduler::Scheduler;
use crsf_bridge::serial::SerialLink;
use crsf_bridge::telemetry::{publish_loop, SnapshotSources, TelemetryHandle};

/// Ground-side CRSF bridge: serial link engine, RC re-broadcast and
/// telemetry publisher.
#[derive(Parser)]
#[command(name = "crsf-bridge", version, about)]
struct Args {
    /// Serial device path (overrides the config file)
    device: Option<String>,

    /// Transmit RC frames even while the link is down (bench testing)
    #[arg(long)]
    notel: bool,

    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path))?,
        None => Config::default(),
    };
    if let Some(device) = &args.device {
        config.serial.port = device.clone();
    }
    if args.notel {
        config.send.ignore_telemetry = true;
        info!("Running in no-telemetry mode; link gating disabled");
    }

    info!("CRSF bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    // Serial port: open, drop stale queues, split into halves
    let mut serial = SerialLink::new(
        &config.serial.port,
        config.serial.baud_rate,
        Duration::from_millis(config.serial.read_timeout_ms),
    );
    serial
        .open()
        .with_context(|| format!("opening serial port {}", config.serial.port))?;
    serial.clear().context("clearing serial queues")?;
    let (reader, writer) = serial.split().context("splitting serial port")?;

    // Shared state owned here; tasks get capability clones
    let channels = ChannelStore::new();
    let telemetry = TelemetryHandle::default();
    let link_shared = Arc::new(LinkShared::default());
    let counters = Arc::new(Counters::default());
    let stop = Arc::new(AtomicBool::new(false));

    let events = LinkEvents {
        on_link_up: Some(Box::new(|| info!("Link up"))),
        on_link_down: Some(Box::new(|| warn!("Link down"))),
        on_channels: None,
    };

    let engine = LinkEngine::new(
        &config.link,
        channels.clone(),
        telemetry.clone(),
        link_shared.clone(),
        counters.clone(),
        events,
    );

    // Joystick is optional; the bridge runs without one
    let joystick_state = match Joystick::open(&config.joystick.device_path) {
        Ok(joystick) => {
            let state = joystick.state();
            let stop = stop.clone();
            tokio::task::spawn_blocking(move || joystick.run_blocking(stop));
            Some(state)
        }
        Err(e) => {
            warn!("Joystick unavailable: {}", e);
            None
        }
    };

    let receive = tokio::spawn(receive_loop(reader, engine, stop.clone()));

    let scheduler = Scheduler::new(
        writer,
        channels.clone(),
        link_shared.clone(),
        counters.clone(),
        joystick_state,
        &config.send,
        &config.files.command_path,
    );
    let transmit = tokio::spawn(scheduler.run(stop.clone()));

    let sources = SnapshotSources {
        channels,
        link: link_shared,
        counters,
        telemetry,
    };
    let publisher = tokio::spawn(publish_loop(
        config.files.telemetry_path.clone(),
        Duration::from_millis(config.files.publish_interval_ms),
        sources,
        stop.clone(),
    ));

    info!("CRSF bridge running on {}", config.serial.port);
    info!("Press Ctrl+C to exit");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    stop.store(true, Ordering::Relaxed);
    for (name, handle) in [
        ("receive", receive),
        ("transmit", transmit),
        ("publisher", publisher),
    ] {
        if tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .is_err()
        {
            warn!("{} loop did not stop in time", name);
        }
    }

    Ok(())
}
