//! # Telemetry Module
//!
//! Live decoded sensor state and its two egress surfaces.
//!
//! The link engine is the only writer of [`TelemetryHandle`]; HTTP responders
//! and the snapshot-file publisher are readers. Readers always see a
//! consistent copy of the whole record (the coarse lock is held for the
//! duration of the copy), but there is no ordering guarantee across sensor
//! groups between frames.

pub mod shared_file;

use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channels::ChannelStore;
use crate::crsf::protocol::{Attitude, BatterySensor, GpsSensor, LinkStatistics};
use crate::link::{Counters, LinkShared};
use shared_file::SnapshotRecord;

/// Most recent decoded value of every sensor group.
#[derive(Debug, Clone, Default)]
pub struct TelemetryState {
    pub gps: GpsSensor,
    pub battery: BatterySensor,
    pub attitude: Attitude,
    pub link_stats: LinkStatistics,
    pub flight_mode: String,
}

/// Shared single-writer / many-reader telemetry state.
#[derive(Debug, Clone, Default)]
pub struct TelemetryHandle {
    inner: Arc<RwLock<TelemetryState>>,
}

impl TelemetryHandle {
    pub fn update_gps(&self, gps: GpsSensor) {
        self.inner.write().unwrap().gps = gps;
    }

    pub fn update_battery(&self, battery: BatterySensor) {
        self.inner.write().unwrap().battery = battery;
    }

    pub fn update_attitude(&self, attitude: Attitude) {
        self.inner.write().unwrap().attitude = attitude;
    }

    pub fn update_link_statistics(&self, stats: LinkStatistics) {
        self.inner.write().unwrap().link_stats = stats;
    }

    pub fn update_flight_mode(&self, mode: String) {
        let mut guard = self.inner.write().unwrap();
        if guard.flight_mode != mode {
            debug!("Flight mode changed to {:?}", mode);
            guard.flight_mode = mode;
        }
    }

    /// Consistent copy of the whole record.
    pub fn read(&self) -> TelemetryState {
        self.inner.read().unwrap().clone()
    }
}

/// Capability bundle the publisher and the JSON surface sample from.
#[derive(Clone)]
pub struct SnapshotSources {
    pub channels: ChannelStore,
    pub link: Arc<LinkShared>,
    pub counters: Arc<Counters>,
    pub telemetry: TelemetryHandle,
}

impl SnapshotSources {
    /// Assemble one full snapshot record from the live state.
    pub fn collect(&self) -> SnapshotRecord {
        let state = self.telemetry.read();
        let channels = self.channels.snapshot();

        let mut record = SnapshotRecord {
            link_up: self.link.is_up(),
            last_receive_ms: self.link.last_receive_ms() as u32,
            channels: [0i32; 16],
            packets_received: self.counters.received.load(Ordering::Relaxed),
            packets_sent: self.counters.sent.load(Ordering::Relaxed),
            packets_lost: self.counters.lost.load(Ordering::Relaxed),
            latitude: state.gps.latitude as f64 / 10_000_000.0,
            longitude: state.gps.longitude as f64 / 10_000_000.0,
            altitude: state.gps.altitude as f64 - 1000.0,
            speed: state.gps.groundspeed as f64 / 10.0,
            voltage: state.battery.voltage,
            current: state.battery.current,
            capacity: state.battery.capacity,
            remaining: state.battery.remaining,
            roll: state.attitude.roll,
            pitch: state.attitude.pitch,
            yaw: state.attitude.yaw,
            roll_raw: state.attitude.roll_raw,
            pitch_raw: state.attitude.pitch_raw,
            yaw_raw: state.attitude.yaw_raw,
        };
        for (slot, &us) in record.channels.iter_mut().zip(channels.iter()) {
            *slot = us as i32;
        }
        record
    }
}

/// Periodically rewrite the snapshot file for out-of-process consumers.
///
/// Each publish is a full open-truncate-write; a racing reader can observe a
/// short record and must validate the read length. Write failures are logged
/// and retried on the next tick.
pub async fn publish_loop(
    path: String,
    interval: Duration,
    sources: SnapshotSources,
    stop: Arc<std::sync::atomic::AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        let record = sources.collect();
        if let Err(e) = tokio::fs::write(&path, record.encode()).await {
            debug!("Snapshot publish to {} failed: {}", path, e);
        }
        tokio::time::sleep(interval).await;
    }
}

/// The telemetry JSON document served by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryDocument {
    pub link_up: bool,
    pub last_receive: u32,
    pub active_port: String,
    pub timestamp: String,
    pub channels: Vec<i32>,
    pub packets_received: u32,
    pub packets_sent: u32,
    pub packets_lost: u32,
    pub gps: GpsDocument,
    pub battery: BatteryDocument,
    pub attitude: AttitudeDocument,
    pub attitude_raw: AttitudeRawDocument,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsDocument {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryDocument {
    pub voltage: f64,
    pub current: f64,
    pub capacity: f64,
    pub remaining: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttitudeDocument {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttitudeRawDocument {
    pub roll: i16,
    pub pitch: i16,
    pub yaw: i16,
}

impl TelemetryDocument {
    /// Build the JSON document from a decoded snapshot record.
    pub fn from_record(record: &SnapshotRecord, active_port: &str) -> Self {
        Self {
            link_up: record.link_up,
            last_receive: record.last_receive_ms,
            active_port: active_port.to_string(),
            timestamp: timestamp_hms(),
            channels: record.channels.to_vec(),
            packets_received: record.packets_received,
            packets_sent: record.packets_sent,
            packets_lost: record.packets_lost,
            gps: GpsDocument {
                latitude: record.latitude,
                longitude: record.longitude,
                altitude: record.altitude,
                speed: record.speed,
            },
            battery: BatteryDocument {
                voltage: record.voltage,
                current: record.current,
                capacity: record.capacity,
                remaining: record.remaining,
            },
            attitude: AttitudeDocument {
                roll: record.roll,
                pitch: record.pitch,
                yaw: record.yaw,
            },
            attitude_raw: AttitudeRawDocument {
                roll: record.roll_raw,
                pitch: record.pitch_raw,
                yaw: record.yaw_raw,
            },
        }
    }
}

/// Wall-clock `HH:MM:SS.mmm` (UTC).
pub fn timestamp_hms() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs();
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60,
        now.subsec_millis()
    )
}
