//! # CRSF Frame Decoder
//!
//! Unpacks RC channel payloads and parses telemetry payloads (GPS, battery,
//! attitude, link statistics, flight mode).
//!
//! All multi-byte wire integers are big-endian and are assembled byte by
//! byte; nothing here aliases the receive buffer through raw memory.

use super::protocol::*;
use crate::error::{BridgeError, Result};

/// Decode an 11-bit channel code into a pulse width in microseconds.
///
/// Codes outside [191, 1792] are clamped before conversion, so the result is
/// always in [1000, 2000].
pub fn decode_code(code: u16) -> u16 {
    let code = code.clamp(CRSF_CHANNEL_VALUE_1000, CRSF_CHANNEL_VALUE_2000) as i32;
    let delta = (CRSF_CHANNEL_VALUE_2000 - CRSF_CHANNEL_VALUE_1000) as i32;

    (1000 + ((code - CRSF_CHANNEL_VALUE_1000 as i32) * 1000 + delta / 2) / delta) as u16
}

/// Unpack the 22-byte RC channels payload into 16 pulse widths.
///
/// The bit stream is the inverse of [`pack_channels`](super::encoder::pack_channels):
/// 11 bits per channel, LSB first.
pub fn unpack_channels(payload: &[u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE]) -> RcChannels {
    let mut channels = [0u16; CRSF_NUM_CHANNELS];
    let mut bit_index = 0;

    for slot in channels.iter_mut() {
        let mut code: u16 = 0;
        for bit in 0..11 {
            if payload[bit_index / 8] >> (bit_index % 8) & 1 == 1 {
                code |= 1 << bit;
            }
            bit_index += 1;
        }
        *slot = decode_code(code);
    }

    channels
}

/// Parse a GPS payload (15 bytes) into raw wire units.
///
/// # Errors
///
/// Returns an error if the payload is shorter than 15 bytes.
pub fn parse_gps(payload: &[u8]) -> Result<GpsSensor> {
    if payload.len() < CRSF_GPS_PAYLOAD_SIZE {
        return Err(BridgeError::Protocol(format!(
            "GPS payload too short: {} bytes",
            payload.len()
        )));
    }

    let latitude = i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let longitude = i32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    let groundspeed = u16::from_be_bytes([payload[8], payload[9]]);
    let heading = u16::from_be_bytes([payload[10], payload[11]]);
    let altitude = u16::from_be_bytes([payload[12], payload[13]]);
    let satellites = payload[14];

    Ok(GpsSensor {
        latitude,
        longitude,
        groundspeed,
        heading,
        altitude,
        satellites,
    })
}

/// Parse a battery sensor payload (8 bytes).
///
/// Wire units: voltage in centivolts, current in deci-amps, capacity as a
/// 24-bit big-endian mAh count, remaining as a percentage byte.
///
/// # Errors
///
/// Returns an error if the payload is shorter than 8 bytes.
pub fn parse_battery(payload: &[u8]) -> Result<BatterySensor> {
    if payload.len() < CRSF_BATTERY_SENSOR_PAYLOAD_SIZE {
        return Err(BridgeError::Protocol(format!(
            "Battery payload too short: {} bytes",
            payload.len()
        )));
    }

    let voltage_cv = u16::from_be_bytes([payload[0], payload[1]]);
    let current_da = u16::from_be_bytes([payload[2], payload[3]]);
    let capacity_mah =
        ((payload[4] as u32) << 16) | ((payload[5] as u32) << 8) | payload[6] as u32;
    let remaining = payload[7];

    Ok(BatterySensor {
        voltage: voltage_cv as f64 / 100.0,
        current: current_da as f64 / 10.0,
        capacity: capacity_mah as f64,
        remaining,
    })
}

/// Parse an attitude payload (6 bytes: three big-endian int16).
///
/// The on-wire field order is pitch, roll, yaw as observed on current
/// flight-controller firmware; this differs from the official CRSF ordering
/// (roll first) and must be confirmed against the deployed firmware.
/// Raw units convert to degrees at 1/175.0; yaw is normalised to [0, 360).
///
/// # Errors
///
/// Returns an error if the payload is shorter than 6 bytes.
pub fn parse_attitude(payload: &[u8]) -> Result<Attitude> {
    if payload.len() < CRSF_ATTITUDE_PAYLOAD_SIZE {
        return Err(BridgeError::Protocol(format!(
            "Attitude payload too short: {} bytes",
            payload.len()
        )));
    }

    let pitch_raw = i16::from_be_bytes([payload[0], payload[1]]);
    let roll_raw = i16::from_be_bytes([payload[2], payload[3]]);
    let yaw_raw = i16::from_be_bytes([payload[4], payload[5]]);

    let mut yaw = yaw_raw as f64 / ATTITUDE_UNITS_PER_DEGREE;
    while yaw < 0.0 {
        yaw += 360.0;
    }
    while yaw >= 360.0 {
        yaw -= 360.0;
    }

    Ok(Attitude {
        pitch_raw,
        roll_raw,
        yaw_raw,
        pitch: pitch_raw as f64 / ATTITUDE_UNITS_PER_DEGREE,
        roll: roll_raw as f64 / ATTITUDE_UNITS_PER_DEGREE,
        yaw,
    })
}

/// Parse a link statistics payload (10 bytes, copied field for field).
///
/// # Errors
///
/// Returns an error if the payload is shorter than 10 bytes.
pub fn parse_link_statistics(payload: &[u8]) -> Result<LinkStatistics> {
    if payload.len() < CRSF_LINK_STATS_PAYLOAD_SIZE {
        return Err(BridgeError::Protocol(format!(
            "Link stats payload too short: {} bytes",
            payload.len()
        )));
    }

    Ok(LinkStatistics {
        uplink_rssi_1: payload[0],
        uplink_rssi_2: payload[1],
        uplink_lq: payload[2],
        uplink_snr: payload[3] as i8,
        active_antenna: payload[4],
        rf_mode: payload[5],
        uplink_tx_power: payload[6],
        downlink_rssi: payload[7],
        downlink_lq: payload[8],
        downlink_snr: payload[9] as i8,
    })
}

/// Parse a flight mode payload: variable-length ASCII, NUL-terminated.
pub fn parse_flight_mode(payload: &[u8]) -> String {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}
