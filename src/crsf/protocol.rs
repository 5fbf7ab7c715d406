//! # CRSF Protocol Constants and Types
//!
//! Core protocol definitions for CRSF (Crossfire) communication.

/// Device address of the flight controller; also the sync byte of every
/// frame this bridge accepts or emits.
pub const CRSF_ADDRESS_FLIGHT_CONTROLLER: u8 = 0xC8;

/// GPS telemetry packet type
pub const CRSF_FRAMETYPE_GPS: u8 = 0x02;

/// Battery sensor packet type
pub const CRSF_FRAMETYPE_BATTERY_SENSOR: u8 = 0x08;

/// Link Statistics packet type
pub const CRSF_FRAMETYPE_LINK_STATISTICS: u8 = 0x14;

/// RC Channels packet type
pub const CRSF_FRAMETYPE_RC_CHANNELS_PACKED: u8 = 0x16;

/// Attitude packet type
pub const CRSF_FRAMETYPE_ATTITUDE: u8 = 0x1E;

/// Flight mode packet type
pub const CRSF_FRAMETYPE_FLIGHT_MODE: u8 = 0x21;

/// Maximum total frame size: sync(1) + length(1) + type(1) + payload(N) + crc(1)
pub const CRSF_MAX_PACKET_SIZE: usize = 64;

/// Maximum CRSF payload size (64 - sync - length - type - crc)
pub const CRSF_MAX_PAYLOAD_SIZE: usize = 60;

/// Valid range of the on-wire length byte (type + payload + crc)
pub const CRSF_FRAME_LENGTH_MIN: u8 = 3;
pub const CRSF_FRAME_LENGTH_MAX: u8 = (CRSF_MAX_PAYLOAD_SIZE + 2) as u8;

/// Number of RC channels
pub const CRSF_NUM_CHANNELS: usize = 16;

/// RC channels payload size (16 channels x 11 bits)
pub const CRSF_RC_CHANNELS_PAYLOAD_SIZE: usize = 22;

/// Wire code corresponding to 1000 us
pub const CRSF_CHANNEL_VALUE_1000: u16 = 191;

/// Wire code corresponding to 1500 us
pub const CRSF_CHANNEL_VALUE_MID: u16 = 992;

/// Wire code corresponding to 2000 us
pub const CRSF_CHANNEL_VALUE_2000: u16 = 1792;

/// Channel pulse width bounds in microseconds
pub const CHANNEL_US_MIN: u16 = 1000;
pub const CHANNEL_US_MID: u16 = 1500;
pub const CHANNEL_US_MAX: u16 = 2000;

/// Link Statistics payload size
pub const CRSF_LINK_STATS_PAYLOAD_SIZE: usize = 10;

/// Battery Sensor payload size
pub const CRSF_BATTERY_SENSOR_PAYLOAD_SIZE: usize = 8;

/// GPS payload size
pub const CRSF_GPS_PAYLOAD_SIZE: usize = 15;

/// Attitude payload size
pub const CRSF_ATTITUDE_PAYLOAD_SIZE: usize = 6;

/// Raw attitude units per degree, observed on current flight-controller
/// firmware (the published protocol docs say degrees x 100; the wire
/// disagrees).
pub const ATTITUDE_UNITS_PER_DEGREE: f64 = 175.0;

/// RC channels array type, pulse widths in microseconds
pub type RcChannels = [u16; CRSF_NUM_CHANNELS];

/// Link statistics telemetry data, field-for-field from the 10-byte payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatistics {
    /// Uplink RSSI (antenna 1) in -dBm
    pub uplink_rssi_1: u8,

    /// Uplink RSSI (antenna 2) in -dBm (diversity)
    pub uplink_rssi_2: u8,

    /// Uplink link quality (0-100%)
    pub uplink_lq: u8,

    /// Uplink SNR in dB
    pub uplink_snr: i8,

    /// Active antenna (0 or 1)
    pub active_antenna: u8,

    /// RF mode / packet rate
    pub rf_mode: u8,

    /// Uplink TX power (encoded)
    pub uplink_tx_power: u8,

    /// Downlink RSSI in -dBm
    pub downlink_rssi: u8,

    /// Downlink link quality (0-100%)
    pub downlink_lq: u8,

    /// Downlink SNR in dB
    pub downlink_snr: i8,
}

/// GPS telemetry data in raw wire units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpsSensor {
    /// Latitude in degrees x 1e7
    pub latitude: i32,

    /// Longitude in degrees x 1e7
    pub longitude: i32,

    /// Ground speed in km/h x 10
    pub groundspeed: u16,

    /// Heading in degrees x 100
    pub heading: u16,

    /// Altitude in metres + 1000
    pub altitude: u16,

    /// Number of satellites
    pub satellites: u8,
}

/// Battery sensor telemetry data in engineering units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BatterySensor {
    /// Battery voltage in volts
    pub voltage: f64,

    /// Current draw in amperes
    pub current: f64,

    /// Capacity used in mAh
    pub capacity: f64,

    /// Battery remaining percentage (0-100%)
    pub remaining: u8,
}

/// Attitude telemetry: raw wire values and decoded degrees.
///
/// On-wire field order is pitch, roll, yaw (firmware-specific; differs from
/// the official CRSF ordering). Yaw is normalised to [0, 360).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Attitude {
    pub pitch_raw: i16,
    pub roll_raw: i16,
    pub yaw_raw: i16,

    /// Pitch in degrees
    pub pitch: f64,

    /// Roll in degrees
    pub roll: f64,

    /// Yaw in degrees, always in [0, 360)
    pub yaw: f64,
}

/// A complete on-wire frame in a fixed buffer; no heap allocation per frame.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame {
    buf: [u8; CRSF_MAX_PACKET_SIZE],
    len: usize,
}

impl RawFrame {
    /// Build a frame from its already-encoded bytes.
    ///
    /// Callers are expected to pass at most [`CRSF_MAX_PACKET_SIZE`] bytes;
    /// the constructor is crate-private and the encoder upholds this.
    pub(crate) fn from_parts(buf: [u8; CRSF_MAX_PACKET_SIZE], len: usize) -> Self {
        debug_assert!(len <= CRSF_MAX_PACKET_SIZE);
        Self { buf, len }
    }

    /// The on-wire bytes of the frame
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Total frame length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_code_anchors() {
        assert_eq!(CRSF_CHANNEL_VALUE_1000, 191);
        assert_eq!(CRSF_CHANNEL_VALUE_MID, 992);
        assert_eq!(CRSF_CHANNEL_VALUE_2000, 1792);
    }

    #[test]
    fn test_frame_constants() {
        assert_eq!(CRSF_ADDRESS_FLIGHT_CONTROLLER, 0xC8);
        assert_eq!(CRSF_FRAMETYPE_RC_CHANNELS_PACKED, 0x16);
        assert_eq!(CRSF_FRAMETYPE_LINK_STATISTICS, 0x14);
        assert_eq!(CRSF_FRAME_LENGTH_MAX, 62);
        assert_eq!(CRSF_NUM_CHANNELS, 16);
    }

    #[test]
    fn test_raw_frame_accessors() {
        let mut buf = [0u8; CRSF_MAX_PACKET_SIZE];
        buf[0] = CRSF_ADDRESS_FLIGHT_CONTROLLER;
        buf[1] = 0x18;
        let frame = RawFrame::from_parts(buf, 26);
        assert_eq!(frame.len(), 26);
        assert!(!frame.is_empty());
        assert_eq!(frame.as_bytes()[0], 0xC8);
        assert_eq!(frame.as_bytes().len(), 26);
    }
}
