//! # CRSF Protocol Module
//!
//! Implementation of the Crossfire (CRSF) protocol wire format.
//!
//! This module handles:
//! - RC channels packing (16 channels, 11-bit codes, microsecond fidelity)
//! - Telemetry payload parsing (GPS, battery, attitude, link stats, flight mode)
//! - CRC8-DVB-S2 checksum calculation
//! - Frame assembly

pub mod crc;
pub mod decoder;
pub mod encoder;
pub mod protocol;

// Re-export commonly used types and functions
pub use protocol::{
    Attitude,
    BatterySensor,
    GpsSensor,
    LinkStatistics,
    RawFrame,
    RcChannels,
    CRSF_ADDRESS_FLIGHT_CONTROLLER,
    CRSF_FRAMETYPE_ATTITUDE,
    CRSF_FRAMETYPE_BATTERY_SENSOR,
    CRSF_FRAMETYPE_FLIGHT_MODE,
    CRSF_FRAMETYPE_GPS,
    CRSF_FRAMETYPE_LINK_STATISTICS,
    CRSF_FRAMETYPE_RC_CHANNELS_PACKED,
    CRSF_MAX_PACKET_SIZE,
    CRSF_NUM_CHANNELS,
};

pub use encoder::{encode_frame, encode_rc_channels_frame, encode_us, pack_channels};

pub use decoder::{
    decode_code, parse_attitude, parse_battery, parse_flight_mode, parse_gps,
    parse_link_statistics, unpack_channels,
};

pub use crc::crc8;
