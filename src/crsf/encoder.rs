//! # CRSF Frame Encoder
//!
//! Encodes RC channels and arbitrary payloads into on-wire CRSF frames.

use super::crc::crc8;
use super::decoder::decode_code;
use super::protocol::*;
use crate::error::{BridgeError, Result};

/// Encode a pulse width in microseconds into an 11-bit channel code.
///
/// The nominal mapping is `code = 191 + (us - 1000) * 1601 / 1000`, rounded
/// to nearest. Because 1601 steps cover 1000 microseconds, a rounded code
/// does not always decode back to the input; in that case the code is nudged
/// by one step toward the target (unless pinned at a bound) so that every
/// integer microsecond in [1000, 2000] survives encode-then-decode exactly.
pub fn encode_us(us: u16) -> u16 {
    let target = us.clamp(CHANNEL_US_MIN, CHANNEL_US_MAX) as i32;
    let delta = (CRSF_CHANNEL_VALUE_2000 - CRSF_CHANNEL_VALUE_1000) as i32;

    let mut code = CRSF_CHANNEL_VALUE_1000 as i32 + ((target - 1000) * delta + 500) / 1000;
    code = code.clamp(CRSF_CHANNEL_VALUE_1000 as i32, CRSF_CHANNEL_VALUE_2000 as i32);

    let decoded = decode_code(code as u16) as i32;
    if decoded < target && code < CRSF_CHANNEL_VALUE_2000 as i32 {
        if decode_code((code + 1) as u16) as i32 == target {
            code += 1;
        }
    } else if decoded > target && code > CRSF_CHANNEL_VALUE_1000 as i32 {
        if decode_code((code - 1) as u16) as i32 == target {
            code -= 1;
        }
    }

    code as u16
}

/// Pack 16 channel pulse widths into the 22-byte RC channels payload.
///
/// Each channel is clamped to [1000, 2000] us, encoded to its 11-bit code
/// and packed LSB-first into a continuous bit stream:
///
/// ```text
/// Byte 0: Ch1[0:7]
/// Byte 1: Ch1[8:10] | Ch2[0:4]
/// Byte 2: Ch2[5:10] | Ch3[0:1]
/// ...
/// ```
pub fn pack_channels(channels: &RcChannels) -> [u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE] {
    let mut payload = [0u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE];
    let mut bit_index = 0;

    for &us in channels.iter() {
        let code = encode_us(us);

        for bit in 0..11 {
            if (code >> bit) & 1 == 1 {
                payload[bit_index / 8] |= 1 << (bit_index % 8);
            }
            bit_index += 1;
        }
    }

    payload
}

/// Assemble a complete frame: sync address, length, type, payload, CRC.
///
/// # Errors
///
/// Returns an error if the payload exceeds [`CRSF_MAX_PAYLOAD_SIZE`].
pub fn encode_frame(addr: u8, frame_type: u8, payload: &[u8]) -> Result<RawFrame> {
    if payload.len() > CRSF_MAX_PAYLOAD_SIZE {
        return Err(BridgeError::Protocol(format!(
            "Payload size {} exceeds maximum {}",
            payload.len(),
            CRSF_MAX_PAYLOAD_SIZE
        )));
    }

    let mut buf = [0u8; CRSF_MAX_PACKET_SIZE];
    buf[0] = addr;
    buf[1] = (payload.len() + 2) as u8; // type + payload + crc
    buf[2] = frame_type;
    buf[3..3 + payload.len()].copy_from_slice(payload);
    buf[3 + payload.len()] = crc8(&buf[2..3 + payload.len()]);

    Ok(RawFrame::from_parts(buf, payload.len() + 4))
}

/// Encode a complete RC channels frame addressed to the flight controller.
///
/// The result is always 26 bytes: sync + length + type + 22-byte payload + crc.
pub fn encode_rc_channels_frame(channels: &RcChannels) -> RawFrame {
    let payload = pack_channels(channels);
    // 22-byte payload is always within bounds
    encode_frame(
        CRSF_ADDRESS_FLIGHT_CONTROLLER,
        CRSF_FRAMETYPE_RC_CHANNELS_PACKED,
        &payload,
    )
    .unwrap_or_else(|_| RawFrame::from_parts([0u8; CRSF_MAX_PACKET_SIZE], 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::decoder::unpack_channels;

    #[test]
    fn test_encode_us_anchors() {
        assert_eq!(encode_us(1000), CRSF_CHANNEL_VALUE_1000);
        assert_eq!(encode_us(1500), CRSF_CHANNEL_VALUE_MID);
        assert_eq!(encode_us(2000), CRSF_CHANNEL_VALUE_2000);
    }

    #[test]
    fn test_encode_us_clamps_out_of_range() {
        assert_eq!(encode_us(500), CRSF_CHANNEL_VALUE_1000);
        assert_eq!(encode_us(2500), CRSF_CHANNEL_VALUE_2000);
        assert_eq!(encode_us(u16::MAX), CRSF_CHANNEL_VALUE_2000);
    }

    #[test]
    fn test_encode_us_round_trips_every_microsecond() {
        for us in CHANNEL_US_MIN..=CHANNEL_US_MAX {
            let code = encode_us(us);
            assert!((CRSF_CHANNEL_VALUE_1000..=CRSF_CHANNEL_VALUE_2000).contains(&code));
            assert_eq!(
                decode_code(code),
                us,
                "us {} encoded to {} which decodes elsewhere",
                us,
                code
            );
        }
    }

    #[test]
    fn test_pack_channels_payload_size() {
        let channels = [CHANNEL_US_MID; CRSF_NUM_CHANNELS];
        let payload = pack_channels(&channels);
        assert_eq!(payload.len(), CRSF_RC_CHANNELS_PAYLOAD_SIZE);
    }

    #[test]
    fn test_pack_channels_minimum_bit_pattern() {
        // 1000 us encodes to 191 = 0b000_1011_1111 in every slot
        let channels = [CHANNEL_US_MIN; CRSF_NUM_CHANNELS];
        let payload = pack_channels(&channels);

        // First channel occupies bits 0..11: 0xBF then 0b000 in the low bits
        assert_eq!(payload[0], 0xBF);
        assert_eq!(payload[1] & 0x07, 0x00);
    }

    #[test]
    fn test_pack_unpack_identity_per_slot() {
        for slot in 0..CRSF_NUM_CHANNELS {
            let mut channels = [CHANNEL_US_MID; CRSF_NUM_CHANNELS];
            channels[slot] = 1234;
            let unpacked = unpack_channels(&pack_channels(&channels));
            assert_eq!(unpacked[slot], 1234);
        }
    }

    #[test]
    fn test_encode_frame_layout() {
        let payload = [0x01u8, 0x02, 0x03];
        let frame = encode_frame(CRSF_ADDRESS_FLIGHT_CONTROLLER, 0x7F, &payload).unwrap();
        let bytes = frame.as_bytes();

        assert_eq!(bytes.len(), 7);
        assert_eq!(bytes[0], 0xC8);
        assert_eq!(bytes[1], 5); // type + 3 payload + crc
        assert_eq!(bytes[2], 0x7F);
        assert_eq!(&bytes[3..6], &payload);
        assert_eq!(bytes[6], crc8(&bytes[2..6]));
    }

    #[test]
    fn test_encode_frame_rejects_oversized_payload() {
        let payload = [0u8; CRSF_MAX_PAYLOAD_SIZE + 1];
        assert!(encode_frame(0xC8, 0x16, &payload).is_err());
    }

    #[test]
    fn test_encode_rc_channels_frame_structure() {
        let channels = [CHANNEL_US_MID; CRSF_NUM_CHANNELS];
        let frame = encode_rc_channels_frame(&channels);
        let bytes = frame.as_bytes();

        assert_eq!(bytes.len(), 26);
        assert_eq!(bytes[0], CRSF_ADDRESS_FLIGHT_CONTROLLER);
        assert_eq!(bytes[1], 0x18);
        assert_eq!(bytes[2], CRSF_FRAMETYPE_RC_CHANNELS_PACKED);
    }

    #[test]
    fn test_encode_frame_different_data_different_crc() {
        let frame1 = encode_rc_channels_frame(&[1000u16; CRSF_NUM_CHANNELS]);
        let frame2 = encode_rc_channels_frame(&[1500u16; CRSF_NUM_CHANNELS]);

        assert_ne!(frame1.as_bytes()[25], frame2.as_bytes()[25]);
    }
}
