//! # CRSF Link Engine
//!
//! The byte-level framing state machine and link lifecycle.
//!
//! The engine owns the receive buffer, consumes frames from the front of it,
//! validates lengths and CRCs, dispatches decoded payloads into the channel
//! store and the telemetry state, and runs the two wall-clock timers: the
//! packet timeout that flushes a stalled buffer and the failsafe timer that
//! declares the link down after prolonged silence.
//!
//! The engine is synchronous and takes the current monotonic time in
//! milliseconds as a parameter, so every timing property is testable without
//! sleeping. The async [`receive_loop`] feeds it from a serial port.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::channels::ChannelStore;
use crate::config::LinkConfig;
use crate::crsf::crc::crc8;
use crate::crsf::decoder::{
    parse_attitude, parse_battery, parse_flight_mode, parse_gps, parse_link_statistics,
    unpack_channels,
};
use crate::crsf::protocol::*;
use crate::serial::port_trait::PortReader;
use crate::telemetry::TelemetryHandle;

/// How many bytes one engine step will read before yielding.
const READ_CHUNK: usize = 32;

/// Link state visible to other threads without taking a lock.
#[derive(Debug, Default)]
pub struct LinkShared {
    link_up: AtomicBool,
    last_receive_ms: AtomicU64,
}

impl LinkShared {
    pub fn is_up(&self) -> bool {
        self.link_up.load(Ordering::Relaxed)
    }

    pub fn last_receive_ms(&self) -> u64 {
        self.last_receive_ms.load(Ordering::Relaxed)
    }
}

/// Frame traffic counters.
#[derive(Debug, Default)]
pub struct Counters {
    /// CRC-valid frames addressed to the flight controller
    pub received: AtomicU32,
    /// RC channel frames emitted on the wire
    pub sent: AtomicU32,
    /// Frames discarded whole for a CRC mismatch
    pub lost: AtomicU32,
}

/// Link lifecycle callbacks. Any member may be absent; dispatch is
/// synchronous inside the receive step.
#[derive(Default)]
pub struct LinkEvents {
    pub on_link_up: Option<Box<dyn Fn() + Send>>,
    pub on_link_down: Option<Box<dyn Fn() + Send>>,
    pub on_channels: Option<Box<dyn Fn() + Send>>,
}

/// The framing state machine and link lifecycle.
pub struct LinkEngine {
    rx_buf: [u8; CRSF_MAX_PACKET_SIZE],
    rx_len: usize,
    last_receive_ms: u64,
    last_channels_ms: u64,
    link_up: bool,
    packet_timeout_ms: u64,
    failsafe_timeout_ms: u64,
    channels: ChannelStore,
    telemetry: TelemetryHandle,
    shared: Arc<LinkShared>,
    counters: Arc<Counters>,
    events: LinkEvents,
}

impl LinkEngine {
    pub fn new(
        config: &LinkConfig,
        channels: ChannelStore,
        telemetry: TelemetryHandle,
        shared: Arc<LinkShared>,
        counters: Arc<Counters>,
        events: LinkEvents,
    ) -> Self {
        Self {
            rx_buf: [0u8; CRSF_MAX_PACKET_SIZE],
            rx_len: 0,
            last_receive_ms: 0,
            last_channels_ms: 0,
            link_up: false,
            packet_timeout_ms: config.packet_timeout_ms,
            failsafe_timeout_ms: config.failsafe_timeout_ms,
            channels,
            telemetry,
            shared,
            counters,
            events,
        }
    }

    pub fn link_up(&self) -> bool {
        self.link_up
    }

    pub fn last_receive_ms(&self) -> u64 {
        self.last_receive_ms
    }

    pub fn last_channels_ms(&self) -> u64 {
        self.last_channels_ms
    }

    #[cfg(test)]
    pub(crate) fn rx_len(&self) -> usize {
        self.rx_len
    }

    /// Accept one byte from the wire at time `now_ms`.
    ///
    /// Every received byte counts as link activity, valid frame or not. The
    /// buffer never exceeds 64 bytes: if a byte lands in the last slot and no
    /// frame could be consumed, the whole buffer is reset.
    pub fn feed_byte(&mut self, b: u8, now_ms: u64) {
        self.last_receive_ms = now_ms;
        self.shared.last_receive_ms.store(now_ms, Ordering::Relaxed);

        self.rx_buf[self.rx_len] = b;
        self.rx_len += 1;
        self.consume_frames(now_ms);

        if self.rx_len == CRSF_MAX_PACKET_SIZE {
            self.rx_len = 0;
        }
    }

    /// Test/bench convenience: feed a byte sequence at one timestamp.
    pub fn feed_bytes(&mut self, bytes: &[u8], now_ms: u64) {
        for &b in bytes {
            self.feed_byte(b, now_ms);
        }
    }

    /// Run the two timers. Call once per receive-loop iteration.
    pub fn tick(&mut self, now_ms: u64) {
        // Stalled partial frame: flush one byte at a time, re-running the
        // consume loop after each shift so a complete frame behind garbage
        // still gets through.
        if self.rx_len > 0 && now_ms.saturating_sub(self.last_receive_ms) > self.packet_timeout_ms {
            trace!("Packet timeout, flushing {} buffered bytes", self.rx_len);
            while self.rx_len > 0 {
                self.shift(1);
                self.consume_frames(now_ms);
            }
        }

        if self.link_up
            && now_ms.saturating_sub(self.last_receive_ms) > self.failsafe_timeout_ms
        {
            warn!(
                "Link down: no data for {} ms",
                now_ms.saturating_sub(self.last_receive_ms)
            );
            self.link_up = false;
            self.shared.link_up.store(false, Ordering::Relaxed);
            if let Some(cb) = &self.events.on_link_down {
                cb();
            }
        }
    }

    /// Consume every complete frame at the front of the buffer.
    fn consume_frames(&mut self, now_ms: u64) {
        loop {
            if self.rx_len < 2 {
                return;
            }

            let len = self.rx_buf[1] as usize;
            if len < CRSF_FRAME_LENGTH_MIN as usize || len > CRSF_FRAME_LENGTH_MAX as usize {
                // Implausible length byte: resync on the next candidate
                self.shift(1);
                continue;
            }

            if self.rx_len < len + 2 {
                return;
            }

            let wire_crc = self.rx_buf[len + 1];
            let calc_crc = crc8(&self.rx_buf[2..len + 1]);
            if calc_crc == wire_crc {
                self.dispatch(len, now_ms);
            } else {
                // Discard the whole suspected frame, not one byte
                self.counters.lost.fetch_add(1, Ordering::Relaxed);
                trace!("CRC mismatch: got {:02X}, expected {:02X}", wire_crc, calc_crc);
            }
            self.shift(len + 2);
        }
    }

    /// Shift the receive buffer down by `cnt` bytes.
    fn shift(&mut self, cnt: usize) {
        if cnt >= self.rx_len {
            self.rx_len = 0;
            return;
        }
        self.rx_buf.copy_within(cnt..self.rx_len, 0);
        self.rx_len -= cnt;
    }

    /// Route a CRC-valid frame to its payload handler.
    fn dispatch(&mut self, len: usize, now_ms: u64) {
        if self.rx_buf[0] != CRSF_ADDRESS_FLIGHT_CONTROLLER {
            return;
        }

        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let frame_type = self.rx_buf[2];
        let payload_len = len - 2;
        let mut payload = [0u8; CRSF_MAX_PAYLOAD_SIZE];
        payload[..payload_len].copy_from_slice(&self.rx_buf[3..3 + payload_len]);
        let payload = &payload[..payload_len];

        match frame_type {
            CRSF_FRAMETYPE_RC_CHANNELS_PACKED => self.handle_rc_channels(payload, now_ms),
            CRSF_FRAMETYPE_GPS => match parse_gps(payload) {
                Ok(gps) => self.telemetry.update_gps(gps),
                Err(e) => debug!("Bad GPS payload: {}", e),
            },
            CRSF_FRAMETYPE_LINK_STATISTICS => match parse_link_statistics(payload) {
                Ok(stats) => self.telemetry.update_link_statistics(stats),
                Err(e) => debug!("Bad link statistics payload: {}", e),
            },
            CRSF_FRAMETYPE_ATTITUDE => match parse_attitude(payload) {
                Ok(att) => self.telemetry.update_attitude(att),
                Err(e) => debug!("Bad attitude payload: {}", e),
            },
            CRSF_FRAMETYPE_BATTERY_SENSOR => match parse_battery(payload) {
                Ok(battery) => self.telemetry.update_battery(battery),
                Err(e) => debug!("Bad battery payload: {}", e),
            },
            CRSF_FRAMETYPE_FLIGHT_MODE => {
                self.telemetry.update_flight_mode(parse_flight_mode(payload));
            }
            _ => {
                // Unknown frame types are not an error
                trace!("Ignoring frame type 0x{:02X}", frame_type);
            }
        }
    }

    fn handle_rc_channels(&mut self, payload: &[u8], now_ms: u64) {
        if payload.len() != CRSF_RC_CHANNELS_PAYLOAD_SIZE {
            debug!("Bad RC channels payload length: {}", payload.len());
            return;
        }
        let mut packed = [0u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE];
        packed.copy_from_slice(payload);

        let channels = unpack_channels(&packed);
        self.channels.store_frame(&channels);
        self.last_channels_ms = now_ms;

        if !self.link_up {
            self.link_up = true;
            self.shared.link_up.store(true, Ordering::Relaxed);
            if let Some(cb) = &self.events.on_link_up {
                cb();
            }
        }

        if let Some(cb) = &self.events.on_channels {
            cb();
        }
    }
}

/// Drive the engine from a serial reader until `stop` is set.
///
/// One iteration reads at most [`READ_CHUNK`] bytes (each bounded by the
/// port's read timeout, so the loop breathes in total silence), then runs the
/// timers. Transport errors are logged and retried on the next iteration.
pub async fn receive_loop<R: PortReader>(
    mut reader: R,
    mut engine: LinkEngine,
    stop: Arc<AtomicBool>,
) {
    let start = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        for _ in 0..READ_CHUNK {
            match reader.read_byte().await {
                Ok(Some(b)) => engine.feed_byte(b, start.elapsed().as_millis() as u64),
                Ok(None) => break,
                Err(e) => {
                    warn!("Serial read error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    break;
                }
            }
        }
        engine.tick(start.elapsed().as_millis() as u64);
    }
    debug!("Receive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::encoder::{encode_frame, encode_rc_channels_frame};
    use std::sync::atomic::AtomicUsize;

    struct Harness {
        engine: LinkEngine,
        channels: ChannelStore,
        telemetry: TelemetryHandle,
        shared: Arc<LinkShared>,
        counters: Arc<Counters>,
        ups: Arc<AtomicUsize>,
        downs: Arc<AtomicUsize>,
        frames: Arc<AtomicUsize>,
    }

    fn harness() -> Harness {
        let channels = ChannelStore::new();
        let telemetry = TelemetryHandle::default();
        let shared = Arc::new(LinkShared::default());
        let counters = Arc::new(Counters::default());
        let ups = Arc::new(AtomicUsize::new(0));
        let downs = Arc::new(AtomicUsize::new(0));
        let frames = Arc::new(AtomicUsize::new(0));

        let events = LinkEvents {
            on_link_up: Some(Box::new({
                let ups = ups.clone();
                move || {
                    ups.fetch_add(1, Ordering::Relaxed);
                }
            })),
            on_link_down: Some(Box::new({
                let downs = downs.clone();
                move || {
                    downs.fetch_add(1, Ordering::Relaxed);
                }
            })),
            on_channels: Some(Box::new({
                let frames = frames.clone();
                move || {
                    frames.fetch_add(1, Ordering::Relaxed);
                }
            })),
        };

        let engine = LinkEngine::new(
            &crate::config::LinkConfig::default(),
            channels.clone(),
            telemetry.clone(),
            shared.clone(),
            counters.clone(),
            events,
        );

        Harness {
            engine,
            channels,
            telemetry,
            shared,
            counters,
            ups,
            downs,
            frames,
        }
    }

    fn rc_frame(us: u16) -> Vec<u8> {
        encode_rc_channels_frame(&[us; CRSF_NUM_CHANNELS])
            .as_bytes()
            .to_vec()
    }

    #[test]
    fn test_rc_channels_frame_brings_link_up() {
        let mut h = harness();

        // All-zero payload: every code clamps to 1000 us
        let mut frame = vec![0xC8, 0x18, 0x16];
        frame.extend_from_slice(&[0u8; 22]);
        frame.push(crc8(&frame[2..]));

        h.engine.feed_bytes(&frame, 5);

        assert!(h.engine.link_up());
        assert!(h.shared.is_up());
        assert_eq!(h.channels.snapshot(), [1000u16; 16]);
        assert_eq!(h.ups.load(Ordering::Relaxed), 1);
        assert_eq!(h.frames.load(Ordering::Relaxed), 1);
        assert_eq!(h.counters.received.load(Ordering::Relaxed), 1);
        assert_eq!(h.engine.rx_len(), 0);
    }

    #[test]
    fn test_sent_frame_decodes_to_same_channels() {
        let mut h = harness();
        let frame = encode_rc_channels_frame(&[1500u16; 16]);

        assert_eq!(frame.len(), 26);
        assert_eq!(&frame.as_bytes()[..3], &[0xC8, 0x18, 0x16]);

        h.engine.feed_bytes(frame.as_bytes(), 1);
        assert_eq!(h.channels.snapshot(), [1500u16; 16]);
    }

    #[test]
    fn test_corrupted_crc_discards_whole_frame_silently() {
        let mut h = harness();
        let mut frame = rc_frame(1500);
        *frame.last_mut().unwrap() ^= 0xFF;

        h.engine.feed_bytes(&frame, 1);

        assert!(!h.engine.link_up());
        assert_eq!(h.ups.load(Ordering::Relaxed), 0);
        assert_eq!(h.frames.load(Ordering::Relaxed), 0);
        assert_eq!(h.channels.snapshot(), [1500u16; 16]); // untouched defaults
        assert_eq!(h.counters.lost.load(Ordering::Relaxed), 1);
        assert_eq!(h.engine.rx_len(), 0);
    }

    #[test]
    fn test_resync_after_garbage_prefix() {
        let mut h = harness();

        // 0xFF length bytes are implausible, so the engine resyncs byte by byte
        let mut stream = vec![0xFFu8; 40];
        stream.extend_from_slice(&rc_frame(1750));
        h.engine.feed_bytes(&stream, 1);

        assert!(h.engine.link_up());
        assert_eq!(h.channels.snapshot(), [1750u16; 16]);
    }

    #[test]
    fn test_buffer_never_exceeds_max_and_terminates() {
        let mut h = harness();

        // Pseudo-random bytes; xorshift keeps the test deterministic
        let mut x: u32 = 0x1234_5678;
        for i in 0..4096 {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            h.engine.feed_byte(x as u8, i / 16);
            assert!(h.engine.rx_len() < CRSF_MAX_PACKET_SIZE);
        }
    }

    #[test]
    fn test_link_up_fires_once_per_rising_edge() {
        let mut h = harness();

        for _ in 0..5 {
            h.engine.feed_bytes(&rc_frame(1500), 10);
        }
        assert_eq!(h.ups.load(Ordering::Relaxed), 1);
        assert_eq!(h.frames.load(Ordering::Relaxed), 5);

        // Silence past the failsafe window takes the link down once
        h.engine.tick(10 + 120_001);
        assert_eq!(h.downs.load(Ordering::Relaxed), 1);
        assert!(!h.engine.link_up());

        // And the next accepted frame re-arms the rising edge
        h.engine.feed_bytes(&rc_frame(1500), 120_100);
        assert_eq!(h.ups.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_failsafe_boundary_is_exclusive() {
        let mut h = harness();
        h.engine.feed_bytes(&rc_frame(1500), 1_000);
        assert!(h.engine.link_up());

        // Exactly 120 000 ms of silence: still up
        h.engine.tick(1_000 + 120_000);
        assert!(h.engine.link_up());
        assert_eq!(h.downs.load(Ordering::Relaxed), 0);

        // One millisecond past: down
        h.engine.tick(1_000 + 120_001);
        assert!(!h.engine.link_up());
        assert!(!h.shared.is_up());
        assert_eq!(h.downs.load(Ordering::Relaxed), 1);

        // No repeated callback while already down
        h.engine.tick(1_000 + 500_000);
        assert_eq!(h.downs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_packet_timeout_flushes_stalled_buffer() {
        let mut h = harness();

        // A partial frame: valid header, truncated payload
        h.engine.feed_bytes(&[0xC8, 0x18, 0x16, 0x01, 0x02], 100);
        assert_eq!(h.engine.rx_len(), 5);

        // Within the window the bytes stay buffered
        h.engine.tick(150);
        assert_eq!(h.engine.rx_len(), 5);

        // Past the window the buffer drains to empty
        h.engine.tick(201);
        assert_eq!(h.engine.rx_len(), 0);
    }

    #[test]
    fn test_packet_timeout_recovers_embedded_frame() {
        let mut h = harness();

        // A garbage header with a plausible length (0x1C) claims more bytes
        // than the stream holds; only the timeout flush can recover the real
        // frame buried behind it.
        let mut stream = vec![0xC8u8, 0x1C];
        stream.extend_from_slice(&rc_frame(1600));
        h.engine.feed_bytes(&stream, 100);
        assert_eq!(h.engine.rx_len(), 28);
        assert!(!h.engine.link_up());

        h.engine.tick(201);
        assert_eq!(h.engine.rx_len(), 0);
        assert!(h.engine.link_up());
        assert_eq!(h.channels.snapshot(), [1600u16; 16]);
    }

    #[test]
    fn test_telemetry_frames_update_state() {
        let mut h = harness();

        // Attitude: pitch 0, roll 1750, yaw 3500
        let mut payload = Vec::new();
        payload.extend_from_slice(&0i16.to_be_bytes());
        payload.extend_from_slice(&1750i16.to_be_bytes());
        payload.extend_from_slice(&3500i16.to_be_bytes());
        let frame = encode_frame(0xC8, CRSF_FRAMETYPE_ATTITUDE, &payload).unwrap();
        h.engine.feed_bytes(frame.as_bytes(), 1);

        let state = h.telemetry.read();
        assert!((state.attitude.roll - 10.0).abs() < 0.01);
        assert!((state.attitude.pitch - 0.0).abs() < 0.01);
        assert!((state.attitude.yaw - 20.0).abs() < 0.01);

        // Battery
        let frame = encode_frame(
            0xC8,
            CRSF_FRAMETYPE_BATTERY_SENSOR,
            &[0x04, 0x19, 0x00, 0x7D, 0x00, 0x03, 0xE8, 0x4B],
        )
        .unwrap();
        h.engine.feed_bytes(frame.as_bytes(), 2);
        let state = h.telemetry.read();
        assert!((state.battery.voltage - 10.49).abs() < 0.001);
        assert_eq!(state.battery.remaining, 75);

        // Flight mode
        let frame = encode_frame(0xC8, CRSF_FRAMETYPE_FLIGHT_MODE, b"ACRO\0").unwrap();
        h.engine.feed_bytes(frame.as_bytes(), 3);
        assert_eq!(h.telemetry.read().flight_mode, "ACRO");

        // Telemetry alone never raises the link
        assert!(!h.engine.link_up());
        assert_eq!(h.counters.received.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_frames_for_other_addresses_are_ignored() {
        let mut h = harness();
        let mut frame = rc_frame(1500);
        frame[0] = 0xEA; // radio transmitter address, CRC unaffected

        h.engine.feed_bytes(&frame, 1);
        assert!(!h.engine.link_up());
        assert_eq!(h.counters.received.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_unknown_frame_type_is_dropped_silently() {
        let mut h = harness();
        let frame = encode_frame(0xC8, 0x7F, &[1, 2, 3, 4]).unwrap();
        h.engine.feed_bytes(frame.as_bytes(), 1);

        assert!(!h.engine.link_up());
        assert_eq!(h.counters.received.load(Ordering::Relaxed), 1);
        assert_eq!(h.engine.rx_len(), 0);
    }

    #[tokio::test]
    async fn test_receive_loop_feeds_engine_from_port() {
        use crate::serial::port_trait::mocks::{MockPortReader, ReadStep};

        let h = harness();
        let mut reader = MockPortReader::from_bytes(&rc_frame(1500));
        reader
            .script
            .push_back(ReadStep::Error(std::io::ErrorKind::Other));

        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(receive_loop(reader, h.engine, stop.clone()));

        tokio::time::sleep(Duration::from_millis(300)).await;
        stop.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("receive loop should stop")
            .unwrap();

        // The frame got through and the read error did not kill the loop
        assert!(h.shared.is_up());
        assert_eq!(h.channels.snapshot(), [1500u16; 16]);
        assert_eq!(h.ups.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_back_to_back_frames_in_one_chunk() {
        let mut h = harness();
        let mut stream = rc_frame(1200);
        stream.extend_from_slice(&rc_frame(1400));

        h.engine.feed_bytes(&stream, 1);
        assert_eq!(h.channels.snapshot(), [1400u16; 16]);
        assert_eq!(h.frames.load(Ordering::Relaxed), 2);
    }
}
