//! # Snapshot File Record
//!
//! Fixed-layout binary record shared with out-of-process consumers through
//! `/tmp/crsf_telemetry.dat`.
//!
//! The layout is host byte order, packed with no implicit padding, and is
//! not a compatibility surface beyond this machine. Readers must check that
//! exactly [`RECORD_SIZE`] bytes were read; a short read means the writer was
//! mid-rewrite (or absent) and the record must be treated as no connection.

/// Exact size of the on-disk record in bytes.
pub const RECORD_SIZE: usize = 168;

/// One full telemetry snapshot: link flags, channels, counters and the
/// decoded sensor groups.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SnapshotRecord {
    pub link_up: bool,
    pub last_receive_ms: u32,
    pub channels: [i32; 16],
    pub packets_received: u32,
    pub packets_sent: u32,
    pub packets_lost: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub voltage: f64,
    pub current: f64,
    pub capacity: f64,
    pub remaining: u8,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub roll_raw: i16,
    pub pitch_raw: i16,
    pub yaw_raw: i16,
}

impl SnapshotRecord {
    /// Serialise to the on-disk layout.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        let mut pos = 0;

        let mut put = |bytes: &[u8], pos: &mut usize| {
            buf[*pos..*pos + bytes.len()].copy_from_slice(bytes);
            *pos += bytes.len();
        };

        put(&[self.link_up as u8], &mut pos);
        put(&self.last_receive_ms.to_ne_bytes(), &mut pos);
        for ch in &self.channels {
            put(&ch.to_ne_bytes(), &mut pos);
        }
        put(&self.packets_received.to_ne_bytes(), &mut pos);
        put(&self.packets_sent.to_ne_bytes(), &mut pos);
        put(&self.packets_lost.to_ne_bytes(), &mut pos);
        for v in [self.latitude, self.longitude, self.altitude, self.speed] {
            put(&v.to_ne_bytes(), &mut pos);
        }
        for v in [self.voltage, self.current, self.capacity] {
            put(&v.to_ne_bytes(), &mut pos);
        }
        put(&[self.remaining], &mut pos);
        for v in [self.roll, self.pitch, self.yaw] {
            put(&v.to_ne_bytes(), &mut pos);
        }
        for v in [self.roll_raw, self.pitch_raw, self.yaw_raw] {
            put(&v.to_ne_bytes(), &mut pos);
        }

        debug_assert_eq!(pos, RECORD_SIZE);
        buf
    }

    /// Parse a record read back from disk.
    ///
    /// Returns `None` unless `data` is exactly [`RECORD_SIZE`] bytes long.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() != RECORD_SIZE {
            return None;
        }

        let mut pos = 0;
        let mut take = |n: usize| {
            let slice = &data[pos..pos + n];
            pos += n;
            slice
        };

        let link_up = take(1)[0] != 0;
        let last_receive_ms = u32::from_ne_bytes(take(4).try_into().ok()?);

        let mut channels = [0i32; 16];
        for ch in channels.iter_mut() {
            *ch = i32::from_ne_bytes(take(4).try_into().ok()?);
        }

        let packets_received = u32::from_ne_bytes(take(4).try_into().ok()?);
        let packets_sent = u32::from_ne_bytes(take(4).try_into().ok()?);
        let packets_lost = u32::from_ne_bytes(take(4).try_into().ok()?);

        let mut f64s = [0f64; 7];
        for v in f64s.iter_mut() {
            *v = f64::from_ne_bytes(take(8).try_into().ok()?);
        }
        let remaining = take(1)[0];
        let mut att = [0f64; 3];
        for v in att.iter_mut() {
            *v = f64::from_ne_bytes(take(8).try_into().ok()?);
        }
        let mut raw = [0i16; 3];
        for v in raw.iter_mut() {
            *v = i16::from_ne_bytes(take(2).try_into().ok()?);
        }

        Some(Self {
            link_up,
            last_receive_ms,
            channels,
            packets_received,
            packets_sent,
            packets_lost,
            latitude: f64s[0],
            longitude: f64s[1],
            altitude: f64s[2],
            speed: f64s[3],
            voltage: f64s[4],
            current: f64s[5],
            capacity: f64s[6],
            remaining,
            roll: att[0],
            pitch: att[1],
            yaw: att[2],
            roll_raw: raw[0],
            pitch_raw: raw[1],
            yaw_raw: raw[2],
        })
    }

    /// Whether this record differs from `other` enough to be worth pushing.
    ///
    /// Integer fields compare exactly; floating-point groups use small
    /// per-group epsilons so jitter below sensor resolution is not treated
    /// as a change.
    pub fn differs_from(&self, other: &Self) -> bool {
        if self.link_up != other.link_up
            || self.last_receive_ms != other.last_receive_ms
            || self.packets_received != other.packets_received
            || self.packets_sent != other.packets_sent
            || self.packets_lost != other.packets_lost
            || self.remaining != other.remaining
            || self.channels != other.channels
        {
            return true;
        }

        const GPS_EPS: f64 = 0.000001;
        if (self.latitude - other.latitude).abs() > GPS_EPS
            || (self.longitude - other.longitude).abs() > GPS_EPS
            || (self.altitude - other.altitude).abs() > 0.1
            || (self.speed - other.speed).abs() > 0.1
        {
            return true;
        }

        const BATTERY_EPS: f64 = 0.01;
        if (self.voltage - other.voltage).abs() > BATTERY_EPS
            || (self.current - other.current).abs() > BATTERY_EPS
            || (self.capacity - other.capacity).abs() > 0.1
        {
            return true;
        }

        const ATTITUDE_EPS: f64 = 0.01;
        if (self.roll - other.roll).abs() > ATTITUDE_EPS
            || (self.pitch - other.pitch).abs() > ATTITUDE_EPS
            || (self.yaw - other.yaw).abs() > ATTITUDE_EPS
        {
            return true;
        }

        self.roll_raw != other.roll_raw
            || self.pitch_raw != other.pitch_raw
            || self.yaw_raw != other.yaw_raw
    }
}
