//! # Channel Store
//!
//! The 16-slot shared RC channel state.
//!
//! One fused vector serves both directions: it holds what the upstream last
//! sent and what this node will re-broadcast unless overridden. Writers are
//! the link engine (received frames), the command ingress and the joystick
//! mapper; the reader is the send scheduler. Values are stored verbatim,
//! including out-of-range ones from untrusted writers; clamping to
//! [1000, 2000] happens only when a frame is packed for transmit.

use std::sync::{Arc, Mutex};

use crate::crsf::protocol::{RcChannels, CHANNEL_US_MID, CRSF_NUM_CHANNELS};

/// Shared 16-channel RC state. Cheap to clone; all clones share storage.
#[derive(Debug, Clone)]
pub struct ChannelStore {
    inner: Arc<Mutex<RcChannels>>,
}

impl Default for ChannelStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelStore {
    /// Create a store with every channel centred at 1500 us.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new([CHANNEL_US_MID; CRSF_NUM_CHANNELS])),
        }
    }

    /// Read channel `ch` (1-based). Out-of-range channels read as 1500 us.
    pub fn get(&self, ch: usize) -> u16 {
        if (1..=CRSF_NUM_CHANNELS).contains(&ch) {
            self.inner.lock().unwrap()[ch - 1]
        } else {
            CHANNEL_US_MID
        }
    }

    /// Write channel `ch` (1-based) verbatim, without clamping.
    /// Out-of-range channels are a silent no-op.
    pub fn set(&self, ch: usize, us: u16) {
        if (1..=CRSF_NUM_CHANNELS).contains(&ch) {
            self.inner.lock().unwrap()[ch - 1] = us;
        }
    }

    /// Apply several (channel, value) writes under one lock acquisition.
    pub fn set_all(&self, values: &[(usize, u16)]) {
        let mut guard = self.inner.lock().unwrap();
        for &(ch, us) in values {
            if (1..=CRSF_NUM_CHANNELS).contains(&ch) {
                guard[ch - 1] = us;
            }
        }
    }

    /// Replace the whole vector, as a received RC frame does.
    pub fn store_frame(&self, channels: &RcChannels) {
        *self.inner.lock().unwrap() = *channels;
    }

    /// Atomic copy of all 16 channels for the encoder.
    pub fn snapshot(&self) -> RcChannels {
        *self.inner.lock().unwrap()
    }
}
