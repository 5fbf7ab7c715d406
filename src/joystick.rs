//! # Joystick Input
//!
//! Thin wrapper over a Linux evdev joystick device.
//!
//! A blocking reader thread folds absolute-axis events into a shared axis
//! table; the send scheduler samples the table on its own cadence and maps
//! axes into RC channels when the control mode is joystick:
//!
//! | axis | channel | function |
//! |------|---------|----------|
//! | 2    | 1       | roll     |
//! | -3   | 2       | pitch    |
//! | -1   | 3       | throttle |
//! | 0    | 4       | yaw      |

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use evdev::{Device, InputEventKind};
use tracing::{debug, info, warn};

use crate::channels::ChannelStore;
use crate::error::{BridgeError, Result};

/// Latest value of each axis, indexed joystick-style (0, 1, 2, ...).
/// `None` until the axis has reported at least once.
#[derive(Debug, Clone, Default)]
pub struct JoystickState {
    axes: Arc<Mutex<Vec<Option<i16>>>>,
}

impl JoystickState {
    pub fn axis(&self, index: usize) -> Option<i16> {
        self.axes.lock().unwrap().get(index).copied().flatten()
    }

    fn set_axis(&self, index: usize, value: i16) {
        let mut axes = self.axes.lock().unwrap();
        if axes.len() <= index {
            axes.resize(index + 1, None);
        }
        axes[index] = Some(value);
    }

    /// Steer channels 1-4 from the current axis values. Axes that have not
    /// reported yet leave their channel untouched.
    pub fn apply_to_channels(&self, channels: &ChannelStore) {
        if let Some(v) = self.axis(2) {
            channels.set(1, axis_to_us(v)); // roll
        }
        if let Some(v) = self.axis(3) {
            channels.set(2, axis_to_us(v.saturating_neg())); // pitch
        }
        if let Some(v) = self.axis(1) {
            channels.set(3, axis_to_us(v.saturating_neg())); // throttle
        }
        if let Some(v) = self.axis(0) {
            channels.set(4, axis_to_us(v)); // yaw
        }
    }
}

/// Map a joystick axis value to a pulse width: linear from
/// [-32768, 32767] to [1000, 2000] with the centre at 1500.
pub fn axis_to_us(value: i16) -> u16 {
    let nf = if value >= 0 {
        value as f32 / 32767.0
    } else {
        value as f32 / 32768.0
    };
    let us = 1500.0 + nf * 500.0;
    ((us + 0.5) as i32).clamp(1000, 2000) as u16
}

/// evdev joystick reader.
pub struct Joystick {
    device: Device,
    axis_codes: Vec<u16>,
    state: JoystickState,
}

impl Joystick {
    /// Open the joystick at `device_path`, or auto-detect the first device
    /// with absolute axes when the path is empty.
    pub fn open(device_path: &str) -> Result<Self> {
        let device = if device_path.is_empty() {
            Self::find_joystick()?
        } else {
            Device::open(device_path).map_err(|e| {
                BridgeError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Failed to open device at {}: {}", device_path, e),
                ))
            })?
        };

        // Stable joystick-style axis numbering: supported axes sorted by code
        let mut axis_codes: Vec<u16> = device
            .supported_absolute_axes()
            .map(|axes| axes.iter().map(|a| a.0).collect())
            .unwrap_or_default();
        axis_codes.sort_unstable();

        info!(
            "Joystick {:?}: {} axes",
            device.name().unwrap_or("unknown"),
            axis_codes.len()
        );

        Ok(Self {
            device,
            axis_codes,
            state: JoystickState::default(),
        })
    }

    /// Find the first input device exposing absolute axes.
    fn find_joystick() -> Result<Device> {
        let devices = evdev::enumerate()
            .filter(|(_, dev)| {
                dev.supported_absolute_axes()
                    .map(|axes| axes.iter().count() >= 2)
                    .unwrap_or(false)
            })
            .collect::<Vec<_>>();

        if devices.is_empty() {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No joystick device found",
            )));
        }

        if devices.len() > 1 {
            warn!("Multiple joystick devices found, using first one");
        }

        let (_, device) = devices.into_iter().next().unwrap();
        Ok(device)
    }

    /// Shared handle for readers of the axis table.
    pub fn state(&self) -> JoystickState {
        self.state.clone()
    }

    fn axis_index(&self, code: u16) -> Option<usize> {
        self.axis_codes.iter().position(|&c| c == code)
    }

    /// Blocking event pump; run on a dedicated blocking task. Values outside
    /// the joystick-interface range are clamped to i16.
    pub fn run_blocking(mut self, stop: Arc<AtomicBool>) {
        while !stop.load(Ordering::Relaxed) {
            let events = match self.device.fetch_events() {
                Ok(events) => events.collect::<Vec<_>>(),
                Err(e) => {
                    debug!("Joystick read failed: {}", e);
                    std::thread::sleep(Duration::from_millis(500));
                    continue;
                }
            };

            for event in events {
                if let InputEventKind::AbsAxis(axis) = event.kind() {
                    if let Some(index) = self.axis_index(axis.0) {
                        let value = event.value().clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                        self.state.set_axis(index, value);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_to_us_endpoints() {
        assert_eq!(axis_to_us(0), 1500);
        assert_eq!(axis_to_us(i16::MAX), 2000);
        assert_eq!(axis_to_us(i16::MIN), 1000);
    }

    #[test]
    fn test_axis_to_us_midpoints() {
        // Half deflection lands close to the quarter points
        let up = axis_to_us(i16::MAX / 2);
        let down = axis_to_us(i16::MIN / 2);
        assert!((up as i32 - 1750).abs() <= 1, "up: {}", up);
        assert!((down as i32 - 1250).abs() <= 1, "down: {}", down);
    }

    #[test]
    fn test_axis_to_us_monotonic() {
        let mut prev = axis_to_us(i16::MIN);
        for v in (i16::MIN..=i16::MAX).step_by(1024) {
            let us = axis_to_us(v);
            assert!(us >= prev);
            prev = us;
        }
    }

    #[test]
    fn test_state_axis_table_grows() {
        let state = JoystickState::default();
        assert_eq!(state.axis(0), None);

        state.set_axis(3, -1234);
        assert_eq!(state.axis(3), Some(-1234));
        assert_eq!(state.axis(0), None);
        assert_eq!(state.axis(9), None);
    }

    #[test]
    fn test_apply_to_channels_mapping() {
        let state = JoystickState::default();
        let channels = ChannelStore::new();

        state.set_axis(0, i16::MAX); // yaw -> ch4 high
        state.set_axis(1, i16::MAX); // throttle inverted -> ch3 low
        state.set_axis(2, 0); // roll centred -> ch1
        state.set_axis(3, i16::MIN); // pitch inverted -> ch2 high

        state.apply_to_channels(&channels);

        assert_eq!(channels.get(1), 1500);
        assert_eq!(channels.get(2), 2000);
        assert_eq!(channels.get(3), 1000);
        assert_eq!(channels.get(4), 2000);
    }

    #[test]
    fn test_apply_leaves_unreported_axes_alone() {
        let state = JoystickState::default();
        let channels = ChannelStore::new();
        channels.set(1, 1700);

        state.set_axis(0, 0); // only yaw reported
        state.apply_to_channels(&channels);

        assert_eq!(channels.get(1), 1700); // roll untouched
        assert_eq!(channels.get(4), 1500);
    }
}
