//! # Send Scheduler
//!
//! The ~100 Hz outbound RC channel loop.
//!
//! Each iteration drains the command-file queue, folds joystick axes into
//! the channel store (joystick mode only), and emits one RC channels frame
//! once the send period has elapsed. The loop sleeps in 1 ms increments, so
//! transmit jitter is bounded by the polling period, not by the work done.
//!
//! Transmission is gated by the ignore-telemetry policy: normally frames are
//! dropped while the link is down; with the policy enabled (`--notel`) the
//! bridge transmits unconditionally, which is what a bench without a live
//! receiver needs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::channels::ChannelStore;
use crate::command::{drain_file, Command, ControlMode};
use crate::config::SendConfig;
use crate::crsf::encoder::encode_rc_channels_frame;
use crate::joystick::JoystickState;
use crate::link::{Counters, LinkShared};
use crate::serial::port_trait::PortWriter;

/// Granularity of the scheduler's sleep.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Owns the write half of the port and the outbound cadence.
pub struct Scheduler<W: PortWriter> {
    writer: W,
    channels: ChannelStore,
    link: Arc<LinkShared>,
    counters: Arc<Counters>,
    joystick: Option<JoystickState>,
    mode: ControlMode,
    command_path: PathBuf,
    send_period: Duration,
    ignore_telemetry: bool,
}

impl<W: PortWriter> Scheduler<W> {
    pub fn new(
        writer: W,
        channels: ChannelStore,
        link: Arc<LinkShared>,
        counters: Arc<Counters>,
        joystick: Option<JoystickState>,
        config: &SendConfig,
        command_path: &str,
    ) -> Self {
        Self {
            writer,
            channels,
            link,
            counters,
            joystick,
            mode: ControlMode::default(),
            command_path: PathBuf::from(command_path),
            send_period: Duration::from_millis(config.period_ms),
            ignore_telemetry: config.ignore_telemetry,
        }
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Run until `stop` is set.
    pub async fn run(mut self, stop: Arc<AtomicBool>) {
        // First frame goes out on the first eligible iteration
        let mut last_send = Instant::now() - self.send_period;

        while !stop.load(Ordering::Relaxed) {
            for command in drain_file(&self.command_path).await {
                self.apply(command).await;
            }

            if self.mode == ControlMode::Joystick {
                if let Some(joystick) = &self.joystick {
                    joystick.apply_to_channels(&self.channels);
                }
            }

            if last_send.elapsed() >= self.send_period {
                last_send = Instant::now();
                self.send_channels().await;
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
        debug!("Send scheduler stopped");
    }

    /// Apply one control-plane command.
    pub async fn apply(&mut self, command: Command) {
        match command {
            Command::SetChannel { channel, value } => {
                self.channels.set(channel, value);
            }
            Command::SetChannels(values) => {
                self.channels.set_all(&values);
            }
            Command::SendChannels => {
                self.send_channels().await;
            }
            Command::SetMode(mode) => {
                if mode != self.mode {
                    info!("Control mode set to {}", mode.as_str());
                }
                self.mode = mode;
            }
        }
    }

    /// Emit one RC channels frame, honouring the telemetry gate.
    pub async fn send_channels(&mut self) {
        if !self.ignore_telemetry && !self.link.is_up() {
            trace!("Dropping RC frame: link is down");
            return;
        }

        let frame = encode_rc_channels_frame(&self.channels.snapshot());
        let result = async {
            self.writer.write_all(frame.as_bytes()).await?;
            self.writer.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!("Serial write failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::decoder::unpack_channels;
    use crate::serial::port_trait::mocks::MockPortWriter;

    fn scheduler(ignore_telemetry: bool) -> (Scheduler<MockPortWriter>, MockPortWriter, Arc<LinkShared>) {
        let writer = MockPortWriter::new();
        let link = Arc::new(LinkShared::default());
        let config = SendConfig {
            period_ms: 10,
            ignore_telemetry,
        };
        let scheduler = Scheduler::new(
            writer.clone(),
            ChannelStore::new(),
            link.clone(),
            Arc::new(Counters::default()),
            None,
            &config,
            "/tmp/crsf_command_scheduler_test.txt",
        );
        (scheduler, writer, link)
    }

    #[tokio::test]
    async fn test_send_dropped_while_link_down() {
        let (mut scheduler, writer, _link) = scheduler(false);
        scheduler.send_channels().await;
        assert!(writer.get_written().is_empty());
    }

    #[tokio::test]
    async fn test_notel_policy_sends_without_link() {
        let (mut scheduler, writer, _link) = scheduler(true);
        scheduler.send_channels().await;

        let written = writer.get_written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].len(), 26);
        assert_eq!(&written[0][..3], &[0xC8, 0x18, 0x16]);
    }

    #[tokio::test]
    async fn test_commanded_channels_reach_the_wire() {
        let (mut scheduler, writer, _link) = scheduler(true);

        for ch in 1..=16 {
            scheduler
                .apply(Command::SetChannel { channel: ch, value: 1500 })
                .await;
        }
        scheduler.apply(Command::SendChannels).await;

        let written = writer.get_written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].len(), 26);
        assert_eq!(&written[0][..3], &[0xC8, 0x18, 0x16]);

        let payload: [u8; 22] = written[0][3..25].try_into().unwrap();
        assert_eq!(unpack_channels(&payload), [1500u16; 16]);
    }

    #[tokio::test]
    async fn test_out_of_range_store_values_clamp_on_the_wire() {
        let (mut scheduler, writer, _link) = scheduler(true);

        // Untrusted writers bypass the command grammar's range check
        scheduler.channels.set(1, 5000);
        scheduler.channels.set(2, 100);
        scheduler.send_channels().await;

        let written = writer.get_written();
        let payload: [u8; 22] = written[0][3..25].try_into().unwrap();
        let decoded = unpack_channels(&payload);
        assert_eq!(decoded[0], 2000);
        assert_eq!(decoded[1], 1000);
    }

    #[tokio::test]
    async fn test_set_mode_switches_joystick_handling() {
        let (mut scheduler, _writer, _link) = scheduler(true);
        assert_eq!(scheduler.mode(), ControlMode::Manual);

        scheduler.apply(Command::SetMode(ControlMode::Joystick)).await;
        assert_eq!(scheduler.mode(), ControlMode::Joystick);

        scheduler.apply(Command::SetMode(ControlMode::Manual)).await;
        assert_eq!(scheduler.mode(), ControlMode::Manual);
    }

    #[tokio::test]
    async fn test_write_errors_are_swallowed_and_counted_nowhere() {
        let (mut scheduler, writer, _link) = scheduler(true);
        writer.set_write_error(std::io::ErrorKind::BrokenPipe);

        scheduler.send_channels().await;
        assert!(writer.get_written().is_empty());
        assert_eq!(scheduler.counters.sent.load(Ordering::Relaxed), 0);
    }
}
