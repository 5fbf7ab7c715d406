//! # Serial Communication Module
//!
//! Scoped acquisition of the CRSF serial device.
//!
//! This module handles:
//! - Opening the port at a non-standard 420,000 baud, 8N1, no flow control
//! - Splitting into a read half (timed byte reads) and a write half
//! - Discarding stale kernel queues
//!
//! Opening is two-step on Linux: the device is acquired non-blocking and
//! line settings applied, then reads move to a bounded-wait discipline. The
//! tokio-serial builder performs the acquisition; the bounded wait comes from
//! wrapping the read half in `tokio::time::timeout`, so the receive loop
//! breathes even in total silence.

pub mod port_trait;

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use crate::error::{BridgeError, Result};
use port_trait::{PortReader, PortWriter};

/// CRSF baud rate (420,000 baud)
pub const CRSF_BAUD_RATE: u32 = 420_000;

/// CRSF serial device handle.
///
/// Owns the device path and settings; `open()` is idempotent and `close()`
/// is always safe. Once open, `split()` hands the read and write halves to
/// the receive loop and the send scheduler.
pub struct SerialLink {
    path: String,
    baud: u32,
    read_timeout: Duration,
    stream: Option<SerialStream>,
}

impl SerialLink {
    pub fn new(path: &str, baud: u32, read_timeout: Duration) -> Self {
        Self {
            path: path.to_string(),
            baud,
            read_timeout,
            stream: None,
        }
    }

    /// Open the device with CRSF line settings. Idempotent if already open.
    pub fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = tokio_serial::new(&self.path, self.baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(BridgeError::Serial)?;

        info!("Opened {} at {} baud", self.path, self.baud);
        self.stream = Some(stream);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Close the device. Subsequent reads and writes fail until reopened.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Closed {}", self.path);
        }
    }

    /// Discard the kernel input and output queues.
    pub fn clear(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream
                .clear(tokio_serial::ClearBuffer::All)
                .map_err(BridgeError::Serial)?;
        }
        Ok(())
    }

    /// Consume the open link into its read and write halves.
    ///
    /// # Errors
    ///
    /// Returns an error if the port has not been opened.
    pub fn split(mut self) -> Result<(SerialReader, SerialWriter)> {
        let stream = self.stream.take().ok_or_else(|| {
            BridgeError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} is not open", self.path),
            ))
        })?;

        let (read_half, write_half) = tokio::io::split(stream);
        Ok((
            SerialReader {
                inner: read_half,
                timeout: self.read_timeout,
            },
            SerialWriter { inner: write_half },
        ))
    }

    /// Get the device path
    pub fn device_path(&self) -> &str {
        &self.path
    }
}

/// Read half of the port with a bounded per-byte wait.
pub struct SerialReader {
    inner: ReadHalf<SerialStream>,
    timeout: Duration,
}

#[async_trait]
impl PortReader for SerialReader {
    async fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match tokio::time::timeout(self.timeout, self.inner.read(&mut buf)).await {
            Err(_) => Ok(None), // bounded wait elapsed; not an error
            Ok(Ok(0)) => Ok(None),
            Ok(Ok(_)) => Ok(Some(buf[0])),
            Ok(Err(e)) => Err(e),
        }
    }
}

/// Write half of the port. Partial writes surface as errors; callers do not
/// retry.
pub struct SerialWriter {
    inner: WriteHalf<SerialStream>,
}

#[async_trait]
impl PortWriter for SerialWriter {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        AsyncWriteExt::write_all(&mut self.inner, data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        AsyncWriteExt::flush(&mut self.inner).await
    }
}
