//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use std::io;

/// Read side of the CRSF port.
#[async_trait]
pub trait PortReader: Send {
    /// Read one byte with a bounded wait.
    ///
    /// `Ok(None)` means the wait elapsed with no data; that is the loop's
    /// breathing room, not a link-down signal.
    async fn read_byte(&mut self) -> io::Result<Option<u8>>;
}

/// Write side of the CRSF port.
#[async_trait]
pub trait PortWriter: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;
}
