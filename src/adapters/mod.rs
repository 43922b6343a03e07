//! Byte transport adapters
//!
//! This module defines the [`Transport`] trait the SCPI client frames commands
//! over, plus the serial and scripted mock implementations.

pub mod mock;
pub mod serial_adapter;

pub use mock::MockTransport;
pub use serial_adapter::{list_serial_ports, SerialSettings, SerialTransport, SUPPORTED_BAUD_RATES};

use async_trait::async_trait;
use std::io;

/// Byte-level, half-duplex link to one instrument.
///
/// Implementations must bound `read_until` with a timeout so that a silent
/// instrument cannot park the polling task forever.
#[async_trait]
pub trait Transport: Send {
    /// Short adapter name used in logs.
    fn name(&self) -> &str;

    /// Opens the link. Opening an already open link is a no-op.
    async fn open(&mut self) -> io::Result<()>;

    /// Closes the link. Closing a closed link is a no-op.
    async fn close(&mut self) -> io::Result<()>;

    /// Writes the whole payload.
    async fn write(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Reads until `terminator` has been received, returning every byte read
    /// including the terminator.
    async fn read_until(&mut self, terminator: &[u8]) -> io::Result<Vec<u8>>;

    /// Whether the link is currently open.
    fn is_open(&self) -> bool;
}

/// Error returned by every operation on a link that is not open.
pub(crate) fn not_connected(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("{} connection is not open", name),
    )
}
