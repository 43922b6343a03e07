//! SCPI request/response client.
//!
//! [`ScpiClient`] frames commands with a line terminator and guarantees that at
//! most one write or write+read pair is outstanding on the transport. Every
//! operation first takes a [`FrameGuard`], an owned lock over the transport
//! that is released when the guard drops, including on error paths.
//!
//! ```no_run
//! use bench_daq::{adapters::MockTransport, scpi::ScpiClient};
//!
//! # async fn example() -> bench_daq::error::AppResult<()> {
//! let client = ScpiClient::new(MockTransport::new().with_response("MEAS1?", "1.234500E+00"));
//! client.open().await?;
//! let response = client.query("MEAS1?").await?;
//! assert_eq!(response, "1.234500E+00");
//! # Ok(())
//! # }
//! ```

use crate::adapters::Transport;
use std::io;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Default SCPI line terminator.
pub const DEFAULT_TERMINATOR: &str = "\n";

/// Thread-safe SCPI client over one transport.
///
/// Clones share the same transport and the same exclusion lock, so the
/// interactive caller and a polling task can both hold one.
#[derive(Clone)]
pub struct ScpiClient {
    transport: Arc<Mutex<Box<dyn Transport>>>,
    terminator: Arc<str>,
}

impl ScpiClient {
    /// Wraps `transport` using the `"\n"` terminator.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::with_terminator(transport, DEFAULT_TERMINATOR)
    }

    /// Wraps `transport` with a custom line terminator.
    ///
    /// An empty terminator falls back to the default.
    pub fn with_terminator<T: Transport + 'static>(transport: T, terminator: &str) -> Self {
        let terminator = if terminator.is_empty() {
            DEFAULT_TERMINATOR
        } else {
            terminator
        };
        Self {
            transport: Arc::new(Mutex::new(Box::new(transport))),
            terminator: Arc::from(terminator),
        }
    }

    /// Line terminator appended to every command.
    pub fn terminator(&self) -> &str {
        &self.terminator
    }

    /// Takes exclusive ownership of the transport for one frame.
    pub async fn frame(&self) -> FrameGuard {
        FrameGuard {
            transport: self.transport.clone().lock_owned().await,
            terminator: self.terminator.clone(),
        }
    }

    /// Sends `command` without waiting for a response.
    pub async fn write(&self, command: &str) -> io::Result<()> {
        let mut frame = self.frame().await;
        frame.send(command).await?;
        debug!(command, "SCPI write");
        Ok(())
    }

    /// Sends `command` and returns the trimmed response line.
    pub async fn query(&self, command: &str) -> io::Result<String> {
        let mut frame = self.frame().await;
        frame.send(command).await?;
        let response = frame.receive().await?;
        debug!(command, response = %response, "SCPI query");
        Ok(response)
    }

    /// Opens the underlying transport.
    pub async fn open(&self) -> io::Result<()> {
        self.frame().await.transport.open().await
    }

    /// Closes the underlying transport.
    pub async fn close(&self) -> io::Result<()> {
        self.frame().await.transport.close().await
    }

    /// Whether the underlying transport is open.
    pub async fn is_open(&self) -> bool {
        self.frame().await.transport.is_open()
    }
}

/// Exclusive access to the transport for exactly one write or query.
///
/// Dropping the guard releases the transport.
pub struct FrameGuard {
    transport: OwnedMutexGuard<Box<dyn Transport>>,
    terminator: Arc<str>,
}

impl FrameGuard {
    /// Writes `command` followed by the terminator.
    pub async fn send(&mut self, command: &str) -> io::Result<()> {
        if !command.is_ascii() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("SCPI command must be ASCII: {:?}", command),
            ));
        }
        let payload = format!("{}{}", command, self.terminator);
        self.transport.write(payload.as_bytes()).await
    }

    /// Reads one response line, replacing undecodable bytes, trimmed.
    pub async fn receive(&mut self) -> io::Result<String> {
        let bytes = self.transport.read_until(self.terminator.as_bytes()).await?;
        Ok(String::from_utf8_lossy(&bytes).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use std::time::Duration;

    async fn open_client(mock: MockTransport) -> ScpiClient {
        let client = ScpiClient::new(mock);
        client.open().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_query_trims_response() {
        let mock = MockTransport::new().with_response("MEAS1?", "1.234500E+00");
        let client = open_client(mock.clone()).await;
        assert_eq!(client.query("MEAS1?").await.unwrap(), "1.234500E+00");
        assert_eq!(mock.commands(), vec!["MEAS1?"]);
    }

    #[tokio::test]
    async fn test_query_replaces_invalid_utf8() {
        let mock = MockTransport::new().with_raw_response("*IDN?", b"ACME\xff,X1  ");
        let client = open_client(mock).await;
        assert_eq!(client.query("*IDN?").await.unwrap(), "ACME\u{FFFD},X1");
    }

    #[tokio::test]
    async fn test_custom_terminator() {
        let mock = MockTransport::new()
            .with_response("V?", "12.0")
            .with_response_terminator("\r\n");
        let client = ScpiClient::with_terminator(mock.clone(), "\r\n");
        client.open().await.unwrap();
        assert_eq!(client.terminator(), "\r\n");
        assert_eq!(client.query("V?").await.unwrap(), "12.0");
    }

    #[tokio::test]
    async fn test_write_does_not_read() {
        let mock = MockTransport::new();
        let client = open_client(mock.clone()).await;
        client.write("SYSTem:REMote").await.unwrap();
        assert_eq!(mock.commands(), vec!["SYSTem:REMote"]);
    }

    #[tokio::test]
    async fn test_non_ascii_command_rejected() {
        let client = open_client(MockTransport::new()).await;
        let err = client.write("VOLT 5µ").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_released_after_failure() {
        let mock = MockTransport::new()
            .with_timeout(Duration::from_millis(100))
            .with_response("OK?", "1");
        let client = open_client(mock).await;
        let err = client.query("MISSING?").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        // a failed frame must not leave the transport locked
        assert_eq!(client.query("OK?").await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_closed_transport_is_io_error() {
        let client = ScpiClient::new(MockTransport::new());
        let err = client.query("*IDN?").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_never_interleave() {
        let mock = MockTransport::new()
            .with_response("A?", "a")
            .with_response("B?", "b")
            .with_latency(Duration::from_millis(2));
        let client = open_client(mock).await;

        let mut tasks = Vec::new();
        for i in 0..20 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let (cmd, expected) = if i % 2 == 0 { ("A?", "a") } else { ("B?", "b") };
                assert_eq!(client.query(cmd).await.unwrap(), expected);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }
}
