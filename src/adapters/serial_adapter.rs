//! Serial port transport built on the `serialport` crate.

use super::Transport;
use async_trait::async_trait;
use std::io;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use super::not_connected;
#[cfg(feature = "instrument_serial")]
use tracing::debug;
#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

/// Baud rates offered by the supported instruments.
pub const SUPPORTED_BAUD_RATES: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Port settings for an RS-232 / USB-serial instrument link.
///
/// Framing is fixed at 8 data bits, no parity, 1 stop bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Port path (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Communication speed (e.g., 9600, 115200)
    pub baud_rate: u32,
    /// Upper bound for one `read_until`
    pub timeout: Duration,
}

impl SerialSettings {
    /// Settings with the default 1 second read timeout.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            timeout: Duration::from_secs(1),
        }
    }

    /// Overrides the read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial transport for RS-232 communication
///
/// This adapter wraps the serialport crate and provides async I/O
/// using Tokio's blocking task executor for synchronous serial operations.
pub struct SerialTransport {
    settings: SerialSettings,

    /// The actual serial port (behind Arc<Mutex> so blocking tasks can own a handle)
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialTransport {
    /// Create a closed transport; call [`Transport::open`] before use.
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Settings this transport was built with.
    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    #[cfg(feature = "instrument_serial")]
    fn port(&self) -> io::Result<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port.clone().ok_or_else(|| not_connected(self.name()))
    }
}

/// Lists serial port names visible to the OS.
///
/// Returns an empty list when serial support is compiled out or enumeration fails.
pub fn list_serial_ports() -> Vec<String> {
    #[cfg(feature = "instrument_serial")]
    {
        match serialport::available_ports() {
            Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
            Err(e) => {
                debug!("Serial port enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    #[cfg(not(feature = "instrument_serial"))]
    {
        Vec::new()
    }
}

#[cfg(not(feature = "instrument_serial"))]
fn feature_disabled() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "Serial support not enabled. Rebuild with --features instrument_serial",
    )
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        "serial"
    }

    async fn open(&mut self) -> io::Result<()> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.is_some() {
                return Ok(());
            }

            let port = serialport::new(&self.settings.port, self.settings.baud_rate)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                // Internal read timeout; the overall deadline is enforced in read_until
                .timeout(Duration::from_millis(100))
                .open()
                .map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::Other,
                        format!(
                            "Failed to open serial port '{}' at {} baud: {}",
                            self.settings.port, self.settings.baud_rate, e
                        ),
                    )
                })?;

            self.port = Some(Arc::new(Mutex::new(port)));
            debug!(
                "Serial port '{}' opened at {} baud",
                self.settings.port, self.settings.baud_rate
            );
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(feature_disabled())
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.take().is_some() {
                debug!("Serial port '{}' closed", self.settings.port);
            }
        }
        Ok(())
    }

    async fn write(&mut self, payload: &[u8]) -> io::Result<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let payload = payload.to_vec();

            // Execute blocking serial I/O on dedicated thread
            tokio::task::spawn_blocking(move || -> io::Result<()> {
                use std::io::Write;

                let mut port_guard = port.blocking_lock();
                port_guard.write_all(&payload)?;
                port_guard.flush()
            })
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Serial I/O task panicked: {}", e)))?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = payload;
            Err(feature_disabled())
        }
    }

    async fn read_until(&mut self, terminator: &[u8]) -> io::Result<Vec<u8>> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let terminator = terminator.to_vec();
            let timeout = self.settings.timeout;

            tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
                use std::io::Read;

                let mut port_guard = port.blocking_lock();
                let mut response = Vec::new();
                let mut buffer = [0u8; 1];
                let start = std::time::Instant::now();

                loop {
                    if start.elapsed() > timeout {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!(
                                "Serial read timeout after {:?} ({} bytes received)",
                                timeout,
                                response.len()
                            ),
                        ));
                    }

                    match port_guard.read(&mut buffer) {
                        Ok(0) => {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "Unexpected EOF from serial port",
                            ));
                        }
                        Ok(_) => {
                            response.push(buffer[0]);
                            if response.ends_with(&terminator) {
                                return Ok(response);
                            }
                        }
                        // Port timeout is shorter than our overall timeout
                        Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                        Err(e) => return Err(e),
                    }
                }
            })
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Serial I/O task panicked: {}", e)))?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = terminator;
            Err(feature_disabled())
        }
    }

    fn is_open(&self) -> bool {
        #[cfg(feature = "instrument_serial")]
        {
            self.port.is_some()
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_settings_defaults() {
        let settings = SerialSettings::new("/dev/ttyUSB0", 9600);
        assert_eq!(settings.port, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_serial_transport_starts_closed() {
        let transport = SerialTransport::new(
            SerialSettings::new("COM3", 115200).with_timeout(Duration::from_millis(500)),
        );
        assert_eq!(transport.name(), "serial");
        assert!(!transport.is_open());
        assert_eq!(transport.settings().timeout, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_write_on_closed_port_fails() {
        let mut transport = SerialTransport::new(SerialSettings::new("/dev/null-port", 9600));
        let err = transport.write(b"*IDN?\n").await.unwrap_err();
        #[cfg(feature = "instrument_serial")]
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        #[cfg(not(feature = "instrument_serial"))]
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
