use super::{DeviceTransport, TransportError};
use crate::config::DeviceSettings;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;

/// Serial transport for the USB-serial light controller
///
/// This wraps the serialport crate. Blocking port I/O runs on Tokio's blocking
/// pool; the port handle is moved into the blocking task and handed back when
/// it completes, so the transport stays the sole owner of the port.
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyACM0", "COM8")
    port_name: String,

    /// Baud rate (e.g., 9600)
    baud_rate: u32,

    /// Maximum wait for a complete telemetry line
    timeout: Duration,

    /// Delay after opening while the controller resets
    settle: Duration,

    /// Bytes received after the last complete line
    pending: Vec<u8>,

    #[cfg(feature = "instrument_serial")]
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Create a disconnected transport for the configured device
    pub fn new(settings: &DeviceSettings) -> Self {
        Self {
            port_name: settings.port.clone(),
            baud_rate: settings.baud_rate,
            timeout: Duration::from_millis(settings.timeout_ms),
            settle: Duration::from_millis(settings.settle_ms),
            pending: Vec::new(),
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Open the transport, falling back to the disconnected state on failure.
    ///
    /// A disconnected transport reports [`TransportError::NotConnected`] for every
    /// operation, which the engine surfaces as a device fault when a run starts.
    pub async fn open(settings: &DeviceSettings) -> Self {
        let mut transport = Self::new(settings);
        if let Err(e) = transport.connect().await {
            warn!(
                "Failed to connect to light controller on '{}': {}",
                transport.port_name, e
            );
        }
        transport
    }

    /// Configured port name.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Open the port and wait for the controller to finish resetting.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = serialport::new(&self.port_name, self.baud_rate)
                .timeout(Duration::from_millis(100)) // Internal read timeout
                .open()
                .map_err(|e| {
                    TransportError::Port(format!(
                        "Failed to open serial port '{}' at {} baud: {}",
                        self.port_name, self.baud_rate, e
                    ))
                })?;
            self.port = Some(port);
            self.pending.clear();

            // Opening the port resets the microcontroller.
            tokio::time::sleep(self.settle).await;

            info!(
                "Serial port '{}' opened at {} baud",
                self.port_name, self.baud_rate
            );
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(TransportError::FeatureDisabled)
        }
    }

    /// Run a blocking operation against the port on the blocking pool.
    #[cfg(feature = "instrument_serial")]
    async fn with_port<T, F>(&mut self, op: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SerialPort) -> Result<T, TransportError> + Send + 'static,
    {
        let mut port = self.port.take().ok_or(TransportError::NotConnected)?;
        let (port, result) = tokio::task::spawn_blocking(move || {
            let result = op(port.as_mut());
            (port, result)
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?;
        self.port = Some(port);
        result
    }
}

/// Split the first complete line off `buffer`, leaving any partial line behind.
#[cfg_attr(not(feature = "instrument_serial"), allow(dead_code))]
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.iter().position(|&b| b == b'\n')?;
    let rest = buffer.split_off(pos + 1);
    let line = String::from_utf8_lossy(buffer).trim().to_string();
    *buffer = rest;
    Some(line)
}

/// Bytes in `buffer` up to and including its last line terminator.
#[cfg_attr(not(feature = "instrument_serial"), allow(dead_code))]
fn complete_len(buffer: &[u8]) -> usize {
    buffer
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |pos| pos + 1)
}

/// Move up to `waiting` bytes that the driver already holds into `buffer`.
#[cfg(feature = "instrument_serial")]
fn drain_waiting(
    port: &mut dyn SerialPort,
    mut buffer: Vec<u8>,
    waiting: usize,
) -> Result<Vec<u8>, TransportError> {
    use std::io::{ErrorKind, Read};

    let mut remaining = waiting;
    let mut chunk = [0u8; 64];
    while remaining > 0 {
        let want = remaining.min(chunk.len());
        match port.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                remaining -= n;
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(buffer)
}

#[cfg(feature = "instrument_serial")]
fn read_until_newline(
    port: &mut dyn SerialPort,
    mut buffer: Vec<u8>,
    timeout: Duration,
) -> Result<(Option<String>, Vec<u8>), TransportError> {
    use std::io::{ErrorKind, Read};

    let deadline = std::time::Instant::now() + timeout;
    loop {
        if let Some(line) = take_line(&mut buffer) {
            return Ok((Some(line), buffer));
        }
        if std::time::Instant::now() >= deadline {
            return Ok((None, buffer));
        }

        let mut chunk = [0u8; 64];
        match port.read(&mut chunk) {
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }
    }
}

#[async_trait]
impl DeviceTransport for SerialTransport {
    fn name(&self) -> &str {
        "serial"
    }

    fn is_connected(&self) -> bool {
        #[cfg(feature = "instrument_serial")]
        {
            self.port.is_some()
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            false
        }
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        #[cfg(feature = "instrument_serial")]
        {
            let bytes = frame.as_bytes().to_vec();
            self.with_port(move |port| {
                use std::io::Write;
                port.write_all(&bytes)?;
                port.flush()?;
                Ok(())
            })
            .await?;
            debug!("Sent serial command: {}", frame.trim());
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = frame;
            Err(TransportError::FeatureDisabled)
        }
    }

    async fn bytes_to_read(&mut self) -> Result<usize, TransportError> {
        #[cfg(feature = "instrument_serial")]
        {
            // Whatever the driver holds is pulled into `pending` without
            // waiting; only complete lines are reported as readable.
            let buffered = std::mem::take(&mut self.pending);
            self.pending = self
                .with_port(move |port| {
                    let waiting = port
                        .bytes_to_read()
                        .map_err(|e| TransportError::Port(e.to_string()))?;
                    drain_waiting(port, buffered, waiting as usize)
                })
                .await?;
            Ok(complete_len(&self.pending))
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(TransportError::FeatureDisabled)
        }
    }

    async fn read_line(&mut self) -> Result<String, TransportError> {
        #[cfg(feature = "instrument_serial")]
        {
            if let Some(line) = take_line(&mut self.pending) {
                return Ok(line);
            }

            let timeout = self.timeout;
            let buffered = std::mem::take(&mut self.pending);
            let (line, rest) = self
                .with_port(move |port| read_until_newline(port, buffered, timeout))
                .await?;
            self.pending = rest;
            line.ok_or(TransportError::Timeout)
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(TransportError::FeatureDisabled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_line_stays_buffered() {
        let mut buffer = b"12.5\r\n13.".to_vec();
        assert_eq!(complete_len(&buffer), 6);
        assert_eq!(take_line(&mut buffer).as_deref(), Some("12.5"));
        assert_eq!(buffer, b"13.");
        assert_eq!(complete_len(&buffer), 0);
        assert!(take_line(&mut buffer).is_none());

        buffer.extend_from_slice(b"0\n");
        assert_eq!(take_line(&mut buffer).as_deref(), Some("13.0"));
        assert!(buffer.is_empty());
    }

    fn settings() -> DeviceSettings {
        DeviceSettings {
            port: "/dev/does-not-exist-illumicell".to_string(),
            baud_rate: 9600,
            timeout_ms: 100,
            settle_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_new_transport_is_disconnected() {
        let mut transport = SerialTransport::new(&settings());
        assert!(!transport.is_connected());
        assert_eq!(transport.port_name(), "/dev/does-not-exist-illumicell");
        assert!(transport.send("OFF\n").await.is_err());
    }

    #[tokio::test]
    async fn test_open_missing_port_stays_disconnected() {
        let mut transport = SerialTransport::open(&settings()).await;
        assert!(!transport.is_connected());
        assert!(transport.bytes_to_read().await.is_err());
    }
}
