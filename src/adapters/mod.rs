//! Device transport implementations
//!
//! The engine talks to the light controller through the [`DeviceTransport`]
//! trait: a single, exclusively owned byte channel carrying newline-terminated
//! ASCII. Only the scheduler writes to it and only the telemetry sampler reads
//! from it, both from the engine task, so implementations need no locking.

pub mod mock;
pub mod serial_adapter;

pub use mock::{MockTransport, Transmission};
pub use serial_adapter::SerialTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Failures reported by a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The port never opened or was lost.
    #[error("Device is not connected")]
    NotConnected,

    /// Read or write failed.
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial driver rejected an operation.
    #[error("Serial port error: {0}")]
    Port(String),

    /// No complete line arrived in time.
    #[error("Timed out waiting for a line from the device")]
    Timeout,

    /// The blocking I/O task panicked or was cancelled.
    #[error("Serial I/O task failed: {0}")]
    Task(String),

    /// Built without `instrument_serial`.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    FeatureDisabled,
}

/// Byte channel to the light controller.
#[async_trait]
pub trait DeviceTransport: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether the link is open.
    fn is_connected(&self) -> bool;

    /// Write one complete frame (terminator included) and flush it.
    async fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Number of input bytes that form complete lines, ready for
    /// [`read_line`](Self::read_line) without waiting. A partial line counts as 0.
    async fn bytes_to_read(&mut self) -> Result<usize, TransportError>;

    /// Read one line, without its terminator.
    async fn read_line(&mut self) -> Result<String, TransportError>;
}

#[async_trait]
impl<T: DeviceTransport + ?Sized> DeviceTransport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        (**self).send(frame).await
    }

    async fn bytes_to_read(&mut self) -> Result<usize, TransportError> {
        (**self).bytes_to_read().await
    }

    async fn read_line(&mut self) -> Result<String, TransportError> {
        (**self).read_line().await
    }
}
