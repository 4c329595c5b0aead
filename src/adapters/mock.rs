//! Mock transport for testing
//!
//! Simulates the light controller without hardware. It provides:
//! - A log of every transmitted frame with the (Tokio) instant it was written
//! - Injectable telemetry lines
//! - Controllable failure injection and connection state

use super::{DeviceTransport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// One frame written to the mock device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    /// Tokio clock reading at the write.
    pub at: Instant,
    /// Frame exactly as sent, terminator included.
    pub frame: String,
}

#[derive(Debug)]
struct MockState {
    connected: bool,
    fail_sends: usize,
    transmissions: Vec<Transmission>,
    incoming: VecDeque<String>,
}

/// Mock light controller
///
/// Clones share state, so a test can keep one clone for inspection while the
/// engine owns another.
///
/// # Example
///
/// ```
/// use illumicell::adapters::MockTransport;
///
/// let device = MockTransport::new();
/// device.push_line("12.5\n");
/// assert!(device.is_connected());
/// assert!(device.frames().is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a connected mock device
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                connected: true,
                fail_sends: 0,
                transmissions: Vec::new(),
                incoming: VecDeque::new(),
            })),
        }
    }

    /// Create a mock whose port never opened
    pub fn disconnected() -> Self {
        let mock = Self::new();
        mock.set_connected(false);
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate the cable being pulled or plugged back in
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Current connection state
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Make the next `count` sends fail with an I/O error
    pub fn fail_next_sends(&self, count: usize) {
        self.lock().fail_sends = count;
    }

    /// Queue raw telemetry as the device would emit it (terminator optional)
    pub fn push_line(&self, line: &str) {
        self.lock().incoming.push_back(line.to_string());
    }

    /// Frames written so far, in order
    pub fn frames(&self) -> Vec<String> {
        self.lock()
            .transmissions
            .iter()
            .map(|t| t.frame.clone())
            .collect()
    }

    /// Frames written so far, with their instants
    pub fn transmissions(&self) -> Vec<Transmission> {
        self.lock().transmissions.clone()
    }

    /// Telemetry lines not yet consumed
    pub fn unread_lines(&self) -> usize {
        self.lock().incoming.len()
    }

    /// Forget the transmission log
    pub fn clear_log(&self) {
        self.lock().transmissions.clear();
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_connected(&self) -> bool {
        MockTransport::is_connected(self)
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "Injected failure",
            )));
        }
        state.transmissions.push(Transmission {
            at: Instant::now(),
            frame: frame.to_string(),
        });
        Ok(())
    }

    async fn bytes_to_read(&mut self) -> Result<usize, TransportError> {
        let state = self.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(state.incoming.iter().map(String::len).sum())
    }

    async fn read_line(&mut self) -> Result<String, TransportError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state
            .incoming
            .pop_front()
            .map(|line| line.trim_end_matches(['\r', '\n']).to_string())
            .ok_or(TransportError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_frames() {
        let mock = MockTransport::new();
        let mut device = mock.clone();
        device.send("ON 2 50\n").await.unwrap();
        device.send("OFF\n").await.unwrap();
        assert_eq!(mock.frames(), vec!["ON 2 50\n", "OFF\n"]);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let mut mock = MockTransport::new();
        mock.fail_next_sends(1);
        assert!(matches!(
            mock.send("OFF\n").await,
            Err(TransportError::Io(_))
        ));
        assert!(mock.send("OFF\n").await.is_ok());
        assert_eq!(mock.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnected() {
        let mut mock = MockTransport::disconnected();
        assert!(matches!(
            mock.send("OFF\n").await,
            Err(TransportError::NotConnected)
        ));
        assert!(mock.frames().is_empty());
    }

    #[tokio::test]
    async fn test_telemetry_lines() {
        let mut mock = MockTransport::new();
        assert_eq!(mock.bytes_to_read().await.unwrap(), 0);
        mock.push_line("12.5\r\n");
        assert_eq!(mock.bytes_to_read().await.unwrap(), 6);
        assert_eq!(mock.read_line().await.unwrap(), "12.5");
        assert!(matches!(
            mock.read_line().await,
            Err(TransportError::Timeout)
        ));
    }
}
