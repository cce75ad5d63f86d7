//! Mock meter port for testing
//!
//! Every successful `open` hands out one end of an in-memory duplex pipe; the
//! test writes meter bytes into the other end obtained with
//! [`MockPort::take_writer`]. Dropping the writer looks like the meter hanging
//! up. Open failures can be scripted and calls are counted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::DuplexStream;

use crate::device::port::{MeterPort, PortError, PortFactory, PortStream};

#[derive(Default)]
struct MockState {
    open_failures: VecDeque<PortError>,
    writer: Option<DuplexStream>,
    opens: usize,
    closes: usize,
    switches: usize,
    speed_index: usize,
}

/// Cloneable handle; clones share the same state.
#[derive(Clone)]
pub struct MockPort {
    state: Arc<Mutex<MockState>>,
    speeds: usize,
}

impl Default for MockPort {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPort {
    /// Port with two candidate speeds.
    pub fn new() -> Self {
        Self::with_speeds(2)
    }

    pub fn with_speeds(speeds: usize) -> Self {
        Self {
            state: Arc::default(),
            speeds,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `open` fail with `error`.
    pub fn fail_next_open(&self, error: PortError) {
        self.lock().open_failures.push_back(error);
    }

    /// Meter side of the most recently opened pipe.
    pub fn take_writer(&self) -> Option<DuplexStream> {
        self.lock().writer.take()
    }

    /// Wait until a pipe has been opened and take its meter side.
    pub async fn wait_for_writer(&self, max_wait: Duration) -> Option<DuplexStream> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            if let Some(writer) = self.take_writer() {
                return Some(writer);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn switches(&self) -> usize {
        self.lock().switches
    }

    pub fn speed_index(&self) -> usize {
        self.lock().speed_index
    }

    /// Factory handing out clones of this port.
    pub fn factory(&self) -> PortFactory {
        let port = self.clone();
        Arc::new(move || Ok(Box::new(port.clone()) as Box<dyn MeterPort>))
    }
}

#[async_trait]
impl MeterPort for MockPort {
    async fn open(&mut self) -> Result<PortStream, PortError> {
        let mut state = self.lock();
        state.opens += 1;
        if let Some(error) = state.open_failures.pop_front() {
            return Err(error);
        }

        let (device_side, meter_side) = tokio::io::duplex(8192);
        state.writer = Some(meter_side);
        Ok(Box::new(device_side))
    }

    async fn close(&mut self) {
        self.lock().closes += 1;
    }

    fn switch_speed(&mut self) -> bool {
        let mut state = self.lock();
        state.switches += 1;
        if self.speeds < 2 {
            return false;
        }
        state.speed_index = (state.speed_index + 1) % self.speeds;
        true
    }

    fn describe(&self) -> String {
        format!("mock port (speed #{})", self.speed_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::port::PortErrorKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_scripted_failure_then_pipe() {
        let mock = MockPort::new();
        mock.fail_next_open(PortError::new(PortErrorKind::InUse, "busy"));

        let mut port = (mock.factory())().unwrap();
        assert_eq!(port.open().await.err().unwrap().kind, PortErrorKind::InUse);

        let mut stream = port.open().await.unwrap();
        let mut writer = mock.take_writer().unwrap();
        writer.write_all(b"/ISK5").await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"/ISK5");
        assert_eq!(mock.opens(), 2);
    }

    #[tokio::test]
    async fn test_counters() {
        let mock = MockPort::with_speeds(1);
        let mut port = mock.clone();
        assert!(!port.switch_speed());
        port.close().await;
        assert_eq!(mock.switches(), 1);
        assert_eq!(mock.closes(), 1);
    }
}
