//! # Device Listeners
//!
//! Collaborators subscribe to state changes, record batches and newly
//! discovered meters. Notifications are delivered in registration order. A
//! listener that returns an error, or panics, is logged and counted; the
//! remaining listeners are still notified.

use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use log::{error, warn};

use crate::device::state::DeviceState;
use crate::error::DsmrError;
use crate::meter::MeterDescriptor;
use crate::p1::telegram::CosemObject;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub old: DeviceState,
    pub new: DeviceState,
    pub details: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBatch {
    pub objects: Vec<CosemObject>,
    pub details: String,
    pub at: DateTime<Utc>,
}

/// Receives device notifications on the device's executor.
///
/// Implementations must not block; hand heavy work off to another task.
pub trait DeviceListener: Send {
    fn state_changed(&mut self, _change: &StateChange) -> Result<(), DsmrError> {
        Ok(())
    }

    fn records_received(&mut self, _batch: &RecordBatch) -> Result<(), DsmrError> {
        Ok(())
    }

    fn meter_discovered(&mut self, _meter: &MeterDescriptor) -> Result<(), DsmrError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Outcome of notifying every listener once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    /// Listeners that panicked.
    pub faulted: usize,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.faulted == 0
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Box<dyn DeviceListener>)>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Box<dyn DeviceListener>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.listeners.push((id, listener));
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn state_changed(&mut self, change: &StateChange) -> DispatchReport {
        self.notify("state change", |l| l.state_changed(change))
    }

    pub fn records_received(&mut self, batch: &RecordBatch) -> DispatchReport {
        self.notify("record batch", |l| l.records_received(batch))
    }

    pub fn meter_discovered(&mut self, meter: &MeterDescriptor) -> DispatchReport {
        self.notify("meter discovery", |l| l.meter_discovered(meter))
    }

    fn notify<F>(&mut self, what: &str, mut deliver: F) -> DispatchReport
    where
        F: FnMut(&mut dyn DeviceListener) -> Result<(), DsmrError>,
    {
        let mut report = DispatchReport::default();
        for (id, listener) in self.listeners.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| deliver(listener.as_mut()))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    warn!("Listener {id:?} failed handling {what}: {e}");
                    report.failed += 1;
                }
                Err(_) => {
                    error!("Listener {id:?} panicked handling {what}");
                    report.faulted += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl DeviceListener for Recorder {
        fn state_changed(&mut self, _change: &StateChange) -> Result<(), DsmrError> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                return Err(DsmrError::Listener(format!("{} refused", self.name)));
            }
            Ok(())
        }
    }

    struct Panicker;

    impl DeviceListener for Panicker {
        fn state_changed(&mut self, _change: &StateChange) -> Result<(), DsmrError> {
            panic!("listener bug");
        }
    }

    fn change() -> StateChange {
        StateChange {
            old: DeviceState::Starting,
            new: DeviceState::Online,
            details: String::new(),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_registration_order_and_failure_isolation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        for (name, fail) in [("a", false), ("b", true), ("c", false)] {
            registry.subscribe(Box::new(Recorder {
                name,
                log: log.clone(),
                fail,
            }));
        }
        registry.subscribe(Box::new(Panicker));

        let report = registry.state_changed(&change());
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            report,
            DispatchReport {
                delivered: 2,
                failed: 1,
                faulted: 1
            }
        );
        assert!(!report.is_clean());
    }

    #[test]
    fn test_unsubscribe() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        let id = registry.subscribe(Box::new(Recorder {
            name: "a",
            log: log.clone(),
            fail: false,
        }));
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert!(registry.is_empty());
        assert!(registry.state_changed(&change()).is_clean());
        assert!(log.lock().unwrap().is_empty());
    }
}
