//! Liveness checks for a device.
//!
//! The watchdog never touches the machine. It looks at the published
//! [`DeviceStatus`] and tells the executor what to submit: an evaluation when
//! the device has been quiet for a while, or a forced reinitialization when no
//! telegram has arrived for the escalation window.

use std::time::{Duration, Instant};

use crate::config::DeviceSettings;
use crate::device::machine::DeviceStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Ask the machine to evaluate its recovery timeouts.
    Evaluate,
    /// Force `Initialize` regardless of the current state.
    Restart,
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    liveness: Duration,
    escalation: Duration,
    started_at: Instant,
    last_restart: Option<Instant>,
}

impl Watchdog {
    pub fn new(settings: &DeviceSettings, now: Instant) -> Self {
        Self {
            liveness: settings.liveness_timeout(),
            escalation: settings.escalation_timeout(),
            started_at: now,
            last_restart: None,
        }
    }

    /// What to do about `status` at `now`, if anything.
    pub fn check(&mut self, status: &DeviceStatus, now: Instant) -> Option<WatchdogAction> {
        if status.state.is_terminal() {
            return None;
        }

        let last_activity = [Some(self.started_at), status.last_telegram_at, self.last_restart]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.started_at);
        if now.saturating_duration_since(last_activity) > self.escalation {
            self.last_restart = Some(now);
            return Some(WatchdogAction::Restart);
        }

        let state_quiet = now.saturating_duration_since(status.entered_at) > self.liveness;
        let telegrams_quiet = status
            .last_telegram_at
            .map_or(true, |t| now.saturating_duration_since(t) > self.liveness);
        (state_quiet && telegrams_quiet).then_some(WatchdogAction::Evaluate)
    }

    /// Start a fresh escalation window, e.g. after reconfiguration.
    pub fn rearm(&mut self, settings: &DeviceSettings, now: Instant) {
        *self = Self::new(settings, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::state::DeviceState;

    fn status(state: DeviceState, entered_at: Instant, last: Option<Instant>) -> DeviceStatus {
        DeviceStatus {
            state,
            entered_at,
            last_telegram_at: last,
            details: String::new(),
            generation: 1,
        }
    }

    #[test]
    fn test_recent_activity_is_alive() {
        let t0 = Instant::now();
        let settings = DeviceSettings::default();
        let mut watchdog = Watchdog::new(&settings, t0);
        let later = t0 + settings.liveness_timeout() * 2;

        let online = status(DeviceState::Online, t0, Some(later - Duration::from_secs(1)));
        assert_eq!(watchdog.check(&online, later), None);

        let fresh = status(DeviceState::Offline, later, None);
        assert_eq!(watchdog.check(&fresh, later), None);
    }

    #[test]
    fn test_quiet_device_is_evaluated() {
        let t0 = Instant::now();
        let settings = DeviceSettings::default();
        let mut watchdog = Watchdog::new(&settings, t0);
        let later = t0 + settings.liveness_timeout() + Duration::from_secs(1);

        let starting = status(DeviceState::Starting, t0, None);
        assert_eq!(watchdog.check(&starting, later), Some(WatchdogAction::Evaluate));
    }

    #[test]
    fn test_escalation_fires_once_per_window() {
        let t0 = Instant::now();
        let settings = DeviceSettings::default();
        let mut watchdog = Watchdog::new(&settings, t0);
        let late = t0 + settings.escalation_timeout() + Duration::from_secs(1);

        let offline = status(DeviceState::Offline, t0, None);
        assert_eq!(watchdog.check(&offline, late), Some(WatchdogAction::Restart));
        assert_eq!(
            watchdog.check(&offline, late + Duration::from_secs(1)),
            Some(WatchdogAction::Evaluate)
        );
        assert_eq!(
            watchdog.check(&offline, late + settings.escalation_timeout() + Duration::from_secs(1)),
            Some(WatchdogAction::Restart)
        );
    }

    #[test]
    fn test_terminal_states_left_alone() {
        let t0 = Instant::now();
        let settings = DeviceSettings::default();
        let mut watchdog = Watchdog::new(&settings, t0);
        let late = t0 + settings.escalation_timeout() * 2;

        for state in [DeviceState::Shutdown, DeviceState::ConfigurationProblem] {
            assert_eq!(watchdog.check(&status(state, t0, None), late), None);
        }
    }
}
