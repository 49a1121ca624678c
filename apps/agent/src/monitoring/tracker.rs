use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::types::{CheckResult, MonitorStatus, StatusTransition};
use crate::database::models::{Monitor, PersistedStatus};

/// Runtime state of one monitor, owned exclusively by the tracker
#[derive(Debug, Clone)]
pub struct MonitorRuntimeState {
    pub consecutive_failures: u32,
    pub last_status: MonitorStatus,
    /// Status of the last notification fired, kept separate from
    /// `last_status` so identical repeated results never re-alert
    pub last_notified_status: MonitorStatus,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Default for MonitorRuntimeState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            last_status: MonitorStatus::Unknown,
            last_notified_status: MonitorStatus::Unknown,
            last_checked: None,
        }
    }
}

/// Check state tracker - the per-monitor success/fail/retry state machine.
///
/// A monitor flips to `Down` only after `retries` consecutive failures
/// (flap suppression) and back to `Up` on the first success. `apply`
/// returns the transition edge, if any, for the dispatcher to act on.
pub struct StateTracker {
    states: HashMap<i64, MonitorRuntimeState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self { states: HashMap::new() }
    }

    /// Rebuild tracker state from persisted statuses on startup.
    ///
    /// `last_notified_status` is seeded from the stored status so the first
    /// post-restart check does not fire a duplicate notification.
    pub fn from_persisted(rows: Vec<PersistedStatus>) -> Self {
        let mut states = HashMap::new();
        for row in rows {
            states.insert(
                row.monitor_id,
                MonitorRuntimeState {
                    consecutive_failures: row.consecutive_failures,
                    last_status: row.last_status,
                    last_notified_status: row.last_status,
                    last_checked: None,
                },
            );
        }
        Self { states }
    }

    /// Apply a check result and return the transition it caused, if any
    pub fn apply(&mut self, monitor: &Monitor, result: &CheckResult) -> Option<StatusTransition> {
        let state = self.states.entry(monitor.id).or_default();
        state.last_checked = Some(result.timestamp);

        if result.is_success() {
            state.consecutive_failures = 0;
            let was_down = state.last_status == MonitorStatus::Down;
            state.last_status = MonitorStatus::Up;

            if was_down && state.last_notified_status != MonitorStatus::Up {
                state.last_notified_status = MonitorStatus::Up;
                return Some(StatusTransition::Recovered);
            }
            return None;
        }

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        // retries == 0 would mean a monitor that can never go down
        let threshold = monitor.retries.max(1);

        if state.consecutive_failures >= threshold && state.last_status != MonitorStatus::Down {
            state.last_status = MonitorStatus::Down;
            if state.last_notified_status != MonitorStatus::Down {
                state.last_notified_status = MonitorStatus::Down;
                return Some(StatusTransition::Failed);
            }
        }

        None
    }

    pub fn state(&self, monitor_id: i64) -> Option<&MonitorRuntimeState> {
        self.states.get(&monitor_id)
    }

    /// Snapshot of one monitor's persistable fields
    pub fn snapshot(&self, monitor_id: i64) -> Option<PersistedStatus> {
        self.states.get(&monitor_id).map(|s| PersistedStatus {
            monitor_id,
            last_status: s.last_status,
            consecutive_failures: s.consecutive_failures,
        })
    }

    /// Drop state for monitors no longer in the configuration
    pub fn retain_monitors(&mut self, ids: &std::collections::HashSet<i64>) {
        self.states.retain(|id, _| ids.contains(id));
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::MonitorSpec;

    fn test_monitor(retries: u32) -> Monitor {
        let mut m = Monitor::new(
            1,
            "test".to_string(),
            MonitorSpec::Http { url: "https://example.com".to_string() },
        );
        m.retries = retries;
        m
    }

    fn failed(monitor_id: i64) -> CheckResult {
        CheckResult::new(monitor_id).failure("connection refused".to_string())
    }

    fn succeeded(monitor_id: i64) -> CheckResult {
        CheckResult::new(monitor_id).success(42, Some(200))
    }

    #[test]
    fn test_down_fires_only_at_retry_threshold() {
        let monitor = test_monitor(3);
        let mut tracker = StateTracker::new();

        // Failures at t=0 and t=60 stay silent, t=120 crosses the threshold
        assert_eq!(tracker.apply(&monitor, &failed(1)), None);
        assert_eq!(tracker.apply(&monitor, &failed(1)), None);
        assert_eq!(tracker.apply(&monitor, &failed(1)), Some(StatusTransition::Failed));
    }

    #[test]
    fn test_no_duplicate_down_notification() {
        let monitor = test_monitor(2);
        let mut tracker = StateTracker::new();

        assert_eq!(tracker.apply(&monitor, &failed(1)), None);
        assert_eq!(tracker.apply(&monitor, &failed(1)), Some(StatusTransition::Failed));

        // Continued failures after the edge never re-alert
        assert_eq!(tracker.apply(&monitor, &failed(1)), None);
        assert_eq!(tracker.apply(&monitor, &failed(1)), None);
    }

    #[test]
    fn test_recovery_fires_exactly_once() {
        let monitor = test_monitor(1);
        let mut tracker = StateTracker::new();

        assert_eq!(tracker.apply(&monitor, &failed(1)), Some(StatusTransition::Failed));
        assert_eq!(tracker.apply(&monitor, &succeeded(1)), Some(StatusTransition::Recovered));
        assert_eq!(tracker.apply(&monitor, &succeeded(1)), None);
    }

    #[test]
    fn test_single_success_resets_failure_counter() {
        let monitor = test_monitor(3);
        let mut tracker = StateTracker::new();

        tracker.apply(&monitor, &failed(1));
        tracker.apply(&monitor, &failed(1));
        // A transient blip ends here; the counter resets
        assert_eq!(tracker.apply(&monitor, &succeeded(1)), None);
        assert_eq!(tracker.state(1).unwrap().consecutive_failures, 0);

        // Two more failures are still below the threshold
        assert_eq!(tracker.apply(&monitor, &failed(1)), None);
        assert_eq!(tracker.apply(&monitor, &failed(1)), None);
        assert_eq!(tracker.apply(&monitor, &failed(1)), Some(StatusTransition::Failed));
    }

    #[test]
    fn test_first_success_from_unknown_does_not_alert() {
        let monitor = test_monitor(3);
        let mut tracker = StateTracker::new();

        assert_eq!(tracker.apply(&monitor, &succeeded(1)), None);
        assert_eq!(tracker.state(1).unwrap().last_status, MonitorStatus::Up);
    }

    #[test]
    fn test_zero_retries_behaves_like_one() {
        let monitor = test_monitor(0);
        let mut tracker = StateTracker::new();

        assert_eq!(tracker.apply(&monitor, &failed(1)), Some(StatusTransition::Failed));
    }

    #[test]
    fn test_restart_roundtrip_preserves_state() {
        let monitor = test_monitor(3);
        let mut tracker = StateTracker::new();

        tracker.apply(&monitor, &failed(1));
        tracker.apply(&monitor, &failed(1));
        tracker.apply(&monitor, &failed(1));

        let snapshot = tracker.snapshot(1).unwrap();
        assert_eq!(snapshot.last_status, MonitorStatus::Down);
        assert_eq!(snapshot.consecutive_failures, 3);

        // Reload into a fresh tracker, as done on process restart
        let mut restored = StateTracker::from_persisted(vec![snapshot]);
        let state = restored.state(1).unwrap();
        assert_eq!(state.last_status, MonitorStatus::Down);
        assert_eq!(state.consecutive_failures, 3);

        // A failure after restart must not re-fire the down notification
        assert_eq!(restored.apply(&monitor, &failed(1)), None);

        // A success after restart fires recovered exactly once
        assert_eq!(restored.apply(&monitor, &succeeded(1)), Some(StatusTransition::Recovered));
        assert_eq!(restored.apply(&monitor, &succeeded(1)), None);
    }

    #[test]
    fn test_restart_with_up_status_stays_silent() {
        let persisted = PersistedStatus {
            monitor_id: 1,
            last_status: MonitorStatus::Up,
            consecutive_failures: 0,
        };

        let monitor = test_monitor(3);
        let mut tracker = StateTracker::from_persisted(vec![persisted]);

        // No "recovered" storm on redeploy
        assert_eq!(tracker.apply(&monitor, &succeeded(1)), None);
    }

    #[test]
    fn test_retain_monitors_prunes_removed() {
        let monitor = test_monitor(1);
        let mut tracker = StateTracker::new();
        tracker.apply(&monitor, &succeeded(1));

        let keep: std::collections::HashSet<i64> = [2].into_iter().collect();
        tracker.retain_monitors(&keep);
        assert!(tracker.state(1).is_none());
    }
}
