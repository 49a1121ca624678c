use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::database::models::Monitor;

/// Decides which assigned monitors to dispatch on a sweep tick.
///
/// A monitor is dispatched when it exists in the current configuration, is
/// not paused, is not already in flight, and its own interval has elapsed
/// since the last dispatch. The returned guard clears the in-flight flag
/// when the probe task finishes, even if it panics.
pub struct SweepPlanner {
    last_dispatch: HashMap<i64, Instant>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

/// Clears the in-flight flag for one monitor on drop
pub struct InFlightGuard {
    set: Arc<Mutex<HashSet<i64>>>,
    monitor_id: i64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.monitor_id);
        }
    }
}

impl SweepPlanner {
    pub fn new() -> Self {
        Self {
            last_dispatch: HashMap::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Select the monitors due for a check this tick.
    ///
    /// Marks each selected monitor as in flight; the caller must move the
    /// paired guard into the probe task.
    pub fn plan(
        &mut self,
        assigned: &[i64],
        monitors: &HashMap<i64, Monitor>,
        now: Instant,
    ) -> Vec<(Monitor, InFlightGuard)> {
        let mut due = Vec::new();

        for monitor_id in assigned {
            // Stale assignment rows can reference deleted monitors
            let Some(monitor) = monitors.get(monitor_id) else {
                continue;
            };

            if monitor.paused {
                continue;
            }

            {
                let mut in_flight = match self.in_flight.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };

                if in_flight.contains(monitor_id) {
                    continue;
                }

                let interval = Duration::from_secs(monitor.interval_seconds.max(1));
                let is_due = match self.last_dispatch.get(monitor_id) {
                    Some(last) => now.duration_since(*last) >= interval,
                    None => true,
                };

                if !is_due {
                    continue;
                }

                in_flight.insert(*monitor_id);
            }

            self.last_dispatch.insert(*monitor_id, now);
            due.push((
                monitor.clone(),
                InFlightGuard { set: self.in_flight.clone(), monitor_id: *monitor_id },
            ));
        }

        due
    }

    /// Drop dispatch bookkeeping for monitors no longer assigned to this node
    pub fn retain_assigned(&mut self, assigned: &HashSet<i64>) {
        self.last_dispatch.retain(|id, _| assigned.contains(id));
    }

    #[cfg(test)]
    fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }
}

impl Default for SweepPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::MonitorSpec;

    fn monitor_map(ids: &[i64], interval_seconds: u64) -> HashMap<i64, Monitor> {
        ids.iter()
            .map(|id| {
                let mut m = Monitor::new(
                    *id,
                    format!("monitor-{}", id),
                    MonitorSpec::Http { url: "https://example.com".to_string() },
                );
                m.interval_seconds = interval_seconds;
                (*id, m)
            })
            .collect()
    }

    #[test]
    fn test_first_sweep_dispatches_all_assigned() {
        let mut planner = SweepPlanner::new();
        let monitors = monitor_map(&[1, 2, 3], 60);

        let due = planner.plan(&[1, 2, 3], &monitors, Instant::now());
        assert_eq!(due.len(), 3);
    }

    #[test]
    fn test_monitor_not_due_is_skipped() {
        let mut planner = SweepPlanner::new();
        let monitors = monitor_map(&[1], 60);
        let start = Instant::now();

        let due = planner.plan(&[1], &monitors, start);
        assert_eq!(due.len(), 1);
        drop(due); // release in-flight

        // 25 seconds later the 60s interval has not elapsed
        let due = planner.plan(&[1], &monitors, start + Duration::from_secs(25));
        assert!(due.is_empty());

        let due = planner.plan(&[1], &monitors, start + Duration::from_secs(61));
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn test_in_flight_monitor_is_not_redispatched() {
        let mut planner = SweepPlanner::new();
        let monitors = monitor_map(&[1], 1);
        let start = Instant::now();

        let due = planner.plan(&[1], &monitors, start);
        assert_eq!(due.len(), 1);

        // Guard still held: the probe is slow and has overrun its interval
        let again = planner.plan(&[1], &monitors, start + Duration::from_secs(5));
        assert!(again.is_empty());

        drop(due);
        assert_eq!(planner.in_flight_count(), 0);

        let again = planner.plan(&[1], &monitors, start + Duration::from_secs(6));
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn test_paused_and_unknown_monitors_skipped() {
        let mut planner = SweepPlanner::new();
        let mut monitors = monitor_map(&[1], 60);
        monitors.get_mut(&1).unwrap().paused = true;

        // Monitor 1 is paused, monitor 99 does not exist
        let due = planner.plan(&[1, 99], &monitors, Instant::now());
        assert!(due.is_empty());
    }

    #[test]
    fn test_retain_assigned_forgets_moved_monitors() {
        let mut planner = SweepPlanner::new();
        let monitors = monitor_map(&[1, 2], 60);
        let start = Instant::now();

        drop(planner.plan(&[1, 2], &monitors, start));

        // Monitor 2 moved to another node, then came back: it should be
        // treated as never dispatched here
        let keep: HashSet<i64> = [1].into_iter().collect();
        planner.retain_assigned(&keep);

        let due = planner.plan(&[1, 2], &monitors, start + Duration::from_secs(1));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0.id, 2);
    }
}
