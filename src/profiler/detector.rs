//! Threshold checks and the set of already profiled processes.

use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::process::Indicator;

pub const DEFAULT_MEM_THRESHOLD: f64 = 50.0;
pub const DEFAULT_CPU_THRESHOLD: f64 = 40.0;

/// Usage percentages at or above which a process counts as anomalous.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub mem_percent: f64,
    pub cpu_percent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            mem_percent: DEFAULT_MEM_THRESHOLD,
            cpu_percent: DEFAULT_CPU_THRESHOLD,
        }
    }
}

impl Thresholds {
    /// Memory is judged on USS, CPU on the per-process CPU percent.
    pub fn breached(&self, indicator: &Indicator) -> bool {
        indicator.uss_percent >= self.mem_percent || indicator.cpu_percent >= self.cpu_percent
    }
}

/// Identifies one profiling attempt on a pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub pid: u32,
    id: u64,
}

#[derive(Debug, Clone, Copy)]
struct Mark {
    attempt: u64,
    /// Cleared once the attempt's task finishes.
    active: bool,
    /// Start of the attempt while active, its completion afterwards.
    since: Instant,
}

/// Pids that already had a profile started.
///
/// A pid with an attempt still running is never marked again. Without a
/// cooldown a pid is profiled at most once per process lifetime. With one,
/// the pid may be profiled again once the cooldown has passed since the
/// previous attempt finished.
#[derive(Debug, Default)]
pub struct ProfiledSet {
    entries: Mutex<HashMap<u32, Mark>>,
    next_attempt: AtomicU64,
    cooldown: Option<Duration>,
}

impl ProfiledSet {
    pub fn new(cooldown: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_attempt: AtomicU64::new(0),
            cooldown,
        }
    }

    /// Marks `pid` as being profiled. Returns `None` if it is already marked.
    pub fn try_mark(&self, pid: u32) -> Option<Attempt> {
        self.try_mark_at(pid, Instant::now())
    }

    pub fn try_mark_at(&self, pid: u32, now: Instant) -> Option<Attempt> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cooldown) = self.cooldown {
            entries.retain(|_, m| m.active || now.saturating_duration_since(m.since) < cooldown);
        }
        if entries.contains_key(&pid) {
            return None;
        }
        let id = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            pid,
            Mark {
                attempt: id,
                active: true,
                since: now,
            },
        );
        Some(Attempt { pid, id })
    }

    /// Records that `attempt` is over; the cooldown runs from here.
    pub fn finish(&self, attempt: Attempt) {
        self.finish_at(attempt, Instant::now())
    }

    pub fn finish_at(&self, attempt: Attempt, now: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mark) = entries.get_mut(&attempt.pid) {
            if mark.attempt == attempt.id {
                mark.active = false;
                mark.since = now;
            }
        }
    }

    /// Forgets the pid of `attempt` so a later cycle may try again.
    ///
    /// Does nothing if the pid has since been marked by another attempt.
    pub fn release(&self, attempt: Attempt) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries
            .get(&attempt.pid)
            .is_some_and(|m| m.attempt == attempt.id)
        {
            entries.remove(&attempt.pid);
        }
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&pid)
    }

    /// True while an attempt on `pid` has not finished.
    pub fn is_active(&self, pid: u32) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&pid)
            .is_some_and(|m| m.active)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indicator(uss: f64, cpu: f64) -> Indicator {
        Indicator {
            pid: 1,
            command: "x,1".into(),
            cpu_percent: cpu,
            uss_percent: uss,
            pss_percent: uss,
            rss_percent: uss,
        }
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let t = Thresholds::default();
        assert!(t.breached(&indicator(50.0, 0.0)));
        assert!(t.breached(&indicator(0.0, 40.0)));
        assert!(!t.breached(&indicator(49.9, 39.9)));
    }

    #[test]
    fn test_pid_is_marked_once() {
        let set = ProfiledSet::new(None);
        let attempt = set.try_mark(7).unwrap();
        assert!(set.try_mark(7).is_none());
        assert!(set.contains(7));
        set.release(attempt);
        assert!(set.try_mark(7).is_some());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_finished_pid_stays_marked_without_cooldown() {
        let set = ProfiledSet::new(None);
        let attempt = set.try_mark(7).unwrap();
        set.finish(attempt);
        assert!(!set.is_active(7));
        assert!(set.try_mark(7).is_none());
    }

    #[test]
    fn test_cooldown_runs_from_completion() {
        let set = ProfiledSet::new(Some(Duration::from_secs(60)));
        let start = Instant::now();
        let attempt = set.try_mark_at(9, start).unwrap();
        set.finish_at(attempt, start + Duration::from_secs(10));
        assert!(set.try_mark_at(9, start + Duration::from_secs(60)).is_none());
        assert!(set.try_mark_at(9, start + Duration::from_secs(70)).is_some());
    }

    #[test]
    fn test_active_attempt_blocks_after_cooldown() {
        let set = ProfiledSet::new(Some(Duration::from_millis(100)));
        let start = Instant::now();
        set.try_mark_at(9, start).unwrap();
        assert!(set.try_mark_at(9, start + Duration::from_secs(3600)).is_none());
        assert!(set.is_active(9));
    }

    #[test]
    fn test_release_ignores_other_attempts() {
        let set = ProfiledSet::new(Some(Duration::from_secs(1)));
        let start = Instant::now();
        let old = set.try_mark_at(9, start).unwrap();
        set.finish_at(old, start);
        let current = set.try_mark_at(9, start + Duration::from_secs(2)).unwrap();

        set.release(old);
        set.finish_at(old, start + Duration::from_secs(3));
        assert!(set.is_active(9));
        assert!(set.try_mark_at(9, start + Duration::from_secs(10)).is_none());

        set.release(current);
        assert!(!set.contains(9));
    }

    #[test]
    fn test_expired_entries_are_pruned() {
        let set = ProfiledSet::new(Some(Duration::from_secs(60)));
        let start = Instant::now();
        for pid in [1, 2, 3] {
            let attempt = set.try_mark_at(pid, start).unwrap();
            set.finish_at(attempt, start);
        }
        set.try_mark_at(4, start).unwrap();
        assert_eq!(set.len(), 4);

        set.try_mark_at(5, start + Duration::from_secs(61)).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(4));
        assert!(!set.contains(1));
    }
}
