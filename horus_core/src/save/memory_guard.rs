//! Memory auto-stop guard (§4.H, §8.6): samples process RSS at a
//! configurable cadence and trips a flag the record loop checks before its
//! next append, so the loop transitions into `exit` instead of risking an
//! OS OOM kill.
//!
//! Per design notes open question 5, RSS includes shared library pages and
//! is not a precise measure of resident *dataset* memory, but is kept here
//! for implementability; the property in §8.6 (no more than `k` additional
//! frames appended past the limit, bounded by the sample period) holds
//! regardless of which resident-memory signal is sampled.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use sysinfo::{Pid, System};

pub const DEFAULT_CHECK_EVERY_TICKS: u64 = 100;
pub const DEFAULT_MEMORY_LIMIT_GB: f64 = 19.0;

/// Shareable handle so the guard's sampling can run on a background thread
/// while the record loop only reads the atomic flag on its hot path.
#[derive(Clone)]
pub struct MemoryAutoStopGuard {
    limit_bytes: u64,
    check_every_ticks: u64,
    last_rss_bytes: Arc<AtomicU64>,
    tripped: Arc<AtomicBool>,
}

impl MemoryAutoStopGuard {
    pub fn new(limit_bytes: u64, check_every_ticks: u64) -> Self {
        Self {
            limit_bytes,
            check_every_ticks,
            last_rss_bytes: Arc::new(AtomicU64::new(0)),
            tripped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn check_every_ticks(&self) -> u64 {
        self.check_every_ticks
    }

    /// Call once per tick; performs the RSS sample only every
    /// `check_every_ticks` ticks. Returns whether the limit has been
    /// crossed (sticky: once tripped, stays tripped for this process).
    pub fn sample_if_due(&self, tick_count: u64, system: &mut System) -> bool {
        if self.tripped.load(Ordering::Relaxed) {
            return true;
        }
        if tick_count % self.check_every_ticks != 0 {
            return false;
        }
        let pid = Pid::from_u32(std::process::id());
        system.refresh_process(pid);
        let rss = system.process(pid).map(|p| p.memory()).unwrap_or(0); // sysinfo 0.30 reports bytes
        self.last_rss_bytes.store(rss, Ordering::Relaxed);
        if rss > self.limit_bytes {
            log::warn!(
                "memory auto-stop: RSS {} bytes exceeds limit {} bytes, ending session",
                rss,
                self.limit_bytes
            );
            self.tripped.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }

    pub fn last_rss_bytes(&self) -> u64 {
        self.last_rss_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_once_limit_crossed_and_stays_tripped() {
        let guard = MemoryAutoStopGuard::new(1, 1); // 1 byte limit, checks every tick
        let mut system = System::new();
        assert!(guard.sample_if_due(1, &mut system));
        assert!(guard.is_tripped());
        // Sticky even without re-sampling.
        assert!(guard.sample_if_due(2, &mut system));
    }

    #[test]
    fn does_not_sample_off_cadence() {
        let guard = MemoryAutoStopGuard::new(u64::MAX, 100);
        let mut system = System::new();
        for tick in 1..100 {
            assert!(!guard.sample_if_due(tick, &mut system));
        }
    }
}
