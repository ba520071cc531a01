use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing what the supervisor has done to server processes
#[derive(Debug, Default)]
pub struct LaunchStats {
    spawned: AtomicU64,
    reused: AtomicU64,
    killed: AtomicU64,
    failed_attempts: AtomicU64,
}

/// Snapshot of launch counters at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub spawned: u64,
    pub reused: u64,
    pub killed: u64,
    pub failed_attempts: u64,
}

impl LaunchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_spawn(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reuse(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_kill(&self) {
        self.killed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_attempt(&self) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            spawned: self.spawned.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            killed: self.killed.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters (useful for testing)
    pub fn reset(&self) {
        self.spawned.store(0, Ordering::Relaxed);
        self.reused.store(0, Ordering::Relaxed);
        self.killed.store(0, Ordering::Relaxed);
        self.failed_attempts.store(0, Ordering::Relaxed);
    }
}
