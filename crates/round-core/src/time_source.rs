use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use vault_round_types::Timestamp;

/// Chain-relative "now" in seconds used for permission checks.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Clock driven by observed block timestamps. Never moves backwards.
#[derive(Debug, Default)]
pub struct ChainClock {
    latest: AtomicU64,
}

impl ChainClock {
    pub fn new(initial: Timestamp) -> Self {
        Self {
            latest: AtomicU64::new(initial),
        }
    }

    /// Returns the clock value after applying `block_timestamp`.
    pub fn observe_block_timestamp(&self, block_timestamp: Timestamp) -> Timestamp {
        self.latest
            .fetch_max(block_timestamp, Ordering::AcqRel)
            .max(block_timestamp)
    }
}

impl TimeSource for ChainClock {
    fn now(&self) -> Timestamp {
        self.latest.load(Ordering::Acquire)
    }
}

/// Wall-clock seconds since the Unix epoch, for sessions without a block source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct MockClock {
    now: AtomicU64,
}

impl MockClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::Release);
    }

    /// Moves the clock forward, saturating at `u64::MAX`. Returns the new time.
    pub fn advance(&self, secs: u64) -> Timestamp {
        let step = |now: Timestamp| now.saturating_add(secs);
        match self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |now| Some(step(now)))
        {
            Ok(previous) | Err(previous) => step(previous),
        }
    }
}

impl TimeSource for MockClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::Acquire)
    }
}
