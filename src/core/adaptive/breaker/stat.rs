use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counter {
    pub(crate) total: AtomicU64,
    pub(crate) error: AtomicU64,
    pub(crate) slow: AtomicU64,
}

impl Counter {
    pub fn reset(&self) {
        self.total.store(0, Ordering::SeqCst);
        self.error.store(0, Ordering::SeqCst);
        self.slow.store(0, Ordering::SeqCst);
    }
}

/// Point-in-time copy of the local call statistics.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct StatSnapshot {
    pub total: u64,
    pub error: u64,
    pub slow: u64,
}

impl StatSnapshot {
    pub fn error_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.error as f64 / self.total as f64
        }
    }

    pub fn slow_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.slow as f64 / self.total as f64
        }
    }
}

/// A tumbling window of call outcomes. The window restarts at the first record
/// after `interval_ms` has elapsed since it began.
#[derive(Debug, Default)]
pub struct WindowStat {
    counter: Counter,
    window_start_ms: AtomicU64,
}

impl WindowStat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, error: bool, slow: bool, interval_ms: u64, now_ms: u64) -> StatSnapshot {
        self.roll(interval_ms, now_ms);
        if error {
            self.counter.error.fetch_add(1, Ordering::SeqCst);
        }
        if slow {
            self.counter.slow.fetch_add(1, Ordering::SeqCst);
        }
        self.counter.total.fetch_add(1, Ordering::SeqCst);
        self.snapshot()
    }

    pub fn snapshot(&self) -> StatSnapshot {
        StatSnapshot {
            total: self.counter.total.load(Ordering::SeqCst),
            error: self.counter.error.load(Ordering::SeqCst),
            slow: self.counter.slow.load(Ordering::SeqCst),
        }
    }

    pub fn reset(&self) {
        self.counter.reset();
    }

    fn roll(&self, interval_ms: u64, now_ms: u64) {
        let start = self.window_start_ms.load(Ordering::SeqCst);
        if now_ms.saturating_sub(start) < interval_ms {
            return;
        }
        // only the winner of the race restarts the window
        if self
            .window_start_ms
            .compare_exchange(start, now_ms, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.counter.reset();
        }
    }
}
