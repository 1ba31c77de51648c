//! Injectable delay between job status polls.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Blocks the calling thread between polls.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records sleeps without waiting.
#[derive(Debug, Default)]
pub struct CountingSleeper {
    calls: AtomicU32,
}

impl CountingSleeper {
    /// Creates a sleeper with a zero count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sleeps requested so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Sleeper for CountingSleeper {
    fn sleep(&self, _duration: Duration) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}
