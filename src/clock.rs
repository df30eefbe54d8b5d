// src/clock.rs  —  Injected time source, so tests can advance virtual time
// deterministically instead of depending on `std::time::Instant` directly.

use std::time::{Duration, Instant};

pub trait Clock: Send {
    fn now_ms(&self) -> u64;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self { Self::new() }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Virtual clock for deterministic tests: `advance()` is the only way time
/// moves.
pub struct FakeClock {
    now: std::sync::atomic::AtomicU64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self { now: std::sync::atomic::AtomicU64::new(0) }
    }

    pub fn advance(&self, dur: Duration) {
        self.now.fetch_add(dur.as_millis() as u64, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self { Self::new() }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}
