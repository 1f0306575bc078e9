use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/**
    Source of the current time, in milliseconds since the Unix epoch.

    Uses the same unit as [`Expiration`](crate::Expiration) so the
    expiry check is a direct comparison.
*/
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> f64;
}

/**
    Wall-clock time from the operating system.
*/
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

/**
    A clock that only moves when told to.

    Used for tests and for replaying scenarios at a fixed point in time.
*/
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(now_millis: f64) -> Self {
        Self {
            bits: AtomicU64::new(now_millis.to_bits()),
        }
    }

    pub fn set(&self, now_millis: f64) {
        self.bits.store(now_millis.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, millis: f64) {
        self.set(self.now_millis() + millis);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now_millis(&self) -> f64 {
        (**self).now_millis()
    }
}
