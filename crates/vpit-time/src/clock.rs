use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic host time source, in nanoseconds since an arbitrary epoch.
pub trait HostClock {
    fn now_ns(&self) -> u64;
}

impl<T: HostClock + ?Sized> HostClock for &T {
    fn now_ns(&self) -> u64 {
        (**self).now_ns()
    }
}

impl<T: HostClock + ?Sized> HostClock for Arc<T> {
    fn now_ns(&self) -> u64 {
        (**self).now_ns()
    }
}

/// [`HostClock`] backed by [`Instant`]; the epoch is the moment the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct StdHostClock {
    epoch: Instant,
}

impl StdHostClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for StdHostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for StdHostClock {
    fn now_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Manually driven clock for deterministic tests and virtual-time runs.
///
/// Clones share the same underlying time, so a test can hand one clone to a device and keep
/// another to advance time.
#[derive(Debug, Clone, Default)]
pub struct FakeHostClock {
    now_ns: Arc<AtomicU64>,
}

impl FakeHostClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_now_ns(now_ns: u64) -> Self {
        Self {
            now_ns: Arc::new(AtomicU64::new(now_ns)),
        }
    }

    pub fn advance_ns(&self, delta_ns: u64) {
        let _ = self
            .now_ns
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| {
                Some(now.saturating_add(delta_ns))
            });
    }

    /// Sets the current time. Moving backwards is allowed; callers own the consequences.
    pub fn set_now_ns(&self, now_ns: u64) {
        self.now_ns.store(now_ns, Ordering::SeqCst);
    }
}

impl HostClock for FakeHostClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_clones_share_time() {
        let clock = FakeHostClock::new();
        let view = clock.clone();

        clock.advance_ns(1_500);
        assert_eq!(view.now_ns(), 1_500);

        view.set_now_ns(10);
        assert_eq!(clock.now_ns(), 10);
    }

    #[test]
    fn fake_clock_saturates_instead_of_wrapping() {
        let clock = FakeHostClock::with_now_ns(u64::MAX - 1);
        clock.advance_ns(10);
        assert_eq!(clock.now_ns(), u64::MAX);
    }

    #[test]
    fn std_clock_is_monotonic() {
        let clock = StdHostClock::new();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }
}
