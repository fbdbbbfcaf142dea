use crate::timer_queue::{TimerId, TimerQueue};

/// A re-armable one-shot timeout bound to a [`TimerQueue`].
///
/// Mirrors the classic kernel timeout contract: arming replaces any pending expiry, cancelling
/// an unarmed timer is a no-op, and a timer fires at most once per arm.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OneShotTimer {
    pending: Option<TimerId>,
}

impl OneShotTimer {
    pub const fn new() -> Self {
        Self { pending: None }
    }

    /// Arms the timer to fire `after_ns` nanoseconds after `now_ns`.
    pub fn arm<E>(&mut self, queue: &mut TimerQueue<E>, now_ns: u64, after_ns: u64, event: E) {
        self.arm_at(queue, now_ns.saturating_add(after_ns), event);
    }

    /// Arms the timer for the absolute time `deadline_ns`.
    pub fn arm_at<E>(&mut self, queue: &mut TimerQueue<E>, deadline_ns: u64, event: E) {
        self.cancel(queue);
        self.pending = Some(queue.schedule(deadline_ns, event));
    }

    pub fn cancel<E>(&mut self, queue: &mut TimerQueue<E>) {
        if let Some(id) = self.pending.take() {
            queue.cancel(id);
        }
    }

    /// Acknowledges an expiry delivered by the queue.
    ///
    /// Returns `false` for a stale event that no longer belongs to this timer.
    pub fn expire(&mut self, id: TimerId) -> bool {
        if self.pending == Some(id) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    pub fn id(&self) -> Option<TimerId> {
        self.pending
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deadline<E>(&self, queue: &TimerQueue<E>) -> Option<u64> {
        self.pending.and_then(|id| queue.deadline_of(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rearm_replaces_pending_expiry() {
        let mut q = TimerQueue::new();
        let mut t = OneShotTimer::new();

        t.arm(&mut q, 100, 50, 'x');
        t.arm(&mut q, 120, 50, 'y');

        assert_eq!(q.len(), 1);
        assert_eq!(t.deadline(&q), Some(170));
        let ev = q.pop_due(u64::MAX).unwrap();
        assert_eq!(ev.event, 'y');
        assert!(t.expire(ev.id));
        assert!(!t.is_armed());
    }

    #[test]
    fn cancel_is_safe_when_unarmed() {
        let mut q: TimerQueue<()> = TimerQueue::new();
        let mut t = OneShotTimer::new();
        t.cancel(&mut q);
        t.arm(&mut q, 0, 10, ());
        t.cancel(&mut q);
        t.cancel(&mut q);
        assert!(q.is_empty());
        assert!(!t.is_armed());
    }

    #[test]
    fn stale_expiry_is_rejected() {
        let mut q = TimerQueue::new();
        let mut t = OneShotTimer::new();
        t.arm(&mut q, 0, 10, ());
        let stale = t.id().unwrap();
        t.arm(&mut q, 0, 20, ());
        assert!(!t.expire(stale));
        assert!(t.is_armed());
    }
}
