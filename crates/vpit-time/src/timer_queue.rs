use std::collections::{BTreeMap, HashMap};

/// Opaque handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEvent<E> {
    pub id: TimerId,
    pub deadline_ns: u64,
    pub event: E,
}

/// Deadline-ordered queue of one-shot timers.
///
/// The queue stores events rather than callbacks; whoever drains it maps each event back to the
/// device that scheduled it. Timers with equal deadlines fire in scheduling order.
#[derive(Debug)]
pub struct TimerQueue<E> {
    next_id: u64,
    by_deadline: BTreeMap<(u64, TimerId), E>,
    deadlines: HashMap<TimerId, u64>,
}

impl<E> TimerQueue<E> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            by_deadline: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// Schedules `event` to fire at the absolute time `deadline_ns`.
    pub fn schedule(&mut self, deadline_ns: u64, event: E) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.by_deadline.insert((deadline_ns, id), event);
        self.deadlines.insert(id, deadline_ns);
        id
    }

    /// Removes a pending timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline_ns) => {
                self.by_deadline.remove(&(deadline_ns, id));
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    pub fn deadline_of(&self, id: TimerId) -> Option<u64> {
        self.deadlines.get(&id).copied()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.by_deadline.keys().next().map(|&(deadline_ns, _)| deadline_ns)
    }

    /// Pops the earliest timer whose deadline is at or before `now_ns`.
    pub fn pop_due(&mut self, now_ns: u64) -> Option<TimerEvent<E>> {
        let (&(deadline_ns, id), _) = self.by_deadline.iter().next()?;
        if deadline_ns > now_ns {
            return None;
        }
        let event = self.by_deadline.remove(&(deadline_ns, id))?;
        self.deadlines.remove(&id);
        Some(TimerEvent {
            id,
            deadline_ns,
            event,
        })
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_deadline.clear();
        self.deadlines.clear();
    }
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_deadline_order_then_fifo() {
        let mut q = TimerQueue::new();
        q.schedule(30, "c");
        q.schedule(10, "a");
        q.schedule(10, "b");

        assert_eq!(q.next_deadline(), Some(10));
        assert_eq!(q.pop_due(100).map(|e| e.event), Some("a"));
        assert_eq!(q.pop_due(100).map(|e| e.event), Some("b"));
        assert_eq!(q.pop_due(100).map(|e| e.event), Some("c"));
        assert!(q.pop_due(100).is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn nothing_is_due_before_its_deadline() {
        let mut q = TimerQueue::new();
        q.schedule(1_000, ());
        assert!(q.pop_due(999).is_none());
        let ev = q.pop_due(1_000).unwrap();
        assert_eq!(ev.deadline_ns, 1_000);
    }

    #[test]
    fn cancel_removes_pending_timer_once() {
        let mut q = TimerQueue::new();
        let a = q.schedule(5, 1u8);
        let b = q.schedule(7, 2u8);

        assert!(q.cancel(a));
        assert!(!q.cancel(a));
        assert!(!q.is_pending(a));
        assert_eq!(q.deadline_of(b), Some(7));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_due(10).map(|e| e.id), Some(b));
        assert!(!q.cancel(b));
    }
}
