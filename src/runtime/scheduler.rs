//! Single-threaded task scheduler with a virtual clock.
//!
//! Timers fire in due-time order (ties in scheduling order); microtasks run
//! FIFO and always before the next timer.

use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
pub struct Scheduler<T> {
    now_ms: u64,
    next_seq: u64,
    timers: BTreeMap<(u64, u64), T>,
    due_by_id: HashMap<TimerId, (u64, u64)>,
    microtasks: VecDeque<T>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Scheduler {
            now_ms: 0,
            next_seq: 0,
            timers: BTreeMap::new(),
            due_by_id: HashMap::new(),
            microtasks: VecDeque::new(),
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn set_timeout(&mut self, delay_ms: u64, task: T) -> TimerId {
        self.next_seq += 1;
        let key = (self.now_ms + delay_ms, self.next_seq);
        let id = TimerId(self.next_seq);
        self.timers.insert(key, task);
        self.due_by_id.insert(id, key);
        id
    }

    pub fn clear_timeout(&mut self, id: TimerId) -> bool {
        match self.due_by_id.remove(&id) {
            Some(key) => self.timers.remove(&key).is_some(),
            None => false,
        }
    }

    pub fn queue_microtask(&mut self, task: T) {
        self.microtasks.push_back(task);
    }

    pub fn pop_microtask(&mut self) -> Option<T> {
        self.microtasks.pop_front()
    }

    /// Take the earliest timer due at or before `deadline_ms`, moving the
    /// clock to its due time.
    pub fn pop_due(&mut self, deadline_ms: u64) -> Option<T> {
        let (&key, _) = self.timers.iter().next()?;
        if key.0 > deadline_ms {
            return None;
        }
        let task = self.timers.remove(&key)?;
        self.due_by_id.remove(&TimerId(key.1));
        self.now_ms = self.now_ms.max(key.0);
        Some(task)
    }

    /// Move the clock forward without running anything.
    pub fn set_now(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timers_fire_in_due_order() {
        let mut scheduler: Scheduler<&str> = Scheduler::new();
        scheduler.set_timeout(50, "late");
        scheduler.set_timeout(10, "early");
        scheduler.set_timeout(10, "early-second");

        assert_eq!(scheduler.pop_due(5), None);
        assert_eq!(scheduler.pop_due(100), Some("early"));
        assert_eq!(scheduler.now_ms(), 10);
        assert_eq!(scheduler.pop_due(100), Some("early-second"));
        assert_eq!(scheduler.pop_due(100), Some("late"));
        assert_eq!(scheduler.now_ms(), 50);
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[test]
    fn test_clear_timeout() {
        let mut scheduler: Scheduler<u32> = Scheduler::new();
        let id = scheduler.set_timeout(10, 1);
        assert!(scheduler.clear_timeout(id));
        assert!(!scheduler.clear_timeout(id));
        assert_eq!(scheduler.pop_due(100), None);
    }

    #[test]
    fn test_delay_is_relative_to_now() {
        let mut scheduler: Scheduler<u32> = Scheduler::new();
        scheduler.set_now(100);
        scheduler.set_timeout(20, 7);
        assert_eq!(scheduler.pop_due(119), None);
        assert_eq!(scheduler.pop_due(120), Some(7));
    }

    #[test]
    fn test_microtasks_fifo() {
        let mut scheduler: Scheduler<u32> = Scheduler::new();
        scheduler.queue_microtask(1);
        scheduler.queue_microtask(2);
        assert_eq!(scheduler.pending_microtasks(), 2);
        assert_eq!(scheduler.pop_microtask(), Some(1));
        assert_eq!(scheduler.pop_microtask(), Some(2));
        assert_eq!(scheduler.pop_microtask(), None);
    }
}
