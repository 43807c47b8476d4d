//! Logical, replay-safe timers.
//!
//! The one suspension primitive a state machine may use. Deadlines are
//! expressed on the replicated timeline ([`Timestamp`]); a task fires when
//! the machine's logical clock passes its deadline during the application
//! of a later commit or tick entry. Replaying the log therefore reproduces
//! identical firings — no wall clock is involved anywhere.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use lodestone_types::Timestamp;

struct Scheduled<T> {
    deadline: Timestamp,
    /// Insertion sequence; breaks deadline ties so firing order is total.
    seq: u64,
    task: T,
}

impl<T> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for Scheduled<T> {}

impl<T> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Scheduled<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Normal order - used with Reverse wrapper for min-heap
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Min-heap of pending logical timers.
#[derive(Default)]
pub struct Scheduler<T> {
    heap: BinaryHeap<Reverse<Scheduled<T>>>,
    next_seq: u64,
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Schedules `task` to fire once the logical clock reaches `deadline`.
    pub fn schedule(&mut self, deadline: Timestamp, task: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Scheduled {
            deadline,
            seq,
            task,
        }));
    }

    /// Pops every task whose deadline is at or before `now`, in
    /// (deadline, insertion) order.
    pub fn due(&mut self, now: Timestamp) -> Vec<T> {
        let mut fired = Vec::new();
        while let Some(Reverse(next)) = self.heap.peek() {
            if next.deadline > now {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            fired.push(entry.task);
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> std::fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.heap.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(at(300), "late");
        scheduler.schedule(at(100), "early");
        scheduler.schedule(at(200), "middle");

        assert_eq!(scheduler.due(at(250)), vec!["early", "middle"]);
        assert_eq!(scheduler.due(at(250)), Vec::<&str>::new());
        assert_eq!(scheduler.due(at(300)), vec!["late"]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn equal_deadlines_fire_in_insertion_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(at(100), 1);
        scheduler.schedule(at(100), 2);
        scheduler.schedule(at(100), 3);

        assert_eq!(scheduler.due(at(100)), vec![1, 2, 3]);
    }

    #[test]
    fn nothing_fires_before_its_deadline() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(at(500), ());

        assert!(scheduler.due(at(499)).is_empty());
        assert_eq!(scheduler.len(), 1);
    }
}
