// src/scheduler.rs - Deadline queue driven by the device tick
//
// Tasks carry no state of their own. Whatever they act on is re-read
// when they run, so a task left behind by a replaced timer only causes a
// harmless re-evaluation.

use crate::types::ObjectId;
use chrono::{DateTime, Utc};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Work the device performs when a deadline passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// Re-evaluate an object whose time delay may have elapsed
    Evaluate(ObjectId),
    /// Sample and evaluate an event enrollment
    Poll(ObjectId),
    /// Drop COV subscriptions whose lifetime ran out
    CovExpiry,
    /// Periodic COV notification of an object
    CovPeriod(ObjectId),
}

impl Task {
    pub fn object(&self) -> Option<ObjectId> {
        match self {
            Task::Evaluate(id) | Task::Poll(id) | Task::CovPeriod(id) => Some(*id),
            Task::CovExpiry => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    deadline: DateTime<Utc>,
    seq: u64,
    task: Task,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of `(deadline, task)`; equal deadlines run in schedule order
#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<Entry>>,
    seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, deadline: DateTime<Utc>, task: Task) {
        self.seq += 1;
        self.heap.push(Reverse(Entry {
            deadline,
            seq: self.seq,
            task,
        }));
    }

    /// Remove and return every task due at `now`, earliest first
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<Task> {
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                due.push(entry.task);
            }
        }
        due
    }

    /// Drop every task of `object`; returns how many were dropped
    pub fn cancel_object(&mut self, object: ObjectId) -> usize {
        let before = self.heap.len();
        self.heap.retain(|Reverse(entry)| entry.task.object() != Some(object));
        before - self.heap.len()
    }

    /// Drop every task equal to `task`
    pub fn cancel(&mut self, task: Task) -> usize {
        let before = self.heap.len();
        self.heap.retain(|Reverse(entry)| entry.task != task);
        before - self.heap.len()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse(entry)| entry.deadline)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
