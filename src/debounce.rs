// src/debounce.rs - Time delay before committing a transition
use crate::types::EventState;
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::trace;

/// A transition waiting for its time delay to elapse
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransition {
    pub target: EventState,
    /// Latest alarm value seen while pending
    pub trigger: Option<Value>,
    pub armed_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Result of arming the timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Armed {
    /// A new deadline was set; any previous pending transition is gone
    New(DateTime<Utc>),
    /// The same transition was already pending; its deadline is kept
    Kept(DateTime<Utc>),
}

impl Armed {
    pub fn deadline(self) -> DateTime<Utc> {
        match self {
            Armed::New(deadline) | Armed::Kept(deadline) => deadline,
        }
    }
}

/// At most one pending transition per state machine
///
/// Re-arming for the state already pending never moves the deadline, so a
/// stream of writes that keep producing the same candidate state cannot
/// postpone the commit. The alarm value may change while pending; only the
/// stored trigger follows it.
#[derive(Debug, Clone, Default)]
pub struct DebounceTimer {
    pending: Option<PendingTransition>,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(
        &mut self,
        target: EventState,
        trigger: Option<Value>,
        now: DateTime<Utc>,
        delay: Duration,
    ) -> Armed {
        if let Some(pending) = self.pending.as_mut().filter(|p| p.target == target) {
            pending.trigger = trigger;
            return Armed::Kept(pending.deadline);
        }

        let deadline = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        trace!("Debounce armed for {} until {}", target, deadline);
        self.pending = Some(PendingTransition {
            target,
            trigger,
            armed_at: now,
            deadline,
        });
        Armed::New(deadline)
    }

    /// Drop the pending transition; returns whether one existed
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn pending(&self) -> Option<&PendingTransition> {
        self.pending.as_ref()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.pending.as_ref().map_or(false, |p| now >= p.deadline)
    }

    /// Remove and return the pending transition once its deadline passed
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Option<PendingTransition> {
        if self.is_due(now) {
            self.pending.take()
        } else {
            None
        }
    }
}
