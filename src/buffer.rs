// src/buffer.rs - Record counters of log objects
//
// Total_Record_Count is an unsigned 32-bit counter that wraps from
// 0xFFFFFFFF to 1; zero only ever means "no record logged yet".

use crate::types::PropertyId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Records added between two total record counts
///
/// Wraparound safe; the skipped zero is not counted.
///
/// ```rust
/// use bacnet_events::buffer::records_between;
///
/// assert_eq!(records_between(10, 15), 5);
/// assert_eq!(records_between(0xFFFF_FFFD, 3), 5);
/// ```
pub fn records_between(previous: u32, current: u32) -> u32 {
    if current >= previous {
        current - previous
    } else {
        current.wrapping_sub(previous).wrapping_sub(1)
    }
}

/// Buffer-ready bookkeeping for a trend or event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferReadyCounters {
    /// Capacity of the log buffer
    pub buffer_size: u32,

    /// Records currently held, saturating at `buffer_size`
    #[serde(default)]
    pub record_count: u32,

    /// Records ever logged (wraps, skipping zero)
    #[serde(default)]
    pub total_record_count: u32,

    /// Total record count when the last buffer-ready notification was sent
    #[serde(default)]
    pub last_notify_record: u32,

    #[serde(default)]
    pub records_since_notification: u32,
}

impl BufferReadyCounters {
    pub fn new(buffer_size: u32) -> Self {
        Self {
            buffer_size,
            record_count: 0,
            total_record_count: 0,
            last_notify_record: 0,
            records_since_notification: 0,
        }
    }

    /// Account for one appended record and return the new total count
    pub fn append(&mut self) -> u32 {
        self.record_count = self.record_count.saturating_add(1).min(self.buffer_size);
        self.total_record_count = match self.total_record_count.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        self.records_since_notification = self.records_since_notification.saturating_add(1);
        trace!(
            "Log record appended: total {} held {}",
            self.total_record_count,
            self.record_count
        );
        self.total_record_count
    }

    /// Records pending notification
    pub fn pending(&self) -> u32 {
        records_between(self.last_notify_record, self.total_record_count)
    }

    /// A buffer-ready notification covering up to `total` was issued
    pub fn mark_notified(&mut self, total: u32) {
        self.last_notify_record = total;
        self.records_since_notification = records_between(total, self.total_record_count);
    }

    /// Empty the buffer; the total count keeps running
    pub fn clear(&mut self) {
        self.record_count = 0;
    }

    pub fn properties(&self) -> Vec<(PropertyId, Value)> {
        vec![
            (PropertyId::BufferSize, Value::Unsigned(u64::from(self.buffer_size))),
            (PropertyId::RecordCount, Value::Unsigned(u64::from(self.record_count))),
            (
                PropertyId::TotalRecordCount,
                Value::Unsigned(u64::from(self.total_record_count)),
            ),
            (
                PropertyId::LastNotifyRecord,
                Value::Unsigned(u64::from(self.last_notify_record)),
            ),
            (
                PropertyId::RecordsSinceNotification,
                Value::Unsigned(u64::from(self.records_since_notification)),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_count_skips_zero() {
        let mut counters = BufferReadyCounters::new(10);
        counters.total_record_count = 0xFFFF_FFFF;
        assert_eq!(counters.append(), 1);
        assert_eq!(counters.append(), 2);
    }

    #[test]
    fn test_record_count_saturates() {
        let mut counters = BufferReadyCounters::new(2);
        for _ in 0..5 {
            counters.append();
        }
        assert_eq!(counters.record_count, 2);
        assert_eq!(counters.total_record_count, 5);
        assert_eq!(counters.records_since_notification, 5);

        counters.clear();
        assert_eq!(counters.record_count, 0);
        assert_eq!(counters.total_record_count, 5);
    }

    #[test]
    fn test_pending_across_wrap() {
        let mut counters = BufferReadyCounters::new(100);
        counters.total_record_count = 0xFFFF_FFFD;
        counters.last_notify_record = 0xFFFF_FFFD;

        for _ in 0..5 {
            counters.append();
        }
        assert_eq!(counters.total_record_count, 3);
        assert_eq!(counters.pending(), 5);

        counters.mark_notified(3);
        assert_eq!(counters.pending(), 0);
        assert_eq!(counters.records_since_notification, 0);
    }

    #[test]
    fn test_records_between() {
        assert_eq!(records_between(7, 7), 0);
        assert_eq!(records_between(0, 1), 1);
        assert_eq!(records_between(0xFFFF_FFFF, 1), 1);
    }
}
