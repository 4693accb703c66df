// src/algorithms/buffer_ready.rs - BUFFER_READY
use super::{Evaluation, EventValues, MonitoredSnapshot};
use crate::buffer::records_between;
use crate::error::ConfigError;
use crate::types::EventState;
use serde::{Deserialize, Serialize};

/// Notify once enough records were added since the last notification
///
/// The monitored value is the log's total record count; the previous
/// count comes from the snapshot. The object never leaves `Normal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferReady {
    pub notification_threshold: u32,
}

impl BufferReady {
    pub fn evaluate(&self, snapshot: &MonitoredSnapshot) -> Evaluation {
        let current = snapshot
            .value
            .as_unsigned()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0);
        let previous = snapshot.previous_count.unwrap_or(0);

        let values = EventValues::BufferReady {
            buffer_property: snapshot.buffer_property,
            previous_notification: previous,
            current_notification: current,
        };

        let mut evaluation = Evaluation::new(EventState::Normal, values);
        if self.notification_threshold > 0
            && records_between(previous, current) >= self.notification_threshold
        {
            evaluation.one_shot = true;
            evaluation.immediate = true;
        }
        evaluation
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notification_threshold == 0 {
            return Err(ConfigError::InvalidThreshold(
                "notification threshold must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
