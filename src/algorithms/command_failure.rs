// src/algorithms/command_failure.rs - COMMAND_FAILURE
use super::{same_state, Evaluation, EventValues, MonitoredSnapshot};
use crate::types::{DeviceObjectPropertyReference, EventState};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Offnormal while the feedback disagrees with the commanded value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandFailure {
    /// Feedback to sample for event enrollments; intrinsic reporting uses
    /// the object's feedback value
    #[serde(default)]
    pub feedback_reference: Option<DeviceObjectPropertyReference>,
}

impl CommandFailure {
    pub fn evaluate(&self, snapshot: &MonitoredSnapshot) -> Evaluation {
        let feedback = snapshot.feedback.clone().unwrap_or(Value::Null);
        let values = EventValues::CommandFailure {
            command_value: snapshot.value.clone(),
            status_flags: snapshot.status_flags,
            feedback_value: feedback.clone(),
        };

        // No feedback yet means nothing to compare against
        if feedback == Value::Null || agrees(&snapshot.value, &feedback) {
            Evaluation::new(EventState::Normal, values)
        } else {
            Evaluation::new(EventState::Offnormal, values)
        }
    }
}

fn agrees(command: &Value, feedback: &Value) -> bool {
    match (command.as_float(), feedback.as_float()) {
        (Some(c), Some(f)) if matches!(command, Value::Real(_)) => (c - f).abs() < f64::EPSILON,
        _ => same_state(command, feedback),
    }
}
