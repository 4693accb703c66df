// src/algorithms/life_safety.rs - CHANGE_OF_LIFE_SAFETY
use super::{Evaluation, EventValues, MonitoredSnapshot};
use crate::error::ConfigError;
use crate::types::{DeviceObjectPropertyReference, EventState};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Life safety state monitoring
///
/// A value in `life_safety_alarm_values` puts the object in
/// `LifeSafetyAlarm`, a value in `alarm_values` in `Offnormal`. Mode
/// changes are detected by the state machine, which commits them without
/// a time delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeOfLifeSafety {
    #[serde(default)]
    pub alarm_values: Vec<u32>,
    #[serde(default)]
    pub life_safety_alarm_values: Vec<u32>,
    /// Mode to sample for event enrollments
    #[serde(default)]
    pub mode_reference: Option<DeviceObjectPropertyReference>,
}

impl ChangeOfLifeSafety {
    pub fn evaluate(&self, snapshot: &MonitoredSnapshot) -> Evaluation {
        let state = snapshot.value.as_enumerated();
        let values = EventValues::ChangeOfLifeSafety {
            new_state: state.unwrap_or(0),
            new_mode: snapshot.mode.unwrap_or(0),
            status_flags: snapshot.status_flags,
            operation_expected: snapshot.operation_expected.unwrap_or(0),
        };

        match state {
            Some(s) if self.life_safety_alarm_values.contains(&s) => {
                Evaluation::new(EventState::LifeSafetyAlarm, values).triggered_by(Value::Enumerated(s))
            }
            Some(s) if self.alarm_values.contains(&s) => {
                Evaluation::new(EventState::Offnormal, values).triggered_by(Value::Enumerated(s))
            }
            _ => Evaluation::new(EventState::Normal, values),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alarm_values.is_empty() && self.life_safety_alarm_values.is_empty() {
            return Err(ConfigError::MissingParameter {
                algorithm: "change-of-life-safety",
                parameter: "alarm_values",
            });
        }
        Ok(())
    }
}
