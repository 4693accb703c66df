// src/algorithms/change_of_state.rs - CHANGE_OF_STATE and CHANGE_OF_BITSTRING
use super::{same_state, Evaluation, EventValues, MonitoredSnapshot};
use crate::error::ConfigError;
use crate::types::EventState;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Offnormal while the monitored value equals one of the alarm values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeOfState {
    pub alarm_values: Vec<Value>,
}

impl ChangeOfState {
    pub fn evaluate(&self, snapshot: &MonitoredSnapshot) -> Evaluation {
        let values = EventValues::ChangeOfState {
            new_state: snapshot.value.clone(),
            status_flags: snapshot.status_flags,
        };

        let in_alarm = self
            .alarm_values
            .iter()
            .any(|alarm| same_state(alarm, &snapshot.value));

        if in_alarm {
            Evaluation::new(EventState::Offnormal, values).triggered_by(snapshot.value.clone())
        } else {
            Evaluation::new(EventState::Normal, values)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alarm_values.is_empty() {
            return Err(ConfigError::MissingParameter {
                algorithm: "change-of-state",
                parameter: "alarm_values",
            });
        }
        Ok(())
    }
}

/// Offnormal while the masked bit string equals one of the alarm values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeOfBitstring {
    pub bitmask: Vec<bool>,
    pub alarm_values: Vec<Vec<bool>>,
}

impl ChangeOfBitstring {
    pub fn evaluate(&self, snapshot: &MonitoredSnapshot) -> Evaluation {
        let bits = snapshot.value.as_bit_string().unwrap_or(&[]);
        let values = EventValues::ChangeOfBitstring {
            referenced_bitstring: bits.to_vec(),
            status_flags: snapshot.status_flags,
        };

        let masked = self.mask(bits);
        let in_alarm = self
            .alarm_values
            .iter()
            .any(|alarm| self.mask(alarm) == masked);

        if in_alarm {
            Evaluation::new(EventState::Offnormal, values)
                .triggered_by(Value::BitString(masked))
        } else {
            Evaluation::new(EventState::Normal, values)
        }
    }

    // Bits beyond either operand count as zero
    fn mask(&self, bits: &[bool]) -> Vec<bool> {
        self.bitmask
            .iter()
            .enumerate()
            .map(|(i, m)| *m && bits.get(i).copied().unwrap_or(false))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bitmask.is_empty() {
            return Err(ConfigError::MissingParameter {
                algorithm: "change-of-bitstring",
                parameter: "bitmask",
            });
        }
        if self.alarm_values.is_empty() {
            return Err(ConfigError::MissingParameter {
                algorithm: "change-of-bitstring",
                parameter: "alarm_values",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_of_state_candidates() {
        let algorithm = ChangeOfState {
            alarm_values: vec![Value::Enumerated(1)],
        };

        let active = algorithm.evaluate(&MonitoredSnapshot::new(Value::Enumerated(1)));
        assert_eq!(active.candidate, EventState::Offnormal);
        assert_eq!(active.trigger, Some(Value::Enumerated(1)));

        let inactive = algorithm.evaluate(&MonitoredSnapshot::new(Value::Enumerated(0)));
        assert_eq!(inactive.candidate, EventState::Normal);
        assert_eq!(inactive.trigger, None);
    }

    #[test]
    fn test_multistate_alarm_values() {
        let algorithm = ChangeOfState {
            alarm_values: vec![Value::Unsigned(2), Value::Unsigned(4)],
        };

        assert_eq!(
            algorithm.evaluate(&MonitoredSnapshot::new(Value::Unsigned(4))).candidate,
            EventState::Offnormal
        );
        assert_eq!(
            algorithm.evaluate(&MonitoredSnapshot::new(Value::Unsigned(3))).candidate,
            EventState::Normal
        );
    }

    #[test]
    fn test_bitstring_mask_ignores_unmasked_bits() {
        let algorithm = ChangeOfBitstring {
            bitmask: vec![true, true, false],
            alarm_values: vec![vec![true, false, false]],
        };

        let snapshot = MonitoredSnapshot::new(Value::BitString(vec![true, false, true]));
        assert_eq!(algorithm.evaluate(&snapshot).candidate, EventState::Offnormal);

        let snapshot = MonitoredSnapshot::new(Value::BitString(vec![true, true, true]));
        assert_eq!(algorithm.evaluate(&snapshot).candidate, EventState::Normal);
    }

    #[test]
    fn test_validation() {
        assert!(ChangeOfState { alarm_values: vec![] }.validate().is_err());
        assert!(ChangeOfBitstring {
            bitmask: vec![true],
            alarm_values: vec![]
        }
        .validate()
        .is_err());
    }
}
