// src/algorithms/fault.rs - Fault algorithms
use super::{same_state, MonitoredSnapshot};
use crate::error::ConfigError;
use crate::types::Reliability;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Fault detection run ahead of the event algorithm
///
/// The reliability reported by the monitored object always wins; the
/// configured fault algorithm is consulted only while that reliability is
/// `NoFaultDetected`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FaultAlgorithm {
    #[default]
    None,
    FaultState {
        fault_values: Vec<Value>,
    },
    FaultLifeSafety {
        fault_values: Vec<u32>,
        #[serde(default)]
        mode_values: Vec<u32>,
    },
    FaultOutOfRange {
        min_normal_value: f64,
        max_normal_value: f64,
    },
    FaultCharacterString {
        fault_values: Vec<String>,
    },
    FaultStatusFlags,
}

impl FaultAlgorithm {
    pub fn evaluate(&self, snapshot: &MonitoredSnapshot) -> Reliability {
        if snapshot.reliability.is_fault() {
            return snapshot.reliability;
        }

        match self {
            FaultAlgorithm::None => Reliability::NoFaultDetected,
            FaultAlgorithm::FaultState { fault_values } => {
                if fault_values.iter().any(|v| same_state(v, &snapshot.value)) {
                    Reliability::MultiStateFault
                } else {
                    Reliability::NoFaultDetected
                }
            }
            FaultAlgorithm::FaultLifeSafety {
                fault_values,
                mode_values,
            } => {
                let state_faulty = snapshot
                    .value
                    .as_enumerated()
                    .map_or(false, |s| fault_values.contains(&s));
                let mode_applies = mode_values.is_empty()
                    || snapshot.mode.map_or(false, |m| mode_values.contains(&m));
                if state_faulty && mode_applies {
                    Reliability::MultiStateFault
                } else {
                    Reliability::NoFaultDetected
                }
            }
            FaultAlgorithm::FaultOutOfRange {
                min_normal_value,
                max_normal_value,
            } => match snapshot.value.as_float() {
                Some(v) if v < *min_normal_value => Reliability::UnderRange,
                Some(v) if v > *max_normal_value => Reliability::OverRange,
                _ => Reliability::NoFaultDetected,
            },
            FaultAlgorithm::FaultCharacterString { fault_values } => {
                match snapshot.value.as_str() {
                    Some(text) if fault_values.iter().any(|f| f == text) => {
                        Reliability::MultiStateFault
                    }
                    _ => Reliability::NoFaultDetected,
                }
            }
            FaultAlgorithm::FaultStatusFlags => {
                if snapshot.status_flags.fault {
                    Reliability::MemberFault
                } else {
                    Reliability::NoFaultDetected
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            FaultAlgorithm::FaultOutOfRange {
                min_normal_value,
                max_normal_value,
            } if min_normal_value > max_normal_value => Err(ConfigError::InvalidThreshold(format!(
                "minimum normal value {} exceeds maximum {}",
                min_normal_value, max_normal_value
            ))),
            FaultAlgorithm::FaultState { fault_values } if fault_values.is_empty() => {
                Err(ConfigError::MissingParameter {
                    algorithm: "fault-state",
                    parameter: "fault_values",
                })
            }
            FaultAlgorithm::FaultLifeSafety { fault_values, .. } if fault_values.is_empty() => {
                Err(ConfigError::MissingParameter {
                    algorithm: "fault-life-safety",
                    parameter: "fault_values",
                })
            }
            _ => Ok(()),
        }
    }
}
