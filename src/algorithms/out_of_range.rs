// src/algorithms/out_of_range.rs - OUT_OF_RANGE and FLOATING_LIMIT
use super::{Evaluation, EventValues, MonitoredSnapshot};
use crate::error::ConfigError;
use crate::types::{DeviceObjectPropertyReference, EventState, LimitEnable};
use serde::{Deserialize, Serialize};

/// Fixed high and low limits with a return deadband
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutOfRange {
    pub high_limit: f64,
    pub low_limit: f64,
    #[serde(default)]
    pub deadband: f64,
}

impl OutOfRange {
    pub fn evaluate(
        &self,
        current: EventState,
        snapshot: &MonitoredSnapshot,
        limit_enable: LimitEnable,
    ) -> Evaluation {
        let Some(value) = snapshot.value.as_float() else {
            return unchanged(current, snapshot);
        };

        let outcome = range_candidate(
            current,
            value,
            self.high_limit,
            self.low_limit,
            self.deadband,
            limit_enable,
        );
        let exceeded_limit = match outcome.limit {
            Limit::High => self.high_limit,
            Limit::Low => self.low_limit,
        };

        let values = EventValues::OutOfRange {
            exceeding_value: value,
            status_flags: snapshot.status_flags,
            deadband: self.deadband,
            exceeded_limit,
        };
        outcome.into_evaluation(values)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.high_limit.is_finite() || !self.low_limit.is_finite() {
            return Err(ConfigError::InvalidThreshold("limits must be finite".into()));
        }
        if self.low_limit > self.high_limit {
            return Err(ConfigError::InvalidThreshold(format!(
                "low limit {} exceeds high limit {}",
                self.low_limit, self.high_limit
            )));
        }
        validate_deadband(self.deadband)
    }
}

/// Limits that float relative to a setpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatingLimit {
    /// Setpoint to sample for event enrollments; intrinsic reporting uses
    /// the object's own setpoint
    #[serde(default)]
    pub setpoint_reference: Option<DeviceObjectPropertyReference>,
    pub high_diff_limit: f64,
    pub low_diff_limit: f64,
    #[serde(default)]
    pub deadband: f64,
}

impl FloatingLimit {
    pub fn evaluate(
        &self,
        current: EventState,
        snapshot: &MonitoredSnapshot,
        limit_enable: LimitEnable,
    ) -> Evaluation {
        let (Some(value), Some(setpoint)) = (snapshot.value.as_float(), snapshot.setpoint) else {
            return unchanged(current, snapshot);
        };

        let outcome = range_candidate(
            current,
            value,
            setpoint + self.high_diff_limit,
            setpoint - self.low_diff_limit,
            self.deadband,
            limit_enable,
        );
        let error_limit = match outcome.limit {
            Limit::High => self.high_diff_limit,
            Limit::Low => self.low_diff_limit,
        };

        let values = EventValues::FloatingLimit {
            reference_value: value,
            status_flags: snapshot.status_flags,
            setpoint_value: setpoint,
            error_limit,
        };
        outcome.into_evaluation(values)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.high_diff_limit >= 0.0) || !(self.low_diff_limit >= 0.0) {
            return Err(ConfigError::InvalidThreshold(
                "floating limit differences must be non-negative".into(),
            ));
        }
        validate_deadband(self.deadband)
    }
}

fn validate_deadband(deadband: f64) -> Result<(), ConfigError> {
    if !(deadband >= 0.0) || !deadband.is_finite() {
        return Err(ConfigError::InvalidThreshold(format!(
            "deadband {} must be a non-negative number",
            deadband
        )));
    }
    Ok(())
}

fn unchanged(current: EventState, snapshot: &MonitoredSnapshot) -> Evaluation {
    Evaluation::new(
        current,
        EventValues::OutOfRange {
            exceeding_value: 0.0,
            status_flags: snapshot.status_flags,
            deadband: 0.0,
            exceeded_limit: 0.0,
        },
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Limit {
    High,
    Low,
}

struct RangeOutcome {
    candidate: EventState,
    limit: Limit,
    immediate: bool,
}

impl RangeOutcome {
    fn into_evaluation(self, values: EventValues) -> Evaluation {
        let evaluation = Evaluation::new(self.candidate, values);
        if self.immediate {
            evaluation.immediately()
        } else {
            evaluation
        }
    }
}

// Hysteresis: a limit state is left only once the value is back inside
// the limit by more than the deadband. A limit whose enable bit is cleared
// can't be entered and is left at once.
fn range_candidate(
    current: EventState,
    value: f64,
    high: f64,
    low: f64,
    deadband: f64,
    enable: LimitEnable,
) -> RangeOutcome {
    let outcome = |candidate, limit| RangeOutcome {
        candidate,
        limit,
        immediate: false,
    };

    match current {
        EventState::HighLimit => {
            if !enable.high_limit {
                RangeOutcome {
                    candidate: EventState::Normal,
                    limit: Limit::High,
                    immediate: true,
                }
            } else if enable.low_limit && value < low {
                outcome(EventState::LowLimit, Limit::Low)
            } else if value < high - deadband {
                outcome(EventState::Normal, Limit::High)
            } else {
                outcome(EventState::HighLimit, Limit::High)
            }
        }
        EventState::LowLimit => {
            if !enable.low_limit {
                RangeOutcome {
                    candidate: EventState::Normal,
                    limit: Limit::Low,
                    immediate: true,
                }
            } else if enable.high_limit && value > high {
                outcome(EventState::HighLimit, Limit::High)
            } else if value > low + deadband {
                outcome(EventState::Normal, Limit::Low)
            } else {
                outcome(EventState::LowLimit, Limit::Low)
            }
        }
        _ => {
            if enable.high_limit && value > high {
                outcome(EventState::HighLimit, Limit::High)
            } else if enable.low_limit && value < low {
                outcome(EventState::LowLimit, Limit::Low)
            } else {
                outcome(EventState::Normal, Limit::High)
            }
        }
    }
}
