// src/algorithms/mod.rs - Event and fault algorithms
//
// Every algorithm is a pure function of the current event state and a
// snapshot of the monitored values. Timers, acknowledgment and dispatch
// live in the state machine; nothing in here has side effects.

mod buffer_ready;
mod change_of_state;
mod command_failure;
mod fault;
mod life_safety;
mod out_of_range;

pub use buffer_ready::BufferReady;
pub use change_of_state::{ChangeOfBitstring, ChangeOfState};
pub use command_failure::CommandFailure;
pub use fault::FaultAlgorithm;
pub use life_safety::ChangeOfLifeSafety;
pub use out_of_range::{FloatingLimit, OutOfRange};

use crate::error::ConfigError;
use crate::types::{
    DeviceObjectPropertyReference, EventState, EventType, LimitEnable, ObjectType, PropertyId,
    Reliability, StatusFlags,
};
use crate::value::Value;
use serde::{Deserialize, Serialize};

// ==========================================
// SECTION 1: MONITORED SNAPSHOT
// ==========================================

/// Values an algorithm evaluates against
///
/// Built from the object's own properties for intrinsic reporting, or
/// from sampled references for event enrollments.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredSnapshot {
    /// Monitored value (present value or the referenced property)
    pub value: Value,

    /// Status flags of the monitored object
    pub status_flags: StatusFlags,

    /// Reliability reported by the monitored object itself
    pub reliability: Reliability,

    /// Feedback value for command failure
    pub feedback: Option<Value>,

    /// Setpoint for floating limit
    pub setpoint: Option<f64>,

    /// Life safety mode
    pub mode: Option<u32>,

    /// Life safety operation expected
    pub operation_expected: Option<u32>,

    /// Total record count at the last buffer-ready notification
    pub previous_count: Option<u32>,

    /// Log buffer reported in buffer-ready notifications
    pub buffer_property: Option<DeviceObjectPropertyReference>,
}

impl MonitoredSnapshot {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            status_flags: StatusFlags::default(),
            reliability: Reliability::NoFaultDetected,
            feedback: None,
            setpoint: None,
            mode: None,
            operation_expected: None,
            previous_count: None,
            buffer_property: None,
        }
    }

    /// Snapshot of an object whose monitored value could not be obtained
    pub fn unreliable(reliability: Reliability) -> Self {
        Self {
            reliability,
            ..Self::new(Value::Null)
        }
    }

    pub fn with_status_flags(mut self, status_flags: StatusFlags) -> Self {
        self.status_flags = status_flags;
        self
    }

    pub fn with_reliability(mut self, reliability: Reliability) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn with_feedback(mut self, feedback: Value) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn with_setpoint(mut self, setpoint: f64) -> Self {
        self.setpoint = Some(setpoint);
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Property values reported alongside a change of reliability
    pub fn context_properties(&self) -> Vec<(PropertyId, Value)> {
        let mut properties = vec![(PropertyId::PresentValue, self.value.clone())];
        if let Some(feedback) = &self.feedback {
            properties.push((PropertyId::FeedbackValue, feedback.clone()));
        }
        if let Some(mode) = self.mode {
            properties.push((PropertyId::Mode, Value::Enumerated(mode)));
        }
        if let Some(setpoint) = self.setpoint {
            properties.push((PropertyId::Setpoint, Value::Real(setpoint)));
        }
        properties
    }
}

// ==========================================
// SECTION 2: NOTIFICATION PAYLOAD
// ==========================================

/// Algorithm specific event values carried by a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventValues {
    ChangeOfState {
        new_state: Value,
        status_flags: StatusFlags,
    },
    ChangeOfBitstring {
        referenced_bitstring: Vec<bool>,
        status_flags: StatusFlags,
    },
    OutOfRange {
        exceeding_value: f64,
        status_flags: StatusFlags,
        deadband: f64,
        exceeded_limit: f64,
    },
    FloatingLimit {
        reference_value: f64,
        status_flags: StatusFlags,
        setpoint_value: f64,
        error_limit: f64,
    },
    CommandFailure {
        command_value: Value,
        status_flags: StatusFlags,
        feedback_value: Value,
    },
    ChangeOfLifeSafety {
        new_state: u32,
        new_mode: u32,
        status_flags: StatusFlags,
        operation_expected: u32,
    },
    BufferReady {
        buffer_property: Option<DeviceObjectPropertyReference>,
        previous_notification: u32,
        current_notification: u32,
    },
    ChangeOfReliability {
        reliability: Reliability,
        status_flags: StatusFlags,
        property_values: Vec<(PropertyId, Value)>,
    },
}

impl EventValues {
    pub fn status_flags(&self) -> Option<StatusFlags> {
        match self {
            EventValues::ChangeOfState { status_flags, .. }
            | EventValues::ChangeOfBitstring { status_flags, .. }
            | EventValues::OutOfRange { status_flags, .. }
            | EventValues::FloatingLimit { status_flags, .. }
            | EventValues::CommandFailure { status_flags, .. }
            | EventValues::ChangeOfLifeSafety { status_flags, .. }
            | EventValues::ChangeOfReliability { status_flags, .. } => Some(*status_flags),
            EventValues::BufferReady { .. } => None,
        }
    }

    /// Replace the status flags with those of the committed state
    pub fn set_status_flags(&mut self, flags: StatusFlags) {
        match self {
            EventValues::ChangeOfState { status_flags, .. }
            | EventValues::ChangeOfBitstring { status_flags, .. }
            | EventValues::OutOfRange { status_flags, .. }
            | EventValues::FloatingLimit { status_flags, .. }
            | EventValues::CommandFailure { status_flags, .. }
            | EventValues::ChangeOfLifeSafety { status_flags, .. }
            | EventValues::ChangeOfReliability { status_flags, .. } => *status_flags = flags,
            EventValues::BufferReady { .. } => {}
        }
    }
}

// ==========================================
// SECTION 3: EVALUATION RESULT
// ==========================================

/// Outcome of one algorithm evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Event state the algorithm wants the object to be in
    pub candidate: EventState,

    /// Payload for a notification if the candidate is committed
    pub values: EventValues,

    /// Alarm value responsible for an offnormal candidate; a different
    /// trigger while already offnormal re-notifies
    pub trigger: Option<Value>,

    /// Commit without waiting for the time delay
    pub immediate: bool,

    /// One-shot event that notifies without leaving the current state
    pub one_shot: bool,
}

impl Evaluation {
    pub fn new(candidate: EventState, values: EventValues) -> Self {
        Self {
            candidate,
            values,
            trigger: None,
            immediate: false,
            one_shot: false,
        }
    }

    pub fn triggered_by(mut self, trigger: Value) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn immediately(mut self) -> Self {
        self.immediate = true;
        self
    }
}

// ==========================================
// SECTION 4: ALGORITHM SELECTION
// ==========================================

/// Event algorithm configured for an object or event enrollment
///
/// # Examples
///
/// ```rust
/// use bacnet_events::algorithms::{EventAlgorithm, MonitoredSnapshot, OutOfRange};
/// use bacnet_events::{EventState, LimitEnable, Value};
///
/// let algorithm = EventAlgorithm::OutOfRange(OutOfRange {
///     high_limit: 50.0,
///     low_limit: 30.0,
///     deadband: 5.0,
/// });
///
/// let snapshot = MonitoredSnapshot::new(Value::Real(28.0));
/// let evaluation = algorithm.evaluate(EventState::Normal, &snapshot, LimitEnable::BOTH);
/// assert_eq!(evaluation.candidate, EventState::LowLimit);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventAlgorithm {
    ChangeOfState(ChangeOfState),
    ChangeOfBitstring(ChangeOfBitstring),
    OutOfRange(OutOfRange),
    FloatingLimit(FloatingLimit),
    CommandFailure(CommandFailure),
    ChangeOfLifeSafety(ChangeOfLifeSafety),
    BufferReady(BufferReady),
}

impl EventAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            EventAlgorithm::ChangeOfState(_) => "change-of-state",
            EventAlgorithm::ChangeOfBitstring(_) => "change-of-bitstring",
            EventAlgorithm::OutOfRange(_) => "out-of-range",
            EventAlgorithm::FloatingLimit(_) => "floating-limit",
            EventAlgorithm::CommandFailure(_) => "command-failure",
            EventAlgorithm::ChangeOfLifeSafety(_) => "change-of-life-safety",
            EventAlgorithm::BufferReady(_) => "buffer-ready",
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            EventAlgorithm::ChangeOfState(_) => EventType::ChangeOfState,
            EventAlgorithm::ChangeOfBitstring(_) => EventType::ChangeOfBitstring,
            EventAlgorithm::OutOfRange(_) => EventType::OutOfRange,
            EventAlgorithm::FloatingLimit(_) => EventType::FloatingLimit,
            EventAlgorithm::CommandFailure(_) => EventType::CommandFailure,
            EventAlgorithm::ChangeOfLifeSafety(_) => EventType::ChangeOfLifeSafety,
            EventAlgorithm::BufferReady(_) => EventType::BufferReady,
        }
    }

    /// Compute the candidate state for `snapshot`
    pub fn evaluate(
        &self,
        current: EventState,
        snapshot: &MonitoredSnapshot,
        limit_enable: LimitEnable,
    ) -> Evaluation {
        match self {
            EventAlgorithm::ChangeOfState(a) => a.evaluate(snapshot),
            EventAlgorithm::ChangeOfBitstring(a) => a.evaluate(snapshot),
            EventAlgorithm::OutOfRange(a) => a.evaluate(current, snapshot, limit_enable),
            EventAlgorithm::FloatingLimit(a) => a.evaluate(current, snapshot, limit_enable),
            EventAlgorithm::CommandFailure(a) => a.evaluate(snapshot),
            EventAlgorithm::ChangeOfLifeSafety(a) => a.evaluate(snapshot),
            EventAlgorithm::BufferReady(a) => a.evaluate(snapshot),
        }
    }

    /// Reject threshold combinations that can never evaluate consistently
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            EventAlgorithm::ChangeOfState(a) => a.validate(),
            EventAlgorithm::ChangeOfBitstring(a) => a.validate(),
            EventAlgorithm::OutOfRange(a) => a.validate(),
            EventAlgorithm::FloatingLimit(a) => a.validate(),
            EventAlgorithm::CommandFailure(_) => Ok(()),
            EventAlgorithm::ChangeOfLifeSafety(a) => a.validate(),
            EventAlgorithm::BufferReady(a) => a.validate(),
        }
    }

    /// Whether an object of `object_type` can run this algorithm intrinsically
    pub fn supports(&self, object_type: ObjectType) -> bool {
        use ObjectType::*;
        match self {
            EventAlgorithm::ChangeOfState(_) => matches!(
                object_type,
                BinaryInput
                    | BinaryOutput
                    | BinaryValue
                    | MultiStateInput
                    | MultiStateOutput
                    | MultiStateValue
            ),
            EventAlgorithm::ChangeOfBitstring(_) => object_type == BitStringValue,
            EventAlgorithm::OutOfRange(_) | EventAlgorithm::FloatingLimit(_) => {
                object_type.is_analog()
            }
            EventAlgorithm::CommandFailure(_) => object_type.is_commandable_output(),
            EventAlgorithm::ChangeOfLifeSafety(_) => object_type.is_life_safety(),
            EventAlgorithm::BufferReady(_) => object_type.is_log(),
        }
    }

    /// Additional references an event enrollment must sample
    pub fn auxiliary_references(&self) -> Vec<(PropertyId, DeviceObjectPropertyReference)> {
        match self {
            EventAlgorithm::CommandFailure(a) => a
                .feedback_reference
                .map(|r| vec![(PropertyId::FeedbackValue, r)])
                .unwrap_or_default(),
            EventAlgorithm::FloatingLimit(a) => a
                .setpoint_reference
                .map(|r| vec![(PropertyId::Setpoint, r)])
                .unwrap_or_default(),
            EventAlgorithm::ChangeOfLifeSafety(a) => a
                .mode_reference
                .map(|r| vec![(PropertyId::Mode, r)])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Algorithm parameters exposed as object properties
    pub fn properties(&self) -> Vec<(PropertyId, Value)> {
        match self {
            EventAlgorithm::ChangeOfState(a) => {
                vec![(PropertyId::AlarmValues, Value::List(a.alarm_values.clone()))]
            }
            EventAlgorithm::ChangeOfBitstring(a) => vec![
                (PropertyId::BitMask, Value::BitString(a.bitmask.clone())),
                (
                    PropertyId::AlarmValues,
                    Value::List(a.alarm_values.iter().cloned().map(Value::BitString).collect()),
                ),
            ],
            EventAlgorithm::OutOfRange(a) => vec![
                (PropertyId::HighLimit, Value::Real(a.high_limit)),
                (PropertyId::LowLimit, Value::Real(a.low_limit)),
                (PropertyId::Deadband, Value::Real(a.deadband)),
            ],
            EventAlgorithm::FloatingLimit(a) => vec![
                (PropertyId::HighLimit, Value::Real(a.high_diff_limit)),
                (PropertyId::LowLimit, Value::Real(a.low_diff_limit)),
                (PropertyId::Deadband, Value::Real(a.deadband)),
            ],
            EventAlgorithm::CommandFailure(_) => Vec::new(),
            EventAlgorithm::ChangeOfLifeSafety(a) => vec![
                (PropertyId::AlarmValues, enumerated_list(&a.alarm_values)),
                (
                    PropertyId::LifeSafetyAlarmValues,
                    enumerated_list(&a.life_safety_alarm_values),
                ),
            ],
            EventAlgorithm::BufferReady(a) => vec![(
                PropertyId::NotificationThreshold,
                Value::Unsigned(u64::from(a.notification_threshold)),
            )],
        }
    }

    /// Apply a write to one of the algorithm's parameter properties
    ///
    /// Returns `Ok(false)` when the property is not a parameter of this
    /// algorithm. The updated parameters are validated before they are
    /// kept.
    pub fn apply_property(&mut self, property: PropertyId, value: &Value) -> Result<bool, ConfigError> {
        let mut updated = self.clone();
        let handled = match (&mut updated, property) {
            (EventAlgorithm::OutOfRange(a), PropertyId::HighLimit) => {
                a.high_limit = real(property, value)?;
                true
            }
            (EventAlgorithm::OutOfRange(a), PropertyId::LowLimit) => {
                a.low_limit = real(property, value)?;
                true
            }
            (EventAlgorithm::OutOfRange(a), PropertyId::Deadband) => {
                a.deadband = real(property, value)?;
                true
            }
            (EventAlgorithm::FloatingLimit(a), PropertyId::HighLimit) => {
                a.high_diff_limit = real(property, value)?;
                true
            }
            (EventAlgorithm::FloatingLimit(a), PropertyId::LowLimit) => {
                a.low_diff_limit = real(property, value)?;
                true
            }
            (EventAlgorithm::FloatingLimit(a), PropertyId::Deadband) => {
                a.deadband = real(property, value)?;
                true
            }
            (EventAlgorithm::ChangeOfState(a), PropertyId::AlarmValues) => {
                a.alarm_values = list(property, value)?.to_vec();
                true
            }
            (EventAlgorithm::ChangeOfBitstring(a), PropertyId::BitMask) => {
                a.bitmask = bits(property, value)?.to_vec();
                true
            }
            (EventAlgorithm::ChangeOfBitstring(a), PropertyId::AlarmValues) => {
                a.alarm_values = list(property, value)?
                    .iter()
                    .map(|item| bits(property, item).map(|b| b.to_vec()))
                    .collect::<Result<_, _>>()?;
                true
            }
            (EventAlgorithm::ChangeOfLifeSafety(a), PropertyId::AlarmValues) => {
                a.alarm_values = enumerations(property, value)?;
                true
            }
            (EventAlgorithm::ChangeOfLifeSafety(a), PropertyId::LifeSafetyAlarmValues) => {
                a.life_safety_alarm_values = enumerations(property, value)?;
                true
            }
            (EventAlgorithm::BufferReady(a), PropertyId::NotificationThreshold) => {
                let threshold = value
                    .as_unsigned()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| invalid(property, value, "expected unsigned"))?;
                a.notification_threshold = threshold;
                true
            }
            _ => false,
        };

        if handled {
            updated.validate()?;
            *self = updated;
        }
        Ok(handled)
    }
}

/// Equality of state-like values across the datatypes a binary or
/// multi-state value may be written with
pub(crate) fn same_state(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Boolean(_), _) | (_, Value::Boolean(_)) => {
            a.as_bool().is_some() && a.as_bool() == b.as_bool()
        }
        (Value::Real(_), _) | (_, Value::Real(_)) => false,
        _ => a.as_unsigned().is_some() && a.as_unsigned() == b.as_unsigned(),
    }
}

fn enumerated_list(values: &[u32]) -> Value {
    Value::List(values.iter().map(|v| Value::Enumerated(*v)).collect())
}

fn invalid(property: PropertyId, value: &Value, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        property,
        reason: format!("{} (got {})", reason, value.type_name()),
    }
}

fn real(property: PropertyId, value: &Value) -> Result<f64, ConfigError> {
    value
        .as_float()
        .ok_or_else(|| invalid(property, value, "expected a number"))
}

fn list(property: PropertyId, value: &Value) -> Result<&[Value], ConfigError> {
    value
        .as_list()
        .ok_or_else(|| invalid(property, value, "expected a list"))
}

fn bits(property: PropertyId, value: &Value) -> Result<&[bool], ConfigError> {
    value
        .as_bit_string()
        .ok_or_else(|| invalid(property, value, "expected a bit string"))
}

fn enumerations(property: PropertyId, value: &Value) -> Result<Vec<u32>, ConfigError> {
    list(property, value)?
        .iter()
        .map(|item| {
            item.as_enumerated()
                .ok_or_else(|| invalid(property, item, "expected enumerated values"))
        })
        .collect()
}
