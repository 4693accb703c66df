// src/state_machine.rs - Event state machine
//
// One machine per reporting object (intrinsic) or event enrollment
// (algorithmic). Each evaluation runs fault detection first, then the
// event algorithm, then the time delay, and finally commits. A commit
// only mutates memory; dispatching the resulting transitions is left to
// the caller once the object lock is released.

use crate::algorithms::{EventAlgorithm, EventValues, FaultAlgorithm, MonitoredSnapshot};
use crate::debounce::{Armed, DebounceTimer};
use crate::error::{AckError, ConfigError};
use crate::types::{
    EventMessageTexts, EventState, EventTimeStamps, EventTransitionBits, EventType, LimitEnable,
    NotifyType, ObjectId, PropertyId, Reliability, StatusFlags, TransitionKind,
};
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

// ==========================================
// SECTION 1: CONFIGURATION
// ==========================================

fn default_true() -> bool {
    true
}

/// Reporting parameters common to every algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportingParameters {
    /// Seconds a condition must persist before an offnormal commit
    #[serde(default)]
    pub time_delay: u32,

    /// Seconds before a return to normal; `time_delay` when unset
    #[serde(default)]
    pub time_delay_normal: Option<u32>,

    pub notification_class: u32,

    /// Transition kinds that notify
    #[serde(default)]
    pub event_enable: EventTransitionBits,

    #[serde(default)]
    pub limit_enable: LimitEnable,

    #[serde(default)]
    pub notify_type: NotifyType,

    #[serde(default)]
    pub event_message_texts: EventMessageTexts,

    #[serde(default = "default_true")]
    pub event_detection_enable: bool,

    #[serde(default)]
    pub event_algorithm_inhibit: bool,
}

impl ReportingParameters {
    pub fn new(notification_class: u32) -> Self {
        Self {
            time_delay: 0,
            time_delay_normal: None,
            notification_class,
            event_enable: EventTransitionBits::ALL,
            limit_enable: LimitEnable::BOTH,
            notify_type: NotifyType::Alarm,
            event_message_texts: EventMessageTexts::default(),
            event_detection_enable: true,
            event_algorithm_inhibit: false,
        }
    }

    pub fn with_time_delay(mut self, seconds: u32) -> Self {
        self.time_delay = seconds;
        self
    }

    pub fn with_time_delay_normal(mut self, seconds: u32) -> Self {
        self.time_delay_normal = Some(seconds);
        self
    }

    pub fn with_event_enable(mut self, event_enable: EventTransitionBits) -> Self {
        self.event_enable = event_enable;
        self
    }

    pub fn with_limit_enable(mut self, limit_enable: LimitEnable) -> Self {
        self.limit_enable = limit_enable;
        self
    }

    pub fn with_notify_type(mut self, notify_type: NotifyType) -> Self {
        self.notify_type = notify_type;
        self
    }

    /// Time delay applying to a transition into `to`
    ///
    /// Transitions between two offnormal states use `time_delay`.
    pub fn delay_for(&self, to: EventState) -> Duration {
        let seconds = if to == EventState::Normal {
            self.time_delay_normal.unwrap_or(self.time_delay)
        } else {
            self.time_delay
        };
        Duration::from_secs(u64::from(seconds))
    }

    fn apply_property(&mut self, property: PropertyId, value: &Value) -> Result<bool, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            property,
            reason: format!("{} (got {})", reason, value.type_name()),
        };
        let seconds = || {
            value
                .as_unsigned()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| invalid("expected unsigned seconds"))
        };

        match property {
            PropertyId::TimeDelay => self.time_delay = seconds()?,
            PropertyId::TimeDelayNormal => self.time_delay_normal = Some(seconds()?),
            PropertyId::NotificationClass => {
                self.notification_class = value
                    .as_unsigned()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| invalid("expected a notification class instance"))?
            }
            PropertyId::EventEnable => {
                let bits = value
                    .as_bit_string()
                    .filter(|b| b.len() >= 3)
                    .ok_or_else(|| invalid("expected three transition bits"))?;
                self.event_enable = EventTransitionBits([bits[0], bits[1], bits[2]]);
            }
            PropertyId::LimitEnable => {
                let bits = value
                    .as_bit_string()
                    .ok_or_else(|| invalid("expected a bit string"))?;
                self.limit_enable = LimitEnable::from_bits(bits);
            }
            PropertyId::NotifyType => {
                self.notify_type = value
                    .as_enumerated()
                    .and_then(NotifyType::from_code)
                    .filter(|t| *t != NotifyType::AckNotification)
                    .ok_or_else(|| invalid("expected alarm or event"))?
            }
            PropertyId::EventDetectionEnable => {
                self.event_detection_enable =
                    value.as_bool().ok_or_else(|| invalid("expected a boolean"))?
            }
            PropertyId::EventAlgorithmInhibit => {
                self.event_algorithm_inhibit =
                    value.as_bool().ok_or_else(|| invalid("expected a boolean"))?
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn properties(&self) -> Vec<(PropertyId, Value)> {
        vec![
            (PropertyId::TimeDelay, Value::Unsigned(u64::from(self.time_delay))),
            (
                PropertyId::TimeDelayNormal,
                Value::Unsigned(u64::from(self.time_delay_normal.unwrap_or(self.time_delay))),
            ),
            (
                PropertyId::NotificationClass,
                Value::Unsigned(u64::from(self.notification_class)),
            ),
            (PropertyId::EventEnable, self.event_enable.into()),
            (PropertyId::LimitEnable, self.limit_enable.into()),
            (PropertyId::NotifyType, Value::Enumerated(self.notify_type.code())),
            (
                PropertyId::EventDetectionEnable,
                Value::Boolean(self.event_detection_enable),
            ),
            (
                PropertyId::EventAlgorithmInhibit,
                Value::Boolean(self.event_algorithm_inhibit),
            ),
        ]
    }
}

/// Complete alarm configuration of a monitored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmConfig {
    pub algorithm: EventAlgorithm,
    #[serde(default)]
    pub fault: FaultAlgorithm,
    #[serde(flatten)]
    pub reporting: ReportingParameters,
}

impl AlarmConfig {
    pub fn new(algorithm: EventAlgorithm, reporting: ReportingParameters) -> Self {
        Self {
            algorithm,
            fault: FaultAlgorithm::None,
            reporting,
        }
    }

    pub fn with_fault(mut self, fault: FaultAlgorithm) -> Self {
        self.fault = fault;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.algorithm.validate()?;
        self.fault.validate()
    }

    /// Apply a write of a reporting property; `Ok(false)` if unrelated
    pub fn apply_property(&mut self, property: PropertyId, value: &Value) -> Result<bool, ConfigError> {
        if self.reporting.apply_property(property, value)? {
            return Ok(true);
        }
        if property == PropertyId::FaultValues {
            if let FaultAlgorithm::FaultState { fault_values } = &mut self.fault {
                *fault_values = value
                    .as_list()
                    .ok_or_else(|| ConfigError::InvalidValue {
                        property,
                        reason: format!("expected a list (got {})", value.type_name()),
                    })?
                    .to_vec();
                return Ok(true);
            }
        }
        self.algorithm.apply_property(property, value)
    }

    /// Configuration mirrored onto the object's properties
    pub fn properties(&self) -> Vec<(PropertyId, Value)> {
        let mut properties = self.reporting.properties();
        properties.extend(self.algorithm.properties());
        if let FaultAlgorithm::FaultState { fault_values } = &self.fault {
            properties.push((PropertyId::FaultValues, Value::List(fault_values.clone())));
        }
        properties
    }
}

// ==========================================
// SECTION 2: TRANSITIONS
// ==========================================

/// A committed state change, ready to be routed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub object: ObjectId,
    pub from: EventState,
    pub to: EventState,
    pub kind: TransitionKind,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub notify_type: NotifyType,
    pub notification_class: u32,
    pub message_text: Option<String>,
    pub values: EventValues,
    /// Whether `event_enable` lets this transition kind notify
    pub notify: bool,
}

/// Result of one evaluation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
    /// Commits in the order they happened
    pub transitions: Vec<Transition>,
    /// Newly armed time delay the caller has to re-evaluate at
    pub deadline: Option<DateTime<Utc>>,
}

impl Step {
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty() && self.deadline.is_none()
    }
}

// ==========================================
// SECTION 3: STATE MACHINE
// ==========================================

/// Event state of one monitored object
#[derive(Debug, Clone)]
pub struct EventStateMachine {
    object: ObjectId,
    config: AlarmConfig,
    state: EventState,
    reliability: Reliability,
    acked: EventTransitionBits,
    time_stamps: EventTimeStamps,
    timer: DebounceTimer,
    alarm_trigger: Option<Value>,
    last_mode: Option<u32>,
    intrinsic: bool,
}

impl EventStateMachine {
    /// Configure reporting and seed the state from `snapshot`
    ///
    /// Seeding never produces a transition, even when the object is
    /// already in alarm.
    pub fn new(
        object: ObjectId,
        config: AlarmConfig,
        snapshot: &MonitoredSnapshot,
        intrinsic: bool,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut machine = Self {
            object,
            config,
            state: EventState::Normal,
            reliability: Reliability::NoFaultDetected,
            acked: EventTransitionBits::ALL,
            time_stamps: EventTimeStamps::default(),
            timer: DebounceTimer::new(),
            alarm_trigger: None,
            last_mode: None,
            intrinsic,
        };
        machine.seed(snapshot);
        Ok(machine)
    }

    /// Replace the configuration, reseeding without notification
    pub fn reconfigure(&mut self, config: AlarmConfig, snapshot: &MonitoredSnapshot) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        self.seed(snapshot);
        Ok(())
    }

    fn seed(&mut self, snapshot: &MonitoredSnapshot) {
        self.timer.cancel();
        self.last_mode = snapshot.mode;
        self.alarm_trigger = None;

        if !self.config.reporting.event_detection_enable {
            self.state = EventState::Normal;
            self.reliability = Reliability::NoFaultDetected;
            return;
        }

        self.reliability = self.config.fault.evaluate(snapshot);
        self.state = if self.reliability.is_fault() {
            EventState::Fault
        } else {
            let evaluation = self.primary(snapshot);
            if evaluation.candidate.is_offnormal() {
                self.alarm_trigger = evaluation.trigger;
            }
            evaluation.candidate
        };
        debug!("{} reporting seeded in state {}", self.object, self.state);
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn config(&self) -> &AlarmConfig {
        &self.config
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn reliability(&self) -> Reliability {
        self.reliability
    }

    pub fn acked_transitions(&self) -> EventTransitionBits {
        self.acked
    }

    pub fn event_time_stamps(&self) -> EventTimeStamps {
        self.time_stamps
    }

    pub fn pending_deadline(&self) -> Option<DateTime<Utc>> {
        self.timer.pending().map(|p| p.deadline)
    }

    /// Whether the object is the monitored object itself (intrinsic)
    pub fn is_intrinsic(&self) -> bool {
        self.intrinsic
    }

    /// Mark a committed transition as awaiting acknowledgment
    pub fn require_ack(&mut self, kind: TransitionKind) {
        self.acked.set(kind, false);
    }

    /// Run fault detection, the event algorithm and the time delay
    pub fn evaluate(&mut self, snapshot: &MonitoredSnapshot, now: DateTime<Utc>) -> Step {
        let mut step = Step::default();
        if !self.config.reporting.event_detection_enable {
            self.timer.cancel();
            return step;
        }

        let mode_changed = matches!(
            (self.last_mode, snapshot.mode),
            (Some(previous), Some(current)) if previous != current
        );
        if snapshot.mode.is_some() {
            self.last_mode = snapshot.mode;
        }

        // Fault precedence
        let reliability = self.config.fault.evaluate(snapshot);
        if reliability.is_fault() {
            self.timer.cancel();
            if self.state != EventState::Fault || reliability != self.reliability {
                self.reliability = reliability;
                let values = reliability_values(reliability, snapshot);
                let transition = self.commit(
                    EventState::Fault,
                    values,
                    EventType::ChangeOfReliability,
                    None,
                    snapshot.status_flags,
                    now,
                );
                step.transitions.push(transition);
            }
            return step;
        }

        if self.state == EventState::Fault {
            self.timer.cancel();
            self.reliability = Reliability::NoFaultDetected;
            let values = reliability_values(Reliability::NoFaultDetected, snapshot);
            let transition = self.commit(
                EventState::Normal,
                values,
                EventType::ChangeOfReliability,
                None,
                snapshot.status_flags,
                now,
            );
            step.transitions.push(transition);

            // The event algorithm applies again at once
            let evaluation = self.primary(snapshot);
            if evaluation.candidate != EventState::Normal {
                let transition = self.commit(
                    evaluation.candidate,
                    evaluation.values,
                    self.config.algorithm.event_type(),
                    evaluation.trigger,
                    snapshot.status_flags,
                    now,
                );
                step.transitions.push(transition);
            }
            return step;
        }

        let evaluation = self.primary(snapshot);
        let event_type = self.config.algorithm.event_type();

        if mode_changed && matches!(self.config.algorithm, EventAlgorithm::ChangeOfLifeSafety(_)) {
            debug!("{} mode changed, committing {} immediately", self.object, evaluation.candidate);
            self.timer.cancel();
            let transition = self.commit(
                evaluation.candidate,
                evaluation.values,
                event_type,
                evaluation.trigger,
                snapshot.status_flags,
                now,
            );
            step.transitions.push(transition);
            return step;
        }

        if evaluation.one_shot {
            self.timer.cancel();
            let transition = self.commit(
                self.state,
                evaluation.values,
                event_type,
                None,
                snapshot.status_flags,
                now,
            );
            step.transitions.push(transition);
            return step;
        }

        let retrigger = evaluation.candidate == self.state
            && self.state.is_offnormal()
            && evaluation.trigger.is_some()
            && evaluation.trigger != self.alarm_trigger;

        if evaluation.candidate == self.state && !retrigger {
            if self.timer.cancel() {
                debug!("{} pending transition cancelled", self.object);
            }
            return step;
        }

        let delay = self.config.reporting.delay_for(evaluation.candidate);
        if evaluation.immediate || delay.is_zero() {
            self.timer.cancel();
            let transition = self.commit(
                evaluation.candidate,
                evaluation.values,
                event_type,
                evaluation.trigger,
                snapshot.status_flags,
                now,
            );
            step.transitions.push(transition);
            return step;
        }

        let armed = self
            .timer
            .arm(evaluation.candidate, evaluation.trigger.clone(), now, delay);
        if self.timer.take_due(now).is_some() {
            let transition = self.commit(
                evaluation.candidate,
                evaluation.values,
                event_type,
                evaluation.trigger,
                snapshot.status_flags,
                now,
            );
            step.transitions.push(transition);
        } else if let Armed::New(deadline) = armed {
            step.deadline = Some(deadline);
        }
        step
    }

    /// Apply a write to a reporting property
    ///
    /// Returns `Ok(false)` when the property does not belong to the alarm
    /// configuration. Toggling event detection reseeds silently; any other
    /// change is picked up by the next evaluation.
    pub fn apply_property(
        &mut self,
        property: PropertyId,
        value: &Value,
        snapshot: &MonitoredSnapshot,
    ) -> Result<bool, ConfigError> {
        let was_enabled = self.config.reporting.event_detection_enable;
        if !self.config.apply_property(property, value)? {
            return Ok(false);
        }

        let enabled = self.config.reporting.event_detection_enable;
        if was_enabled != enabled {
            info!(
                "{} event detection {}",
                self.object,
                if enabled { "enabled" } else { "disabled" }
            );
            if !enabled {
                self.acked = EventTransitionBits::ALL;
                self.time_stamps = EventTimeStamps::default();
            }
            self.seed(snapshot);
        }
        Ok(true)
    }

    /// Acknowledge the most recent transition of `kind`
    ///
    /// Returns whether the transition was unacknowledged before.
    pub fn acknowledge(&mut self, kind: TransitionKind, time_stamp: DateTime<Utc>) -> Result<bool, AckError> {
        if self.time_stamps.get(kind) != Some(time_stamp) {
            return Err(AckError::InvalidTimeStamp { object: self.object });
        }
        if self.acked.get(kind) {
            return Ok(false);
        }
        self.acked.set(kind, true);
        info!("{} {} transition acknowledged", self.object, kind);
        Ok(true)
    }

    /// Event state reported for an acknowledgment of `kind`
    pub fn acknowledged_state(&self, kind: TransitionKind) -> EventState {
        match kind {
            TransitionKind::ToNormal => EventState::Normal,
            TransitionKind::ToFault => EventState::Fault,
            TransitionKind::ToOffnormal if self.state.is_offnormal() => self.state,
            TransitionKind::ToOffnormal => EventState::Offnormal,
        }
    }

    /// Status flags derived from the event state
    pub fn status_flags(&self, base: StatusFlags) -> StatusFlags {
        StatusFlags {
            in_alarm: self.state != EventState::Normal,
            fault: base.fault || self.reliability.is_fault(),
            ..base
        }
    }

    fn primary(&self, snapshot: &MonitoredSnapshot) -> crate::algorithms::Evaluation {
        let mut evaluation = self.config.algorithm.evaluate(
            self.state,
            snapshot,
            self.config.reporting.limit_enable,
        );
        if self.config.reporting.event_algorithm_inhibit {
            evaluation.candidate = EventState::Normal;
            evaluation.trigger = None;
            evaluation.one_shot = false;
            evaluation.immediate = true;
        }
        evaluation
    }

    fn commit(
        &mut self,
        to: EventState,
        mut values: EventValues,
        event_type: EventType,
        trigger: Option<Value>,
        base_flags: StatusFlags,
        now: DateTime<Utc>,
    ) -> Transition {
        let from = self.state;
        let kind = TransitionKind::of(to);

        self.state = to;
        self.time_stamps.set(kind, now);
        self.acked.set(kind, true);
        self.alarm_trigger = if to.is_offnormal() { trigger } else { None };

        let flags = if self.intrinsic {
            StatusFlags {
                in_alarm: to != EventState::Normal,
                fault: self.reliability.is_fault(),
                ..base_flags
            }
        } else {
            base_flags
        };
        values.set_status_flags(flags);

        info!("{} event state {} -> {}", self.object, from, to);

        Transition {
            object: self.object,
            from,
            to,
            kind,
            timestamp: now,
            event_type,
            notify_type: self.config.reporting.notify_type,
            notification_class: self.config.reporting.notification_class,
            message_text: self
                .config
                .reporting
                .event_message_texts
                .get(kind)
                .map(str::to_string),
            values,
            notify: self.config.reporting.event_enable.get(kind),
        }
    }
}

fn reliability_values(reliability: Reliability, snapshot: &MonitoredSnapshot) -> EventValues {
    EventValues::ChangeOfReliability {
        reliability,
        status_flags: snapshot.status_flags,
        property_values: snapshot.context_properties(),
    }
}
