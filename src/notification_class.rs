// src/notification_class.rs - Notification class routing
//
// Resolves a committed transition to priority, acknowledgment and the
// recipients that want it, then hands one delivery per recipient to the
// transport. Failures are counted per recipient and never undo the
// commit.

use crate::error::DispatchError;
use crate::notification::{Delivery, EventNotification};
use crate::state_machine::Transition;
use crate::transport::NotificationTransport;
use crate::types::{
    EventState, EventTransitionBits, EventType, NotifyType, ObjectId, Recipient, TransitionKind,
};
use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Offset, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[cfg(feature = "metrics")]
use metrics::counter;

// ==========================================
// SECTION 1: RECIPIENTS
// ==========================================

fn all_days() -> [bool; 7] {
    [true; 7]
}

fn start_of_day() -> NaiveTime {
    NaiveTime::default()
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or_default()
}

/// Entry of a notification class recipient list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub recipient: Recipient,

    pub process_identifier: u32,

    #[serde(default)]
    pub issue_confirmed_notifications: bool,

    /// Monday first
    #[serde(default = "all_days")]
    pub valid_days: [bool; 7],

    #[serde(default = "start_of_day")]
    pub from_time: NaiveTime,

    #[serde(default = "end_of_day")]
    pub to_time: NaiveTime,

    /// Transition kinds this recipient wants
    #[serde(default)]
    pub transitions: EventTransitionBits,
}

impl Destination {
    /// Recipient reachable at all times for every transition kind
    pub fn new(recipient: Recipient, process_identifier: u32) -> Self {
        Self {
            recipient,
            process_identifier,
            issue_confirmed_notifications: false,
            valid_days: all_days(),
            from_time: start_of_day(),
            to_time: end_of_day(),
            transitions: EventTransitionBits::ALL,
        }
    }

    pub fn confirmed(mut self) -> Self {
        self.issue_confirmed_notifications = true;
        self
    }

    pub fn with_window(mut self, valid_days: [bool; 7], from_time: NaiveTime, to_time: NaiveTime) -> Self {
        self.valid_days = valid_days;
        self.from_time = from_time;
        self.to_time = to_time;
        self
    }

    pub fn with_transitions(mut self, transitions: EventTransitionBits) -> Self {
        self.transitions = transitions;
        self
    }

    /// Whether `at` (device local time) falls inside the delivery window
    pub fn is_active(&self, at: DateTime<FixedOffset>) -> bool {
        let day = at.weekday().num_days_from_monday() as usize;
        let time = at.time();
        self.valid_days[day] && self.from_time <= time && time <= self.to_time
    }
}

/// Priorities, acknowledgment requirements and recipients shared by
/// event-reporting objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationClass {
    pub instance: u32,

    /// Indexed to-offnormal, to-fault, to-normal
    pub priority: [u8; 3],

    #[serde(default = "no_ack")]
    pub ack_required: EventTransitionBits,

    #[serde(default)]
    pub recipient_list: Vec<Destination>,
}

fn no_ack() -> EventTransitionBits {
    EventTransitionBits::NONE
}

impl NotificationClass {
    pub fn new(instance: u32, priority: [u8; 3]) -> Self {
        Self {
            instance,
            priority,
            ack_required: EventTransitionBits::NONE,
            recipient_list: Vec::new(),
        }
    }

    pub fn with_ack_required(mut self, ack_required: EventTransitionBits) -> Self {
        self.ack_required = ack_required;
        self
    }

    pub fn with_recipient(mut self, destination: Destination) -> Self {
        self.recipient_list.push(destination);
        self
    }

    pub fn priority_for(&self, kind: TransitionKind) -> u8 {
        self.priority[kind.index()]
    }
}

// ==========================================
// SECTION 2: ROUTER
// ==========================================

/// Outcome of routing one notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub filtered: usize,
    pub failed: usize,
}

/// Counters across all dispatches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub notifications_sent: u64,
    pub dispatch_failures: u64,
    pub dropped: u64,
}

/// What an acknowledgment notification reports
#[derive(Debug, Clone, PartialEq)]
pub struct Acknowledgment {
    pub object: ObjectId,
    pub notification_class: u32,
    pub kind: TransitionKind,
    pub state: EventState,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub message_text: Option<String>,
}

pub struct NotificationRouter {
    device_instance: u32,
    utc_offset: FixedOffset,
    classes: RwLock<BTreeMap<u32, NotificationClass>>,
    transport: Arc<dyn NotificationTransport>,
    sent: AtomicU64,
    failures: AtomicU64,
    dropped: AtomicU64,
}

impl NotificationRouter {
    pub fn new(device_instance: u32, transport: Arc<dyn NotificationTransport>) -> Self {
        Self {
            device_instance,
            utc_offset: Utc.fix(),
            classes: RwLock::new(BTreeMap::new()),
            transport,
            sent: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Offset of device local time, used for recipient windows
    pub fn set_utc_offset(&mut self, offset: FixedOffset) {
        self.utc_offset = offset;
    }

    pub fn transport(&self) -> &Arc<dyn NotificationTransport> {
        &self.transport
    }

    /// Add or replace a notification class
    pub fn insert_class(&self, class: NotificationClass) -> Option<NotificationClass> {
        debug!(
            "Notification class {} with {} recipients",
            class.instance,
            class.recipient_list.len()
        );
        self.classes.write().insert(class.instance, class)
    }

    pub fn remove_class(&self, instance: u32) -> Option<NotificationClass> {
        self.classes.write().remove(&instance)
    }

    pub fn class(&self, instance: u32) -> Option<NotificationClass> {
        self.classes.read().get(&instance).cloned()
    }

    pub fn has_class(&self, instance: u32) -> bool {
        self.classes.read().contains_key(&instance)
    }

    pub fn class_count(&self) -> usize {
        self.classes.read().len()
    }

    /// Whether the class requires acknowledgment of `kind`; false for an
    /// unknown class
    pub fn ack_required(&self, instance: u32, kind: TransitionKind) -> bool {
        self.classes
            .read()
            .get(&instance)
            .map_or(false, |c| c.ack_required.get(kind))
    }

    /// Priorities of the class; `None` for an unknown class
    pub fn priorities(&self, instance: u32) -> Option<[u8; 3]> {
        self.classes.read().get(&instance).map(|c| c.priority)
    }

    /// Route a committed transition to the recipients of its class
    pub fn dispatch(&self, transition: &Transition) -> DispatchReport {
        if !transition.notify {
            trace!(
                "{} {} transition not enabled for notification",
                transition.object,
                transition.kind
            );
            return DispatchReport::default();
        }

        let template = |priority: u8, ack_required: bool| EventNotification {
            process_identifier: 0,
            initiating_device: self.device_instance,
            event_object: transition.object,
            timestamp: transition.timestamp,
            notification_class: transition.notification_class,
            priority,
            event_type: transition.event_type,
            message_text: transition.message_text.clone(),
            notify_type: transition.notify_type,
            ack_required,
            from_state: transition.from,
            to_state: transition.to,
            event_values: Some(transition.values.clone()),
        };

        self.route(
            transition.object,
            transition.notification_class,
            transition.kind,
            transition.timestamp,
            template,
        )
    }

    /// Tell the recipients of a class that a transition was acknowledged
    pub fn dispatch_ack(&self, ack: &Acknowledgment) -> DispatchReport {
        let template = |priority: u8, _ack_required: bool| EventNotification {
            process_identifier: 0,
            initiating_device: self.device_instance,
            event_object: ack.object,
            timestamp: ack.timestamp,
            notification_class: ack.notification_class,
            priority,
            event_type: ack.event_type,
            message_text: ack.message_text.clone(),
            notify_type: NotifyType::AckNotification,
            ack_required: false,
            from_state: ack.state,
            to_state: ack.state,
            event_values: None,
        };

        self.route(ack.object, ack.notification_class, ack.kind, ack.timestamp, template)
    }

    fn route<F>(
        &self,
        object: ObjectId,
        instance: u32,
        kind: TransitionKind,
        at: DateTime<Utc>,
        template: F,
    ) -> DispatchReport
    where
        F: Fn(u8, bool) -> EventNotification,
    {
        // Clone so no lock is held while the transport runs
        let Some(class) = self.class(instance) else {
            warn!(
                "Notification class {} not found, dropping notification from {}",
                instance, object
            );
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return DispatchReport::default();
        };

        let priority = class.priority_for(kind);
        let ack_required = class.ack_required.get(kind);
        let local = at.with_timezone(&self.utc_offset);

        let mut report = DispatchReport::default();
        for destination in &class.recipient_list {
            if !destination.transitions.get(kind) || !destination.is_active(local) {
                report.filtered += 1;
                continue;
            }

            let mut notification = template(priority, ack_required);
            notification.process_identifier = destination.process_identifier;
            let delivery = Delivery::Event {
                recipient: destination.recipient.clone(),
                confirmed: destination.issue_confirmed_notifications,
                notification,
            };

            match self.transport.deliver(delivery) {
                Ok(()) => {
                    report.delivered += 1;
                    self.sent.fetch_add(1, Ordering::Relaxed);
                    #[cfg(feature = "metrics")]
                    counter!("bacnet_event_notifications_total").increment(1);
                }
                Err(e) => {
                    report.failed += 1;
                    self.record_failure(&destination.recipient, &e);
                }
            }
        }

        debug!(
            "{} {} routed via class {}: {} delivered, {} filtered, {} failed",
            object, kind, instance, report.delivered, report.filtered, report.failed
        );
        report
    }

    /// Count a delivery failure for `recipient`
    pub fn record_failure(&self, recipient: &Recipient, error: &DispatchError) {
        warn!("Delivery to {} failed: {}", recipient, error);
        self.failures.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        counter!("bacnet_dispatch_failures_total").increment(1);
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            notifications_sent: self.sent.load(Ordering::Relaxed),
            dispatch_failures: self.failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
