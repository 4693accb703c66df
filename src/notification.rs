// src/notification.rs - Outgoing notification payloads
use crate::algorithms::EventValues;
use crate::types::{EventState, EventType, NotifyType, ObjectId, PropertyId, Recipient};
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// ConfirmedEventNotification / UnconfirmedEventNotification parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotification {
    pub process_identifier: u32,
    pub initiating_device: u32,
    pub event_object: ObjectId,
    pub timestamp: DateTime<Utc>,
    pub notification_class: u32,
    pub priority: u8,
    pub event_type: EventType,
    #[serde(default)]
    pub message_text: Option<String>,
    pub notify_type: NotifyType,
    pub ack_required: bool,
    pub from_state: EventState,
    pub to_state: EventState,
    /// Absent for acknowledgment notifications
    #[serde(default)]
    pub event_values: Option<EventValues>,
}

/// One property in a COV notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub property: PropertyId,
    pub value: Value,
}

impl PropertyValue {
    pub fn new(property: PropertyId, value: Value) -> Self {
        Self { property, value }
    }
}

/// ConfirmedCOVNotification / UnconfirmedCOVNotification parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovNotification {
    pub subscriber_process_identifier: u32,
    pub initiating_device: u32,
    pub monitored_object: ObjectId,
    /// Whole seconds of subscription lifetime left, 0 for indefinite
    pub time_remaining: u64,
    pub values: Vec<PropertyValue>,
}

impl CovNotification {
    pub fn value(&self, property: PropertyId) -> Option<&Value> {
        self.values
            .iter()
            .find(|v| v.property == property)
            .map(|v| &v.value)
    }
}

/// A notification addressed to one recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "service", rename_all = "kebab-case")]
pub enum Delivery {
    Event {
        recipient: Recipient,
        confirmed: bool,
        notification: EventNotification,
    },
    Cov {
        recipient: Recipient,
        confirmed: bool,
        notification: CovNotification,
    },
}

impl Delivery {
    pub fn recipient(&self) -> &Recipient {
        match self {
            Delivery::Event { recipient, .. } | Delivery::Cov { recipient, .. } => recipient,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        match self {
            Delivery::Event { confirmed, .. } | Delivery::Cov { confirmed, .. } => *confirmed,
        }
    }

    pub fn as_event(&self) -> Option<&EventNotification> {
        match self {
            Delivery::Event { notification, .. } => Some(notification),
            Delivery::Cov { .. } => None,
        }
    }

    pub fn as_cov(&self) -> Option<&CovNotification> {
        match self {
            Delivery::Cov { notification, .. } => Some(notification),
            Delivery::Event { .. } => None,
        }
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_confirmed() { "confirmed" } else { "unconfirmed" };
        match self {
            Delivery::Event { recipient, notification, .. } => write!(
                f,
                "{} event notification {} {} -> {} to {}",
                kind,
                notification.event_object,
                notification.from_state,
                notification.to_state,
                recipient
            ),
            Delivery::Cov { recipient, notification, .. } => write!(
                f,
                "{} COV notification {} to {}",
                kind, notification.monitored_object, recipient
            ),
        }
    }
}
