// src/cov.rs - Change-of-value subscriptions
//
// Subscriptions live in one device-owned table keyed by subscriber,
// process identifier, object and property. The engine only decides who
// gets what; sending happens after the caller drops its locks.

use crate::error::CovError;
use crate::notification::{CovNotification, Delivery, PropertyValue};
use crate::object::BacnetObject;
use crate::types::{ObjectId, ObjectType, PropertyId, Recipient, StatusFlags};
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// SubscribeCOV / SubscribeCOVProperty request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeCov {
    pub subscriber: Recipient,
    pub process_identifier: u32,
    pub monitored_object: ObjectId,

    /// `None` subscribes to the whole object
    #[serde(default)]
    pub monitored_property: Option<PropertyId>,

    #[serde(default)]
    pub issue_confirmed_notifications: bool,

    /// Seconds; absent or zero means indefinite
    #[serde(default)]
    pub lifetime: Option<u32>,

    /// Overrides the object's COV increment for property subscriptions
    #[serde(default)]
    pub cov_increment: Option<f64>,
}

impl SubscribeCov {
    pub fn new(subscriber: Recipient, process_identifier: u32, monitored_object: ObjectId) -> Self {
        Self {
            subscriber,
            process_identifier,
            monitored_object,
            monitored_property: None,
            issue_confirmed_notifications: false,
            lifetime: None,
            cov_increment: None,
        }
    }

    pub fn property(mut self, property: PropertyId) -> Self {
        self.monitored_property = Some(property);
        self
    }

    pub fn confirmed(mut self) -> Self {
        self.issue_confirmed_notifications = true;
        self
    }

    pub fn lifetime(mut self, seconds: u32) -> Self {
        self.lifetime = Some(seconds);
        self
    }

    pub fn increment(mut self, increment: f64) -> Self {
        self.cov_increment = Some(increment);
        self
    }

    fn key(&self) -> SubscriptionKey {
        SubscriptionKey {
            object: self.monitored_object,
            subscriber: self.subscriber.clone(),
            process_identifier: self.process_identifier,
            property: self.monitored_property,
        }
    }
}

/// Identity of a subscription; resubscribing with the same key replaces it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionKey {
    pub object: ObjectId,
    pub subscriber: Recipient,
    pub process_identifier: u32,
    pub property: Option<PropertyId>,
}

#[derive(Debug, Clone, PartialEq)]
struct CovSubscription {
    confirmed: bool,
    increment: Option<f64>,
    expires_at: Option<DateTime<Utc>>,
    /// Value last notified; the increment is measured from here
    last_value: Option<Value>,
    last_status_flags: StatusFlags,
}

impl CovSubscription {
    fn time_remaining(&self, now: DateTime<Utc>) -> u64 {
        self.expires_at
            .map(|at| u64::try_from((at - now).num_seconds()).unwrap_or(0))
            .unwrap_or(0)
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

/// Read-only view of one active subscription
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveCovSubscription {
    #[serde(flatten)]
    pub key: SubscriptionKey,
    pub issue_confirmed_notifications: bool,
    /// Whole seconds left, 0 for indefinite
    pub time_remaining: u64,
    pub cov_increment: Option<f64>,
}

/// Property reported by whole-object subscriptions, `None` when the
/// object type has no COV reporting
pub fn cov_property(object_type: ObjectType) -> Option<PropertyId> {
    match object_type {
        ObjectType::Device
        | ObjectType::NotificationClass
        | ObjectType::EventEnrollment
        | ObjectType::TrendLog
        | ObjectType::EventLog
        | ObjectType::TrendLogMultiple => None,
        _ => Some(PropertyId::PresentValue),
    }
}

/// Subscription table and change detection
#[derive(Debug)]
pub struct CovEngine {
    device_instance: u32,
    subscriptions: BTreeMap<SubscriptionKey, CovSubscription>,
    periodic: BTreeSet<ObjectId>,
}

impl CovEngine {
    pub fn new(device_instance: u32) -> Self {
        Self {
            device_instance,
            subscriptions: BTreeMap::new(),
            periodic: BTreeSet::new(),
        }
    }

    /// Create or replace a subscription
    ///
    /// Returns the initial notification carrying the current values.
    pub fn subscribe(
        &mut self,
        request: &SubscribeCov,
        object: &BacnetObject,
        now: DateTime<Utc>,
    ) -> Result<Delivery, CovError> {
        let id = object.id();
        let primary = cov_property(id.object_type).ok_or(CovError::NotSupported(id))?;
        let monitored = request.monitored_property.unwrap_or(primary);

        if let Some(property) = request.monitored_property {
            if matches!(
                property,
                PropertyId::ObjectIdentifier | PropertyId::ObjectType | PropertyId::ObjectName
            ) {
                return Err(CovError::PropertyNotSupported { object: id, property });
            }
        }
        let value = object
            .get(monitored)
            .cloned()
            .ok_or(CovError::UnknownProperty { object: id, property: monitored })?;

        if request.cov_increment.is_some() {
            let valid = request.monitored_property.is_some()
                && value.is_numeric()
                && request.cov_increment.map_or(false, |i| i.is_finite() && i >= 0.0);
            if !valid {
                return Err(CovError::InvalidIncrement(monitored));
            }
        }

        let expires_at = match request.lifetime {
            Some(seconds) if seconds > 0 => Some(now + chrono::Duration::seconds(i64::from(seconds))),
            _ => None,
        };
        let subscription = CovSubscription {
            confirmed: request.issue_confirmed_notifications,
            increment: request.cov_increment,
            expires_at,
            last_value: Some(value),
            last_status_flags: object.status_flags(),
        };

        let key = request.key();
        let replaced = self.subscriptions.insert(key.clone(), subscription).is_some();
        info!(
            "COV subscription {} {} by {} process {} (lifetime {})",
            if replaced { "renewed on" } else { "created on" },
            id,
            key.subscriber,
            key.process_identifier,
            request
                .lifetime
                .filter(|s| *s > 0)
                .map_or("indefinite".to_string(), |s| format!("{}s", s))
        );

        let notification = self.notify(&key, object, now);
        notification.ok_or(CovError::UnknownProperty { object: id, property: monitored })
    }

    /// Remove a subscription; returns whether it existed
    pub fn unsubscribe(
        &mut self,
        subscriber: &Recipient,
        process_identifier: u32,
        object: ObjectId,
        property: Option<PropertyId>,
    ) -> bool {
        let key = SubscriptionKey {
            object,
            subscriber: subscriber.clone(),
            process_identifier,
            property,
        };
        let removed = self.subscriptions.remove(&key).is_some();
        if removed {
            info!("COV subscription on {} by {} cancelled", object, subscriber);
        }
        removed
    }

    /// Notifications owed after `property` of `object` changed
    pub fn on_property_changed(
        &mut self,
        object: &BacnetObject,
        property: PropertyId,
        now: DateTime<Utc>,
    ) -> Vec<Delivery> {
        let id = object.id();
        let Some(primary) = cov_property(id.object_type) else {
            return Vec::new();
        };
        let flags = object.status_flags();
        let object_increment = object.get(PropertyId::CovIncrement).and_then(Value::as_float);

        let mut due = Vec::new();
        for (key, subscription) in self.range_mut(id) {
            if subscription.is_expired(now) {
                continue;
            }
            let monitored = key.property.unwrap_or(primary);
            let changed = if property == PropertyId::StatusFlags {
                flags != subscription.last_status_flags
            } else if property == monitored {
                let increment = subscription.increment.or(object_increment);
                exceeds(subscription.last_value.as_ref(), object.get(monitored), increment)
            } else {
                false
            };
            if changed {
                due.push(key.clone());
            }
        }

        due.iter()
            .filter_map(|key| self.notify(key, object, now))
            .collect()
    }

    /// Notify every subscriber of `object` and reset their baselines
    pub fn notify_all(&mut self, object: &BacnetObject, now: DateTime<Utc>) -> Vec<Delivery> {
        let keys: Vec<_> = self
            .range_mut(object.id())
            .filter(|(_, s)| !s.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.iter()
            .filter_map(|key| self.notify(key, object, now))
            .collect()
    }

    /// Drop expired subscriptions
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<SubscriptionKey> {
        let expired: Vec<_> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| s.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.subscriptions.remove(key);
            info!(
                "COV subscription on {} by {} process {} expired",
                key.object, key.subscriber, key.process_identifier
            );
        }
        expired
    }

    /// Earliest lifetime end among active subscriptions
    pub fn next_expiry(&self) -> Option<DateTime<Utc>> {
        self.subscriptions.values().filter_map(|s| s.expires_at).min()
    }

    /// Drop every subscription on `object`
    pub fn remove_object(&mut self, object: ObjectId) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|key, _| key.object != object);
        self.periodic.remove(&object);
        before - self.subscriptions.len()
    }

    /// Whether `object` has a subscription that has not lapsed at `now`
    pub fn has_subscribers(&self, object: ObjectId, now: DateTime<Utc>) -> bool {
        self.subscriptions
            .iter()
            .any(|(key, s)| key.object == object && !s.is_expired(now))
    }

    /// Mark periodic notification as scheduled; false if it already was
    pub fn arm_period(&mut self, object: ObjectId) -> bool {
        self.periodic.insert(object)
    }

    pub fn disarm_period(&mut self, object: ObjectId) {
        self.periodic.remove(&object);
    }

    pub fn active_subscriptions(&self, now: DateTime<Utc>) -> Vec<ActiveCovSubscription> {
        self.subscriptions
            .iter()
            .filter(|(_, s)| !s.is_expired(now))
            .map(|(key, s)| ActiveCovSubscription {
                key: key.clone(),
                issue_confirmed_notifications: s.confirmed,
                time_remaining: s.time_remaining(now),
                cov_increment: s.increment,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    fn range_mut(
        &mut self,
        object: ObjectId,
    ) -> impl Iterator<Item = (&SubscriptionKey, &mut CovSubscription)> {
        self.subscriptions
            .iter_mut()
            .filter(move |(key, _)| key.object == object)
    }

    /// Build the notification for `key` and move its baseline
    fn notify(&mut self, key: &SubscriptionKey, object: &BacnetObject, now: DateTime<Utc>) -> Option<Delivery> {
        let primary = cov_property(object.id().object_type)?;
        let subscription = self.subscriptions.get_mut(key)?;
        let monitored = key.property.unwrap_or(primary);
        let value = object.get(monitored).cloned().unwrap_or(Value::Null);
        let flags = object.status_flags();

        subscription.last_value = Some(value.clone());
        subscription.last_status_flags = flags;

        let mut values = vec![PropertyValue::new(monitored, value)];
        if monitored != PropertyId::StatusFlags {
            values.push(PropertyValue::new(PropertyId::StatusFlags, flags.into()));
        }

        debug!("COV notification {} {} to {}", object.id(), monitored, key.subscriber);
        Some(Delivery::Cov {
            recipient: key.subscriber.clone(),
            confirmed: subscription.confirmed,
            notification: CovNotification {
                subscriber_process_identifier: key.process_identifier,
                initiating_device: self.device_instance,
                monitored_object: object.id(),
                time_remaining: subscription.time_remaining(now),
                values,
            },
        })
    }
}

/// Whether `current` moved far enough from `last` to notify
fn exceeds(last: Option<&Value>, current: Option<&Value>, increment: Option<f64>) -> bool {
    match (last, current, increment) {
        (Some(last), Some(current), Some(increment)) if last.is_numeric() && current.is_numeric() => {
            match (last.as_float(), current.as_float()) {
                (Some(a), Some(b)) => (b - a).abs() >= increment && a != b,
                _ => last != current,
            }
        }
        (last, current, _) => last != current,
    }
}
