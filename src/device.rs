// src/device.rs - Device facade and scheduler loop
//
// Every entry point follows the same shape: sample anything remote
// without holding a lock, take the object's lock for evaluate and
// commit, release it, then schedule deadlines and dispatch. Dispatch
// never runs under an object lock.

use crate::algorithms::{EventAlgorithm, EventValues, MonitoredSnapshot};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::cov::{ActiveCovSubscription, CovEngine, SubscribeCov};
use crate::enrollment::{AlgorithmicReporting, Enrollment, IntrinsicReporting, Sampler};
use crate::error::{AckError, BacnetError, ConfigError, CovError, PropertyError, Result};
use crate::notification::Delivery;
use crate::notification_class::{Acknowledgment, NotificationClass, NotificationRouter};
use crate::object::{is_read_only, BacnetObject, ObjectDatabase, ObjectSlot};
use crate::scheduler::{Scheduler, Task};
use crate::state_machine::{EventStateMachine, Transition};
use crate::transport::{NoRemoteReader, NotificationTransport, PropertyReader};
use crate::types::{
    EventState, EventTimeStamps, EventTransitionBits, EventType, NotifyType, ObjectId, ObjectType,
    PropertyId, Recipient, TransitionKind,
};
use crate::value::Value;
use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Tick period used when none is configured
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, Serialize)]
pub struct DeviceStats {
    pub running: bool,
    pub ticks: u64,
    pub object_count: usize,
    pub reporting_objects: usize,
    pub cov_subscriptions: usize,
    pub scheduled_tasks: usize,
    pub transitions: u64,
    pub notifications_sent: u64,
    pub cov_notifications: u64,
    pub dispatch_failures: u64,
    pub dropped_notifications: u64,
}

/// Entry of the GetEventInformation view
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventSummary {
    pub object: ObjectId,
    pub event_state: EventState,
    pub acked_transitions: EventTransitionBits,
    pub event_time_stamps: EventTimeStamps,
    pub notify_type: NotifyType,
    pub event_enable: EventTransitionBits,
    pub event_priorities: [u8; 3],
}

/// Work collected under an object lock, carried out after it is released
#[derive(Debug, Default)]
struct Outcome {
    transitions: Vec<Transition>,
    deadline: Option<DateTime<Utc>>,
    cov: Vec<Delivery>,
}

impl Outcome {
    fn arm(&mut self, deadline: Option<DateTime<Utc>>) {
        self.deadline = match (self.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
}

/// A BACnet device hosting event reporting and COV subscriptions
pub struct Device {
    instance: u32,
    name: String,
    objects: ObjectDatabase,
    router: NotificationRouter,
    cov: Mutex<CovEngine>,
    scheduler: Mutex<Scheduler>,
    /// Local object -> event enrollments referencing it
    watchers: DashMap<ObjectId, BTreeSet<ObjectId>>,
    clock: Arc<dyn Clock>,
    reader: Arc<dyn PropertyReader>,
    tick_interval: Duration,
    running: Arc<AtomicBool>,
    ticks: AtomicU64,
    transitions: AtomicU64,
    cov_sent: AtomicU64,
}

impl Device {
    pub fn new(instance: u32, name: impl Into<String>, transport: Arc<dyn NotificationTransport>) -> Self {
        let name = name.into();
        let objects = ObjectDatabase::new();
        let id = ObjectId::new(ObjectType::Device, instance);
        let _ = objects.insert(BacnetObject::new(id, name.clone()));

        info!("Device {} '{}' created", instance, name);
        Self {
            instance,
            name,
            objects,
            router: NotificationRouter::new(instance, transport),
            cov: Mutex::new(CovEngine::new(instance)),
            scheduler: Mutex::new(Scheduler::new()),
            watchers: DashMap::new(),
            clock: Arc::new(SystemClock),
            reader: Arc::new(NoRemoteReader),
            tick_interval: DEFAULT_TICK_INTERVAL,
            running: Arc::new(AtomicBool::new(false)),
            ticks: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
            cov_sent: AtomicU64::new(0),
        }
    }

    /// Build a device from a validated configuration
    pub fn from_config(config: &Config, transport: Arc<dyn NotificationTransport>) -> Result<Self> {
        config.validate()?;

        let device = Self::new(config.device.instance, config.device.name.clone(), transport)
            .with_tick_interval(Duration::from_millis(config.device.tick_interval_ms))
            .with_utc_offset(config.device.utc_offset()?);

        for class in &config.notification_classes {
            device.add_notification_class(class.clone());
        }

        for object in &config.objects {
            let mut bacnet_object = BacnetObject::new(object.id, object.name.clone());
            for (property, value) in &object.properties {
                bacnet_object.set(*property, value.clone());
            }
            device.create_object(bacnet_object)?;
            if let Some(reporting) = &object.reporting {
                device.configure_intrinsic_reporting(object.id, reporting.clone())?;
            }
        }

        for enrollment in &config.event_enrollments {
            let id = ObjectId::new(ObjectType::EventEnrollment, enrollment.instance);
            device.create_object(BacnetObject::new(id, enrollment.name.clone()))?;
            device.configure_algorithmic_reporting(id, enrollment.reporting.clone())?;
        }

        info!(
            "Device {} configured with {} objects and {} notification classes",
            device.instance,
            device.objects.len(),
            device.router.class_count()
        );
        Ok(device)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_property_reader(mut self, reader: Arc<dyn PropertyReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Offset of local time, used for recipient time windows
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.router.set_utc_offset(offset);
        self
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::new(ObjectType::Device, self.instance)
    }

    pub fn objects(&self) -> &ObjectDatabase {
        &self.objects
    }

    pub fn router(&self) -> &NotificationRouter {
        &self.router
    }

    // ==========================================
    // OBJECTS AND PROPERTIES
    // ==========================================

    pub fn create_object(&self, object: BacnetObject) -> std::result::Result<(), PropertyError> {
        let id = object.id();
        self.objects.insert(object)?;
        debug!("Object {} created", id);
        Ok(())
    }

    /// Remove an object with its scheduled work and COV subscriptions
    pub fn delete_object(&self, id: ObjectId) -> std::result::Result<(), PropertyError> {
        if id == self.id() {
            return Err(PropertyError::WriteAccessDenied {
                object: id,
                property: PropertyId::ObjectIdentifier,
            });
        }
        let slot = self.objects.remove(id).ok_or(PropertyError::UnknownObject(id))?;

        let cancelled = self.scheduler.lock().cancel_object(id);
        let subscriptions = self.cov.lock().remove_object(id);
        if let Some(enrollment) = &slot.lock().enrollment {
            self.unwatch(id, enrollment);
        }
        self.watchers.remove(&id);
        if id.object_type == ObjectType::NotificationClass {
            self.router.remove_class(id.instance);
        }

        info!(
            "Object {} deleted ({} tasks, {} COV subscriptions dropped)",
            id, cancelled, subscriptions
        );
        Ok(())
    }

    pub fn read_property(&self, id: ObjectId, property: PropertyId) -> std::result::Result<Value, PropertyError> {
        self.objects.read_property(id, property)
    }

    /// Write a property and run everything that depends on it
    ///
    /// Reporting parameters update the live alarm configuration. The
    /// object's event state is re-evaluated, status flags are recomputed
    /// and COV subscribers are checked before the object lock is released;
    /// notifications go out afterwards. Event enrollments referencing the
    /// object are evaluated out of cycle.
    pub fn write_property(
        &self,
        id: ObjectId,
        property: PropertyId,
        value: Value,
    ) -> std::result::Result<(), PropertyError> {
        if is_read_only(property) {
            return Err(PropertyError::WriteAccessDenied { object: id, property });
        }
        let slot = self.objects.slot(id).ok_or(PropertyError::UnknownObject(id))?;
        if id.object_type == ObjectType::NotificationClass {
            self.apply_class_property(id.instance, property, &value)?;
        }

        let now = self.clock.now();
        let sampled = self.enrollment_snapshot(&slot);
        let (outcome, period) = {
            let mut guard = slot.lock();
            let slot = &mut *guard;

            let handled = match slot.reporting.as_mut() {
                Some(machine) => {
                    let snapshot = sampled.clone().unwrap_or_else(|| slot.object.snapshot());
                    machine
                        .apply_property(property, &value, &snapshot)
                        .map_err(|e| PropertyError::InvalidValue {
                            property,
                            reason: e.to_string(),
                        })?
                }
                None => false,
            };

            let previous = if handled {
                let previous = slot.object.get(property).cloned();
                slot.sync_reporting_properties();
                previous
            } else {
                if !slot.object.has(property) {
                    return Err(PropertyError::UnknownProperty { object: id, property });
                }
                slot.object.set(property, value.clone())
            };
            debug!("{} {} written: {}", id, property, value);

            let mut outcome = Outcome::default();
            self.evaluate_slot(slot, sampled, now, &mut outcome);
            self.settle(slot, now, &mut outcome);
            if previous.as_ref() != Some(&value) {
                outcome
                    .cov
                    .extend(self.cov.lock().on_property_changed(&slot.object, property, now));
            }
            let period = (property == PropertyId::CovPeriod).then(|| cov_period(&slot.object));
            (outcome, period)
        };

        if let Some(period) = period {
            self.rearm_cov_period(id, period, now);
        }
        self.finish(id, outcome);
        self.notify_watchers(id, now);
        Ok(())
    }

    /// Append one record to a log object's buffer
    ///
    /// Returns the new total record count.
    pub fn append_log_record(&self, id: ObjectId) -> std::result::Result<u32, PropertyError> {
        let slot = self.objects.slot(id).ok_or(PropertyError::UnknownObject(id))?;
        let now = self.clock.now();

        let (total, outcome) = {
            let mut guard = slot.lock();
            let slot = &mut *guard;
            let counters = slot.buffer.as_mut().ok_or(PropertyError::UnknownProperty {
                object: id,
                property: PropertyId::LogBuffer,
            })?;
            let total = counters.append();
            slot.sync_buffer_properties();

            let mut outcome = Outcome::default();
            self.evaluate_slot(slot, None, now, &mut outcome);
            self.settle(slot, now, &mut outcome);
            (total, outcome)
        };

        self.finish(id, outcome);
        self.notify_watchers(id, now);
        Ok(total)
    }

    // ==========================================
    // EVENT REPORTING
    // ==========================================

    /// Register a notification class and its object
    pub fn add_notification_class(&self, class: NotificationClass) {
        let id = ObjectId::new(ObjectType::NotificationClass, class.instance);
        if !self.objects.contains(id) {
            let object = BacnetObject::new(id, format!("notification-class-{}", class.instance))
                .with_property(PropertyId::NotificationClass, Value::from(class.instance))
                .with_property(PropertyId::Priority, priority_value(class.priority))
                .with_property(PropertyId::AckRequired, class.ack_required.into());
            let _ = self.objects.insert(object);
        }
        self.router.insert_class(class);
    }

    /// Attach intrinsic reporting to an object
    ///
    /// The state is seeded from the object's current values without a
    /// notification, even when the object is already in alarm.
    pub fn configure_intrinsic_reporting(
        &self,
        object: ObjectId,
        reporting: IntrinsicReporting,
    ) -> std::result::Result<(), ConfigError> {
        let slot = self.objects.slot(object).ok_or(ConfigError::ObjectNotFound(object))?;
        if !reporting.algorithm.supports(object.object_type) {
            return Err(ConfigError::UnsupportedAlgorithm {
                algorithm: reporting.algorithm.name(),
                object,
            });
        }
        let config = reporting.alarm_config();
        let notification_class = config.reporting.notification_class;
        let now = self.clock.now();

        let outcome = {
            let mut guard = slot.lock();
            let slot = &mut *guard;
            let snapshot = slot.object.snapshot();
            match slot.reporting.as_mut() {
                Some(machine) => machine.reconfigure(config, &snapshot)?,
                None => {
                    slot.reporting = Some(EventStateMachine::new(object, config, &snapshot, true)?)
                }
            }
            slot.sync_reporting_properties();

            let mut outcome = Outcome::default();
            self.settle(slot, now, &mut outcome);
            info!(
                "{} intrinsic {} reporting configured in state {}",
                object,
                reporting.algorithm.name(),
                slot.reporting.as_ref().map_or(EventState::Normal, |m| m.state())
            );
            outcome
        };

        if !self.router.has_class(notification_class) {
            warn!("{} reports to unknown notification class {}", object, notification_class);
        }
        self.finish(object, outcome);
        Ok(())
    }

    /// Attach algorithmic reporting to an event enrollment object
    pub fn configure_algorithmic_reporting(
        &self,
        enrollment: ObjectId,
        reporting: AlgorithmicReporting,
    ) -> std::result::Result<(), ConfigError> {
        if enrollment.object_type != ObjectType::EventEnrollment {
            return Err(ConfigError::UnsupportedAlgorithm {
                algorithm: reporting.algorithm.name(),
                object: enrollment,
            });
        }
        reporting.validate()?;
        let slot = self
            .objects
            .slot(enrollment)
            .ok_or(ConfigError::ObjectNotFound(enrollment))?;

        let mut binding = Enrollment::new(&reporting);
        let mut snapshot = self.sampler().snapshot(&binding);
        if matches!(reporting.algorithm, EventAlgorithm::BufferReady(_)) {
            binding.previous_count = snapshot
                .value
                .as_unsigned()
                .and_then(|v| u32::try_from(v).ok());
            snapshot.previous_count = binding.previous_count;
        }
        let machine = EventStateMachine::new(enrollment, reporting.alarm_config(), &snapshot, false)?;
        let poll_interval = binding.poll_interval;
        let watched = binding.watched_objects(self.instance);
        let now = self.clock.now();

        let outcome = {
            let mut guard = slot.lock();
            let slot = &mut *guard;
            if let Some(previous) = &slot.enrollment {
                self.unwatch(enrollment, previous);
            }
            slot.object
                .set(PropertyId::ObjectPropertyReference, Value::Reference(reporting.reference));
            slot.reporting = Some(machine);
            slot.enrollment = Some(binding);
            slot.sync_reporting_properties();

            let mut outcome = Outcome::default();
            self.settle(slot, now, &mut outcome);
            outcome
        };

        for object in watched {
            self.watchers.entry(object).or_default().insert(enrollment);
        }
        {
            let mut scheduler = self.scheduler.lock();
            scheduler.cancel_object(enrollment);
            scheduler.schedule(now + to_chrono(poll_interval), Task::Poll(enrollment));
        }

        info!(
            "{} monitoring {} with {} every {:?}",
            enrollment,
            reporting.reference,
            reporting.algorithm.name(),
            poll_interval
        );
        self.finish(enrollment, outcome);
        Ok(())
    }

    /// Event state of an object; `Normal` when it does not report
    pub fn current_event_state(&self, object: ObjectId) -> Option<EventState> {
        let slot = self.objects.slot(object)?;
        let slot = slot.lock();
        Some(slot.reporting.as_ref().map_or(EventState::Normal, |m| m.state()))
    }

    pub fn event_time_stamps(&self, object: ObjectId) -> Option<EventTimeStamps> {
        let slot = self.objects.slot(object)?;
        let slot = slot.lock();
        slot.reporting.as_ref().map(|m| m.event_time_stamps())
    }

    pub fn acked_transitions(&self, object: ObjectId) -> Option<EventTransitionBits> {
        let slot = self.objects.slot(object)?;
        let slot = slot.lock();
        slot.reporting.as_ref().map(|m| m.acked_transitions())
    }

    /// Acknowledge the transition of `kind` committed at `time_stamp`
    ///
    /// A first acknowledgment is announced to the class recipients; a
    /// repeated one succeeds silently.
    pub fn acknowledge_alarm(
        &self,
        object: ObjectId,
        kind: TransitionKind,
        time_stamp: DateTime<Utc>,
    ) -> std::result::Result<(), AckError> {
        let slot = self.objects.slot(object).ok_or(AckError::UnknownObject(object))?;
        let acknowledgment = {
            let mut guard = slot.lock();
            let slot = &mut *guard;
            let machine = slot.reporting.as_mut().ok_or(AckError::NotReporting(object))?;
            if !machine.acknowledge(kind, time_stamp)? {
                return Ok(());
            }
            let event_type = match kind {
                TransitionKind::ToFault => EventType::ChangeOfReliability,
                _ => machine.config().algorithm.event_type(),
            };
            let acknowledgment = Acknowledgment {
                object,
                notification_class: machine.config().reporting.notification_class,
                kind,
                state: machine.acknowledged_state(kind),
                event_type,
                timestamp: self.clock.now(),
                message_text: None,
            };
            slot.sync_reporting_properties();
            acknowledgment
        };

        self.router.dispatch_ack(&acknowledgment);
        Ok(())
    }

    /// Objects not in `Normal` or with unacknowledged transitions
    pub fn event_information(&self) -> Vec<EventSummary> {
        self.objects
            .ids()
            .into_iter()
            .filter_map(|id| {
                let slot = self.objects.slot(id)?;
                let slot = slot.lock();
                let machine = slot.reporting.as_ref()?;
                let acked = machine.acked_transitions();
                if machine.state() == EventState::Normal && acked.is_all() {
                    return None;
                }
                let reporting = &machine.config().reporting;
                Some(EventSummary {
                    object: id,
                    event_state: machine.state(),
                    acked_transitions: acked,
                    event_time_stamps: machine.event_time_stamps(),
                    notify_type: reporting.notify_type,
                    event_enable: reporting.event_enable,
                    event_priorities: self
                        .router
                        .priorities(reporting.notification_class)
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    // ==========================================
    // COV SUBSCRIPTIONS
    // ==========================================

    /// Create or renew a COV subscription
    ///
    /// The subscriber immediately receives the current values.
    pub fn subscribe_cov(&self, request: SubscribeCov) -> std::result::Result<(), CovError> {
        let id = request.monitored_object;
        let slot = self.objects.slot(id).ok_or(CovError::UnknownObject(id))?;
        let now = self.clock.now();

        let (delivery, period) = {
            let slot = slot.lock();
            let mut cov = self.cov.lock();
            let delivery = cov.subscribe(&request, &slot.object, now)?;
            let period = match cov_period(&slot.object) {
                Some(period) if cov.arm_period(id) => Some(period),
                _ => None,
            };
            (delivery, period)
        };

        {
            let mut scheduler = self.scheduler.lock();
            if let Some(seconds) = request.lifetime.filter(|s| *s > 0) {
                scheduler.schedule(
                    now + chrono::Duration::seconds(i64::from(seconds)),
                    Task::CovExpiry,
                );
            }
            if let Some(period) = period {
                scheduler.schedule(now + to_chrono(period), Task::CovPeriod(id));
            }
        }

        self.deliver_cov(delivery);
        Ok(())
    }

    /// Cancel a subscription; returns whether it existed
    pub fn unsubscribe_cov(
        &self,
        subscriber: &Recipient,
        process_identifier: u32,
        object: ObjectId,
        property: Option<PropertyId>,
    ) -> bool {
        self.cov
            .lock()
            .unsubscribe(subscriber, process_identifier, object, property)
    }

    pub fn active_cov_subscriptions(&self) -> Vec<ActiveCovSubscription> {
        self.cov.lock().active_subscriptions(self.clock.now())
    }

    // ==========================================
    // SCHEDULER LOOP
    // ==========================================

    /// Run every task that is due; returns how many ran
    pub fn tick(&self) -> usize {
        let now = self.clock.now();
        let due = self.scheduler.lock().pop_due(now);

        for task in &due {
            match *task {
                Task::Evaluate(id) => self.evaluate_object(id, now),
                Task::Poll(id) => self.poll(id, now),
                Task::CovExpiry => self.expire_subscriptions(now),
                Task::CovPeriod(id) => self.periodic_cov(id, now),
            }
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);
        due.len()
    }

    /// Drive `tick` on the configured interval until `stop` is called
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BacnetError::Runtime("Device is already running".into()));
        }
        info!(
            "Starting device {} with tick interval {:?}",
            self.instance, self.tick_interval
        );

        #[cfg(feature = "metrics")]
        gauge!("bacnet_device_running").set(1.0);

        let mut interval = interval(self.tick_interval);
        while self.running.load(Ordering::Relaxed) {
            interval.tick().await;
            let executed = self.tick();
            if executed > 0 {
                debug!("Tick ran {} tasks", executed);
            }

            #[cfg(feature = "metrics")]
            counter!("bacnet_ticks_total").increment(1);
        }

        info!("Device {} stopped", self.instance);

        #[cfg(feature = "metrics")]
        gauge!("bacnet_device_running").set(0.0);

        Ok(())
    }

    pub fn stop(&self) {
        info!("Stopping device {}", self.instance);
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> DeviceStats {
        let router = self.router.stats();
        let reporting_objects = self
            .objects
            .ids()
            .into_iter()
            .filter_map(|id| self.objects.slot(id))
            .filter(|slot| slot.lock().reporting.is_some())
            .count();

        DeviceStats {
            running: self.is_running(),
            ticks: self.ticks.load(Ordering::Relaxed),
            object_count: self.objects.len(),
            reporting_objects,
            cov_subscriptions: self.cov.lock().len(),
            scheduled_tasks: self.scheduler.lock().len(),
            transitions: self.transitions.load(Ordering::Relaxed),
            notifications_sent: router.notifications_sent,
            cov_notifications: self.cov_sent.load(Ordering::Relaxed),
            dispatch_failures: router.dispatch_failures,
            dropped_notifications: router.dropped,
        }
    }

    // ==========================================
    // INTERNALS
    // ==========================================

    fn sampler(&self) -> Sampler<'_> {
        Sampler::new(self.instance, &self.objects, self.reader.as_ref())
    }

    /// Sample an enrollment's references; `None` for other objects
    fn enrollment_snapshot(&self, slot: &Mutex<ObjectSlot>) -> Option<MonitoredSnapshot> {
        let enrollment = slot.lock().enrollment.clone()?;
        Some(self.sampler().snapshot(&enrollment))
    }

    /// Evaluate the object's state machine and mirror the result
    fn evaluate_slot(
        &self,
        slot: &mut ObjectSlot,
        sampled: Option<MonitoredSnapshot>,
        now: DateTime<Utc>,
        outcome: &mut Outcome,
    ) {
        let Some(machine) = slot.reporting.as_mut() else {
            return;
        };
        let snapshot = sampled.unwrap_or_else(|| slot.object.snapshot());
        let step = machine.evaluate(&snapshot, now);

        for transition in &step.transitions {
            if transition.notify
                && self
                    .router
                    .ack_required(transition.notification_class, transition.kind)
            {
                machine.require_ack(transition.kind);
            }
            if let EventValues::BufferReady { current_notification, .. } = &transition.values {
                if let Some(counters) = slot.buffer.as_mut() {
                    counters.mark_notified(*current_notification);
                }
                if let Some(enrollment) = slot.enrollment.as_mut() {
                    enrollment.previous_count = Some(*current_notification);
                }
            }
        }

        if !step.transitions.is_empty() {
            self.transitions
                .fetch_add(step.transitions.len() as u64, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            counter!("bacnet_event_transitions_total").increment(step.transitions.len() as u64);
        }

        slot.sync_reporting_properties();
        slot.sync_buffer_properties();
        outcome.arm(step.deadline);
        outcome.transitions.extend(step.transitions);
    }

    /// Recompute status flags and queue COV notifications for a change
    fn settle(&self, slot: &mut ObjectSlot, now: DateTime<Utc>, outcome: &mut Outcome) {
        if slot.refresh_status_flags().is_some() {
            outcome.cov.extend(
                self.cov
                    .lock()
                    .on_property_changed(&slot.object, PropertyId::StatusFlags, now),
            );
        }
    }

    /// Schedule, dispatch and deliver what an evaluation produced
    fn finish(&self, id: ObjectId, outcome: Outcome) {
        if let Some(deadline) = outcome.deadline {
            self.scheduler.lock().schedule(deadline, Task::Evaluate(id));
        }
        for transition in &outcome.transitions {
            self.router.dispatch(transition);
        }
        for delivery in outcome.cov {
            self.deliver_cov(delivery);
        }
    }

    fn deliver_cov(&self, delivery: Delivery) {
        let recipient = delivery.recipient().clone();
        match self.router.transport().deliver(delivery) {
            Ok(()) => {
                self.cov_sent.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!("bacnet_cov_notifications_total").increment(1);
            }
            Err(e) => self.router.record_failure(&recipient, &e),
        }
    }

    fn evaluate_object(&self, id: ObjectId, now: DateTime<Utc>) {
        let Some(slot) = self.objects.slot(id) else {
            return;
        };
        let sampled = self.enrollment_snapshot(&slot);
        let outcome = {
            let mut guard = slot.lock();
            let slot = &mut *guard;
            let mut outcome = Outcome::default();
            self.evaluate_slot(slot, sampled, now, &mut outcome);
            self.settle(slot, now, &mut outcome);
            outcome
        };
        self.finish(id, outcome);
    }

    fn poll(&self, id: ObjectId, now: DateTime<Utc>) {
        self.evaluate_object(id, now);

        let interval = self
            .objects
            .slot(id)
            .and_then(|slot| slot.lock().enrollment.as_ref().map(|e| e.poll_interval));
        if let Some(interval) = interval {
            self.scheduler
                .lock()
                .schedule(now + to_chrono(interval), Task::Poll(id));
        }
    }

    /// Out-of-cycle evaluation of enrollments referencing `id`
    fn notify_watchers(&self, id: ObjectId, now: DateTime<Utc>) {
        let enrollments: Vec<ObjectId> = self
            .watchers
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for enrollment in enrollments.into_iter().filter(|e| *e != id) {
            debug!("{} changed, evaluating {} out of cycle", id, enrollment);
            self.evaluate_object(enrollment, now);
        }
    }

    fn unwatch(&self, enrollment: ObjectId, binding: &Enrollment) {
        for object in binding.watched_objects(self.instance) {
            if let Some(mut set) = self.watchers.get_mut(&object) {
                set.remove(&enrollment);
            }
        }
    }

    fn expire_subscriptions(&self, now: DateTime<Utc>) {
        let mut cov = self.cov.lock();
        cov.expire(now);
        let next = cov.next_expiry();
        drop(cov);
        if let Some(next) = next.filter(|at| *at > now) {
            self.scheduler.lock().schedule(next, Task::CovExpiry);
        }
    }

    /// Restart periodic notification after the object's period changed
    fn rearm_cov_period(&self, id: ObjectId, period: Option<Duration>, now: DateTime<Utc>) {
        self.scheduler.lock().cancel(Task::CovPeriod(id));
        let armed = {
            let mut cov = self.cov.lock();
            cov.disarm_period(id);
            match period {
                Some(period) if cov.has_subscribers(id, now) => {
                    cov.arm_period(id);
                    Some(period)
                }
                _ => None,
            }
        };
        if let Some(period) = armed {
            debug!("{} periodic COV every {:?}", id, period);
            self.scheduler
                .lock()
                .schedule(now + to_chrono(period), Task::CovPeriod(id));
        }
    }

    fn periodic_cov(&self, id: ObjectId, now: DateTime<Utc>) {
        let Some(slot) = self.objects.slot(id) else {
            self.cov.lock().disarm_period(id);
            return;
        };
        let (deliveries, period) = {
            let slot = slot.lock();
            let mut cov = self.cov.lock();
            match cov_period(&slot.object) {
                Some(period) if cov.has_subscribers(id, now) => (cov.notify_all(&slot.object, now), period),
                _ => {
                    cov.disarm_period(id);
                    return;
                }
            }
        };

        self.scheduler
            .lock()
            .schedule(now + to_chrono(period), Task::CovPeriod(id));
        for delivery in deliveries {
            self.deliver_cov(delivery);
        }
    }

    fn apply_class_property(
        &self,
        instance: u32,
        property: PropertyId,
        value: &Value,
    ) -> std::result::Result<(), PropertyError> {
        let Some(mut class) = self.router.class(instance) else {
            return Ok(());
        };
        let invalid = |reason: &str| PropertyError::InvalidValue {
            property,
            reason: reason.to_string(),
        };
        match property {
            PropertyId::Priority => {
                let priorities = value
                    .as_list()
                    .filter(|items| items.len() == 3)
                    .ok_or_else(|| invalid("expected three priorities"))?;
                for (slot, item) in class.priority.iter_mut().zip(priorities) {
                    *slot = item
                        .as_unsigned()
                        .and_then(|p| u8::try_from(p).ok())
                        .ok_or_else(|| invalid("priority must be 0-255"))?;
                }
            }
            PropertyId::AckRequired => {
                let bits = value
                    .as_bit_string()
                    .filter(|bits| bits.len() == 3)
                    .ok_or_else(|| invalid("expected three bits"))?;
                class.ack_required = EventTransitionBits([bits[0], bits[1], bits[2]]);
            }
            _ => return Ok(()),
        }
        self.router.insert_class(class);
        Ok(())
    }
}

fn priority_value(priority: [u8; 3]) -> Value {
    Value::List(priority.iter().map(|p| Value::from(u32::from(*p))).collect())
}

/// Periodic COV interval configured on the object
fn cov_period(object: &BacnetObject) -> Option<Duration> {
    object
        .get(PropertyId::CovPeriod)
        .and_then(Value::as_unsigned)
        .filter(|seconds| *seconds > 0)
        .map(Duration::from_secs)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero())
}
