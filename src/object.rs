// src/object.rs - In-memory object database
use crate::algorithms::MonitoredSnapshot;
use crate::buffer::BufferReadyCounters;
use crate::enrollment::Enrollment;
use crate::error::PropertyError;
use crate::state_machine::EventStateMachine;
use crate::types::{
    DeviceObjectPropertyReference, EventState, ObjectId, ObjectType, PropertyId, Reliability,
    StatusFlags,
};
use crate::value::Value;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

/// Buffer size given to log objects created without one
pub const DEFAULT_BUFFER_SIZE: u32 = 1000;

/// Properties no client may write
const READ_ONLY: &[PropertyId] = &[
    PropertyId::ObjectIdentifier,
    PropertyId::ObjectType,
    PropertyId::EventState,
    PropertyId::StatusFlags,
    PropertyId::AckedTransitions,
    PropertyId::EventTimeStamps,
    PropertyId::EventType,
    PropertyId::RecordCount,
    PropertyId::TotalRecordCount,
    PropertyId::LastNotifyRecord,
    PropertyId::RecordsSinceNotification,
    PropertyId::ObjectPropertyReference,
];

pub fn is_read_only(property: PropertyId) -> bool {
    READ_ONLY.contains(&property)
}

/// A BACnet object and its property values
///
/// # Examples
///
/// ```rust
/// use bacnet_events::object::BacnetObject;
/// use bacnet_events::types::{ObjectId, ObjectType, PropertyId};
/// use bacnet_events::Value;
///
/// let object = BacnetObject::new(ObjectId::new(ObjectType::AnalogInput, 1), "Zone Temp")
///     .with_property(PropertyId::PresentValue, Value::Real(21.0));
///
/// assert_eq!(object.get(PropertyId::PresentValue), Some(&Value::Real(21.0)));
/// assert_eq!(object.name(), "Zone Temp");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BacnetObject {
    id: ObjectId,
    name: String,
    properties: BTreeMap<PropertyId, Value>,
}

impl BacnetObject {
    /// Create an object carrying the properties every object type has
    pub fn new(id: ObjectId, name: impl Into<String>) -> Self {
        let name = name.into();
        let mut properties = BTreeMap::new();
        properties.insert(PropertyId::ObjectIdentifier, Value::ObjectIdentifier(id));
        properties.insert(PropertyId::ObjectName, Value::CharacterString(name.clone()));
        properties.insert(PropertyId::ObjectType, Value::Enumerated(id.object_type.code()));

        if id.object_type != ObjectType::Device {
            properties.insert(PropertyId::StatusFlags, StatusFlags::default().into());
            properties.insert(PropertyId::EventState, EventState::Normal.into());
            properties.insert(PropertyId::Reliability, Reliability::NoFaultDetected.into());
            properties.insert(PropertyId::OutOfService, Value::Boolean(false));
        }
        if let Some(value) = default_present_value(id.object_type) {
            properties.insert(PropertyId::PresentValue, value);
        }
        if id.object_type.is_log() {
            let counters = BufferReadyCounters::new(DEFAULT_BUFFER_SIZE);
            properties.extend(counters.properties());
        }

        Self { id, name, properties }
    }

    pub fn with_property(mut self, property: PropertyId, value: Value) -> Self {
        self.set(property, value);
        self
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, property: PropertyId) -> Option<&Value> {
        self.properties.get(&property)
    }

    pub fn has(&self, property: PropertyId) -> bool {
        self.properties.contains_key(&property)
    }

    /// Store a value, returning the previous one
    pub fn set(&mut self, property: PropertyId, value: Value) -> Option<Value> {
        trace!("{} {} = {}", self.id, property, value);
        if property == PropertyId::ObjectName {
            if let Some(name) = value.as_str() {
                self.name = name.to_string();
            }
        }
        self.properties.insert(property, value)
    }

    pub fn property_ids(&self) -> Vec<PropertyId> {
        self.properties.keys().copied().collect()
    }

    pub fn read(&self, property: PropertyId) -> Result<Value, PropertyError> {
        self.get(property)
            .cloned()
            .ok_or(PropertyError::UnknownProperty { object: self.id, property })
    }

    pub fn status_flags(&self) -> StatusFlags {
        self.get(PropertyId::StatusFlags)
            .and_then(Value::as_bit_string)
            .map(StatusFlags::from_bits)
            .unwrap_or_default()
    }

    pub fn reliability(&self) -> Reliability {
        self.get(PropertyId::Reliability)
            .and_then(Value::as_enumerated)
            .and_then(Reliability::from_code)
            .unwrap_or_default()
    }

    pub fn out_of_service(&self) -> bool {
        self.get(PropertyId::OutOfService)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Status flags not owned by event reporting
    pub fn base_status_flags(&self) -> StatusFlags {
        let stored = self.status_flags();
        StatusFlags {
            in_alarm: false,
            fault: self.reliability().is_fault(),
            overridden: stored.overridden,
            out_of_service: self.out_of_service(),
        }
    }

    /// The object's own values as seen by an intrinsic algorithm
    pub fn snapshot(&self) -> MonitoredSnapshot {
        let value = if self.id.object_type.is_log() {
            self.get(PropertyId::TotalRecordCount).cloned()
        } else {
            self.get(PropertyId::PresentValue).cloned()
        };

        let mut snapshot = MonitoredSnapshot::new(value.unwrap_or(Value::Null))
            .with_status_flags(self.status_flags())
            .with_reliability(self.reliability());
        snapshot.feedback = self.get(PropertyId::FeedbackValue).cloned();
        snapshot.setpoint = self.get(PropertyId::Setpoint).and_then(Value::as_float);
        snapshot.mode = self.get(PropertyId::Mode).and_then(Value::as_enumerated);
        snapshot.operation_expected = self
            .get(PropertyId::OperationExpected)
            .and_then(Value::as_enumerated);

        if self.id.object_type.is_log() {
            snapshot.previous_count = self
                .get(PropertyId::LastNotifyRecord)
                .and_then(Value::as_unsigned)
                .and_then(|v| u32::try_from(v).ok());
            snapshot.buffer_property = Some(DeviceObjectPropertyReference::local(
                self.id,
                PropertyId::LogBuffer,
            ));
        }
        snapshot
    }
}

fn default_present_value(object_type: ObjectType) -> Option<Value> {
    use ObjectType::*;
    match object_type {
        BinaryInput | BinaryOutput | BinaryValue => Some(Value::Enumerated(0)),
        MultiStateInput | MultiStateOutput | MultiStateValue => Some(Value::Unsigned(1)),
        LifeSafetyPoint | LifeSafetyZone => Some(Value::Enumerated(0)),
        BitStringValue => Some(Value::BitString(Vec::new())),
        CharacterStringValue => Some(Value::CharacterString(String::new())),
        IntegerValue => Some(Value::Signed(0)),
        PositiveIntegerValue | Accumulator => Some(Value::Unsigned(0)),
        t if t.is_analog() => Some(Value::Real(0.0)),
        _ => None,
    }
}

/// An object together with the event machinery attached to it
#[derive(Debug)]
pub struct ObjectSlot {
    pub object: BacnetObject,
    pub reporting: Option<EventStateMachine>,
    pub enrollment: Option<Enrollment>,
    pub buffer: Option<BufferReadyCounters>,
}

impl ObjectSlot {
    pub fn new(object: BacnetObject) -> Self {
        let buffer = object.id().object_type.is_log().then(|| {
            let size = object
                .get(PropertyId::BufferSize)
                .and_then(Value::as_unsigned)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(DEFAULT_BUFFER_SIZE);
            BufferReadyCounters::new(size)
        });
        let mut slot = Self {
            object,
            reporting: None,
            enrollment: None,
            buffer,
        };
        slot.sync_buffer_properties();
        slot
    }

    /// Recompute status flags from reliability, out-of-service and the
    /// event state; returns the previous flags when they changed
    pub fn refresh_status_flags(&mut self) -> Option<StatusFlags> {
        let base = self.object.base_status_flags();
        let flags = match &self.reporting {
            Some(machine) => machine.status_flags(base),
            None => base,
        };
        let previous = self.object.status_flags();
        if previous == flags {
            return None;
        }
        self.object.set(PropertyId::StatusFlags, flags.into());
        Some(previous)
    }

    /// Mirror the event state machine onto the object's properties
    pub fn sync_reporting_properties(&mut self) {
        let Some(machine) = &self.reporting else {
            return;
        };
        let time_stamps = machine
            .event_time_stamps()
            .0
            .iter()
            .map(|stamp| match stamp {
                Some(at) => Value::CharacterString(at.to_rfc3339()),
                None => Value::Null,
            })
            .collect();

        let mut properties = vec![
            (PropertyId::EventState, Value::from(machine.state())),
            (PropertyId::AckedTransitions, machine.acked_transitions().into()),
            (PropertyId::EventTimeStamps, Value::List(time_stamps)),
        ];
        properties.extend(machine.config().properties());
        if !machine.is_intrinsic() {
            properties.push((
                PropertyId::EventType,
                Value::Enumerated(machine.config().algorithm.event_type().code()),
            ));
            properties.push((PropertyId::Reliability, machine.reliability().into()));
        }

        for (property, value) in properties {
            self.object.set(property, value);
        }
    }

    /// Mirror the log counters onto the object's properties
    pub fn sync_buffer_properties(&mut self) {
        if let Some(counters) = &self.buffer {
            for (property, value) in counters.properties() {
                self.object.set(property, value);
            }
        }
    }
}

/// Thread-safe table of the device's objects
///
/// Each object sits behind its own mutex, so writes to different objects
/// evaluate concurrently. `slot` hands out the `Arc` so no table shard
/// stays locked while an object is.
#[derive(Debug, Clone, Default)]
pub struct ObjectDatabase {
    objects: Arc<DashMap<ObjectId, Arc<Mutex<ObjectSlot>>>>,
}

impl ObjectDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, object: BacnetObject) -> Result<(), PropertyError> {
        let id = object.id();
        match self.objects.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(PropertyError::ObjectExists(id)),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(ObjectSlot::new(object))));
                Ok(())
            }
        }
    }

    pub fn remove(&self, id: ObjectId) -> Option<Arc<Mutex<ObjectSlot>>> {
        self.objects.remove(&id).map(|(_, slot)| slot)
    }

    pub fn slot(&self, id: ObjectId) -> Option<Arc<Mutex<ObjectSlot>>> {
        self.objects.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn read_property(&self, id: ObjectId, property: PropertyId) -> Result<Value, PropertyError> {
        let slot = self.slot(id).ok_or(PropertyError::UnknownObject(id))?;
        let slot = slot.lock();
        slot.object.read(property)
    }

    /// Identifiers in ascending order
    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<_> = self.objects.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
