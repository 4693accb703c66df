// src/enrollment.rs - Reporting configuration and event enrollment sampling
//
// Intrinsic reporting reads the monitored object's own properties.
// Algorithmic reporting (event enrollments) samples a referenced property
// that may live in this device or in a peer, on a fixed poll interval and
// out of cycle when a local write touches the reference.

use crate::algorithms::{EventAlgorithm, FaultAlgorithm, MonitoredSnapshot};
use crate::error::{ConfigError, PropertyError, ReadError};
use crate::object::ObjectDatabase;
use crate::state_machine::{AlarmConfig, ReportingParameters};
use crate::transport::PropertyReader;
use crate::types::{DeviceObjectPropertyReference, ObjectId, PropertyId, Reliability, StatusFlags};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

fn default_poll_interval() -> u64 {
    1000
}

/// Event reporting performed by the monitored object itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicReporting {
    pub algorithm: EventAlgorithm,

    #[serde(default)]
    pub fault: FaultAlgorithm,

    #[serde(flatten)]
    pub reporting: ReportingParameters,
}

impl IntrinsicReporting {
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

    pub fn alarm_config(&self) -> AlarmConfig {
        AlarmConfig::new(self.algorithm.clone(), self.reporting.clone()).with_fault(self.fault.clone())
    }
}

/// Event reporting of an event enrollment object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmicReporting {
    /// Property whose value the algorithm monitors
    pub reference: DeviceObjectPropertyReference,

    pub algorithm: EventAlgorithm,

    #[serde(default)]
    pub fault: FaultAlgorithm,

    /// Milliseconds between samples
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    #[serde(flatten)]
    pub reporting: ReportingParameters,
}

impl AlgorithmicReporting {
    pub fn new(
        reference: DeviceObjectPropertyReference,
        algorithm: EventAlgorithm,
        reporting: ReportingParameters,
    ) -> Self {
        Self {
            reference,
            algorithm,
            fault: FaultAlgorithm::None,
            poll_interval: default_poll_interval(),
            reporting,
        }
    }

    pub fn with_fault(mut self, fault: FaultAlgorithm) -> Self {
        self.fault = fault;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn alarm_config(&self) -> AlarmConfig {
        AlarmConfig::new(self.algorithm.clone(), self.reporting.clone()).with_fault(self.fault.clone())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval == 0 {
            return Err(ConfigError::InvalidPollInterval(self.poll_interval));
        }
        self.alarm_config().validate()
    }
}

/// Sampling state of a configured event enrollment
#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub reference: DeviceObjectPropertyReference,
    pub auxiliary: Vec<(PropertyId, DeviceObjectPropertyReference)>,
    pub poll_interval: Duration,
    /// Count at the last buffer-ready notification
    pub previous_count: Option<u32>,
    /// A set fault flag is left to the fault-status-flags algorithm
    pub member_fault: bool,
}

impl Enrollment {
    pub fn new(reporting: &AlgorithmicReporting) -> Self {
        Self {
            reference: reporting.reference,
            auxiliary: reporting.algorithm.auxiliary_references(),
            poll_interval: Duration::from_millis(reporting.poll_interval),
            previous_count: None,
            member_fault: matches!(reporting.fault, FaultAlgorithm::FaultStatusFlags),
        }
    }

    /// Local objects whose writes must re-evaluate this enrollment
    pub fn watched_objects(&self, local_device: u32) -> Vec<ObjectId> {
        let mut objects: Vec<_> = std::iter::once(&self.reference)
            .chain(self.auxiliary.iter().map(|(_, r)| r))
            .filter(|r| is_local(r, local_device))
            .map(|r| r.object)
            .collect();
        objects.sort();
        objects.dedup();
        objects
    }
}

pub fn is_local(reference: &DeviceObjectPropertyReference, local_device: u32) -> bool {
    reference.device.map_or(true, |device| device == local_device)
}

/// Reads referenced properties from the local database or a peer
pub struct Sampler<'a> {
    local_device: u32,
    objects: &'a ObjectDatabase,
    reader: &'a dyn PropertyReader,
}

impl<'a> Sampler<'a> {
    pub fn new(local_device: u32, objects: &'a ObjectDatabase, reader: &'a dyn PropertyReader) -> Self {
        Self {
            local_device,
            objects,
            reader,
        }
    }

    pub fn read(&self, reference: &DeviceObjectPropertyReference) -> Result<Value, ReadError> {
        if is_local(reference, self.local_device) {
            self.objects
                .read_property(reference.object, reference.property)
                .map_err(|e| match e {
                    PropertyError::UnknownProperty { object, property } => {
                        ReadError::UnknownProperty { object, property }
                    }
                    _ => ReadError::UnknownObject(reference.object),
                })
        } else {
            self.reader.read_property(reference)
        }
    }

    /// Snapshot of an enrollment's monitored values
    ///
    /// A failed read of the monitored property yields an unreliable
    /// snapshot, which the state machine turns into a fault.
    pub fn snapshot(&self, enrollment: &Enrollment) -> MonitoredSnapshot {
        let reference = &enrollment.reference;
        let value = match self.read(reference) {
            Ok(value) => value,
            Err(e) => {
                warn!("Sampling {} failed: {}", reference, e);
                return MonitoredSnapshot::unreliable(read_failure_reliability(&e));
            }
        };

        let status_reference = DeviceObjectPropertyReference {
            property: PropertyId::StatusFlags,
            ..*reference
        };
        let status_flags = self
            .read(&status_reference)
            .ok()
            .and_then(|v| v.as_bit_string().map(StatusFlags::from_bits))
            .unwrap_or_default();

        let mut snapshot = MonitoredSnapshot::new(value).with_status_flags(status_flags);
        if status_flags.fault && !enrollment.member_fault {
            snapshot.reliability = Reliability::MonitoredObjectFault;
        }
        self.overlay(&mut snapshot, &enrollment.auxiliary);

        if reference.property == PropertyId::TotalRecordCount {
            snapshot.previous_count = enrollment.previous_count;
            snapshot.buffer_property = Some(DeviceObjectPropertyReference {
                property: PropertyId::LogBuffer,
                ..*reference
            });
        }
        snapshot
    }

    /// Fill auxiliary values (feedback, setpoint, mode) into `snapshot`
    pub fn overlay(
        &self,
        snapshot: &mut MonitoredSnapshot,
        auxiliary: &[(PropertyId, DeviceObjectPropertyReference)],
    ) {
        for (role, reference) in auxiliary {
            let value = match self.read(reference) {
                Ok(value) => value,
                Err(e) => {
                    debug!("Auxiliary read of {} failed: {}", reference, e);
                    continue;
                }
            };
            match role {
                PropertyId::FeedbackValue => snapshot.feedback = Some(value),
                PropertyId::Setpoint => snapshot.setpoint = value.as_float(),
                PropertyId::Mode => snapshot.mode = value.as_enumerated(),
                _ => {}
            }
        }
    }
}

/// Reliability reported for a failed read
pub fn read_failure_reliability(error: &ReadError) -> Reliability {
    match error {
        ReadError::UnknownObject(_) | ReadError::UnknownProperty { .. } => {
            Reliability::ConfigurationError
        }
        ReadError::DeviceUnreachable(_) | ReadError::Timeout => Reliability::CommunicationFailure,
    }
}
