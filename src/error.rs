// src/error.rs - Error taxonomy for the event core
use crate::types::{ObjectId, PropertyId};
use thiserror::Error;

/// Rejected reporting configuration.
///
/// Returned synchronously by the configure operations; the object is left
/// without the feature that was being configured.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Object to configure does not exist
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// A threshold combination that can never evaluate consistently
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    /// A parameter the algorithm kind requires was not supplied
    #[error("Missing parameter '{parameter}' for {algorithm}")]
    MissingParameter {
        algorithm: &'static str,
        parameter: &'static str,
    },

    /// The algorithm cannot monitor this kind of object
    #[error("Algorithm {algorithm} is not supported by {object}")]
    UnsupportedAlgorithm {
        algorithm: &'static str,
        object: ObjectId,
    },

    /// Poll interval of zero or otherwise unusable
    #[error("Invalid poll interval: {0} ms")]
    InvalidPollInterval(u64),

    /// Property value has the wrong datatype for the reporting parameter
    #[error("Invalid value for {property}: {reason}")]
    InvalidValue {
        property: PropertyId,
        reason: String,
    },

    /// Generic configuration failure (file level)
    #[error("Configuration error: {0}")]
    Invalid(String),
}

/// COV subscription request failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CovError {
    /// Monitored object is unknown
    #[error("Unknown object: {0}")]
    UnknownObject(ObjectId),

    /// Monitored property is not present on the object
    #[error("Unknown property {property} on {object}")]
    UnknownProperty { object: ObjectId, property: PropertyId },

    /// Object type has no COV reporting criteria
    #[error("Object {0} does not support COV reporting")]
    NotSupported(ObjectId),

    /// Property-level subscription to a property that cannot be monitored
    #[error("Property {property} of {object} does not support COV reporting")]
    PropertyNotSupported { object: ObjectId, property: PropertyId },

    /// Increment supplied for a non-numeric property
    #[error("COV increment is not valid for {0}")]
    InvalidIncrement(PropertyId),
}

/// Property access failures on the local object database.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("Object not found: {0}")]
    UnknownObject(ObjectId),

    #[error("Property {property} not present on {object}")]
    UnknownProperty { object: ObjectId, property: PropertyId },

    #[error("Property {property} of {object} is read-only")]
    WriteAccessDenied { object: ObjectId, property: PropertyId },

    #[error("Object already exists: {0}")]
    ObjectExists(ObjectId),

    /// Value rejected by the reporting configuration it would change
    #[error("Invalid value for {property}: {reason}")]
    InvalidValue { property: PropertyId, reason: String },

    /// Returned value type does not match the expected type
    #[error("Type mismatch on {property}: expected {expected}, got {actual}")]
    TypeMismatch {
        property: PropertyId,
        expected: &'static str,
        actual: &'static str,
    },
}

/// AcknowledgeAlarm failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AckError {
    #[error("Object not found: {0}")]
    UnknownObject(ObjectId),

    #[error("Object {0} has no event reporting configured")]
    NotReporting(ObjectId),

    /// Time stamp does not match the last transition of that kind
    #[error("Time stamp does not match the last transition of {object}")]
    InvalidTimeStamp { object: ObjectId },
}

/// Per-recipient delivery failure. Logged and counted, never rolls back
/// the committed transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Recipient unreachable: {0}")]
    Unreachable(String),

    #[error("Delivery timed out: {0}")]
    Timeout(String),

    #[error("Transport closed")]
    Closed,
}

/// Failure sampling a referenced property.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("Unknown object: {0}")]
    UnknownObject(ObjectId),

    #[error("Unknown property {property} on {object}")]
    UnknownProperty { object: ObjectId, property: PropertyId },

    #[error("Device {0} unreachable")]
    DeviceUnreachable(u32),

    #[error("Read timed out")]
    Timeout,
}

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum BacnetError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cov(#[from] CovError),

    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error(transparent)]
    Ack(#[from] AckError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Read(#[from] ReadError),

    /// Device loop misuse (already running and similar)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Convenient alias over [`Result`] using [`BacnetError`]
pub type Result<T> = std::result::Result<T, BacnetError>;
