// src/config.rs - YAML device configuration

use crate::enrollment::{AlgorithmicReporting, IntrinsicReporting};
use crate::error::{ConfigError, Result};
use crate::notification_class::NotificationClass;
use crate::types::{ObjectId, ObjectType, PropertyId};
use crate::value::Value;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::debug;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Complete device configuration
///
/// # Examples
///
/// ```rust
/// use bacnet_events::Config;
///
/// let config = Config::from_yaml(r#"
/// device:
///   instance: 1001
///   name: AHU-1
/// objects:
///   - id: analog-input:1
///     name: Supply Air Temp
/// "#)?;
/// assert_eq!(config.device.tick_interval_ms, 100);
/// # Ok::<(), bacnet_events::BacnetError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,

    #[serde(default)]
    pub notification_classes: Vec<NotificationClass>,

    #[serde(default)]
    pub objects: Vec<ObjectConfig>,

    #[serde(default)]
    pub event_enrollments: Vec<EnrollmentConfig>,
}

/// Device section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub instance: u32,

    pub name: String,

    /// Scheduler tick period in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Local time offset for recipient time windows
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl DeviceConfig {
    pub fn utc_offset(&self) -> std::result::Result<FixedOffset, ConfigError> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "UTC offset {} minutes out of range",
                    self.utc_offset_minutes
                ))
            })
    }
}

/// Object with initial property values and optional intrinsic reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub id: ObjectId,

    pub name: String,

    #[serde(default)]
    pub properties: BTreeMap<PropertyId, Value>,

    #[serde(default)]
    pub reporting: Option<IntrinsicReporting>,
}

/// Event enrollment object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentConfig {
    pub instance: u32,

    pub name: String,

    #[serde(flatten)]
    pub reporting: AlgorithmicReporting,
}

fn default_tick_interval() -> u64 { 100 }

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check everything that can be checked without building the device
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.device.instance > ObjectId::MAX_INSTANCE {
            return Err(ConfigError::Invalid(format!(
                "device instance {} exceeds {}",
                self.device.instance,
                ObjectId::MAX_INSTANCE
            )));
        }
        if self.device.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be greater than zero".into()));
        }
        self.device.utc_offset()?;

        let mut classes = HashSet::new();
        for class in &self.notification_classes {
            if !classes.insert(class.instance) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate notification class {}",
                    class.instance
                )));
            }
        }

        let mut ids = HashSet::new();
        ids.insert(ObjectId::new(ObjectType::Device, self.device.instance));
        for class in &self.notification_classes {
            ids.insert(ObjectId::new(ObjectType::NotificationClass, class.instance));
        }

        for object in &self.objects {
            if matches!(
                object.id.object_type,
                ObjectType::Device | ObjectType::NotificationClass | ObjectType::EventEnrollment
            ) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be configured in its own section",
                    object.id
                )));
            }
            if !ids.insert(object.id) {
                return Err(ConfigError::Invalid(format!("duplicate object {}", object.id)));
            }
            if let Some(reporting) = &object.reporting {
                if !reporting.algorithm.supports(object.id.object_type) {
                    return Err(ConfigError::UnsupportedAlgorithm {
                        algorithm: reporting.algorithm.name(),
                        object: object.id,
                    });
                }
                reporting.alarm_config().validate()?;
            }
        }

        for enrollment in &self.event_enrollments {
            let id = ObjectId::new(ObjectType::EventEnrollment, enrollment.instance);
            if !ids.insert(id) {
                return Err(ConfigError::Invalid(format!("duplicate object {}", id)));
            }
            enrollment.reporting.validate()?;
        }

        Ok(())
    }
}
