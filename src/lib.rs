//! BACnet alarm, event and COV notification core
//!
//! Implements the event-reporting side of a BACnet device: the event-state
//! machine with its algorithms, time-delay debounce and fault precedence,
//! notification-class routing to recipients, event enrollments that poll a
//! referenced property, the Change-of-Value subscription engine and the
//! buffer-ready tracker for trend logs.
//!
//! Encoding and the network itself are left to the hosting protocol stack,
//! which plugs in through [`transport::NotificationTransport`] and
//! [`transport::PropertyReader`].
//!
//! # Examples
//!
//! ```rust
//! use bacnet_events::{Device, LoggingTransport};
//! use std::sync::Arc;
//!
//! bacnet_events::init()?;
//!
//! let device = Device::new(1001, "AHU-1", Arc::new(LoggingTransport));
//! assert_eq!(device.objects().len(), 1);
//! # Ok::<(), bacnet_events::BacnetError>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error types for every subsystem
pub mod error;

/// Property values
pub mod value;

/// Object identifiers, enumerations and bit strings
pub mod types;

/// Injectable time source
pub mod clock;

// ============================================================================
// EVENT REPORTING
// ============================================================================

/// Event and fault algorithms
pub mod algorithms;

/// Time-delay debounce of pending transitions
pub mod debounce;

/// Per-object event-state machine
pub mod state_machine;

/// Buffer-ready record counters
pub mod buffer;

/// Intrinsic and algorithmic reporting configuration
pub mod enrollment;

// ============================================================================
// NOTIFICATION DELIVERY
// ============================================================================

/// Outgoing notification payloads
pub mod notification;

/// Notification classes and recipient routing
pub mod notification_class;

/// Transport and remote-read seams
pub mod transport;

/// Change-of-Value subscriptions
pub mod cov;

// ============================================================================
// DEVICE
// ============================================================================

/// Object database
pub mod object;

/// Deadline queue
pub mod scheduler;

/// Device facade and tick loop
pub mod device;

/// YAML configuration
pub mod config;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use cov::{ActiveCovSubscription, SubscribeCov};
pub use device::{Device, DeviceStats, EventSummary};
pub use error::{BacnetError, Result};
pub use notification::{CovNotification, Delivery, EventNotification};
pub use notification_class::{Destination, NotificationClass};
pub use object::BacnetObject;
pub use state_machine::{AlarmConfig, ReportingParameters};
pub use transport::{ChannelTransport, LoggingTransport, NotificationTransport, PropertyReader};
pub use types::{
    EventState, EventTransitionBits, LimitEnable, ObjectId, ObjectType, PropertyId, Recipient,
    Reliability, StatusFlags, TransitionKind,
};
pub use value::Value;

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Install the default tracing subscriber
///
/// Honors `RUST_LOG` and falls back to `bacnet_events=info`. Calling it
/// when a subscriber is already installed is harmless.
pub fn init() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bacnet_events=info"));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));

    if subscriber.try_init().is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }

    #[cfg(feature = "metrics")]
    describe_metrics();

    tracing::info!("bacnet-events {} initialized", VERSION);
    Ok(())
}

#[cfg(feature = "metrics")]
fn describe_metrics() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!("bacnet_event_transitions_total", "Committed event-state transitions");
    describe_counter!("bacnet_event_notifications_total", "Event notifications handed to the transport");
    describe_counter!("bacnet_dispatch_failures_total", "Deliveries the transport refused");
    describe_counter!("bacnet_cov_notifications_total", "COV notifications handed to the transport");
    describe_gauge!("bacnet_device_running", "Device loop running state (1=running, 0=stopped)");
    describe_counter!("bacnet_ticks_total", "Device ticks processed");
}
