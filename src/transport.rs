// src/transport.rs - Collaborator interfaces at the network edge
//
// Encoding and sending notifications, and reading properties of remote
// devices, belong to the protocol stack hosting this crate. These traits
// are the seams it plugs into.

use crate::error::{DispatchError, ReadError};
use crate::notification::Delivery;
use crate::types::DeviceObjectPropertyReference;
use crate::value::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Sends notifications to recipients
///
/// `deliver` must not block: confirmed deliveries are handed to the
/// stack's request machinery, which owns retries and timeouts.
pub trait NotificationTransport: Send + Sync {
    fn deliver(&self, delivery: Delivery) -> Result<(), DispatchError>;
}

/// Reads properties of objects in other devices
#[cfg_attr(test, mockall::automock)]
pub trait PropertyReader: Send + Sync {
    fn read_property(&self, reference: &DeviceObjectPropertyReference) -> Result<Value, ReadError>;
}

/// Reader for a device without network access to peers
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteReader;

impl PropertyReader for NoRemoteReader {
    fn read_property(&self, reference: &DeviceObjectPropertyReference) -> Result<Value, ReadError> {
        Err(ReadError::DeviceUnreachable(reference.device.unwrap_or_default()))
    }
}

/// Hands deliveries to an async consumer over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationTransport for ChannelTransport {
    fn deliver(&self, delivery: Delivery) -> Result<(), DispatchError> {
        self.tx.send(delivery).map_err(|_| DispatchError::Closed)
    }
}

/// Writes every delivery to the log as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTransport;

impl NotificationTransport for LoggingTransport {
    fn deliver(&self, delivery: Delivery) -> Result<(), DispatchError> {
        match serde_json::to_string(&delivery) {
            Ok(json) => info!(target: "bacnet_events::deliveries", "{}", json),
            Err(e) => warn!("Failed to encode {}: {}", delivery, e),
        }
        Ok(())
    }
}
