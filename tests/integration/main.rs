mod alarm_test;
mod config_test;
mod cov_test;
mod enrollment_test;

use bacnet_events::notification_class::{Destination, NotificationClass};
use bacnet_events::types::Recipient;
use bacnet_events::{ChannelTransport, Delivery, Device, ManualClock};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

pub const DEVICE: u32 = 100;
pub const OPERATOR: Recipient = Recipient::Device(9);

/// Device on a manual clock with notification class 1 routed to `OPERATOR`
pub struct Harness {
    pub device: Device,
    pub clock: ManualClock,
    pub rx: UnboundedReceiver<Delivery>,
}

impl Harness {
    pub fn new() -> Self {
        let (transport, rx) = ChannelTransport::new();
        let clock = ManualClock::default();
        let device = Device::new(DEVICE, "integration", Arc::new(transport))
            .with_clock(Arc::new(clock.clone()));
        device.add_notification_class(
            NotificationClass::new(1, [10, 50, 200]).with_recipient(Destination::new(OPERATOR, 42)),
        );
        Self { device, clock, rx }
    }

    pub fn advance_secs(&self, seconds: u64) {
        self.clock.advance(std::time::Duration::from_secs(seconds));
    }

    /// Everything delivered so far
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        while let Ok(delivery) = self.rx.try_recv() {
            deliveries.push(delivery);
        }
        deliveries
    }
}
