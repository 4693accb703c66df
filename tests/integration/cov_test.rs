use crate::{Harness, DEVICE};
use bacnet_events::error::CovError;
use bacnet_events::types::Recipient;
use bacnet_events::{BacnetObject, ObjectId, ObjectType, PropertyId, SubscribeCov, Value};

const AI: ObjectId = ObjectId::new(ObjectType::AnalogInput, 1);
const SUBSCRIBER: Recipient = Recipient::Device(12);

fn with_input() -> Harness {
    let h = Harness::new();
    h.device
        .create_object(
            BacnetObject::new(AI, "ai")
                .with_property(PropertyId::PresentValue, Value::Real(20.0))
                .with_property(PropertyId::CovIncrement, Value::Real(1.0)),
        )
        .unwrap();
    h
}

#[test]
fn test_subscription_sends_current_values() {
    let mut h = with_input();
    h.device
        .subscribe_cov(SubscribeCov::new(SUBSCRIBER, 3, AI).confirmed().lifetime(300))
        .unwrap();

    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].is_confirmed());
    let cov = deliveries[0].as_cov().unwrap();
    assert_eq!(cov.initiating_device, DEVICE);
    assert_eq!(cov.subscriber_process_identifier, 3);
    assert_eq!(cov.time_remaining, 300);
    assert_eq!(cov.value(PropertyId::PresentValue), Some(&Value::Real(20.0)));
    assert_eq!(
        cov.value(PropertyId::StatusFlags),
        Some(&Value::BitString(vec![false; 4]))
    );
}

#[test]
fn test_increment_is_measured_from_last_notification() {
    let mut h = with_input();
    h.device
        .subscribe_cov(SubscribeCov::new(SUBSCRIBER, 3, AI))
        .unwrap();
    h.drain();

    for value in [20.4, 20.8] {
        h.device
            .write_property(AI, PropertyId::PresentValue, Value::Real(value))
            .unwrap();
    }
    assert!(h.drain().is_empty());

    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(21.1))
        .unwrap();
    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(
        deliveries[0].as_cov().unwrap().value(PropertyId::PresentValue),
        Some(&Value::Real(21.1))
    );
}

#[test]
fn test_status_flags_change_notifies_with_value() {
    let mut h = with_input();
    h.device
        .subscribe_cov(SubscribeCov::new(SUBSCRIBER, 3, AI))
        .unwrap();
    h.drain();

    h.device
        .write_property(AI, PropertyId::OutOfService, Value::Boolean(true))
        .unwrap();
    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    let cov = deliveries[0].as_cov().unwrap();
    assert_eq!(cov.value(PropertyId::PresentValue), Some(&Value::Real(20.0)));
    assert_eq!(
        cov.value(PropertyId::StatusFlags),
        Some(&Value::BitString(vec![false, false, false, true]))
    );
}

#[test]
fn test_property_subscription_with_own_increment() {
    let mut h = with_input();
    h.device
        .subscribe_cov(
            SubscribeCov::new(SUBSCRIBER, 4, AI)
                .property(PropertyId::PresentValue)
                .increment(5.0),
        )
        .unwrap();
    h.drain();

    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(23.0))
        .unwrap();
    assert!(h.drain().is_empty());

    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(25.0))
        .unwrap();
    assert_eq!(h.drain().len(), 1);
}

#[test]
fn test_lifetime_expiry() {
    let mut h = with_input();
    h.device
        .subscribe_cov(SubscribeCov::new(SUBSCRIBER, 3, AI).lifetime(10))
        .unwrap();
    h.drain();
    assert_eq!(h.device.active_cov_subscriptions().len(), 1);

    h.advance_secs(10);
    h.device.tick();
    assert!(h.device.active_cov_subscriptions().is_empty());

    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(30.0))
        .unwrap();
    assert!(h.drain().is_empty());
}

#[test]
fn test_resubscribe_replaces_and_cancel_removes() {
    let mut h = with_input();
    h.device
        .subscribe_cov(SubscribeCov::new(SUBSCRIBER, 3, AI).lifetime(10))
        .unwrap();
    h.device
        .subscribe_cov(SubscribeCov::new(SUBSCRIBER, 3, AI).lifetime(60))
        .unwrap();
    assert_eq!(h.drain().len(), 2);

    let active = h.device.active_cov_subscriptions();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].time_remaining, 60);

    assert!(h.device.unsubscribe_cov(&SUBSCRIBER, 3, AI, None));
    assert!(!h.device.unsubscribe_cov(&SUBSCRIBER, 3, AI, None));
    assert!(h.device.active_cov_subscriptions().is_empty());
}

#[test]
fn test_subscription_errors() {
    let h = with_input();
    let missing = ObjectId::new(ObjectType::AnalogValue, 99);
    assert_eq!(
        h.device.subscribe_cov(SubscribeCov::new(SUBSCRIBER, 1, missing)),
        Err(CovError::UnknownObject(missing))
    );
    assert_eq!(
        h.device.subscribe_cov(SubscribeCov::new(SUBSCRIBER, 1, h.device.id())),
        Err(CovError::NotSupported(h.device.id()))
    );
    assert!(matches!(
        h.device.subscribe_cov(SubscribeCov::new(SUBSCRIBER, 1, AI).increment(1.0)),
        Err(CovError::InvalidIncrement(_))
    ));
}

#[test]
fn test_periodic_notification() {
    let mut h = with_input();
    let av = ObjectId::new(ObjectType::AnalogValue, 2);
    h.device
        .create_object(
            BacnetObject::new(av, "av")
                .with_property(PropertyId::PresentValue, Value::Real(1.0))
                .with_property(PropertyId::CovPeriod, Value::Unsigned(30)),
        )
        .unwrap();
    h.device
        .subscribe_cov(SubscribeCov::new(SUBSCRIBER, 5, av))
        .unwrap();
    h.drain();

    h.advance_secs(29);
    h.device.tick();
    assert!(h.drain().is_empty());

    h.advance_secs(1);
    h.device.tick();
    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].as_cov().unwrap().monitored_object, av);
}

#[test]
fn test_period_written_after_subscribing() {
    let mut h = with_input();
    let av = ObjectId::new(ObjectType::AnalogValue, 2);
    h.device
        .create_object(
            BacnetObject::new(av, "av")
                .with_property(PropertyId::PresentValue, Value::Real(1.0))
                .with_property(PropertyId::CovPeriod, Value::Unsigned(0)),
        )
        .unwrap();
    h.device
        .subscribe_cov(SubscribeCov::new(SUBSCRIBER, 5, av))
        .unwrap();
    h.drain();

    h.device
        .write_property(av, PropertyId::CovPeriod, Value::Unsigned(10))
        .unwrap();

    let mut periodic = 0;
    for _ in 0..30 {
        h.advance_secs(1);
        h.device.tick();
        periodic += h.drain().len();
    }
    assert_eq!(periodic, 3);

    // Clearing the period stops the notifications
    h.device
        .write_property(av, PropertyId::CovPeriod, Value::Unsigned(0))
        .unwrap();
    h.advance_secs(10);
    h.device.tick();
    assert!(h.drain().is_empty());
}
