use crate::{Harness, DEVICE};
use bacnet_events::algorithms::{BufferReady, EventAlgorithm, EventValues, OutOfRange};
use bacnet_events::enrollment::AlgorithmicReporting;
use bacnet_events::error::{ConfigError, ReadError};
use bacnet_events::types::DeviceObjectPropertyReference;
use bacnet_events::{
    BacnetObject, EventState, ObjectId, ObjectType, PropertyId, PropertyReader, Reliability,
    ReportingParameters, Value,
};
use mockall::mock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

mock! {
    pub Peer {}
    impl PropertyReader for Peer {
        fn read_property(
            &self,
            reference: &DeviceObjectPropertyReference,
        ) -> std::result::Result<Value, ReadError>;
    }
}

const AV: ObjectId = ObjectId::new(ObjectType::AnalogValue, 1);
const EE: ObjectId = ObjectId::new(ObjectType::EventEnrollment, 1);

fn range() -> EventAlgorithm {
    EventAlgorithm::OutOfRange(OutOfRange {
        high_limit: 60.0,
        low_limit: 10.0,
        deadband: 2.0,
    })
}

fn local_watch() -> Harness {
    let h = Harness::new();
    h.device
        .create_object(BacnetObject::new(AV, "av").with_property(PropertyId::PresentValue, Value::Real(20.0)))
        .unwrap();
    h.device.create_object(BacnetObject::new(EE, "watch")).unwrap();
    h.device
        .configure_algorithmic_reporting(
            EE,
            AlgorithmicReporting::new(
                DeviceObjectPropertyReference::local(AV, PropertyId::PresentValue),
                range(),
                ReportingParameters::new(1),
            )
            .with_poll_interval(Duration::from_secs(5)),
        )
        .unwrap();
    h
}

#[test]
fn test_local_write_evaluates_out_of_cycle() {
    let mut h = local_watch();
    assert!(h.drain().is_empty());

    h.device
        .write_property(AV, PropertyId::PresentValue, Value::Real(70.0))
        .unwrap();

    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    let event = deliveries[0].as_event().unwrap();
    assert_eq!(event.event_object, EE);
    assert_eq!(event.initiating_device, DEVICE);
    assert_eq!(event.to_state, EventState::HighLimit);
    assert_eq!(h.device.current_event_state(EE), Some(EventState::HighLimit));
    assert_eq!(h.device.current_event_state(AV), Some(EventState::Normal));
    assert_eq!(
        h.device.read_property(EE, PropertyId::ObjectPropertyReference),
        Ok(Value::Reference(DeviceObjectPropertyReference::local(AV, PropertyId::PresentValue)))
    );
}

#[test]
fn test_deleted_reference_faults_on_next_poll() {
    let mut h = local_watch();
    h.device.delete_object(AV).unwrap();

    h.advance_secs(5);
    h.device.tick();

    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].as_event().unwrap().to_state, EventState::Fault);
    assert_eq!(
        h.device.read_property(EE, PropertyId::Reliability),
        Ok(Reliability::ConfigurationError.into())
    );
}

#[test]
fn test_enrollment_type_is_checked() {
    let h = Harness::new();
    h.device
        .create_object(BacnetObject::new(AV, "av").with_property(PropertyId::PresentValue, Value::Real(20.0)))
        .unwrap();
    let result = h.device.configure_algorithmic_reporting(
        AV,
        AlgorithmicReporting::new(
            DeviceObjectPropertyReference::local(AV, PropertyId::PresentValue),
            range(),
            ReportingParameters::new(1),
        ),
    );
    assert!(matches!(result, Err(ConfigError::UnsupportedAlgorithm { .. })));
}

#[test]
fn test_remote_value_polled_through_reader() {
    let (transport, mut rx) = bacnet_events::ChannelTransport::new();
    let clock = bacnet_events::ManualClock::default();
    let reading = Arc::new(AtomicU32::new(20));

    let mut peer = MockPeer::new();
    let source = Arc::clone(&reading);
    peer.expect_read_property().returning(move |reference| match reference.property {
        PropertyId::PresentValue => Ok(Value::Real(f64::from(source.load(Ordering::SeqCst)))),
        _ => Err(ReadError::Timeout),
    });

    let device = bacnet_events::Device::new(DEVICE, "remote", Arc::new(transport))
        .with_clock(Arc::new(clock.clone()))
        .with_property_reader(Arc::new(peer));
    device.add_notification_class(
        bacnet_events::NotificationClass::new(1, [1, 2, 3])
            .with_recipient(bacnet_events::Destination::new(crate::OPERATOR, 1)),
    );
    device.create_object(BacnetObject::new(EE, "remote watch")).unwrap();
    device
        .configure_algorithmic_reporting(
            EE,
            AlgorithmicReporting::new(
                DeviceObjectPropertyReference::remote(7, AV, PropertyId::PresentValue),
                range(),
                ReportingParameters::new(1),
            ),
        )
        .unwrap();

    reading.store(5, Ordering::SeqCst);
    clock.advance(Duration::from_millis(999));
    device.tick();
    assert!(rx.try_recv().is_err());

    clock.advance(Duration::from_millis(1));
    device.tick();
    let delivery = rx.try_recv().unwrap();
    assert_eq!(delivery.as_event().unwrap().to_state, EventState::LowLimit);
}

#[test]
fn test_buffer_ready_across_wrap() {
    let (transport, mut rx) = bacnet_events::ChannelTransport::new();
    let clock = bacnet_events::ManualClock::default();
    let total = Arc::new(AtomicU32::new(0xFFFF_FFFD));
    let log = ObjectId::new(ObjectType::TrendLog, 4);

    let mut peer = MockPeer::new();
    let source = Arc::clone(&total);
    peer.expect_read_property().returning(move |reference| match reference.property {
        PropertyId::TotalRecordCount => Ok(Value::Unsigned(u64::from(source.load(Ordering::SeqCst)))),
        _ => Err(ReadError::Timeout),
    });

    let device = bacnet_events::Device::new(DEVICE, "logger", Arc::new(transport))
        .with_clock(Arc::new(clock.clone()))
        .with_property_reader(Arc::new(peer));
    device.add_notification_class(
        bacnet_events::NotificationClass::new(1, [1, 2, 3])
            .with_recipient(bacnet_events::Destination::new(crate::OPERATOR, 1)),
    );
    device.create_object(BacnetObject::new(EE, "log watch")).unwrap();
    device
        .configure_algorithmic_reporting(
            EE,
            AlgorithmicReporting::new(
                DeviceObjectPropertyReference::remote(7, log, PropertyId::TotalRecordCount),
                EventAlgorithm::BufferReady(BufferReady { notification_threshold: 5 }),
                ReportingParameters::new(1),
            ),
        )
        .unwrap();

    // FFFFFFFE, FFFFFFFF, 1, 2
    total.store(2, Ordering::SeqCst);
    clock.advance(Duration::from_secs(1));
    device.tick();
    assert!(rx.try_recv().is_err());

    total.store(3, Ordering::SeqCst);
    clock.advance(Duration::from_secs(1));
    device.tick();
    let delivery = rx.try_recv().unwrap();
    let event = delivery.as_event().unwrap();
    assert_eq!(event.from_state, EventState::Normal);
    assert_eq!(event.to_state, EventState::Normal);
    match event.event_values.as_ref().unwrap() {
        EventValues::BufferReady {
            buffer_property,
            previous_notification,
            current_notification,
        } => {
            assert_eq!(*previous_notification, 0xFFFF_FFFD);
            assert_eq!(*current_notification, 3);
            assert_eq!(
                *buffer_property,
                Some(DeviceObjectPropertyReference::remote(7, log, PropertyId::LogBuffer))
            );
        }
        other => panic!("unexpected event values {:?}", other),
    }

    // Counting restarts at the notified total
    total.store(7, Ordering::SeqCst);
    clock.advance(Duration::from_secs(1));
    device.tick();
    assert!(rx.try_recv().is_err());
}
