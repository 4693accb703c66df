use crate::{Harness, OPERATOR};
use bacnet_events::algorithms::{
    ChangeOfLifeSafety, ChangeOfState, CommandFailure, EventAlgorithm, EventValues, OutOfRange,
};
use bacnet_events::enrollment::IntrinsicReporting;
use bacnet_events::error::AckError;
use bacnet_events::types::{EventTransitionBits, EventType, NotifyType};
use bacnet_events::{
    BacnetObject, EventState, ObjectId, ObjectType, PropertyId, Reliability, ReportingParameters,
    TransitionKind, Value,
};

const AI: ObjectId = ObjectId::new(ObjectType::AnalogInput, 1);

fn limits() -> EventAlgorithm {
    EventAlgorithm::OutOfRange(OutOfRange {
        high_limit: 50.0,
        low_limit: 30.0,
        deadband: 5.0,
    })
}

/// Analog input at 40.0 with limits 30..50 and a 3 s time delay
fn monitored() -> Harness {
    let mut harness = Harness::new();
    harness
        .device
        .create_object(BacnetObject::new(AI, "Supply Air Temp").with_property(PropertyId::PresentValue, Value::Real(40.0)))
        .unwrap();
    harness
        .device
        .configure_intrinsic_reporting(
            AI,
            IntrinsicReporting::new(limits(), ReportingParameters::new(1).with_time_delay(3)),
        )
        .unwrap();
    assert!(harness.drain().is_empty());
    harness
}

#[test]
fn test_low_limit_after_time_delay() {
    let mut h = monitored();

    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(28.0))
        .unwrap();
    assert!(h.drain().is_empty());
    assert_eq!(h.device.current_event_state(AI), Some(EventState::Normal));

    h.advance_secs(2);
    h.device.tick();
    assert!(h.drain().is_empty());

    h.advance_secs(1);
    h.device.tick();
    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].recipient(), &OPERATOR);

    let event = deliveries[0].as_event().unwrap();
    assert_eq!(event.event_object, AI);
    assert_eq!(event.from_state, EventState::Normal);
    assert_eq!(event.to_state, EventState::LowLimit);
    assert_eq!(event.priority, 10);
    assert_eq!(event.event_type, EventType::OutOfRange);
    assert_eq!(event.process_identifier, 42);

    match event.event_values.as_ref().unwrap() {
        EventValues::OutOfRange {
            exceeding_value,
            status_flags,
            deadband,
            exceeded_limit,
        } => {
            assert_eq!(*exceeding_value, 28.0);
            assert!(status_flags.in_alarm);
            assert_eq!(*deadband, 5.0);
            assert_eq!(*exceeded_limit, 30.0);
        }
        other => panic!("unexpected event values {:?}", other),
    }

    assert_eq!(h.device.current_event_state(AI), Some(EventState::LowLimit));
    assert_eq!(
        h.device.read_property(AI, PropertyId::EventState),
        Ok(EventState::LowLimit.into())
    );
    assert_eq!(
        h.device.read_property(AI, PropertyId::StatusFlags),
        Ok(Value::BitString(vec![true, false, false, false]))
    );
}

#[test]
fn test_brief_excursion_does_not_notify() {
    let mut h = monitored();

    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(28.0))
        .unwrap();
    h.advance_secs(2);
    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(40.0))
        .unwrap();
    h.advance_secs(5);
    h.device.tick();

    assert!(h.drain().is_empty());
    assert_eq!(h.device.current_event_state(AI), Some(EventState::Normal));
}

#[test]
fn test_deadband_holds_alarm() {
    let mut h = monitored();
    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(28.0))
        .unwrap();
    h.advance_secs(3);
    h.device.tick();
    h.drain();

    // Inside the limit but within the deadband
    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(33.0))
        .unwrap();
    h.advance_secs(10);
    h.device.tick();
    assert!(h.drain().is_empty());
    assert_eq!(h.device.current_event_state(AI), Some(EventState::LowLimit));

    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(36.0))
        .unwrap();
    h.advance_secs(3);
    h.device.tick();
    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    let event = deliveries[0].as_event().unwrap();
    assert_eq!(event.to_state, EventState::Normal);
    assert_eq!(event.priority, 200);
}

#[test]
fn test_disabling_low_limit_returns_to_normal_at_once() {
    let mut h = monitored();
    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(28.0))
        .unwrap();
    h.advance_secs(3);
    h.device.tick();
    h.drain();

    h.device
        .write_property(AI, PropertyId::LimitEnable, Value::BitString(vec![false, true]))
        .unwrap();

    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    let event = deliveries[0].as_event().unwrap();
    assert_eq!(event.from_state, EventState::LowLimit);
    assert_eq!(event.to_state, EventState::Normal);
    assert_eq!(
        h.device.read_property(AI, PropertyId::LimitEnable),
        Ok(Value::BitString(vec![false, true]))
    );
}

#[test]
fn test_configuring_in_alarm_is_silent() {
    let mut h = Harness::new();
    h.device
        .create_object(BacnetObject::new(AI, "ai").with_property(PropertyId::PresentValue, Value::Real(60.0)))
        .unwrap();
    h.device
        .configure_intrinsic_reporting(AI, IntrinsicReporting::new(limits(), ReportingParameters::new(1)))
        .unwrap();

    assert_eq!(h.device.current_event_state(AI), Some(EventState::HighLimit));
    assert!(h.drain().is_empty());
}

#[test]
fn test_fault_takes_precedence() {
    let mut h = monitored();

    h.device
        .write_property(AI, PropertyId::Reliability, Reliability::OverRange.into())
        .unwrap();
    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    let event = deliveries[0].as_event().unwrap();
    assert_eq!(event.to_state, EventState::Fault);
    assert_eq!(event.event_type, EventType::ChangeOfReliability);
    assert_eq!(event.priority, 50);

    // The value leaves the range while faulted: nothing is reported
    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(28.0))
        .unwrap();
    h.advance_secs(5);
    h.device.tick();
    assert!(h.drain().is_empty());
    assert_eq!(h.device.current_event_state(AI), Some(EventState::Fault));

    h.device
        .write_property(AI, PropertyId::Reliability, Reliability::NoFaultDetected.into())
        .unwrap();
    let states: Vec<_> = h
        .drain()
        .iter()
        .filter_map(|d| d.as_event())
        .map(|e| (e.from_state, e.to_state))
        .collect();
    assert_eq!(
        states,
        vec![
            (EventState::Fault, EventState::Normal),
            (EventState::Normal, EventState::LowLimit),
        ]
    );
}

#[test]
fn test_event_enable_filters_notifications_only() {
    let mut h = Harness::new();
    h.device.create_object(BacnetObject::new(AI, "ai")).unwrap();
    h.device
        .configure_intrinsic_reporting(
            AI,
            IntrinsicReporting::new(
                limits(),
                ReportingParameters::new(1).with_event_enable(EventTransitionBits([false, true, true])),
            ),
        )
        .unwrap();
    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(60.0))
        .unwrap();

    assert!(h.drain().is_empty());
    assert_eq!(h.device.current_event_state(AI), Some(EventState::HighLimit));
    assert!(h
        .device
        .event_time_stamps(AI)
        .unwrap()
        .get(TransitionKind::ToOffnormal)
        .is_some());
}

#[test]
fn test_acknowledge_alarm() {
    let mut h = Harness::new();
    h.device.add_notification_class(
        bacnet_events::NotificationClass::new(2, [5, 6, 7])
            .with_ack_required(EventTransitionBits::ALL)
            .with_recipient(bacnet_events::Destination::new(OPERATOR, 1)),
    );
    h.device.create_object(BacnetObject::new(AI, "ai")).unwrap();
    h.device
        .configure_intrinsic_reporting(AI, IntrinsicReporting::new(limits(), ReportingParameters::new(2)))
        .unwrap();

    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(60.0))
        .unwrap();
    let deliveries = h.drain();
    assert!(deliveries[0].as_event().unwrap().ack_required);

    let acked = h.device.acked_transitions(AI).unwrap();
    assert!(!acked.get(TransitionKind::ToOffnormal));

    let summaries = h.device.event_information();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].object, AI);
    assert_eq!(summaries[0].event_state, EventState::HighLimit);
    assert_eq!(summaries[0].event_priorities, [5, 6, 7]);

    let stamp = h
        .device
        .event_time_stamps(AI)
        .unwrap()
        .get(TransitionKind::ToOffnormal)
        .unwrap();
    assert_eq!(
        h.device.acknowledge_alarm(AI, TransitionKind::ToOffnormal, stamp + chrono::Duration::seconds(1)),
        Err(AckError::InvalidTimeStamp { object: AI })
    );

    h.device
        .acknowledge_alarm(AI, TransitionKind::ToOffnormal, stamp)
        .unwrap();
    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    let ack = deliveries[0].as_event().unwrap();
    assert_eq!(ack.notify_type, NotifyType::AckNotification);
    assert_eq!(ack.to_state, EventState::HighLimit);
    assert!(ack.event_values.is_none());

    // A repeated acknowledgment is accepted without a second notification
    h.device
        .acknowledge_alarm(AI, TransitionKind::ToOffnormal, stamp)
        .unwrap();
    assert!(h.drain().is_empty());
    assert!(h.device.acked_transitions(AI).unwrap().is_all());
}

#[test]
fn test_unknown_class_drops_notification() {
    let mut h = Harness::new();
    h.device.create_object(BacnetObject::new(AI, "ai")).unwrap();
    h.device
        .configure_intrinsic_reporting(AI, IntrinsicReporting::new(limits(), ReportingParameters::new(77)))
        .unwrap();
    h.device
        .write_property(AI, PropertyId::PresentValue, Value::Real(60.0))
        .unwrap();

    assert!(h.drain().is_empty());
    assert_eq!(h.device.current_event_state(AI), Some(EventState::HighLimit));
    assert_eq!(h.device.stats().dropped_notifications, 1);
}

#[test]
fn test_alternating_alarm_values_still_commit() {
    let mut h = Harness::new();
    let msv = ObjectId::new(ObjectType::MultiStateValue, 1);
    h.device
        .create_object(BacnetObject::new(msv, "Pump Mode").with_property(PropertyId::PresentValue, Value::Unsigned(1)))
        .unwrap();
    h.device
        .configure_intrinsic_reporting(
            msv,
            IntrinsicReporting::new(
                EventAlgorithm::ChangeOfState(ChangeOfState {
                    alarm_values: vec![Value::Unsigned(2), Value::Unsigned(3)],
                }),
                ReportingParameters::new(1).with_time_delay(3),
            ),
        )
        .unwrap();

    // One second apart, never leaving the alarm values
    for (i, value) in [2, 3, 2].into_iter().enumerate() {
        if i > 0 {
            h.advance_secs(1);
            h.device.tick();
        }
        h.device
            .write_property(msv, PropertyId::PresentValue, Value::Unsigned(value))
            .unwrap();
        assert_eq!(h.device.current_event_state(msv), Some(EventState::Normal));
    }
    assert!(h.drain().is_empty());

    // Three seconds after the first alarm value
    h.advance_secs(1);
    h.device.tick();
    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    let event = deliveries[0].as_event().unwrap();
    assert_eq!(event.to_state, EventState::Offnormal);
    match event.event_values.as_ref().unwrap() {
        EventValues::ChangeOfState { new_state, .. } => assert_eq!(*new_state, Value::Unsigned(2)),
        other => panic!("unexpected event values {:?}", other),
    }
    assert_eq!(h.device.current_event_state(msv), Some(EventState::Offnormal));
}

#[test]
fn test_life_safety_mode_write_notifies_at_once() {
    let mut h = Harness::new();
    let point = ObjectId::new(ObjectType::LifeSafetyPoint, 1);
    h.device
        .create_object(
            BacnetObject::new(point, "Smoke Detector")
                .with_property(PropertyId::PresentValue, Value::Enumerated(2))
                .with_property(PropertyId::Mode, Value::Enumerated(1)),
        )
        .unwrap();
    h.device
        .configure_intrinsic_reporting(
            point,
            IntrinsicReporting::new(
                EventAlgorithm::ChangeOfLifeSafety(ChangeOfLifeSafety {
                    alarm_values: vec![1],
                    life_safety_alarm_values: vec![2],
                    mode_reference: None,
                }),
                ReportingParameters::new(1).with_time_delay(30),
            ),
        )
        .unwrap();
    assert!(h.drain().is_empty());
    assert_eq!(h.device.current_event_state(point), Some(EventState::LifeSafetyAlarm));

    h.device
        .write_property(point, PropertyId::Mode, Value::Enumerated(3))
        .unwrap();
    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    let event = deliveries[0].as_event().unwrap();
    assert_eq!(event.event_type, EventType::ChangeOfLifeSafety);
    assert_eq!(event.from_state, EventState::LifeSafetyAlarm);
    assert_eq!(event.to_state, EventState::LifeSafetyAlarm);
    match event.event_values.as_ref().unwrap() {
        EventValues::ChangeOfLifeSafety { new_state, new_mode, .. } => {
            assert_eq!(*new_state, 2);
            assert_eq!(*new_mode, 3);
        }
        other => panic!("unexpected event values {:?}", other),
    }

    // A state change without a mode change waits for the time delay
    h.device
        .write_property(point, PropertyId::PresentValue, Value::Enumerated(1))
        .unwrap();
    assert!(h.drain().is_empty());
    h.advance_secs(30);
    h.device.tick();
    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].as_event().unwrap().to_state, EventState::Offnormal);
}

#[test]
fn test_feedback_mismatch_raises_command_failure() {
    let mut h = Harness::new();
    let bo = ObjectId::new(ObjectType::BinaryOutput, 1);
    h.device
        .create_object(
            BacnetObject::new(bo, "Fan Start")
                .with_property(PropertyId::PresentValue, Value::Enumerated(1))
                .with_property(PropertyId::FeedbackValue, Value::Enumerated(1)),
        )
        .unwrap();
    h.device
        .configure_intrinsic_reporting(
            bo,
            IntrinsicReporting::new(
                EventAlgorithm::CommandFailure(CommandFailure::default()),
                ReportingParameters::new(1).with_time_delay(2),
            ),
        )
        .unwrap();

    h.device
        .write_property(bo, PropertyId::FeedbackValue, Value::Enumerated(0))
        .unwrap();
    assert!(h.drain().is_empty());

    h.advance_secs(2);
    h.device.tick();
    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    let event = deliveries[0].as_event().unwrap();
    assert_eq!(event.event_type, EventType::CommandFailure);
    assert_eq!(event.to_state, EventState::Offnormal);
    match event.event_values.as_ref().unwrap() {
        EventValues::CommandFailure {
            command_value,
            feedback_value,
            status_flags,
        } => {
            assert_eq!(*command_value, Value::Enumerated(1));
            assert_eq!(*feedback_value, Value::Enumerated(0));
            assert!(status_flags.in_alarm);
        }
        other => panic!("unexpected event values {:?}", other),
    }

    // Feedback catching up returns to normal after the delay
    h.device
        .write_property(bo, PropertyId::FeedbackValue, Value::Enumerated(1))
        .unwrap();
    h.advance_secs(2);
    h.device.tick();
    let deliveries = h.drain();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].as_event().unwrap().to_state, EventState::Normal);
}
