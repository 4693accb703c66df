use bacnet_events::algorithms::{ChangeOfState, EventAlgorithm, MonitoredSnapshot, OutOfRange};
use bacnet_events::buffer::{records_between, BufferReadyCounters};
use bacnet_events::cov::CovEngine;
use bacnet_events::state_machine::EventStateMachine;
use bacnet_events::{
    AlarmConfig, BacnetObject, Clock, EventState, ManualClock, ObjectId, ObjectType, PropertyId,
    Recipient, ReportingParameters, SubscribeCov, Value,
};
use proptest::prelude::*;
use std::time::Duration;

const AV: ObjectId = ObjectId::new(ObjectType::AnalogValue, 1);

fn range_config(time_delay: u32) -> AlarmConfig {
    AlarmConfig::new(
        EventAlgorithm::OutOfRange(OutOfRange {
            high_limit: 50.0,
            low_limit: 30.0,
            deadband: 5.0,
        }),
        ReportingParameters::new(1).with_time_delay(time_delay),
    )
}

fn snapshot(value: f64) -> MonitoredSnapshot {
    MonitoredSnapshot::new(Value::Real(value))
}

proptest! {
    #[test]
    fn test_records_between_counts_appends(start in any::<u32>(), appended in 0u32..2000) {
        let mut counters = BufferReadyCounters::new(100);
        counters.total_record_count = start;
        for _ in 0..appended {
            counters.append();
        }
        if appended > 0 {
            prop_assert_ne!(counters.total_record_count, 0);
        }
        prop_assert_eq!(records_between(start, counters.total_record_count), appended);
        prop_assert!(counters.record_count <= counters.buffer_size);
    }

    #[test]
    fn test_evaluation_is_idempotent(values in prop::collection::vec(0.0f64..80.0, 1..50)) {
        let clock = ManualClock::default();
        let mut machine =
            EventStateMachine::new(AV, range_config(0), &snapshot(40.0), true).unwrap();

        for value in values {
            machine.evaluate(&snapshot(value), clock.now());
            let state = machine.state();
            let stamps = machine.event_time_stamps();

            clock.advance(Duration::from_secs(1));
            let again = machine.evaluate(&snapshot(value), clock.now());
            prop_assert!(again.is_empty());
            prop_assert_eq!(machine.state(), state);
            prop_assert_eq!(machine.event_time_stamps(), stamps);
        }
    }

    #[test]
    fn test_repeated_writes_cannot_postpone_commit(
        values in prop::collection::vec(0.0f64..29.0, 1..20),
        gaps in prop::collection::vec(1u64..3, 1..20),
    ) {
        let clock = ManualClock::default();
        let start = clock.now();
        let mut machine =
            EventStateMachine::new(AV, range_config(10), &snapshot(40.0), true).unwrap();

        let first = machine.evaluate(&snapshot(values[0]), start);
        prop_assert_eq!(first.deadline, Some(start + chrono::Duration::seconds(10)));

        let mut elapsed = 0;
        for (value, gap) in values.iter().zip(gaps.iter()) {
            if elapsed + gap >= 10 {
                break;
            }
            elapsed += gap;
            clock.advance(Duration::from_secs(*gap));
            let step = machine.evaluate(&snapshot(*value), clock.now());
            prop_assert!(step.transitions.is_empty());
            prop_assert_eq!(step.deadline, None);
        }

        let step = machine.evaluate(
            &snapshot(values[0]),
            start + chrono::Duration::seconds(10),
        );
        prop_assert_eq!(step.transitions.len(), 1);
        prop_assert_eq!(step.transitions[0].to, EventState::LowLimit);
    }

    #[test]
    fn test_changing_alarm_values_cannot_postpone_commit(
        values in prop::collection::vec(2u64..6, 1..20),
        gaps in prop::collection::vec(1u64..3, 1..20),
    ) {
        let clock = ManualClock::default();
        let start = clock.now();
        let config = AlarmConfig::new(
            EventAlgorithm::ChangeOfState(ChangeOfState {
                alarm_values: (2..6).map(Value::Unsigned).collect(),
            }),
            ReportingParameters::new(1).with_time_delay(10),
        );
        let mut machine = EventStateMachine::new(
            AV,
            config,
            &MonitoredSnapshot::new(Value::Unsigned(1)),
            true,
        )
        .unwrap();

        let first = machine.evaluate(&MonitoredSnapshot::new(Value::Unsigned(values[0])), start);
        prop_assert_eq!(first.deadline, Some(start + chrono::Duration::seconds(10)));

        let mut elapsed = 0;
        let mut last = values[0];
        for (value, gap) in values.iter().zip(gaps.iter()) {
            if elapsed + gap >= 10 {
                break;
            }
            elapsed += gap;
            clock.advance(Duration::from_secs(*gap));
            let step = machine.evaluate(&MonitoredSnapshot::new(Value::Unsigned(*value)), clock.now());
            prop_assert!(step.is_empty());
            last = *value;
        }

        let step = machine.evaluate(
            &MonitoredSnapshot::new(Value::Unsigned(last)),
            start + chrono::Duration::seconds(10),
        );
        prop_assert_eq!(step.transitions.len(), 1);
        prop_assert_eq!(step.transitions[0].to, EventState::Offnormal);
    }

    #[test]
    fn test_cov_increment_is_cumulative(
        steps in prop::collection::vec(-0.6f64..0.6, 1..40),
        increment in 0.5f64..2.0,
    ) {
        let clock = ManualClock::default();
        let mut engine = CovEngine::new(100);
        let mut object = BacnetObject::new(AV, "av")
            .with_property(PropertyId::PresentValue, Value::Real(20.0))
            .with_property(PropertyId::CovIncrement, Value::Real(increment));
        engine
            .subscribe(&SubscribeCov::new(Recipient::Device(1), 1, AV), &object, clock.now())
            .unwrap();

        let mut baseline = 20.0;
        let mut current = 20.0;
        for step in steps {
            current += step;
            object.set(PropertyId::PresentValue, Value::Real(current));
            let sent = engine.on_property_changed(&object, PropertyId::PresentValue, clock.now());

            let expected = (current - baseline).abs() >= increment && current != baseline;
            prop_assert_eq!(sent.len(), usize::from(expected));
            if expected {
                baseline = current;
            }
        }
    }
}
