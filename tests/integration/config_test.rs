use bacnet_events::{
    ChannelTransport, Config, Device, EventState, ObjectId, ObjectType, PropertyId, Value,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

const YAML: &str = r#"
device:
  instance: 2001
  name: Boiler Plant
  tick_interval_ms: 50

notification_classes:
  - instance: 1
    priority: [20, 20, 120]
    ack_required: [true, false, false]
    recipient_list:
      - recipient: { device: 9 }
        process_identifier: 7

objects:
  - id: analog-input:3
    name: Boiler Supply
    properties:
      present-value: { type: real, value: 95.0 }
    reporting:
      algorithm: { kind: out-of-range, high_limit: 90.0, low_limit: 40.0, deadband: 2.0 }
      notification_class: 1
  - id: binary-input:1
    name: Flame Fail
    reporting:
      algorithm:
        kind: change-of-state
        alarm_values:
          - { type: enumerated, value: 1 }
      notification_class: 1
      time_delay: 2

event_enrollments:
  - instance: 1
    name: Supply Watch
    reference:
      object: analog-input:3
      property: present-value
    algorithm: { kind: out-of-range, high_limit: 100.0, low_limit: 0.0 }
    notification_class: 1
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_device_from_config_file() {
    let file = write_config(YAML);
    let config = Config::from_file(file.path()).unwrap();

    let (transport, mut rx) = ChannelTransport::new();
    let device = Device::from_config(&config, Arc::new(transport)).unwrap();

    let ai = ObjectId::new(ObjectType::AnalogInput, 3);
    let bi = ObjectId::new(ObjectType::BinaryInput, 1);
    let ee = ObjectId::new(ObjectType::EventEnrollment, 1);
    let nc = ObjectId::new(ObjectType::NotificationClass, 1);

    assert_eq!(device.instance(), 2001);
    assert_eq!(device.objects().len(), 5);
    assert!(device.objects().contains(nc));

    // Seeded from the configured value without a notification
    assert_eq!(device.current_event_state(ai), Some(EventState::HighLimit));
    assert_eq!(device.current_event_state(bi), Some(EventState::Normal));
    assert_eq!(device.current_event_state(ee), Some(EventState::Normal));
    assert!(rx.try_recv().is_err());

    assert_eq!(
        device.read_property(ai, PropertyId::TimeDelay),
        Ok(Value::Unsigned(0))
    );
    assert_eq!(
        device.read_property(nc, PropertyId::Priority),
        Ok(Value::List(vec![
            Value::Unsigned(20),
            Value::Unsigned(20),
            Value::Unsigned(120)
        ]))
    );
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Config::from_file(dir.path().join("absent.yaml"));
    assert!(matches!(result, Err(bacnet_events::BacnetError::Io(_))));
}

#[test]
fn test_invalid_config_rejected_by_device() {
    let file = write_config(
        r#"
device: { instance: 1, name: dev }
objects:
  - id: analog-value:1
    name: av
    reporting:
      algorithm: { kind: out-of-range, high_limit: 10.0, low_limit: 20.0 }
      notification_class: 1
"#,
    );
    let config = Config::from_file(file.path()).unwrap();
    let (transport, _rx) = ChannelTransport::new();
    assert!(matches!(
        Device::from_config(&config, Arc::new(transport)),
        Err(bacnet_events::BacnetError::Config(_))
    ));
}
