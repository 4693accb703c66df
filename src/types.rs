// src/types.rs - BACnet identifiers, enumerations and bit sets
//
// These are the primitive vocabulary of the event core. Enumerations carry
// their standard numeric codes so they can round-trip through
// `Value::Enumerated` properties on the object database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declares a BACnet enumeration with its numeric code and kebab-case name.
macro_rules! enumerated {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($(#[$vmeta:meta])* $variant:ident = $code:literal => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "kebab-case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Standard numeric code
            pub fn code(self) -> u32 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            /// Look up a variant by its numeric code
            pub fn from_code(code: u32) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Kebab-case name as used in configuration files
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {}: '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

// ============================================================================
// OBJECT IDENTIFIERS
// ============================================================================

enumerated! {
    /// Object types the event core knows how to monitor
    pub enum ObjectType {
        AnalogInput = 0 => "analog-input",
        AnalogOutput = 1 => "analog-output",
        AnalogValue = 2 => "analog-value",
        BinaryInput = 3 => "binary-input",
        BinaryOutput = 4 => "binary-output",
        BinaryValue = 5 => "binary-value",
        Device = 8 => "device",
        EventEnrollment = 9 => "event-enrollment",
        Loop = 12 => "loop",
        MultiStateInput = 13 => "multi-state-input",
        MultiStateOutput = 14 => "multi-state-output",
        NotificationClass = 15 => "notification-class",
        MultiStateValue = 19 => "multi-state-value",
        TrendLog = 20 => "trend-log",
        LifeSafetyPoint = 21 => "life-safety-point",
        LifeSafetyZone = 22 => "life-safety-zone",
        Accumulator = 23 => "accumulator",
        PulseConverter = 24 => "pulse-converter",
        EventLog = 25 => "event-log",
        TrendLogMultiple = 27 => "trend-log-multiple",
        BitStringValue = 39 => "bitstring-value",
        CharacterStringValue = 40 => "characterstring-value",
        IntegerValue = 45 => "integer-value",
        LargeAnalogValue = 46 => "large-analog-value",
        PositiveIntegerValue = 48 => "positive-integer-value",
    }
}

impl ObjectType {
    /// Objects whose present value is a real number
    pub fn is_analog(self) -> bool {
        matches!(
            self,
            ObjectType::AnalogInput
                | ObjectType::AnalogOutput
                | ObjectType::AnalogValue
                | ObjectType::LargeAnalogValue
                | ObjectType::IntegerValue
                | ObjectType::PositiveIntegerValue
                | ObjectType::Accumulator
                | ObjectType::PulseConverter
                | ObjectType::Loop
        )
    }

    /// Objects with a commandable output and a feedback value
    pub fn is_commandable_output(self) -> bool {
        matches!(
            self,
            ObjectType::BinaryOutput | ObjectType::MultiStateOutput | ObjectType::AnalogOutput
        )
    }

    pub fn is_life_safety(self) -> bool {
        matches!(self, ObjectType::LifeSafetyPoint | ObjectType::LifeSafetyZone)
    }

    /// Log-like objects maintaining a record buffer
    pub fn is_log(self) -> bool {
        matches!(
            self,
            ObjectType::TrendLog | ObjectType::EventLog | ObjectType::TrendLogMultiple
        )
    }
}

/// BACnet object identifier: type plus 22-bit instance number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId {
    pub object_type: ObjectType,
    pub instance: u32,
}

impl ObjectId {
    /// Largest valid instance number
    pub const MAX_INSTANCE: u32 = 0x3F_FFFF;

    pub const fn new(object_type: ObjectType, instance: u32) -> Self {
        Self { object_type, instance }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.instance)
    }
}

impl FromStr for ObjectId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (kind, instance) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("object identifier '{}' must be 'type:instance'", s))?;
        let object_type = kind.trim().parse::<ObjectType>()?;
        let instance = instance
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid instance in '{}': {}", s, e))?;
        if instance > Self::MAX_INSTANCE {
            return Err(format!("instance {} exceeds {}", instance, Self::MAX_INSTANCE));
        }
        Ok(ObjectId::new(object_type, instance))
    }
}

impl TryFrom<String> for ObjectId {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.to_string()
    }
}

enumerated! {
    /// Property identifiers used by the event and COV machinery
    pub enum PropertyId {
        AckedTransitions = 0 => "acked-transitions",
        AckRequired = 1 => "ack-required",
        CovIncrement = 22 => "cov-increment",
        Deadband = 25 => "deadband",
        EventEnable = 35 => "event-enable",
        EventState = 36 => "event-state",
        EventType = 37 => "event-type",
        FeedbackValue = 40 => "feedback-value",
        HighLimit = 45 => "high-limit",
        LimitEnable = 52 => "limit-enable",
        LowLimit = 59 => "low-limit",
        NotificationClass = 17 => "notification-class",
        NotifyType = 72 => "notify-type",
        ObjectIdentifier = 75 => "object-identifier",
        ObjectName = 77 => "object-name",
        ObjectPropertyReference = 78 => "object-property-reference",
        ObjectType = 79 => "object-type",
        OutOfService = 81 => "out-of-service",
        PresentValue = 85 => "present-value",
        Priority = 86 => "priority",
        RecipientList = 102 => "recipient-list",
        Reliability = 103 => "reliability",
        Setpoint = 108 => "setpoint",
        StatusFlags = 111 => "status-flags",
        TimeDelay = 113 => "time-delay",
        EventTimeStamps = 130 => "event-time-stamps",
        LogBuffer = 131 => "log-buffer",
        RecordCount = 141 => "record-count",
        BufferSize = 126 => "buffer-size",
        NotificationThreshold = 137 => "notification-threshold",
        RecordsSinceNotification = 140 => "records-since-notification",
        LastNotifyRecord = 173 => "last-notify-record",
        TotalRecordCount = 145 => "total-record-count",
        Mode = 160 => "mode",
        OperationExpected = 161 => "operation-expected",
        LifeSafetyAlarmValues = 166 => "life-safety-alarm-values",
        AlarmValues = 7 => "alarm-values",
        FaultValues = 39 => "fault-values",
        BitMask = 342 => "bit-mask",
        ErrorLimit = 34 => "error-limit",
        CovPeriod = 180 => "cov-period",
        EventMessageTexts = 351 => "event-message-texts",
        EventDetectionEnable = 353 => "event-detection-enable",
        EventAlgorithmInhibit = 354 => "event-algorithm-inhibit",
        TimeDelayNormal = 356 => "time-delay-normal",
    }
}

/// Reference to a property of a (possibly remote) object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceObjectPropertyReference {
    /// Owning device instance; `None` means the local device
    #[serde(default)]
    pub device: Option<u32>,
    pub object: ObjectId,
    pub property: PropertyId,
}

impl DeviceObjectPropertyReference {
    pub fn local(object: ObjectId, property: PropertyId) -> Self {
        Self { device: None, object, property }
    }

    pub fn remote(device: u32, object: ObjectId, property: PropertyId) -> Self {
        Self { device: Some(device), object, property }
    }
}

impl fmt::Display for DeviceObjectPropertyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device {
            Some(device) => write!(f, "device:{}/{}/{}", device, self.object, self.property),
            None => write!(f, "{}/{}", self.object, self.property),
        }
    }
}

// ============================================================================
// EVENT STATES AND TRANSITIONS
// ============================================================================

enumerated! {
    /// Event state of a monitored object
    pub enum EventState {
        Normal = 0 => "normal",
        Fault = 1 => "fault",
        Offnormal = 2 => "offnormal",
        HighLimit = 3 => "high-limit",
        LowLimit = 4 => "low-limit",
        LifeSafetyAlarm = 5 => "life-safety-alarm",
    }
}

impl Default for EventState {
    fn default() -> Self {
        EventState::Normal
    }
}

impl EventState {
    /// Offnormal or one of its specializations
    pub fn is_offnormal(self) -> bool {
        matches!(
            self,
            EventState::Offnormal
                | EventState::HighLimit
                | EventState::LowLimit
                | EventState::LifeSafetyAlarm
        )
    }

    pub fn transition_kind(self) -> TransitionKind {
        TransitionKind::of(self)
    }
}

/// The three transition slots used for priorities, timestamps and acks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionKind {
    ToOffnormal,
    ToFault,
    ToNormal,
}

impl TransitionKind {
    pub const ALL: [TransitionKind; 3] = [
        TransitionKind::ToOffnormal,
        TransitionKind::ToFault,
        TransitionKind::ToNormal,
    ];

    /// Slot the transition into `to` occupies
    pub fn of(to: EventState) -> Self {
        match to {
            EventState::Normal => TransitionKind::ToNormal,
            EventState::Fault => TransitionKind::ToFault,
            _ => TransitionKind::ToOffnormal,
        }
    }

    pub fn index(self) -> usize {
        match self {
            TransitionKind::ToOffnormal => 0,
            TransitionKind::ToFault => 1,
            TransitionKind::ToNormal => 2,
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransitionKind::ToOffnormal => "to-offnormal",
            TransitionKind::ToFault => "to-fault",
            TransitionKind::ToNormal => "to-normal",
        };
        f.write_str(text)
    }
}

/// One flag per [`TransitionKind`], ordered to-offnormal, to-fault, to-normal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventTransitionBits(pub [bool; 3]);

impl EventTransitionBits {
    pub const ALL: EventTransitionBits = EventTransitionBits([true; 3]);
    pub const NONE: EventTransitionBits = EventTransitionBits([false; 3]);

    pub fn get(&self, kind: TransitionKind) -> bool {
        self.0[kind.index()]
    }

    pub fn set(&mut self, kind: TransitionKind, value: bool) {
        self.0[kind.index()] = value;
    }

    pub fn is_all(&self) -> bool {
        self.0.iter().all(|b| *b)
    }
}

impl Default for EventTransitionBits {
    fn default() -> Self {
        Self::ALL
    }
}

/// Last commit time per transition kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventTimeStamps(pub [Option<DateTime<Utc>>; 3]);

impl EventTimeStamps {
    pub fn get(&self, kind: TransitionKind) -> Option<DateTime<Utc>> {
        self.0[kind.index()]
    }

    pub fn set(&mut self, kind: TransitionKind, at: DateTime<Utc>) {
        self.0[kind.index()] = Some(at);
    }
}

/// Message text per transition kind
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventMessageTexts(pub [Option<String>; 3]);

impl EventMessageTexts {
    pub fn get(&self, kind: TransitionKind) -> Option<&str> {
        self.0[kind.index()].as_deref()
    }
}

// ============================================================================
// FLAGS
// ============================================================================

/// Status flags carried in every notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StatusFlags {
    pub in_alarm: bool,
    pub fault: bool,
    pub overridden: bool,
    pub out_of_service: bool,
}

impl StatusFlags {
    pub fn to_bits(self) -> Vec<bool> {
        vec![self.in_alarm, self.fault, self.overridden, self.out_of_service]
    }

    pub fn from_bits(bits: &[bool]) -> Self {
        let bit = |i: usize| bits.get(i).copied().unwrap_or(false);
        Self {
            in_alarm: bit(0),
            fault: bit(1),
            overridden: bit(2),
            out_of_service: bit(3),
        }
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |b: bool| if b { '1' } else { '0' };
        write!(
            f,
            "{{{}{}{}{}}}",
            flag(self.in_alarm),
            flag(self.fault),
            flag(self.overridden),
            flag(self.out_of_service)
        )
    }
}

/// Which limits of an out-of-range algorithm are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LimitEnable {
    pub low_limit: bool,
    pub high_limit: bool,
}

impl LimitEnable {
    pub const BOTH: LimitEnable = LimitEnable { low_limit: true, high_limit: true };

    pub fn to_bits(self) -> Vec<bool> {
        vec![self.low_limit, self.high_limit]
    }

    pub fn from_bits(bits: &[bool]) -> Self {
        Self {
            low_limit: bits.first().copied().unwrap_or(false),
            high_limit: bits.get(1).copied().unwrap_or(false),
        }
    }
}

impl Default for LimitEnable {
    fn default() -> Self {
        Self::BOTH
    }
}

// ============================================================================
// ENUMERATIONS
// ============================================================================

enumerated! {
    /// Reliability of a monitored value
    pub enum Reliability {
        NoFaultDetected = 0 => "no-fault-detected",
        NoSensor = 1 => "no-sensor",
        OverRange = 2 => "over-range",
        UnderRange = 3 => "under-range",
        OpenLoop = 4 => "open-loop",
        ShortedLoop = 5 => "shorted-loop",
        NoOutput = 6 => "no-output",
        UnreliableOther = 7 => "unreliable-other",
        ProcessError = 8 => "process-error",
        MultiStateFault = 9 => "multi-state-fault",
        ConfigurationError = 10 => "configuration-error",
        CommunicationFailure = 12 => "communication-failure",
        MemberFault = 13 => "member-fault",
        MonitoredObjectFault = 14 => "monitored-object-fault",
        Tripped = 15 => "tripped",
    }
}

impl Default for Reliability {
    fn default() -> Self {
        Reliability::NoFaultDetected
    }
}

impl Reliability {
    pub fn is_fault(self) -> bool {
        self != Reliability::NoFaultDetected
    }
}

enumerated! {
    /// How a notification is presented to the recipient
    pub enum NotifyType {
        Alarm = 0 => "alarm",
        Event = 1 => "event",
        AckNotification = 2 => "ack-notification",
    }
}

impl Default for NotifyType {
    fn default() -> Self {
        NotifyType::Alarm
    }
}

enumerated! {
    /// Event type reported in a notification
    pub enum EventType {
        ChangeOfBitstring = 0 => "change-of-bitstring",
        ChangeOfState = 1 => "change-of-state",
        CommandFailure = 3 => "command-failure",
        FloatingLimit = 4 => "floating-limit",
        OutOfRange = 5 => "out-of-range",
        ChangeOfLifeSafety = 8 => "change-of-life-safety",
        BufferReady = 10 => "buffer-ready",
        ChangeOfReliability = 22 => "change-of-reliability",
    }
}

// ============================================================================
// RECIPIENTS
// ============================================================================

/// Network address of a recipient that is not identified by device instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BacnetAddress {
    /// Network number, 0 for the local network
    #[serde(default)]
    pub network: u16,
    pub mac: Vec<u8>,
}

impl fmt::Display for BacnetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.network)?;
        for (i, byte) in self.mac.iter().enumerate() {
            if i > 0 {
                f.write_str("-")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Destination of an event or COV notification
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recipient {
    Device(u32),
    Address(BacnetAddress),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Device(instance) => write!(f, "device:{}", instance),
            Recipient::Address(address) => write!(f, "address:{}", address),
        }
    }
}
