// src/value.rs - BACnet property value system
use crate::types::{
    DeviceObjectPropertyReference, EventState, EventTransitionBits, LimitEnable, ObjectId,
    Reliability, StatusFlags,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Application datatypes a property can hold
///
/// Only the datatypes the event and COV machinery inspects are modelled;
/// everything else is opaque to this crate.
///
/// # Examples
///
/// ```rust
/// use bacnet_events::Value;
///
/// let real = Value::Real(21.5);
/// let flag = Value::Boolean(true);
///
/// assert_eq!(real.as_float(), Some(21.5));
/// assert_eq!(flag.as_bool(), Some(true));
/// assert!(Value::Unsigned(3).is_numeric());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Boolean(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f64),
    CharacterString(String),
    Enumerated(u32),
    BitString(Vec<bool>),
    ObjectIdentifier(ObjectId),
    Reference(DeviceObjectPropertyReference),
    List(Vec<Value>),
}

impl Value {
    /// Convert to boolean if possible
    ///
    /// Binary present values are enumerated (inactive = 0, active = 1) on
    /// the wire, so enumerations convert as well.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Enumerated(e) => Some(*e != 0),
            Value::Unsigned(u) => Some(*u != 0),
            Value::Signed(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Convert numeric datatypes to a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            Value::Unsigned(u) => Some(*u as f64),
            Value::Signed(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            Value::Unsigned(u) => Some(*u),
            Value::Signed(i) if *i >= 0 => Some(*i as u64),
            Value::Enumerated(e) => Some(u64::from(*e)),
            _ => None,
        }
    }

    pub fn as_enumerated(&self) -> Option<u32> {
        match self {
            Value::Enumerated(e) => Some(*e),
            Value::Unsigned(u) => u32::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_bit_string(&self) -> Option<&[bool]> {
        match self {
            Value::BitString(bits) => Some(bits),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::CharacterString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Numeric datatypes participate in COV increment checks
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Real(_) | Value::Unsigned(_) | Value::Signed(_))
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Unsigned(_) => "unsigned",
            Value::Signed(_) => "signed",
            Value::Real(_) => "real",
            Value::CharacterString(_) => "character-string",
            Value::Enumerated(_) => "enumerated",
            Value::BitString(_) => "bit-string",
            Value::ObjectIdentifier(_) => "object-identifier",
            Value::Reference(_) => "reference",
            Value::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Unsigned(u) => write!(f, "{}", u),
            Value::Signed(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{:.3}", r),
            Value::CharacterString(s) => write!(f, "\"{}\"", s),
            Value::Enumerated(e) => write!(f, "enum({})", e),
            Value::BitString(bits) => {
                f.write_str("{")?;
                for bit in bits {
                    f.write_str(if *bit { "1" } else { "0" })?;
                }
                f.write_str("}")
            }
            Value::ObjectIdentifier(id) => write!(f, "{}", id),
            Value::Reference(reference) => write!(f, "{}", reference),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Real(f)
    }
}

impl From<u32> for Value {
    fn from(u: u32) -> Self {
        Value::Unsigned(u64::from(u))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Signed(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::CharacterString(s.to_string())
    }
}

impl From<StatusFlags> for Value {
    fn from(flags: StatusFlags) -> Self {
        Value::BitString(flags.to_bits())
    }
}

impl From<LimitEnable> for Value {
    fn from(limits: LimitEnable) -> Self {
        Value::BitString(limits.to_bits())
    }
}

impl From<EventTransitionBits> for Value {
    fn from(bits: EventTransitionBits) -> Self {
        Value::BitString(bits.0.to_vec())
    }
}

impl From<EventState> for Value {
    fn from(state: EventState) -> Self {
        Value::Enumerated(state.code())
    }
}

impl From<Reliability> for Value {
    fn from(reliability: Reliability) -> Self {
        Value::Enumerated(reliability.code())
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::ObjectIdentifier(id)
    }
}
