//! The closed set of wire message shapes.
//!
//! [`WireMessage`] is a sum type over every message the bridge can publish or
//! receive.  Each variant wraps a concrete struct implementing
//! [`RosMessage`], which carries the middleware type string and the
//! conversion to and from a generic [`Readings`] map.
//!
//! Two conversion styles exist:
//!
//! | Style | Used by | Behaviour |
//! |---|---|---|
//! | Round trip | `std_msgs/*` | serde decode of the map into the struct; missing fields keep their defaults |
//! | Field mapped | `sensor/*`, `ThrottlingStates` | explicit generic-key ↔ wire-field table with per-field defaults |

use std::fmt::Debug;

use rsb_types::{BridgeError, Readings};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::custom::ThrottlingStates;
use crate::sensor_msgs::{RelativeHumidity, Temperature};
use crate::std_msgs;

/// One entry of a field-mapped type's rename table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRename {
    /// Key in the generic readings map.
    pub key: &'static str,
    /// Field name in the wire schema.
    pub wire: &'static str,
}

impl FieldRename {
    pub const fn new(key: &'static str, wire: &'static str) -> Self {
        Self { key, wire }
    }
}

/// A strongly typed middleware message.
///
/// The default conversions are a serde round trip through a JSON object, so
/// generic keys equal the struct's serialised field names.  Field-mapped
/// types override both conversions and publish their [`RENAMES`] table.
///
/// [`RENAMES`]: RosMessage::RENAMES
pub trait RosMessage:
    Serialize
    + DeserializeOwned
    + Default
    + Clone
    + Debug
    + PartialEq
    + Into<WireMessage>
    + TryFrom<WireMessage, Error = BridgeError>
    + Send
    + Sync
    + 'static
{
    /// Middleware type string, e.g. `"std_msgs/Float64"`.
    const ROS_TYPE: &'static str;

    /// Generic-key ↔ wire-field renames.  Empty for round-trip types.
    const RENAMES: &'static [FieldRename] = &[];

    /// Populate a message from a generic readings map.
    ///
    /// `type_name` is the registered symbolic name, used in error messages.
    fn from_readings(type_name: &str, readings: &Readings) -> Result<Self, BridgeError> {
        let value = normalize_numbers(Value::Object(readings.clone()));
        serde_json::from_value(value).map_err(|e| BridgeError::Decode {
            type_name: type_name.to_string(),
            details: e.to_string(),
        })
    }

    /// Flatten the message into a generic readings map.
    fn to_readings(&self) -> Result<Readings, BridgeError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(BridgeError::Flatten(format!(
                "{} serialised to a non-object value: {other}",
                Self::ROS_TYPE
            ))),
            Err(e) => Err(BridgeError::Flatten(e.to_string())),
        }
    }
}

/// Rewrite integral floating-point numbers (`42.0`) as integers so they
/// decode into integer fields.  Float fields accept integers unchanged.
pub(crate) fn normalize_numbers(value: Value) -> Value {
    // Beyond 2^53 an f64 no longer represents every integer exactly.
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() <= MAX_EXACT => {
                if f >= 0.0 {
                    Value::from(f as u64)
                } else {
                    Value::from(f as i64)
                }
            }
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_numbers(v)))
                .collect(),
        ),
        other => other,
    }
}

macro_rules! wire_messages {
    ($($variant:ident => $ty:ty),+ $(,)?) => {
        /// A decoded message of any registered shape.
        #[derive(Debug, Clone, PartialEq)]
        pub enum WireMessage {
            $($variant($ty),)+
        }

        /// Discriminant of [`WireMessage`], resolved once per descriptor.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageKind {
            $($variant,)+
        }

        impl MessageKind {
            /// Middleware type string of this kind.
            pub fn ros_type(self) -> &'static str {
                match self {
                    $(MessageKind::$variant => <$ty as RosMessage>::ROS_TYPE,)+
                }
            }
        }

        impl WireMessage {
            pub fn kind(&self) -> MessageKind {
                match self {
                    $(WireMessage::$variant(_) => MessageKind::$variant,)+
                }
            }

            /// Flatten into a generic readings map using the shape's own
            /// conversion rules.
            pub fn to_readings(&self) -> Result<Readings, BridgeError> {
                match self {
                    $(WireMessage::$variant(m) => m.to_readings(),)+
                }
            }
        }

        $(
            impl From<$ty> for WireMessage {
                fn from(m: $ty) -> Self {
                    WireMessage::$variant(m)
                }
            }

            impl TryFrom<WireMessage> for $ty {
                type Error = BridgeError;

                fn try_from(m: WireMessage) -> Result<Self, BridgeError> {
                    match m {
                        WireMessage::$variant(inner) => Ok(inner),
                        other => Err(BridgeError::TypeMismatch {
                            expected: <$ty as RosMessage>::ROS_TYPE.to_string(),
                            actual: other.ros_type().to_string(),
                        }),
                    }
                }
            }
        )+
    };
}

wire_messages! {
    Header => std_msgs::Header,
    String => std_msgs::String,
    Bool => std_msgs::Bool,
    Int8 => std_msgs::Int8,
    Int16 => std_msgs::Int16,
    Int32 => std_msgs::Int32,
    Int64 => std_msgs::Int64,
    UInt8 => std_msgs::UInt8,
    UInt16 => std_msgs::UInt16,
    UInt32 => std_msgs::UInt32,
    UInt64 => std_msgs::UInt64,
    Float32 => std_msgs::Float32,
    Float64 => std_msgs::Float64,
    Time => std_msgs::Time,
    Duration => std_msgs::Duration,
    ColorRGBA => std_msgs::ColorRGBA,
    MultiArrayDimension => std_msgs::MultiArrayDimension,
    MultiArrayLayout => std_msgs::MultiArrayLayout,
    Byte => std_msgs::Byte,
    ByteMultiArray => std_msgs::ByteMultiArray,
    Char => std_msgs::Char,
    Empty => std_msgs::Empty,
    Temperature => Temperature,
    RelativeHumidity => RelativeHumidity,
    ThrottlingStates => ThrottlingStates,
}

impl WireMessage {
    /// Middleware type string of the wrapped message.
    pub fn ros_type(&self) -> &'static str {
        self.kind().ros_type()
    }
}
