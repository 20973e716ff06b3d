//! Field extraction helpers for field-mapped message types.
//!
//! Each helper pulls one generic key out of a [`Readings`] map and reports
//! [`BridgeError::FieldNotFound`] or [`BridgeError::FieldWrongType`] against
//! the registered type name.

use rsb_types::{BridgeError, Readings};
use serde_json::Value;

use crate::std_msgs::Header;

/// Generic key carrying a nested [`Header`] map.
pub const HEADER_KEY: &str = "header";
/// Generic key overriding the header's frame id.
pub const FRAME_ID_KEY: &str = "frame_id";

fn not_found(type_name: &str, key: &str) -> BridgeError {
    BridgeError::FieldNotFound {
        type_name: type_name.to_string(),
        field: key.to_string(),
    }
}

fn wrong_type(type_name: &str, key: &str, expected: &'static str) -> BridgeError {
    BridgeError::FieldWrongType {
        type_name: type_name.to_string(),
        field: key.to_string(),
        expected,
    }
}

pub fn require_bool(type_name: &str, readings: &Readings, key: &str) -> Result<bool, BridgeError> {
    match readings.get(key) {
        None => Err(not_found(type_name, key)),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(wrong_type(type_name, key, "bool")),
    }
}

pub fn require_f64(type_name: &str, readings: &Readings, key: &str) -> Result<f64, BridgeError> {
    match readings.get(key) {
        None => Err(not_found(type_name, key)),
        Some(v) => v.as_f64().ok_or_else(|| wrong_type(type_name, key, "number")),
    }
}

/// Like [`require_f64`], but an absent key yields `default`.
pub fn optional_f64(
    type_name: &str,
    readings: &Readings,
    key: &str,
    default: f64,
) -> Result<f64, BridgeError> {
    match readings.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v.as_f64().ok_or_else(|| wrong_type(type_name, key, "number")),
    }
}

pub fn optional_string(
    type_name: &str,
    readings: &Readings,
    key: &str,
) -> Result<Option<String>, BridgeError> {
    match readings.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(wrong_type(type_name, key, "string")),
    }
}

/// Decode the optional `header` map, then apply an optional `frame_id`
/// override.  Both absent yields the default header.
pub fn optional_header(type_name: &str, readings: &Readings) -> Result<Header, BridgeError> {
    let mut header = match readings.get(HEADER_KEY) {
        None | Some(Value::Null) => Header::default(),
        Some(v @ Value::Object(_)) => {
            serde_json::from_value(v.clone()).map_err(|e| BridgeError::Decode {
                type_name: type_name.to_string(),
                details: format!("{HEADER_KEY}: {e}"),
            })?
        }
        Some(_) => return Err(wrong_type(type_name, HEADER_KEY, "object")),
    };
    if let Some(frame_id) = optional_string(type_name, readings, FRAME_ID_KEY)? {
        header.frame_id = frame_id;
    }
    Ok(header)
}

/// Serialise a header for inclusion in a flattened map.
pub fn header_value(header: &Header) -> Result<Value, BridgeError> {
    serde_json::to_value(header).map_err(|e| BridgeError::Flatten(e.to_string()))
}
