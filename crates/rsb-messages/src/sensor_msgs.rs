//! Scalar environmental measurements with a variance.
//!
//! Both types take their measurement from a required generic key and the
//! variance from an optional `variance` key that defaults to `0`.

use rsb_types::{BridgeError, Readings};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::fields::{self, HEADER_KEY};
use crate::std_msgs::Header;
use crate::wire::{FieldRename, RosMessage};

const VARIANCE_KEY: &str = "variance";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Temperature {
    pub header: Header,
    /// Degrees Celsius.
    pub temperature: f64,
    /// `0` means unknown.
    pub variance: f64,
}

impl RosMessage for Temperature {
    const ROS_TYPE: &'static str = "sensor_msgs/Temperature";
    const RENAMES: &'static [FieldRename] = &[
        FieldRename::new("temperature", "temperature"),
        FieldRename::new(VARIANCE_KEY, "variance"),
    ];

    fn from_readings(type_name: &str, readings: &Readings) -> Result<Self, BridgeError> {
        Ok(Self {
            header: fields::optional_header(type_name, readings)?,
            temperature: fields::require_f64(type_name, readings, "temperature")?,
            variance: fields::optional_f64(type_name, readings, VARIANCE_KEY, 0.0)?,
        })
    }

    fn to_readings(&self) -> Result<Readings, BridgeError> {
        let mut out = Readings::new();
        out.insert(HEADER_KEY.to_string(), fields::header_value(&self.header)?);
        out.insert("temperature".to_string(), json!(self.temperature));
        out.insert(VARIANCE_KEY.to_string(), json!(self.variance));
        Ok(out)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelativeHumidity {
    pub header: Header,
    /// Fraction in `0.0..=1.0`.
    pub relative_humidity: f64,
    pub variance: f64,
}

impl RosMessage for RelativeHumidity {
    const ROS_TYPE: &'static str = "sensor_msgs/RelativeHumidity";
    const RENAMES: &'static [FieldRename] = &[
        FieldRename::new("relative_humidity", "relative_humidity"),
        FieldRename::new(VARIANCE_KEY, "variance"),
    ];

    fn from_readings(type_name: &str, readings: &Readings) -> Result<Self, BridgeError> {
        Ok(Self {
            header: fields::optional_header(type_name, readings)?,
            relative_humidity: fields::require_f64(type_name, readings, "relative_humidity")?,
            variance: fields::optional_f64(type_name, readings, VARIANCE_KEY, 0.0)?,
        })
    }

    fn to_readings(&self) -> Result<Readings, BridgeError> {
        let mut out = Readings::new();
        out.insert(HEADER_KEY.to_string(), fields::header_value(&self.header)?);
        out.insert("relative_humidity".to_string(), json!(self.relative_humidity));
        out.insert(VARIANCE_KEY.to_string(), json!(self.variance));
        Ok(out)
    }
}
