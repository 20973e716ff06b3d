//! Declarative component configuration.
//!
//! Both shapes deserialize from the attribute object a host hands to
//! [`Component::reconfigure`](crate::component::Component::reconfigure) and
//! are checked by `validate()` before anything is torn down.

use std::time::Duration;

use rsb_types::BridgeError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cadence used when a sensor is configured with `sample_rate = 0`.
pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 1.0;

// ────────────────────────────────────────────────────────────────────────────
// Publish mode
// ────────────────────────────────────────────────────────────────────────────

/// One sensor sampled and published on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SensorConfig {
    /// Topic to publish on, e.g. `/temp`.
    pub topic: String,
    /// Registered type name, e.g. `sensor/Temperature`.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Name of the sensor dependency to read from.
    pub name: String,
    /// Samples per second; `0` means [`DEFAULT_SAMPLE_RATE_HZ`].
    #[serde(default)]
    pub sample_rate: f64,
}

impl SensorConfig {
    /// Time between ticks.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidConfig`] when the rate is negative, not a
    /// number, or so small or large that the period cannot be represented
    /// or rounds to zero.
    pub fn period(&self) -> Result<Duration, BridgeError> {
        match Duration::try_from_secs_f64(1.0 / self.effective_rate()) {
            Ok(period) if !period.is_zero() => Ok(period),
            _ => Err(BridgeError::InvalidConfig(format!(
                "sample_rate {} has no usable tick period",
                self.sample_rate
            ))),
        }
    }

    pub fn effective_rate(&self) -> f64 {
        if self.sample_rate == 0.0 {
            DEFAULT_SAMPLE_RATE_HZ
        } else {
            self.sample_rate
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PublisherConfig {
    pub primary_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

impl PublisherConfig {
    /// # Errors
    ///
    /// [`BridgeError::InvalidConfig`] naming the first missing or malformed
    /// field.
    pub fn validate(&self) -> Result<(), BridgeError> {
        require("primary_uri", &self.primary_uri)?;
        if self.sensors.is_empty() {
            return Err(BridgeError::InvalidConfig("sensors is required".to_string()));
        }
        for (i, sensor) in self.sensors.iter().enumerate() {
            require(&format!("sensors[{i}].topic"), &sensor.topic)?;
            require(&format!("sensors[{i}].type"), &sensor.message_type)?;
            require(&format!("sensors[{i}].name"), &sensor.name)?;
            if !sensor.sample_rate.is_finite() || sensor.sample_rate < 0.0 {
                return Err(BridgeError::InvalidConfig(format!(
                    "sensors[{i}].sample_rate must be a non-negative number, got {}",
                    sensor.sample_rate
                )));
            }
            if sensor.period().is_err() {
                return Err(BridgeError::InvalidConfig(format!(
                    "sensors[{i}].sample_rate {} is out of range",
                    sensor.sample_rate
                )));
            }
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Subscribe mode
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubscribedTopic {
    pub topic: String,
    /// Registered type name expected on `topic`.
    pub message_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubscriberConfig {
    pub primary_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub sensor: Option<SubscribedTopic>,
}

impl SubscriberConfig {
    /// # Errors
    ///
    /// [`BridgeError::InvalidConfig`] naming the first missing field.
    pub fn validate(&self) -> Result<&SubscribedTopic, BridgeError> {
        require("primary_uri", &self.primary_uri)?;
        let sensor = self
            .sensor
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidConfig("sensor is required".to_string()))?;
        require("sensor.topic", &sensor.topic)?;
        require("sensor.message_type", &sensor.message_type)?;
        Ok(sensor)
    }
}

fn require(field: &str, value: &str) -> Result<(), BridgeError> {
    if value.trim().is_empty() {
        Err(BridgeError::InvalidConfig(format!("{field} is required")))
    } else {
        Ok(())
    }
}

/// Deserialize component attributes into `T`.
///
/// # Errors
///
/// [`BridgeError::InvalidConfig`] carrying the serde message.
pub fn from_attributes<T: serde::de::DeserializeOwned>(attributes: &Value) -> Result<T, BridgeError> {
    T::deserialize(attributes).map_err(|e| BridgeError::InvalidConfig(e.to_string()))
}

/// Empty `host` strings mean "not set".
pub(crate) fn normalize_host(host: &Option<String>) -> Option<String> {
    host.as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn publisher() -> PublisherConfig {
        from_attributes(&json!({
            "primary_uri": "http://localhost:11311",
            "sensors": [
                {"topic": "/temp", "type": "sensor/Temperature", "name": "thermo", "sample_rate": 2}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn publisher_parses_and_validates() {
        let cfg = publisher();
        cfg.validate().unwrap();
        assert_eq!(cfg.sensors[0].message_type, "sensor/Temperature");
        assert_eq!(cfg.sensors[0].period(), Ok(Duration::from_millis(500)));
    }

    #[test]
    fn zero_rate_means_one_hertz() {
        let mut cfg = publisher();
        cfg.sensors[0].sample_rate = 0.0;
        cfg.validate().unwrap();
        assert_eq!(cfg.sensors[0].period(), Ok(Duration::from_secs(1)));
    }

    #[test]
    fn missing_sample_rate_defaults_to_zero() {
        let cfg: PublisherConfig = from_attributes(&json!({
            "primary_uri": "http://m:11311",
            "sensors": [{"topic": "/t", "type": "std_msgs/Float64", "name": "s"}]
        }))
        .unwrap();
        assert_eq!(cfg.sensors[0].sample_rate, 0.0);
    }

    #[test]
    fn publisher_rejects_missing_fields() {
        let mut cfg = publisher();
        cfg.primary_uri.clear();
        assert_eq!(
            cfg.validate(),
            Err(BridgeError::InvalidConfig("primary_uri is required".to_string()))
        );

        let mut cfg = publisher();
        cfg.sensors.clear();
        assert!(matches!(cfg.validate(), Err(BridgeError::InvalidConfig(_))));

        let mut cfg = publisher();
        cfg.sensors[0].name = "  ".to_string();
        assert_eq!(
            cfg.validate(),
            Err(BridgeError::InvalidConfig("sensors[0].name is required".to_string()))
        );
    }

    #[test]
    fn publisher_rejects_bad_rates() {
        for rate in [-1.0, f64::NAN, f64::INFINITY] {
            let mut cfg = publisher();
            cfg.sensors[0].sample_rate = rate;
            assert!(cfg.validate().is_err(), "rate {rate} accepted");
        }
    }

    #[test]
    fn publisher_rejects_rates_without_a_period() {
        // 1e-20 Hz overflows Duration; 1e12 Hz rounds down to a zero period.
        for rate in [1e-20, 1e12, f64::MIN_POSITIVE] {
            let mut cfg = publisher();
            cfg.sensors[0].sample_rate = rate;
            assert!(cfg.sensors[0].period().is_err(), "rate {rate} has a period");
            assert_eq!(
                cfg.validate(),
                Err(BridgeError::InvalidConfig(format!(
                    "sensors[0].sample_rate {rate} is out of range"
                )))
            );
        }
    }

    #[test]
    fn extreme_but_usable_rates_pass() {
        for (rate, period) in [(0.25, Duration::from_secs(4)), (1000.0, Duration::from_millis(1))] {
            let mut cfg = publisher();
            cfg.sensors[0].sample_rate = rate;
            cfg.validate().unwrap();
            assert_eq!(cfg.sensors[0].period(), Ok(period));
        }
    }

    #[test]
    fn subscriber_requires_sensor_block() {
        let cfg: SubscriberConfig = from_attributes(&json!({"primary_uri": "http://m:11311"})).unwrap();
        assert_eq!(
            cfg.validate().unwrap_err(),
            BridgeError::InvalidConfig("sensor is required".to_string())
        );

        let cfg: SubscriberConfig = from_attributes(&json!({
            "primary_uri": "http://m:11311",
            "host": "10.0.0.4",
            "sensor": {"topic": "/throttle", "message_type": "ThrottlingStates"}
        }))
        .unwrap();
        assert_eq!(cfg.validate().unwrap().topic, "/throttle");
        assert_eq!(normalize_host(&cfg.host).as_deref(), Some("10.0.0.4"));
    }

    #[test]
    fn malformed_attributes_are_invalid_config() {
        let err = from_attributes::<PublisherConfig>(&json!({"primary_uri": 5})).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidConfig(_)));
    }

    #[test]
    fn empty_host_is_unset() {
        assert_eq!(normalize_host(&Some(String::new())), None);
        assert_eq!(normalize_host(&None), None);
    }

    #[test]
    fn schema_names_required_fields() {
        let schema = serde_json::to_value(schemars::schema_for!(PublisherConfig)).unwrap();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("primary_uri")));
    }
}
