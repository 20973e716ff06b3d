//! Synthetic sensors declared in the config file.

use std::sync::Arc;

use async_trait::async_trait;
use rsb_runtime::Dependencies;
use rsb_types::{BridgeError, Readings, Sensor};

use crate::config::StaticSensorConfig;

pub struct StaticSensor {
    name: String,
    readings: Readings,
}

impl StaticSensor {
    pub fn new(config: &StaticSensorConfig) -> Self {
        Self {
            name: config.name.clone(),
            readings: config.readings.clone(),
        }
    }
}

#[async_trait]
impl Sensor for StaticSensor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn readings(&self, _extra: &Readings) -> Result<Readings, BridgeError> {
        Ok(self.readings.clone())
    }
}

/// Build the dependency set handed to every publisher.  A later entry with
/// a duplicate name replaces the earlier one.
pub fn dependencies(configs: &[StaticSensorConfig]) -> Dependencies {
    configs
        .iter()
        .map(|c| (c.name.clone(), Arc::new(StaticSensor::new(c)) as Arc<dyn Sensor>))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn static_sensor_repeats_its_readings() -> Result<(), Box<dyn std::error::Error>> {
        let mut readings = Readings::new();
        readings.insert("relative_humidity".to_string(), json!(0.4));
        let deps = dependencies(&[StaticSensorConfig {
            name: "hygro".to_string(),
            readings,
        }]);

        let sensor = deps.get("hygro").ok_or("missing")?;
        assert_eq!(sensor.name(), "hygro");
        for _ in 0..2 {
            let r = sensor.readings(&Readings::new()).await?;
            assert_eq!(r["relative_humidity"], json!(0.4));
        }
        Ok(())
    }
}
