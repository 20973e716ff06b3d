//! Publish-mode component: samples sensors and publishes them on topics.

use std::sync::Arc;

use async_trait::async_trait;
use rsb_messages::TypeRegistry;
use rsb_types::{BridgeError, Readings, Sensor};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::binding::{Binding, BindingHandle, Role, SessionPolicy, Target};
use crate::component::{Component, Dependencies, Running, handle_command};
use crate::config::{DEFAULT_SAMPLE_RATE_HZ, PublisherConfig, SensorConfig, from_attributes, normalize_host};
use crate::supervisor::Supervisor;

/// One binding per configured sensor, each reading its dependency on a fixed
/// cadence.
pub struct SensorPublisher {
    name: String,
    registry: Arc<TypeRegistry>,
    policy: SessionPolicy,
    running: Mutex<Option<Running>>,
}

impl SensorPublisher {
    pub fn new(name: impl Into<String>, registry: Arc<TypeRegistry>, policy: SessionPolicy) -> Self {
        Self {
            name: name.into(),
            registry,
            policy,
            running: Mutex::new(None),
        }
    }

    /// Validate `config`, resolve its types and dependencies, then replace
    /// the running bindings.
    ///
    /// Sensors whose dependency is missing are logged and skipped.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidConfig`] or [`BridgeError::TypeNotFound`]
    /// before anything running is touched.
    pub async fn apply(&self, config: &PublisherConfig, deps: &Dependencies) -> Result<(), BridgeError> {
        config.validate()?;
        let host = normalize_host(&config.host);

        let mut plans = Vec::with_capacity(config.sensors.len());
        for sensor in &config.sensors {
            let descriptor = self.registry.lookup(&sensor.message_type)?.clone();
            let period = cadence(&self.name, sensor)?;
            plans.push((sensor, descriptor, period));
        }

        let mut running = self.running.lock().await;
        if let Some(old) = running.take() {
            info!(component = %self.name, "stopping previous bindings");
            old.stop().await;
        }

        let supervisor = Supervisor::new();
        let mut bindings = Vec::with_capacity(plans.len());
        for (sensor, descriptor, period) in plans {
            let Some(source) = resolve(deps, sensor) else {
                continue;
            };
            let target = Target {
                topic: sensor.topic.clone(),
                master_address: config.primary_uri.clone(),
                host: host.clone(),
            };
            let role = Role::Publish {
                sensor: source,
                descriptor,
                period,
            };
            bindings.push(Binding::new(target, role, self.policy.clone()).spawn(&supervisor));
        }

        info!(component = %self.name, bindings = bindings.len(), master = %config.primary_uri, "publisher configured");
        *running = Some(Running::new(supervisor, bindings));
        Ok(())
    }

    /// Handles of the currently running bindings.
    pub async fn bindings(&self) -> Vec<BindingHandle> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| r.bindings().to_vec())
            .unwrap_or_default()
    }
}

fn resolve(deps: &Dependencies, sensor: &SensorConfig) -> Option<Arc<dyn Sensor>> {
    match deps.get(&sensor.name) {
        Some(source) => Some(Arc::clone(source)),
        None => {
            let e = BridgeError::DependencyNotFound(sensor.name.clone());
            warn!(topic = %sensor.topic, error = %e, "skipping sensor");
            None
        }
    }
}

fn cadence(component: &str, sensor: &SensorConfig) -> Result<std::time::Duration, BridgeError> {
    if sensor.sample_rate == 0.0 {
        warn!(
            component = %component,
            sensor = %sensor.name,
            default_hz = DEFAULT_SAMPLE_RATE_HZ,
            "sample_rate is 0, using the default"
        );
    }
    sensor.period()
}

#[async_trait]
impl Component for SensorPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reconfigure(&self, attributes: &Value, deps: &Dependencies) -> Result<(), BridgeError> {
        let config: PublisherConfig = from_attributes(attributes)?;
        self.apply(&config, deps).await
    }

    async fn do_command(&self, command: &Readings) -> Result<Readings, BridgeError> {
        let running = self.running.lock().await;
        let bindings = running.as_ref().map(Running::bindings).unwrap_or_default();
        Ok(handle_command(&self.name, command, bindings))
    }

    async fn close(&self) -> Result<(), BridgeError> {
        if let Some(running) = self.running.lock().await.take() {
            running.stop().await;
        }
        info!(component = %self.name, "publisher closed");
        Ok(())
    }
}
