//! Subscribe-mode component: exposes the latest message on a topic as
//! sensor readings.

use std::sync::Arc;

use async_trait::async_trait;
use rsb_messages::TypeRegistry;
use rsb_types::{BridgeError, Readings, Sensor};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use crate::binding::{Binding, BindingHandle, Role, SessionPolicy, Target};
use crate::component::{Component, Dependencies, Running, handle_command};
use crate::config::{SubscriberConfig, from_attributes, normalize_host};
use crate::snapshot::Snapshot;
use crate::supervisor::Supervisor;

pub struct SensorSubscriber {
    name: String,
    registry: Arc<TypeRegistry>,
    policy: SessionPolicy,
    snapshot: Arc<Snapshot>,
    running: Mutex<Option<Running>>,
}

impl SensorSubscriber {
    pub fn new(name: impl Into<String>, registry: Arc<TypeRegistry>, policy: SessionPolicy) -> Self {
        Self {
            name: name.into(),
            registry,
            policy,
            snapshot: Arc::new(Snapshot::new()),
            running: Mutex::new(None),
        }
    }

    /// Validate `config`, bind a decode-and-store callback for its type, and
    /// replace the running binding.  The snapshot is cleared so that readings
    /// never mix topics across configurations.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidConfig`] or [`BridgeError::TypeNotFound`]
    /// before anything running is touched.
    pub async fn apply(&self, config: &SubscriberConfig) -> Result<(), BridgeError> {
        let topic = config.validate()?;
        let snapshot = Arc::clone(&self.snapshot);
        let callback = self
            .registry
            .bind_callback(&topic.message_type, Arc::new(move |readings| snapshot.store(readings)))?;

        let mut running = self.running.lock().await;
        if let Some(old) = running.take() {
            info!(component = %self.name, "stopping previous binding");
            old.stop().await;
        }
        self.snapshot.clear();

        let supervisor = Supervisor::new();
        let target = Target {
            topic: topic.topic.clone(),
            master_address: config.primary_uri.clone(),
            host: normalize_host(&config.host),
        };
        let handle = Binding::new(target, Role::Subscribe { callback }, self.policy.clone()).spawn(&supervisor);

        info!(
            component = %self.name,
            topic = %topic.topic,
            message_type = %topic.message_type,
            master = %config.primary_uri,
            "subscriber configured"
        );
        *running = Some(Running::new(supervisor, vec![handle]));
        Ok(())
    }

    pub async fn binding(&self) -> Option<BindingHandle> {
        self.running
            .lock()
            .await
            .as_ref()
            .and_then(|r| r.bindings().first().cloned())
    }
}

#[async_trait]
impl Sensor for SensorSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    /// The latest snapshot, or an empty map.  Never blocks on the binding.
    async fn readings(&self, _extra: &Readings) -> Result<Readings, BridgeError> {
        Ok(self.snapshot.load())
    }
}

#[async_trait]
impl Component for SensorSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reconfigure(&self, attributes: &Value, _deps: &Dependencies) -> Result<(), BridgeError> {
        let config: SubscriberConfig = from_attributes(attributes)?;
        self.apply(&config).await
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
        info!(component = %self.name, "subscriber closed");
        Ok(())
    }
}
