//! Host-facing component lifecycle.
//!
//! A component is reconfigured with a JSON attribute object and a set of
//! named sensor dependencies, answers commands, and is closed once.  The
//! bindings it spawns for one configuration live together in a [`Running`]
//! set and are stopped together.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rsb_types::{BridgeError, Readings, Sensor};
use serde_json::{Value, json};
use tracing::info;

use crate::binding::{BindingHandle, ReconnectRequest};
use crate::supervisor::Supervisor;

/// Sensors available to a component, keyed by name.
pub type Dependencies = HashMap<String, Arc<dyn Sensor>>;

/// Command key recognised by [`Component::do_command`].
pub const COMMAND_KEY: &str = "command";
/// Command value forcing every binding to reconnect.
pub const RECONNECT_COMMAND: &str = "reconnect";

#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    /// Replace the running configuration.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidConfig`] or [`BridgeError::TypeNotFound`]; in
    /// both cases the previous configuration keeps running.
    async fn reconfigure(&self, attributes: &Value, deps: &Dependencies) -> Result<(), BridgeError>;

    async fn do_command(&self, command: &Readings) -> Result<Readings, BridgeError>;

    /// Stop every binding and wait for them to exit.
    async fn close(&self) -> Result<(), BridgeError>;
}

/// The bindings of one applied configuration.
#[derive(Debug, Default)]
pub struct Running {
    supervisor: Supervisor,
    bindings: Vec<BindingHandle>,
}

impl Running {
    pub fn new(supervisor: Supervisor, bindings: Vec<BindingHandle>) -> Self {
        Self { supervisor, bindings }
    }

    pub fn bindings(&self) -> &[BindingHandle] {
        &self.bindings
    }

    /// Cancel and wait.  No binding task touches a sensor or session after
    /// this returns.
    pub async fn stop(self) {
        self.supervisor.shutdown().await;
    }
}

/// Shared `do_command` behaviour.  Unknown commands are acknowledged and
/// otherwise ignored.
pub(crate) fn handle_command(component: &str, command: &Readings, bindings: &[BindingHandle]) -> Readings {
    let mut reply = Readings::new();
    reply.insert("ok".to_string(), json!(1));
    if command.get(COMMAND_KEY).and_then(Value::as_str) == Some(RECONNECT_COMMAND) {
        let queued = bindings
            .iter()
            .filter(|b| b.request_reconnect(ReconnectRequest::Manual))
            .count();
        info!(component = %component, queued, "manual reconnect requested");
        reply.insert("reconnect_requested".to_string(), json!(queued));
    }
    reply
}
