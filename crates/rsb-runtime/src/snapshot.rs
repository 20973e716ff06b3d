//! Latest-readings snapshot of a subscribed topic.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rsb_types::{Readings, TIMESTAMP_KEY};
use serde_json::Value;

/// Holds the most recent decoded message.  Writers swap in a whole new map;
/// readers clone out the current one and never see a partial update.
#[derive(Debug, Default)]
pub struct Snapshot {
    latest: RwLock<Option<Arc<Readings>>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot with `readings`, stamped with the current UTC
    /// time in epoch milliseconds under [`TIMESTAMP_KEY`].
    pub fn store(&self, mut readings: Readings) {
        readings.insert(TIMESTAMP_KEY.to_string(), Value::from(Utc::now().timestamp_millis()));
        let next = Arc::new(readings);
        *self.latest.write() = Some(next);
    }

    /// The current snapshot, or an empty map if nothing arrived yet.
    pub fn load(&self) -> Readings {
        self.latest
            .read()
            .as_deref()
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.read().is_none()
    }

    pub fn clear(&self) {
        *self.latest.write() = None;
    }
}
