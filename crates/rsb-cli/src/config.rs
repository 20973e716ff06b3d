//! Bridge configuration file – `~/.ros-sensor-bridge/config.toml`.
//!
//! ```toml
//! session = "shared"
//! print_interval_secs = 5
//!
//! [[static_sensors]]
//! name = "thermo"
//! readings = { temperature = 21.5 }
//!
//! [[publishers]]
//! name = "env-publisher"
//! primary_uri = "http://localhost:11311"
//! sensors = [{ topic = "/temp", type = "sensor/Temperature", name = "thermo", sample_rate = 2.0 }]
//!
//! [[subscribers]]
//! name = "temp-watch"
//! primary_uri = "http://localhost:11311"
//! sensor = { topic = "/temp", message_type = "sensor/Temperature" }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use rsb_runtime::{PublisherConfig, SensorConfig, SubscribedTopic, SubscriberConfig};
use rsb_types::Readings;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const CONFIG_ENV: &str = "RSB_CONFIG";
pub const PRIMARY_URI_ENV: &str = "RSB_PRIMARY_URI";

/// How components obtain their sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// One node per master address, leased by every binding.
    #[default]
    Shared,
    /// Every binding connects on its own.
    Fresh,
}

/// A sensor that always returns the same readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticSensorConfig {
    pub name: String,
    #[serde(default)]
    pub readings: Readings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedPublisher {
    pub name: String,
    #[serde(flatten)]
    pub config: PublisherConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedSubscriber {
    pub name: String,
    #[serde(flatten)]
    pub config: SubscriberConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionMode,

    /// Seconds between subscriber snapshot printouts.
    #[serde(default = "default_print_interval")]
    pub print_interval_secs: u64,

    #[serde(default)]
    pub static_sensors: Vec<StaticSensorConfig>,

    #[serde(default)]
    pub publishers: Vec<NamedPublisher>,

    #[serde(default)]
    pub subscribers: Vec<NamedSubscriber>,
}

fn default_print_interval() -> u64 {
    5
}

const DEFAULT_MASTER: &str = "http://localhost:11311";

impl Default for Config {
    /// A self-contained demo: one static thermometer published on `/temp`
    /// and read back by a subscriber.
    fn default() -> Self {
        let readings = match json!({"temperature": 21.5, "variance": 0.1}) {
            serde_json::Value::Object(map) => map,
            _ => Readings::new(),
        };
        Self {
            session: SessionMode::default(),
            print_interval_secs: default_print_interval(),
            static_sensors: vec![StaticSensorConfig {
                name: "thermo".to_string(),
                readings,
            }],
            publishers: vec![NamedPublisher {
                name: "env-publisher".to_string(),
                config: PublisherConfig {
                    primary_uri: DEFAULT_MASTER.to_string(),
                    host: None,
                    sensors: vec![SensorConfig {
                        topic: "/temp".to_string(),
                        message_type: "sensor/Temperature".to_string(),
                        name: "thermo".to_string(),
                        sample_rate: 2.0,
                    }],
                },
            }],
            subscribers: vec![NamedSubscriber {
                name: "temp-watch".to_string(),
                config: SubscriberConfig {
                    primary_uri: DEFAULT_MASTER.to_string(),
                    host: None,
                    sensor: Some(SubscribedTopic {
                        topic: "/temp".to_string(),
                        message_type: "sensor/Temperature".to_string(),
                    }),
                },
            }],
        }
    }
}

/// Resolve the config path: explicit argument, then `RSB_CONFIG`, then the
/// home directory default.
pub fn config_path(arg: Option<&str>) -> PathBuf {
    if let Some(path) = arg {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var(CONFIG_ENV)
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".ros-sensor-bridge").join("config.toml")
}

/// Load the config.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// `RSB_PRIMARY_URI` replaces the master address of every component.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(uri) = std::env::var(PRIMARY_URI_ENV)
        && !uri.trim().is_empty()
    {
        override_primary_uri(cfg, &uri);
    }
}

fn override_primary_uri(cfg: &mut Config, uri: &str) {
    for p in &mut cfg.publishers {
        p.config.primary_uri = uri.to_string();
    }
    for s in &mut cfg.subscribers {
        s.config.primary_uri = uri.to_string();
    }
}

/// Write `cfg`, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
