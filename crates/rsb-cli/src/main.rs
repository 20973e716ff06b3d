//! `ros-sensor-bridge` – runs bridge components from a config file.
//!
//! 1. Loads `~/.ros-sensor-bridge/config.toml` (or the path given as the
//!    first argument, or `RSB_CONFIG`); writes a demo config when absent.
//! 2. Starts every subscriber and publisher on an in-process loopback
//!    transport, with static sensors from the file as dependencies.
//! 3. Prints subscriber snapshots periodically.
//! 4. On Ctrl-C closes every component, waiting for its bindings to stop.

mod config;
mod sensors;

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use rsb_messages::TypeRegistry;
use rsb_middleware::{ConnectionManager, LogRouter, LoopbackTransport};
use rsb_runtime::{Component, Dependencies, SensorPublisher, SensorSubscriber, SessionPolicy, init_tracing};
use rsb_types::{Readings, Sensor};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::{Config, SessionMode};

fn main() {
    let _guard = init_tracing("ros-sensor-bridge");
    print_banner();

    let arg = std::env::args().nth(1);
    let path = config::config_path(arg.as_deref());
    let cfg = match config::load_from(&path) {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let mut cfg = Config::default();
            match config::save_to(&cfg, &path) {
                Ok(()) => println!(
                    "  {} Demo config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Could not write demo config".yellow(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            std::process::exit(2);
        }
    };

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – closing components …".yellow().bold());
        on_signal.cancel();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the bridge with SIGKILL");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start the async runtime".red(), e);
            std::process::exit(1);
        }
    };
    runtime.block_on(run(cfg, shutdown));
    println!("{}", "  ✓ Bridge stopped.".green());
}

async fn run(cfg: Config, shutdown: CancellationToken) {
    let transport = Arc::new(LoopbackTransport::default());
    let router = LogRouter::default();
    let manager = Arc::new(ConnectionManager::new(transport.clone(), router));
    let policy = match cfg.session {
        SessionMode::Shared => SessionPolicy::shared(Arc::clone(&manager)),
        SessionMode::Fresh => SessionPolicy::fresh(transport.clone(), router),
    };
    let registry = Arc::new(TypeRegistry::standard());
    let deps = sensors::dependencies(&cfg.static_sensors);
    info!(types = registry.len(), sensors = deps.len(), session = ?cfg.session, "bridge starting");

    let mut components: Vec<Arc<dyn Component>> = Vec::new();
    let mut subscribers: Vec<Arc<SensorSubscriber>> = Vec::new();

    // Subscribers first so the first published samples have a reader.
    for named in &cfg.subscribers {
        let subscriber = Arc::new(SensorSubscriber::new(&named.name, Arc::clone(&registry), policy.clone()));
        if start(subscriber.as_ref(), &named.config, &deps).await {
            subscribers.push(Arc::clone(&subscriber));
            components.push(subscriber);
        }
    }
    for named in &cfg.publishers {
        let publisher = Arc::new(SensorPublisher::new(&named.name, Arc::clone(&registry), policy.clone()));
        if start(publisher.as_ref(), &named.config, &deps).await {
            components.push(publisher);
        }
    }
    println!(
        "\n  {} component(s) running. Press {} to stop.\n",
        components.len().to_string().bold(),
        "Ctrl-C".bold().cyan()
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.print_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => print_snapshots(&subscribers).await,
        }
    }

    for component in &components {
        if let Err(e) = component.close().await {
            warn!(component = %component.name(), error = %e, "close failed");
        }
    }
    manager.shutdown_all().await;
}

/// Configure one component, reporting failure instead of aborting.
async fn start<C, T>(component: &C, config: &T, deps: &Dependencies) -> bool
where
    C: Component + ?Sized,
    T: serde::Serialize,
{
    let attributes = match serde_json::to_value(config) {
        Ok(v) => v,
        Err(e) => {
            println!("  {} {}: {}", "✗".red().bold(), component.name().bold(), e);
            return false;
        }
    };
    match component.reconfigure(&attributes, deps).await {
        Ok(()) => {
            println!("  {} {}", "✓".green().bold(), component.name().bold());
            true
        }
        Err(e) => {
            println!("  {} {}: {}", "✗".red().bold(), component.name().bold(), e);
            false
        }
    }
}

async fn print_snapshots(subscribers: &[Arc<SensorSubscriber>]) {
    for subscriber in subscribers {
        let readings = subscriber.readings(&Readings::new()).await.unwrap_or_default();
        let name = Sensor::name(subscriber.as_ref()).bold();
        if readings.is_empty() {
            println!("  {} {}", name, "(no data yet)".dimmed());
        } else {
            let body = serde_json::to_string(&readings).unwrap_or_else(|e| format!("<unprintable: {e}>"));
            println!("  {} {}", name, body);
        }
    }
}

fn print_banner() {
    println!();
    println!("  {} {}", "ros-sensor-bridge".bold().cyan(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Sensor readings ⇄ pub/sub topics");
    println!();
}
