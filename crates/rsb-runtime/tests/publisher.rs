//! End-to-end publish-mode behaviour over the loopback transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rsb_messages::{MessageKind, TypeRegistry, WireMessage};
use rsb_middleware::{ConnectionManager, LogRouter, LoopbackTransport};
use rsb_runtime::{BindingState, Component, Dependencies, SensorPublisher, SessionPolicy};
use rsb_types::{BridgeError, LogLevel, Readings, Sensor};
use serde_json::{Value, json};
use tokio::sync::broadcast;

/// Returns fixed readings and counts every call.
struct CountingSensor {
    readings: Readings,
    reads: AtomicUsize,
    fail: bool,
}

impl CountingSensor {
    fn new(readings: Value) -> Arc<Self> {
        Arc::new(Self {
            readings: readings.as_object().cloned().unwrap_or_default(),
            reads: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            readings: Readings::new(),
            reads: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sensor for CountingSensor {
    fn name(&self) -> &str {
        "counting"
    }

    async fn readings(&self, _extra: &Readings) -> Result<Readings, BridgeError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BridgeError::ReadFailure {
                sensor: "counting".to_string(),
                details: "i2c bus timeout".to_string(),
            });
        }
        Ok(self.readings.clone())
    }
}

fn deps(name: &str, sensor: Arc<CountingSensor>) -> Dependencies {
    let mut deps = Dependencies::new();
    deps.insert(name.to_string(), sensor as Arc<dyn Sensor>);
    deps
}

fn fresh_publisher(transport: &LoopbackTransport) -> SensorPublisher {
    SensorPublisher::new(
        "bridge",
        Arc::new(TypeRegistry::standard()),
        SessionPolicy::fresh(Arc::new(transport.clone()), LogRouter::log_only()),
    )
}

fn temperature_attrs(rate: f64) -> Value {
    json!({
        "primary_uri": "http://localhost:11311",
        "sensors": [
            {"topic": "/temp", "type": "sensor/Temperature", "name": "thermo", "sample_rate": rate}
        ]
    })
}

fn drain(rx: &mut broadcast::Receiver<WireMessage>) -> Vec<WireMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn temperature_published_twice_per_second() -> Result<(), Box<dyn std::error::Error>> {
    let transport = LoopbackTransport::default();
    let mut tap = transport.tap("/temp", MessageKind::Temperature)?;
    let sensor = CountingSensor::new(json!({"temperature": 21.5}));
    let publisher = fresh_publisher(&transport);

    publisher.reconfigure(&temperature_attrs(2.0), &deps("thermo", Arc::clone(&sensor))).await?;
    let binding = publisher.bindings().await.remove(0);
    assert!(binding.wait_for(BindingState::Active).await);

    tokio::time::sleep(Duration::from_millis(1250)).await;
    let published = drain(&mut tap);
    assert_eq!(published.len(), 2);
    for msg in published {
        match msg {
            WireMessage::Temperature(t) => {
                assert_eq!(t.temperature, 21.5);
                assert_eq!(t.variance, 0.0);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    publisher.close().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn zero_sample_rate_ticks_once_per_second() -> Result<(), Box<dyn std::error::Error>> {
    let transport = LoopbackTransport::default();
    let sensor = CountingSensor::new(json!({"temperature": 18.0}));
    let publisher = fresh_publisher(&transport);

    publisher.reconfigure(&temperature_attrs(0.0), &deps("thermo", Arc::clone(&sensor))).await?;
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(sensor.reads(), 3);

    publisher.close().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn close_is_a_barrier() -> Result<(), Box<dyn std::error::Error>> {
    let transport = LoopbackTransport::default();
    let sensor = CountingSensor::new(json!({"temperature": 18.0}));
    let publisher = fresh_publisher(&transport);

    publisher.reconfigure(&temperature_attrs(10.0), &deps("thermo", Arc::clone(&sensor))).await?;
    let binding = publisher.bindings().await.remove(0);
    tokio::time::sleep(Duration::from_millis(1050)).await;
    assert!(sensor.reads() >= 9);

    publisher.close().await?;
    assert_eq!(binding.state(), BindingState::Closed);
    assert_eq!(transport.live_nodes(), 0);

    let after_close = sensor.reads();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(sensor.reads(), after_close);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn read_failures_skip_the_tick_without_reconnecting() -> Result<(), Box<dyn std::error::Error>> {
    let transport = LoopbackTransport::default();
    let mut tap = transport.tap("/temp", MessageKind::Temperature)?;
    let sensor = CountingSensor::failing();
    let publisher = fresh_publisher(&transport);

    publisher.reconfigure(&temperature_attrs(2.0), &deps("thermo", Arc::clone(&sensor))).await?;
    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert_eq!(sensor.reads(), 4);
    assert!(drain(&mut tap).is_empty());
    assert_eq!(transport.nodes_created(), 1);

    publisher.close().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn transport_failures_are_debounced() -> Result<(), Box<dyn std::error::Error>> {
    let transport = LoopbackTransport::default();
    let sensor = CountingSensor::new(json!({"temperature": 18.0}));
    let publisher = fresh_publisher(&transport);

    publisher.reconfigure(&temperature_attrs(1.0), &deps("thermo", Arc::clone(&sensor))).await?;
    let binding = publisher.bindings().await.remove(0);
    assert!(binding.wait_for(BindingState::Active).await);
    assert_eq!(transport.nodes_created(), 1);

    // Outside the window of the initial connect: one reconnect, even though
    // sever raises both a log line and a structured event.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    transport.sever();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.nodes_created(), 2);

    // Within a second of that reconnect: ignored.
    tokio::time::sleep(Duration::from_millis(400)).await;
    transport.sever();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.nodes_created(), 2);

    // More than a second later: accepted again.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    transport.sever();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.nodes_created(), 3);
    assert_eq!(transport.live_nodes(), 1);
    assert_eq!(binding.state(), BindingState::Active);

    publisher.close().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn logged_transport_errors_trigger_debounced_reconnects() -> Result<(), Box<dyn std::error::Error>> {
    let transport = LoopbackTransport::default();
    let sensor = CountingSensor::new(json!({"temperature": 18.0}));
    let publisher = fresh_publisher(&transport);
    let dial_error = "got an error: dial tcp 127.0.0.1:11311: connect: connection refused";

    publisher.reconfigure(&temperature_attrs(1.0), &deps("thermo", Arc::clone(&sensor))).await?;
    let binding = publisher.bindings().await.remove(0);
    assert!(binding.wait_for(BindingState::Active).await);

    // A log line alone, with no structured failure event.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    transport.inject_log(LogLevel::Error, dial_error);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.nodes_created(), 2);

    tokio::time::sleep(Duration::from_millis(400)).await;
    transport.inject_log(LogLevel::Error, dial_error);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.nodes_created(), 2);

    // Lines that do not describe a lost TCP connection are only logged.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    transport.inject_log(LogLevel::Error, "got an error: permission denied");
    transport.inject_log(LogLevel::Warn, "tcp keepalive adjusted");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.nodes_created(), 2);

    transport.inject_log(LogLevel::Error, dial_error);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.nodes_created(), 3);
    assert_eq!(transport.live_nodes(), 1);
    assert_eq!(binding.state(), BindingState::Active);

    publisher.close().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_write_drops_the_sample_and_reconnects() -> Result<(), Box<dyn std::error::Error>> {
    let transport = LoopbackTransport::default();
    let mut tap = transport.tap("/temp", MessageKind::Temperature)?;
    let sensor = CountingSensor::new(json!({"temperature": 18.0}));
    let publisher = fresh_publisher(&transport);

    publisher.reconfigure(&temperature_attrs(1.0), &deps("thermo", Arc::clone(&sensor))).await?;
    let binding = publisher.bindings().await.remove(0);
    assert!(binding.wait_for(BindingState::Active).await);

    // Ticks land at 1 s, 2 s and 3 s; only the one at 2 s fails.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    transport.fail_writes(true);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(transport.nodes_created(), 2);
    assert_eq!(transport.live_nodes(), 1);
    assert_eq!(binding.state(), BindingState::Active);

    transport.fail_writes(false);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(sensor.reads(), 3);
    assert_eq!(drain(&mut tap).len(), 2);

    publisher.close().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reconnect_command_rebinds_shared_sessions() -> Result<(), Box<dyn std::error::Error>> {
    let transport = LoopbackTransport::default();
    let manager = Arc::new(ConnectionManager::new(Arc::new(transport.clone()), LogRouter::log_only()));
    let publisher = SensorPublisher::new(
        "bridge",
        Arc::new(TypeRegistry::standard()),
        SessionPolicy::shared(Arc::clone(&manager)),
    );
    let mut deps = deps("thermo", CountingSensor::new(json!({"temperature": 18.0})));
    deps.insert(
        "hygro".to_string(),
        CountingSensor::new(json!({"relative_humidity": 0.4})) as Arc<dyn Sensor>,
    );
    let attrs = json!({
        "primary_uri": "http://localhost:11311",
        "sensors": [
            {"topic": "/temp", "type": "sensor/Temperature", "name": "thermo", "sample_rate": 1},
            {"topic": "/humidity", "type": "sensor/RelativeHumidity", "name": "hygro", "sample_rate": 1}
        ]
    });

    publisher.reconfigure(&attrs, &deps).await?;
    for binding in publisher.bindings().await {
        assert!(binding.wait_for(BindingState::Active).await);
    }
    assert_eq!(transport.nodes_created(), 1);
    assert_eq!(manager.len().await, 1);

    let mut command = Readings::new();
    command.insert("command".to_string(), json!("reconnect"));
    let reply = publisher.do_command(&command).await?;
    assert_eq!(reply.get("ok"), Some(&json!(1)));
    assert_eq!(reply.get("reconnect_requested"), Some(&json!(2)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    for binding in publisher.bindings().await {
        assert_eq!(binding.state(), BindingState::Active);
    }
    assert_eq!(manager.len().await, 1);
    assert_eq!(transport.live_nodes(), 1);

    publisher.close().await?;
    assert!(manager.is_empty().await);
    assert_eq!(transport.live_nodes(), 0);
    Ok(())
}

#[tokio::test]
async fn unknown_type_leaves_previous_bindings_running() -> Result<(), Box<dyn std::error::Error>> {
    let transport = LoopbackTransport::default();
    let sensor = CountingSensor::new(json!({"temperature": 18.0}));
    let deps = deps("thermo", Arc::clone(&sensor));
    let publisher = fresh_publisher(&transport);

    publisher.reconfigure(&temperature_attrs(1.0), &deps).await?;
    let before = publisher.bindings().await.remove(0);
    assert!(before.wait_for(BindingState::Active).await);

    let bad = json!({
        "primary_uri": "http://localhost:11311",
        "sensors": [{"topic": "/temp", "type": "sensor/Pressure", "name": "thermo"}]
    });
    let err = publisher.reconfigure(&bad, &deps).await.unwrap_err();
    assert_eq!(err, BridgeError::TypeNotFound("sensor/Pressure".to_string()));
    assert_eq!(before.state(), BindingState::Active);
    assert_eq!(transport.live_nodes(), 1);

    publisher.close().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn publishing_starts_once_master_is_reachable() -> Result<(), Box<dyn std::error::Error>> {
    let transport = LoopbackTransport::default();
    transport.set_reachable(false);
    let mut tap = transport.tap("/temp", MessageKind::Temperature)?;
    let sensor = CountingSensor::new(json!({"temperature": 18.0}));
    let publisher = fresh_publisher(&transport);

    publisher.reconfigure(&temperature_attrs(1.0), &deps("thermo", Arc::clone(&sensor))).await?;
    let binding = publisher.bindings().await.remove(0);
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(binding.state(), BindingState::Connecting);
    assert_eq!(sensor.reads(), 0);

    transport.set_reachable(true);
    assert!(binding.wait_for(BindingState::Active).await);
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(drain(&mut tap).len(), 1);

    publisher.close().await?;
    Ok(())
}
