//! In-process transport built on Tokio broadcast channels.
//!
//! Every node created by one [`LoopbackTransport`] shares a fabric of
//! per-topic broadcast channels, so a publisher on one node reaches every
//! subscriber on every other node without any single subscriber blocking
//! the others.  A topic carries exactly one message type, fixed by whoever
//! touches it first.
//!
//! Fault injection for tests and demos:
//!
//! | Call | Effect |
//! |---|---|
//! | [`LoopbackTransport::set_reachable`] | `false` makes every `connect` fail with a dial error |
//! | [`LoopbackTransport::sever`] | every live node logs a `dial tcp` error and emits [`NodeEvent::TransportFailure`] |
//! | [`LoopbackTransport::inject_log`] | every live node emits an arbitrary log line |
//! | [`LoopbackTransport::fail_writes`] | `true` makes every publisher write fail, with no node event |

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use rsb_messages::{BoundCallback, MessageKind, WireMessage};
use rsb_types::{BridgeError, LogLevel};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::session::{LogCallback, Node, NodeConfig, NodeEvent, Publisher, Subscription, Transport};

/// Messages buffered per topic before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 64;

struct TopicChannel {
    kind: MessageKind,
    sender: broadcast::Sender<WireMessage>,
}

struct Fabric {
    capacity: usize,
    reachable: AtomicBool,
    writes_failing: AtomicBool,
    connect_attempts: AtomicUsize,
    nodes_created: AtomicUsize,
    topics: Mutex<HashMap<String, TopicChannel>>,
    nodes: Mutex<Vec<Weak<LoopbackNode>>>,
}

impl Fabric {
    fn channel(&self, topic: &str, kind: MessageKind) -> Result<broadcast::Sender<WireMessage>, BridgeError> {
        let mut topics = self.topics.lock();
        match topics.get(topic) {
            Some(ch) if ch.kind != kind => Err(BridgeError::TypeMismatch {
                expected: ch.kind.ros_type().to_string(),
                actual: kind.ros_type().to_string(),
            }),
            Some(ch) => Ok(ch.sender.clone()),
            None => {
                let (sender, _) = broadcast::channel(self.capacity);
                topics.insert(
                    topic.to_string(),
                    TopicChannel {
                        kind,
                        sender: sender.clone(),
                    },
                );
                Ok(sender)
            }
        }
    }

    fn live_nodes(&self) -> Vec<Arc<LoopbackNode>> {
        let mut nodes = self.nodes.lock();
        nodes.retain(|weak| weak.upgrade().is_some_and(|n| !n.is_closed()));
        nodes.iter().filter_map(Weak::upgrade).collect()
    }
}

/// Strip the URL scheme, leaving `host:port`.
fn dial_target(master_address: &str) -> &str {
    master_address
        .split_once("://")
        .map_or(master_address, |(_, rest)| rest)
        .trim_end_matches('/')
}

// ────────────────────────────────────────────────────────────────────────────
// Transport
// ────────────────────────────────────────────────────────────────────────────

/// Shared in-process transport.  Clone it cheaply; all clones share the same
/// topics and nodes.
#[derive(Clone)]
pub struct LoopbackTransport {
    fabric: Arc<Fabric>,
}

impl LoopbackTransport {
    /// `capacity` applies to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        Self {
            fabric: Arc::new(Fabric {
                capacity: capacity.max(1),
                reachable: AtomicBool::new(true),
                writes_failing: AtomicBool::new(false),
                connect_attempts: AtomicUsize::new(0),
                nodes_created: AtomicUsize::new(0),
                topics: Mutex::new(HashMap::new()),
                nodes: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.fabric.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.fabric.reachable.load(Ordering::SeqCst)
    }

    /// While `true`, every publisher write returns a transport error.
    pub fn fail_writes(&self, failing: bool) {
        self.fabric.writes_failing.store(failing, Ordering::SeqCst);
    }

    /// Successful `connect` calls so far.
    pub fn nodes_created(&self) -> usize {
        self.fabric.nodes_created.load(Ordering::SeqCst)
    }

    /// All `connect` calls so far, failed ones included.
    pub fn connect_attempts(&self) -> usize {
        self.fabric.connect_attempts.load(Ordering::SeqCst)
    }

    /// Nodes created and not yet shut down.
    pub fn live_nodes(&self) -> usize {
        self.fabric.live_nodes().len()
    }

    /// Simulate every live node losing its TCP connections.
    pub fn sever(&self) {
        for node in self.fabric.live_nodes() {
            let details = format!("dial tcp {}: connect: connection refused", dial_target(&node.master_address));
            node.report_failure(details);
        }
    }

    /// Make every live node emit `message` at `level`.
    pub fn inject_log(&self, level: LogLevel, message: &str) {
        for node in self.fabric.live_nodes() {
            node.log(level, message.to_string());
        }
    }

    /// Observe raw traffic on `topic`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::TypeMismatch`] if `topic` carries another type.
    pub fn tap(&self, topic: &str, kind: MessageKind) -> Result<broadcast::Receiver<WireMessage>, BridgeError> {
        Ok(self.fabric.channel(topic, kind)?.subscribe())
    }

    /// Publish `msg` on `topic` from outside any node.  Returns the number of
    /// subscribers reached.
    ///
    /// # Errors
    ///
    /// [`BridgeError::TypeMismatch`] if `topic` carries another type.
    pub fn inject(&self, topic: &str, msg: WireMessage) -> Result<usize, BridgeError> {
        let sender = self.fabric.channel(topic, msg.kind())?;
        Ok(sender.send(msg).unwrap_or(0))
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self, config: NodeConfig) -> Result<Arc<dyn Node>, BridgeError> {
        self.fabric.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.is_reachable() {
            return Err(BridgeError::ConnectionFailure {
                details: format!(
                    "dial tcp {}: connect: connection refused",
                    dial_target(&config.master_address)
                ),
                master: config.master_address,
            });
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let node = Arc::new(LoopbackNode {
            name: config.name,
            master_address: config.master_address,
            host: config.host,
            log_sink: config.log_sink,
            fabric: Arc::clone(&self.fabric),
            events,
            closed: Arc::new(AtomicBool::new(false)),
            deliveries: Mutex::new(Vec::new()),
        });
        self.fabric.nodes.lock().push(Arc::downgrade(&node));
        self.fabric.nodes_created.fetch_add(1, Ordering::SeqCst);
        node.log(LogLevel::Debug, format!("registered with master {}", node.master_address));
        Ok(node)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Node
// ────────────────────────────────────────────────────────────────────────────

pub struct LoopbackNode {
    name: String,
    master_address: String,
    host: Option<String>,
    log_sink: Option<LogCallback>,
    fabric: Arc<Fabric>,
    events: broadcast::Sender<NodeEvent>,
    closed: Arc<AtomicBool>,
    deliveries: Mutex<Vec<AbortHandle>>,
}

impl LoopbackNode {
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    fn log(&self, level: LogLevel, message: String) {
        if let Some(sink) = &self.log_sink {
            sink(level, &message);
        }
        // No receivers is fine.
        let _ = self.events.send(NodeEvent::Log { level, message });
    }

    fn report_failure(&self, details: String) {
        self.log(LogLevel::Error, format!("got an error: {details}"));
        let _ = self.events.send(NodeEvent::TransportFailure { details });
    }

    fn ensure_open(&self) -> Result<(), BridgeError> {
        if self.is_closed() {
            Err(BridgeError::NodeTerminated)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Node for LoopbackNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn master_address(&self) -> &str {
        &self.master_address
    }

    async fn advertise(&self, topic: &str, kind: MessageKind) -> Result<Box<dyn Publisher>, BridgeError> {
        self.ensure_open()?;
        let sender = self.fabric.channel(topic, kind)?;
        debug!(node = %self.name, topic = %topic, ros_type = kind.ros_type(), "advertised");
        Ok(Box::new(LoopbackPublisher {
            topic: topic.to_string(),
            kind,
            sender,
            fabric: Arc::clone(&self.fabric),
            node_closed: Arc::clone(&self.closed),
            closed: AtomicBool::new(false),
        }))
    }

    async fn subscribe(&self, topic: &str, callback: BoundCallback) -> Result<Box<dyn Subscription>, BridgeError> {
        self.ensure_open()?;
        let mut receiver = self.fabric.channel(topic, callback.kind())?.subscribe();
        let task_topic = topic.to_string();
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if let Err(e) = callback.deliver(msg) {
                            warn!(topic = %task_topic, error = %e, "dropping undeliverable message");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = %task_topic, lagged_by = n, "subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.deliveries.lock().push(handle.abort_handle());
        debug!(node = %self.name, topic = %topic, "subscribed");
        Ok(Box::new(LoopbackSubscription {
            topic: topic.to_string(),
            delivery: handle.abort_handle(),
        }))
    }

    fn events(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for delivery in self.deliveries.lock().drain(..) {
            delivery.abort();
        }
        self.log(LogLevel::Debug, format!("node {} shut down", self.name));
        let _ = self.events.send(NodeEvent::Closed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Publisher / Subscription
// ────────────────────────────────────────────────────────────────────────────

struct LoopbackPublisher {
    topic: String,
    kind: MessageKind,
    sender: broadcast::Sender<WireMessage>,
    fabric: Arc<Fabric>,
    node_closed: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl Publisher for LoopbackPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn write(&self, msg: WireMessage) -> Result<(), BridgeError> {
        if self.closed.load(Ordering::SeqCst) || self.node_closed.load(Ordering::SeqCst) {
            return Err(BridgeError::NodeTerminated);
        }
        if self.fabric.writes_failing.load(Ordering::SeqCst) {
            return Err(BridgeError::TransportFailure(format!("write tcp {}: broken pipe", self.topic)));
        }
        if msg.kind() != self.kind {
            return Err(BridgeError::TypeMismatch {
                expected: self.kind.ros_type().to_string(),
                actual: msg.ros_type().to_string(),
            });
        }
        // No subscribers is a normal condition.
        let _ = self.sender.send(msg);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct LoopbackSubscription {
    topic: String,
    delivery: AbortHandle,
}

impl Subscription for LoopbackSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn close(&self) {
        self.delivery.abort();
    }
}

impl Drop for LoopbackSubscription {
    fn drop(&mut self) {
        self.delivery.abort();
    }
}
