//! The resilient per-topic binding loop.
//!
//! A [`Binding`] owns exactly one publisher or subscription on one topic and
//! keeps it alive across session failures.  Each binding runs as one
//! supervised task that waits on cancellation, reconnect requests, session
//! events and (publish side only) the cadence ticker in a single
//! `tokio::select!`:
//!
//! | State | Meaning |
//! |---|---|
//! | [`BindingState::Connecting`] | acquiring a session and binding the topic |
//! | [`BindingState::Active`] | steady state, possibly with no endpoint bound |
//! | [`BindingState::ReconnectRequested`] | an accepted request is tearing down the old session |
//! | [`BindingState::Closing`] | cancellation observed, tearing down |
//! | [`BindingState::Closed`] | task about to exit |
//!
//! Reconnect requests arrive on a bounded queue fed by session events, failed
//! writes and [`BindingHandle::request_reconnect`].  A request within
//! [`DEBOUNCE_WINDOW`] of the last completed connect is dropped unless it
//! bypasses the debounce.  Requests raised by a session that has since been
//! replaced are dropped as stale.

use std::sync::Arc;
use std::time::Duration;

use rsb_messages::{BoundCallback, TypeDescriptor};
use rsb_middleware::{
    ConnectionManager, LogRouter, Node, NodeEvent, Publisher, RetryPolicy, Subscription, Transport,
    connect_with_retry, is_transport_failure,
};
use rsb_types::{BridgeError, Readings, Sensor};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::supervisor::Supervisor;

/// Requests closer together than this collapse into one reconnect.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

/// Capacity of each binding's reconnect queue.  Producers never block; a
/// full queue drops the request.
pub const RECONNECT_QUEUE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingState {
    Connecting,
    Active,
    ReconnectRequested,
    Closing,
    Closed,
}

/// Why a reconnect was asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectRequest {
    /// The session reported a lost connection, or a write failed.
    TransportFailure,
    /// The session was shut down underneath the binding.
    NodeClosed,
    /// An operator asked for it.
    Manual,
}

/// A queued request, tagged with the connection generation that raised it.
/// Operator requests carry no generation and are never stale.
#[derive(Debug, Clone, Copy)]
struct Pending {
    request: ReconnectRequest,
    generation: Option<u64>,
}

impl ReconnectRequest {
    fn bypasses_debounce(self) -> bool {
        !matches!(self, ReconnectRequest::TransportFailure)
    }

    /// Whether the old session should be treated as broken.
    fn session_failed(self) -> bool {
        !matches!(self, ReconnectRequest::Manual)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Debounce
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct Debouncer {
    window: Duration,
    last: Option<Instant>,
}

impl Debouncer {
    pub(crate) fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub(crate) fn accept(&self, now: Instant, force: bool) -> bool {
        force || self.last.is_none_or(|last| now.duration_since(last) >= self.window)
    }

    /// Record a completed connect.
    pub(crate) fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session policy
// ────────────────────────────────────────────────────────────────────────────

/// How a binding obtains and gives back its session.
#[derive(Clone)]
pub enum SessionPolicy {
    /// Lease a node from a shared [`ConnectionManager`].
    Shared {
        manager: Arc<ConnectionManager>,
        retry: RetryPolicy,
    },
    /// Create a node of its own on every connect.
    Fresh {
        transport: Arc<dyn Transport>,
        router: LogRouter,
        retry: RetryPolicy,
    },
}

impl SessionPolicy {
    pub fn shared(manager: Arc<ConnectionManager>) -> Self {
        SessionPolicy::Shared {
            manager,
            retry: RetryPolicy::default(),
        }
    }

    pub fn fresh(transport: Arc<dyn Transport>, router: LogRouter) -> Self {
        SessionPolicy::Fresh {
            transport,
            router,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        match &mut self {
            SessionPolicy::Shared { retry, .. } | SessionPolicy::Fresh { retry, .. } => *retry = policy,
        }
        self
    }

    /// Block until a node is available.  Cancel by dropping the future.
    async fn acquire(&self, master_address: &str, host: Option<&str>, topic: &str) -> Arc<dyn Node> {
        match self {
            SessionPolicy::Shared { manager, retry } => {
                let warn_every = retry.warn_every.max(1);
                let mut failures: u32 = 0;
                loop {
                    match manager.get_or_create(master_address, host).await {
                        Ok(node) => return node,
                        Err(e) => {
                            failures = failures.saturating_add(1);
                            if failures % warn_every == 0 {
                                warn!(topic = %topic, master = %master_address, failures, error = %e, "shared node still unavailable");
                            } else {
                                debug!(topic = %topic, master = %master_address, failures, error = %e, "shared node unavailable, retrying");
                            }
                            tokio::time::sleep(retry.backoff).await;
                        }
                    }
                }
            }
            SessionPolicy::Fresh {
                transport,
                router,
                retry,
            } => {
                let sink = router.callback(topic);
                connect_with_retry(transport.as_ref(), master_address, host, Some(sink), *retry).await
            }
        }
    }

    async fn relinquish(&self, node: Arc<dyn Node>, failed: bool) {
        match self {
            SessionPolicy::Shared { manager, .. } if failed => manager.invalidate(&node).await,
            SessionPolicy::Shared { manager, .. } => manager.release(&node).await,
            SessionPolicy::Fresh { .. } => node.shutdown().await,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Binding definition
// ────────────────────────────────────────────────────────────────────────────

/// Where a binding connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub topic: String,
    pub master_address: String,
    pub host: Option<String>,
}

/// What a binding does with its topic.
pub enum Role {
    /// Read `sensor` every `period` and publish the converted readings.
    Publish {
        sensor: Arc<dyn Sensor>,
        descriptor: TypeDescriptor,
        period: Duration,
    },
    /// Hand every inbound message to `callback`.
    Subscribe { callback: BoundCallback },
}

pub struct Binding {
    target: Target,
    role: Role,
    policy: SessionPolicy,
}

impl Binding {
    pub fn new(target: Target, role: Role, policy: SessionPolicy) -> Self {
        Self { target, role, policy }
    }

    /// Start the binding loop under `supervisor`.
    pub fn spawn(self, supervisor: &Supervisor) -> BindingHandle {
        let topic = self.target.topic.clone();
        let (state_tx, state_rx) = watch::channel(BindingState::Connecting);
        let (requests_tx, requests_rx) = mpsc::channel(RECONNECT_QUEUE);
        let handle = BindingHandle {
            topic: topic.clone(),
            state: state_rx,
            requests: requests_tx.clone(),
        };
        let task = BindingTask {
            binding: self,
            state: state_tx,
            requests: requests_tx,
        };
        supervisor.spawn(format!("binding {topic}"), move |cancel| task.run(requests_rx, cancel));
        handle
    }
}

/// Control and observation handle of a running binding.
#[derive(Debug, Clone)]
pub struct BindingHandle {
    topic: String,
    state: watch::Receiver<BindingState>,
    requests: mpsc::Sender<Pending>,
}

impl BindingHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> BindingState {
        *self.state.borrow()
    }

    /// A receiver observing every state transition.
    pub fn watch_state(&self) -> watch::Receiver<BindingState> {
        self.state.clone()
    }

    /// Wait until the binding reaches `want`.  Returns `false` if the task
    /// exited first.
    pub async fn wait_for(&self, want: BindingState) -> bool {
        let mut rx = self.state.clone();
        rx.wait_for(|s| *s == want).await.is_ok()
    }

    /// Queue a reconnect.  Returns `false` if the queue is full or the
    /// binding has stopped.
    pub fn request_reconnect(&self, request: ReconnectRequest) -> bool {
        self.requests
            .try_send(Pending {
                request,
                generation: None,
            })
            .is_ok()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Loop
// ────────────────────────────────────────────────────────────────────────────

enum Endpoint {
    Publisher(Box<dyn Publisher>),
    Subscription(Box<dyn Subscription>),
    Unbound,
}

impl Endpoint {
    fn close(&self) {
        match self {
            Endpoint::Publisher(p) => p.close(),
            Endpoint::Subscription(s) => s.close(),
            Endpoint::Unbound => {}
        }
    }
}

struct Connection {
    generation: u64,
    node: Arc<dyn Node>,
    /// `None` once the event stream has ended.
    events: Option<broadcast::Receiver<NodeEvent>>,
    endpoint: Endpoint,
}

impl Connection {
    fn publisher(&self) -> Option<&dyn Publisher> {
        match &self.endpoint {
            Endpoint::Publisher(p) => Some(p.as_ref()),
            _ => None,
        }
    }
}

struct BindingTask {
    binding: Binding,
    state: watch::Sender<BindingState>,
    requests: mpsc::Sender<Pending>,
}

impl BindingTask {
    fn topic(&self) -> &str {
        &self.binding.target.topic
    }

    fn set_state(&self, next: BindingState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(topic = %self.topic(), from = ?previous, to = ?next, "binding state");
        }
    }

    fn request(&self, request: ReconnectRequest, generation: u64) {
        let pending = Pending {
            request,
            generation: Some(generation),
        };
        if self.requests.try_send(pending).is_err() {
            debug!(topic = %self.topic(), ?request, "reconnect queue full, request dropped");
        }
    }

    fn period(&self) -> Option<Duration> {
        match &self.binding.role {
            Role::Publish { period, .. } => Some(*period),
            Role::Subscribe { .. } => None,
        }
    }

    async fn run(self, mut requests: mpsc::Receiver<Pending>, cancel: CancellationToken) {
        info!(topic = %self.topic(), master = %self.binding.target.master_address, "binding started");
        let mut debounce = Debouncer::new(DEBOUNCE_WINDOW);
        let mut generation: u64 = 1;
        let mut conn = self.establish(&cancel, generation).await;
        debounce.mark(Instant::now());

        let mut ticker = self.period().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(Pending { request, generation: raised_by }) = requests.recv() => {
                    if let Some(raised_by) = raised_by
                        && raised_by != generation
                    {
                        debug!(topic = %self.topic(), ?request, raised_by, current = generation, "stale reconnect request, ignored");
                        continue;
                    }
                    if !debounce.accept(Instant::now(), request.bypasses_debounce()) {
                        debug!(topic = %self.topic(), ?request, "reconnect request inside debounce window, ignored");
                        continue;
                    }
                    self.set_state(BindingState::ReconnectRequested);
                    info!(topic = %self.topic(), ?request, "reconnecting");
                    if let Some(old) = conn.take() {
                        self.teardown(old, request.session_failed()).await;
                    }
                    generation += 1;
                    conn = self.establish(&cancel, generation).await;
                    debounce.mark(Instant::now());
                }
                event = next_event(&mut conn) => {
                    if let Some(request) = self.inspect(event, &mut conn) {
                        self.request(request, generation);
                    }
                }
                _ = next_tick(&mut ticker) => {
                    self.publish_once(conn.as_ref(), &cancel).await;
                }
            }
        }

        self.set_state(BindingState::Closing);
        if let Some(conn) = conn.take() {
            self.teardown(conn, false).await;
        }
        self.set_state(BindingState::Closed);
        info!(topic = %self.topic(), "binding stopped");
    }

    /// Acquire a session and bind the topic.  `None` only if cancelled
    /// while waiting for a session.
    async fn establish(&self, cancel: &CancellationToken, generation: u64) -> Option<Connection> {
        self.set_state(BindingState::Connecting);
        let target = &self.binding.target;
        let node = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            node = self.binding.policy.acquire(&target.master_address, target.host.as_deref(), &target.topic) => node,
        };
        let events = Some(node.events());

        let bound = match &self.binding.role {
            Role::Publish { descriptor, .. } => node
                .advertise(&target.topic, descriptor.kind())
                .await
                .map(Endpoint::Publisher),
            Role::Subscribe { callback } => node
                .subscribe(&target.topic, callback.clone())
                .await
                .map(Endpoint::Subscription),
        };
        let endpoint = match bound {
            Ok(endpoint) => {
                info!(topic = %target.topic, node = %node.name(), "topic bound");
                endpoint
            }
            Err(e) => {
                error!(topic = %target.topic, node = %node.name(), error = %e, "failed to bind topic, waiting for a reconnect trigger");
                if matches!(e, BridgeError::NodeTerminated) || node.is_closed() {
                    self.request(ReconnectRequest::NodeClosed, generation);
                }
                Endpoint::Unbound
            }
        };

        self.set_state(BindingState::Active);
        Some(Connection {
            generation,
            node,
            events,
            endpoint,
        })
    }

    /// Close the endpoint, then give back the session.
    async fn teardown(&self, conn: Connection, failed: bool) {
        debug!(topic = %self.topic(), node = %conn.node.name(), "closing endpoint");
        conn.endpoint.close();
        debug!(topic = %self.topic(), node = %conn.node.name(), failed, "releasing session");
        self.binding.policy.relinquish(conn.node, failed).await;
    }

    fn inspect(&self, event: Result<NodeEvent, RecvError>, conn: &mut Option<Connection>) -> Option<ReconnectRequest> {
        match event {
            Ok(NodeEvent::Log { message, .. }) if is_transport_failure(&message) => {
                warn!(topic = %self.topic(), %message, "transport error logged, requesting reconnect");
                Some(ReconnectRequest::TransportFailure)
            }
            Ok(NodeEvent::Log { .. }) => None,
            Ok(NodeEvent::TransportFailure { details }) => {
                warn!(topic = %self.topic(), %details, "transport failure, requesting reconnect");
                Some(ReconnectRequest::TransportFailure)
            }
            Ok(NodeEvent::Closed) | Err(RecvError::Closed) => {
                warn!(topic = %self.topic(), "session closed underneath binding");
                if let Some(conn) = conn.as_mut() {
                    conn.events = None;
                }
                Some(ReconnectRequest::NodeClosed)
            }
            Err(RecvError::Lagged(n)) => {
                warn!(topic = %self.topic(), lagged_by = n, "session events lagged");
                None
            }
        }
    }

    /// One cadence tick: read, convert, write.  Every failure is logged and
    /// the sample dropped.
    async fn publish_once(&self, conn: Option<&Connection>, cancel: &CancellationToken) {
        let Role::Publish { sensor, descriptor, .. } = &self.binding.role else {
            return;
        };
        let topic = self.topic();

        let extra = Readings::new();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            read = sensor.readings(&extra) => read,
        };
        let readings = match read {
            Ok(readings) => readings,
            Err(e) => {
                error!(sensor = %sensor.name(), topic = %topic, error = %e, "sensor read failed, skipping tick");
                return;
            }
        };
        let msg = match descriptor.decode(&readings) {
            Ok(msg) => msg,
            Err(e) => {
                error!(sensor = %sensor.name(), topic = %topic, error = %e, "cannot convert readings, skipping tick");
                return;
            }
        };

        match conn.and_then(Connection::publisher) {
            Some(publisher) => match publisher.write(msg) {
                Ok(()) => debug!(sensor = %sensor.name(), topic = %topic, "published"),
                Err(e) => {
                    warn!(sensor = %sensor.name(), topic = %topic, error = %e, "publish failed, requesting reconnect");
                    if let Some(conn) = conn {
                        self.request(ReconnectRequest::TransportFailure, conn.generation);
                    }
                }
            },
            None => warn!(
                sensor = %sensor.name(),
                topic = %topic,
                "no publisher bound; the master may be unreachable or a reconnect is in progress, dropping sample"
            ),
        }
    }
}

impl Drop for BindingTask {
    /// A task that unwinds or is aborted still reports itself as closed.
    fn drop(&mut self) {
        let previous = self.state.send_replace(BindingState::Closed);
        if previous != BindingState::Closed {
            error!(topic = %self.topic(), last = ?previous, "binding task ended abnormally, marked closed");
        }
    }
}

async fn next_event(conn: &mut Option<Connection>) -> Result<NodeEvent, RecvError> {
    match conn.as_mut().and_then(|c| c.events.as_mut()) {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsb_messages::{TypeRegistry, WireMessage, std_msgs};
    use rsb_middleware::LoopbackTransport;
    use serde_json::json;

    #[test]
    fn debouncer_accepts_first_request() {
        let d = Debouncer::new(DEBOUNCE_WINDOW);
        assert!(d.accept(Instant::now(), false));
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_window() {
        let mut d = Debouncer::new(DEBOUNCE_WINDOW);
        let start = Instant::now();
        d.mark(start);
        assert!(!d.accept(start + Duration::from_millis(999), false));
        assert!(d.accept(start + Duration::from_millis(999), true));
        assert!(d.accept(start + Duration::from_secs(1), false));
    }

    #[test]
    fn request_kinds() {
        assert!(!ReconnectRequest::TransportFailure.bypasses_debounce());
        assert!(ReconnectRequest::Manual.bypasses_debounce());
        assert!(ReconnectRequest::NodeClosed.bypasses_debounce());
        assert!(!ReconnectRequest::Manual.session_failed());
        assert!(ReconnectRequest::TransportFailure.session_failed());
    }

    fn subscribe_binding(
        transport: &LoopbackTransport,
        sink: mpsc::UnboundedSender<Readings>,
    ) -> Binding {
        let callback = TypeRegistry::standard()
            .bind_callback(
                "std_msgs/String",
                Arc::new(move |readings| {
                    let _ = sink.send(readings);
                }),
            )
            .unwrap();
        Binding::new(
            Target {
                topic: "/chatter".to_string(),
                master_address: "http://localhost:11311".to_string(),
                host: None,
            },
            Role::Subscribe { callback },
            SessionPolicy::fresh(Arc::new(transport.clone()), LogRouter::log_only()),
        )
    }

    #[tokio::test]
    async fn subscribe_binding_delivers_and_closes() {
        let transport = LoopbackTransport::default();
        let supervisor = Supervisor::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = subscribe_binding(&transport, tx).spawn(&supervisor);

        assert!(handle.wait_for(BindingState::Active).await);
        let msg: WireMessage = std_msgs::String { data: "hello".into() }.into();
        assert_eq!(transport.inject("/chatter", msg).unwrap(), 1);
        let readings = rx.recv().await.unwrap();
        assert_eq!(readings["Data"], json!("hello"));

        let mut states = handle.watch_state();
        supervisor.shutdown().await;
        assert_eq!(*states.borrow_and_update(), BindingState::Closed);
        assert_eq!(transport.live_nodes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_reconnect_bypasses_debounce() {
        let transport = LoopbackTransport::default();
        let supervisor = Supervisor::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = subscribe_binding(&transport, tx).spawn(&supervisor);
        assert!(handle.wait_for(BindingState::Active).await);
        assert_eq!(transport.nodes_created(), 1);

        assert!(handle.request_reconnect(ReconnectRequest::Manual));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.nodes_created(), 2);
        assert_eq!(transport.live_nodes(), 1);

        supervisor.shutdown().await;
    }

    struct Exploding;

    #[async_trait::async_trait]
    impl Sensor for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        async fn readings(&self, _extra: &Readings) -> Result<Readings, BridgeError> {
            panic!("driver fault");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_binding_reports_closed() {
        let transport = LoopbackTransport::default();
        let supervisor = Supervisor::new();
        let descriptor = TypeRegistry::standard().lookup("sensor/Temperature").unwrap().clone();
        let binding = Binding::new(
            Target {
                topic: "/temp".to_string(),
                master_address: "http://localhost:11311".to_string(),
                host: None,
            },
            Role::Publish {
                sensor: Arc::new(Exploding),
                descriptor,
                period: Duration::from_millis(100),
            },
            SessionPolicy::fresh(Arc::new(transport.clone()), LogRouter::log_only()),
        );
        let handle = binding.spawn(&supervisor);
        assert!(handle.wait_for(BindingState::Active).await);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(handle.state(), BindingState::Closed);
        assert_eq!(supervisor.running(), 0);
        assert!(!handle.request_reconnect(ReconnectRequest::Manual));

        supervisor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_master_keeps_connecting_until_cancelled() {
        let transport = LoopbackTransport::default();
        transport.set_reachable(false);
        let supervisor = Supervisor::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = subscribe_binding(&transport, tx).spawn(&supervisor);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(handle.state(), BindingState::Connecting);
        assert!(transport.connect_attempts() >= 3);

        supervisor.shutdown().await;
        assert_eq!(handle.state(), BindingState::Closed);
    }
}
