//! The session seam.
//!
//! The bridge never speaks a concrete wire protocol directly.  It asks a
//! [`Transport`] for a [`Node`] (one session with a master), and the node
//! hands out publishers and subscriptions bound to one topic each.
//!
//! # Overview
//!
//! - [`Transport`] – creates nodes; the only thing a connection policy needs.
//! - [`Node`] – a live session: advertise, subscribe, observe events, shut down.
//! - [`Publisher`] / [`Subscription`] – per-topic handles owned by a binding.
//! - [`NodeEvent`] – structured log and transport-health stream of a node.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rsb_messages::{BoundCallback, MessageKind, WireMessage};
use rsb_types::{BridgeError, LogLevel};
use tokio::sync::broadcast;

/// Receives every log line a node emits.
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Parameters for one session with a master.
#[derive(Clone)]
pub struct NodeConfig {
    /// Unique session name registered with the master.
    pub name: String,
    /// Master endpoint, e.g. `http://localhost:11311`.
    pub master_address: String,
    /// Local address other participants use to reach this node.
    pub host: Option<String>,
    pub log_sink: Option<LogCallback>,
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("name", &self.name)
            .field("master_address", &self.master_address)
            .field("host", &self.host)
            .field("log_sink", &self.log_sink.is_some())
            .finish()
    }
}

/// Something a node observed about itself.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// A free-text log line, as also handed to the node's log sink.
    Log { level: LogLevel, message: String },
    /// The node lost a connection it depends on.
    TransportFailure { details: String },
    /// The node was shut down; no further events follow.
    Closed,
}

/// Creates sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session with the master named in `config`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConnectionFailure`] when the master cannot be reached.
    async fn connect(&self, config: NodeConfig) -> Result<Arc<dyn Node>, BridgeError>;
}

/// One live session with a master.
#[async_trait]
pub trait Node: Send + Sync {
    fn name(&self) -> &str;

    fn master_address(&self) -> &str;

    /// Announce a publisher of `kind` messages on `topic`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NodeTerminated`] after [`Node::shutdown`];
    /// [`BridgeError::TypeMismatch`] if the topic already carries another
    /// type.
    async fn advertise(&self, topic: &str, kind: MessageKind) -> Result<Box<dyn Publisher>, BridgeError>;

    /// Deliver every message arriving on `topic` to `callback`.
    ///
    /// # Errors
    ///
    /// Same as [`Node::advertise`].
    async fn subscribe(&self, topic: &str, callback: BoundCallback) -> Result<Box<dyn Subscription>, BridgeError>;

    /// A fresh receiver of this node's [`NodeEvent`]s.
    fn events(&self) -> broadcast::Receiver<NodeEvent>;

    /// Close the session.  Idempotent.
    async fn shutdown(&self);

    fn is_closed(&self) -> bool;
}

impl fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name())
            .field("master_address", &self.master_address())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Write side of one topic.
pub trait Publisher: Send + Sync {
    fn topic(&self) -> &str;

    /// Send one message.  Having no subscribers is not an error.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NodeTerminated`] once the publisher or its node is
    /// closed; [`BridgeError::TypeMismatch`] for a message of another type.
    fn write(&self, msg: WireMessage) -> Result<(), BridgeError>;

    fn close(&self);
}

/// Read side of one topic.  Dropping a subscription closes it.
pub trait Subscription: Send + Sync {
    fn topic(&self) -> &str;

    fn close(&self);
}
