//! `rsb-middleware` – session plumbing for the ROS sensor bridge.
//!
//! Owns every handle to a middleware master and knows nothing about what
//! the sensors mean.
//!
//! # Modules
//!
//! - [`session`] – the [`Transport`] / [`Node`] seam and its per-topic
//!   [`Publisher`] and [`Subscription`] handles.
//! - [`manager`] – session naming, the shared-by-address
//!   [`ConnectionManager`], and [`connect_with_retry`] for the
//!   always-fresh policy.
//! - [`log`] – [`LogRouter`] forwarding session log lines to `tracing`, and
//!   [`is_transport_failure`] log inspection.
//! - [`loopback`] – [`LoopbackTransport`], an in-process transport over
//!   Tokio broadcast channels with fault injection.

pub mod log;
pub mod loopback;
pub mod manager;
pub mod session;

pub use log::{FatalPolicy, LogRouter, is_transport_failure};
pub use loopback::{LoopbackNode, LoopbackTransport};
pub use manager::{ConnectionManager, RetryPolicy, connect_with_retry, session_name};
pub use session::{LogCallback, Node, NodeConfig, NodeEvent, Publisher, Subscription, Transport};
