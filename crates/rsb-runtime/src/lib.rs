//! # rsb-runtime
//!
//! Bridge components and the per-topic loop that keeps them connected.
//!
//! | Module | Contents |
//! |---|---|
//! | [`config`] | Publisher and subscriber configuration with validation |
//! | [`binding`] | [`Binding`]: one topic, one session, reconnect with debounce |
//! | [`supervisor`] | [`Supervisor`]: panic-isolating task set with a shutdown barrier |
//! | [`snapshot`] | [`Snapshot`]: latest decoded message, swapped atomically |
//! | [`component`] | The [`Component`] lifecycle trait |
//! | [`publisher`] | [`SensorPublisher`]: sensors → topics |
//! | [`subscriber`] | [`SensorSubscriber`]: topic → readings |
//! | [`telemetry`] | [`init_tracing`] |
//!
//! Components never own a transport directly; they receive a
//! [`SessionPolicy`] that either leases shared sessions from a
//! [`ConnectionManager`](rsb_middleware::ConnectionManager) or creates a
//! fresh one per connect.

pub mod binding;
pub mod component;
pub mod config;
pub mod publisher;
pub mod snapshot;
pub mod subscriber;
pub mod supervisor;
pub mod telemetry;

pub use binding::{
    Binding, BindingHandle, BindingState, DEBOUNCE_WINDOW, RECONNECT_QUEUE, ReconnectRequest, Role, SessionPolicy,
    Target,
};
pub use component::{Component, Dependencies, Running};
pub use config::{PublisherConfig, SensorConfig, SubscribedTopic, SubscriberConfig};
pub use publisher::SensorPublisher;
pub use snapshot::Snapshot;
pub use subscriber::SensorSubscriber;
pub use supervisor::Supervisor;
pub use telemetry::{TracerProviderGuard, init_tracing};
