//! # rsb-messages
//!
//! Wire message shapes and the type registry that maps symbolic type names
//! onto them.
//!
//! | Module | Contents |
//! |---|---|
//! | [`std_msgs`] | The primitive scalar, array, time and layout messages |
//! | [`sensor_msgs`] | `Temperature` and `RelativeHumidity` with defaulted variance |
//! | [`custom`] | `ThrottlingStates`, eight required boolean flags |
//! | [`wire`] | [`WireMessage`] sum type and the [`RosMessage`] trait |
//! | [`registry`] | [`TypeRegistry`], [`TypeDescriptor`], [`BoundCallback`] |
//!
//! ```rust
//! use rsb_messages::{TypeRegistry, WireMessage};
//! use serde_json::json;
//!
//! let registry = TypeRegistry::standard();
//! let readings = json!({"temperature": 21.5}).as_object().cloned().unwrap_or_default();
//! let msg = registry.to_wire_message("sensor/Temperature", &readings).unwrap();
//! assert_eq!(msg.ros_type(), "sensor_msgs/Temperature");
//! ```

pub mod custom;
pub mod fields;
pub mod registry;
pub mod sensor_msgs;
pub mod std_msgs;
pub mod wire;

pub use registry::{BoundCallback, ReadingsHandler, TypeDescriptor, TypeRegistry};
pub use wire::{FieldRename, MessageKind, RosMessage, WireMessage};
