//! Symbolic type name → message shape registry.
//!
//! A [`TypeRegistry`] is built once at start-up from layers (built-in
//! `std_msgs` first, then extensions, later layers overriding earlier ones)
//! and shared as `Arc<TypeRegistry>`.  Every string lookup happens when a
//! binding is created; the resulting [`TypeDescriptor`] and
//! [`BoundCallback`] dispatch on [`MessageKind`] from then on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rsb_types::{BridgeError, Readings};
use tracing::debug;

use crate::custom::ThrottlingStates;
use crate::sensor_msgs::{RelativeHumidity, Temperature};
use crate::std_msgs;
use crate::wire::{FieldRename, MessageKind, RosMessage, WireMessage};

/// Handler invoked with each decoded inbound message, already flattened.
pub type ReadingsHandler = Arc<dyn Fn(Readings) + Send + Sync>;

type DeliverFn = Arc<dyn Fn(WireMessage) -> Result<(), BridgeError> + Send + Sync>;

// ────────────────────────────────────────────────────────────────────────────
// TypeDescriptor
// ────────────────────────────────────────────────────────────────────────────

/// Everything the bridge needs to know about one registered type name.
#[derive(Clone)]
pub struct TypeDescriptor {
    name: String,
    kind: MessageKind,
    renames: &'static [FieldRename],
    zero: fn() -> WireMessage,
    decode: fn(&str, &Readings) -> Result<WireMessage, BridgeError>,
    bind: fn(&str, ReadingsHandler) -> BoundCallback,
}

impl TypeDescriptor {
    /// Describe `T` under the symbolic `name`.
    pub fn of<T: RosMessage>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: zero_of::<T>().kind(),
            renames: T::RENAMES,
            zero: zero_of::<T>,
            decode: decode_as::<T>,
            bind: bind_as::<T>,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Middleware type string carried on the wire.
    pub fn ros_type(&self) -> &'static str {
        self.kind.ros_type()
    }

    /// Generic-key ↔ wire-field renames; empty for round-trip types.
    pub fn renames(&self) -> &'static [FieldRename] {
        self.renames
    }

    /// A freshly constructed zero value.
    pub fn zero(&self) -> WireMessage {
        (self.zero)()
    }

    /// Populate a message of this type from a generic readings map.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Decode`] for round-trip types whose fields have the
    /// wrong shape; [`BridgeError::FieldNotFound`] /
    /// [`BridgeError::FieldWrongType`] for field-mapped types.
    pub fn decode(&self, readings: &Readings) -> Result<WireMessage, BridgeError> {
        (self.decode)(&self.name, readings)
    }

    /// Wrap `handler` into a delivery function accepting exactly this type.
    pub fn bind(&self, handler: ReadingsHandler) -> BoundCallback {
        (self.bind)(&self.name, handler)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("renames", &self.renames)
            .finish_non_exhaustive()
    }
}

fn zero_of<T: RosMessage>() -> WireMessage {
    T::default().into()
}

fn decode_as<T: RosMessage>(type_name: &str, readings: &Readings) -> Result<WireMessage, BridgeError> {
    T::from_readings(type_name, readings).map(Into::into)
}

fn bind_as<T: RosMessage>(type_name: &str, handler: ReadingsHandler) -> BoundCallback {
    let deliver: DeliverFn = Arc::new(move |msg: WireMessage| {
        let typed = T::try_from(msg)?;
        handler(typed.to_readings()?);
        Ok(())
    });
    BoundCallback {
        type_name: type_name.to_string(),
        kind: zero_of::<T>().kind(),
        deliver,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BoundCallback
// ────────────────────────────────────────────────────────────────────────────

/// A subscribe-side delivery function fixed to one wire type.
///
/// Cloning is cheap; every clone shares the same handler.
#[derive(Clone)]
pub struct BoundCallback {
    type_name: String,
    kind: MessageKind,
    deliver: DeliverFn,
}

impl BoundCallback {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Hand one inbound message to the handler.
    ///
    /// # Errors
    ///
    /// [`BridgeError::TypeMismatch`] if `msg` is not of the bound type, or a
    /// flatten error from the message's conversion.
    pub fn deliver(&self, msg: WireMessage) -> Result<(), BridgeError> {
        (self.deliver)(msg)
    }
}

impl fmt::Debug for BoundCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundCallback")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TypeRegistry
// ────────────────────────────────────────────────────────────────────────────

/// Name-keyed table of [`TypeDescriptor`]s.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `std_msgs` primitive set, each registered under its own
    /// middleware type string.
    pub fn builtin() -> Self {
        let mut r = Self::new();
        r.register_ros::<std_msgs::Header>();
        r.register_ros::<std_msgs::String>();
        r.register_ros::<std_msgs::Bool>();
        r.register_ros::<std_msgs::Int8>();
        r.register_ros::<std_msgs::Int16>();
        r.register_ros::<std_msgs::Int32>();
        r.register_ros::<std_msgs::Int64>();
        r.register_ros::<std_msgs::UInt8>();
        r.register_ros::<std_msgs::UInt16>();
        r.register_ros::<std_msgs::UInt32>();
        r.register_ros::<std_msgs::UInt64>();
        r.register_ros::<std_msgs::Float32>();
        r.register_ros::<std_msgs::Float64>();
        r.register_ros::<std_msgs::Time>();
        r.register_ros::<std_msgs::Duration>();
        r.register_ros::<std_msgs::ColorRGBA>();
        r.register_ros::<std_msgs::MultiArrayDimension>();
        r.register_ros::<std_msgs::MultiArrayLayout>();
        r.register_ros::<std_msgs::Byte>();
        r.register_ros::<std_msgs::ByteMultiArray>();
        r.register_ros::<std_msgs::Char>();
        r.register_ros::<std_msgs::Empty>();
        r
    }

    /// Domain types with field-mapped conversions.
    pub fn extensions() -> Self {
        let mut r = Self::new();
        r.register_type::<Temperature>("sensor/Temperature");
        r.register_type::<RelativeHumidity>("sensor/RelativeHumidity");
        r.register_type::<ThrottlingStates>("ThrottlingStates");
        r
    }

    /// Merge `layers` in order; a name present in a later layer replaces
    /// the earlier entry.
    pub fn layered(layers: impl IntoIterator<Item = TypeRegistry>) -> Self {
        let mut merged = Self::new();
        for layer in layers {
            for (name, descriptor) in layer.types {
                if let Some(previous) = merged.register(descriptor) {
                    debug!(type_name = %name, replaced = previous.ros_type(), "type overridden by later layer");
                }
            }
        }
        merged
    }

    /// Built-ins overlaid with extensions.
    pub fn standard() -> Self {
        Self::layered([Self::builtin(), Self::extensions()])
    }

    /// Insert `descriptor`, returning the entry it replaced, if any.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Option<TypeDescriptor> {
        self.types.insert(descriptor.name.clone(), descriptor)
    }

    pub fn register_type<T: RosMessage>(&mut self, name: impl Into<String>) -> Option<TypeDescriptor> {
        self.register(TypeDescriptor::of::<T>(name))
    }

    fn register_ros<T: RosMessage>(&mut self) {
        self.register_type::<T>(T::ROS_TYPE);
    }

    /// # Errors
    ///
    /// [`BridgeError::TypeNotFound`] if `name` is not registered.
    pub fn lookup(&self, name: &str) -> Result<&TypeDescriptor, BridgeError> {
        self.types
            .get(name)
            .ok_or_else(|| BridgeError::TypeNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Every registered name, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Convert a generic readings map into the wire message registered as
    /// `name`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::TypeNotFound`] for an unknown name, otherwise the
    /// descriptor's decode error.
    pub fn to_wire_message(&self, name: &str, readings: &Readings) -> Result<WireMessage, BridgeError> {
        self.lookup(name)?.decode(readings)
    }

    /// Flatten a wire message into a generic readings map.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Flatten`] if the message cannot be represented as a
    /// map.
    pub fn to_generic_map(&self, msg: &WireMessage) -> Result<Readings, BridgeError> {
        msg.to_readings()
    }

    /// Wrap `handler` into a delivery function for the type registered as
    /// `name`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::TypeNotFound`] for an unknown name.
    pub fn bind_callback(&self, name: &str, handler: ReadingsHandler) -> Result<BoundCallback, BridgeError> {
        Ok(self.lookup(name)?.bind(handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::{Value, json};

    fn readings(value: Value) -> Readings {
        match value {
            Value::Object(map) => map,
            _ => panic!("test readings must be an object"),
        }
    }

    #[test]
    fn standard_registry_has_every_catalogue_entry() {
        let r = TypeRegistry::standard();
        assert_eq!(r.len(), 25);
        for name in [
            "std_msgs/Header",
            "std_msgs/Time",
            "std_msgs/ByteMultiArray",
            "std_msgs/Empty",
            "sensor/Temperature",
            "sensor/RelativeHumidity",
            "ThrottlingStates",
        ] {
            assert!(r.contains(name), "{name} missing");
        }
        let names = r.names();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn every_zero_value_round_trips() {
        let r = TypeRegistry::standard();
        for name in r.names() {
            let descriptor = r.lookup(name).unwrap();
            let zero = descriptor.zero();
            let flat = r.to_generic_map(&zero).unwrap();
            let back = r
                .to_wire_message(name, &flat)
                .unwrap_or_else(|e| panic!("{name}: {e}"));
            assert_eq!(back, zero, "{name} did not round-trip");
        }
    }

    #[test]
    fn unknown_names_are_type_not_found() {
        let r = TypeRegistry::standard();
        for name in ["", "std_msgs/Nope", "sensor/temperature", "geometry_msgs/Pose"] {
            assert_eq!(
                r.lookup(name).unwrap_err(),
                BridgeError::TypeNotFound(name.to_string())
            );
            assert_eq!(
                r.to_wire_message(name, &Readings::new()).unwrap_err(),
                BridgeError::TypeNotFound(name.to_string())
            );
            let handler: ReadingsHandler = Arc::new(|_| {});
            assert!(matches!(
                r.bind_callback(name, handler),
                Err(BridgeError::TypeNotFound(_))
            ));
        }
    }

    #[test]
    fn later_layer_wins() {
        let mut first = TypeRegistry::new();
        first.register_type::<std_msgs::Float64>("reading");
        let mut second = TypeRegistry::new();
        second.register_type::<Temperature>("reading");

        let r = TypeRegistry::layered([first, second]);
        assert_eq!(r.len(), 1);
        assert_eq!(r.lookup("reading").unwrap().kind(), MessageKind::Temperature);
    }

    #[test]
    fn register_overwrites_and_returns_previous() {
        let mut r = TypeRegistry::new();
        assert!(r.register_type::<std_msgs::Bool>("flag").is_none());
        let previous = r.register_type::<std_msgs::Int8>("flag").unwrap();
        assert_eq!(previous.kind(), MessageKind::Bool);
        assert_eq!(r.lookup("flag").unwrap().ros_type(), "std_msgs/Int8");
    }

    #[test]
    fn descriptors_expose_renames() {
        let r = TypeRegistry::standard();
        let throttling = r.lookup("ThrottlingStates").unwrap();
        assert_eq!(throttling.ros_type(), "sample_msgs/ThrottlingStates");
        assert!(
            throttling
                .renames()
                .iter()
                .any(|f| f.key == "undervolt" && f.wire == "undervoltage")
        );
        assert!(r.lookup("std_msgs/Bool").unwrap().renames().is_empty());
    }

    #[test]
    fn temperature_example_conversion() {
        let r = TypeRegistry::standard();
        let msg = r
            .to_wire_message("sensor/Temperature", &readings(json!({"temperature": 21.5})))
            .unwrap();
        match msg {
            WireMessage::Temperature(t) => {
                assert_eq!(t.temperature, 21.5);
                assert_eq!(t.variance, 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bound_callback_delivers_flattened_readings() {
        let r = TypeRegistry::standard();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb = r
            .bind_callback(
                "std_msgs/Float64",
                Arc::new(move |m| sink.lock().unwrap().push(m)),
            )
            .unwrap();
        assert_eq!(cb.kind(), MessageKind::Float64);

        cb.deliver(std_msgs::Float64 { data: 42.0 }.into()).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].get("Data"), Some(&json!(42.0)));
    }

    #[test]
    fn bound_callback_rejects_other_types() {
        let r = TypeRegistry::standard();
        let cb = r.bind_callback("std_msgs/Time", Arc::new(|_| {})).unwrap();
        let err = cb.deliver(std_msgs::Bool { data: true }.into()).unwrap_err();
        assert_eq!(
            err,
            BridgeError::TypeMismatch {
                expected: "std_msgs/Time".to_string(),
                actual: "std_msgs/Bool".to_string(),
            }
        );
    }
}
