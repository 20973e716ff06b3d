//! The `std_msgs` primitive set.
//!
//! Generic keys follow the capitalised field vocabulary (`Data`, `FrameId`,
//! `DataOffset`, …).  `Time` and `Header::stamp` travel as RFC 3339 strings;
//! `Duration::data` is a signed nanosecond count.

use std::string::String as StdString;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::wire::RosMessage;

macro_rules! scalar_message {
    ($name:ident, $field_ty:ty, $ros:literal) => {
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(default, rename_all = "PascalCase")]
        pub struct $name {
            pub data: $field_ty,
        }

        impl RosMessage for $name {
            const ROS_TYPE: &'static str = $ros;
        }
    };
}

scalar_message!(String, StdString, "std_msgs/String");
scalar_message!(Bool, bool, "std_msgs/Bool");
scalar_message!(Int8, i8, "std_msgs/Int8");
scalar_message!(Int16, i16, "std_msgs/Int16");
scalar_message!(Int32, i32, "std_msgs/Int32");
scalar_message!(Int64, i64, "std_msgs/Int64");
scalar_message!(UInt8, u8, "std_msgs/UInt8");
scalar_message!(UInt16, u16, "std_msgs/UInt16");
scalar_message!(UInt32, u32, "std_msgs/UInt32");
scalar_message!(UInt64, u64, "std_msgs/UInt64");
scalar_message!(Float32, f32, "std_msgs/Float32");
scalar_message!(Float64, f64, "std_msgs/Float64");
scalar_message!(Time, DateTime<Utc>, "std_msgs/Time");
// Nanoseconds.
scalar_message!(Duration, i64, "std_msgs/Duration");
scalar_message!(Byte, i8, "std_msgs/Byte");
scalar_message!(Char, u8, "std_msgs/Char");

/// Standard metadata for stamped data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Header {
    pub seq: u32,
    pub stamp: DateTime<Utc>,
    pub frame_id: StdString,
}

impl RosMessage for Header {
    const ROS_TYPE: &'static str = "std_msgs/Header";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ColorRGBA {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl RosMessage for ColorRGBA {
    const ROS_TYPE: &'static str = "std_msgs/ColorRGBA";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct MultiArrayDimension {
    pub label: StdString,
    pub size: u32,
    pub stride: u32,
}

impl RosMessage for MultiArrayDimension {
    const ROS_TYPE: &'static str = "std_msgs/MultiArrayDimension";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct MultiArrayLayout {
    pub dim: Vec<MultiArrayDimension>,
    pub data_offset: u32,
}

impl RosMessage for MultiArrayLayout {
    const ROS_TYPE: &'static str = "std_msgs/MultiArrayLayout";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ByteMultiArray {
    pub layout: MultiArrayLayout,
    pub data: Vec<i8>,
}

impl RosMessage for ByteMultiArray {
    const ROS_TYPE: &'static str = "std_msgs/ByteMultiArray";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Empty {}

impl RosMessage for Empty {
    const ROS_TYPE: &'static str = "std_msgs/Empty";
}
