//! Board throttling state, as reported by single-board-computer firmware.

use rsb_types::{BridgeError, Readings};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fields::{self, HEADER_KEY};
use crate::std_msgs::Header;
use crate::wire::{FieldRename, RosMessage};

/// Every boolean field is required; there is no sensible default for a
/// hardware fault flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottlingStates {
    pub header: Header,
    pub undervoltage: bool,
    pub arm_frequently_capped: bool,
    pub throttled: bool,
    pub soft_temperature_limit_active: bool,
    pub undervoltage_occurred: bool,
    pub arm_frequently_capped_occurred: bool,
    pub throttling_occurred: bool,
    pub soft_temperature_limit_occurred: bool,
}

const FLAG_RENAMES: [FieldRename; 8] = [
    FieldRename::new("undervolt", "undervoltage"),
    FieldRename::new("arm_freq_capped", "arm_frequently_capped"),
    FieldRename::new("throttled", "throttled"),
    FieldRename::new("soft_temp_limit", "soft_temperature_limit_active"),
    FieldRename::new("undervolt_occurred", "undervoltage_occurred"),
    FieldRename::new("arm_freq_capped_occurred", "arm_frequently_capped_occurred"),
    FieldRename::new("throttled_occurred", "throttling_occurred"),
    FieldRename::new("soft_temp_limit_occurred", "soft_temperature_limit_occurred"),
];

impl ThrottlingStates {
    fn flags(&self) -> [bool; 8] {
        [
            self.undervoltage,
            self.arm_frequently_capped,
            self.throttled,
            self.soft_temperature_limit_active,
            self.undervoltage_occurred,
            self.arm_frequently_capped_occurred,
            self.throttling_occurred,
            self.soft_temperature_limit_occurred,
        ]
    }
}

impl RosMessage for ThrottlingStates {
    const ROS_TYPE: &'static str = "sample_msgs/ThrottlingStates";
    const RENAMES: &'static [FieldRename] = &FLAG_RENAMES;

    fn from_readings(type_name: &str, readings: &Readings) -> Result<Self, BridgeError> {
        let mut flags = [false; 8];
        for (flag, rename) in flags.iter_mut().zip(FLAG_RENAMES.iter()) {
            *flag = fields::require_bool(type_name, readings, rename.key)?;
        }
        let [
            undervoltage,
            arm_frequently_capped,
            throttled,
            soft_temperature_limit_active,
            undervoltage_occurred,
            arm_frequently_capped_occurred,
            throttling_occurred,
            soft_temperature_limit_occurred,
        ] = flags;

        Ok(Self {
            header: fields::optional_header(type_name, readings)?,
            undervoltage,
            arm_frequently_capped,
            throttled,
            soft_temperature_limit_active,
            undervoltage_occurred,
            arm_frequently_capped_occurred,
            throttling_occurred,
            soft_temperature_limit_occurred,
        })
    }

    fn to_readings(&self) -> Result<Readings, BridgeError> {
        let mut out = Readings::new();
        out.insert(HEADER_KEY.to_string(), fields::header_value(&self.header)?);
        for (rename, flag) in FLAG_RENAMES.iter().zip(self.flags()) {
            out.insert(rename.key.to_string(), Value::Bool(flag));
        }
        Ok(out)
    }
}
