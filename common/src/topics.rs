//! MQTT topic layout. Device ids come from configuration, so the
//! per-device topics are built rather than declared as constants.

pub const TOPIC_CMD_MODE: &str = "dualstat/cmnd/thermostat/mode";
pub const TOPIC_CMD_TARGET: &str = "dualstat/cmnd/thermostat/target";
pub const TOPIC_CMD_PRESET: &str = "dualstat/cmnd/thermostat/preset";
pub const TOPIC_CMD_FAN_MODE: &str = "dualstat/cmnd/thermostat/fan_mode";

pub const TOPIC_THERMOSTAT_STATE: &str = "dualstat/stat/thermostat";

pub fn switch_command_topic(device: &str) -> String {
    format!("dualstat/cmnd/{device}/power")
}

pub fn switch_state_topic(device: &str) -> String {
    format!("dualstat/stat/{device}/power")
}

pub fn sensor_state_topic(sensor: &str) -> String {
    format!("dualstat/stat/{sensor}/temperature")
}

/// Extracts the device id from a `dualstat/stat/<device>/power` topic.
pub fn device_from_state_topic(topic: &str) -> Option<&str> {
    let rest = topic.strip_prefix("dualstat/stat/")?;
    rest.strip_suffix("/power")
}
