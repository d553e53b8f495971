use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Actuator, DeviceBehavior, FanMode, HvacMode};

pub const DEFAULT_TOLERANCE: f64 = 0.3;
pub const DEFAULT_MIN_TEMP: f64 = 7.0;
pub const DEFAULT_MAX_TEMP: f64 = 35.0;
pub const DEFAULT_FAN_FOLLOW_DELAY_MS: u64 = 5_000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} device id must not be empty")]
    EmptyDeviceId(&'static str),
    #[error("min_temp {min} must be below max_temp {max}")]
    TemperatureRange { min: f64, max: f64 },
    #[error("{0} must be a finite non-negative number")]
    InvalidTolerance(&'static str),
    #[error("target_temp must be a finite number")]
    InvalidTargetTemp,
    #[error("away_temp must be a finite number")]
    InvalidAwayTemp,
    #[error("precision must be one of 0.1, 0.5 or 1.0")]
    InvalidPrecision,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Frozen per-instance configuration, consumed by the engine at
/// construction time. Tolerances and device wiring never change for the
/// lifetime of the instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatConfig {
    pub name: String,
    pub heater: String,
    pub cooler: String,
    pub sensor: String,
    pub fan: Option<String>,
    pub dryer: Option<String>,
    pub fan_behavior: DeviceBehavior,
    pub dryer_behavior: DeviceBehavior,
    pub fan_mode: FanMode,
    pub reverse_cycle: Vec<Actuator>,
    pub min_temp: f64,
    pub max_temp: f64,
    pub target_temp: Option<f64>,
    pub min_cycle_ms: Option<u64>,
    pub cold_tolerance: f64,
    pub hot_tolerance: f64,
    pub keep_alive_ms: Option<u64>,
    pub initial_mode: Option<HvacMode>,
    pub away_temp: Option<f64>,
    pub precision: Option<f64>,
    pub fan_follow_delay_ms: u64,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            name: "dualstat".to_string(),
            heater: "heater".to_string(),
            cooler: "cooler".to_string(),
            sensor: "sensor".to_string(),
            fan: None,
            dryer: None,
            fan_behavior: DeviceBehavior::Neutral,
            dryer_behavior: DeviceBehavior::Neutral,
            fan_mode: FanMode::Auto,
            reverse_cycle: Vec::new(),
            min_temp: DEFAULT_MIN_TEMP,
            max_temp: DEFAULT_MAX_TEMP,
            target_temp: None,
            min_cycle_ms: None,
            cold_tolerance: DEFAULT_TOLERANCE,
            hot_tolerance: DEFAULT_TOLERANCE,
            keep_alive_ms: None,
            initial_mode: None,
            away_temp: None,
            precision: None,
            fan_follow_delay_ms: DEFAULT_FAN_FOLLOW_DELAY_MS,
        }
    }
}

impl ThermostatConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heater.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceId("heater"));
        }
        if self.cooler.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceId("cooler"));
        }
        if self.sensor.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceId("sensor"));
        }
        if !(self.min_temp.is_finite() && self.max_temp.is_finite())
            || self.min_temp >= self.max_temp
        {
            return Err(ConfigError::TemperatureRange {
                min: self.min_temp,
                max: self.max_temp,
            });
        }
        if !self.cold_tolerance.is_finite() || self.cold_tolerance < 0.0 {
            return Err(ConfigError::InvalidTolerance("cold_tolerance"));
        }
        if !self.hot_tolerance.is_finite() || self.hot_tolerance < 0.0 {
            return Err(ConfigError::InvalidTolerance("hot_tolerance"));
        }
        if matches!(self.target_temp, Some(t) if !t.is_finite()) {
            return Err(ConfigError::InvalidTargetTemp);
        }
        if matches!(self.away_temp, Some(t) if !t.is_finite()) {
            return Err(ConfigError::InvalidAwayTemp);
        }
        if let Some(precision) = self.precision {
            if ![0.1, 0.5, 1.0].contains(&precision) {
                return Err(ConfigError::InvalidPrecision);
            }
        }
        if self.min_cycle_ms == Some(0) {
            return Err(ConfigError::ZeroDuration("min_cycle_ms"));
        }
        if self.keep_alive_ms == Some(0) {
            return Err(ConfigError::ZeroDuration("keep_alive_ms"));
        }
        if self.fan_follow_delay_ms == 0 {
            return Err(ConfigError::ZeroDuration("fan_follow_delay_ms"));
        }
        Ok(())
    }

    /// Capability set derived once from the configured devices. Heater and
    /// cooler are required, so HEAT and COOL are always offered; FAN_ONLY
    /// and DRY require the matching optional device.
    pub fn available_modes(&self) -> Vec<HvacMode> {
        let mut modes = vec![HvacMode::Cool, HvacMode::Heat];
        if self.dryer.is_some() {
            modes.push(HvacMode::Dry);
        }
        if self.fan.is_some() {
            modes.push(HvacMode::FanOnly);
        }
        modes.push(HvacMode::Off);
        modes
    }

    pub fn device_id(&self, actuator: Actuator) -> Option<&str> {
        match actuator {
            Actuator::Heater => Some(self.heater.as_str()),
            Actuator::Cooler => Some(self.cooler.as_str()),
            Actuator::Fan => self.fan.as_deref(),
            Actuator::Dryer => self.dryer.as_deref(),
        }
    }

    pub fn is_reverse_cycle(&self, actuator: Actuator) -> bool {
        self.reverse_cycle.contains(&actuator)
    }

    pub fn min_cycle(&self) -> Option<Duration> {
        self.min_cycle_ms.map(Duration::from_millis)
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive_ms.map(Duration::from_millis)
    }

    pub fn fan_follow_delay(&self) -> Duration {
        Duration::from_millis(self.fan_follow_delay_ms)
    }

    /// Fallback setpoint when neither configuration nor restored state
    /// carries one: the top of the range for modes that pull the
    /// temperature down, the bottom for everything else.
    pub fn default_target(&self, mode: HvacMode) -> f64 {
        match mode {
            HvacMode::Cool | HvacMode::FanOnly => self.max_temp,
            _ => self.min_temp,
        }
    }

    pub fn clamp_target(&self, value: f64) -> f64 {
        value.clamp(self.min_temp, self.max_temp)
    }

    pub fn display_precision(&self) -> f64 {
        self.precision.unwrap_or(0.1)
    }
}

/// Rounds a temperature to the configured display step.
pub fn round_to_precision(value: f64, step: f64) -> f64 {
    (value / step).round() * step
}

/// What survives a restart: the pieces of control state the external
/// restore collaborator hands back at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub mode: Option<HvacMode>,
    pub target_temp: Option<f64>,
    pub is_away: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub thermostat: ThermostatConfig,
    pub network: NetworkConfig,
    pub state_publish_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thermostat: ThermostatConfig::default(),
            network: NetworkConfig::default(),
            state_publish_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config: ThermostatConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.cold_tolerance, DEFAULT_TOLERANCE);
        assert_eq!(config.hot_tolerance, DEFAULT_TOLERANCE);
        assert_eq!(config.fan_mode, FanMode::Auto);
        assert_eq!(config.fan_behavior, DeviceBehavior::Neutral);
        assert!(config.reverse_cycle.is_empty());
        assert!(config.min_cycle_ms.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_keys_parse_lowercase_wire_values() {
        let raw = r#"{
            "heater": "switch.heater",
            "cooler": "switch.ac",
            "sensor": "sensor.living_room",
            "fan": "switch.fan",
            "fan_behavior": "cooler",
            "dryer": "switch.dryer",
            "dryer_behavior": "heater",
            "fan_mode": "on",
            "reverse_cycle": ["heater", "cooler"],
            "min_cycle_ms": 600000,
            "initial_mode": "FAN_ONLY",
            "away_temp": 16.5
        }"#;
        let config: ThermostatConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.fan_behavior, DeviceBehavior::Cooler);
        assert_eq!(config.dryer_behavior, DeviceBehavior::Heater);
        assert_eq!(config.fan_mode, FanMode::On);
        assert!(config.is_reverse_cycle(Actuator::Heater));
        assert!(config.is_reverse_cycle(Actuator::Cooler));
        assert!(!config.is_reverse_cycle(Actuator::Fan));
        assert_eq!(config.initial_mode, Some(HvacMode::FanOnly));
        assert_eq!(config.min_cycle(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn available_modes_follow_configured_devices() {
        let mut config = ThermostatConfig::default();
        assert_eq!(
            config.available_modes(),
            vec![HvacMode::Cool, HvacMode::Heat, HvacMode::Off]
        );

        config.fan = Some("switch.fan".to_string());
        config.dryer = Some("switch.dryer".to_string());
        assert_eq!(
            config.available_modes(),
            vec![
                HvacMode::Cool,
                HvacMode::Heat,
                HvacMode::Dry,
                HvacMode::FanOnly,
                HvacMode::Off
            ]
        );
    }

    #[test]
    fn default_target_is_asymmetric_per_mode() {
        let config = ThermostatConfig::default();

        assert_eq!(config.default_target(HvacMode::Cool), config.max_temp);
        assert_eq!(config.default_target(HvacMode::FanOnly), config.max_temp);
        assert_eq!(config.default_target(HvacMode::Heat), config.min_temp);
        assert_eq!(config.default_target(HvacMode::Dry), config.min_temp);
        assert_eq!(config.default_target(HvacMode::Off), config.min_temp);
    }

    #[test]
    fn validate_rejects_bad_ranges_and_tolerances() {
        let mut config = ThermostatConfig::default();
        config.min_temp = 30.0;
        config.max_temp = 20.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TemperatureRange { .. })
        ));

        let mut config = ThermostatConfig::default();
        config.cold_tolerance = -0.1;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidTolerance("cold_tolerance"))
        );

        let mut config = ThermostatConfig::default();
        config.precision = Some(0.2);
        assert_eq!(config.validate(), Err(ConfigError::InvalidPrecision));

        let mut config = ThermostatConfig::default();
        config.min_cycle_ms = Some(0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration("min_cycle_ms"))
        );
    }

    #[test]
    fn precision_rounding_matches_display_steps() {
        assert_eq!(round_to_precision(21.34, 0.1), 21.3);
        assert_eq!(round_to_precision(21.34, 0.5), 21.5);
        assert_eq!(round_to_precision(21.34, 1.0), 21.0);
    }
}
