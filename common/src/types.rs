use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
    Dry,
    FanOnly,
}

impl HvacMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Heat => "HEAT",
            Self::Cool => "COOL",
            Self::Dry => "DRY",
            Self::FanOnly => "FAN_ONLY",
        }
    }

    /// The actuator this mode drives, per the mode table. `Off` drives none.
    pub fn actuator(self) -> Option<Actuator> {
        match self {
            Self::Off => None,
            Self::Heat => Some(Actuator::Heater),
            Self::Cool => Some(Actuator::Cooler),
            Self::Dry => Some(Actuator::Dryer),
            Self::FanOnly => Some(Actuator::Fan),
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized hvac mode: {0}")]
pub struct ParseModeError(pub String);

impl FromStr for HvacMode {
    type Err = ParseModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "OFF" => Ok(Self::Off),
            "HEAT" => Ok(Self::Heat),
            "COOL" => Ok(Self::Cool),
            "DRY" => Ok(Self::Dry),
            "FAN_ONLY" => Ok(Self::FanOnly),
            _ => Err(ParseModeError(value.to_string())),
        }
    }
}

/// What the thermostat is currently doing, derived for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HvacAction {
    Off,
    Idle,
    Heating,
    Cooling,
    Drying,
    Fan,
}

impl HvacAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Idle => "IDLE",
            Self::Heating => "HEATING",
            Self::Cooling => "COOLING",
            Self::Drying => "DRYING",
            Self::Fan => "FAN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actuator {
    Heater,
    Cooler,
    Fan,
    Dryer,
}

impl Actuator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heater => "heater",
            Self::Cooler => "cooler",
            Self::Fan => "fan",
            Self::Dryer => "dryer",
        }
    }
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the fan or dehumidifier participates in hysteresis: like a cooler,
/// like a heater, or driven purely by mode selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBehavior {
    Cooler,
    Heater,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    On,
    Auto,
}

impl FanMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid fan_mode value {0}: valid values are 'on' or 'auto'")]
pub struct ParseFanModeError(pub String);

impl FromStr for FanMode {
    type Err = ParseFanModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "on" => Ok(Self::On),
            "auto" => Ok(Self::Auto),
            _ => Err(ParseFanModeError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    None,
    Away,
}

impl Preset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Away => "away",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized preset: {0}")]
pub struct ParsePresetError(pub String);

impl FromStr for Preset {
    type Err = ParsePresetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "away" => Ok(Self::Away),
            _ => Err(ParsePresetError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThermostatStatus {
    pub name: String,
    pub mode: HvacMode,
    pub action: HvacAction,
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f64>,
    #[serde(rename = "targetTemp")]
    pub target_temp: Option<f64>,
    pub preset: Preset,
    #[serde(rename = "fanMode")]
    pub fan_mode: FanMode,
    pub active: bool,
    #[serde(rename = "availableModes")]
    pub available_modes: Vec<HvacMode>,
    #[serde(rename = "minTemp")]
    pub min_temp: f64,
    #[serde(rename = "maxTemp")]
    pub max_temp: f64,
    #[serde(rename = "awayTemp")]
    pub away_temp: Option<f64>,
}
