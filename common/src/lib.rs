pub mod config;
pub mod engine;
pub mod topics;
pub mod types;

pub use config::{NetworkConfig, PersistedState, RuntimeConfig, ThermostatConfig};
pub use engine::{
    ActuatorSnapshot, ControlAction, ControlEngine, ControlState, ModeUnavailable,
    PresetUnavailable, SwitchSnapshot, Trigger,
};
pub use topics::*;
pub use types::{
    Actuator, DeviceBehavior, FanMode, HvacAction, HvacMode, Preset, ThermostatStatus,
};
