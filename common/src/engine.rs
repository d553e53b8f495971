use std::time::Duration;

use thiserror::Error;

use crate::config::{round_to_precision, PersistedState, ThermostatConfig};
use crate::types::{
    Actuator, DeviceBehavior, FanMode, HvacAction, HvacMode, Preset, ThermostatStatus,
};

/// What caused an evaluation. Keep-alive ticks bypass the minimum-cycle
/// gate and re-assert the current command when nothing else matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    SensorUpdate,
    KeepAlive,
    ModeChange,
    Setpoint,
    Preset,
    FanMode,
}

/// One decided transition. `Switch` is issued through the actuator gateway
/// immediately; `FanFollow` is handed to the delayed-action scheduler and
/// runs concurrently with later evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Switch { actuator: Actuator, on: bool },
    FanFollow { on: bool },
}

/// A device's observed state at snapshot time: whether it is on and how
/// long it has held its current state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchSnapshot {
    pub on: bool,
    pub held_for: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActuatorSnapshot {
    pub heater: SwitchSnapshot,
    pub cooler: SwitchSnapshot,
    pub fan: SwitchSnapshot,
    pub dryer: SwitchSnapshot,
}

impl ActuatorSnapshot {
    pub fn get(&self, actuator: Actuator) -> SwitchSnapshot {
        match actuator {
            Actuator::Heater => self.heater,
            Actuator::Cooler => self.cooler,
            Actuator::Fan => self.fan,
            Actuator::Dryer => self.dryer,
        }
    }

    /// Aggregate activity over heater, cooler and dryer. The fan is
    /// excluded: fan-only activity does not count as "device active".
    pub fn device_active(&self) -> bool {
        self.heater.on || self.cooler.on || self.dryer.on
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("hvac mode {0} is not available on this thermostat")]
pub struct ModeUnavailable(pub HvacMode);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("away preset is not available: no away_temp configured")]
pub struct PresetUnavailable;

/// The mutable control record for one thermostat instance.
#[derive(Debug, Clone)]
pub struct ControlState {
    pub mode: HvacMode,
    pub target_temp: Option<f64>,
    pub current_temp: Option<f64>,
    pub active: bool,
    pub fan_mode: FanMode,
    pub is_away: bool,
    pub saved_target_temp: Option<f64>,
}

/// The control decision core. Consumes actuator snapshots and returns the
/// transitions to issue; it never talks to a gateway itself, so every
/// decision path is testable without I/O.
#[derive(Debug, Clone)]
pub struct ControlEngine {
    config: ThermostatConfig,
    modes: Vec<HvacMode>,
    state: ControlState,
}

impl ControlEngine {
    /// Builds the engine from frozen configuration plus whatever the
    /// restore collaborator recovered. Configuration wins over restored
    /// values; a restored mode outside the capability set degrades to OFF.
    pub fn new(config: ThermostatConfig, restored: PersistedState) -> Self {
        let modes = config.available_modes();

        let mut mode = config
            .initial_mode
            .or(restored.mode)
            .unwrap_or(HvacMode::Off);
        if !modes.contains(&mode) {
            mode = HvacMode::Off;
        }

        let target = config
            .target_temp
            .or(restored.target_temp)
            .map(|t| config.clamp_target(t))
            .unwrap_or_else(|| config.default_target(mode));

        let is_away = restored.is_away && config.away_temp.is_some();
        let saved_target_temp = config.target_temp.or(config.away_temp);
        let fan_mode = config.fan_mode;

        Self {
            config,
            modes,
            state: ControlState {
                mode,
                target_temp: Some(target),
                current_temp: None,
                active: false,
                fan_mode,
                is_away,
                saved_target_temp,
            },
        }
    }

    pub fn config(&self) -> &ThermostatConfig {
        &self.config
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn mode(&self) -> HvacMode {
        self.state.mode
    }

    pub fn fan_mode(&self) -> FanMode {
        self.state.fan_mode
    }

    pub fn available_modes(&self) -> &[HvacMode] {
        &self.modes
    }

    pub fn preset(&self) -> Preset {
        if self.state.is_away {
            Preset::Away
        } else {
            Preset::None
        }
    }

    /// Applies a sensor reading. Non-finite readings are rejected and the
    /// last good value stays in place; the caller skips the evaluation.
    pub fn update_sensor(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.state.current_temp = Some(value);
        true
    }

    /// Accepts a new setpoint, clamped to the configured range. Returns
    /// false for non-finite input, which leaves the setpoint untouched.
    pub fn set_target(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.state.target_temp = Some(self.config.clamp_target(value));
        true
    }

    /// Preset swap. Returns true when the preset actually changed and a
    /// forced evaluation should follow.
    pub fn set_preset(&mut self, preset: Preset) -> Result<bool, PresetUnavailable> {
        let Some(away_temp) = self.config.away_temp else {
            return match preset {
                Preset::Away => Err(PresetUnavailable),
                Preset::None => Ok(false),
            };
        };

        match preset {
            Preset::Away if !self.state.is_away => {
                self.state.saved_target_temp = self.state.target_temp;
                self.state.target_temp = Some(away_temp);
                self.state.is_away = true;
                Ok(true)
            }
            Preset::None if self.state.is_away => {
                if let Some(saved) = self.state.saved_target_temp {
                    self.state.target_temp = Some(saved);
                }
                self.state.is_away = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Fan mode switch. ON commands the fan immediately; AUTO turns it off
    /// only when nothing is running, otherwise the fan rides out the
    /// current cycle and the next follow action collects it.
    pub fn set_fan_mode(
        &mut self,
        fan_mode: FanMode,
        snapshot: &ActuatorSnapshot,
    ) -> Vec<ControlAction> {
        self.state.fan_mode = fan_mode;

        let mut actions = Vec::new();
        match fan_mode {
            FanMode::On => self.fan_on(&mut actions),
            FanMode::Auto => {
                if !snapshot.device_active() {
                    self.fan_off(&mut actions);
                }
            }
        }
        actions
    }

    /// The mode-set state machine: shuts down the actuators the old mode
    /// may have left running, honoring reverse-cycle exemptions, then
    /// records the new mode. The caller executes the returned commands and
    /// follows up with a forced evaluation.
    pub fn mode_transition(
        &mut self,
        new_mode: HvacMode,
        snapshot: &ActuatorSnapshot,
    ) -> Result<Vec<ControlAction>, ModeUnavailable> {
        if !self.modes.contains(&new_mode) {
            return Err(ModeUnavailable(new_mode));
        }

        let mut actions = Vec::new();
        let device_active = snapshot.device_active();

        match new_mode {
            HvacMode::Heat => {
                if device_active {
                    if !self.config.is_reverse_cycle(Actuator::Cooler) {
                        self.cooler_off(&mut actions);
                    }
                    if !self.config.is_reverse_cycle(Actuator::Dryer) {
                        self.dryer_off(&mut actions);
                    }
                }
            }
            HvacMode::Cool => {
                if device_active {
                    if !self.config.is_reverse_cycle(Actuator::Heater) {
                        self.heater_off(&mut actions);
                    }
                    if !self.config.is_reverse_cycle(Actuator::Dryer) {
                        self.dryer_off(&mut actions);
                    }
                }
            }
            HvacMode::FanOnly => {
                if device_active {
                    if !self.config.is_reverse_cycle(Actuator::Cooler) {
                        self.cooler_off(&mut actions);
                    }
                    if !self.config.is_reverse_cycle(Actuator::Heater) {
                        self.heater_off(&mut actions);
                    }
                    if !self.config.is_reverse_cycle(Actuator::Dryer) {
                        self.dryer_off(&mut actions);
                    }
                }
            }
            HvacMode::Dry => {
                if device_active {
                    if !self.config.is_reverse_cycle(Actuator::Cooler) {
                        self.cooler_off(&mut actions);
                    }
                    if !self.config.is_reverse_cycle(Actuator::Heater) {
                        self.heater_off(&mut actions);
                    }
                    if !self.config.is_reverse_cycle(Actuator::Fan) {
                        self.fan_off(&mut actions);
                    }
                }
            }
            HvacMode::Off => {
                // OFF overrides every reverse-cycle exemption and does not
                // consult the aggregate-activity check.
                self.heater_off(&mut actions);
                self.cooler_off(&mut actions);
                if self.state.fan_mode == FanMode::Auto {
                    self.fan_off(&mut actions);
                }
                self.dryer_off(&mut actions);
            }
        }

        self.state.mode = new_mode;
        Ok(actions)
    }

    /// The single decision entry point. Steps, in order: activation check,
    /// OFF/inactive short-circuit, minimum-cycle gate, hysteresis
    /// comparison, mode-specific turn-on/turn-off selection with keep-alive
    /// re-assertion, and the unconditional neutral-behavior drives.
    pub fn evaluate(
        &mut self,
        snapshot: &ActuatorSnapshot,
        trigger: Trigger,
        forced: bool,
    ) -> Vec<ControlAction> {
        let mut actions = Vec::new();

        if !self.state.active
            && self.state.current_temp.is_some()
            && self.state.target_temp.is_some()
        {
            // First trigger with both temperatures known. Never reverts.
            self.state.active = true;
        }

        if !self.state.active || self.state.mode == HvacMode::Off {
            return actions;
        }

        let (Some(current), Some(target)) = (self.state.current_temp, self.state.target_temp)
        else {
            return actions;
        };

        if !forced && trigger != Trigger::KeepAlive {
            if let Some(min_cycle) = self.config.min_cycle() {
                if let Some(entity) = self.state.mode.actuator() {
                    if snapshot.get(entity).held_for < min_cycle {
                        return actions;
                    }
                }
            }
        }

        // Inclusive comparisons: exact equality counts as a trigger.
        let too_cold = target >= current + self.config.cold_tolerance;
        let too_hot = current >= target + self.config.hot_tolerance;

        if snapshot.device_active() {
            let wants_off = match self.state.mode {
                HvacMode::Cool => too_cold,
                HvacMode::Heat => too_hot,
                HvacMode::FanOnly => {
                    (too_cold && self.config.fan_behavior == DeviceBehavior::Cooler)
                        || (too_hot && self.config.fan_behavior == DeviceBehavior::Heater)
                }
                HvacMode::Dry => {
                    (too_cold && self.config.dryer_behavior == DeviceBehavior::Cooler)
                        || (too_hot && self.config.dryer_behavior == DeviceBehavior::Heater)
                }
                HvacMode::Off => false,
            };

            if wants_off {
                self.mode_device_off(self.state.mode, &mut actions);
            } else if trigger == Trigger::KeepAlive {
                // Re-assert the on command against external drift.
                self.mode_device_on(self.state.mode, &mut actions);
            }
        } else {
            let wants_on = match self.state.mode {
                HvacMode::Cool => too_hot,
                HvacMode::Heat => too_cold,
                HvacMode::FanOnly => {
                    (too_hot && self.config.fan_behavior == DeviceBehavior::Cooler)
                        || (too_cold && self.config.fan_behavior == DeviceBehavior::Heater)
                }
                HvacMode::Dry => {
                    (too_hot && self.config.dryer_behavior == DeviceBehavior::Cooler)
                        || (too_cold && self.config.dryer_behavior == DeviceBehavior::Heater)
                }
                HvacMode::Off => false,
            };

            if wants_on {
                self.mode_device_on(self.state.mode, &mut actions);
            } else if trigger == Trigger::KeepAlive {
                self.mode_device_off(self.state.mode, &mut actions);
            }
        }

        // Neutral behavior: driven purely by mode selection, re-asserted on
        // every evaluation.
        if self.config.fan_behavior == DeviceBehavior::Neutral
            && self.state.mode == HvacMode::FanOnly
        {
            self.fan_on(&mut actions);
        }
        if self.config.dryer_behavior == DeviceBehavior::Neutral && self.state.mode == HvacMode::Dry
        {
            self.dryer_on(&mut actions);
        }

        actions
    }

    pub fn hvac_action(&self, snapshot: &ActuatorSnapshot) -> HvacAction {
        if self.state.mode == HvacMode::Off {
            return HvacAction::Off;
        }
        if !snapshot.device_active() {
            return HvacAction::Idle;
        }
        match self.state.mode {
            HvacMode::Cool => HvacAction::Cooling,
            HvacMode::Heat => HvacAction::Heating,
            HvacMode::FanOnly => HvacAction::Fan,
            HvacMode::Dry => HvacAction::Drying,
            HvacMode::Off => HvacAction::Idle,
        }
    }

    pub fn status(&self, snapshot: &ActuatorSnapshot) -> ThermostatStatus {
        let step = self.config.display_precision();
        ThermostatStatus {
            name: self.config.name.clone(),
            mode: self.state.mode,
            action: self.hvac_action(snapshot),
            current_temp: self.state.current_temp.map(|t| round_to_precision(t, step)),
            target_temp: self.state.target_temp.map(|t| round_to_precision(t, step)),
            preset: self.preset(),
            fan_mode: self.state.fan_mode,
            active: self.state.active,
            available_modes: self.modes.clone(),
            min_temp: self.config.min_temp,
            max_temp: self.config.max_temp,
            away_temp: self.config.away_temp,
        }
    }

    pub fn persisted(&self) -> PersistedState {
        PersistedState {
            mode: Some(self.state.mode),
            target_temp: self.state.target_temp,
            is_away: self.state.is_away,
        }
    }

    fn mode_device_on(&self, mode: HvacMode, actions: &mut Vec<ControlAction>) {
        match mode {
            HvacMode::Cool => self.cooler_on(actions),
            HvacMode::Heat => self.heater_on(actions),
            HvacMode::FanOnly => self.fan_on(actions),
            HvacMode::Dry => self.dryer_on(actions),
            HvacMode::Off => {}
        }
    }

    fn mode_device_off(&self, mode: HvacMode, actions: &mut Vec<ControlAction>) {
        match mode {
            HvacMode::Cool => self.cooler_off(actions),
            HvacMode::Heat => self.heater_off(actions),
            HvacMode::FanOnly => self.fan_off(actions),
            HvacMode::Dry => self.dryer_off(actions),
            HvacMode::Off => {}
        }
    }

    // Turn-on/off helpers carry their fan side effects: the heater pair
    // schedules delayed follow actions, the cooler pair switches the fan
    // synchronously around the cooler command.

    fn heater_on(&self, actions: &mut Vec<ControlAction>) {
        actions.push(ControlAction::Switch {
            actuator: Actuator::Heater,
            on: true,
        });
        if self.config.fan.is_some() {
            actions.push(ControlAction::FanFollow { on: true });
        }
    }

    fn heater_off(&self, actions: &mut Vec<ControlAction>) {
        actions.push(ControlAction::Switch {
            actuator: Actuator::Heater,
            on: false,
        });
        if self.state.fan_mode == FanMode::Auto && self.config.fan.is_some() {
            actions.push(ControlAction::FanFollow { on: false });
        }
    }

    fn cooler_on(&self, actions: &mut Vec<ControlAction>) {
        self.fan_on(actions);
        actions.push(ControlAction::Switch {
            actuator: Actuator::Cooler,
            on: true,
        });
    }

    fn cooler_off(&self, actions: &mut Vec<ControlAction>) {
        if self.state.fan_mode == FanMode::Auto {
            self.fan_off(actions);
        }
        actions.push(ControlAction::Switch {
            actuator: Actuator::Cooler,
            on: false,
        });
    }

    fn fan_on(&self, actions: &mut Vec<ControlAction>) {
        if self.config.fan.is_some() {
            actions.push(ControlAction::Switch {
                actuator: Actuator::Fan,
                on: true,
            });
        }
    }

    fn fan_off(&self, actions: &mut Vec<ControlAction>) {
        if self.config.fan.is_some() {
            actions.push(ControlAction::Switch {
                actuator: Actuator::Fan,
                on: false,
            });
        }
    }

    fn dryer_on(&self, actions: &mut Vec<ControlAction>) {
        if self.config.dryer.is_some() {
            actions.push(ControlAction::Switch {
                actuator: Actuator::Dryer,
                on: true,
            });
        }
    }

    fn dryer_off(&self, actions: &mut Vec<ControlAction>) {
        if self.config.dryer.is_some() {
            actions.push(ControlAction::Switch {
                actuator: Actuator::Dryer,
                on: false,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn engine_with(adjust: impl FnOnce(&mut ThermostatConfig)) -> ControlEngine {
        let mut config = ThermostatConfig::default();
        adjust(&mut config);
        ControlEngine::new(config, PersistedState::default())
    }

    fn snapshot(heater: bool, cooler: bool, fan: bool, dryer: bool) -> ActuatorSnapshot {
        let held_for = Duration::from_secs(3600);
        ActuatorSnapshot {
            heater: SwitchSnapshot { on: heater, held_for },
            cooler: SwitchSnapshot { on: cooler, held_for },
            fan: SwitchSnapshot { on: fan, held_for },
            dryer: SwitchSnapshot { on: dryer, held_for },
        }
    }

    fn idle() -> ActuatorSnapshot {
        snapshot(false, false, false, false)
    }

    fn on(actuator: Actuator) -> ControlAction {
        ControlAction::Switch { actuator, on: true }
    }

    fn off(actuator: Actuator) -> ControlAction {
        ControlAction::Switch {
            actuator,
            on: false,
        }
    }

    #[test]
    fn no_commands_until_both_temperatures_are_known() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
            c.target_temp = Some(21.0);
        });

        assert!(!engine.state().active);
        assert_eq!(engine.evaluate(&idle(), Trigger::SensorUpdate, false), vec![]);
        assert!(!engine.state().active);

        assert!(engine.update_sensor(18.0));
        let actions = engine.evaluate(&idle(), Trigger::SensorUpdate, false);
        assert_eq!(actions, vec![on(Actuator::Heater)]);
        assert!(engine.state().active);
    }

    #[test]
    fn active_never_reverts() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
            c.target_temp = Some(21.0);
        });

        engine.update_sensor(20.0);
        engine.evaluate(&idle(), Trigger::SensorUpdate, false);
        assert!(engine.state().active);

        for reading in [25.0, 10.0, 21.0, 19.5] {
            engine.update_sensor(reading);
            engine.evaluate(&snapshot(true, false, false, false), Trigger::SensorUpdate, false);
            assert!(engine.state().active);
        }
    }

    #[test]
    fn heat_hysteresis_turns_on_and_off_at_the_tolerance_edges() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
            c.target_temp = Some(21.0);
        });

        // 21.0 >= 20.6 + 0.3 -> too cold, heater commanded on.
        engine.update_sensor(20.6);
        assert_eq!(
            engine.evaluate(&idle(), Trigger::SensorUpdate, false),
            vec![on(Actuator::Heater)]
        );

        // Inside the band: no transition either way.
        engine.update_sensor(21.2);
        assert_eq!(
            engine.evaluate(&snapshot(true, false, false, false), Trigger::SensorUpdate, false),
            vec![]
        );

        // 21.4 >= 21.0 + 0.3 -> too hot, heater commanded off.
        engine.update_sensor(21.4);
        assert_eq!(
            engine.evaluate(&snapshot(true, false, false, false), Trigger::SensorUpdate, false),
            vec![off(Actuator::Heater)]
        );
    }

    #[test]
    fn cool_hysteresis_mirrors_heat() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Cool);
            c.target_temp = Some(21.0);
        });

        engine.update_sensor(21.4);
        assert_eq!(
            engine.evaluate(&idle(), Trigger::SensorUpdate, false),
            vec![on(Actuator::Cooler)]
        );

        engine.update_sensor(20.6);
        assert_eq!(
            engine.evaluate(&snapshot(false, true, false, false), Trigger::SensorUpdate, false),
            vec![off(Actuator::Cooler)]
        );
    }

    #[test]
    fn exact_tolerance_equality_counts_as_a_trigger() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
            c.target_temp = Some(21.0);
        });

        // 21.0 >= 20.7 + 0.3 holds with equality.
        engine.update_sensor(20.7);
        assert_eq!(
            engine.evaluate(&idle(), Trigger::SensorUpdate, false),
            vec![on(Actuator::Heater)]
        );
    }

    #[test]
    fn min_cycle_gate_suppresses_early_transitions() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
            c.target_temp = Some(21.0);
            c.min_cycle_ms = Some(600_000);
        });
        engine.update_sensor(18.0);

        let mut early = idle();
        early.heater.held_for = Duration::from_secs(120);

        assert_eq!(engine.evaluate(&early, Trigger::SensorUpdate, false), vec![]);
        assert_eq!(
            engine.evaluate(&early, Trigger::SensorUpdate, true),
            vec![on(Actuator::Heater)]
        );
    }

    #[test]
    fn keep_alive_bypasses_min_cycle_gate() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
            c.target_temp = Some(21.0);
            c.min_cycle_ms = Some(600_000);
        });
        engine.update_sensor(18.0);

        let mut early = idle();
        early.heater.held_for = Duration::from_secs(120);

        assert_eq!(
            engine.evaluate(&early, Trigger::KeepAlive, false),
            vec![on(Actuator::Heater)]
        );
    }

    #[test]
    fn keep_alive_reasserts_on_when_nothing_matched() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
            c.target_temp = Some(21.0);
        });
        engine.update_sensor(21.0);

        let running = snapshot(true, false, false, false);
        assert_eq!(engine.evaluate(&running, Trigger::SensorUpdate, false), vec![]);
        assert_eq!(
            engine.evaluate(&running, Trigger::KeepAlive, false),
            vec![on(Actuator::Heater)]
        );
    }

    #[test]
    fn keep_alive_reasserts_off_when_nothing_matched() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
            c.target_temp = Some(21.0);
        });
        engine.update_sensor(21.0);

        assert_eq!(engine.evaluate(&idle(), Trigger::SensorUpdate, false), vec![]);
        assert_eq!(
            engine.evaluate(&idle(), Trigger::KeepAlive, false),
            vec![off(Actuator::Heater)]
        );
    }

    #[test]
    fn heater_commands_carry_delayed_fan_follow() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
            c.target_temp = Some(21.0);
            c.fan = Some("fan".to_string());
        });

        engine.update_sensor(18.0);
        assert_eq!(
            engine.evaluate(&idle(), Trigger::SensorUpdate, false),
            vec![on(Actuator::Heater), ControlAction::FanFollow { on: true }]
        );

        engine.update_sensor(24.0);
        assert_eq!(
            engine.evaluate(&snapshot(true, false, true, false), Trigger::SensorUpdate, false),
            vec![off(Actuator::Heater), ControlAction::FanFollow { on: false }]
        );
    }

    #[test]
    fn heater_off_skips_fan_follow_when_fan_mode_is_on() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
            c.target_temp = Some(21.0);
            c.fan = Some("fan".to_string());
            c.fan_mode = FanMode::On;
        });

        engine.update_sensor(24.0);
        assert_eq!(
            engine.evaluate(&snapshot(true, false, true, false), Trigger::SensorUpdate, false),
            vec![off(Actuator::Heater)]
        );
    }

    #[test]
    fn cooler_commands_wrap_the_fan_synchronously() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Cool);
            c.target_temp = Some(21.0);
            c.fan = Some("fan".to_string());
        });

        engine.update_sensor(24.0);
        assert_eq!(
            engine.evaluate(&idle(), Trigger::SensorUpdate, false),
            vec![on(Actuator::Fan), on(Actuator::Cooler)]
        );

        engine.update_sensor(18.0);
        assert_eq!(
            engine.evaluate(&snapshot(false, true, true, false), Trigger::SensorUpdate, false),
            vec![off(Actuator::Fan), off(Actuator::Cooler)]
        );
    }

    #[test]
    fn fan_only_neutral_behavior_drives_the_fan_unconditionally() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::FanOnly);
            c.target_temp = Some(21.0);
            c.fan = Some("fan".to_string());
        });

        // Comfortable band; the neutral fan is asserted anyway.
        engine.update_sensor(21.0);
        assert_eq!(
            engine.evaluate(&idle(), Trigger::SensorUpdate, false),
            vec![on(Actuator::Fan)]
        );
    }

    #[test]
    fn fan_only_cooler_behavior_follows_hysteresis() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::FanOnly);
            c.target_temp = Some(21.0);
            c.fan = Some("fan".to_string());
            c.fan_behavior = DeviceBehavior::Cooler;
        });

        engine.update_sensor(24.0);
        assert_eq!(
            engine.evaluate(&idle(), Trigger::SensorUpdate, false),
            vec![on(Actuator::Fan)]
        );

        // The fan is excluded from the aggregate-activity check, so a
        // running fan alone stays in the turn-on branch and no off command
        // is produced even when it gets too cold.
        engine.update_sensor(18.0);
        assert_eq!(
            engine.evaluate(&snapshot(false, false, true, false), Trigger::SensorUpdate, false),
            vec![]
        );

        // With a dryer running the aggregate is active and the fan-off
        // condition is reachable.
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::FanOnly);
            c.target_temp = Some(21.0);
            c.fan = Some("fan".to_string());
            c.dryer = Some("dryer".to_string());
            c.fan_behavior = DeviceBehavior::Cooler;
        });
        engine.update_sensor(18.0);
        assert_eq!(
            engine.evaluate(&snapshot(false, false, true, true), Trigger::SensorUpdate, false),
            vec![off(Actuator::Fan)]
        );
    }

    #[test]
    fn dry_mode_behaviors() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Dry);
            c.target_temp = Some(21.0);
            c.dryer = Some("dryer".to_string());
        });

        // Neutral: asserted on every evaluation.
        engine.update_sensor(21.0);
        assert_eq!(
            engine.evaluate(&idle(), Trigger::SensorUpdate, false),
            vec![on(Actuator::Dryer)]
        );

        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Dry);
            c.target_temp = Some(21.0);
            c.dryer = Some("dryer".to_string());
            c.dryer_behavior = DeviceBehavior::Cooler;
        });

        engine.update_sensor(24.0);
        assert_eq!(
            engine.evaluate(&idle(), Trigger::SensorUpdate, false),
            vec![on(Actuator::Dryer)]
        );
        engine.update_sensor(18.0);
        assert_eq!(
            engine.evaluate(&snapshot(false, false, false, true), Trigger::SensorUpdate, false),
            vec![off(Actuator::Dryer)]
        );
    }

    #[test]
    fn entering_off_forces_everything_off_ignoring_reverse_cycle() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
            c.target_temp = Some(21.0);
            c.fan = Some("fan".to_string());
            c.dryer = Some("dryer".to_string());
            c.reverse_cycle = vec![
                Actuator::Heater,
                Actuator::Cooler,
                Actuator::Fan,
                Actuator::Dryer,
            ];
        });

        let actions = engine
            .mode_transition(HvacMode::Off, &snapshot(true, true, true, true))
            .unwrap();

        for actuator in [
            Actuator::Heater,
            Actuator::Cooler,
            Actuator::Fan,
            Actuator::Dryer,
        ] {
            assert!(actions.contains(&off(actuator)), "missing off for {actuator}");
        }
        assert_eq!(engine.mode(), HvacMode::Off);

        // And OFF mode itself never produces hysteresis commands.
        engine.update_sensor(10.0);
        assert_eq!(engine.evaluate(&idle(), Trigger::SensorUpdate, false), vec![]);
    }

    #[test]
    fn entering_off_leaves_fan_alone_when_fan_mode_is_on() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::FanOnly);
            c.target_temp = Some(21.0);
            c.fan = Some("fan".to_string());
            c.fan_mode = FanMode::On;
        });

        let actions = engine
            .mode_transition(HvacMode::Off, &snapshot(false, false, true, false))
            .unwrap();

        assert!(!actions.contains(&off(Actuator::Fan)));
    }

    #[test]
    fn reverse_cycle_exemption_spares_the_cooler_on_heat_entry() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Cool);
            c.target_temp = Some(21.0);
            c.reverse_cycle = vec![Actuator::Cooler];
        });

        let actions = engine
            .mode_transition(HvacMode::Heat, &snapshot(false, true, false, false))
            .unwrap();
        assert!(!actions.contains(&off(Actuator::Cooler)));
        assert_eq!(engine.mode(), HvacMode::Heat);

        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Cool);
            c.target_temp = Some(21.0);
        });

        let actions = engine
            .mode_transition(HvacMode::Heat, &snapshot(false, true, false, false))
            .unwrap();
        assert!(actions.contains(&off(Actuator::Cooler)));
    }

    #[test]
    fn mode_transition_shutdown_only_runs_while_device_active() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Cool);
            c.target_temp = Some(21.0);
        });

        let actions = engine.mode_transition(HvacMode::Heat, &idle()).unwrap();
        assert_eq!(actions, vec![]);
    }

    #[test]
    fn unavailable_modes_are_rejected() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
        });

        assert_eq!(
            engine.mode_transition(HvacMode::Dry, &idle()),
            Err(ModeUnavailable(HvacMode::Dry))
        );
        assert_eq!(
            engine.mode_transition(HvacMode::FanOnly, &idle()),
            Err(ModeUnavailable(HvacMode::FanOnly))
        );
        assert_eq!(engine.mode(), HvacMode::Heat);
    }

    #[test]
    fn away_preset_round_trips_the_setpoint() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
            c.target_temp = Some(21.5);
            c.away_temp = Some(16.0);
        });

        assert_eq!(engine.set_preset(Preset::Away), Ok(true));
        assert_eq!(engine.state().target_temp, Some(16.0));
        assert_eq!(engine.preset(), Preset::Away);

        // Repeat request is a no-op.
        assert_eq!(engine.set_preset(Preset::Away), Ok(false));

        assert_eq!(engine.set_preset(Preset::None), Ok(true));
        assert_eq!(engine.state().target_temp, Some(21.5));
        assert_eq!(engine.preset(), Preset::None);
    }

    #[test]
    fn away_preset_requires_a_configured_away_temp() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
        });

        assert_eq!(engine.set_preset(Preset::Away), Err(PresetUnavailable));
        assert_eq!(engine.set_preset(Preset::None), Ok(false));
    }

    #[test]
    fn fan_mode_on_commands_the_fan_immediately() {
        let mut engine = engine_with(|c| {
            c.fan = Some("fan".to_string());
        });

        let actions = engine.set_fan_mode(FanMode::On, &idle());
        assert_eq!(actions, vec![on(Actuator::Fan)]);
        assert_eq!(engine.fan_mode(), FanMode::On);
    }

    #[test]
    fn fan_mode_auto_waits_for_the_running_cycle() {
        let mut engine = engine_with(|c| {
            c.fan = Some("fan".to_string());
            c.fan_mode = FanMode::On;
        });

        // Device active: the fan is left running.
        let actions = engine.set_fan_mode(FanMode::Auto, &snapshot(true, false, true, false));
        assert_eq!(actions, vec![]);

        // Nothing running: the fan is turned off right away.
        let actions = engine.set_fan_mode(FanMode::Auto, &idle());
        assert_eq!(actions, vec![off(Actuator::Fan)]);
    }

    #[test]
    fn rejects_non_finite_sensor_readings() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
        });

        engine.update_sensor(19.5);
        assert!(!engine.update_sensor(f64::NAN));
        assert!(!engine.update_sensor(f64::INFINITY));
        assert_eq!(engine.state().current_temp, Some(19.5));
    }

    #[test]
    fn set_target_clamps_and_rejects_non_finite() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
        });

        assert!(engine.set_target(50.0));
        assert_eq!(engine.state().target_temp, Some(35.0));

        assert!(engine.set_target(-20.0));
        assert_eq!(engine.state().target_temp, Some(7.0));

        assert!(!engine.set_target(f64::NAN));
        assert_eq!(engine.state().target_temp, Some(7.0));
    }

    #[test]
    fn restore_prefers_configured_initial_mode() {
        let restored = PersistedState {
            mode: Some(HvacMode::Cool),
            target_temp: Some(19.0),
            is_away: false,
        };

        let mut config = ThermostatConfig::default();
        config.initial_mode = Some(HvacMode::Heat);
        let engine = ControlEngine::new(config, restored.clone());
        assert_eq!(engine.mode(), HvacMode::Heat);

        let engine = ControlEngine::new(ThermostatConfig::default(), restored);
        assert_eq!(engine.mode(), HvacMode::Cool);
        assert_eq!(engine.state().target_temp, Some(19.0));
    }

    #[test]
    fn restored_mode_outside_capability_set_degrades_to_off() {
        let restored = PersistedState {
            mode: Some(HvacMode::Dry),
            target_temp: None,
            is_away: false,
        };

        let engine = ControlEngine::new(ThermostatConfig::default(), restored);
        assert_eq!(engine.mode(), HvacMode::Off);
    }

    #[test]
    fn unset_target_falls_back_asymmetrically_by_mode() {
        let mut config = ThermostatConfig::default();
        config.initial_mode = Some(HvacMode::Cool);
        let engine = ControlEngine::new(config.clone(), PersistedState::default());
        assert_eq!(engine.state().target_temp, Some(config.max_temp));

        let mut config = ThermostatConfig::default();
        config.initial_mode = Some(HvacMode::Heat);
        let engine = ControlEngine::new(config.clone(), PersistedState::default());
        assert_eq!(engine.state().target_temp, Some(config.min_temp));

        let mut config = ThermostatConfig::default();
        config.initial_mode = Some(HvacMode::FanOnly);
        config.fan = Some("fan".to_string());
        let engine = ControlEngine::new(config.clone(), PersistedState::default());
        assert_eq!(engine.state().target_temp, Some(config.max_temp));
    }

    #[test]
    fn away_flag_is_only_restored_with_a_configured_away_temp() {
        let restored = PersistedState {
            mode: None,
            target_temp: None,
            is_away: true,
        };

        let engine = ControlEngine::new(ThermostatConfig::default(), restored.clone());
        assert_eq!(engine.preset(), Preset::None);

        let mut config = ThermostatConfig::default();
        config.away_temp = Some(16.0);
        let engine = ControlEngine::new(config, restored);
        assert_eq!(engine.preset(), Preset::Away);
    }

    #[test]
    fn hvac_action_reports_mode_activity() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
            c.target_temp = Some(21.0);
        });
        engine.update_sensor(20.0);

        assert_eq!(engine.hvac_action(&idle()), HvacAction::Idle);
        assert_eq!(
            engine.hvac_action(&snapshot(true, false, false, false)),
            HvacAction::Heating
        );

        engine
            .mode_transition(HvacMode::Off, &idle())
            .unwrap();
        assert_eq!(engine.hvac_action(&idle()), HvacAction::Off);
    }

    #[test]
    fn status_rounds_temperatures_to_display_precision() {
        let mut engine = engine_with(|c| {
            c.initial_mode = Some(HvacMode::Heat);
            c.target_temp = Some(21.0);
            c.precision = Some(0.5);
        });
        engine.update_sensor(20.26);

        let status = engine.status(&idle());
        assert_eq!(status.current_temp, Some(20.5));
        assert_eq!(status.target_temp, Some(21.0));
        assert_eq!(status.mode, HvacMode::Heat);
    }
}
