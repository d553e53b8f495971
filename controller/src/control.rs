use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use dualstat_common::config::{PersistedState, ThermostatConfig};
use dualstat_common::engine::{
    ActuatorSnapshot, ControlAction, ControlEngine, ModeUnavailable, PresetUnavailable,
    SwitchSnapshot, Trigger,
};
use dualstat_common::types::{FanMode, HvacMode, Preset, ThermostatStatus};

use crate::gateway::{ActuatorGateway, SensorGateway};

/// Pending delayed fan actions, keyed by device id. Scheduling a new
/// follow replaces the stored handle without aborting the pending task;
/// a superseded task still fires and re-checks live state at that point.
#[derive(Default)]
struct FanFollows {
    latest: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl FanFollows {
    async fn supersede(&self, device: &str, handle: JoinHandle<()>) {
        self.latest.lock().await.insert(device.to_string(), handle);
    }
}

/// One thermostat instance: the control lock around the decision engine,
/// plus the gateway glue that turns decided actions into device commands.
/// Every trigger funnels through the same mutex, so evaluations run one
/// at a time in lock-acquisition order.
pub struct Thermostat<G> {
    config: Arc<ThermostatConfig>,
    engine: Arc<Mutex<ControlEngine>>,
    gateway: Arc<G>,
    follows: Arc<FanFollows>,
}

impl<G> Clone for Thermostat<G> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            engine: Arc::clone(&self.engine),
            gateway: Arc::clone(&self.gateway),
            follows: Arc::clone(&self.follows),
        }
    }
}

impl<G> Thermostat<G>
where
    G: ActuatorGateway + SensorGateway + 'static,
{
    pub fn new(config: ThermostatConfig, restored: PersistedState, gateway: Arc<G>) -> Self {
        let engine = ControlEngine::new(config.clone(), restored);
        Self {
            config: Arc::new(config),
            engine: Arc::new(Mutex::new(engine)),
            gateway,
            follows: Arc::new(FanFollows::default()),
        }
    }

    pub fn config(&self) -> &ThermostatConfig {
        &self.config
    }

    /// Startup read of the sensor, so a retained reading activates control
    /// without waiting for the next publish.
    pub async fn bootstrap(&self) {
        if let Some(value) = self.gateway.read(&self.config.sensor).await {
            let mut engine = self.engine.lock().await;
            if engine.update_sensor(value) {
                self.run_control(&mut engine, Trigger::SensorUpdate, false)
                    .await;
            }
        }
    }

    /// A raw sensor publish. Malformed or non-finite readings are logged
    /// and discarded; the evaluation they would have triggered is skipped.
    pub async fn handle_sensor_reading(&self, raw: &str) {
        let Ok(value) = raw.trim().parse::<f64>() else {
            warn!("unable to update from sensor: invalid reading {raw:?}");
            return;
        };

        let mut engine = self.engine.lock().await;
        if !engine.update_sensor(value) {
            warn!("unable to update from sensor: non-finite reading");
            return;
        }
        self.run_control(&mut engine, Trigger::SensorUpdate, false)
            .await;
    }

    /// Direct evaluation entry point, used by the keep-alive ticker.
    pub async fn evaluate(&self, trigger: Trigger, forced: bool) {
        let mut engine = self.engine.lock().await;
        self.run_control(&mut engine, trigger, forced).await;
    }

    pub async fn set_mode(&self, mode: HvacMode) -> Result<(), ModeUnavailable> {
        let mut engine = self.engine.lock().await;
        let snapshot = self.snapshot().await;
        let shutdown = engine.mode_transition(mode, &snapshot)?;

        info!("set hvac mode to {mode}");
        self.execute(shutdown, Trigger::ModeChange).await;

        if mode != HvacMode::Off {
            // The shutdown commands just changed device state; a mode
            // change always takes effect immediately.
            self.run_control(&mut engine, Trigger::ModeChange, true)
                .await;
        }
        Ok(())
    }

    pub async fn set_temperature(&self, value: f64) -> bool {
        let mut engine = self.engine.lock().await;
        if !engine.set_target(value) {
            warn!("rejecting non-finite target temperature");
            return false;
        }

        info!("set target temperature to {value}");
        self.run_control(&mut engine, Trigger::Setpoint, true).await;
        true
    }

    pub async fn set_preset(&self, preset: Preset) -> Result<(), PresetUnavailable> {
        let mut engine = self.engine.lock().await;
        if engine.set_preset(preset)? {
            info!("set preset to {}", preset.as_str());
            self.run_control(&mut engine, Trigger::Preset, true).await;
        }
        Ok(())
    }

    pub async fn set_fan_mode(&self, fan_mode: FanMode) {
        let mut engine = self.engine.lock().await;
        let snapshot = self.snapshot().await;
        let actions = engine.set_fan_mode(fan_mode, &snapshot);

        info!("set fan mode to {}", fan_mode.as_str());
        if fan_mode == FanMode::Auto && snapshot.device_active() {
            info!("fan stays on until the current cycle completes");
        }
        self.execute(actions, Trigger::FanMode).await;
    }

    pub async fn status(&self) -> ThermostatStatus {
        let engine = self.engine.lock().await;
        let snapshot = self.snapshot().await;
        engine.status(&snapshot)
    }

    pub async fn persisted(&self) -> PersistedState {
        self.engine.lock().await.persisted()
    }

    /// Snapshot + decide + command, all under the caller's engine guard.
    async fn run_control(&self, engine: &mut ControlEngine, trigger: Trigger, forced: bool) {
        let was_active = engine.state().active;
        let snapshot = self.snapshot().await;
        let actions = engine.evaluate(&snapshot, trigger, forced);

        if !was_active && engine.state().active {
            info!("obtained current and target temperature, control is active");
        }
        self.execute(actions, trigger).await;
    }

    async fn snapshot(&self) -> ActuatorSnapshot {
        let mut snapshot = ActuatorSnapshot {
            heater: self.switch_snapshot(&self.config.heater).await,
            cooler: self.switch_snapshot(&self.config.cooler).await,
            ..ActuatorSnapshot::default()
        };
        if let Some(fan) = &self.config.fan {
            snapshot.fan = self.switch_snapshot(fan).await;
        }
        if let Some(dryer) = &self.config.dryer {
            snapshot.dryer = self.switch_snapshot(dryer).await;
        }
        snapshot
    }

    async fn switch_snapshot(&self, device: &str) -> SwitchSnapshot {
        SwitchSnapshot {
            on: self.gateway.is_on(device).await,
            held_for: self.gateway.held_for(device).await,
        }
    }

    async fn execute(&self, actions: Vec<ControlAction>, trigger: Trigger) {
        for action in actions {
            match action {
                ControlAction::Switch { actuator, on } => {
                    let Some(device) = self.config.device_id(actuator) else {
                        continue;
                    };
                    info!(
                        "turning {} {actuator} {device} ({trigger:?})",
                        if on { "on" } else { "off" }
                    );
                    if let Err(err) = self.gateway.set(device, on).await {
                        warn!("command to {device} failed: {err}");
                    }
                }
                ControlAction::FanFollow { on } => self.schedule_fan_follow(on).await,
            }
        }
    }

    /// Spawns the delayed fan follow as a detached task. It is not covered
    /// by the control lock: it sleeps, then reads the live device state
    /// (and for the off case, the current fan mode) before acting. A stale
    /// follow can therefore fire after a newer command; see the race test
    /// below.
    async fn schedule_fan_follow(&self, on: bool) {
        let Some(key) = self.config.fan.clone() else {
            return;
        };
        let fan = key.clone();
        let delay = self.config.fan_follow_delay();
        let config = Arc::clone(&self.config);
        let engine = Arc::clone(&self.engine);
        let gateway = Arc::clone(&self.gateway);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let device_active = device_active_now(gateway.as_ref(), config.as_ref()).await;
            if on {
                if device_active {
                    if let Err(err) = gateway.set(&fan, true).await {
                        warn!("fan follow-on failed: {err}");
                    }
                }
            } else {
                let fan_auto = { engine.lock().await.fan_mode() == FanMode::Auto };
                if !device_active && fan_auto {
                    if let Err(err) = gateway.set(&fan, false).await {
                        warn!("fan follow-off failed: {err}");
                    }
                }
            }
        });

        self.follows.supersede(&key, handle).await;
    }
}

/// Aggregate device activity read straight from the gateway, for use
/// outside the control lock. Mirrors the engine's definition: the fan is
/// excluded.
async fn device_active_now<G: ActuatorGateway + ?Sized>(
    gateway: &G,
    config: &ThermostatConfig,
) -> bool {
    if gateway.is_on(&config.heater).await {
        return true;
    }
    if gateway.is_on(&config.cooler).await {
        return true;
    }
    if let Some(dryer) = &config.dryer {
        if gateway.is_on(dryer).await {
            return true;
        }
    }
    false
}
