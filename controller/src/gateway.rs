use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use dualstat_common::topics;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("mqtt publish failed: {0}")]
    Publish(#[from] rumqttc::ClientError),
}

/// Commands and observes the on/off actuators. Commands are
/// fire-and-forget from the control loop's perspective; a failed command
/// surfaces as a mismatch that the next trigger reconciles via `is_on`.
#[async_trait]
pub trait ActuatorGateway: Send + Sync {
    async fn set(&self, device: &str, on: bool) -> Result<(), GatewayError>;

    async fn is_on(&self, device: &str) -> bool;

    /// How long the device has held its current on/off state. Zero when
    /// the device has never been observed, which keeps non-forced
    /// transitions blocked until a report or command is seen.
    async fn held_for(&self, device: &str) -> Duration;
}

/// Supplies the latest numeric temperature reading, if any.
#[async_trait]
pub trait SensorGateway: Send + Sync {
    async fn read(&self, sensor: &str) -> Option<f64>;
}

#[derive(Debug, Clone, Copy)]
struct SwitchTrack {
    on: bool,
    since: Instant,
}

/// MQTT-backed gateway. Keeps the last commanded or reported state of
/// every switch so `is_on` and `held_for` answer without a round trip;
/// incoming state reports reconcile external drift.
#[derive(Clone)]
pub struct MqttGateway {
    client: AsyncClient,
    switches: Arc<Mutex<HashMap<String, SwitchTrack>>>,
    readings: Arc<Mutex<HashMap<String, f64>>>,
}

impl MqttGateway {
    pub fn new(client: AsyncClient) -> Self {
        Self {
            client,
            switches: Arc::new(Mutex::new(HashMap::new())),
            readings: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Applies a device state report (retained or live) from the bus.
    pub async fn record_report(&self, device: &str, on: bool) {
        let mut switches = self.switches.lock().await;
        match switches.get_mut(device) {
            Some(track) if track.on == on => {}
            Some(track) => {
                debug!("{device} reported {}", if on { "on" } else { "off" });
                track.on = on;
                track.since = Instant::now();
            }
            None => {
                switches.insert(
                    device.to_string(),
                    SwitchTrack {
                        on,
                        since: Instant::now(),
                    },
                );
            }
        }
    }

    pub async fn record_reading(&self, sensor: &str, value: f64) {
        self.readings.lock().await.insert(sensor.to_string(), value);
    }
}

#[async_trait]
impl ActuatorGateway for MqttGateway {
    async fn set(&self, device: &str, on: bool) -> Result<(), GatewayError> {
        let payload = if on { "ON" } else { "OFF" };
        self.client
            .publish(
                topics::switch_command_topic(device),
                QoS::AtLeastOnce,
                false,
                payload,
            )
            .await?;
        // The commanded state stands until a report disagrees.
        self.record_report(device, on).await;
        Ok(())
    }

    async fn is_on(&self, device: &str) -> bool {
        self.switches
            .lock()
            .await
            .get(device)
            .map(|track| track.on)
            .unwrap_or(false)
    }

    async fn held_for(&self, device: &str) -> Duration {
        self.switches
            .lock()
            .await
            .get(device)
            .map(|track| track.since.elapsed())
            .unwrap_or(Duration::ZERO)
    }
}

#[async_trait]
impl SensorGateway for MqttGateway {
    async fn read(&self, sensor: &str) -> Option<f64> {
        self.readings.lock().await.get(sensor).copied()
    }
}

/// Parses the ON/OFF payloads devices publish on their state topics.
pub fn parse_switch_payload(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "ON" | "1" | "TRUE" => Some(true),
        "OFF" | "0" | "FALSE" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_payloads_parse_common_spellings() {
        assert_eq!(parse_switch_payload("ON"), Some(true));
        assert_eq!(parse_switch_payload("off"), Some(false));
        assert_eq!(parse_switch_payload(" 1 "), Some(true));
        assert_eq!(parse_switch_payload("0"), Some(false));
        assert_eq!(parse_switch_payload("toggle"), None);
    }
}
