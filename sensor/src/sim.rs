use std::time::Duration;

use anyhow::Context;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{info, warn};

use dualstat_common::topics::sensor_state_topic;

/// Simulated temperature source for driving the controller without real
/// hardware: publishes a slowly oscillating reading on the configured
/// sensor's state topic.
pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let sensor_id = std::env::var("SENSOR_ID").unwrap_or_else(|_| "sensor".to_string());
    let base_temp = std::env::var("SENSOR_BASE_TEMP")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(20.0);
    let publish_secs = std::env::var("SENSOR_PUBLISH_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(30);

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("dualstat-sensor", mqtt_host, mqtt_port);
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("sensor mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    let topic = sensor_state_topic(&sensor_id);
    info!("sensor publisher started on {topic}");

    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(Duration::from_secs(publish_secs.max(1)));

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);

        // A gentle triangle wave around the base temperature, enough to
        // walk the controller through both tolerance edges.
        let phase = (tick % 40) as f64;
        let offset = if phase < 20.0 { phase } else { 40.0 - phase };
        let temperature = base_temp - 1.0 + offset * 0.1;

        let payload = format!("{temperature:.1}");
        mqtt.publish(&topic, QoS::AtLeastOnce, true, payload.clone())
            .await
            .context("failed to publish sensor temperature")?;
        info!("published {payload}");
    }
}
