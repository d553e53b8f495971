use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use dualstat_common::config::{PersistedState, RuntimeConfig, ThermostatConfig};
use dualstat_common::engine::Trigger;
use dualstat_common::topics::{
    device_from_state_topic, sensor_state_topic, switch_state_topic, TOPIC_CMD_FAN_MODE,
    TOPIC_CMD_MODE, TOPIC_CMD_PRESET, TOPIC_CMD_TARGET, TOPIC_THERMOSTAT_STATE,
};
use dualstat_common::types::{FanMode, HvacMode, Preset, ThermostatStatus};

use crate::control::Thermostat;
use crate::gateway::{parse_switch_payload, MqttGateway};
use crate::store::Store;

const MAX_MQTT_PAYLOAD_BYTES: usize = 256;

type AppThermostat = Thermostat<MqttGateway>;

#[derive(Clone)]
struct AppState {
    thermostat: AppThermostat,
    store: Store,
    mqtt: AsyncClient,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StatePayload {
    #[serde(flatten)]
    status: ThermostatStatus,
    #[serde(rename = "updatedAt")]
    updated_at: i64,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = Store::new();
    let runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime
        .thermostat
        .validate()
        .context("invalid thermostat configuration")?;

    let restored = store.load_state().await.unwrap_or_else(|err| {
        warn!("failed to load persisted state from store: {err:#}");
        PersistedState::default()
    });

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("dualstat-controller", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let gateway = Arc::new(MqttGateway::new(mqtt.clone()));
    let thermostat = Thermostat::new(runtime.thermostat.clone(), restored, Arc::clone(&gateway));

    subscribe_topics(&mqtt, thermostat.config()).await?;

    let app_state = AppState {
        thermostat: thermostat.clone(),
        store,
        mqtt,
    };

    spawn_mqtt_loop(app_state.clone(), gateway, eventloop);
    spawn_keep_alive_loop(thermostat.clone());
    spawn_state_publish_loop(app_state.clone(), runtime.state_publish_ms);

    thermostat.bootstrap().await;

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/target", post(handle_set_target))
        .route("/api/preset", post(handle_set_preset))
        .route("/api/fan_mode", post(handle_set_fan_mode))
        .with_state(app_state);

    let port = std::env::var("DUALSTAT_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.http_port);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn subscribe_topics(mqtt: &AsyncClient, config: &ThermostatConfig) -> anyhow::Result<()> {
    let mut topics = vec![
        sensor_state_topic(&config.sensor),
        switch_state_topic(&config.heater),
        switch_state_topic(&config.cooler),
    ];
    if let Some(fan) = &config.fan {
        topics.push(switch_state_topic(fan));
    }
    if let Some(dryer) = &config.dryer {
        topics.push(switch_state_topic(dryer));
    }
    topics.extend(
        [
            TOPIC_CMD_MODE,
            TOPIC_CMD_TARGET,
            TOPIC_CMD_PRESET,
            TOPIC_CMD_FAN_MODE,
        ]
        .map(String::from),
    );

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(
    app_state: AppState,
    gateway: Arc<MqttGateway>,
    mut eventloop: rumqttc::EventLoop,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) = handle_mqtt_message(
                        &app_state,
                        &gateway,
                        message.topic,
                        message.payload.to_vec(),
                    )
                    .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    gateway: &MqttGateway,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let config = app_state.thermostat.config();

    if topic == sensor_state_topic(&config.sensor) {
        if let Ok(value) = message.trim().parse::<f64>() {
            gateway.record_reading(&config.sensor, value).await;
        }
        app_state.thermostat.handle_sensor_reading(&message).await;
        return Ok(());
    }

    if let Some(device) = device_from_state_topic(&topic) {
        match parse_switch_payload(&message) {
            Some(on) => gateway.record_report(device, on).await,
            None => warn!("unparseable switch state {message:?} on {topic}"),
        }
        return Ok(());
    }

    match topic.as_str() {
        TOPIC_CMD_MODE => match message.trim().parse::<HvacMode>() {
            Ok(mode) => match app_state.thermostat.set_mode(mode).await {
                Ok(()) => persist_state(app_state).await,
                Err(err) => warn!("{err}"),
            },
            Err(err) => warn!("{err}"),
        },
        TOPIC_CMD_TARGET => match message.trim().parse::<f64>() {
            Ok(value) => {
                if app_state.thermostat.set_temperature(value).await {
                    persist_state(app_state).await;
                }
            }
            Err(_) => warn!("invalid target temperature payload {message:?}"),
        },
        TOPIC_CMD_PRESET => match message.trim().parse::<Preset>() {
            Ok(preset) => match app_state.thermostat.set_preset(preset).await {
                Ok(()) => persist_state(app_state).await,
                Err(err) => warn!("{err}"),
            },
            Err(err) => warn!("{err}"),
        },
        TOPIC_CMD_FAN_MODE => match message.trim().parse::<FanMode>() {
            Ok(fan_mode) => app_state.thermostat.set_fan_mode(fan_mode).await,
            Err(err) => warn!("{err}"),
        },
        _ => {}
    }

    Ok(())
}

fn spawn_keep_alive_loop(thermostat: AppThermostat) {
    let Some(every) = thermostat.config().keep_alive() else {
        return;
    };

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            thermostat.evaluate(Trigger::KeepAlive, false).await;
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState, every_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(every_ms.max(1_000)));
        loop {
            interval.tick().await;

            match serde_json::to_vec(&state_payload(&app_state.thermostat).await) {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_THERMOSTAT_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("thermostat state publish failed: {err}");
                    }
                }
                Err(err) => warn!("thermostat state serialization failed: {err}"),
            }
        }
    });
}

async fn state_payload(thermostat: &AppThermostat) -> StatePayload {
    StatePayload {
        status: thermostat.status().await,
        updated_at: Utc::now().timestamp(),
    }
}

async fn persist_state(app_state: &AppState) {
    let persisted = app_state.thermostat.persisted().await;
    if let Err(err) = app_state.store.save_state(&persisted).await {
        warn!("failed to persist thermostat state: {err:#}");
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state_payload(&state.thermostat).await)
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let mode = match value.parse::<HvacMode>() {
        Ok(mode) => mode,
        Err(err) => {
            warn!("{err}");
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid mode. Use OFF, HEAT, COOL, DRY or FAN_ONLY",
            );
        }
    };

    if let Err(err) = state.thermostat.set_mode(mode).await {
        warn!("{err}");
        return error_response(StatusCode::BAD_REQUEST, "Requested mode is not available");
    }

    if let Err(err) = state.store.save_state(&state.thermostat.persisted().await).await {
        warn!("failed to persist mode update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist thermostat state",
        );
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_set_target(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(target) = value.parse::<f64>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };

    if !state.thermostat.set_temperature(target).await {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    }

    if let Err(err) = state.store.save_state(&state.thermostat.persisted().await).await {
        warn!("failed to persist target update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist thermostat state",
        );
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_set_preset(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let preset = match value.parse::<Preset>() {
        Ok(preset) => preset,
        Err(err) => {
            warn!("{err}");
            return error_response(StatusCode::BAD_REQUEST, "Invalid preset. Use 'none' or 'away'");
        }
    };

    if let Err(err) = state.thermostat.set_preset(preset).await {
        warn!("{err}");
        return error_response(StatusCode::BAD_REQUEST, "Away preset is not available");
    }

    if let Err(err) = state.store.save_state(&state.thermostat.persisted().await).await {
        warn!("failed to persist preset update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist thermostat state",
        );
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_set_fan_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let fan_mode = match value.parse::<FanMode>() {
        Ok(fan_mode) => fan_mode,
        Err(err) => {
            warn!("{err}");
            return error_response(StatusCode::BAD_REQUEST, "Invalid fan mode. Use 'on' or 'auto'");
        }
    };

    state.thermostat.set_fan_mode(fan_mode).await;
    handle_get_status(State(state)).await.into_response()
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
