//! hygiene_bridge - Run the violation tracker against live detector output.
//!
//! 1. Subscribes to the detector's per-frame MQTT topic
//! 2. Routes each frame through a `VideoSession`
//! 3. Stores violations and per-video progress in SQLite
//! 4. Publishes each violation to the violations topic (QoS 1)
//!
//! Broker address, topics, region, and tracking parameters come from the
//! `HYGIENE_CONFIG` file and environment overrides. An optional region topic
//! accepts `{"x1":..,"y1":..,"x2":..,"y2":..}` to replace the active region
//! without restarting.

use anyhow::{anyhow, Result};
use clap::Parser;
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hygiene_kernel::transport::{
    parse_mqtt_endpoint, validate_loopback_addr, violation_payload, MqttEndpoint, TlsMaterials,
};
use hygiene_kernel::{
    parse_frame_message, MonitorConfig, Region, SharedRegion, SqliteVerdictStore, VideoSession,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Flag hands that leave the ingredient region without a utensil and touch food"
)]
struct Args {
    /// JSON or TOML config file. Environment variables override its values.
    #[arg(long, env = "HYGIENE_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database for videos and violations. Overrides the config value.
    #[arg(long)]
    db_path: Option<String>,

    /// Allow non-loopback MQTT brokers.
    #[arg(long, env = "ALLOW_REMOTE_MQTT")]
    allow_remote_mqtt: bool,

    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    /// Enable TLS for MQTT (implied by an mqtts:// broker address).
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    /// PEM CA certificate to trust for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    mqtt_tls_ca_path: Option<PathBuf>,

    #[arg(long, env = "MQTT_TLS_CLIENT_CERT_PATH")]
    mqtt_tls_client_cert_path: Option<PathBuf>,

    #[arg(long, env = "MQTT_TLS_CLIENT_KEY_PATH")]
    mqtt_tls_client_key_path: Option<PathBuf>,

    /// Topic carrying region replacements. Disabled when unset.
    #[arg(long, env = "HYGIENE_REGION_TOPIC")]
    region_topic: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut cfg = MonitorConfig::load_from(args.config.as_deref())?;
    if let Some(db_path) = &args.db_path {
        cfg.db_path = db_path.clone();
    }

    let endpoint = parse_mqtt_endpoint(&cfg.mqtt.broker_addr, args.mqtt_use_tls)?;
    if !args.allow_remote_mqtt {
        validate_loopback_addr(&endpoint, &cfg.mqtt.broker_addr)?;
    } else {
        log::warn!("remote MQTT enabled - ensure the broker is on a trusted network");
    }
    let tls = TlsMaterials::load(
        args.mqtt_tls_ca_path.as_deref(),
        args.mqtt_tls_client_cert_path.as_deref(),
        args.mqtt_tls_client_key_path.as_deref(),
    )?;

    log::info!("hygiene bridge starting");
    log::info!(
        "  MQTT broker: {}:{} (TLS: {})",
        endpoint.host,
        endpoint.port,
        endpoint.use_tls
    );
    log::info!("  detections topic: {}", cfg.mqtt.detections_topic);
    log::info!("  violations topic: {}", cfg.mqtt.violations_topic);
    log::info!("  database: {}", cfg.db_path);
    log::info!("  region: {}", cfg.region);

    let region = SharedRegion::new(cfg.region);
    let store = SqliteVerdictStore::open(&cfg.db_path)?;
    let mut session = VideoSession::from_config(&cfg, region.clone(), store)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let active_client: Arc<Mutex<Option<Client>>> = Arc::new(Mutex::new(None));
    {
        let shutdown = shutdown.clone();
        let active_client = active_client.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
            if let Ok(guard) = active_client.lock() {
                if let Some(client) = guard.as_ref() {
                    let _ = client.disconnect();
                }
            }
        })?;
    }

    while !shutdown.load(Ordering::SeqCst) {
        let (client, mut connection) = connect_mqtt(
            &endpoint,
            &tls,
            &cfg.mqtt.client_id,
            args.mqtt_username.as_deref(),
            args.mqtt_password.as_deref(),
        )?;
        client.subscribe(&cfg.mqtt.detections_topic, QoS::AtLeastOnce)?;
        log::info!("subscribed to {}", cfg.mqtt.detections_topic);
        if let Some(topic) = &args.region_topic {
            client.subscribe(topic, QoS::AtLeastOnce)?;
            log::info!("subscribed to {} for region updates", topic);
        }
        *active_client
            .lock()
            .map_err(|_| anyhow!("client handle lock poisoned"))? = Some(client.clone());

        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let topic = match std::str::from_utf8(&publish.topic) {
                        Ok(topic) => topic,
                        Err(e) => {
                            log::warn!("skipping publish with invalid topic: {}", e);
                            continue;
                        }
                    };
                    if args.region_topic.as_deref() == Some(topic) {
                        if let Err(e) = apply_region_update(&region, &publish.payload) {
                            log::warn!("rejected region update: {}", e);
                        }
                        continue;
                    }
                    // Storage errors stop the bridge.
                    handle_frame(&mut session, &client, &cfg, &publish.payload)?;
                }
                Ok(_) => {}
                Err(e) => {
                    if !shutdown.load(Ordering::SeqCst) {
                        log::error!("MQTT connection error: {}. Reconnecting...", e);
                    }
                    break;
                }
            }
        }

        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        std::thread::sleep(RECONNECT_DELAY);
    }

    log::info!("shutdown signal received");
    if let Some(summary) = session.finish()? {
        log::info!(
            "final video {}: {} frames, {} violations",
            summary.video_id,
            summary.frames_processed,
            summary.total_violations
        );
    }
    Ok(())
}

fn handle_frame(
    session: &mut VideoSession<SqliteVerdictStore>,
    client: &Client,
    cfg: &MonitorConfig,
    payload: &[u8],
) -> Result<()> {
    let msg = match parse_frame_message(
        payload,
        &cfg.detection.labels,
        cfg.detection.min_confidence,
    ) {
        Ok(msg) => msg,
        Err(e) => {
            log::warn!("dropping frame message: {:#}", e);
            return Ok(());
        }
    };

    let report = session.handle_frame(&msg)?;
    for verdict in &report.verdicts {
        let body = violation_payload(verdict, &msg.video_id)?;
        if let Err(e) = client.publish(
            cfg.mqtt.violations_topic.as_str(),
            QoS::AtLeastOnce,
            false,
            body,
        ) {
            log::warn!(
                "failed to publish violation for track {}: {}",
                verdict.track_id,
                e
            );
        }
    }
    Ok(())
}

fn apply_region_update(region: &SharedRegion, payload: &[u8]) -> Result<()> {
    let next: Region = serde_json::from_slice(payload)?;
    region.replace(next)?;
    Ok(())
}

/// Build a fresh client for one connection attempt. The event loop is lazy,
/// so nothing touches the network until `connection.iter()` is polled.
fn connect_mqtt(
    endpoint: &MqttEndpoint,
    tls: &TlsMaterials,
    client_id: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<(Client, Connection)> {
    let credentials = username.map(|user| (user, password.unwrap_or_default()));
    let options = endpoint.options(client_id, credentials, tls)?;
    log::info!(
        "connecting to MQTT broker {}:{} (TLS: {}, auth: {})",
        endpoint.host,
        endpoint.port,
        endpoint.use_tls,
        credentials.is_some()
    );
    Ok(Client::new(options, 10))
}
