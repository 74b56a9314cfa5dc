use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::detect::LabelMap;
use crate::region::Region;
use crate::violation::TrackingSettings;

const DEFAULT_DB_PATH: &str = "violations.db";
const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_PROGRESS_EVERY_FRAMES: u64 = 30;
const DEFAULT_MQTT_BROKER_ADDR: &str = "127.0.0.1:1883";
const DEFAULT_DETECTIONS_TOPIC: &str = "hygiene/detections";
const DEFAULT_VIOLATIONS_TOPIC: &str = "hygiene/violations";
const DEFAULT_MQTT_CLIENT_ID: &str = "hygiene_bridge";

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    db_path: Option<String>,
    region: Option<RegionConfigFile>,
    tracking: Option<TrackingConfigFile>,
    detection: Option<DetectionConfigFile>,
    progress_every_frames: Option<u64>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize)]
struct RegionConfigFile {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    frames_to_track_after_leaving: Option<u32>,
    proximity_margin_pixels: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    min_confidence: Option<f32>,
    labels: Option<LabelMap>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker_addr: Option<String>,
    detections_topic: Option<String>,
    violations_topic: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub db_path: String,
    pub region: Region,
    pub tracking: TrackingSettings,
    pub detection: DetectionSettings,
    pub progress_every_frames: u64,
    pub mqtt: MqttSettings,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub min_confidence: f32,
    pub labels: LabelMap,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker_addr: String,
    pub detections_topic: String,
    pub violations_topic: String,
    pub client_id: String,
}

impl MonitorConfig {
    /// Load from the file named by `HYGIENE_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HYGIENE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let defaults = TrackingSettings::default();
        let region = file
            .region
            .map(|r| Region {
                x1: r.x1,
                y1: r.y1,
                x2: r.x2,
                y2: r.y2,
            })
            .unwrap_or_default();
        let tracking = TrackingSettings {
            frames_to_track_after_leaving: file
                .tracking
                .as_ref()
                .and_then(|t| t.frames_to_track_after_leaving)
                .unwrap_or(defaults.frames_to_track_after_leaving),
            proximity_margin_pixels: file
                .tracking
                .as_ref()
                .and_then(|t| t.proximity_margin_pixels)
                .unwrap_or(defaults.proximity_margin_pixels),
        };
        let detection = DetectionSettings {
            min_confidence: file
                .detection
                .as_ref()
                .and_then(|d| d.min_confidence)
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
            labels: file
                .detection
                .and_then(|d| d.labels)
                .unwrap_or_default(),
        };
        let mqtt = file.mqtt.unwrap_or_default();
        let mqtt = MqttSettings {
            broker_addr: mqtt
                .broker_addr
                .unwrap_or_else(|| DEFAULT_MQTT_BROKER_ADDR.to_string()),
            detections_topic: mqtt
                .detections_topic
                .unwrap_or_else(|| DEFAULT_DETECTIONS_TOPIC.to_string()),
            violations_topic: mqtt
                .violations_topic
                .unwrap_or_else(|| DEFAULT_VIOLATIONS_TOPIC.to_string()),
            client_id: mqtt
                .client_id
                .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
        };
        Self {
            db_path: file
                .db_path
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            region,
            tracking,
            detection,
            progress_every_frames: file
                .progress_every_frames
                .unwrap_or(DEFAULT_PROGRESS_EVERY_FRAMES),
            mqtt,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_parsed::<i32>("ROI_X1")? {
            self.region.x1 = v;
        }
        if let Some(v) = env_parsed::<i32>("ROI_Y1")? {
            self.region.y1 = v;
        }
        if let Some(v) = env_parsed::<i32>("ROI_X2")? {
            self.region.x2 = v;
        }
        if let Some(v) = env_parsed::<i32>("ROI_Y2")? {
            self.region.y2 = v;
        }
        if let Some(v) = env_parsed::<u32>("FRAMES_TO_TRACK_AFTER_ROI")? {
            self.tracking.frames_to_track_after_leaving = v;
        }
        if let Some(v) = env_parsed::<u32>("PROXIMITY_MARGIN")? {
            self.tracking.proximity_margin_pixels = v;
        }
        if let Some(v) = env_parsed::<f32>("CONFIDENCE_THRESHOLD")? {
            self.detection.min_confidence = v;
        }
        if let Some(path) = env_string("HYGIENE_DB_PATH") {
            self.db_path = path;
        }
        if let Some(addr) = env_string("MQTT_BROKER_ADDR") {
            self.mqtt.broker_addr = addr;
        }
        if let Some(topic) = env_string("HYGIENE_DETECTIONS_TOPIC") {
            self.mqtt.detections_topic = topic;
        }
        if let Some(topic) = env_string("HYGIENE_VIOLATIONS_TOPIC") {
            self.mqtt.violations_topic = topic;
        }
        if let Some(client_id) = env_string("MQTT_CLIENT_ID") {
            self.mqtt.client_id = client_id;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.region = self.region.validated()?;

        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            return Err(anyhow!("min_confidence must be within [0, 1]"));
        }
        if self.tracking.frames_to_track_after_leaving == 0 {
            return Err(anyhow!("frames_to_track_after_leaving must be greater than zero"));
        }
        if self.progress_every_frames == 0 {
            return Err(anyhow!("progress_every_frames must be greater than zero"));
        }
        self.detection.labels = self.detection.labels.normalized();
        if self.detection.labels.hand.is_empty() {
            return Err(anyhow!("at least one hand label is required"));
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value: {}", key, raw)),
        None => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
