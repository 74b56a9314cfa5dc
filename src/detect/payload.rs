//! Detector payload parsing.
//!
//! The detector publishes one JSON message per frame. Envelope errors (bad
//! JSON, missing `video_id` or `frame_number`) reject the whole message; a
//! bad entry inside `detections` only drops that entry.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;

use super::issue::DetectionIssue;
use super::labels::LabelMap;
use super::result::Detection;
use crate::geometry::BoundingBox;

const VIDEO_ID_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.:-]{0,127}$";

/// Outcome of parsing a detection list.
#[derive(Clone, Debug, Default)]
pub struct ParsedDetections {
    pub detections: Vec<Detection>,
    pub issues: Vec<DetectionIssue>,
    /// Entries that parsed but fell under the confidence threshold.
    pub below_threshold: usize,
}

/// One frame of detector output plus the video metadata that travels with it.
#[derive(Clone, Debug)]
pub struct FrameMessage {
    pub video_id: String,
    pub frame_number: u64,
    pub timestamp: f64,
    pub detections: Vec<Detection>,
    pub issues: Vec<DetectionIssue>,
    pub filename: Option<String>,
    pub total_frames: Option<u64>,
    pub fps: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FrameMessageWire {
    video_id: String,
    frame_number: u64,
    #[serde(default)]
    timestamp: f64,
    #[serde(default)]
    detections: Value,
    filename: Option<String>,
    total_frames: Option<u64>,
    fps: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Video identifiers end up in database keys and MQTT topics, so they are
/// held to a conservative allowlist.
pub fn validate_video_id(video_id: &str) -> Result<()> {
    static VIDEO_ID_RE: OnceLock<Regex> = OnceLock::new();
    let re = match VIDEO_ID_RE.get() {
        Some(re) => re,
        None => {
            let compiled = Regex::new(VIDEO_ID_PATTERN)?;
            VIDEO_ID_RE.get_or_init(|| compiled)
        }
    };
    if !re.is_match(video_id) {
        return Err(anyhow!("video_id must match {}", VIDEO_ID_PATTERN));
    }
    Ok(())
}

/// Parse a frame message from raw bytes (JSON).
pub fn parse_frame_message(
    payload: &[u8],
    labels: &LabelMap,
    min_confidence: f32,
) -> Result<FrameMessage> {
    let wire: FrameMessageWire =
        serde_json::from_slice(payload).context("parse frame message JSON")?;
    validate_video_id(&wire.video_id)?;

    let parsed = match &wire.detections {
        Value::Null => ParsedDetections::default(),
        other => parse_detections(other, labels, min_confidence)?,
    };
    if parsed.below_threshold > 0 {
        log::debug!(
            "frame {}: {} detections under confidence {:.2}",
            wire.frame_number,
            parsed.below_threshold,
            min_confidence
        );
    }

    Ok(FrameMessage {
        video_id: wire.video_id,
        frame_number: wire.frame_number,
        timestamp: wire.timestamp,
        detections: parsed.detections,
        issues: parsed.issues,
        filename: wire.filename,
        total_frames: wire.total_frames,
        fps: wire.fps,
        width: wire.width,
        height: wire.height,
    })
}

/// Parse a detector's `detections` array.
///
/// Only a non-array payload is an error. Individual entries that cannot be
/// interpreted are reported in `issues` and skipped.
pub fn parse_detections(
    payload: &Value,
    labels: &LabelMap,
    min_confidence: f32,
) -> Result<ParsedDetections> {
    let entries = payload
        .as_array()
        .ok_or_else(|| anyhow!("detections must be a JSON array"))?;

    let mut out = ParsedDetections::default();
    for (index, entry) in entries.iter().enumerate() {
        match parse_entry(entry, labels) {
            Ok(det) if det.confidence < min_confidence => out.below_threshold += 1,
            Ok(det) => out.detections.push(det),
            Err(reason) => {
                let issue = DetectionIssue::MalformedDetection { index, reason };
                log::warn!("dropping detection: {}", issue);
                out.issues.push(issue);
            }
        }
    }
    Ok(out)
}

fn parse_entry(entry: &Value, labels: &LabelMap) -> std::result::Result<Detection, String> {
    let obj = entry
        .as_object()
        .ok_or_else(|| "entry must be a JSON object".to_string())?;

    let label = obj
        .get("class_name")
        .and_then(Value::as_str)
        .ok_or_else(|| "class_name must be a string".to_string())?;

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| "confidence must be a number".to_string())?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence {} outside [0, 1]", confidence));
    }

    let bbox = obj
        .get("bbox")
        .ok_or_else(|| "bbox is required".to_string())
        .and_then(parse_bbox)?;

    let track_id = match obj.get("track_id") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let raw = value
                .as_u64()
                .ok_or_else(|| "track_id must be a non-negative integer".to_string())?;
            Some(u32::try_from(raw).map_err(|_| "track_id out of range".to_string())?)
        }
    };

    Ok(Detection {
        class: labels.classify(label),
        label: label.to_string(),
        confidence: confidence as f32,
        bbox,
        track_id,
    })
}

fn parse_bbox(value: &Value) -> std::result::Result<BoundingBox, String> {
    let coords = value
        .as_array()
        .filter(|coords| coords.len() == 4)
        .ok_or_else(|| "bbox must be [x1, y1, x2, y2]".to_string())?;

    let mut out = [0i32; 4];
    for (slot, coord) in out.iter_mut().zip(coords) {
        *slot = coord_to_pixel(coord)?;
    }
    let bbox = BoundingBox::new(out[0], out[1], out[2], out[3]);
    if !bbox.is_well_formed() {
        return Err(format!("bbox corners inverted: {:?}", out));
    }
    Ok(bbox)
}

fn coord_to_pixel(coord: &Value) -> std::result::Result<i32, String> {
    if let Some(v) = coord.as_i64() {
        return i32::try_from(v).map_err(|_| format!("bbox coordinate {} out of range", v));
    }
    match coord.as_f64() {
        // Detectors emitting float boxes are truncated to whole pixels.
        Some(v) if v.is_finite() && v >= i32::MIN as f64 && v <= i32::MAX as f64 => {
            Ok(v.trunc() as i32)
        }
        _ => Err("bbox coordinates must be numbers".to_string()),
    }
}
