use serde::Serialize;

use crate::detect::Detection;
use crate::violation::ViolationVerdict;

/// JSON message published for each violation.
#[derive(Clone, Debug, Serialize)]
pub struct ViolationMessage<'a> {
    pub video_id: &'a str,
    pub frame_number: u64,
    pub track_id: u32,
    pub bbox: [i32; 4],
    pub description: &'a str,
    pub entered_region_frame: Option<u64>,
    pub left_region_frame: Option<u64>,
    pub frames_since_left: u32,
    pub contributing_detections: &'a [Detection],
}

pub fn violation_payload(
    verdict: &ViolationVerdict,
    video_id: &str,
) -> serde_json::Result<Vec<u8>> {
    let message = ViolationMessage {
        video_id,
        frame_number: verdict.frame_number,
        track_id: verdict.track_id,
        bbox: verdict.bbox.as_array(),
        description: verdict.description,
        entered_region_frame: verdict.entered_region_frame,
        left_region_frame: verdict.left_region_frame,
        frames_since_left: verdict.frames_since_left,
        contributing_detections: &verdict.contributing_detections,
    };
    serde_json::to_vec(&message)
}
