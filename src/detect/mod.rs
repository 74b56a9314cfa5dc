mod issue;
mod labels;
mod payload;
mod result;

pub use issue::DetectionIssue;
pub use labels::LabelMap;
pub use payload::{
    parse_detections, parse_frame_message, validate_video_id, FrameMessage, ParsedDetections,
};
pub use result::{Detection, ObjectClass};
