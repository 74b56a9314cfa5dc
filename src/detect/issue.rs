/// Per-detection problems the state machine tolerates.
///
/// None of these abort a frame. They are logged and counted so that a
/// degrading detector is visible without interrupting a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectionIssue {
    /// A required field is missing or out of range. The detection is dropped.
    MalformedDetection { index: usize, reason: String },
    /// A hand without a track identifier cannot be attributed to a lifecycle.
    UnattributableHand { index: usize },
    /// A track identifier appeared more than once in a frame; only the first
    /// occurrence advances the track.
    DuplicateTrack { index: usize, track_id: u32 },
}

impl std::fmt::Display for DetectionIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionIssue::MalformedDetection { index, reason } => {
                write!(f, "malformed detection #{}: {}", index, reason)
            }
            DetectionIssue::UnattributableHand { index } => {
                write!(f, "hand detection #{} has no track_id", index)
            }
            DetectionIssue::DuplicateTrack { index, track_id } => {
                write!(f, "detection #{} repeats track_id {}", index, track_id)
            }
        }
    }
}

impl std::error::Error for DetectionIssue {}
