//! Hygiene Kernel
//!
//! Per-track violation detection for food preparation video. A violation is a
//! hand that enters the restricted ingredient region, leaves it without having
//! touched a utensil, and then touches food within a bounded number of
//! observed frames.
//!
//! # Architecture
//!
//! The crate only consumes detector output. Object detection and tracking run
//! upstream; each frame arrives as a list of classified boxes, hands carrying
//! a tracker-assigned `track_id`.
//!
//! 1. **Pure core**: `geometry`, `track` and `violation` perform no I/O. The
//!    state machine never fails on bad input; it skips and reports it.
//! 2. **One session, one owner**: a `ViolationStateMachine` and its track
//!    store belong to a single video session on a single thread.
//! 3. **Shared region**: the only cross-session state is the active region,
//!    replaced wholesale through a `SharedRegion` handle.
//!
//! # Module Structure
//!
//! - `detect`: detection types and detector payload parsing
//! - `region`: restricted region value and its shared handle
//! - `violation`: the per-track state machine
//! - `session`: video session boundaries and verdict forwarding
//! - `storage`: verdict sinks (in-memory, SQLite)
//! - `transport`: MQTT endpoint handling and published payloads
//! - `config`: file and environment configuration

pub mod config;
pub mod detect;
pub mod geometry;
pub mod region;
pub mod session;
pub mod storage;
pub mod track;
pub mod transport;
pub mod violation;

pub use config::{DetectionSettings, MonitorConfig, MqttSettings};
pub use detect::{
    parse_detections, parse_frame_message, Detection, DetectionIssue, FrameMessage, LabelMap,
    ObjectClass,
};
pub use geometry::{boxes_overlap, center, point_in_region, BoundingBox, Point};
pub use region::{Region, SharedRegion};
pub use session::{VideoSession, VideoSummary};
pub use storage::{InMemoryVerdictStore, SqliteVerdictStore, VerdictSink, VideoInfo};
pub use track::{TrackPhase, TrackState, TrackStore};
pub use violation::{
    FrameReport, FrameStats, TrackingSettings, ViolationStateMachine, ViolationVerdict,
    VIOLATION_DESCRIPTION,
};
