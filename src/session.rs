//! Video sessions.
//!
//! A `VideoSession` feeds frame messages from one stream into a
//! `ViolationStateMachine` and forwards what it produces to a `VerdictSink`.
//! A change of `video_id` is a session boundary: the previous video is
//! completed and every track is dropped before the new video's first frame.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;

use crate::config::MonitorConfig;
use crate::detect::FrameMessage;
use crate::region::SharedRegion;
use crate::storage::{VerdictSink, VideoInfo};
use crate::violation::{FrameReport, TrackingSettings, ViolationStateMachine};

/// Totals for a completed video.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct VideoSummary {
    pub video_id: String,
    pub frames_processed: u64,
    pub total_violations: u64,
}

pub struct VideoSession<S: VerdictSink> {
    machine: ViolationStateMachine,
    region: SharedRegion,
    region_version: u64,
    sink: S,
    progress_every_frames: u64,
    current_video: Option<String>,
    last_timestamp: f64,
    frames_processed: u64,
    /// Timestamps of frames that still have queued verdicts.
    queued_timestamps: HashMap<u64, f64>,
}

impl<S: VerdictSink> VideoSession<S> {
    pub fn new(
        region: SharedRegion,
        settings: TrackingSettings,
        progress_every_frames: u64,
        sink: S,
    ) -> Result<Self> {
        let (region_version, initial) = region.snapshot()?;
        Ok(Self {
            machine: ViolationStateMachine::new(initial, settings),
            region,
            region_version,
            sink,
            progress_every_frames: progress_every_frames.max(1),
            current_video: None,
            last_timestamp: 0.0,
            frames_processed: 0,
            queued_timestamps: HashMap::new(),
        })
    }

    pub fn from_config(cfg: &MonitorConfig, region: SharedRegion, sink: S) -> Result<Self> {
        Self::new(region, cfg.tracking, cfg.progress_every_frames, sink)
    }

    pub fn current_video(&self) -> Option<&str> {
        self.current_video.as_deref()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn machine(&self) -> &ViolationStateMachine {
        &self.machine
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Process one frame message. Verdicts are recorded in the sink before
    /// they are returned; a sink failure aborts the frame with an error.
    /// A verdict queued on an earlier frame keeps that frame's timestamp.
    pub fn handle_frame(&mut self, msg: &FrameMessage) -> Result<FrameReport> {
        if self.current_video.as_deref() != Some(msg.video_id.as_str()) {
            self.start_video(msg)?;
        }
        self.sync_region()?;

        let mut report = self
            .machine
            .process_frame_report(&msg.detections, msg.frame_number);
        if !msg.issues.is_empty() {
            let mut issues = msg.issues.clone();
            issues.append(&mut report.stats.issues);
            report.stats.issues = issues;
        }

        self.last_timestamp = msg.timestamp;
        if !report.stats.deferred_tracks.is_empty() {
            self.queued_timestamps.insert(msg.frame_number, msg.timestamp);
        }
        for verdict in &report.verdicts {
            let timestamp = self.timestamp_for(verdict.frame_number, msg);
            self.sink.record_violation(&msg.video_id, timestamp, verdict)?;
        }
        if self.machine.pending_verdicts() == 0 {
            self.queued_timestamps.clear();
        }

        self.frames_processed += 1;
        if self.frames_processed % self.progress_every_frames == 0 {
            self.sink
                .update_progress(&msg.video_id, self.frames_processed)?;
            log::debug!(
                "video {}: {} frames processed, {} violations",
                msg.video_id,
                self.frames_processed,
                self.machine.violation_count()
            );
        }
        Ok(report)
    }

    /// Complete the current video, if any.
    pub fn finish(&mut self) -> Result<Option<VideoSummary>> {
        let Some(video_id) = self.current_video.take() else {
            return Ok(None);
        };
        for verdict in self.machine.drain_pending() {
            let timestamp = self
                .queued_timestamps
                .get(&verdict.frame_number)
                .copied()
                .unwrap_or(self.last_timestamp);
            self.sink.record_violation(&video_id, timestamp, &verdict)?;
        }
        self.queued_timestamps.clear();
        let summary = VideoSummary {
            video_id,
            frames_processed: self.frames_processed,
            total_violations: self.machine.violation_count(),
        };
        self.sink
            .update_progress(&summary.video_id, summary.frames_processed)?;
        self.sink
            .complete_video(&summary.video_id, summary.total_violations)?;
        log::info!(
            "video {} completed: {} frames, {} violations",
            summary.video_id,
            summary.frames_processed,
            summary.total_violations
        );
        Ok(Some(summary))
    }

    fn start_video(&mut self, msg: &FrameMessage) -> Result<()> {
        self.finish()?;
        self.machine.reset();
        self.frames_processed = 0;
        self.queued_timestamps.clear();

        let info = VideoInfo {
            video_id: msg.video_id.clone(),
            filename: msg.filename.clone(),
            total_frames: msg.total_frames,
            fps: msg.fps,
            width: msg.width,
            height: msg.height,
        };
        self.sink.begin_video(&info)?;
        log::info!(
            "video {} started (filename={:?}, total_frames={:?})",
            info.video_id,
            info.filename,
            info.total_frames
        );
        self.current_video = Some(info.video_id);
        Ok(())
    }

    fn timestamp_for(&self, frame_number: u64, msg: &FrameMessage) -> f64 {
        if frame_number == msg.frame_number {
            return msg.timestamp;
        }
        self.queued_timestamps
            .get(&frame_number)
            .copied()
            .unwrap_or(msg.timestamp)
    }

    fn sync_region(&mut self) -> Result<()> {
        let (version, region) = self.region.snapshot()?;
        if version != self.region_version {
            self.machine.update_region(region);
            self.region_version = version;
        }
        Ok(())
    }
}
