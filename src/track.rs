//! Per-track lifecycle records for one video session.

use serde::Serialize;
use std::collections::HashMap;

use crate::geometry::BoundingBox;

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrackPhase {
    #[default]
    Idle,
    InRegion,
    LeftRegionPending,
}

/// Mutable lifecycle state of one tracked hand.
///
/// Fields are private so the contact flag can only be raised while the hand
/// is inside the region and only cleared by a region entry from `Idle` or a
/// full reset.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct TrackState {
    track_id: u32,
    phase: TrackPhase,
    touched_utensil_while_in_region: bool,
    frames_since_left: u32,
    first_seen_frame: u64,
    last_seen_frame: u64,
    entered_region_frame: Option<u64>,
    left_region_frame: Option<u64>,
    last_bbox: Option<BoundingBox>,
}

impl TrackState {
    pub fn new(track_id: u32, frame_number: u64) -> Self {
        Self {
            track_id,
            phase: TrackPhase::Idle,
            touched_utensil_while_in_region: false,
            frames_since_left: 0,
            first_seen_frame: frame_number,
            last_seen_frame: frame_number,
            entered_region_frame: None,
            left_region_frame: None,
            last_bbox: None,
        }
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub fn phase(&self) -> TrackPhase {
        self.phase
    }

    pub fn touched_utensil_while_in_region(&self) -> bool {
        self.touched_utensil_while_in_region
    }

    pub fn frames_since_left(&self) -> u32 {
        self.frames_since_left
    }

    pub fn first_seen_frame(&self) -> u64 {
        self.first_seen_frame
    }

    pub fn last_seen_frame(&self) -> u64 {
        self.last_seen_frame
    }

    pub fn entered_region_frame(&self) -> Option<u64> {
        self.entered_region_frame
    }

    pub fn left_region_frame(&self) -> Option<u64> {
        self.left_region_frame
    }

    pub fn last_bbox(&self) -> Option<BoundingBox> {
        self.last_bbox
    }

    pub(crate) fn observe(&mut self, frame_number: u64, bbox: BoundingBox) {
        self.last_seen_frame = self.last_seen_frame.max(frame_number);
        self.last_bbox = Some(bbox);
    }

    /// `Idle -> InRegion`. Starts a new visit with a clear contact flag.
    pub(crate) fn enter_region(&mut self, frame_number: u64) {
        self.phase = TrackPhase::InRegion;
        self.touched_utensil_while_in_region = false;
        self.frames_since_left = 0;
        self.entered_region_frame = Some(frame_number);
        self.left_region_frame = None;
    }

    /// `LeftRegionPending -> InRegion`. Continues the current visit.
    pub(crate) fn resume_in_region(&mut self) {
        self.phase = TrackPhase::InRegion;
        self.frames_since_left = 0;
        self.left_region_frame = None;
    }

    /// `InRegion -> LeftRegionPending`.
    pub(crate) fn leave_region(&mut self, frame_number: u64) {
        self.phase = TrackPhase::LeftRegionPending;
        self.frames_since_left = 0;
        self.left_region_frame = Some(frame_number);
    }

    /// Raise the contact flag. Ignored outside the region.
    pub(crate) fn mark_utensil_contact(&mut self) -> bool {
        if self.phase != TrackPhase::InRegion || self.touched_utensil_while_in_region {
            return false;
        }
        self.touched_utensil_while_in_region = true;
        true
    }

    pub(crate) fn tick_outside(&mut self) {
        self.frames_since_left = self.frames_since_left.saturating_add(1);
    }

    /// Back to a fresh `Idle` lifecycle, keeping identity and sighting history.
    pub(crate) fn reset_to_idle(&mut self) {
        self.phase = TrackPhase::Idle;
        self.touched_utensil_while_in_region = false;
        self.frames_since_left = 0;
        self.entered_region_frame = None;
        self.left_region_frame = None;
    }
}

/// Mapping of `track_id` to lifecycle state, scoped to one video session.
#[derive(Clone, Debug, Default)]
pub struct TrackStore {
    tracks: HashMap<u32, TrackState>,
}

impl TrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, track_id: u32, frame_number: u64) -> &mut TrackState {
        self.tracks.entry(track_id).or_insert_with(|| {
            log::debug!("track {} first seen at frame {}", track_id, frame_number);
            TrackState::new(track_id, frame_number)
        })
    }

    pub fn get(&self, track_id: u32) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }

    /// Drop tracks not observed for more than `timeout_frames` frames before
    /// `current_frame`. Returns the purged identifiers in ascending order.
    pub fn purge_stale(&mut self, current_frame: u64, timeout_frames: u32) -> Vec<u32> {
        let timeout = u64::from(timeout_frames);
        let mut purged = Vec::new();
        self.tracks.retain(|track_id, state| {
            let unseen = current_frame.saturating_sub(state.last_seen_frame);
            if unseen > timeout {
                purged.push(*track_id);
                false
            } else {
                true
            }
        });
        purged.sort_unstable();
        purged
    }

    /// Session boundary: forget every track.
    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackState> {
        self.tracks.values()
    }
}
