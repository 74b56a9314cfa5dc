//! Violation state machine.
//!
//! A violation is a hand that entered the restricted region, left it without
//! having touched a utensil, and then touched food. The machine reduces one
//! frame of detections at a time and owns the per-track store for its video
//! session. It performs no I/O and never fails on bad input: malformed or
//! unattributable detections are skipped and reported in the frame report.
//!
//! Per hand and frame, transitions are:
//!
//! - `Idle -> InRegion` when the box center is inside the region (contact
//!   flag cleared).
//! - `InRegion`: any overlapping utensil raises the contact flag.
//! - `InRegion -> LeftRegionPending` when the center leaves the region.
//! - `LeftRegionPending`: every observed frame outside the region advances
//!   `frames_since_left`; food contact without a raised flag yields a verdict
//!   and returns the track to `Idle`; exceeding the tracking window returns
//!   it to `Idle` silently; re-entering the region resumes the visit.
//!
//! When several hands violate in one frame, `process_frame` returns one
//! verdict and queues the rest. Each later call returns the oldest queued
//! verdict before any new one.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};

use crate::detect::{Detection, DetectionIssue, ObjectClass};
use crate::geometry::{boxes_overlap, center, point_in_region, BoundingBox};
use crate::region::Region;
use crate::track::{TrackPhase, TrackState, TrackStore};

pub const VIOLATION_DESCRIPTION: &str =
    "Hand grabbed from region without utensil and touched food";

const DEFAULT_PROXIMITY_MARGIN: u32 = 50;
const DEFAULT_FRAMES_TO_TRACK: u32 = 90;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackingSettings {
    /// Pixels added around a hand box before testing utensil/food overlap.
    pub proximity_margin_pixels: u32,
    /// Observed frames a hand may spend outside the region before it is
    /// abandoned without a verdict.
    pub frames_to_track_after_leaving: u32,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            proximity_margin_pixels: DEFAULT_PROXIMITY_MARGIN,
            frames_to_track_after_leaving: DEFAULT_FRAMES_TO_TRACK,
        }
    }
}

/// One emitted violation. Immutable once produced.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ViolationVerdict {
    pub track_id: u32,
    pub frame_number: u64,
    /// Hand box at verdict time.
    pub bbox: BoundingBox,
    /// Food detections the hand overlapped on the verdict frame.
    pub contributing_detections: Vec<Detection>,
    pub entered_region_frame: Option<u64>,
    pub left_region_frame: Option<u64>,
    /// Observed frames between leaving the region and the verdict.
    pub frames_since_left: u32,
    pub description: &'static str,
}

/// Counters for a single frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub hands: usize,
    pub utensils: usize,
    pub food: usize,
    pub issues: Vec<DetectionIssue>,
    pub purged_tracks: Vec<u32>,
    /// Tracks that violated in this frame but whose verdict was queued
    /// because the call already returned one. Queued verdicts come out first
    /// on later calls with their original `frame_number`.
    pub deferred_tracks: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub verdicts: Vec<ViolationVerdict>,
    pub stats: FrameStats,
}

/// Per-session violation state machine.
///
/// One instance serves one video session from one thread. Frames are expected
/// in non-decreasing `frame_number` order.
#[derive(Clone, Debug)]
pub struct ViolationStateMachine {
    region: Region,
    settings: TrackingSettings,
    store: TrackStore,
    violation_count: u64,
    last_frame: Option<u64>,
    pending: VecDeque<ViolationVerdict>,
}

struct Roles<'a> {
    hands: Vec<(&'a Detection, u32)>,
    utensils: Vec<&'a Detection>,
    food: Vec<&'a Detection>,
}

impl ViolationStateMachine {
    pub fn new(region: Region, settings: TrackingSettings) -> Self {
        log::info!(
            "violation tracker initialised: region={} margin={}px window={} frames",
            region,
            settings.proximity_margin_pixels,
            settings.frames_to_track_after_leaving
        );
        Self {
            region,
            settings,
            store: TrackStore::new(),
            violation_count: 0,
            last_frame: None,
            pending: VecDeque::new(),
        }
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn settings(&self) -> TrackingSettings {
        self.settings
    }

    /// Replace the region. Applies from the next frame on; existing track
    /// states keep their phase.
    pub fn update_region(&mut self, region: Region) {
        if region != self.region {
            log::info!("violation tracker region: {} -> {}", self.region, region);
            self.region = region;
        }
    }

    /// Session boundary: drop every track, queued verdict and the violation
    /// counter. Call `drain_pending` first to keep queued verdicts.
    pub fn reset(&mut self) {
        if !self.pending.is_empty() {
            log::warn!("reset discards {} queued verdicts", self.pending.len());
        }
        self.store.reset();
        self.pending.clear();
        self.violation_count = 0;
        self.last_frame = None;
        log::info!("violation tracker reset");
    }

    /// Verdicts handed out so far in this session.
    pub fn violation_count(&self) -> u64 {
        self.violation_count
    }

    /// Verdicts produced but not yet returned.
    pub fn pending_verdicts(&self) -> usize {
        self.pending.len()
    }

    /// Hand out every queued verdict, oldest first.
    pub fn drain_pending(&mut self) -> Vec<ViolationVerdict> {
        let drained: Vec<ViolationVerdict> = self.pending.drain(..).collect();
        self.violation_count += drained.len() as u64;
        drained
    }

    pub fn track(&self, track_id: u32) -> Option<&TrackState> {
        self.store.get(track_id)
    }

    pub fn tracks(&self) -> &TrackStore {
        &self.store
    }

    /// Advance every observed hand by one frame. Returns at most one verdict,
    /// taking a queued one from an earlier frame first.
    pub fn process_frame(
        &mut self,
        detections: &[Detection],
        frame_number: u64,
    ) -> Option<ViolationVerdict> {
        self.process_frame_report(detections, frame_number)
            .verdicts
            .into_iter()
            .next()
    }

    /// Like `process_frame`, returning the frame counters alongside the
    /// (at most one) verdict.
    pub fn process_frame_report(
        &mut self,
        detections: &[Detection],
        frame_number: u64,
    ) -> FrameReport {
        self.step(detections, frame_number, Some(1))
    }

    /// Extension of `process_frame` that returns every queued verdict and
    /// every verdict produced in this frame.
    pub fn process_frame_all(
        &mut self,
        detections: &[Detection],
        frame_number: u64,
    ) -> Vec<ViolationVerdict> {
        self.step(detections, frame_number, None).verdicts
    }

    fn step(
        &mut self,
        detections: &[Detection],
        frame_number: u64,
        verdict_limit: Option<usize>,
    ) -> FrameReport {
        if let Some(last) = self.last_frame {
            if frame_number < last {
                log::warn!(
                    "frame {} arrived after frame {}; processing anyway",
                    frame_number,
                    last
                );
            }
        }
        self.last_frame = Some(self.last_frame.map_or(frame_number, |l| l.max(frame_number)));

        let mut stats = FrameStats {
            purged_tracks: self
                .store
                .purge_stale(frame_number, self.settings.frames_to_track_after_leaving),
            ..FrameStats::default()
        };
        if !stats.purged_tracks.is_empty() {
            log::debug!(
                "frame {}: purged stale tracks {:?}",
                frame_number,
                stats.purged_tracks
            );
        }

        let roles = partition(detections, &mut stats.issues);
        stats.hands = roles.hands.len();
        stats.utensils = roles.utensils.len();
        stats.food = roles.food.len();

        let region = self.region;
        let margin = self.settings.proximity_margin_pixels;
        let window = self.settings.frames_to_track_after_leaving;
        let mut verdicts = Vec::new();
        let has_room = |verdicts: &[ViolationVerdict]| {
            verdict_limit.map_or(true, |limit| verdicts.len() < limit)
        };
        while has_room(&verdicts) {
            match self.pending.pop_front() {
                Some(queued) => verdicts.push(queued),
                None => break,
            }
        }

        for (hand, track_id) in &roles.hands {
            let state = self.store.get_or_create(*track_id, frame_number);
            state.observe(frame_number, hand.bbox);
            let inside = point_in_region(center(&hand.bbox), &region);
            let before = state.phase();

            let eligible = match state.phase() {
                TrackPhase::Idle => {
                    if inside {
                        state.enter_region(frame_number);
                        touch_utensils(state, hand, &roles.utensils, margin);
                    }
                    false
                }
                TrackPhase::InRegion => {
                    if inside {
                        touch_utensils(state, hand, &roles.utensils, margin);
                        false
                    } else {
                        state.leave_region(frame_number);
                        true
                    }
                }
                TrackPhase::LeftRegionPending => {
                    if inside {
                        state.resume_in_region();
                        touch_utensils(state, hand, &roles.utensils, margin);
                        false
                    } else {
                        state.tick_outside();
                        if state.frames_since_left() > window {
                            log::debug!(
                                "track {} abandoned after {} frames outside region",
                                track_id,
                                state.frames_since_left()
                            );
                            state.reset_to_idle();
                            false
                        } else {
                            true
                        }
                    }
                }
            };

            if before != state.phase() {
                log::debug!(
                    "track {} {:?} -> {:?} at frame {}",
                    track_id,
                    before,
                    state.phase(),
                    frame_number
                );
            }

            if !eligible || state.touched_utensil_while_in_region() {
                continue;
            }

            let touching: Vec<Detection> = roles
                .food
                .iter()
                .filter(|food| boxes_overlap(&hand.bbox, &food.bbox, margin))
                .map(|food| (*food).clone())
                .collect();
            if touching.is_empty() {
                continue;
            }

            let verdict = ViolationVerdict {
                track_id: *track_id,
                frame_number,
                bbox: hand.bbox,
                contributing_detections: touching,
                entered_region_frame: state.entered_region_frame(),
                left_region_frame: state.left_region_frame(),
                frames_since_left: state.frames_since_left(),
                description: VIOLATION_DESCRIPTION,
            };
            state.reset_to_idle();
            log::info!(
                "violation: track {} at frame {} (left region at {:?}, {} frames later)",
                verdict.track_id,
                verdict.frame_number,
                verdict.left_region_frame,
                verdict.frames_since_left
            );
            if has_room(&verdicts) {
                verdicts.push(verdict);
            } else {
                log::debug!(
                    "track {} verdict queued: frame {} already returned one",
                    track_id,
                    frame_number
                );
                stats.deferred_tracks.push(*track_id);
                self.pending.push_back(verdict);
            }
        }

        self.violation_count += verdicts.len() as u64;
        FrameReport { verdicts, stats }
    }
}

fn touch_utensils(state: &mut TrackState, hand: &Detection, utensils: &[&Detection], margin: u32) {
    let touching = utensils
        .iter()
        .any(|utensil| boxes_overlap(&hand.bbox, &utensil.bbox, margin));
    if touching && state.mark_utensil_contact() {
        log::debug!("track {} touched a utensil inside region", state.track_id());
    }
}

fn partition<'a>(detections: &'a [Detection], issues: &mut Vec<DetectionIssue>) -> Roles<'a> {
    let mut roles = Roles {
        hands: Vec::new(),
        utensils: Vec::new(),
        food: Vec::new(),
    };
    let mut seen = HashSet::new();

    for (index, det) in detections.iter().enumerate() {
        if !det.is_well_formed() {
            let issue = DetectionIssue::MalformedDetection {
                index,
                reason: format!(
                    "confidence={} bbox={:?}",
                    det.confidence,
                    det.bbox.as_array()
                ),
            };
            log::warn!("skipping detection: {}", issue);
            issues.push(issue);
            continue;
        }
        match det.class {
            ObjectClass::Hand => match det.track_id {
                None => {
                    let issue = DetectionIssue::UnattributableHand { index };
                    log::debug!("ignoring {}", issue);
                    issues.push(issue);
                }
                Some(track_id) if !seen.insert(track_id) => {
                    let issue = DetectionIssue::DuplicateTrack { index, track_id };
                    log::debug!("ignoring {}", issue);
                    issues.push(issue);
                }
                Some(track_id) => roles.hands.push((det, track_id)),
            },
            ObjectClass::Utensil => roles.utensils.push(det),
            ObjectClass::Food => roles.food.push(det),
            ObjectClass::Background => {}
        }
    }
    roles
}
