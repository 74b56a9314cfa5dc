use hygiene_kernel::{
    boxes_overlap, BoundingBox, Detection, ObjectClass, Region, TrackPhase, TrackingSettings,
    ViolationStateMachine, ViolationVerdict,
};

const IN_REGION: BoundingBox = BoundingBox::new(200, 200, 240, 240);
const OUT_OF_REGION: BoundingBox = BoundingBox::new(600, 200, 640, 240);
const FOOD_BY_EXIT: BoundingBox = BoundingBox::new(650, 210, 700, 260);
const UTENSIL_IN_REGION: BoundingBox = BoundingBox::new(230, 230, 260, 260);

fn machine(window: u32) -> ViolationStateMachine {
    ViolationStateMachine::new(
        Region::new(100, 150, 400, 400).unwrap(),
        TrackingSettings {
            proximity_margin_pixels: 20,
            frames_to_track_after_leaving: window,
        },
    )
}

fn hand(track_id: u32, bbox: BoundingBox) -> Detection {
    Detection::new(ObjectClass::Hand, 0.9, bbox).with_track_id(track_id)
}

fn food() -> Detection {
    Detection::new(ObjectClass::Food, 0.8, FOOD_BY_EXIT).with_label("pizza")
}

fn scooper() -> Detection {
    Detection::new(ObjectClass::Utensil, 0.8, UTENSIL_IN_REGION).with_label("scooper")
}

/// Drive one hand through `[from, to]` inclusive, returning all verdicts.
fn run(
    m: &mut ViolationStateMachine,
    frames: std::ops::RangeInclusive<u64>,
    frame: impl Fn(u64) -> Vec<Detection>,
) -> Vec<ViolationVerdict> {
    frames
        .filter_map(|n| m.process_frame(&frame(n), n))
        .collect()
}

#[test]
fn scenario_a_exit_without_utensil_then_food_is_a_violation() {
    let mut m = machine(90);
    let verdicts = run(&mut m, 10..=45, |n| match n {
        10..=39 => vec![hand(1, IN_REGION)],
        40..=44 => vec![hand(1, OUT_OF_REGION)],
        _ => vec![hand(1, OUT_OF_REGION), food()],
    });

    assert_eq!(verdicts.len(), 1);
    let v = &verdicts[0];
    assert_eq!(v.track_id, 1);
    assert_eq!(v.frame_number, 45);
    assert_eq!(v.entered_region_frame, Some(10));
    assert_eq!(v.left_region_frame, Some(40));
    assert_eq!(v.frames_since_left, 5);
    assert_eq!(v.contributing_detections, vec![food()]);
    assert_eq!(m.track(1).unwrap().phase(), TrackPhase::Idle);
    assert_eq!(m.violation_count(), 1);
}

#[test]
fn scenario_b_utensil_contact_in_region_suppresses_violation() {
    let mut m = machine(90);
    let verdicts = run(&mut m, 10..=60, |n| match n {
        25 => vec![hand(1, IN_REGION), scooper()],
        10..=39 => vec![hand(1, IN_REGION)],
        40..=44 => vec![hand(1, OUT_OF_REGION)],
        _ => vec![hand(1, OUT_OF_REGION), food()],
    });

    assert!(verdicts.is_empty());
    assert!(m.track(1).unwrap().touched_utensil_while_in_region());
}

#[test]
fn scenario_c_purged_lifecycle_is_not_linked_to_new_tracks() {
    let mut m = machine(90);
    run(&mut m, 10..=40, |n| match n {
        10..=39 => vec![hand(1, IN_REGION)],
        _ => vec![hand(1, OUT_OF_REGION)],
    });
    assert_eq!(m.track(1).unwrap().phase(), TrackPhase::LeftRegionPending);

    let report = m.process_frame_report(&[], 131);
    assert_eq!(report.stats.purged_tracks, vec![1]);
    assert!(m.track(1).is_none());

    // Detector reassigned the hand a new id.
    assert!(m.process_frame(&[hand(2, OUT_OF_REGION), food()], 132).is_none());
    // The old id reappearing starts a fresh lifecycle too.
    assert!(m.process_frame(&[hand(1, OUT_OF_REGION), food()], 133).is_none());
    assert_eq!(m.track(1).unwrap().phase(), TrackPhase::Idle);
    assert_eq!(m.violation_count(), 0);
}

#[test]
fn scenario_d_boundary_jitter_keeps_contact_flag() {
    let mut m = machine(90);
    let verdicts = run(&mut m, 10..=70, |n| match n {
        20 => vec![hand(1, IN_REGION), scooper()],
        10..=29 => vec![hand(1, IN_REGION)],
        30..=34 => vec![hand(1, OUT_OF_REGION)],
        35..=49 => vec![hand(1, IN_REGION)],
        50..=59 => vec![hand(1, OUT_OF_REGION)],
        _ => vec![hand(1, OUT_OF_REGION), food()],
    });
    assert!(verdicts.is_empty());

    let state = m.track(1).unwrap();
    assert!(state.touched_utensil_while_in_region());
    assert_eq!(state.entered_region_frame(), Some(10));
}

#[test]
fn scenario_d_jitter_without_utensil_still_violates_once() {
    let mut m = machine(90);
    let verdicts = run(&mut m, 10..=55, |n| match n {
        10..=29 => vec![hand(1, IN_REGION)],
        30..=34 => vec![hand(1, OUT_OF_REGION)],
        35..=49 => vec![hand(1, IN_REGION)],
        _ => vec![hand(1, OUT_OF_REGION), food()],
    });
    assert_eq!(verdicts.len(), 1);
    assert_eq!(verdicts[0].frame_number, 50);
    assert_eq!(verdicts[0].entered_region_frame, Some(10));
    assert_eq!(verdicts[0].left_region_frame, Some(50));
}

#[test]
fn debounce_requires_a_new_region_visit() {
    let mut m = machine(90);
    let verdicts = run(&mut m, 0..=60, |n| match n {
        0..=9 => vec![hand(1, IN_REGION)],
        10..=29 => vec![hand(1, OUT_OF_REGION), food()],
        30..=39 => vec![hand(1, IN_REGION)],
        _ => vec![hand(1, OUT_OF_REGION), food()],
    });
    let frames: Vec<u64> = verdicts.iter().map(|v| v.frame_number).collect();
    assert_eq!(frames, vec![10, 40]);
}

#[test]
fn no_verdict_while_in_region() {
    let mut m = machine(90);
    let food_in_region = Detection::new(ObjectClass::Food, 0.9, IN_REGION);
    for n in 0..50 {
        assert!(m
            .process_frame(&[hand(1, IN_REGION), food_in_region.clone()], n)
            .is_none());
        assert_eq!(m.track(1).unwrap().phase(), TrackPhase::InRegion);
    }
}

#[test]
fn timeout_boundary_frame_is_still_eligible() {
    let window = 10;
    let mut m = machine(window);
    run(&mut m, 0..=5, |n| match n {
        0..=4 => vec![hand(1, IN_REGION)],
        _ => vec![hand(1, OUT_OF_REGION)],
    });
    // Left at frame 5; frames 6..=14 are outside without food.
    run(&mut m, 6..=14, |_| vec![hand(1, OUT_OF_REGION)]);
    assert_eq!(m.track(1).unwrap().frames_since_left(), 9);

    let verdict = m
        .process_frame(&[hand(1, OUT_OF_REGION), food()], 15)
        .expect("boundary frame must still violate");
    assert_eq!(verdict.frames_since_left, window);
}

#[test]
fn timeout_after_window_plus_one_frames_resets_silently() {
    let window = 10;
    let mut m = machine(window);
    run(&mut m, 0..=5, |n| match n {
        0..=4 => vec![hand(1, IN_REGION)],
        _ => vec![hand(1, OUT_OF_REGION)],
    });
    let verdicts = run(&mut m, 6..=16, |n| match n {
        16 => vec![hand(1, OUT_OF_REGION), food()],
        _ => vec![hand(1, OUT_OF_REGION)],
    });
    assert!(verdicts.is_empty());
    assert_eq!(m.track(1).unwrap().phase(), TrackPhase::Idle);
}

#[test]
fn dropouts_do_not_advance_the_window() {
    let mut m = machine(10);
    run(&mut m, 0..=5, |n| match n {
        0..=4 => vec![hand(1, IN_REGION)],
        _ => vec![hand(1, OUT_OF_REGION)],
    });
    // Hand unseen for frames 6..=14.
    run(&mut m, 6..=14, |_| Vec::new());
    assert_eq!(m.track(1).unwrap().frames_since_left(), 0);
    assert!(m.process_frame(&[hand(1, OUT_OF_REGION), food()], 15).is_some());
}

#[test]
fn simultaneous_violations_are_deferred_one_per_frame() {
    let mut m = machine(90);
    let food_b = Detection::new(ObjectClass::Food, 0.8, BoundingBox::new(650, 500, 700, 560));
    let out_b = BoundingBox::new(600, 500, 640, 540);
    m.process_frame(&[hand(1, IN_REGION), hand(2, IN_REGION)], 0);
    m.process_frame(&[hand(1, OUT_OF_REGION), hand(2, out_b)], 1);

    let both = [hand(1, OUT_OF_REGION), hand(2, out_b), food(), food_b];
    let report = m.process_frame_report(&both, 2);
    assert_eq!(report.verdicts.len(), 1);
    assert_eq!(report.stats.deferred_tracks.len(), 1);
    let deferred = report.stats.deferred_tracks[0];

    let next = m.process_frame(&both, 3).expect("deferred verdict");
    assert_eq!(next.track_id, deferred);
    assert_eq!(m.violation_count(), 2);
}

#[test]
fn queued_violation_is_reported_after_the_hand_moves_away() {
    let mut m = machine(90);
    let food_b = Detection::new(ObjectClass::Food, 0.8, BoundingBox::new(650, 500, 700, 560));
    let out_b = BoundingBox::new(600, 500, 640, 540);
    let far = BoundingBox::new(900, 900, 940, 940);
    m.process_frame(&[hand(1, IN_REGION), hand(2, IN_REGION)], 0);
    m.process_frame(&[hand(1, OUT_OF_REGION), hand(2, out_b)], 1);

    let mut verdicts = Vec::new();
    verdicts.extend(m.process_frame(&[hand(1, OUT_OF_REGION), hand(2, out_b), food(), food_b], 2));
    for n in 3..200 {
        verdicts.extend(m.process_frame(&[hand(2, far)], n));
    }

    let mut ids: Vec<u32> = verdicts.iter().map(|v| v.track_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);
    assert!(verdicts.iter().all(|v| v.frame_number == 2));
    assert_eq!(m.violation_count(), 2);
}

#[test]
fn process_frame_all_returns_every_violation() {
    let mut m = machine(90);
    let out_b = BoundingBox::new(600, 500, 640, 540);
    let food_b = Detection::new(ObjectClass::Food, 0.8, BoundingBox::new(650, 500, 700, 560));
    m.process_frame_all(&[hand(1, IN_REGION), hand(2, IN_REGION)], 0);
    m.process_frame_all(&[hand(1, OUT_OF_REGION), hand(2, out_b)], 1);
    let verdicts =
        m.process_frame_all(&[hand(1, OUT_OF_REGION), hand(2, out_b), food(), food_b], 2);
    let mut ids: Vec<u32> = verdicts.iter().map(|v| v.track_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn overlap_is_symmetric_and_margin_zero_is_plain_intersection() {
    let boxes = [
        BoundingBox::new(0, 0, 10, 10),
        BoundingBox::new(10, 10, 20, 20),
        BoundingBox::new(11, 0, 20, 5),
        BoundingBox::new(-30, -30, -5, -5),
        BoundingBox::new(3, 3, 4, 4),
    ];
    for a in &boxes {
        for b in &boxes {
            for margin in [0, 1, 7, 40] {
                assert_eq!(
                    boxes_overlap(a, b, margin),
                    boxes_overlap(b, a, margin),
                    "{a:?} {b:?} margin {margin}"
                );
            }
            let plain = a.x1 <= b.x2 && b.x1 <= a.x2 && a.y1 <= b.y2 && b.y1 <= a.y2;
            assert_eq!(boxes_overlap(a, b, 0), plain);
        }
    }
}
