use std::thread;

use tempfile::tempdir;

use hygiene_kernel::storage::VideoStatus;
use hygiene_kernel::{
    parse_frame_message, InMemoryVerdictStore, LabelMap, Region, SharedRegion,
    SqliteVerdictStore, TrackingSettings, VideoSession,
};

fn settings() -> TrackingSettings {
    TrackingSettings {
        proximity_margin_pixels: 20,
        frames_to_track_after_leaving: 90,
    }
}

/// Wire-format frames for one scenario-A style violation.
fn frame_json(video_id: &str, n: u64) -> String {
    let hand = if n < 40 {
        "[200, 200, 240, 240]"
    } else {
        "[600, 200, 640, 240]"
    };
    let food = if n >= 45 {
        r#", { "class_name": "pizza", "confidence": 0.8, "bbox": [650, 210, 700, 260] }"#
    } else {
        ""
    };
    format!(
        r#"{{ "video_id": "{video_id}", "frame_number": {n}, "timestamp": {ts}, "total_frames": 60,
             "detections": [ {{ "class_name": "hand", "confidence": 0.9, "bbox": {hand}, "track_id": 1 }}{food} ] }}"#,
        ts = n as f64 / 30.0
    )
}

#[test]
fn sqlite_backed_session_persists_violation() {
    let dir = tempdir().expect("temp dir");
    let db_path = dir.path().join("violations.db");
    let db_path = db_path.to_str().expect("utf8 path");

    let labels = LabelMap::default();
    let store = SqliteVerdictStore::open(db_path).unwrap();
    let mut session =
        VideoSession::new(SharedRegion::default(), settings(), 30, store).unwrap();

    for n in 10..=50 {
        let msg = parse_frame_message(frame_json("cam-1", n).as_bytes(), &labels, 0.5).unwrap();
        session.handle_frame(&msg).unwrap();
    }
    let summary = session.finish().unwrap().expect("video summary");
    assert_eq!(summary.total_violations, 1);
    assert_eq!(summary.frames_processed, 41);
    drop(session);

    let reopened = SqliteVerdictStore::open(db_path).unwrap();
    let video = reopened.video("cam-1").unwrap().expect("video row");
    assert_eq!(video.status, VideoStatus::Completed);
    assert_eq!(video.total_violations, 1);
    assert_eq!(video.processed_frames, 41);
    assert_eq!(video.info.total_frames, Some(60));

    let violations = reopened.violations_for_video("cam-1").unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].frame_number, 45);
    assert!((violations[0].timestamp - 1.5).abs() < 1e-9);
}

#[test]
fn concurrent_sessions_share_only_the_region() {
    let region = SharedRegion::new(Region::default());
    let labels = LabelMap::default();

    let handles: Vec<_> = ["cam-a", "cam-b", "cam-c"]
        .into_iter()
        .map(|video_id| {
            let region = region.clone();
            let labels = labels.clone();
            thread::spawn(move || {
                let mut session = VideoSession::new(
                    region,
                    settings(),
                    10,
                    InMemoryVerdictStore::new(),
                )
                .unwrap();
                for n in 10..=50 {
                    let msg =
                        parse_frame_message(frame_json(video_id, n).as_bytes(), &labels, 0.5)
                            .unwrap();
                    session.handle_frame(&msg).unwrap();
                }
                session.finish().unwrap();
                session.into_sink()
            })
        })
        .collect();

    for (handle, video_id) in handles.into_iter().zip(["cam-a", "cam-b", "cam-c"]) {
        let store = handle.join().expect("session thread");
        let violations = store.violations_for_video(video_id);
        assert_eq!(violations.len(), 1, "{video_id}");
        assert_eq!(violations[0].track_id, 1);
        assert_eq!(
            store.video(video_id).unwrap().status,
            VideoStatus::Completed
        );
    }
}

#[test]
fn region_swap_mid_session_is_seen_by_every_session() {
    let region = SharedRegion::new(Region::default());
    let labels = LabelMap::default();
    let mut a = VideoSession::new(region.clone(), settings(), 30, InMemoryVerdictStore::new())
        .unwrap();
    let mut b = VideoSession::new(region.clone(), settings(), 30, InMemoryVerdictStore::new())
        .unwrap();

    // Move the region under the "outside" hand position; the old inside
    // position is now outside.
    region.replace(Region::new(500, 150, 800, 400).unwrap()).unwrap();

    for session in [&mut a, &mut b] {
        for n in 0..=5 {
            // Hand starts at the new region, then steps to the old one.
            let hand = if n < 3 {
                "[600, 200, 640, 240]"
            } else {
                "[200, 200, 240, 240]"
            };
            let json = format!(
                r#"{{ "video_id": "v", "frame_number": {n}, "detections": [
                    {{ "class_name": "hand", "confidence": 0.9, "bbox": {hand}, "track_id": 4 }},
                    {{ "class_name": "food", "confidence": 0.9, "bbox": [210, 250, 230, 270] }} ] }}"#
            );
            let msg = parse_frame_message(json.as_bytes(), &labels, 0.5).unwrap();
            session.handle_frame(&msg).unwrap();
        }
        assert_eq!(session.machine().violation_count(), 1);
    }
}
