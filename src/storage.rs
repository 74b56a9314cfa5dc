//! Verdict persistence.
//!
//! The state machine hands verdicts to a `VerdictSink` and forgets them, so a
//! sink must only return `Ok` once the verdict is durably recorded.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::violation::ViolationVerdict;

/// Metadata for a video session as announced by its first frame.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct VideoInfo {
    pub video_id: String,
    pub filename: Option<String>,
    pub total_frames: Option<u64>,
    pub fps: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Processing,
    Completed,
}

impl VideoStatus {
    fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "processing" => Ok(VideoStatus::Processing),
            "completed" => Ok(VideoStatus::Completed),
            other => Err(anyhow!("corrupt videos table: unknown status {}", other)),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct VideoRecord {
    pub info: VideoInfo,
    pub status: VideoStatus,
    pub processed_frames: u64,
    pub total_violations: u64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct StoredViolation {
    pub video_id: String,
    pub frame_number: u64,
    pub timestamp: f64,
    pub track_id: u32,
    /// Full verdict as JSON (hand box, contributing detections, durations).
    pub details: serde_json::Value,
    pub description: String,
}

pub trait VerdictSink {
    fn begin_video(&mut self, video: &VideoInfo) -> Result<()>;

    fn record_violation(
        &mut self,
        video_id: &str,
        timestamp: f64,
        verdict: &ViolationVerdict,
    ) -> Result<()>;

    fn update_progress(&mut self, video_id: &str, frames_processed: u64) -> Result<()>;

    fn complete_video(&mut self, video_id: &str, total_violations: u64) -> Result<()>;
}

fn now_s() -> Result<i64> {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    i64::try_from(secs).map_err(|_| anyhow!("system clock exceeds i64 range"))
}

fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{} exceeds i64 range", what))
}

fn to_u64(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("corrupt record: negative {}", what))
}

pub struct SqliteVerdictStore {
    conn: Connection,
}

impl SqliteVerdictStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS videos (
              id TEXT PRIMARY KEY,
              filename TEXT,
              status TEXT NOT NULL,
              total_frames INTEGER,
              fps REAL,
              width INTEGER,
              height INTEGER,
              processed_frames INTEGER NOT NULL DEFAULT 0,
              total_violations INTEGER NOT NULL DEFAULT 0,
              started_at INTEGER NOT NULL,
              completed_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS violations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              video_id TEXT NOT NULL,
              frame_number INTEGER NOT NULL,
              timestamp REAL NOT NULL,
              track_id INTEGER NOT NULL,
              details_json TEXT NOT NULL,
              description TEXT NOT NULL,
              created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_violations_video ON violations(video_id);
            "#,
        )?;
        Ok(())
    }

    pub fn video(&self, video_id: &str) -> Result<Option<VideoRecord>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT filename, status, total_frames, fps, width, height,
                       processed_frames, total_violations
                FROM videos WHERE id = ?1
                "#,
                params![video_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, Option<u32>>(4)?,
                        row.get::<_, Option<u32>>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((filename, status, total_frames, fps, width, height, processed, violations)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(VideoRecord {
            info: VideoInfo {
                video_id: video_id.to_string(),
                filename,
                total_frames: total_frames
                    .map(|v| to_u64(v, "total_frames"))
                    .transpose()?,
                fps,
                width,
                height,
            },
            status: VideoStatus::parse(&status)?,
            processed_frames: to_u64(processed, "processed_frames")?,
            total_violations: to_u64(violations, "total_violations")?,
        }))
    }

    pub fn violations_for_video(&self, video_id: &str) -> Result<Vec<StoredViolation>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT frame_number, timestamp, track_id, details_json, description
            FROM violations WHERE video_id = ?1 ORDER BY id ASC
            "#,
        )?;
        let mut rows = stmt.query(params![video_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let frame_number: i64 = row.get(0)?;
            let details_json: String = row.get(3)?;
            out.push(StoredViolation {
                video_id: video_id.to_string(),
                frame_number: to_u64(frame_number, "frame_number")?,
                timestamp: row.get(1)?,
                track_id: row.get(2)?,
                details: serde_json::from_str(&details_json)?,
                description: row.get(4)?,
            });
        }
        Ok(out)
    }
}

impl VerdictSink for SqliteVerdictStore {
    fn begin_video(&mut self, video: &VideoInfo) -> Result<()> {
        let total_frames = video
            .total_frames
            .map(|v| to_i64(v, "total_frames"))
            .transpose()?;
        // A rerun of the same id replaces its earlier violations.
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM violations WHERE video_id = ?1",
            params![video.video_id],
        )?;
        tx.execute(
            r#"
            INSERT INTO videos(id, filename, status, total_frames, fps, width, height,
                               processed_frames, total_violations, started_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, ?8)
            ON CONFLICT(id) DO UPDATE SET
              filename = excluded.filename,
              status = excluded.status,
              total_frames = excluded.total_frames,
              fps = excluded.fps,
              width = excluded.width,
              height = excluded.height,
              processed_frames = 0,
              total_violations = 0,
              started_at = excluded.started_at,
              completed_at = NULL
            "#,
            params![
                video.video_id,
                video.filename,
                VideoStatus::Processing.as_str(),
                total_frames,
                video.fps,
                video.width,
                video.height,
                now_s()?
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn record_violation(
        &mut self,
        video_id: &str,
        timestamp: f64,
        verdict: &ViolationVerdict,
    ) -> Result<()> {
        let details_json = serde_json::to_string(verdict)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO violations(video_id, frame_number, timestamp, track_id,
                                   details_json, description, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                video_id,
                to_i64(verdict.frame_number, "frame_number")?,
                timestamp,
                verdict.track_id,
                details_json,
                verdict.description,
                now_s()?
            ],
        )?;
        tx.execute(
            "UPDATE videos SET total_violations = total_violations + 1 WHERE id = ?1",
            params![video_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn update_progress(&mut self, video_id: &str, frames_processed: u64) -> Result<()> {
        self.conn.execute(
            "UPDATE videos SET processed_frames = ?2 WHERE id = ?1",
            params![video_id, to_i64(frames_processed, "processed_frames")?],
        )?;
        Ok(())
    }

    fn complete_video(&mut self, video_id: &str, total_violations: u64) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE videos
            SET status = ?2, total_violations = ?3, completed_at = ?4
            WHERE id = ?1
            "#,
            params![
                video_id,
                VideoStatus::Completed.as_str(),
                to_i64(total_violations, "total_violations")?,
                now_s()?
            ],
        )?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryVerdictStore {
    videos: HashMap<String, VideoRecord>,
    violations: Vec<StoredViolation>,
}

impl InMemoryVerdictStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video(&self, video_id: &str) -> Option<&VideoRecord> {
        self.videos.get(video_id)
    }

    pub fn violations(&self) -> &[StoredViolation] {
        &self.violations
    }

    pub fn violations_for_video(&self, video_id: &str) -> Vec<StoredViolation> {
        self.violations
            .iter()
            .filter(|v| v.video_id == video_id)
            .cloned()
            .collect()
    }
}

impl VerdictSink for InMemoryVerdictStore {
    fn begin_video(&mut self, video: &VideoInfo) -> Result<()> {
        self.violations.retain(|v| v.video_id != video.video_id);
        self.videos.insert(
            video.video_id.clone(),
            VideoRecord {
                info: video.clone(),
                status: VideoStatus::Processing,
                processed_frames: 0,
                total_violations: 0,
            },
        );
        Ok(())
    }

    fn record_violation(
        &mut self,
        video_id: &str,
        timestamp: f64,
        verdict: &ViolationVerdict,
    ) -> Result<()> {
        self.violations.push(StoredViolation {
            video_id: video_id.to_string(),
            frame_number: verdict.frame_number,
            timestamp,
            track_id: verdict.track_id,
            details: serde_json::to_value(verdict)?,
            description: verdict.description.to_string(),
        });
        if let Some(video) = self.videos.get_mut(video_id) {
            video.total_violations += 1;
        }
        Ok(())
    }

    fn update_progress(&mut self, video_id: &str, frames_processed: u64) -> Result<()> {
        let video = self
            .videos
            .get_mut(video_id)
            .ok_or_else(|| anyhow!("unknown video {}", video_id))?;
        video.processed_frames = frames_processed;
        Ok(())
    }

    fn complete_video(&mut self, video_id: &str, total_violations: u64) -> Result<()> {
        let video = self
            .videos
            .get_mut(video_id)
            .ok_or_else(|| anyhow!("unknown video {}", video_id))?;
        video.status = VideoStatus::Completed;
        video.total_violations = total_violations;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, ObjectClass};
    use crate::geometry::BoundingBox;
    use crate::violation::VIOLATION_DESCRIPTION;

    fn verdict(track_id: u32, frame_number: u64) -> ViolationVerdict {
        ViolationVerdict {
            track_id,
            frame_number,
            bbox: BoundingBox::new(600, 200, 640, 240),
            contributing_detections: vec![Detection::new(
                ObjectClass::Food,
                0.8,
                BoundingBox::new(650, 210, 700, 260),
            )
            .with_label("pizza")],
            entered_region_frame: Some(10),
            left_region_frame: Some(40),
            frames_since_left: 5,
            description: VIOLATION_DESCRIPTION,
        }
    }

    fn video(video_id: &str) -> VideoInfo {
        VideoInfo {
            video_id: video_id.to_string(),
            filename: Some("shift.mp4".to_string()),
            total_frames: Some(900),
            fps: Some(30.0),
            width: Some(1280),
            height: Some(720),
        }
    }

    #[test]
    fn sqlite_store_round_trips_violations_and_progress() {
        let mut store = SqliteVerdictStore::open_in_memory().unwrap();
        store.begin_video(&video("v1")).unwrap();
        store.record_violation("v1", 1.5, &verdict(1, 45)).unwrap();
        store.update_progress("v1", 60).unwrap();

        let rec = store.video("v1").unwrap().expect("video row");
        assert_eq!(rec.status, VideoStatus::Processing);
        assert_eq!(rec.processed_frames, 60);
        assert_eq!(rec.total_violations, 1);
        assert_eq!(rec.info.total_frames, Some(900));

        let stored = store.violations_for_video("v1").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].frame_number, 45);
        assert_eq!(stored[0].track_id, 1);
        assert_eq!(stored[0].details["left_region_frame"], 40);
        assert_eq!(
            stored[0].details["contributing_detections"][0]["label"],
            "pizza"
        );

        store.complete_video("v1", 1).unwrap();
        let rec = store.video("v1").unwrap().expect("video row");
        assert_eq!(rec.status, VideoStatus::Completed);
    }

    #[test]
    fn sqlite_begin_video_restarts_counters() {
        let mut store = SqliteVerdictStore::open_in_memory().unwrap();
        store.begin_video(&video("v1")).unwrap();
        store.record_violation("v1", 0.0, &verdict(1, 5)).unwrap();
        store.complete_video("v1", 1).unwrap();

        store.begin_video(&video("v1")).unwrap();
        let rec = store.video("v1").unwrap().expect("video row");
        assert_eq!(rec.status, VideoStatus::Processing);
        assert_eq!(rec.total_violations, 0);
        assert!(store.violations_for_video("v1").unwrap().is_empty());
        assert!(store.video("missing").unwrap().is_none());
    }

    fn run_video<S: VerdictSink>(store: &mut S, video_id: &str, frames: &[u64]) {
        store.begin_video(&video(video_id)).unwrap();
        for &n in frames {
            store
                .record_violation(video_id, n as f64 / 30.0, &verdict(1, n))
                .unwrap();
        }
        store.complete_video(video_id, frames.len() as u64).unwrap();
    }

    #[test]
    fn sqlite_rerun_replaces_previous_violations() {
        let mut store = SqliteVerdictStore::open_in_memory().unwrap();
        run_video(&mut store, "v1", &[45, 90]);
        run_video(&mut store, "other", &[12]);
        run_video(&mut store, "v1", &[45]);

        let rec = store.video("v1").unwrap().expect("video row");
        let stored = store.violations_for_video("v1").unwrap();
        assert_eq!(rec.total_violations, 1);
        assert_eq!(stored.len() as u64, rec.total_violations);
        assert_eq!(stored[0].frame_number, 45);
        assert_eq!(store.violations_for_video("other").unwrap().len(), 1);
    }

    #[test]
    fn in_memory_rerun_replaces_previous_violations() {
        let mut store = InMemoryVerdictStore::new();
        run_video(&mut store, "v1", &[45, 90]);
        run_video(&mut store, "other", &[12]);
        run_video(&mut store, "v1", &[45]);

        let stored = store.violations_for_video("v1");
        assert_eq!(stored.len() as u64, store.video("v1").unwrap().total_violations);
        assert_eq!(stored.len(), 1);
        assert_eq!(store.violations_for_video("other").len(), 1);
    }

    #[test]
    fn in_memory_store_tracks_videos() {
        let mut store = InMemoryVerdictStore::new();
        store.begin_video(&video("a")).unwrap();
        store.begin_video(&video("b")).unwrap();
        store.record_violation("a", 0.5, &verdict(3, 15)).unwrap();

        assert_eq!(store.violations_for_video("a").len(), 1);
        assert!(store.violations_for_video("b").is_empty());
        assert_eq!(store.video("a").unwrap().total_violations, 1);
        assert!(store.update_progress("missing", 1).is_err());
    }
}
