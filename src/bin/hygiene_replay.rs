//! hygiene_replay - Replay recorded detector output through the violation tracker.
//!
//! Reads one JSON frame message per line (the same format the bridge receives
//! over MQTT), prints each violation as a JSON line on stdout, and optionally
//! records videos and violations in SQLite.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

use hygiene_kernel::storage::VerdictSink;
use hygiene_kernel::transport::violation_payload;
use hygiene_kernel::{
    parse_frame_message, InMemoryVerdictStore, MonitorConfig, SharedRegion, SqliteVerdictStore,
    VideoSession, VideoSummary,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay a JSON-lines detection log")]
struct Args {
    /// JSON-lines file of frame messages. Use "-" for stdin.
    input: String,

    /// JSON or TOML config file. Environment variables override its values.
    #[arg(long, env = "HYGIENE_CONFIG")]
    config: Option<PathBuf>,

    /// Record results in this SQLite database instead of memory.
    #[arg(long)]
    db: Option<String>,

    /// Abort on the first unparseable line instead of skipping it.
    #[arg(long)]
    strict: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let cfg = MonitorConfig::load_from(args.config.as_deref())?;

    let reader: Box<dyn BufRead> = if args.input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(&args.input)
            .with_context(|| format!("failed to open replay input {}", args.input))?;
        Box::new(BufReader::new(file))
    };

    let region = SharedRegion::new(cfg.region);
    let summaries = match &args.db {
        Some(db_path) => {
            let store = SqliteVerdictStore::open(db_path)?;
            let session = VideoSession::from_config(&cfg, region, store)?;
            replay(session, reader, &cfg, args.strict)?
        }
        None => {
            let session = VideoSession::from_config(&cfg, region, InMemoryVerdictStore::new())?;
            replay(session, reader, &cfg, args.strict)?
        }
    };

    for summary in &summaries {
        eprintln!(
            "{}: {} frames, {} violations",
            summary.video_id, summary.frames_processed, summary.total_violations
        );
    }
    Ok(())
}

fn replay<S: VerdictSink>(
    mut session: VideoSession<S>,
    reader: Box<dyn BufRead>,
    cfg: &MonitorConfig,
    strict: bool,
) -> Result<Vec<VideoSummary>> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut summaries = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        let msg = match parse_frame_message(
            line.as_bytes(),
            &cfg.detection.labels,
            cfg.detection.min_confidence,
        ) {
            Ok(msg) => msg,
            Err(e) if strict => return Err(anyhow!("line {}: {:#}", line_no, e)),
            Err(e) => {
                log::warn!("line {}: skipping frame message: {:#}", line_no, e);
                continue;
            }
        };

        if session
            .current_video()
            .is_some_and(|current| current != msg.video_id)
        {
            summaries.extend(session.finish()?);
        }

        let report = session.handle_frame(&msg)?;
        for verdict in &report.verdicts {
            out.write_all(&violation_payload(verdict, &msg.video_id)?)?;
            out.write_all(b"\n")?;
        }
    }

    summaries.extend(session.finish()?);
    out.flush()?;
    Ok(summaries)
}
