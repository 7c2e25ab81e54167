//! Historical replay: merge the CSV feeds and run them through one session.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::EngineConfig;
use crate::data::mux::TemporalMux;
use crate::data::{default_sources, file_sha256, ChunkSource, CsvChunkSource, SourceManifest, DEFAULT_CHUNK_SIZE};
use crate::engine::logging::{write_summary, AuditLog, RunSummary, SUMMARY_FILE};
use crate::engine::session::Session;
use crate::logging::{log, log_session_summary, obj, v_str, Domain, Level};

pub const PROGRESS_EVERY: u64 = 50_000;

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub data_dir: PathBuf,
    /// Directory receiving the decision/transition logs and the summary.
    pub output_dir: PathBuf,
    pub chunk_size: usize,
}

impl ReplayOptions {
    pub fn new(data_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            data_dir,
            output_dir,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSummary {
    #[serde(flatten)]
    pub run: RunSummary,
    pub sources: Vec<SourceManifest>,
}

pub fn run_historical(cfg: &EngineConfig, opts: &ReplayOptions) -> Result<HistoricalSummary> {
    log(
        Level::Info,
        Domain::System,
        "historical_start",
        obj(&[
            ("data_dir", v_str(&opts.data_dir.display().to_string())),
            ("output_dir", v_str(&opts.output_dir.display().to_string())),
            ("shock_policy", v_str(cfg.shock_policy.as_str())),
        ]),
    );

    let mut sources: Vec<Box<dyn ChunkSource>> = Vec::new();
    let mut manifests = Vec::new();
    for (name, kind, path) in default_sources(&opts.data_dir) {
        if !path.exists() {
            log(
                Level::Info,
                Domain::Market,
                "source_missing",
                obj(&[("source", v_str(name)), ("path", v_str(&path.display().to_string()))]),
            );
            continue;
        }
        let opened = file_sha256(&path)
            .and_then(|hash| Ok((hash, CsvChunkSource::open(name, kind, &path, opts.chunk_size)?)));
        match opened {
            Ok((hash, source)) => {
                log(
                    Level::Info,
                    Domain::Market,
                    "source_open",
                    obj(&[("source", v_str(name)), ("sha256", v_str(&hash))]),
                );
                manifests.push(SourceManifest {
                    name: name.to_string(),
                    path: path.display().to_string(),
                    hash_sha256: hash,
                    rows: 0,
                    bad_rows: 0,
                });
                sources.push(Box::new(source));
            }
            Err(err) => log(
                Level::Warn,
                Domain::Market,
                "source_open_failed",
                obj(&[("source", v_str(name)), ("error", v_str(&format!("{:#}", err)))]),
            ),
        }
    }

    let audit = AuditLog::open(&opts.output_dir, false)?;
    let mut session = Session::new(cfg, audit).with_progress_every(PROGRESS_EVERY);
    let mut mux = TemporalMux::new(sources);

    let mut failure = None;
    for event in mux.by_ref() {
        if let Err(err) = session.handle(event) {
            failure = Some(err);
            break;
        }
    }

    for (manifest, (_, stats)) in manifests.iter_mut().zip(mux.source_stats()) {
        manifest.rows = stats.rows;
        manifest.bad_rows = stats.bad_rows;
    }

    session.flush()?;
    let summary = HistoricalSummary {
        run: session.summary(),
        sources: manifests,
    };
    write_summary(&opts.output_dir.join(SUMMARY_FILE), &summary)?;
    log_session_summary(
        "historical",
        summary.run.total_events,
        summary.run.blocked_events,
        summary.run.final_state.as_str(),
    );

    match failure {
        Some(err) => Err(err).context("historical replay aborted"),
        None => Ok(summary),
    }
}
