//! Historical sources: chunked CSV readers and their manifests.

pub mod mux;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::events::{field_f64, scalar_from_text, EventType, MarketEvent, Payload};
use crate::logging::{log, obj, v_str, Domain, Level};

pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

/// One row lifted out of a source, ready to become a [`MarketEvent`].
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub event_time: i64,
    pub local_time: i64,
    pub payload: Payload,
}

impl SourceRecord {
    pub fn into_event(self, kind: EventType) -> MarketEvent {
        MarketEvent::new(self.event_time, self.local_time, kind, self.payload)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub rows: u64,
    pub bad_rows: u64,
}

/// A source that yields records in bounded batches.
pub trait ChunkSource {
    fn name(&self) -> &str;

    fn kind(&self) -> EventType;

    /// Next batch of records, or `None` once the source is exhausted.
    fn next_chunk(&mut self) -> Option<Vec<SourceRecord>>;

    fn stats(&self) -> SourceStats {
        SourceStats::default()
    }
}

/// Chunked reader over a headered CSV file.
///
/// Headers are trimmed and lower-cased. The timestamp column is the first one
/// whose name contains `time` or `ts`; `local_timestamp`, when present,
/// supplies the receipt time.
pub struct CsvChunkSource<R: Read> {
    name: String,
    kind: EventType,
    reader: csv::Reader<R>,
    headers: Vec<String>,
    ts_idx: Option<usize>,
    local_idx: Option<usize>,
    chunk_size: usize,
    exhausted: bool,
    stats: SourceStats,
}

impl CsvChunkSource<File> {
    pub fn open(name: &str, kind: EventType, path: &Path, chunk_size: usize) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open source {}", path.display()))?;
        Self::from_reader(name, kind, file, chunk_size)
    }
}

impl<R: Read> CsvChunkSource<R> {
    pub fn from_reader(name: &str, kind: EventType, rdr: R, chunk_size: usize) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(rdr);
        let headers: Vec<String> = reader
            .headers()
            .with_context(|| format!("read header of source {}", name))?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let ts_idx = headers.iter().position(|h| h.contains("time") || h.contains("ts"));
        let local_idx = headers.iter().position(|h| h == "local_timestamp");

        let mut source = Self {
            name: name.to_string(),
            kind,
            reader,
            headers,
            ts_idx,
            local_idx,
            chunk_size: chunk_size.max(1),
            exhausted: false,
            stats: SourceStats::default(),
        };

        if source.ts_idx.is_none() {
            log(
                Level::Warn,
                Domain::Market,
                "source_no_timestamp_column",
                obj(&[("source", v_str(name)), ("columns", v_str(&source.headers.join(",")))]),
            );
            source.exhausted = true;
        }
        Ok(source)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn parse_row(&self, row: &csv::StringRecord) -> Option<SourceRecord> {
        let ts_idx = self.ts_idx?;
        let event_time = parse_timestamp(row.get(ts_idx)?)?;

        let mut payload = Payload::new();
        for (i, key) in self.headers.iter().enumerate() {
            let value = row.get(i).map(scalar_from_text).unwrap_or(serde_json::Value::Null);
            payload.insert(key.clone(), value);
        }

        let local_time = self
            .local_idx
            .and_then(|i| row.get(i))
            .and_then(parse_timestamp)
            .unwrap_or(event_time);

        Some(SourceRecord {
            event_time,
            local_time,
            payload,
        })
    }
}

impl<R: Read> ChunkSource for CsvChunkSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EventType {
        self.kind
    }

    fn next_chunk(&mut self) -> Option<Vec<SourceRecord>> {
        if self.exhausted {
            return None;
        }

        let mut chunk = Vec::with_capacity(self.chunk_size.min(4096));
        let mut row = csv::StringRecord::new();
        while chunk.len() < self.chunk_size {
            match self.reader.read_record(&mut row) {
                Ok(true) => match self.parse_row(&row) {
                    Some(rec) => {
                        self.stats.rows += 1;
                        chunk.push(rec);
                    }
                    None => {
                        self.stats.bad_rows += 1;
                        log(
                            Level::Warn,
                            Domain::Market,
                            "bad_row",
                            obj(&[
                                ("source", v_str(&self.name)),
                                ("line", serde_json::json!(row.position().map(|p| p.line()))),
                            ]),
                        );
                    }
                },
                Ok(false) => {
                    self.exhausted = true;
                    break;
                }
                Err(err) if matches!(err.kind(), csv::ErrorKind::Io(_)) => {
                    log(
                        Level::Warn,
                        Domain::Market,
                        "source_read_error",
                        obj(&[("source", v_str(&self.name)), ("error", v_str(&err.to_string()))]),
                    );
                    self.exhausted = true;
                    break;
                }
                // Malformed record (bad UTF-8 etc.): the reader has moved past it.
                Err(err) => {
                    self.stats.bad_rows += 1;
                    log(
                        Level::Warn,
                        Domain::Market,
                        "bad_row",
                        obj(&[
                            ("source", v_str(&self.name)),
                            ("line", serde_json::json!(err.position().map(|p| p.line()))),
                            ("error", v_str(&err.to_string())),
                        ]),
                    );
                }
            }
        }

        if chunk.is_empty() {
            None
        } else {
            Some(chunk)
        }
    }

    fn stats(&self) -> SourceStats {
        self.stats
    }
}

/// Integer timestamp from a text cell; float cells are truncated.
fn parse_timestamp(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Some(v);
    }
    let f = field_f64(&serde_json::Value::String(trimmed.to_string()))?;
    if f.is_finite() {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

/// Pre-built records served in fixed-size chunks.
pub struct MemorySource {
    name: String,
    kind: EventType,
    records: VecDeque<SourceRecord>,
    chunk_size: usize,
    stats: SourceStats,
}

impl MemorySource {
    pub fn new(name: &str, kind: EventType, records: Vec<SourceRecord>, chunk_size: usize) -> Self {
        Self {
            name: name.to_string(),
            kind,
            records: records.into(),
            chunk_size: chunk_size.max(1),
            stats: SourceStats::default(),
        }
    }
}

impl ChunkSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EventType {
        self.kind
    }

    fn next_chunk(&mut self) -> Option<Vec<SourceRecord>> {
        if self.records.is_empty() {
            return None;
        }
        let n = self.chunk_size.min(self.records.len());
        let chunk: Vec<SourceRecord> = self.records.drain(..n).collect();
        self.stats.rows += chunk.len() as u64;
        Some(chunk)
    }

    fn stats(&self) -> SourceStats {
        self.stats
    }
}

/// Provenance of one replayed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceManifest {
    pub name: String,
    pub path: String,
    pub hash_sha256: String,
    pub rows: u64,
    pub bad_rows: u64,
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// The four historical feeds, in registration order.
pub fn default_sources(data_dir: &Path) -> Vec<(&'static str, EventType, PathBuf)> {
    vec![
        ("trade", EventType::Trade, data_dir.join("trades.csv")),
        ("orderbook", EventType::Orderbook, data_dir.join("orderbook.csv")),
        ("ticker", EventType::Ticker, data_dir.join("ticker.csv")),
        ("liquidation", EventType::Liquidation, data_dir.join("liquidations.csv")),
    ]
}
