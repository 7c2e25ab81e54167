//! Temporal multiplexer: k-way merge of chunked sources into one
//! time-ordered event stream.
//!
//! Records are admitted into a min-heap keyed by `(event_time, seq, source)`;
//! `seq` is assigned at admission so equal timestamps pop in admission order.
//! After each pop, if the heap is below the total low-water mark, every live
//! source with fewer than the per-source low-water mark pending pulls its
//! next chunk.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::{ChunkSource, SourceStats};
use crate::events::MarketEvent;
use crate::logging::{log, obj, v_str, Domain, Level, ProfileScope};

pub const SOURCE_LOW_WATER: usize = 100;
pub const TOTAL_LOW_WATER: usize = 1_000;

struct Pending {
    ts: i64,
    seq: u64,
    source: usize,
    record: super::SourceRecord,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.ts == other.ts && self.seq == other.seq && self.source == other.source
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest first)
        other
            .ts
            .cmp(&self.ts)
            .then_with(|| other.seq.cmp(&self.seq))
            .then_with(|| other.source.cmp(&self.source))
    }
}

struct Lane {
    source: Box<dyn ChunkSource>,
    pending: usize,
    live: bool,
}

pub struct TemporalMux {
    lanes: Vec<Lane>,
    heap: BinaryHeap<Pending>,
    seq: u64,
    source_low_water: usize,
    total_low_water: usize,
}

impl TemporalMux {
    /// Register sources in order and admit each one's first chunk.
    pub fn new(sources: Vec<Box<dyn ChunkSource>>) -> Self {
        Self::with_watermarks(sources, SOURCE_LOW_WATER, TOTAL_LOW_WATER)
    }

    pub fn with_watermarks(
        sources: Vec<Box<dyn ChunkSource>>,
        source_low_water: usize,
        total_low_water: usize,
    ) -> Self {
        let mut mux = Self {
            lanes: sources
                .into_iter()
                .map(|source| Lane {
                    source,
                    pending: 0,
                    live: true,
                })
                .collect(),
            heap: BinaryHeap::new(),
            seq: 0,
            source_low_water,
            total_low_water,
        };
        for idx in 0..mux.lanes.len() {
            mux.refill(idx);
        }
        mux
    }

    fn refill(&mut self, idx: usize) {
        let lane = &mut self.lanes[idx];
        if !lane.live {
            return;
        }
        let _scope = ProfileScope::with_context("mux_refill", &[("source", v_str(lane.source.name()))]);
        match lane.source.next_chunk() {
            Some(chunk) => {
                lane.pending += chunk.len();
                for record in chunk {
                    self.heap.push(Pending {
                        ts: record.event_time,
                        seq: self.seq,
                        source: idx,
                        record,
                    });
                    self.seq += 1;
                }
            }
            None => {
                lane.live = false;
                log(
                    Level::Info,
                    Domain::Market,
                    "source_exhausted",
                    obj(&[("source", v_str(lane.source.name()))]),
                );
            }
        }
    }

    /// Records currently buffered across all sources.
    pub fn buffered(&self) -> usize {
        self.heap.len()
    }

    /// Name and counters for every registered source.
    pub fn source_stats(&self) -> Vec<(String, SourceStats)> {
        self.lanes
            .iter()
            .map(|l| (l.source.name().to_string(), l.source.stats()))
            .collect()
    }
}

impl Iterator for TemporalMux {
    type Item = MarketEvent;

    fn next(&mut self) -> Option<MarketEvent> {
        let top = self.heap.pop()?;
        self.lanes[top.source].pending -= 1;

        if self.heap.len() < self.total_low_water {
            for idx in 0..self.lanes.len() {
                if self.lanes[idx].pending < self.source_low_water {
                    self.refill(idx);
                }
            }
        }

        let kind = self.lanes[top.source].source.kind();
        Some(top.record.into_event(kind))
    }
}
