//! Historical replay over CSV fixtures written to a temp dir.

use marketguard::config::EngineConfig;
use marketguard::data::file_sha256;
use marketguard::engine::SystemState;
use marketguard::replay::{run_historical, ReplayOptions};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const TRADES: &str = "\
timestamp,local_timestamp,id,price
1000,1000,1,100.0
2000,2000,2,100.5
bad,row,x,y
3000,3000,2,100.0
4000,4000,3,-1.0
5000,5000,4,100.0
";

const ORDERBOOK: &str = "\
timestamp,local_timestamp,side,price
1000,1000,bid,99.0
1000,1000,ask,101.0
";

fn jsonl(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn fixture() -> (TempDir, TempDir) {
    let data = TempDir::new().unwrap();
    fs::write(data.path().join("trades.csv"), TRADES).unwrap();
    fs::write(data.path().join("orderbook.csv"), ORDERBOOK).unwrap();
    (data, TempDir::new().unwrap())
}

#[test]
fn replay_writes_decisions_transitions_and_summary() {
    let (data, out) = fixture();
    let opts = ReplayOptions::new(data.path().to_path_buf(), out.path().to_path_buf());
    let summary = run_historical(&EngineConfig::default(), &opts).unwrap();

    assert_eq!(summary.run.total_events, 7);
    assert_eq!(summary.run.blocked_events, 6);
    assert_eq!(summary.run.final_state, SystemState::Normal);

    let decisions = jsonl(&out.path().join("decisions.jsonl"));
    let reasons: Vec<&str> = decisions.iter().map(|d| d["reason"].as_str().unwrap()).collect();
    assert_eq!(
        reasons,
        vec!["", "", "", "", "QUARANTINE: DUPLICATE", "QUARANTINE: FAT_FINGER"]
    );
    assert!(decisions.iter().all(|d| d["action"] == "HALT"));
    let durations: Vec<i64> = decisions.iter().map(|d| d["duration_ms"].as_i64().unwrap()).collect();
    assert_eq!(durations, vec![0, 0, 0, 1, 2, 3]);
    assert!(decisions[0].get("state").is_none());

    let transitions = jsonl(&out.path().join("state_transitions.jsonl"));
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[0]["data_trust"], "UNTRUSTED");
    assert_eq!(transitions[0]["hypothesis"], "INVALID");
    assert_eq!(transitions[0]["trigger"], "QUARANTINE: DUPLICATE");
    assert_eq!(transitions[1]["ts"], 5000);
    assert_eq!(transitions[1]["decision"], "ALLOWED");
    assert_eq!(transitions[1]["trigger"], "RECOVERED");
}

#[test]
fn summary_records_source_provenance() {
    let (data, out) = fixture();
    let opts = ReplayOptions::new(data.path().to_path_buf(), out.path().to_path_buf());
    run_historical(&EngineConfig::default(), &opts).unwrap();

    let body = fs::read_to_string(out.path().join("summary.json")).unwrap();
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["total_events"], 7);
    assert_eq!(v["final_state"], "NORMAL");

    let sources = v["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0]["name"], "trade");
    assert_eq!(sources[0]["rows"], 5);
    assert_eq!(sources[0]["bad_rows"], 1);
    assert_eq!(sources[1]["name"], "orderbook");
    assert_eq!(sources[1]["rows"], 2);

    let expected = file_sha256(&data.path().join("trades.csv")).unwrap();
    assert_eq!(sources[0]["hash_sha256"], Value::String(expected.clone()));
    assert_eq!(expected.len(), 64);
}

#[test]
fn replay_truncates_previous_output() {
    let (data, out) = fixture();
    let opts = ReplayOptions::new(data.path().to_path_buf(), out.path().to_path_buf());
    run_historical(&EngineConfig::default(), &opts).unwrap();
    run_historical(&EngineConfig::default(), &opts).unwrap();
    assert_eq!(jsonl(&out.path().join("decisions.jsonl")).len(), 6);
    assert_eq!(jsonl(&out.path().join("state_transitions.jsonl")).len(), 2);
}

#[test]
fn small_chunks_give_identical_decisions() {
    let (data, out_big) = fixture();
    let out_small = TempDir::new().unwrap();

    let big = ReplayOptions::new(data.path().to_path_buf(), out_big.path().to_path_buf());
    let small = ReplayOptions {
        chunk_size: 1,
        ..ReplayOptions::new(data.path().to_path_buf(), out_small.path().to_path_buf())
    };
    run_historical(&EngineConfig::default(), &big).unwrap();
    run_historical(&EngineConfig::default(), &small).unwrap();

    let a = fs::read_to_string(out_big.path().join("decisions.jsonl")).unwrap();
    let b = fs::read_to_string(out_small.path().join("decisions.jsonl")).unwrap();
    assert_eq!(a, b);
}
