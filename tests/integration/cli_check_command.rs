#![allow(missing_docs)]

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use sombra_consistency::primitives::wal::LogWriter;
use sombra_consistency::storage::{DatabaseLayout, NODE_RECORD_LEN};
use sombra_consistency::types::TxId;
use tempfile::TempDir;

fn seeded() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let db = dir.path().join("demo.db");
    cargo_bin_cmd!("sombra-check")
        .arg("seed-demo")
        .arg(&db)
        .assert()
        .success();
    (dir, db)
}

fn json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("json output")
}

#[test]
fn seeded_demo_checks_clean() {
    let (dir, db) = seeded();
    let reports = dir.path().join("reports");
    cargo_bin_cmd!("sombra-check")
        .args(["--theme", "plain", "check"])
        .arg(&db)
        .arg("--report-dir")
        .arg(&reports)
        .assert()
        .success();
    assert!(!reports.exists());
}

#[test]
fn json_output_reports_the_outcome() {
    let (_dir, db) = seeded();
    let output = cargo_bin_cmd!("sombra-check")
        .args(["--format", "json", "check"])
        .arg(&db)
        .output()
        .expect("run check");
    assert!(output.status.success());
    let value = json(&output.stdout);
    assert_eq!(value["outcome"], "consistent");
    assert_eq!(value["result"]["summary"]["total_errors"], 0);
}

#[test]
fn corrupted_store_exits_with_two() {
    let (dir, db) = seeded();
    let nodes = DatabaseLayout::new(&db).nodes_store();
    let mut bytes = fs::read(&nodes).expect("read nodes");
    bytes[NODE_RECORD_LEN + 20] ^= 0x5A;
    fs::write(&nodes, bytes).expect("write nodes");

    let reports = dir.path().join("reports");
    let output = cargo_bin_cmd!("sombra-check")
        .args(["--format", "json", "check"])
        .arg(&db)
        .arg("--report-dir")
        .arg(&reports)
        .output()
        .expect("run check");
    assert_eq!(output.status.code(), Some(2));
    let value = json(&output.stdout);
    assert_eq!(value["outcome"], "inconsistent");
    let report = value["result"]["report_path"].as_str().expect("report path");
    assert!(fs::read_to_string(report)
        .expect("report file")
        .contains("Node: "));
}

#[test]
fn unrecovered_store_exits_with_one() {
    let (_dir, db) = seeded();
    let layout = DatabaseLayout::new(&db);
    let mut log = LogWriter::open_append(&layout.wal()).expect("open log");
    log.append(TxId(u64::MAX - 1), b"pending").expect("append");
    log.sync().expect("sync");

    let output = cargo_bin_cmd!("sombra-check")
        .args(["--format", "json", "check"])
        .arg(&db)
        .output()
        .expect("run check");
    assert_eq!(output.status.code(), Some(1));
    let value = json(&output.stdout);
    assert_eq!(value["outcome"], "incomplete");
    assert_eq!(value["unrecovered"], true);
}

#[test]
fn missing_database_exits_with_one() {
    let dir = TempDir::new().expect("tempdir");
    cargo_bin_cmd!("sombra-check")
        .arg("check")
        .arg(dir.path().join("absent"))
        .assert()
        .code(1);
}

#[test]
fn seed_demo_refuses_to_overwrite() {
    let (_dir, db) = seeded();
    cargo_bin_cmd!("sombra-check")
        .arg("seed-demo")
        .arg(&db)
        .assert()
        .failure();
    cargo_bin_cmd!("sombra-check")
        .args(["seed-demo", "--force"])
        .arg(&db)
        .assert()
        .success();
}
