#![allow(missing_docs)]

mod support;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;

use sombra_consistency::config::CheckConfig;
use sombra_consistency::consistency::{IncompleteCause, UNRECOVERED_GUIDANCE};
use sombra_consistency::logging::NullLog;
use sombra_consistency::primitives::wal::LogWriter;
use sombra_consistency::types::TxId;
use support::{options, report_files, service, social_graph, LAST_TX};

#[test]
fn unapplied_transactions_stop_the_check_before_any_report() {
    let fixture = social_graph();
    let mut log = LogWriter::open_append(&fixture.layout.wal()).expect("open log");
    log.append(TxId(LAST_TX.0 + 1), b"pending").expect("append");
    log.sync().expect("sync");

    let err = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)),
        )
        .err()
        .expect("unrecovered store is refused");

    assert!(err.is_unrecovered());
    assert!(matches!(
        err.cause(),
        IncompleteCause::Unrecovered { unapplied: 1, .. }
    ));
    let message = err.to_string();
    for line in UNRECOVERED_GUIDANCE {
        assert!(message.contains(line), "{message}");
    }
    assert!(report_files(&fixture.report_dir).is_empty());
}

#[test]
fn applied_log_frames_are_fine() {
    let fixture = social_graph();
    let mut log = LogWriter::create(&fixture.layout.wal(), TxId(1)).expect("create log");
    for tx in 1..=LAST_TX.0 {
        log.append(TxId(tx), b"applied").expect("append");
    }
    log.sync().expect("sync");

    let result = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)),
        )
        .expect("check completes");
    assert!(result.is_successful());
}

#[test]
fn torn_log_tail_is_not_a_pending_transaction() {
    let fixture = social_graph();
    let mut log = LogWriter::open_append(&fixture.layout.wal()).expect("open log");
    log.append(LAST_TX, b"applied").expect("append");
    log.sync().expect("sync");
    drop(log);
    let mut file = OpenOptions::new()
        .append(true)
        .open(fixture.layout.wal())
        .expect("open log file");
    file.write_all(&[0xAB; 7]).expect("write torn tail");

    let result = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)),
        )
        .expect("check completes");
    assert!(result.is_successful());
}

#[test]
fn missing_meta_store_is_incomplete() {
    let fixture = social_graph();
    fs::remove_file(fixture.layout.meta_store()).expect("remove meta store");
    let err = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)),
        )
        .err()
        .expect("check cannot run");
    assert!(!err.is_unrecovered());
    assert!(matches!(err.cause(), IncompleteCause::Store(_)));
    assert!(report_files(&fixture.report_dir).is_empty());
}

#[test]
fn invalid_config_is_incomplete() {
    let fixture = social_graph();
    let config = CheckConfig {
        memory_limit_leeway_factor: 1.0,
        ..CheckConfig::default()
    };
    let err = service()
        .run_full_consistency_check(&fixture.layout, &config, options(&fixture, Arc::new(NullLog)))
        .err()
        .expect("config rejected");
    assert!(matches!(err.cause(), IncompleteCause::Config(_)));
}
