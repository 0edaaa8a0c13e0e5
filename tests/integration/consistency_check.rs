#![allow(missing_docs)]

mod support;

use std::fs;
use std::sync::Arc;

use sombra_consistency::config::CheckConfig;
use sombra_consistency::consistency::{ConsistencyFlags, DebugContext, InconsistencyCategory};
use sombra_consistency::logging::NullLog;
use sombra_consistency::storage::{write_aux, INDEX_STATS_KIND, LABEL_INDEX_KIND};
use sombra_consistency::types::{EdgeId, TokenId};
use support::{options, rewrite_edge, rewrite_node, service, smash_node, social_graph, CaptureLog, LAST_TX};
use tracing::Level;

#[test]
fn clean_database_is_consistent_and_writes_no_report() {
    let fixture = social_graph();
    let result = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)),
        )
        .expect("check completes");

    assert!(result.is_successful(), "{}", result.summary());
    assert_eq!(result.summary().total_errors, 0);
    assert_eq!(result.summary().total_warnings, 0);
    assert_eq!(
        result.report_path(),
        fixture
            .report_dir
            .join("inconsistencies-2024-05-17.08.30.00.report")
    );
    assert!(!result.report_path().exists());
}

#[test]
fn verbose_output_reaches_the_debug_sink() {
    let fixture = social_graph();
    let lines = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&lines);
    let debug = DebugContext::with_sink(move |line| sink.lock().push(line.to_string()));
    service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)).debug(debug),
        )
        .expect("check completes");
    let lines = lines.lock();
    assert!(lines.iter().any(|line| line.starts_with("Checking nodes")));
    assert!(lines.iter().any(|line| line.contains("Consistency summary")));
}

#[test]
fn damaged_node_fails_the_check_and_names_the_report() {
    let fixture = social_graph();
    smash_node(&fixture.layout, 2);
    let log = CaptureLog::new();
    let result = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, log.clone()),
        )
        .expect("check completes");

    assert!(!result.is_successful());
    assert!(result.summary().errors(InconsistencyCategory::Node) >= 1);
    let report = fs::read_to_string(result.report_path()).expect("report written");
    assert!(report.contains("Node: "), "{report}");
    assert!(report.contains("checksum mismatch"), "{report}");
    let pointer = format!(
        "See '{}' for a detailed consistency report.",
        result.report_path().display()
    );
    assert!(log.contains(Level::WARN, &pointer));
    assert!(!report.contains("for a detailed consistency report"));
}

#[test]
fn unknown_label_is_a_node_error() {
    let fixture = social_graph();
    rewrite_node(&fixture.layout, 3, |node| node.label = TokenId(77));
    let result = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)),
        )
        .expect("check completes");

    assert_eq!(result.summary().errors(InconsistencyCategory::Node), 1);
    assert!(result.summary().errors(InconsistencyCategory::Counts) >= 1);
    assert!(result.summary().errors(InconsistencyCategory::LabelIndex) >= 1);
}

#[test]
fn missing_label_index_entry_is_the_only_finding() {
    let fixture = social_graph();
    let path = fixture.layout.label_index_store();
    let mut entries = support::aux_entries(&path, LABEL_INDEX_KIND);
    assert!(entries.remove(&1).is_some());
    write_aux(&path, LABEL_INDEX_KIND, LAST_TX, false, &entries).expect("rewrite label index");

    let result = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)),
        )
        .expect("check completes");

    assert!(!result.is_successful());
    assert_eq!(result.summary().errors(InconsistencyCategory::LabelIndex), 1);
    assert_eq!(result.summary().total_errors, 1);
}

#[test]
fn skipped_label_index_check_ignores_a_broken_label_index() {
    let fixture = social_graph();
    let path = fixture.layout.label_index_store();
    let mut entries = support::aux_entries(&path, LABEL_INDEX_KIND);
    entries.clear();
    write_aux(&path, LABEL_INDEX_KIND, LAST_TX, false, &entries).expect("rewrite label index");

    let flags = ConsistencyFlags {
        check_label_index: false,
        ..ConsistencyFlags::default()
    };
    let result = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)).flags(flags),
        )
        .expect("check completes");
    assert!(result.is_successful(), "{}", result.summary());
}

#[test]
fn stale_statistics_only_warn() {
    let fixture = social_graph();
    let mut samples = std::collections::BTreeMap::new();
    samples.insert(1, 999);
    write_aux(
        &fixture.layout.index_statistics_store(),
        INDEX_STATS_KIND,
        LAST_TX,
        false,
        &samples,
    )
    .expect("rewrite statistics");

    let result = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)),
        )
        .expect("check completes");
    assert!(result.is_successful());
    assert_eq!(
        result
            .summary()
            .warnings(InconsistencyCategory::IndexStatistics),
        1
    );
    let report = fs::read_to_string(result.report_path()).expect("warning reaches the report");
    assert!(report.contains("IndexStatistics: index 1 statistics sample is 999"));
}

#[test]
fn unused_edge_in_a_chain_is_an_adjacency_error() {
    let fixture = social_graph();
    rewrite_edge(&fixture.layout, 1, |edge| edge.in_use = false);
    let result = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)),
        )
        .expect("check completes");
    assert!(result.summary().errors(InconsistencyCategory::Adjacency) >= 1);
    assert!(result.summary().errors(InconsistencyCategory::Counts) >= 1);
}

#[test]
fn chain_cycle_is_detected() {
    let fixture = social_graph();
    rewrite_edge(&fixture.layout, 0, |edge| edge.dst_next = EdgeId(0));
    let result = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)),
        )
        .expect("check completes");
    assert!(result.summary().errors(InconsistencyCategory::Adjacency) >= 1);
}

#[test]
fn thread_count_does_not_change_the_summary() {
    let fixture = social_graph();
    smash_node(&fixture.layout, 2);
    rewrite_node(&fixture.layout, 3, |node| node.prop_key = TokenId(40));
    rewrite_edge(&fixture.layout, 4, |edge| edge.edge_type = TokenId(9));

    let run = |threads: usize| {
        let config = CheckConfig {
            scan_threads: Some(threads),
            record_memory_bytes: 1 << 20,
            ..CheckConfig::default()
        };
        service()
            .run_full_consistency_check(&fixture.layout, &config, options(&fixture, Arc::new(NullLog)))
            .expect("check completes")
    };
    let single = run(1);
    let many = run(8);
    assert!(!single.is_successful());
    assert_eq!(single.summary(), many.summary());
}
