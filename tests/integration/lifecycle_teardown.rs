#![allow(missing_docs)]

mod support;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;

use sombra_consistency::config::CheckConfig;
use sombra_consistency::logging::NullLog;
use sombra_consistency::primitives::memory::MemoryTracker;
use support::{cache, options, service, smash_node, social_graph, CaptureLog};
use tracing::Level;

#[test]
fn supplied_cache_is_left_open_and_unmapped() {
    let fixture = social_graph();
    let cache = cache();
    for _ in 0..2 {
        let result = service()
            .run_full_consistency_check(
                &fixture.layout,
                &CheckConfig::default(),
                options(&fixture, Arc::new(NullLog)).page_cache(Arc::clone(&cache)),
            )
            .expect("check completes");
        assert!(result.is_successful());
        assert_eq!(cache.mapped_files(), 0);
        assert!(!cache.is_closed());
    }
    cache.close().expect("caller closes its cache");
}

#[test]
fn inconsistent_run_still_releases_every_file() {
    let fixture = social_graph();
    smash_node(&fixture.layout, 1);
    let cache = cache();
    let result = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)).page_cache(Arc::clone(&cache)),
        )
        .expect("check completes");
    assert!(!result.is_successful());
    assert_eq!(cache.mapped_files(), 0);
}

#[test]
fn failed_startup_tears_down_and_reports() {
    let fixture = social_graph();
    fs::write(fixture.layout.tokens_store(), b"not a token store").expect("corrupt tokens");
    let cache = cache();
    let log = CaptureLog::new();
    let err = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, log.clone()).page_cache(Arc::clone(&cache)),
        )
        .err()
        .expect("startup fails");

    assert!(!err.is_unrecovered());
    assert_eq!(cache.mapped_files(), 0);
    assert!(log.contains(Level::ERROR, "Failed to start component token-holders"));
    let report = fs::read_to_string(
        fixture
            .report_dir
            .join("inconsistencies-2024-05-17.08.30.00.report"),
    )
    .expect("startup failure reaches the report");
    assert!(report.contains("Failed to start component token-holders"), "{report}");
}

#[test]
fn scan_failure_tears_down_and_closes_the_report() {
    let fixture = social_graph();
    let mut nodes = OpenOptions::new()
        .append(true)
        .open(fixture.layout.nodes_store())
        .expect("open node store");
    nodes.write_all(&[0u8; 5]).expect("append partial record");
    drop(nodes);

    let cache = cache();
    let err = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog))
                .page_cache(Arc::clone(&cache))
                .memory_tracker(Arc::new(MemoryTracker::limited(8))),
        )
        .err()
        .expect("scan cannot reserve its working set");

    assert!(!err.is_unrecovered());
    assert!(err.to_string().contains("exceeds limit 8"), "{err}");
    assert_eq!(cache.mapped_files(), 0);
    let path = fixture
        .report_dir
        .join("inconsistencies-2024-05-17.08.30.00.report");
    let report = fs::read_to_string(&path).expect("finding before the failure was reported");
    assert!(report.contains("partial record of 5 bytes"), "{report}");
    fs::remove_file(&path).expect("report is released");
    cache.close().expect("nothing left mapped");
}

#[test]
fn closed_cache_is_refused() {
    let fixture = social_graph();
    let cache = cache();
    cache.close().expect("close");
    let err = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)).page_cache(cache),
        )
        .err()
        .expect("closed cache cannot be used");
    assert!(!err.is_unrecovered());
}
