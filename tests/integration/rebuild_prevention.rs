#![allow(missing_docs)]

mod support;

use std::fs;
use std::sync::Arc;

use sombra_consistency::config::CheckConfig;
use sombra_consistency::consistency::{CountsStoreManager, InconsistencyCategory};
use sombra_consistency::logging::NullLog;
use sombra_consistency::storage::{write_aux, AuxiliaryStore, CountsStore, DegreesStore};
use sombra_consistency::types::{SombraError, TxId};
use support::{aux_entries, cache, options, service, social_graph, LAST_TX};

#[test]
fn missing_counts_store_is_reported_not_rebuilt() {
    let fixture = social_graph();
    let path = fixture.layout.counts_store();
    fs::remove_file(&path).expect("remove counts store");

    let result = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)),
        )
        .expect("check completes");

    assert!(!result.is_successful());
    assert_eq!(result.summary().errors(InconsistencyCategory::Counts), 1);
    assert_eq!(result.summary().total_errors, 1);
    assert!(!path.exists(), "counts store was recreated");
    let report = fs::read_to_string(result.report_path()).expect("report written");
    assert!(report.contains("counts store could not be opened"), "{report}");
}

#[test]
fn stale_counts_store_is_left_untouched() {
    let fixture = social_graph();
    let path = fixture.layout.counts_store();
    let entries = aux_entries(&path, CountsStore::KIND);
    write_aux(&path, CountsStore::KIND, TxId(LAST_TX.0 - 1), false, &entries)
        .expect("restamp counts store");
    let before = fs::read(&path).expect("read counts store");

    let result = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)),
        )
        .expect("check completes");

    assert_eq!(result.summary().errors(InconsistencyCategory::Counts), 1);
    assert_eq!(fs::read(&path).expect("reread counts store"), before);
    let report = fs::read_to_string(result.report_path()).expect("report written");
    assert!(report.contains("needed rebuild"), "{report}");
}

#[test]
fn flagged_degrees_store_is_reported() {
    let fixture = social_graph();
    let path = fixture.layout.degrees_store();
    let entries = aux_entries(&path, DegreesStore::KIND);
    write_aux(&path, DegreesStore::KIND, LAST_TX, true, &entries).expect("flag degrees store");

    let result = service()
        .run_full_consistency_check(
            &fixture.layout,
            &CheckConfig::default(),
            options(&fixture, Arc::new(NullLog)),
        )
        .expect("check completes");

    assert_eq!(result.summary().errors(InconsistencyCategory::Degrees), 1);
    assert_eq!(result.summary().errors(InconsistencyCategory::Counts), 0);
    let report = fs::read_to_string(result.report_path()).expect("report written");
    assert!(report.contains("needed rebuild"), "{report}");
}

#[test]
fn manager_opens_at_most_once() {
    let fixture = social_graph();
    fs::remove_file(fixture.layout.counts_store()).expect("remove counts store");
    let cache = cache();
    let manager = CountsStoreManager::new(Arc::clone(&cache), &fixture.layout, LAST_TX);

    let first = manager.open().err().expect("missing store cannot open");
    assert!(matches!(first, SombraError::RebuildRequired { .. }), "{first}");
    let second = manager.open().err().expect("failure is remembered");
    assert!(matches!(second, SombraError::Unavailable(_)), "{second}");
    assert_eq!(manager.open_attempts(), 1);
    assert!(!manager.is_open());
    manager.shutdown();
    assert_eq!(cache.mapped_files(), 0);
    cache.close().expect("cache closes");
}

#[test]
fn manager_hands_out_one_store() {
    let fixture = social_graph();
    let cache = cache();
    let manager = CountsStoreManager::new(Arc::clone(&cache), &fixture.layout, LAST_TX);
    let first = manager.open().expect("counts store opens");
    let second = manager.open().expect("counts store reused");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(manager.open_attempts(), 1);
    drop((first, second));
    manager.shutdown();
    assert!(manager.open().is_err());
    assert_eq!(cache.mapped_files(), 0);
}
