#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt::Display;

use crate::consistency::managers::AuxiliaryStoreManager;
use crate::storage::{AuxiliaryStore, CountsKey, CountsStore, DegreeKey, DegreesStore};
use crate::types::Result;

use super::super::summary::InconsistencyCategory;
use super::reporter::{finding, Reporter};

/// Reads a derived store's entries through `manager`; any failure to open or
/// read it is one finding.
fn load<S, K>(
    manager: &AuxiliaryStoreManager<S>,
    category: InconsistencyCategory,
    reporter: &Reporter<'_>,
    entries: impl FnOnce(&S) -> Result<Vec<(K, u64)>>,
) -> Result<Option<BTreeMap<K, u64>>>
where
    S: AuxiliaryStore,
    K: Ord,
{
    let store = match manager.open() {
        Ok(store) => store,
        Err(err) => {
            reporter.error(category, format!("{} could not be opened: {err}", S::NAME));
            return Ok(None);
        }
    };
    match finding(entries(store.as_ref()))? {
        Ok(entries) => Ok(Some(entries.into_iter().collect())),
        Err(err) => {
            reporter.error(category, format!("{} could not be read: {err}", S::NAME));
            Ok(None)
        }
    }
}

fn compare<K: Ord + Display>(
    store: &str,
    category: InconsistencyCategory,
    expected: &BTreeMap<K, u64>,
    stored: &BTreeMap<K, u64>,
    reporter: &Reporter<'_>,
) {
    for (key, want) in expected {
        let have = stored.get(key).copied().unwrap_or(0);
        if have != *want {
            reporter.error(
                category,
                format!("{store} holds {have} for {key} but the records give {want}"),
            );
        }
    }
    for (key, have) in stored {
        if *have != 0 && !expected.contains_key(key) {
            reporter.error(
                category,
                format!("{store} holds {have} for {key} but the records give 0"),
            );
        }
    }
}

pub(crate) fn check_counts(
    manager: &AuxiliaryStoreManager<CountsStore>,
    expected: &BTreeMap<CountsKey, u64>,
    reporter: &Reporter<'_>,
) -> Result<()> {
    let category = InconsistencyCategory::Counts;
    if let Some(stored) = load(manager, category, reporter, CountsStore::entries)? {
        compare(CountsStore::NAME, category, expected, &stored, reporter);
    }
    Ok(())
}

pub(crate) fn check_degrees(
    manager: &AuxiliaryStoreManager<DegreesStore>,
    expected: &BTreeMap<DegreeKey, u64>,
    reporter: &Reporter<'_>,
) -> Result<()> {
    let category = InconsistencyCategory::Degrees;
    if let Some(stored) = load(manager, category, reporter, DegreesStore::entries)? {
        compare(DegreesStore::NAME, category, expected, &stored, reporter);
    }
    Ok(())
}
