#![forbid(unsafe_code)]

use std::ops::Range;
use std::sync::Arc;

use crate::storage::{
    IndexDescriptor, IndexProviderMap, IndexReader, IndexState, PrimaryStore, StatisticsState,
    TokenSet,
};
use crate::types::{NodeId, Result, TokenId};

use super::super::summary::InconsistencyCategory;
use super::graph::token_name;
use super::reporter::{finding, Reporter};

/// Indexes that came online, after failed ones have been reported.
pub(crate) struct OnlineIndexes {
    pub(crate) label: Option<Arc<IndexReader>>,
    pub(crate) properties: Vec<(IndexDescriptor, Arc<IndexReader>)>,
}

impl OnlineIndexes {
    pub(crate) fn resolve(
        map: &IndexProviderMap,
        report_label: bool,
        report_properties: bool,
        reporter: &Reporter<'_>,
    ) -> Result<Self> {
        let label = match map.label_index()? {
            IndexState::Online(reader) => Some(reader),
            IndexState::Failed(reason) => {
                if report_label {
                    reporter.error(
                        InconsistencyCategory::LabelIndex,
                        format!("label index is not online: {reason}"),
                    );
                }
                None
            }
        };
        let mut properties = Vec::new();
        for handle in map.property_indexes()? {
            match handle.state {
                IndexState::Online(reader) => properties.push((handle.descriptor, reader)),
                IndexState::Failed(reason) => {
                    if report_properties {
                        reporter.error(
                            InconsistencyCategory::PropertyIndex,
                            format!("index {} is not online: {reason}", handle.descriptor.id),
                        );
                    }
                }
            }
        }
        Ok(Self { label, properties })
    }
}

/// Every label index entry must name an in-use node carrying that label.
pub(crate) fn check_label_entries(
    reader: &IndexReader,
    primary: &PrimaryStore,
    tokens: &TokenSet,
    reporter: &Reporter<'_>,
) -> Result<()> {
    let category = InconsistencyCategory::LabelIndex;
    let entries = match finding(reader.entries())? {
        Ok(entries) => entries,
        Err(err) => {
            reporter.error(category, format!("label index could not be read: {err}"));
            return Ok(());
        }
    };
    for (node, value) in entries {
        let label = match u32::try_from(value) {
            Ok(label) => TokenId(label),
            Err(_) => {
                reporter.error(
                    category,
                    format!("label index entry for node {node} holds {value}, not a label id"),
                );
                continue;
            }
        };
        match finding(primary.read_node(node))? {
            Ok(record) if !record.in_use => reporter.error(
                category,
                format!("label index has node {node} which is not in use"),
            ),
            Ok(record) if record.label != label => reporter.error(
                category,
                format!(
                    "label index has node {node} with label {} but the node has label {}",
                    token_name(tokens.labels(), label),
                    token_name(tokens.labels(), record.label)
                ),
            ),
            Ok(_) => {}
            Err(err) => reporter.error(
                category,
                format!("label index has node {node} which cannot be read: {err}"),
            ),
        }
    }
    Ok(())
}

/// Every property index entry must name an in-use node with the indexed
/// label, key and value.
pub(crate) fn check_property_entries(
    descriptor: &IndexDescriptor,
    reader: &IndexReader,
    primary: &PrimaryStore,
    reporter: &Reporter<'_>,
) -> Result<()> {
    let category = InconsistencyCategory::PropertyIndex;
    let index = descriptor.id;
    let entries = match finding(reader.entries())? {
        Ok(entries) => entries,
        Err(err) => {
            reporter.error(category, format!("index {index} could not be read: {err}"));
            return Ok(());
        }
    };
    for (node, value) in entries {
        match finding(primary.read_node(node))? {
            Ok(record) if !record.in_use => reporter.error(
                category,
                format!("index {index} has node {node} which is not in use"),
            ),
            Ok(record)
                if record.label != descriptor.label
                    || record.prop_key != descriptor.property_key =>
            {
                reporter.error(
                    category,
                    format!("index {index} has node {node} which does not carry the indexed property"),
                )
            }
            Ok(record) if record.prop_value != value => reporter.error(
                category,
                format!(
                    "index {index} has value {value} for node {node} but the node holds {}",
                    record.prop_value
                ),
            ),
            Ok(_) => {}
            Err(err) => reporter.error(
                category,
                format!("index {index} has node {node} which cannot be read: {err}"),
            ),
        }
    }
    Ok(())
}

/// Node-side half of the index checks: every indexable node must be present
/// in the indexes it belongs to.
pub(crate) struct ReverseIndexScan<'a> {
    pub(crate) primary: &'a PrimaryStore,
    pub(crate) label: Option<&'a IndexReader>,
    pub(crate) properties: Vec<(&'a IndexDescriptor, &'a IndexReader)>,
    pub(crate) reporter: &'a Reporter<'a>,
}

impl ReverseIndexScan<'_> {
    pub(crate) fn nodes(&self, range: Range<u64>) -> Result<()> {
        for raw in range {
            let id = NodeId(raw);
            // Unreadable nodes are reported by the graph pass.
            let Ok(node) = finding(self.primary.read_node(id))? else {
                continue;
            };
            if !node.in_use {
                continue;
            }
            if let Some(reader) = self.label {
                if !node.label.is_none() {
                    let indexed = finding(reader.get(id))?;
                    if !matches!(indexed, Ok(Some(value)) if value == u64::from(node.label.0)) {
                        self.reporter.error(
                            InconsistencyCategory::LabelIndex,
                            format!("node {id} with label {} is missing from the label index", node.label),
                        );
                    }
                }
            }
            for (descriptor, reader) in &self.properties {
                if node.label != descriptor.label || node.prop_key != descriptor.property_key {
                    continue;
                }
                let indexed = finding(reader.get(id))?;
                if !matches!(indexed, Ok(Some(value)) if value == node.prop_value) {
                    self.reporter.error(
                        InconsistencyCategory::PropertyIndex,
                        format!("node {id} is missing from index {}", descriptor.id),
                    );
                }
            }
        }
        Ok(())
    }
}

fn check_ordering(
    name: &str,
    reader: &IndexReader,
    category: InconsistencyCategory,
    reporter: &Reporter<'_>,
) -> Result<()> {
    if let Err(err) = finding(reader.verify_checksum())? {
        reporter.error(category, format!("{name} failed verification: {err}"));
        return Ok(());
    }
    let entries = match finding(reader.entries())? {
        Ok(entries) => entries,
        Err(err) => {
            reporter.error(category, format!("{name} could not be read: {err}"));
            return Ok(());
        }
    };
    if let Some(pair) = entries.windows(2).find(|pair| pair[0].0 >= pair[1].0) {
        reporter.error(
            category,
            format!("{name} keys are out of order at node {} then {}", pair[0].0, pair[1].0),
        );
    }
    Ok(())
}

/// Key ordering of every online index, and statistics against actual sizes.
pub(crate) fn check_structure(
    online: &OnlineIndexes,
    statistics: &StatisticsState,
    reporter: &Reporter<'_>,
) -> Result<()> {
    if let Some(reader) = &online.label {
        check_ordering("label index", reader, InconsistencyCategory::LabelIndex, reporter)?;
    }
    for (descriptor, reader) in &online.properties {
        let name = format!("index {}", descriptor.id);
        check_ordering(&name, reader, InconsistencyCategory::PropertyIndex, reporter)?;
    }

    let category = InconsistencyCategory::IndexStatistics;
    let samples = match statistics {
        StatisticsState::Loaded(samples) => samples,
        StatisticsState::Missing => {
            reporter.warning(category, "index statistics store is missing");
            return Ok(());
        }
        StatisticsState::Unreadable(reason) => {
            reporter.warning(category, format!("index statistics store is unreadable: {reason}"));
            return Ok(());
        }
    };
    for (descriptor, reader) in &online.properties {
        let actual = reader.entry_count();
        match samples.get(&descriptor.id) {
            None => reporter.warning(
                category,
                format!("index {} has no statistics sample", descriptor.id),
            ),
            Some(sampled) if *sampled != actual => reporter.warning(
                category,
                format!(
                    "index {} statistics sample is {sampled} but the index holds {actual} entries",
                    descriptor.id
                ),
            ),
            Some(_) => {}
        }
    }
    Ok(())
}
