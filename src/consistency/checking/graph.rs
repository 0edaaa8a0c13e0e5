#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

use crate::storage::{CountsKey, DegreeKey, Dir, NodeRecord, PrimaryStore, TokenHolder, TokenSet};
use crate::types::{EdgeId, NodeId, Result, TokenId};

use super::super::summary::InconsistencyCategory;
use super::reporter::{finding, Reporter};

/// What the records say the derived stores should hold.
#[derive(Debug, Default)]
pub(crate) struct GraphTally {
    pub(crate) counts: BTreeMap<CountsKey, u64>,
    pub(crate) degrees: BTreeMap<DegreeKey, u64>,
    /// Edges reached by walking node chains.
    pub(crate) chain_entries: u64,
    /// Chain memberships implied by in-use edges.
    pub(crate) endpoint_entries: u64,
}

impl GraphTally {
    /// Totals start at zero so an empty store still expects both totals.
    pub(crate) fn baseline() -> Self {
        let mut tally = Self::default();
        tally.counts.insert(CountsKey::ALL_NODES, 0);
        tally.counts.insert(CountsKey::ALL_EDGES, 0);
        tally
    }

    fn count(&mut self, key: CountsKey) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    fn degree(&mut self, key: DegreeKey) {
        *self.degrees.entry(key).or_insert(0) += 1;
    }

    pub(crate) fn merge(mut self, other: GraphTally) -> Self {
        for (key, value) in other.counts {
            *self.counts.entry(key).or_insert(0) += value;
        }
        for (key, value) in other.degrees {
            *self.degrees.entry(key).or_insert(0) += value;
        }
        self.chain_entries += other.chain_entries;
        self.endpoint_entries += other.endpoint_entries;
        self
    }
}

pub(crate) fn token_name(holder: &TokenHolder, id: TokenId) -> String {
    if id.is_none() {
        return "none".into();
    }
    match holder.name(id) {
        Some(name) => format!("'{name}' ({id})"),
        None => format!("unknown ({id})"),
    }
}

/// Record-level checks over node and edge ranges.
pub(crate) struct GraphScan<'a> {
    pub(crate) primary: &'a PrimaryStore,
    pub(crate) tokens: &'a TokenSet,
    pub(crate) node_high_id: u64,
    pub(crate) edge_high_id: u64,
    pub(crate) check_property_keys: bool,
    pub(crate) reporter: &'a Reporter<'a>,
}

impl GraphScan<'_> {
    pub(crate) fn nodes(&self, range: Range<u64>) -> Result<GraphTally> {
        let mut tally = GraphTally::default();
        for raw in range {
            let id = NodeId(raw);
            let node = match finding(self.primary.read_node(id))? {
                Ok(node) => node,
                Err(err) => {
                    self.reporter.error(InconsistencyCategory::Node, err);
                    continue;
                }
            };
            if !node.in_use {
                continue;
            }
            if raw >= self.node_high_id {
                self.reporter.error(
                    InconsistencyCategory::IdGenerator,
                    format!("node {id} is in use above the high id {}", self.node_high_id),
                );
            }
            tally.count(CountsKey::ALL_NODES);
            if !node.label.is_none() {
                tally.count(CountsKey::Nodes {
                    label: Some(node.label),
                });
                if !self.tokens.labels().contains(node.label) {
                    self.reporter.error(
                        InconsistencyCategory::Node,
                        format!("node {id} has label {} which is not a label token", node.label),
                    );
                }
            }
            if self.check_property_keys {
                if let Some((key, _)) = node.property() {
                    if !self.tokens.property_keys().contains(key) {
                        self.reporter.error(
                            InconsistencyCategory::Node,
                            format!("node {id} has property key {key} which is not a property key token"),
                        );
                    }
                }
            }
            self.walk_chain(id, &node, &mut tally)?;
        }
        Ok(tally)
    }

    fn walk_chain(&self, id: NodeId, node: &NodeRecord, tally: &mut GraphTally) -> Result<()> {
        let mut visited = HashSet::new();
        let mut current = node.first_edge;
        while !current.is_nil() {
            if !visited.insert(current) {
                self.reporter.error(
                    InconsistencyCategory::Adjacency,
                    format!("edge chain of node {id} loops back to edge {current}"),
                );
                return Ok(());
            }
            let edge = match finding(self.primary.read_edge(current))? {
                Ok(edge) => edge,
                Err(err) => {
                    self.reporter.error(
                        InconsistencyCategory::Adjacency,
                        format!("edge chain of node {id} reaches unreadable edge {current}: {err}"),
                    );
                    return Ok(());
                }
            };
            if !edge.in_use {
                self.reporter.error(
                    InconsistencyCategory::Adjacency,
                    format!("edge chain of node {id} references unused edge {current}"),
                );
                return Ok(());
            }
            let Some(next) = edge.next_for(id) else {
                self.reporter.error(
                    InconsistencyCategory::Adjacency,
                    format!(
                        "edge {current} is in the chain of node {id} but connects {} to {}",
                        edge.src, edge.dst
                    ),
                );
                return Ok(());
            };
            tally.chain_entries += 1;
            if node.dense {
                if edge.src == id {
                    tally.degree(DegreeKey {
                        node: id,
                        edge_type: edge.edge_type,
                        dir: Dir::Out,
                    });
                }
                if edge.dst == id {
                    tally.degree(DegreeKey {
                        node: id,
                        edge_type: edge.edge_type,
                        dir: Dir::In,
                    });
                }
            }
            current = next;
        }
        Ok(())
    }

    pub(crate) fn edges(&self, range: Range<u64>) -> Result<GraphTally> {
        let mut tally = GraphTally::default();
        for raw in range {
            let id = EdgeId(raw);
            let edge = match finding(self.primary.read_edge(id))? {
                Ok(edge) => edge,
                Err(err) => {
                    self.reporter.error(InconsistencyCategory::Edge, err);
                    continue;
                }
            };
            if !edge.in_use {
                continue;
            }
            if raw >= self.edge_high_id {
                self.reporter.error(
                    InconsistencyCategory::IdGenerator,
                    format!("edge {id} is in use above the high id {}", self.edge_high_id),
                );
            }
            tally.count(CountsKey::ALL_EDGES);
            tally.count(CountsKey::Edges {
                edge_type: Some(edge.edge_type),
            });
            tally.endpoint_entries += if edge.is_self_loop() { 1 } else { 2 };
            if !self.tokens.relationship_types().contains(edge.edge_type) {
                self.reporter.error(
                    InconsistencyCategory::Edge,
                    format!(
                        "edge {id} has type {} which is not a relationship type token",
                        edge.edge_type
                    ),
                );
            }
            for (end, node) in [("source", edge.src), ("target", edge.dst)] {
                let live = match finding(self.primary.read_node(node))? {
                    Ok(record) => record.in_use,
                    Err(_) => false,
                };
                if !live {
                    self.reporter.error(
                        InconsistencyCategory::Edge,
                        format!("edge {id} {end} node {node} is not in use"),
                    );
                }
            }
        }
        Ok(tally)
    }
}
