#![forbid(unsafe_code)]

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Kind of structure an inconsistency was found in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyCategory {
    /// Node records.
    Node,
    /// Edge records.
    Edge,
    /// Per-node edge chains.
    Adjacency,
    /// Label, property key and relationship type tokens.
    Token,
    /// The label index.
    LabelIndex,
    /// Property indexes.
    PropertyIndex,
    /// Sampled index statistics.
    IndexStatistics,
    /// The counts store.
    Counts,
    /// The degrees store.
    Degrees,
    /// Record id high-water marks.
    IdGenerator,
}

impl InconsistencyCategory {
    /// Every category in report order.
    pub const ALL: [InconsistencyCategory; 10] = [
        InconsistencyCategory::Node,
        InconsistencyCategory::Edge,
        InconsistencyCategory::Adjacency,
        InconsistencyCategory::Token,
        InconsistencyCategory::LabelIndex,
        InconsistencyCategory::PropertyIndex,
        InconsistencyCategory::IndexStatistics,
        InconsistencyCategory::Counts,
        InconsistencyCategory::Degrees,
        InconsistencyCategory::IdGenerator,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Name used in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            InconsistencyCategory::Node => "Node",
            InconsistencyCategory::Edge => "Edge",
            InconsistencyCategory::Adjacency => "Adjacency",
            InconsistencyCategory::Token => "Token",
            InconsistencyCategory::LabelIndex => "LabelIndex",
            InconsistencyCategory::PropertyIndex => "PropertyIndex",
            InconsistencyCategory::IndexStatistics => "IndexStatistics",
            InconsistencyCategory::Counts => "Counts",
            InconsistencyCategory::Degrees => "Degrees",
            InconsistencyCategory::IdGenerator => "IdGenerator",
        }
    }
}

impl fmt::Display for InconsistencyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const CATEGORIES: usize = InconsistencyCategory::ALL.len();

/// Per-category error and warning tallies from one scan.
///
/// Workers add concurrently; totals depend only on what was found.
#[derive(Debug, Default)]
pub struct ConsistencySummaryStatistics {
    errors: [AtomicU64; CATEGORIES],
    warnings: [AtomicU64; CATEGORIES],
}

impl ConsistencySummaryStatistics {
    /// Empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one error in `category`.
    pub fn add_error(&self, category: InconsistencyCategory) {
        self.errors[category.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one warning in `category`.
    pub fn add_warning(&self, category: InconsistencyCategory) {
        self.warnings[category.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Errors found in `category`.
    pub fn errors(&self, category: InconsistencyCategory) -> u64 {
        self.errors[category.index()].load(Ordering::Relaxed)
    }

    /// Warnings found in `category`.
    pub fn warnings(&self, category: InconsistencyCategory) -> u64 {
        self.warnings[category.index()].load(Ordering::Relaxed)
    }

    /// Errors across all categories.
    pub fn total_errors(&self) -> u64 {
        InconsistencyCategory::ALL
            .iter()
            .map(|category| self.errors(*category))
            .sum()
    }

    /// Warnings across all categories.
    pub fn total_warnings(&self) -> u64 {
        InconsistencyCategory::ALL
            .iter()
            .map(|category| self.warnings(*category))
            .sum()
    }

    /// True when no errors were found. Warnings do not count.
    pub fn is_consistent(&self) -> bool {
        self.total_errors() == 0
    }

    /// Plain copy of the current tallies.
    pub fn snapshot(&self) -> SummarySnapshot {
        let categories = InconsistencyCategory::ALL
            .iter()
            .filter_map(|category| {
                let errors = self.errors(*category);
                let warnings = self.warnings(*category);
                (errors > 0 || warnings > 0).then_some(CategoryCount {
                    category: *category,
                    errors,
                    warnings,
                })
            })
            .collect();
        SummarySnapshot {
            consistent: self.is_consistent(),
            total_errors: self.total_errors(),
            total_warnings: self.total_warnings(),
            categories,
        }
    }
}

impl fmt::Display for ConsistencySummaryStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot().fmt(f)
    }
}

/// Tallies of one category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    /// Category counted.
    pub category: InconsistencyCategory,
    /// Errors found.
    pub errors: u64,
    /// Warnings found.
    pub warnings: u64,
}

/// Immutable summary carried by a check result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SummarySnapshot {
    /// True when no errors were found.
    pub consistent: bool,
    /// Errors across all categories.
    pub total_errors: u64,
    /// Warnings across all categories.
    pub total_warnings: u64,
    /// Categories with at least one finding, in report order.
    pub categories: Vec<CategoryCount>,
}

impl SummarySnapshot {
    /// Errors recorded for `category`.
    pub fn errors(&self, category: InconsistencyCategory) -> u64 {
        self.categories
            .iter()
            .find(|count| count.category == category)
            .map_or(0, |count| count.errors)
    }

    /// Warnings recorded for `category`.
    pub fn warnings(&self, category: InconsistencyCategory) -> u64 {
        self.categories
            .iter()
            .find(|count| count.category == category)
            .map_or(0, |count| count.warnings)
    }
}

impl fmt::Display for SummarySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Consistency summary:")?;
        writeln!(
            f,
            "  {} errors, {} warnings",
            self.total_errors, self.total_warnings
        )?;
        for count in &self.categories {
            writeln!(
                f,
                "  {:<16} errors={} warnings={}",
                count.category, count.errors, count.warnings
            )?;
        }
        Ok(())
    }
}
