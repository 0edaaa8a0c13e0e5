#![forbid(unsafe_code)]

use serde::Serialize;

/// Which parts of the store the scan covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ConsistencyFlags {
    /// Node, edge and adjacency records, plus counts and degrees.
    pub check_graph: bool,
    /// Property index contents.
    pub check_indexes: bool,
    /// Index key ordering and statistics.
    pub check_index_structure: bool,
    /// Label index contents.
    pub check_label_index: bool,
    /// Property keys on nodes refer to known tokens.
    pub check_property_keys: bool,
}

impl Default for ConsistencyFlags {
    fn default() -> Self {
        Self {
            check_graph: true,
            check_indexes: true,
            check_index_structure: true,
            check_label_index: true,
            check_property_keys: true,
        }
    }
}
