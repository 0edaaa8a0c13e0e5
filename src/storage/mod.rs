//! On-disk stores of a Sombra database, opened read-only for checking.
//!
//! The primary store holds node and edge records plus tokens and schema.
//! Everything else (counts, degrees, indexes, statistics) is derived from it
//! and shares the auxiliary store format.

mod auxiliary;
mod builder;
mod codec;
mod counts;
mod degrees;
mod id;
mod index;
mod layout;
mod meta;
mod primary;
mod records;
mod schema;
mod tokens;

/// Derived-store format, rebuild callbacks and open modes.
pub use auxiliary::{
    open_aux_file, write_aux, AuxFile, AuxHeader, AuxUpdater, AuxiliaryStore, OpenMode,
    RebuildReason, Rebuilder, AUX_ENTRY_LEN, AUX_HEADER_LEN,
};

/// Fixture writer for complete databases.
pub use builder::{write_derived_stores, StoreBuilder};

/// Node and edge counts.
pub use counts::{CountsKey, CountsStore, PrimaryCountsRebuilder};

/// Dense-node degrees.
pub use degrees::{DegreeKey, DegreesStore, Dir, PrimaryDegreesRebuilder};

/// Read-only id generators.
pub use id::{IdGeneratorFactory, IdType};

/// Extensions, index providers and index statistics.
pub use index::{
    instantiate_extensions, DatabaseExtensions, IndexKind, IndexProvider, IndexProviderMap,
    IndexReader, IndexState, IndexStatisticsStore, OperatingMode, PropertyIndexHandle,
    StatisticsState, INDEX_STATS_KIND, LABEL_INDEX_KIND, NATIVE_BTREE_PROVIDER,
    PROPERTY_INDEX_KIND,
};

pub use layout::DatabaseLayout;

/// Store metadata.
pub use meta::{read_meta, write_meta, StoreMeta, META_LEN};

pub use primary::PrimaryStore;

/// Fixed-size record encodings.
pub use records::{EdgeRecord, NodeRecord, EDGE_RECORD_LEN, NODE_RECORD_LEN};

/// Index definitions.
pub use schema::{decode_schema, encode_schema, IndexDescriptor};

/// Token store and holders.
pub use tokens::{
    decode_tokens, encode_tokens, TokenHolder, TokenHolders, TokenKind, TokenRecord, TokenSet,
};
