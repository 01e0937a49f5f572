//! Read path of the tessera SQL layer.
//!
//! The pieces here sit between the SQL executor and the sharded store:
//! - `topology` locates a shard and clamps scan ranges to its bounds,
//! - `indexing` defines secondary indexes and decodes their keys,
//! - `scan` is the batched remote range-scan contract (plus an in-process
//!   implementation that filters through the commit ledger),
//! - `point_query` is the primary-key lookup contract,
//! - `cursor` drives an index scan and resolves hits into full rows.

pub mod config;
pub mod cursor;
pub mod error;
pub mod indexing;
pub mod metrics;
pub mod point_query;
pub mod scan;
pub mod topology;

pub use config::CursorConfig;
pub use cursor::{
    CellRef, CursorServices, CursorState, IndexScanCursor, IndexScanRequest, ResolvedRow,
};
pub use error::{DanglingIndexEntry, IndexKeyTooLarge, ShardNotFound};
pub use indexing::{
    decode_search_row, encode_index_key, encode_primary_row_key, index_key_range, ColumnDef,
    ColumnType, IndexDefinition, SearchRow,
};
pub use metrics::{ScanMetrics, ScanMetricsSnapshot};
pub use point_query::{PointQuery, PointQueryExecutor};
pub use scan::{LocalScanService, RawEntry, ScanHandle, ScanRange, ScanService};
pub use topology::{ClusterTopology, ShardDescriptor, ShardDirectory};
