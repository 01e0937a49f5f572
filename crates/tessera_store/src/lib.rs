//! Versioned key-value tables for the tessera transaction and SQL layers.
//!
//! A table maps a row key to an ordered list of versions. Each version holds a
//! set of named column cells. Higher layers only see the `VersionedTable`
//! trait; `MemoryTable` backs tests and embedded use, `FjallTable` persists to
//! an LSM keyspace.

use std::collections::BTreeMap;

use async_trait::async_trait;

mod codec;
mod fjall_table;
mod memory;

pub use codec::{decode_cells, encode_cells};
pub use fjall_table::FjallTable;
pub use memory::MemoryTable;

/// Version stamp attached to every write.
pub type Version = u64;

/// Column name to raw cell bytes for one row version.
pub type Cells = BTreeMap<String, Vec<u8>>;

/// Client for a multi-version table.
///
/// Implementations must tolerate concurrent callers; one instance is shared
/// process-wide behind an `Arc`.
#[async_trait]
pub trait VersionedTable: Send + Sync + 'static {
    /// Writes `cells` at exactly `version`, replacing any cells already stored
    /// at that version.
    async fn put(&self, row: &[u8], version: Version, cells: Cells) -> anyhow::Result<()>;

    /// Reads the cells stored at exactly `version`.
    async fn get_at(&self, row: &[u8], version: Version) -> anyhow::Result<Option<Cells>>;

    /// Reads the newest version of `row`.
    async fn get_latest(&self, row: &[u8]) -> anyhow::Result<Option<(Version, Cells)>>;

    /// Removes every version of `row`.
    async fn delete_row(&self, row: &[u8]) -> anyhow::Result<()>;
}
