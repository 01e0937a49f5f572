//! Structured errors callers branch on.
//!
//! Everything else travels as a plain `anyhow::Error`; these types are wrapped
//! in one as well and recovered with `downcast_ref`.

use std::fmt;

/// An index entry points at a primary key that has no row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingIndexEntry {
    pub index_name: String,
    pub table_name: String,
    pub primary_key: i64,
}

impl fmt::Display for DanglingIndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "index '{}' references row key {} which was not found in table '{}'",
            self.index_name, self.primary_key, self.table_name
        )
    }
}

impl std::error::Error for DanglingIndexEntry {}

/// A scanned index key does not fit the cursor's decode buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKeyTooLarge {
    pub key_len: usize,
    pub capacity: usize,
}

impl fmt::Display for IndexKeyTooLarge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "index key of {} bytes exceeds decode buffer capacity {}",
            self.key_len, self.capacity
        )
    }
}

impl std::error::Error for IndexKeyTooLarge {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardNotFound {
    pub shard_id: u64,
}

impl fmt::Display for ShardNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard {} not found in topology", self.shard_id)
    }
}

impl std::error::Error for ShardNotFound {}
