use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::{Cells, Version, VersionedTable};

/// In-memory multi-version table.
#[derive(Default)]
pub struct MemoryTable {
    inner: RwLock<HashMap<Vec<u8>, Vec<VersionedCells>>>,
}

#[derive(Clone, Debug)]
struct VersionedCells {
    version: Version,
    cells: Cells,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored versions for `row`.
    pub fn version_count(&self, row: &[u8]) -> usize {
        self.inner
            .read()
            .ok()
            .and_then(|guard| guard.get(row).map(Vec::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl VersionedTable for MemoryTable {
    async fn put(&self, row: &[u8], version: Version, cells: Cells) -> anyhow::Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("memory table lock poisoned"))?;
        let entry = guard.entry(row.to_vec()).or_default();
        match entry.binary_search_by(|v| v.version.cmp(&version)) {
            Ok(idx) => entry[idx].cells = cells,
            Err(idx) => entry.insert(idx, VersionedCells { version, cells }),
        }
        Ok(())
    }

    async fn get_at(&self, row: &[u8], version: Version) -> anyhow::Result<Option<Cells>> {
        let guard = self
            .inner
            .read()
            .map_err(|_| anyhow!("memory table lock poisoned"))?;
        let Some(versions) = guard.get(row) else {
            return Ok(None);
        };
        Ok(versions
            .binary_search_by(|v| v.version.cmp(&version))
            .ok()
            .map(|idx| versions[idx].cells.clone()))
    }

    async fn get_latest(&self, row: &[u8]) -> anyhow::Result<Option<(Version, Cells)>> {
        let guard = self
            .inner
            .read()
            .map_err(|_| anyhow!("memory table lock poisoned"))?;
        Ok(guard
            .get(row)
            .and_then(|versions| versions.last())
            .map(|last| (last.version, last.cells.clone())))
    }

    async fn delete_row(&self, row: &[u8]) -> anyhow::Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("memory table lock poisoned"))?;
        guard.remove(row);
        Ok(())
    }
}
