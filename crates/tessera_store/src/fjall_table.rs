use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::debug;

use crate::codec::{decode_cells, encode_cells, read_u32, read_u64};
use crate::{Cells, Version, VersionedTable};

/// Durable multi-version table on a fjall keyspace.
///
/// `versions` holds every version keyed by `len(row) | row | version`, so a
/// row prefix scan walks its versions in ascending order. `latest` caches the
/// newest version per row for cheap unversioned reads.
pub struct FjallTable {
    keyspace: Arc<Keyspace>,
    versions: PartitionHandle,
    latest: PartitionHandle,
    lock: RwLock<()>,
}

impl FjallTable {
    pub fn open(keyspace: Arc<Keyspace>, name: &str) -> anyhow::Result<Self> {
        let versions_name = format!("{name}_versions");
        let latest_name = format!("{name}_latest");
        let versions = keyspace
            .open_partition(&versions_name, PartitionCreateOptions::default())
            .with_context(|| format!("open partition {versions_name}"))?;
        let latest = keyspace
            .open_partition(&latest_name, PartitionCreateOptions::default())
            .with_context(|| format!("open partition {latest_name}"))?;
        Ok(Self {
            keyspace,
            versions,
            latest,
            lock: RwLock::new(()),
        })
    }
}

#[async_trait]
impl VersionedTable for FjallTable {
    async fn put(&self, row: &[u8], version: Version, cells: Cells) -> anyhow::Result<()> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| anyhow!("fjall table lock poisoned"))?;
        let value = encode_cells(&cells);

        let current_latest = match self.latest.get(row)? {
            Some(bytes) => Some(decode_latest_value(&bytes)?.0),
            None => None,
        };

        let mut batch = self.keyspace.batch();
        batch.insert(&self.versions, encode_version_key(row, version), value.clone());
        if current_latest.map_or(true, |cur| version >= cur) {
            batch.insert(&self.latest, row.to_vec(), encode_latest_value(version, &value));
        }
        batch.commit().context("fjall table write")?;
        Ok(())
    }

    async fn get_at(&self, row: &[u8], version: Version) -> anyhow::Result<Option<Cells>> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| anyhow!("fjall table lock poisoned"))?;
        match self.versions.get(encode_version_key(row, version))? {
            Some(bytes) => Ok(Some(decode_cells(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_latest(&self, row: &[u8]) -> anyhow::Result<Option<(Version, Cells)>> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| anyhow!("fjall table lock poisoned"))?;
        let Some(bytes) = self.latest.get(row)? else {
            return Ok(None);
        };
        let (version, value) = decode_latest_value(&bytes)?;
        Ok(Some((version, decode_cells(value)?)))
    }

    async fn delete_row(&self, row: &[u8]) -> anyhow::Result<()> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| anyhow!("fjall table lock poisoned"))?;
        let mut batch = self.keyspace.batch();
        let mut removed = 0usize;
        for item in self.versions.prefix(encode_key_prefix(row)) {
            let (key, _) = item?;
            batch.remove(&self.versions, key);
            removed += 1;
        }
        batch.remove(&self.latest, row.to_vec());
        batch.commit().context("fjall table delete")?;
        debug!(removed, "deleted row versions");
        Ok(())
    }
}

fn encode_key_prefix(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + row.len());
    out.extend_from_slice(&(row.len() as u32).to_be_bytes());
    out.extend_from_slice(row);
    out
}

fn encode_version_key(row: &[u8], version: Version) -> Vec<u8> {
    let mut out = encode_key_prefix(row);
    out.extend_from_slice(&version.to_be_bytes());
    out
}

fn encode_latest_value(version: Version, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 4 + value.len());
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value);
    out
}

fn decode_latest_value(data: &[u8]) -> anyhow::Result<(Version, &[u8])> {
    let mut offset = 0usize;
    let version = read_u64(data, &mut offset)?;
    let len = read_u32(data, &mut offset)? as usize;
    anyhow::ensure!(offset + len <= data.len(), "short latest value");
    Ok((version, &data[offset..offset + len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(value: &[u8]) -> Cells {
        let mut cells = Cells::new();
        cells.insert("v".to_string(), value.to_vec());
        cells
    }

    fn open_table(dir: &tempfile::TempDir) -> FjallTable {
        let keyspace = fjall::Config::new(dir.path())
            .open()
            .expect("open temporary keyspace");
        FjallTable::open(Arc::new(keyspace), "ledger").expect("open table")
    }

    #[tokio::test]
    async fn latest_tracks_highest_version_not_last_write() {
        let dir = tempfile::tempdir().expect("temp dir");
        let table = open_table(&dir);

        table.put(b"a:10", 10, cells(b"ten")).await.expect("put");
        table.put(b"a:10", 4, cells(b"four")).await.expect("put");

        assert_eq!(
            table.get_latest(b"a:10").await.expect("latest"),
            Some((10, cells(b"ten")))
        );
        assert_eq!(
            table.get_at(b"a:10", 4).await.expect("get"),
            Some(cells(b"four"))
        );
        assert_eq!(table.get_at(b"a:10", 5).await.expect("get"), None);
    }

    #[tokio::test]
    async fn delete_row_leaves_neighbouring_rows() {
        let dir = tempfile::tempdir().expect("temp dir");
        let table = open_table(&dir);

        table.put(b"a:1", 1, cells(b"x")).await.expect("put");
        table.put(b"a:1", 2, cells(b"y")).await.expect("put");
        table.put(b"a:12", 12, cells(b"z")).await.expect("put");

        table.delete_row(b"a:1").await.expect("delete");
        assert_eq!(table.get_latest(b"a:1").await.expect("latest"), None);
        assert_eq!(table.get_at(b"a:1", 1).await.expect("get"), None);
        assert_eq!(
            table.get_at(b"a:12", 12).await.expect("get"),
            Some(cells(b"z"))
        );
    }
}
