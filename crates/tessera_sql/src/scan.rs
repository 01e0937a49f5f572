//! Batched range-scan contract and an in-process implementation.
//!
//! A scan handle is a server-side iterator over one shard's key range. The
//! cursor opens it once, pulls ordered batches through it and releases it
//! exactly once.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tessera_txn::{CommitLedger, ParticipantId};
use tracing::debug;

use crate::topology::key_in_range;

/// Opaque id of an open server-side scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanHandle(pub u64);

impl std::fmt::Display for ScanHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key range `[start_key, end_key)`; an empty `end_key` is unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRange {
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
}

impl ScanRange {
    pub fn new(start_key: impl Into<Vec<u8>>, end_key: impl Into<Vec<u8>>) -> Self {
        Self {
            start_key: start_key.into(),
            end_key: end_key.into(),
        }
    }
}

/// One visible version returned by a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Transaction id of the writer.
    pub version: u64,
}

/// Remote range-scan protocol served by the node that owns a shard.
#[async_trait]
pub trait ScanService: Send + Sync + 'static {
    async fn open_scan(&self, shard_id: u64, range: &ScanRange, max_versions: u32)
        -> Result<ScanHandle>;

    /// Returns the next entries in key order; an empty batch means the scan
    /// is exhausted.
    async fn fetch(
        &self,
        endpoint: SocketAddr,
        shard_id: u64,
        handle: ScanHandle,
        batch_size: usize,
    ) -> Result<Vec<RawEntry>>;

    async fn close_scan(&self, endpoint: SocketAddr, handle: ScanHandle) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredVersion {
    writer: ParticipantId,
    value: Vec<u8>,
}

/// Rows of one shard. Versions of a key are kept oldest first.
type ShardRows = BTreeMap<Vec<u8>, Vec<StoredVersion>>;

#[derive(Debug, Clone)]
struct OpenScan {
    shard_id: u64,
    range: ScanRange,
    max_versions: usize,
    /// Last key already returned; the next fetch resumes after it.
    last_key: Option<Vec<u8>>,
}

/// Scan service over in-memory shards that filters every version through the
/// commit ledger at a fixed read timestamp.
pub struct LocalScanService {
    endpoint: SocketAddr,
    ledger: CommitLedger,
    read_timestamp: i64,
    shards: RwLock<BTreeMap<u64, ShardRows>>,
    scans: Mutex<BTreeMap<u64, OpenScan>>,
    next_handle: AtomicU64,
}

impl LocalScanService {
    pub fn new(endpoint: SocketAddr, ledger: CommitLedger) -> Self {
        Self {
            endpoint,
            ledger,
            read_timestamp: i64::MAX,
            shards: RwLock::new(BTreeMap::new()),
            scans: Mutex::new(BTreeMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Only versions whose commit timestamp is at or before `read_timestamp`
    /// are returned.
    pub fn with_read_timestamp(mut self, read_timestamp: i64) -> Self {
        self.read_timestamp = read_timestamp;
        self
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn add_shard(&self, shard_id: u64) -> Result<()> {
        let mut shards = self
            .shards
            .write()
            .map_err(|_| anyhow!("scan service shard lock poisoned"))?;
        shards.entry(shard_id).or_default();
        Ok(())
    }

    /// Appends a version of `key` written by `writer`.
    pub fn insert(
        &self,
        shard_id: u64,
        key: impl Into<Vec<u8>>,
        writer: ParticipantId,
        value: impl Into<Vec<u8>>,
    ) -> Result<()> {
        let mut shards = self
            .shards
            .write()
            .map_err(|_| anyhow!("scan service shard lock poisoned"))?;
        shards
            .entry(shard_id)
            .or_default()
            .entry(key.into())
            .or_default()
            .push(StoredVersion {
                writer,
                value: value.into(),
            });
        Ok(())
    }

    /// Number of scans opened and not yet closed.
    pub fn open_handles(&self) -> Result<usize> {
        let scans = self
            .scans
            .lock()
            .map_err(|_| anyhow!("scan registry lock poisoned"))?;
        Ok(scans.len())
    }

    fn check_endpoint(&self, endpoint: SocketAddr) -> Result<()> {
        if endpoint != self.endpoint {
            return Err(anyhow!(
                "scan request for endpoint {} reached {}",
                endpoint,
                self.endpoint
            ));
        }
        Ok(())
    }

    /// Copies up to `limit` keys after the scan position. The shard lock is
    /// released before any ledger lookup runs.
    fn snapshot_keys(
        &self,
        scan: &OpenScan,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<StoredVersion>)>> {
        let shards = self
            .shards
            .read()
            .map_err(|_| anyhow!("scan service shard lock poisoned"))?;
        let rows = shards
            .get(&scan.shard_id)
            .ok_or_else(|| anyhow!("shard {} has no rows", scan.shard_id))?;
        let lower = match after {
            Some(key) => Bound::Excluded(key.to_vec()),
            None => Bound::Included(scan.range.start_key.clone()),
        };
        Ok(rows
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| {
                key_in_range(key, &scan.range.start_key, &scan.range.end_key)
            })
            .take(limit)
            .map(|(key, versions)| (key.clone(), versions.clone()))
            .collect())
    }
}

#[async_trait]
impl ScanService for LocalScanService {
    async fn open_scan(
        &self,
        shard_id: u64,
        range: &ScanRange,
        max_versions: u32,
    ) -> Result<ScanHandle> {
        if max_versions == 0 {
            return Err(anyhow!("scan on shard {shard_id} requested zero versions"));
        }
        {
            let shards = self
                .shards
                .read()
                .map_err(|_| anyhow!("scan service shard lock poisoned"))?;
            if !shards.contains_key(&shard_id) {
                return Err(anyhow!("shard {shard_id} is not served by {}", self.endpoint));
            }
        }

        let handle = ScanHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut scans = self
            .scans
            .lock()
            .map_err(|_| anyhow!("scan registry lock poisoned"))?;
        scans.insert(
            handle.0,
            OpenScan {
                shard_id,
                range: range.clone(),
                max_versions: max_versions as usize,
                last_key: None,
            },
        );
        debug!(
            shard_id,
            handle = handle.0,
            start = %hex::encode(&range.start_key),
            end = %hex::encode(&range.end_key),
            "opened scan"
        );
        Ok(handle)
    }

    async fn fetch(
        &self,
        endpoint: SocketAddr,
        shard_id: u64,
        handle: ScanHandle,
        batch_size: usize,
    ) -> Result<Vec<RawEntry>> {
        self.check_endpoint(endpoint)?;
        let scan = {
            let scans = self
                .scans
                .lock()
                .map_err(|_| anyhow!("scan registry lock poisoned"))?;
            scans
                .get(&handle.0)
                .cloned()
                .ok_or_else(|| anyhow!("unknown scan handle {handle}"))?
        };
        if scan.shard_id != shard_id {
            return Err(anyhow!(
                "scan handle {handle} belongs to shard {}, not {shard_id}",
                scan.shard_id
            ));
        }

        // Batches count keys; each key contributes up to `max_versions` entries.
        let batch_size = batch_size.max(1);
        let mut out = Vec::new();
        let mut keys_returned = 0usize;
        let mut last_key = scan.last_key.clone();
        'outer: loop {
            let chunk = self.snapshot_keys(&scan, last_key.as_deref(), batch_size)?;
            if chunk.is_empty() {
                break;
            }
            for (key, versions) in chunk {
                let mut visible = 0usize;
                for version in versions.iter().rev() {
                    if visible == scan.max_versions {
                        break;
                    }
                    if self
                        .ledger
                        .is_visible_at(&version.writer, self.read_timestamp)
                        .await?
                    {
                        out.push(RawEntry {
                            key: key.clone(),
                            value: version.value.clone(),
                            version: version.writer.txn_id,
                        });
                        visible += 1;
                    }
                }
                last_key = Some(key);
                if visible > 0 {
                    keys_returned += 1;
                    if keys_returned == batch_size {
                        break 'outer;
                    }
                }
            }
        }

        let mut scans = self
            .scans
            .lock()
            .map_err(|_| anyhow!("scan registry lock poisoned"))?;
        let state = scans
            .get_mut(&handle.0)
            .ok_or_else(|| anyhow!("scan handle {handle} closed during fetch"))?;
        state.last_key = last_key;
        Ok(out)
    }

    async fn close_scan(&self, endpoint: SocketAddr, handle: ScanHandle) -> Result<()> {
        self.check_endpoint(endpoint)?;
        let mut scans = self
            .scans
            .lock()
            .map_err(|_| anyhow!("scan registry lock poisoned"))?;
        scans
            .remove(&handle.0)
            .ok_or_else(|| anyhow!("scan handle {handle} is not open"))?;
        debug!(handle = handle.0, "closed scan");
        Ok(())
    }
}
