//! Forward-only cursor over one shard's slice of a secondary index.
//!
//! The cursor pulls index entries in batches through a [`ScanService`],
//! decodes each entry into a [`SearchRow`] and, only when asked, resolves the
//! entry into the full primary row with a point query. An entry whose primary
//! row is missing is a data-integrity failure, never skipped.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytes::BytesMut;
use datafusion::common::ScalarValue;
use tracing::{debug, warn};

use crate::config::CursorConfig;
use crate::error::{DanglingIndexEntry, IndexKeyTooLarge};
use crate::indexing::{decode_search_row, encode_primary_row_key, IndexDefinition, SearchRow};
use crate::metrics::ScanMetrics;
use crate::point_query::{PointQuery, PointQueryExecutor};
use crate::scan::{RawEntry, ScanHandle, ScanRange, ScanService};
use crate::topology::{clamp_scan_range, ShardDescriptor, ShardDirectory};

/// Index scans read only the newest visible version of each entry.
const SINGLE_VERSION: u32 = 1;

/// Lifecycle of an [`IndexScanCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Scan handle open, `next` not called yet.
    Initialized,
    /// Advancing; no current entry.
    Scanning,
    /// Sitting on a decoded entry.
    Positioned,
    /// Range consumed and handle released.
    Exhausted,
    /// Closed explicitly or after a fetch or decode failure. Terminal.
    Closed,
}

/// Address of one column cell backing a resolved value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRef {
    pub row_key: Vec<u8>,
    pub family: String,
    pub qualifier: String,
}

/// Primary row an index entry resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRow {
    /// Shard holding the primary row, not the index entry.
    pub shard_id: u64,
    pub primary_key: i64,
    /// Encoded key of the primary row.
    pub row_key: Vec<u8>,
    /// Column values in point-query column order.
    pub values: Vec<ScalarValue>,
    /// One cell reference per value, same order.
    pub cells: Vec<CellRef>,
}

impl ResolvedRow {
    /// Value of the named column, matched case-insensitively.
    pub fn value(&self, column: &str) -> Option<&ScalarValue> {
        self.cells
            .iter()
            .position(|cell| cell.qualifier.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values.get(idx))
    }
}

/// What to scan.
#[derive(Debug, Clone)]
pub struct IndexScanRequest {
    pub index: IndexDefinition,
    pub shard_id: u64,
    /// Inclusive start; empty means the start of the shard.
    pub start_key: Vec<u8>,
    /// Exclusive end; empty means the end of the shard.
    pub end_key: Vec<u8>,
    /// Columns `get` returns; `None` returns every column.
    pub columns: Option<Vec<String>>,
}

/// Collaborators a cursor talks to.
#[derive(Clone)]
pub struct CursorServices {
    pub directory: Arc<dyn ShardDirectory>,
    pub scans: Arc<dyn ScanService>,
    pub executor: Arc<dyn PointQueryExecutor>,
    pub metrics: Option<Arc<ScanMetrics>>,
}

pub struct IndexScanCursor {
    index: IndexDefinition,
    columns: Option<Vec<String>>,
    shard: ShardDescriptor,
    range: ScanRange,
    directory: Arc<dyn ShardDirectory>,
    scans: Arc<dyn ScanService>,
    executor: Arc<dyn PointQueryExecutor>,
    metrics: Option<Arc<ScanMetrics>>,
    config: CursorConfig,
    /// `None` once released.
    handle: Option<ScanHandle>,
    state: CursorState,
    batch: Vec<RawEntry>,
    /// Index into `batch` of the next unread entry.
    next_entry: usize,
    /// Keys are copied here before decoding; never grows past capacity.
    scratch: BytesMut,
    search_row: Option<SearchRow>,
    resolved: Option<ResolvedRow>,
    /// Built on the first `get`.
    point_query: Option<PointQuery>,
}

impl IndexScanCursor {
    /// Locates the shard, clamps the requested range to it and opens a scan
    /// handle over the result.
    pub async fn open(
        request: IndexScanRequest,
        services: CursorServices,
        config: CursorConfig,
    ) -> Result<Self> {
        let IndexScanRequest {
            index,
            shard_id,
            start_key,
            end_key,
            columns,
        } = request;
        index.validate()?;

        let shard = services
            .directory
            .locate(shard_id)
            .await
            .with_context(|| format!("locate shard {shard_id} for index '{}'", index.index_name))?;
        let (start_key, end_key) = clamp_scan_range(&start_key, &end_key, &shard);
        let range = ScanRange { start_key, end_key };

        let handle = services
            .scans
            .open_scan(shard.shard_id, &range, SINGLE_VERSION)
            .await
            .with_context(|| {
                format!(
                    "open scan on shard {} at {} for index '{}'",
                    shard.shard_id, shard.endpoint, index.index_name
                )
            })?;
        if let Some(metrics) = &services.metrics {
            metrics.record_cursor_opened();
        }
        debug!(
            shard_id = shard.shard_id,
            handle = handle.0,
            endpoint = %shard.endpoint,
            index = %index.index_name,
            start = %hex::encode(&range.start_key),
            end = %hex::encode(&range.end_key),
            "opened index scan cursor"
        );

        Ok(Self {
            index,
            columns,
            shard,
            range,
            directory: services.directory,
            scans: services.scans,
            executor: services.executor,
            metrics: services.metrics,
            scratch: BytesMut::with_capacity(config.scratch_capacity),
            config,
            handle: Some(handle),
            state: CursorState::Initialized,
            batch: Vec::new(),
            next_entry: 0,
            search_row: None,
            resolved: None,
            point_query: None,
        })
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Shard-clamped range being scanned.
    pub fn range(&self) -> &ScanRange {
        &self.range
    }

    pub fn shard(&self) -> &ShardDescriptor {
        &self.shard
    }

    /// Advances to the next index entry. Returns `false` once the range is
    /// consumed; the scan handle is released at that point.
    pub async fn next(&mut self) -> Result<bool> {
        self.search_row = None;
        self.resolved = None;
        let Some(handle) = self.handle else {
            return Ok(false);
        };
        self.state = CursorState::Scanning;

        if self.next_entry >= self.batch.len() {
            let fetched = self
                .scans
                .fetch(
                    self.shard.endpoint,
                    self.shard.shard_id,
                    handle,
                    self.config.fetch_size,
                )
                .await;
            let batch = match fetched {
                Ok(batch) => batch,
                Err(err) => {
                    self.release().await;
                    self.state = CursorState::Closed;
                    return Err(err.context(format!(
                        "fetch from scan handle {} on shard {} at {}",
                        handle, self.shard.shard_id, self.shard.endpoint
                    )));
                }
            };
            if let Some(metrics) = &self.metrics {
                metrics.record_batch(batch.len());
            }
            if batch.is_empty() {
                self.release().await;
                self.batch.clear();
                self.next_entry = 0;
                self.state = CursorState::Exhausted;
                debug!(
                    shard_id = self.shard.shard_id,
                    handle = handle.0,
                    "index scan exhausted"
                );
                return Ok(false);
            }
            self.batch = batch;
            self.next_entry = 0;
        }

        let entry = self.next_entry;
        self.next_entry += 1;
        match self.decode_entry(entry) {
            Ok(search_row) => {
                self.search_row = Some(search_row);
                self.state = CursorState::Positioned;
                Ok(true)
            }
            Err(err) => {
                // A bad entry ends the scan; it is never skipped.
                self.release().await;
                self.batch.clear();
                self.next_entry = 0;
                self.state = CursorState::Closed;
                Err(err)
            }
        }
    }

    fn decode_entry(&mut self, entry: usize) -> Result<SearchRow> {
        let key = &self
            .batch
            .get(entry)
            .ok_or_else(|| anyhow!("batch has no entry {entry}"))?
            .key;
        let capacity = self.config.scratch_capacity;
        if key.len() > capacity {
            return Err(IndexKeyTooLarge {
                key_len: key.len(),
                capacity,
            }
            .into());
        }
        self.scratch.clear();
        self.scratch.extend_from_slice(key);
        decode_search_row(&self.index, &self.scratch).with_context(|| {
            format!(
                "decode entry {} of index '{}'",
                hex::encode(&self.scratch),
                self.index.index_name
            )
        })
    }

    /// Resolves the current entry into its primary row. Repeated calls at the
    /// same position return the cached row.
    pub async fn get(&mut self) -> Result<&ResolvedRow> {
        if self.resolved.is_none() {
            let row = self.resolve().await?;
            self.resolved = Some(row);
        }
        self.resolved
            .as_ref()
            .ok_or_else(|| anyhow!("resolved row missing after lookup"))
    }

    async fn resolve(&mut self) -> Result<ResolvedRow> {
        let primary_key = self
            .search_row
            .as_ref()
            .map(|row| row.primary_key)
            .ok_or_else(|| anyhow!("cursor is not positioned on an index entry"))?;

        if self.point_query.is_none() {
            self.point_query = Some(PointQuery::build(&self.index, self.columns.as_deref())?);
        }
        let query = self
            .point_query
            .as_ref()
            .ok_or_else(|| anyhow!("point query not prepared"))?;

        let values = self
            .executor
            .query_one(query, ScalarValue::Int64(Some(primary_key)))
            .await
            .with_context(|| format!("point query `{}` for key {primary_key}", query.text))?;
        if let Some(metrics) = &self.metrics {
            metrics.record_point_lookup(values.is_some());
        }
        let Some(values) = values else {
            return Err(DanglingIndexEntry {
                index_name: self.index.index_name.clone(),
                table_name: self.index.table_name.clone(),
                primary_key,
            }
            .into());
        };
        if values.len() != query.columns.len() {
            return Err(anyhow!(
                "point query `{}` returned {} values for {} columns",
                query.text,
                values.len(),
                query.columns.len()
            ));
        }

        let row_key = encode_primary_row_key(self.index.table_id, primary_key);
        let row_shard = self.directory.locate_key(&row_key).await.with_context(|| {
            format!(
                "locate shard of row {primary_key} in table '{}'",
                self.index.table_name
            )
        })?;
        let cells = query
            .columns
            .iter()
            .map(|column| CellRef {
                row_key: row_key.clone(),
                family: column.family.clone(),
                qualifier: column.name.clone(),
            })
            .collect();
        Ok(ResolvedRow {
            shard_id: row_shard.shard_id,
            primary_key,
            row_key,
            values,
            cells,
        })
    }

    /// Entry decoded by the last successful `next`.
    pub fn search_row(&self) -> Option<&SearchRow> {
        self.search_row.as_ref()
    }

    /// Backward iteration is not supported.
    pub fn previous(&mut self) -> bool {
        false
    }

    /// Releases the scan handle if still held. Safe to call repeatedly.
    pub async fn close(&mut self) {
        self.release().await;
        self.batch.clear();
        self.next_entry = 0;
        self.search_row = None;
        self.resolved = None;
        self.state = CursorState::Closed;
    }

    /// Best-effort release; failures are logged and counted only.
    async fn release(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let result = self.scans.close_scan(self.shard.endpoint, handle).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_release(result.is_ok());
        }
        match result {
            Ok(()) => debug!(
                shard_id = self.shard.shard_id,
                handle = handle.0,
                "released scan handle"
            ),
            Err(err) => warn!(
                shard_id = self.shard.shard_id,
                handle = handle.0,
                endpoint = %self.shard.endpoint,
                error = ?err,
                "failed to release scan handle"
            ),
        }
    }
}

impl Drop for IndexScanCursor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            warn!(
                shard_id = self.shard.shard_id,
                handle = handle.0,
                endpoint = %self.shard.endpoint,
                "index scan cursor dropped without releasing its scan handle"
            );
        }
    }
}
