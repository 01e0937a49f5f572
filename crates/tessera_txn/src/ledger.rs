use std::sync::Arc;

use anyhow::Context;
use tessera_store::VersionedTable;
use tracing::debug;

use crate::descriptor::{CommitRole, ParticipantId, TransactionDescriptor};
use crate::record::CommitRecord;

/// Read-time verdict for one participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Visible { commit_timestamp: i64 },
    NotVisible,
}

impl Visibility {
    pub fn is_visible(&self) -> bool {
        matches!(self, Visibility::Visible { .. })
    }

    pub fn commit_timestamp(&self) -> Option<i64> {
        match self {
            Visibility::Visible { commit_timestamp } => Some(*commit_timestamp),
            Visibility::NotVisible => None,
        }
    }
}

/// Durable per-participant commit table.
///
/// Participant records are written one at a time, so a crash can leave a
/// partial set behind. Readers compensate: a transaction is visible only when
/// the record of every listed participant exists. One instance is shared by
/// every reader and writer on a node; it keeps no state besides the table
/// handle, so each query observes the table directly.
#[derive(Clone)]
pub struct CommitLedger {
    table: Arc<dyn VersionedTable>,
}

impl CommitLedger {
    pub fn new(table: Arc<dyn VersionedTable>) -> Self {
        Self { table }
    }

    /// Writes one commit record per participant of `root`. Every record
    /// carries the same participant list; each is versioned by its own
    /// transaction id.
    pub async fn record_commit(
        &self,
        root: &TransactionDescriptor,
        role: CommitRole,
    ) -> anyhow::Result<()> {
        let participants = root.participants(role);
        if participants.is_empty() {
            return Ok(());
        }
        let ids: Vec<ParticipantId> = participants.keys().cloned().collect();

        for (id, participant) in &participants {
            let record = CommitRecord {
                participants: ids.clone(),
                commit_timestamp: participant.commit_timestamp(),
                nested: participant.is_nested(),
            };
            let cells = record.to_cells()?;
            self.table
                .put(id.row_key().as_bytes(), id.txn_id, cells)
                .await
                .with_context(|| format!("write commit record for participant {id}"))?;
        }

        debug!(
            root = %root.id(),
            participants = ids.len(),
            "recorded cross-shard commit"
        );
        Ok(())
    }

    /// Decides whether `txn_id` issued by `host` is committed everywhere.
    ///
    /// Reads this participant's record at version `txn_id`, then checks that a
    /// record exists for every other listed participant. The first missing
    /// participant ends the check.
    pub async fn query_visibility(&self, host: &str, txn_id: u64) -> anyhow::Result<Visibility> {
        let id = ParticipantId::new(host, txn_id);
        let row_key = id.row_key();
        let Some(cells) = self
            .table
            .get_at(row_key.as_bytes(), txn_id)
            .await
            .with_context(|| format!("read commit record {row_key}"))?
        else {
            return Ok(Visibility::NotVisible);
        };
        let record = CommitRecord::from_cells(&cells)
            .with_context(|| format!("decode commit record {row_key}"))?;

        for other in &record.participants {
            if *other == id {
                continue;
            }
            let other_key = other.row_key();
            let present = self
                .table
                .get_latest(other_key.as_bytes())
                .await
                .with_context(|| format!("read commit record {other_key}"))?
                .is_some();
            if !present {
                debug!(
                    txn_id,
                    host,
                    missing = %other,
                    "commit incomplete; participant record missing"
                );
                return Ok(Visibility::NotVisible);
            }
        }

        Ok(Visibility::Visible {
            commit_timestamp: record.commit_timestamp,
        })
    }

    /// Snapshot check: committed everywhere and at or before `read_timestamp`.
    pub async fn is_visible_at(
        &self,
        participant: &ParticipantId,
        read_timestamp: i64,
    ) -> anyhow::Result<bool> {
        let visibility = self
            .query_visibility(&participant.host, participant.txn_id)
            .await?;
        Ok(visibility
            .commit_timestamp()
            .is_some_and(|commit_timestamp| commit_timestamp <= read_timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tessera_store::{Cells, MemoryTable, Version};

    fn committed(host: &str, txn_id: u64, commit_timestamp: i64) -> TransactionDescriptor {
        let mut descriptor = TransactionDescriptor::new(host, txn_id);
        descriptor.commit(commit_timestamp).expect("commit");
        descriptor
    }

    /// Root 100 on A with children 101 on B and 102 on C.
    fn three_shard_root() -> TransactionDescriptor {
        let mut root = TransactionDescriptor::new("A", 100);
        root.add_child(committed("B", 101, 100)).expect("add child");
        root.add_child(committed("C", 102, 100)).expect("add child");
        root.commit(100).expect("commit root");
        root
    }

    #[tokio::test]
    async fn full_participant_set_is_visible() {
        let ledger = CommitLedger::new(Arc::new(MemoryTable::new()));
        ledger
            .record_commit(&three_shard_root(), CommitRole::Root)
            .await
            .expect("record");

        for (host, txn_id) in [("A", 100), ("B", 101), ("C", 102)] {
            let visibility = ledger.query_visibility(host, txn_id).await.expect("query");
            assert_eq!(visibility.commit_timestamp(), Some(100), "{host}:{txn_id}");
        }
    }

    #[tokio::test]
    async fn one_missing_participant_hides_every_participant() {
        let table = Arc::new(MemoryTable::new());
        let ledger = CommitLedger::new(table.clone());
        ledger
            .record_commit(&three_shard_root(), CommitRole::Root)
            .await
            .expect("record");

        table.delete_row(b"C:102").await.expect("delete");

        assert_eq!(
            ledger.query_visibility("A", 100).await.expect("query"),
            Visibility::NotVisible
        );
        assert_eq!(
            ledger.query_visibility("B", 101).await.expect("query"),
            Visibility::NotVisible
        );
        assert_eq!(
            ledger.query_visibility("C", 102).await.expect("query"),
            Visibility::NotVisible
        );
    }

    #[tokio::test]
    async fn unknown_transaction_is_not_visible() {
        let ledger = CommitLedger::new(Arc::new(MemoryTable::new()));
        assert_eq!(
            ledger.query_visibility("A", 7).await.expect("query"),
            Visibility::NotVisible
        );
    }

    #[tokio::test]
    async fn record_is_read_at_the_transaction_version_only() {
        let table = Arc::new(MemoryTable::new());
        let ledger = CommitLedger::new(table.clone());
        let record = CommitRecord {
            participants: vec![ParticipantId::new("A", 100)],
            commit_timestamp: 9,
            nested: false,
        };
        table
            .put(b"A:100", 99, record.to_cells().expect("cells"))
            .await
            .expect("put");
        assert_eq!(
            ledger.query_visibility("A", 100).await.expect("query"),
            Visibility::NotVisible
        );
    }

    #[tokio::test]
    async fn recording_twice_keeps_one_participant_list() {
        let table = Arc::new(MemoryTable::new());
        let ledger = CommitLedger::new(table.clone());
        let mut root = TransactionDescriptor::new("A", 100);
        root.add_child(committed("B", 101, 100)).expect("add child");
        root.add_child(committed("B", 101, 100)).expect("add duplicate");
        root.add_child(committed("C", 102, 100)).expect("add child");
        root.commit(100).expect("commit root");

        ledger.record_commit(&root, CommitRole::Root).await.expect("record");
        ledger.record_commit(&root, CommitRole::Root).await.expect("record");

        let (version, cells) = table
            .get_latest(b"B:101")
            .await
            .expect("latest")
            .expect("record exists");
        assert_eq!(version, 101);
        assert_eq!(table.version_count(b"B:101"), 1);
        let record = CommitRecord::from_cells(&cells).expect("decode");
        let keys: Vec<String> = record.participants.iter().map(ParticipantId::row_key).collect();
        assert_eq!(keys, vec!["A:100", "B:101", "C:102"]);
    }

    #[tokio::test]
    async fn delegate_root_writes_only_children() {
        let table = Arc::new(MemoryTable::new());
        let ledger = CommitLedger::new(table.clone());
        ledger
            .record_commit(&three_shard_root(), CommitRole::Delegate)
            .await
            .expect("record");

        assert!(table.get_latest(b"A:100").await.expect("latest").is_none());
        assert_eq!(
            ledger.query_visibility("B", 101).await.expect("query"),
            Visibility::Visible {
                commit_timestamp: 100
            }
        );
    }

    #[tokio::test]
    async fn nested_flag_is_stored_but_does_not_affect_visibility() {
        let table = Arc::new(MemoryTable::new());
        let ledger = CommitLedger::new(table.clone());
        let mut root = TransactionDescriptor::new("A", 300).with_nested(true);
        root.commit(310).expect("commit");
        ledger.record_commit(&root, CommitRole::Root).await.expect("record");

        let cells = table.get_at(b"A:300", 300).await.expect("get").expect("row");
        assert!(CommitRecord::from_cells(&cells).expect("decode").nested);
        assert!(ledger
            .is_visible_at(&ParticipantId::new("A", 300), 310)
            .await
            .expect("visible"));
        assert!(!ledger
            .is_visible_at(&ParticipantId::new("A", 300), 309)
            .await
            .expect("visible"));
    }

    #[tokio::test]
    async fn corrupt_record_is_an_error() {
        let table = Arc::new(MemoryTable::new());
        let ledger = CommitLedger::new(table.clone());
        let mut cells = Cells::new();
        cells.insert("participants".to_string(), b"A:1,???".to_vec());
        cells.insert("commitTimestamp".to_string(), 1i64.to_be_bytes().to_vec());
        table.put(b"A:1", 1, cells).await.expect("put");

        let err = ledger.query_visibility("A", 1).await.expect_err("corrupt");
        assert!(format!("{err:#}").contains("decode commit record A:1"));
    }

    struct FailingTable;

    #[async_trait]
    impl VersionedTable for FailingTable {
        async fn put(&self, _row: &[u8], _version: Version, _cells: Cells) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("region server unavailable"))
        }

        async fn get_at(&self, _row: &[u8], _version: Version) -> anyhow::Result<Option<Cells>> {
            Err(anyhow::anyhow!("region server unavailable"))
        }

        async fn get_latest(&self, _row: &[u8]) -> anyhow::Result<Option<(Version, Cells)>> {
            Err(anyhow::anyhow!("region server unavailable"))
        }

        async fn delete_row(&self, _row: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn store_failures_propagate() {
        let ledger = CommitLedger::new(Arc::new(FailingTable));
        let err = ledger
            .record_commit(&three_shard_root(), CommitRole::Root)
            .await
            .expect_err("write failure");
        assert!(format!("{err:#}").contains("region server unavailable"));
        assert!(ledger.query_visibility("A", 100).await.is_err());
    }
}
