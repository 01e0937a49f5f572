use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

/// Ledger identity of one participant: the coordinator host and the
/// transaction id it assigned.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId {
    pub host: String,
    pub txn_id: u64,
}

impl ParticipantId {
    pub fn new(host: impl Into<String>, txn_id: u64) -> Self {
        Self {
            host: host.into(),
            txn_id,
        }
    }

    /// Ledger row key, `"<host>:<txn_id>"`.
    pub fn row_key(&self) -> String {
        self.to_string()
    }

    /// Hosts end up inside a comma-joined list and a `host:id` key, so they
    /// must be non-empty and comma free.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("participant {} has an empty host", self.txn_id));
        }
        if self.host.contains(',') {
            return Err(anyhow!(
                "participant host '{}' must not contain ','",
                self.host
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.txn_id)
    }
}

impl FromStr for ParticipantId {
    type Err = anyhow::Error;

    // Split on the last ':' so `host:port:txn` keys keep the port in the host.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (host, txn_id) = raw
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("participant key '{raw}' has no ':' separator"))?;
        if host.is_empty() {
            return Err(anyhow!("participant key '{raw}' has an empty host"));
        }
        let txn_id = txn_id
            .parse::<u64>()
            .map_err(|err| anyhow!("participant key '{raw}' has invalid txn id: {err}"))?;
        Ok(Self::new(host, txn_id))
    }
}

/// Whether the descriptor handed to the ledger is itself a participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitRole {
    /// The descriptor ran shard-local work and gets its own record.
    Root,
    /// The descriptor is already represented by another record; only its
    /// children are written.
    Delegate,
}

/// One participant of a (possibly cross-shard) transaction.
///
/// The participant tree grows while the transaction runs and is frozen by
/// [`TransactionDescriptor::commit`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionDescriptor {
    id: ParticipantId,
    nested: bool,
    commit_timestamp: i64,
    committed: bool,
    children: BTreeMap<ParticipantId, TransactionDescriptor>,
}

impl TransactionDescriptor {
    pub fn new(host: impl Into<String>, txn_id: u64) -> Self {
        Self {
            id: ParticipantId::new(host, txn_id),
            nested: false,
            commit_timestamp: 0,
            committed: false,
            children: BTreeMap::new(),
        }
    }

    pub fn with_nested(mut self, nested: bool) -> Self {
        self.nested = nested;
        self
    }

    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.id.host
    }

    pub fn txn_id(&self) -> u64 {
        self.id.txn_id
    }

    pub fn is_nested(&self) -> bool {
        self.nested
    }

    pub fn commit_timestamp(&self) -> i64 {
        self.commit_timestamp
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn children(&self) -> impl Iterator<Item = &TransactionDescriptor> {
        self.children.values()
    }

    /// Registers another participant of the same root transaction. Adding an
    /// identity that is already present keeps the first registration.
    pub fn add_child(&mut self, child: TransactionDescriptor) -> anyhow::Result<()> {
        if self.committed {
            return Err(anyhow!(
                "cannot add participant {} to committed transaction {}",
                child.id,
                self.id
            ));
        }
        self.children.entry(child.id.clone()).or_insert(child);
        Ok(())
    }

    pub fn commit(&mut self, commit_timestamp: i64) -> anyhow::Result<()> {
        if self.committed {
            return Err(anyhow!("transaction {} is already committed", self.id));
        }
        self.commit_timestamp = commit_timestamp;
        self.committed = true;
        Ok(())
    }

    /// Flattens the participant tree into a set keyed by identity.
    pub fn participants(&self, role: CommitRole) -> BTreeMap<ParticipantId, &TransactionDescriptor> {
        let mut out = BTreeMap::new();
        if role == CommitRole::Root {
            out.insert(self.id.clone(), self);
        }
        let mut pending: Vec<&TransactionDescriptor> = self.children.values().collect();
        while let Some(next) = pending.pop() {
            if out.contains_key(&next.id) {
                continue;
            }
            out.insert(next.id.clone(), next);
            pending.extend(next.children.values());
        }
        out
    }
}
