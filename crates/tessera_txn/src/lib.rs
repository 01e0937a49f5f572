//! Cross-shard transaction identity and the commit ledger.
//!
//! A root transaction fans out into per-shard participants. On commit the
//! coordinator writes one ledger record per participant; readers treat the
//! transaction as committed only when every participant record is present.

mod descriptor;
mod ledger;
mod record;

pub use descriptor::{CommitRole, ParticipantId, TransactionDescriptor};
pub use ledger::{CommitLedger, Visibility};
pub use record::{
    CommitRecord, COLUMN_COMMIT_TIMESTAMP, COLUMN_IS_NESTED, COLUMN_PARTICIPANTS,
};
