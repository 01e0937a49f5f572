use anyhow::{anyhow, Context};
use tessera_store::Cells;

use crate::descriptor::ParticipantId;

/// Comma-joined row keys of every participant of the root transaction.
pub const COLUMN_PARTICIPANTS: &str = "participants";
/// Big-endian `i64` commit timestamp.
pub const COLUMN_COMMIT_TIMESTAMP: &str = "commitTimestamp";
/// One-byte nested flag.
pub const COLUMN_IS_NESTED: &str = "isNested";

/// Decoded ledger row for one participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRecord {
    pub participants: Vec<ParticipantId>,
    pub commit_timestamp: i64,
    pub nested: bool,
}

impl CommitRecord {
    pub fn participants_column(participants: &[ParticipantId]) -> anyhow::Result<String> {
        let mut out = String::new();
        for participant in participants {
            participant.validate()?;
            if !out.is_empty() {
                out.push(',');
            }
            out.push_str(&participant.row_key());
        }
        Ok(out)
    }

    pub fn to_cells(&self) -> anyhow::Result<Cells> {
        let mut cells = Cells::new();
        cells.insert(
            COLUMN_PARTICIPANTS.to_string(),
            Self::participants_column(&self.participants)?.into_bytes(),
        );
        cells.insert(
            COLUMN_COMMIT_TIMESTAMP.to_string(),
            self.commit_timestamp.to_be_bytes().to_vec(),
        );
        cells.insert(COLUMN_IS_NESTED.to_string(), vec![u8::from(self.nested)]);
        Ok(cells)
    }

    pub fn from_cells(cells: &Cells) -> anyhow::Result<Self> {
        let raw_participants = cells
            .get(COLUMN_PARTICIPANTS)
            .ok_or_else(|| anyhow!("commit record missing '{COLUMN_PARTICIPANTS}'"))?;
        let raw_participants = std::str::from_utf8(raw_participants)
            .context("commit record participants are not utf-8")?;
        if raw_participants.is_empty() {
            return Err(anyhow!("commit record has an empty participant list"));
        }
        let participants = raw_participants
            .split(',')
            .map(str::parse::<ParticipantId>)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let raw_ts = cells
            .get(COLUMN_COMMIT_TIMESTAMP)
            .ok_or_else(|| anyhow!("commit record missing '{COLUMN_COMMIT_TIMESTAMP}'"))?;
        let ts_bytes: [u8; 8] = raw_ts.as_slice().try_into().map_err(|_| {
            anyhow!(
                "commit record '{COLUMN_COMMIT_TIMESTAMP}' has {} bytes, expected 8",
                raw_ts.len()
            )
        })?;

        // Records written before the flag existed decode as not nested.
        let nested = match cells.get(COLUMN_IS_NESTED) {
            Some(raw) if raw.len() == 1 => raw[0] != 0,
            Some(raw) => {
                return Err(anyhow!(
                    "commit record '{COLUMN_IS_NESTED}' has {} bytes, expected 1",
                    raw.len()
                ))
            }
            None => false,
        };

        Ok(Self {
            participants,
            commit_timestamp: i64::from_be_bytes(ts_bytes),
            nested,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_follow_ledger_layout() {
        let record = CommitRecord {
            participants: vec![ParticipantId::new("a", 100), ParticipantId::new("b", 101)],
            commit_timestamp: -5,
            nested: true,
        };
        let cells = record.to_cells().expect("encode");
        assert_eq!(cells[COLUMN_PARTICIPANTS], b"a:100,b:101".to_vec());
        assert_eq!(cells[COLUMN_COMMIT_TIMESTAMP], (-5i64).to_be_bytes().to_vec());
        assert_eq!(cells[COLUMN_IS_NESTED], vec![1u8]);
        assert_eq!(CommitRecord::from_cells(&cells).expect("decode"), record);
    }

    #[test]
    fn comma_in_host_is_rejected() {
        let err = CommitRecord::participants_column(&[ParticipantId::new("a,b", 1)])
            .expect_err("comma host");
        assert!(err.to_string().contains("must not contain ','"));
    }

    #[test]
    fn short_timestamp_is_corruption() {
        let mut cells = Cells::new();
        cells.insert(COLUMN_PARTICIPANTS.to_string(), b"a:1".to_vec());
        cells.insert(COLUMN_COMMIT_TIMESTAMP.to_string(), vec![0, 1]);
        let err = CommitRecord::from_cells(&cells).expect_err("short timestamp");
        assert!(err.to_string().contains("expected 8"));
    }
}
