//! Operator-facing snapshot of spool state.

use std::path::PathBuf;

use serde::Serialize;

use super::error::Corruption;
use crate::types::Digest;

/// Whether the spool accepts appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpoolMode {
    Active,
    /// Corrupt, or a hard cap is reached. Appends will fail.
    ReadOnly,
}

/// How the derived state was rebuilt at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySource {
    /// A trusted meta snapshot.
    Meta,
    /// A full scan of an existing file.
    Scan,
    /// No file existed.
    Fresh,
}

/// Point-in-time view of a spool for operator tooling.
///
/// Not meant for control flow: it is stale as soon as it is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpoolDiagnostics {
    pub mode: SpoolMode,
    pub entries_reached: bool,
    pub bytes_reached: bool,
    pub spool_corrupt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corruption: Option<Corruption>,
    pub entry_count: u64,
    pub max_entries: u64,
    pub file_bytes: u64,
    pub max_file_bytes: u64,
    pub max_line_bytes: usize,
    pub sequence: u64,
    pub head_digest: Digest,
    pub file_path: PathBuf,
    pub dirty: bool,
    pub closed: bool,
    pub recovery: RecoverySource,
    pub truncated_bytes: u64,
}

impl SpoolDiagnostics {
    pub fn is_read_only(&self) -> bool {
        self.mode == SpoolMode::ReadOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spool::CorruptionReason;

    #[test]
    fn serializes_operator_field_names() {
        let diag = SpoolDiagnostics {
            mode: SpoolMode::ReadOnly,
            entries_reached: false,
            bytes_reached: false,
            spool_corrupt: true,
            corruption: Some(Corruption {
                reason: CorruptionReason::ChainBroken,
                line: 3,
                offset: 120,
                sequence: Some(3),
                detail: "mismatch".into(),
            }),
            entry_count: 2,
            max_entries: 10,
            file_bytes: 120,
            max_file_bytes: 1000,
            max_line_bytes: 100,
            sequence: 2,
            head_digest: Digest::new("sha256:ab"),
            file_path: PathBuf::from("/d/spool.jsonl"),
            dirty: false,
            closed: false,
            recovery: RecoverySource::Scan,
            truncated_bytes: 0,
        };
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["mode"], "read_only");
        assert_eq!(json["spoolCorrupt"], true);
        assert_eq!(json["corruption"]["reason"], "CHAIN_BROKEN");
        assert_eq!(json["filePath"], "/d/spool.jsonl");
        assert_eq!(json["recovery"], "scan");
    }
}
