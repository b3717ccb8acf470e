//! Full-scan crash recovery for the spool file.
//!
//! The scan walks every line with the bounded reader and re-verifies the
//! hash chain from the genesis digest. Failures are classified as:
//!
//! | Finding                                   | Outcome                          |
//! |-------------------------------------------|----------------------------------|
//! | unterminated, unparsable final line       | truncated at its start offset    |
//! | unterminated but valid final line         | accepted, terminator appended    |
//! | unparsable line before the final one      | corrupt, `MALFORMED_JSON`        |
//! | broken linkage or sequence gap            | corrupt, `CHAIN_BROKEN`          |
//! | line longer than the per-line cap         | corrupt, `LINE_TOO_LARGE`        |
//!
//! Only the torn final line is ever repaired. Dropping anything earlier could
//! hide tampering, so the scan stops at the first mid-file anomaly and
//! leaves the file untouched.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use tracing::{info, warn};

use super::error::{Corruption, CorruptionReason, Result};
use crate::persistence::{BoundedLines, LineRead, RawLine, fsync_file};
use crate::types::{Digest, SpoolEntry};

/// Derived state recovered by a full scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Sequence of the last valid entry (0 when empty).
    pub sequence: u64,
    /// Digest of the last valid entry, or genesis.
    pub head_digest: Digest,
    /// Number of valid entries.
    pub entry_count: u64,
    /// File length after any tail repair.
    pub file_bytes: u64,
    /// First corruption found, if any. Scanning stopped there.
    pub corruption: Option<Corruption>,
    /// Bytes removed by torn-tail truncation.
    pub truncated_bytes: u64,
}

impl ScanOutcome {
    fn empty() -> Self {
        ScanOutcome {
            sequence: 0,
            head_digest: Digest::genesis(),
            entry_count: 0,
            file_bytes: 0,
            corruption: None,
            truncated_bytes: 0,
        }
    }
}

/// Running chain tip while scanning.
struct ChainTip {
    sequence: u64,
    head: Digest,
    count: u64,
}

impl ChainTip {
    fn link(&mut self, entry: &SpoolEntry, line: &RawLine) -> std::result::Result<(), Corruption> {
        let broken = |detail: String| Corruption {
            reason: CorruptionReason::ChainBroken,
            line: line.number,
            offset: line.offset,
            sequence: Some(entry.sequence),
            detail,
        };

        if entry.prev_entry_digest != self.head {
            return Err(broken(format!(
                "prev_entry_digest {} does not match head {}",
                entry.prev_entry_digest, self.head
            )));
        }
        if entry.sequence != self.sequence + 1 {
            return Err(broken(format!(
                "sequence {} does not follow {}",
                entry.sequence, self.sequence
            )));
        }

        self.sequence = entry.sequence;
        self.head = entry.entry_digest.clone();
        self.count += 1;
        Ok(())
    }
}

fn malformed(line: &RawLine, e: &serde_json::Error) -> Corruption {
    Corruption {
        reason: CorruptionReason::MalformedJson,
        line: line.number,
        offset: line.offset,
        sequence: None,
        detail: e.to_string(),
    }
}

/// Scans `path`, repairing a torn final line in place.
///
/// A missing file scans as empty.
///
/// # Errors
///
/// Returns an error only for IO failures. Corruption is reported in the
/// outcome, not as an error, so the store can still open read-only.
pub fn scan_spool(path: &Path, max_line_bytes: usize) -> Result<ScanOutcome> {
    let file_len = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ScanOutcome::empty()),
        Err(e) => return Err(e.into()),
    };

    let mut tip = ChainTip {
        sequence: 0,
        head: Digest::genesis(),
        count: 0,
    };
    let mut corruption = None;
    let mut truncate_at = None;
    let mut needs_terminator = false;

    for item in BoundedLines::open(path, max_line_bytes)? {
        match item? {
            LineRead::TooLarge {
                number,
                offset,
                buffered,
                ..
            } => {
                corruption = Some(Corruption {
                    reason: CorruptionReason::LineTooLarge,
                    line: number,
                    offset,
                    sequence: None,
                    detail: format!(
                        "line exceeds {max_line_bytes} bytes ({buffered} buffered before stopping)"
                    ),
                });
                break;
            }
            LineRead::Complete(line) => {
                if line.is_blank() {
                    continue;
                }
                match serde_json::from_slice::<SpoolEntry>(&line.bytes) {
                    Ok(entry) => {
                        if let Err(c) = tip.link(&entry, &line) {
                            corruption = Some(c);
                            break;
                        }
                    }
                    Err(e) => {
                        corruption = Some(malformed(&line, &e));
                        break;
                    }
                }
            }
            LineRead::IncompleteTail(line) => {
                if line.is_blank() {
                    truncate_at = Some(line.offset);
                    break;
                }
                match serde_json::from_slice::<SpoolEntry>(&line.bytes) {
                    Ok(entry) => match tip.link(&entry, &line) {
                        Ok(()) => needs_terminator = true,
                        Err(c) => corruption = Some(c),
                    },
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            line = line.number,
                            offset = line.offset,
                            error = %e,
                            "Truncating torn tail from spool"
                        );
                        truncate_at = Some(line.offset);
                    }
                }
            }
        }
    }

    let mut outcome = ScanOutcome {
        sequence: tip.sequence,
        head_digest: tip.head,
        entry_count: tip.count,
        file_bytes: file_len,
        corruption,
        truncated_bytes: 0,
    };

    if let Some(offset) = truncate_at {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(offset)?;
        fsync_file(&file)?;
        outcome.truncated_bytes = file_len - offset;
        outcome.file_bytes = offset;
    }

    if needs_terminator {
        let mut file = OpenOptions::new().append(true).open(path)?;
        file.write_all(b"\n")?;
        fsync_file(&file)?;
        outcome.file_bytes += 1;
        info!(
            path = %path.display(),
            sequence = outcome.sequence,
            "Terminated valid unterminated spool tail"
        );
    }

    if let Some(c) = &outcome.corruption {
        warn!(
            path = %path.display(),
            reason = %c.reason,
            line = c.line,
            sequence = ?c.sequence,
            detail = %c.detail,
            "Spool corrupt; opening read-only"
        );
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{build_chain, write_entries};
    use proptest::prelude::*;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    #[test]
    fn missing_file_scans_empty() {
        let dir = tempdir().unwrap();
        let outcome = scan_spool(&dir.path().join("spool.jsonl"), 1024).unwrap();
        assert_eq!(outcome.sequence, 0);
        assert!(outcome.head_digest.is_genesis());
        assert!(outcome.corruption.is_none());
    }

    #[test]
    fn valid_chain_recovers_head() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let entries = build_chain(&["a1", "a2", "a3"]);
        write_entries(&path, &entries);

        let outcome = scan_spool(&path, 4096).unwrap();
        assert_eq!(outcome.sequence, 3);
        assert_eq!(outcome.entry_count, 3);
        assert_eq!(outcome.head_digest, entries[2].entry_digest);
        assert_eq!(outcome.file_bytes, std::fs::metadata(&path).unwrap().len());
        assert!(outcome.corruption.is_none());
    }

    #[test]
    fn torn_tail_is_truncated_at_line_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let entries = build_chain(&["a1", "a2"]);
        write_entries(&path, &entries);
        let valid_len = std::fs::metadata(&path).unwrap().len();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"sequence":3,"prev_entry_digest":"sha2"#).unwrap();
        drop(file);

        let outcome = scan_spool(&path, 4096).unwrap();
        assert!(outcome.corruption.is_none());
        assert_eq!(outcome.sequence, 2);
        assert_eq!(outcome.file_bytes, valid_len);
        assert!(outcome.truncated_bytes > 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), valid_len);
    }

    #[test]
    fn valid_unterminated_tail_gets_terminator() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let entries = build_chain(&["a1", "a2"]);
        write_entries(&path, &entries[..1]);
        let mut line = entries[1].to_line().unwrap();
        line.pop();
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(&line)
            .unwrap();

        let outcome = scan_spool(&path, 4096).unwrap();
        assert_eq!(outcome.sequence, 2);
        let content = std::fs::read(&path).unwrap();
        assert_eq!(content.last(), Some(&b'\n'));
        assert_eq!(outcome.file_bytes, content.len() as u64);
    }

    #[test]
    fn malformed_mid_file_line_is_corrupt_and_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let entries = build_chain(&["a1", "a2", "a3"]);
        write_entries(&path, &entries[..1]);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{not json}\n").unwrap();
        drop(file);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&entries[1].to_line().unwrap()).unwrap();
        drop(file);
        let before = std::fs::read(&path).unwrap();

        let outcome = scan_spool(&path, 4096).unwrap();
        let corruption = outcome.corruption.unwrap();
        assert_eq!(corruption.reason, CorruptionReason::MalformedJson);
        assert_eq!(corruption.line, 2);
        assert_eq!(outcome.sequence, 1);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn terminated_garbage_as_last_line_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        write_entries(&path, &build_chain(&["a1"]));
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"garbage\n")
            .unwrap();

        let outcome = scan_spool(&path, 4096).unwrap();
        assert_eq!(
            outcome.corruption.map(|c| c.reason),
            Some(CorruptionReason::MalformedJson)
        );
    }

    #[test]
    fn wrong_link_is_chain_broken_at_that_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let mut entries = build_chain(&["a1", "a2", "a3"]);
        entries[1].prev_entry_digest = Digest::new("sha256:forged");
        write_entries(&path, &entries);

        let outcome = scan_spool(&path, 4096).unwrap();
        let corruption = outcome.corruption.unwrap();
        assert_eq!(corruption.reason, CorruptionReason::ChainBroken);
        assert_eq!(corruption.sequence, Some(2));
        assert_eq!(outcome.sequence, 1);
        assert_eq!(outcome.head_digest, entries[0].entry_digest);
    }

    #[test]
    fn sequence_gap_is_chain_broken() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let mut entries = build_chain(&["a1", "a2"]);
        entries[1].sequence = 5;
        write_entries(&path, &entries);

        let outcome = scan_spool(&path, 4096).unwrap();
        assert_eq!(
            outcome.corruption.map(|c| c.reason),
            Some(CorruptionReason::ChainBroken)
        );
    }

    #[test]
    fn oversized_line_is_line_too_large() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        write_entries(&path, &build_chain(&["a1"]));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&vec![b'x'; 10_000]).unwrap();
        file.write_all(b"\n").unwrap();
        drop(file);

        let outcome = scan_spool(&path, 1024).unwrap();
        let corruption = outcome.corruption.unwrap();
        assert_eq!(corruption.reason, CorruptionReason::LineTooLarge);
        assert_eq!(corruption.line, 2);
        assert_eq!(outcome.sequence, 1);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let entries = build_chain(&["a1", "a2"]);
        write_entries(&path, &entries[..1]);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"\n\n").unwrap();
        file.write_all(&entries[1].to_line().unwrap()).unwrap();
        drop(file);

        let outcome = scan_spool(&path, 4096).unwrap();
        assert!(outcome.corruption.is_none());
        assert_eq!(outcome.sequence, 2);
    }

    proptest! {
        /// Cutting the file at any byte recovers a valid prefix and never
        /// reports corruption.
        #[test]
        fn crash_at_any_offset_recovers_prefix(
            count in 1usize..8,
            cut_ratio in 0.0f64..1.0,
        ) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("spool.jsonl");
            let ids: Vec<String> = (1..=count).map(|i| format!("a{i}")).collect();
            let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let entries = build_chain(&id_refs);
            write_entries(&path, &entries);

            let len = std::fs::metadata(&path).unwrap().len();
            let cut = (len as f64 * cut_ratio) as u64;
            OpenOptions::new().write(true).open(&path).unwrap().set_len(cut).unwrap();

            let outcome = scan_spool(&path, 4096).unwrap();
            prop_assert!(outcome.corruption.is_none());
            prop_assert!(outcome.sequence as usize <= count);
            if outcome.sequence > 0 {
                let last = &entries[outcome.sequence as usize - 1];
                prop_assert_eq!(&outcome.head_digest, &last.entry_digest);
            }
            prop_assert_eq!(outcome.file_bytes, std::fs::metadata(&path).unwrap().len());
        }
    }
}
