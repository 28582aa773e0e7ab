//! Write-once-read-many ledger (C1). Entries are hash-chained so any
//! tampering with a past entry breaks the chain from that point forward.
//!
//! Design choice carried from the teacher: no in-place mutation APIs are
//! exposed. Every state transition becomes an additional record.

use crate::error::TenonError;
use crate::hashing::{genesis_hash, sha256_hex, sha256_hex_str};
use crate::types::{LedgerEntry, LedgerEntryType, RetentionPolicy};
use chrono::{DateTime, Utc};

use crate::types::to_rfc3339;

fn compute_entry_header_hash(
    sequence_number: u64,
    entry_type: &LedgerEntryType,
    content_hash: &str,
    written_at: &str,
    previous_entry_hash: &str,
) -> String {
    let entry_type_str = serde_json::to_value(entry_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    let header = format!(
        "{}|{}|{}|{}|{}",
        sequence_number, entry_type_str, content_hash, written_at, previous_entry_hash
    );
    sha256_hex_str(&header)
}

/// Append-only, hash-chained ledger (`spec.md` §4.1).
#[derive(Debug, Default, Clone)]
pub struct WormLedger {
    entries: Vec<LedgerEntry>,
}

impl WormLedger {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Rebuild a ledger from persisted entries and verify hash-chain integrity.
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Result<Self, TenonError> {
        let ledger = Self { entries };
        match ledger.verify_chain() {
            (true, _) => Ok(ledger),
            (false, reason) => Err(TenonError::ChainTampering {
                sequence: ledger
                    .entries
                    .last()
                    .map(|e| e.sequence_number)
                    .unwrap_or(0),
                reason: reason.unwrap_or_else(|| "unknown chain failure".to_string()),
            }),
        }
    }

    pub fn all(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, sequence_number: u64) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .find(|e| e.sequence_number == sequence_number)
    }

    /// Append new content to the ledger, deterministically deriving the
    /// sequence number, content hash and header hash. `written_at` is
    /// supplied by the caller — the core never reads a clock (`spec.md`
    /// §4.8, §5).
    pub fn append(
        &mut self,
        entry_type: LedgerEntryType,
        content: Vec<u8>,
        written_at: DateTime<Utc>,
        retention_policy: RetentionPolicy,
    ) -> Result<LedgerEntry, TenonError> {
        let sequence_number = self.entries.len() as u64 + 1;
        let content_hash = sha256_hex(&content);
        let written_at_str = to_rfc3339(written_at);
        let previous_entry_hash = self
            .entries
            .last()
            .map(|e| e.entry_header_hash.clone())
            .unwrap_or_else(genesis_hash);

        let entry_header_hash = compute_entry_header_hash(
            sequence_number,
            &entry_type,
            &content_hash,
            &written_at_str,
            &previous_entry_hash,
        );

        let entry = LedgerEntry {
            sequence_number,
            entry_type,
            content,
            content_hash,
            written_at,
            retention_policy,
            previous_entry_hash,
            entry_header_hash,
        };

        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Recompute every entry's content hash and header hash and confirm the
    /// chain of `previous_entry_hash` pointers. Returns `(true, None)` when
    /// the chain holds, or `(false, Some(reason))` naming the first sequence
    /// number where it breaks.
    pub fn verify_chain(&self) -> (bool, Option<String>) {
        let mut expected_previous = genesis_hash();
        for (position, entry) in self.entries.iter().enumerate() {
            let expected_sequence = position as u64 + 1;
            if entry.sequence_number != expected_sequence {
                return (
                    false,
                    Some(format!(
                        "sequence gap at position {}: expected {}, found {}",
                        position, expected_sequence, entry.sequence_number
                    )),
                );
            }

            let expected_content_hash = sha256_hex(&entry.content);
            if entry.content_hash != expected_content_hash {
                return (
                    false,
                    Some(format!(
                        "Content hash mismatch at sequence {}",
                        entry.sequence_number
                    )),
                );
            }

            if entry.previous_entry_hash != expected_previous {
                return (
                    false,
                    Some(format!(
                        "previous entry hash mismatch at sequence {}",
                        entry.sequence_number
                    )),
                );
            }

            let expected_header_hash = compute_entry_header_hash(
                entry.sequence_number,
                &entry.entry_type,
                &entry.content_hash,
                &to_rfc3339(entry.written_at),
                &entry.previous_entry_hash,
            );
            if entry.entry_header_hash != expected_header_hash {
                return (
                    false,
                    Some(format!(
                        "entry header hash mismatch at sequence {}",
                        entry.sequence_number
                    )),
                );
            }

            expected_previous = entry.entry_header_hash.clone();
        }
        (true, None)
    }
}
