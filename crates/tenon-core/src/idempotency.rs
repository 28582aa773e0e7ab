//! Idempotency Guardian (C4): deterministic key construction, gating of
//! side-effecting operations, and WORM-backed decision logging.

use crate::error::TenonError;
use crate::hashing::sha256_hex_str;
use crate::ledger::WormLedger;
use crate::store::{AppendOnlyStore, Identified};
use crate::types::{IdempotencyRecord, IdempotencyScope, LedgerEntryType, RetentionPolicy};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

impl Identified for IdempotencyRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Gate decision returned by `Guardian::check`. Distinct from
/// `IdempotencyDecision` (the per-record field recorded on ingest/canonical
/// events): this is the guardian's own ACCEPT_FIRST/REJECT_DUPLICATE/
/// FLAG_AMBIGUOUS vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardDecision {
    AcceptFirst,
    RejectDuplicate,
    FlagAmbiguous,
}

/// Result of a `check` call: the decision plus the evidence references
/// (WORM ledger sequence numbers) produced while deciding.
#[derive(Debug, Clone)]
pub struct ExecutionGate {
    pub decision: GuardDecision,
    pub evidence_refs: Vec<String>,
}

/// A pure function from (scope, principal, subject, payload) to a
/// deterministic digest. `hash_fn` is injectable so tests can exercise
/// deliberate collisions without monkey-patching globals.
pub struct KeyBuilder {
    hash_fn: Box<dyn Fn(&str) -> String + Send + Sync>,
}

impl KeyBuilder {
    pub fn new() -> Self {
        Self {
            hash_fn: Box::new(sha256_hex_str),
        }
    }

    pub fn with_hash_fn(hash_fn: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            hash_fn: Box::new(hash_fn),
        }
    }

    /// `scope|principal|subject|hash(payload)`.
    pub fn build(
        &self,
        scope: IdempotencyScope,
        principal: &str,
        subject: &str,
        payload_canonical_json: &str,
    ) -> String {
        let payload_hash = (self.hash_fn)(payload_canonical_json);
        let scope_str = serde_json::to_value(scope)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        format!("{scope_str}|{principal}|{subject}|{payload_hash}")
    }
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct GuardianState {
    store: AppendOnlyStore<IdempotencyRecord>,
    key_to_id: std::collections::HashMap<String, String>,
}

/// Computes deterministic keys; decides ACCEPT_FIRST / REJECT_DUPLICATE /
/// FLAG_AMBIGUOUS; gates execution; every decision is logged to the WORM
/// ledger and to the idempotency store.
///
/// Concurrency: the read-modify-append sequence of `check` is serialized by
/// a mutex guarding the key index together with the store, so concurrent
/// callers with an identical key yield exactly one ACCEPT_FIRST.
pub struct Guardian {
    state: Mutex<GuardianState>,
    ledger: Mutex<WormLedger>,
    rule_version: String,
}

impl Guardian {
    pub fn new(rule_version: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(GuardianState {
                store: AppendOnlyStore::new(),
                key_to_id: std::collections::HashMap::new(),
            }),
            ledger: Mutex::new(WormLedger::new()),
            rule_version: rule_version.into(),
        }
    }

    pub fn ledger(&self) -> std::sync::MutexGuard<'_, WormLedger> {
        self.ledger.lock().expect("ledger mutex poisoned")
    }

    pub fn store_len(&self) -> usize {
        self.state.lock().expect("guardian mutex poisoned").store.len()
    }

    /// Look up `key` and decide. `fingerprint` is the full
    /// `scope|principal|subject|payload_hash|version` string used to detect
    /// mismatches on a key collision.
    pub fn check(
        &self,
        key: &str,
        scope: IdempotencyScope,
        fingerprint: &str,
    ) -> Result<ExecutionGate, TenonError> {
        let mut state = self.state.lock().expect("guardian mutex poisoned");
        let now = Utc::now();

        let existing_id = state.key_to_id.get(key).cloned();
        let (decision, notes) = match existing_id.as_deref().and_then(|id| state.store.get(id)) {
            None => (GuardDecision::AcceptFirst, fingerprint.to_string()),
            Some(existing) => {
                if existing.notes.as_deref() == Some(fingerprint) {
                    (GuardDecision::RejectDuplicate, fingerprint.to_string())
                } else {
                    (
                        GuardDecision::FlagAmbiguous,
                        format!(
                            "fingerprint mismatch: existing={:?} incoming={}",
                            existing.notes, fingerprint
                        ),
                    )
                }
            }
        };

        let record_id = Uuid::new_v4().to_string();
        let first_seen_at = existing_id
            .as_deref()
            .and_then(|id| state.store.get(id))
            .map(|r| r.first_seen_at)
            .unwrap_or(now);

        // The ledger content is the full record (minus evidence_refs, filled
        // in after the append below) so `reconstruct_from_ledger` can rebuild
        // the store byte-for-byte from the WORM ledger alone.
        let mut record = IdempotencyRecord {
            id: record_id.clone(),
            key: key.to_string(),
            scope,
            decision: to_record_decision(decision),
            first_seen_at,
            decided_at: now,
            evidence_refs: Vec::new(),
            rule_version: self.rule_version.clone(),
            notes: Some(notes),
        };
        let content = serde_json::to_vec(&record).map_err(|e| TenonError::invariant(e.to_string()))?;

        let ledger_entry = {
            let mut ledger = self.ledger.lock().expect("ledger mutex poisoned");
            ledger.append(
                LedgerEntryType::AuditRecord,
                content,
                now,
                RetentionPolicy {
                    retention_period: "P7Y".to_string(),
                    immutable_until: "2099-01-01T00:00:00Z".to_string(),
                },
            )?
        };
        let evidence_ref = format!("ledger:{}", ledger_entry.sequence_number);
        record.evidence_refs = vec![evidence_ref.clone()];
        state.store.append(record)?;
        if decision == GuardDecision::AcceptFirst {
            state.key_to_id.insert(key.to_string(), record_id);
        }

        Ok(ExecutionGate {
            decision,
            evidence_refs: vec![evidence_ref],
        })
    }

    /// Executes `thunk` iff the decision is `ACCEPT_FIRST`. Callers must
    /// route every in-scope operation through `guard` rather than invoking
    /// it directly — bypassing this gate is a contract violation, not a
    /// performance shortcut.
    pub fn guard<R>(
        &self,
        key: &str,
        scope: IdempotencyScope,
        fingerprint: &str,
        thunk: impl FnOnce() -> R,
    ) -> Result<Option<R>, TenonError> {
        let gate = self.check(key, scope, fingerprint)?;
        if gate.decision == GuardDecision::AcceptFirst {
            Ok(Some(thunk()))
        } else {
            Ok(None)
        }
    }

    /// Rebuild an idempotency store's record sequence from a WORM ledger's
    /// `AUDIT_RECORD` entries alone. Deterministic: running this twice over
    /// the same ledger yields a byte-identical sequence of records, since
    /// each entry's content is the full serialized `IdempotencyRecord`
    /// written at `check` time.
    pub fn reconstruct_from_ledger(
        ledger: &WormLedger,
    ) -> Result<Vec<IdempotencyRecord>, TenonError> {
        let mut records = Vec::new();
        for entry in ledger.all() {
            if entry.entry_type != LedgerEntryType::AuditRecord {
                continue;
            }
            let record: IdempotencyRecord = match serde_json::from_slice(&entry.content) {
                Ok(record) => record,
                Err(_) => continue,
            };
            records.push(record);
        }
        Ok(records)
    }
}

fn to_record_decision(decision: GuardDecision) -> crate::types::IdempotencyDecision {
    use crate::types::IdempotencyDecision as D;
    match decision {
        GuardDecision::AcceptFirst => D::Accept,
        GuardDecision::RejectDuplicate => D::RejectDuplicate,
        GuardDecision::FlagAmbiguous => D::FlagAmbiguous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn first_caller_accepts_rest_reject() {
        let guardian = Guardian::new("v1");
        let first = guardian
            .check("k1", IdempotencyScope::Ingest, "fp1")
            .unwrap();
        assert_eq!(first.decision, GuardDecision::AcceptFirst);
        let second = guardian
            .check("k1", IdempotencyScope::Ingest, "fp1")
            .unwrap();
        assert_eq!(second.decision, GuardDecision::RejectDuplicate);
    }

    #[test]
    fn mismatched_fingerprint_flags_ambiguous() {
        let guardian = Guardian::new("v1");
        guardian
            .check("k1", IdempotencyScope::Ingest, "fp1")
            .unwrap();
        let second = guardian
            .check("k1", IdempotencyScope::Ingest, "fp2")
            .unwrap();
        assert_eq!(second.decision, GuardDecision::FlagAmbiguous);
    }

    #[test]
    fn concurrent_callers_yield_exactly_one_accept() {
        let guardian = Arc::new(Guardian::new("v1"));
        let mut handles = vec![];
        for _ in 0..100 {
            let g = Arc::clone(&guardian);
            handles.push(thread::spawn(move || {
                g.check("shared-key", IdempotencyScope::Ingest, "fp")
                    .unwrap()
                    .decision
            }));
        }
        let decisions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let accepts = decisions
            .iter()
            .filter(|d| **d == GuardDecision::AcceptFirst)
            .count();
        assert_eq!(accepts, 1);
        assert_eq!(decisions.len(), 100);
        assert_eq!(guardian.store_len(), 100);
    }

    #[test]
    fn reconstruction_from_ledger_is_deterministic() {
        let guardian = Guardian::new("v1");
        guardian.check("k1", IdempotencyScope::Ingest, "fp1").unwrap();
        guardian.check("k1", IdempotencyScope::Ingest, "fp1").unwrap();
        guardian.check("k2", IdempotencyScope::Canonicalize, "fp2").unwrap();

        let ledger = guardian.ledger();
        let first = Guardian::reconstruct_from_ledger(&ledger).unwrap();
        let second = Guardian::reconstruct_from_ledger(&ledger).unwrap();
        assert_eq!(first.len(), 3);
        let first_ids: Vec<_> = first.iter().map(|r| r.id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|r| r.id.clone()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn guard_runs_thunk_only_on_accept() {
        let guardian = Guardian::new("v1");
        let mut calls = 0;
        guardian
            .guard("k", IdempotencyScope::Ingest, "fp", || calls += 1)
            .unwrap();
        guardian
            .guard("k", IdempotencyScope::Ingest, "fp", || calls += 1)
            .unwrap();
        assert_eq!(calls, 1);
    }
}
