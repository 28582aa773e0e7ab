//! Identity Decider (C6): resolves whether a canonical event is new, a
//! duplicate, or ambiguous versus existing events.

use crate::hashing::{normalize_float, normalize_str, sha256_hex_str};
use crate::types::IdempotencyDecision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordered key fields, highest priority first. Every field that is present
/// contributes to the key; absent optional fields contribute the literal
/// string `"UNKNOWN"` so presence/absence cannot silently change identity.
const KEY_FIELDS_PRIORITY: &[&str] = &[
    "source_event_id",
    "external_reference",
    "source_system",
    "source_timestamp",
    "observed_at",
    "amount",
    "currency",
    "direction",
    "event_type",
    "normalizer_version",
    "adapter_version",
    "schema_version",
    "canonicalization_context",
];

/// Critical fields: if a key collision occurs (including a deliberate or
/// accidental hash collision under an injected hash function) and any of
/// these differ, the decision is FLAG_AMBIGUOUS rather than
/// REJECT_DUPLICATE.
const CRITICAL_FIELDS: &[&str] = &["amount", "currency", "direction", "event_type", "source_system"];

pub const IDENTITY_DECIDER_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Default)]
pub struct IdentityFields {
    pub source_event_id: Option<String>,
    pub external_reference: Option<String>,
    pub source_system: String,
    pub source_timestamp: Option<String>,
    pub observed_at: String,
    pub amount: f64,
    pub currency: String,
    pub direction: String,
    pub event_type: String,
    pub normalizer_version: String,
    pub adapter_version: String,
    pub schema_version: String,
    pub canonicalization_context: Option<String>,
}

impl IdentityFields {
    fn field_value(&self, field: &str) -> String {
        match field {
            "source_event_id" => self.source_event_id.clone().unwrap_or_else(|| "UNKNOWN".into()),
            "external_reference" => self.external_reference.clone().unwrap_or_else(|| "UNKNOWN".into()),
            "source_system" => normalize_str(&self.source_system),
            "source_timestamp" => self.source_timestamp.clone().unwrap_or_else(|| "UNKNOWN".into()),
            "observed_at" => normalize_str(&self.observed_at),
            "amount" => normalize_float(self.amount),
            "currency" => normalize_str(&self.currency),
            "direction" => normalize_str(&self.direction),
            "event_type" => normalize_str(&self.event_type),
            "normalizer_version" => normalize_str(&self.normalizer_version),
            "adapter_version" => normalize_str(&self.adapter_version),
            "schema_version" => normalize_str(&self.schema_version),
            "canonicalization_context" => {
                self.canonicalization_context.clone().unwrap_or_else(|| "UNKNOWN".into())
            }
            _ => "UNKNOWN".to_string(),
        }
    }

    fn canonical_string(&self) -> String {
        KEY_FIELDS_PRIORITY
            .iter()
            .map(|field| format!("{field}:{}", self.field_value(field)))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// `v<version>:<hash_fn(pipe-joined "field:value" pairs)>`.
    pub fn key_with(&self, version: u32, hash_fn: &dyn Fn(&str) -> String) -> String {
        format!("v{version}:{}", hash_fn(&self.canonical_string()))
    }

    /// `v<version>:<SHA-256 of pipe-joined "field:value" pairs>`.
    pub fn key(&self, version: u32) -> String {
        self.key_with(version, &sha256_hex_str)
    }

    fn critical_value(&self, field: &str) -> String {
        self.field_value(field)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityEvidence {
    pub reason: String,
    pub matched_event_id: Option<String>,
    pub conflicting_fields: Vec<String>,
    pub match_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityDecisionRecord {
    pub idempotency_key: String,
    pub decision: IdempotencyDecision,
    pub event_id: Option<String>,
    pub decided_at: DateTime<Utc>,
    pub evidence: IdentityEvidence,
    pub decider_version: String,
}

/// Tracks keyed canonical events to resolve identity decisions. Holding the
/// full field set (not just the key) lets it recompute which critical
/// fields conflict when a collision occurs, including a deliberate hash
/// collision under an injected `hash_fn`.
pub struct IdentityDecider {
    by_key: HashMap<String, (String, IdentityFields)>,
    by_source_event_id: HashMap<String, String>,
    key_version: u32,
    hash_fn: Box<dyn Fn(&str) -> String + Send + Sync>,
}

impl IdentityDecider {
    pub fn new(key_version: u32) -> Self {
        Self {
            by_key: HashMap::new(),
            by_source_event_id: HashMap::new(),
            key_version,
            hash_fn: Box::new(sha256_hex_str),
        }
    }

    /// Construct with an injected hash function, enabling deterministic
    /// collision tests without patching globals.
    pub fn with_hash_fn(
        key_version: u32,
        hash_fn: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            by_key: HashMap::new(),
            by_source_event_id: HashMap::new(),
            key_version,
            hash_fn: Box::new(hash_fn),
        }
    }

    pub fn key_for(&self, fields: &IdentityFields) -> String {
        fields.key_with(self.key_version, &self.hash_fn)
    }

    pub fn decide(
        &mut self,
        event_id: &str,
        fields: IdentityFields,
        decided_at: DateTime<Utc>,
    ) -> IdentityDecisionRecord {
        let key = self.key_for(&fields);

        let record = if let Some((existing_event_id, existing_fields)) = self.by_key.get(&key) {
            let conflicting: Vec<String> = CRITICAL_FIELDS
                .iter()
                .filter(|f| existing_fields.critical_value(f) != fields.critical_value(f))
                .map(|f| f.to_string())
                .collect();

            if conflicting.is_empty() {
                IdentityDecisionRecord {
                    idempotency_key: key.clone(),
                    decision: IdempotencyDecision::RejectDuplicate,
                    event_id: Some(existing_event_id.clone()),
                    decided_at,
                    evidence: IdentityEvidence {
                        reason: "identical key and critical fields".to_string(),
                        matched_event_id: Some(existing_event_id.clone()),
                        conflicting_fields: vec![],
                        match_score: 1.0,
                    },
                    decider_version: IDENTITY_DECIDER_VERSION.to_string(),
                }
            } else {
                IdentityDecisionRecord {
                    idempotency_key: key.clone(),
                    decision: IdempotencyDecision::FlagAmbiguous,
                    event_id: Some(existing_event_id.clone()),
                    decided_at,
                    evidence: IdentityEvidence {
                        reason: "key collision with diverging critical fields".to_string(),
                        matched_event_id: Some(existing_event_id.clone()),
                        conflicting_fields: conflicting,
                        match_score: 0.5,
                    },
                    decider_version: IDENTITY_DECIDER_VERSION.to_string(),
                }
            }
        } else if let Some(source_event_id) = fields.source_event_id.as_ref() {
            // Conservative extension: a new key whose source_event_id already
            // exists under a different key is an identity collision.
            if let Some(existing_event_id) = self.by_source_event_id.get(source_event_id) {
                IdentityDecisionRecord {
                    idempotency_key: key.clone(),
                    decision: IdempotencyDecision::FlagAmbiguous,
                    event_id: Some(existing_event_id.clone()),
                    decided_at,
                    evidence: IdentityEvidence {
                        reason: "source_event_id already registered under a different key"
                            .to_string(),
                        matched_event_id: Some(existing_event_id.clone()),
                        conflicting_fields: vec!["source_event_id".to_string()],
                        match_score: 0.0,
                    },
                    decider_version: IDENTITY_DECIDER_VERSION.to_string(),
                }
            } else {
                IdentityDecisionRecord {
                    idempotency_key: key.clone(),
                    decision: IdempotencyDecision::Accept,
                    event_id: Some(event_id.to_string()),
                    decided_at,
                    evidence: IdentityEvidence {
                        reason: "no prior entry for key".to_string(),
                        matched_event_id: None,
                        conflicting_fields: vec![],
                        match_score: 0.0,
                    },
                    decider_version: IDENTITY_DECIDER_VERSION.to_string(),
                }
            }
        } else {
            IdentityDecisionRecord {
                idempotency_key: key.clone(),
                decision: IdempotencyDecision::Accept,
                event_id: Some(event_id.to_string()),
                decided_at,
                evidence: IdentityEvidence {
                    reason: "no prior entry for key".to_string(),
                    matched_event_id: None,
                    conflicting_fields: vec![],
                    match_score: 0.0,
                },
                decider_version: IDENTITY_DECIDER_VERSION.to_string(),
            }
        };

        if record.decision == IdempotencyDecision::Accept {
            self.by_key.insert(key, (event_id.to_string(), fields.clone()));
            if let Some(source_event_id) = fields.source_event_id.as_ref() {
                self.by_source_event_id
                    .insert(source_event_id.clone(), event_id.to_string());
            }
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_fields(source_event_id: &str, amount: f64) -> IdentityFields {
        IdentityFields {
            source_event_id: Some(source_event_id.to_string()),
            external_reference: Some("REF12345".to_string()),
            source_system: "BANK".to_string(),
            source_timestamp: Some("2026-01-22T10:00:00Z".to_string()),
            observed_at: "2026-01-22T10:00:00Z".to_string(),
            amount,
            currency: "USD".to_string(),
            direction: "IN".to_string(),
            event_type: "payment_initiated".to_string(),
            normalizer_version: "1.0.0".to_string(),
            adapter_version: "1.0.0".to_string(),
            schema_version: "1.0.0".to_string(),
            canonicalization_context: None,
        }
    }

    #[test]
    fn new_key_accepts() {
        let mut decider = IdentityDecider::new(1);
        let ts = Utc.with_ymd_and_hms(2026, 1, 22, 10, 0, 0).unwrap();
        let record = decider.decide("evt-1", base_fields("txn_001", 100.50), ts);
        assert_eq!(record.decision, IdempotencyDecision::Accept);
    }

    #[test]
    fn retry_of_same_fields_rejects_duplicate() {
        let mut decider = IdentityDecider::new(1);
        let ts = Utc.with_ymd_and_hms(2026, 1, 22, 10, 0, 0).unwrap();
        decider.decide("evt-1", base_fields("txn_001", 100.50), ts);
        let record = decider.decide("evt-2", base_fields("txn_001", 100.50), ts);
        assert_eq!(record.decision, IdempotencyDecision::RejectDuplicate);
    }

    #[test]
    fn forced_key_collision_with_diverging_amount_flags_ambiguous() {
        // A constant hash function forces every input onto the same key,
        // modelling an accidental or deliberate hash collision.
        let mut decider = IdentityDecider::with_hash_fn(1, |_| "constant".to_string());
        let ts = Utc.with_ymd_and_hms(2026, 1, 22, 10, 0, 0).unwrap();
        decider.decide("evt-1", base_fields("txn_001", 100.50), ts);
        let record = decider.decide("evt-2", base_fields("txn_002", 999.99), ts);
        assert_eq!(record.decision, IdempotencyDecision::FlagAmbiguous);
        assert!(record.evidence.conflicting_fields.contains(&"amount".to_string()));
    }

    #[test]
    fn external_reference_collision_with_different_source_event_id_does_not_merge() {
        let mut decider = IdentityDecider::new(1);
        let ts = Utc.with_ymd_and_hms(2026, 1, 22, 10, 0, 0).unwrap();
        let mut a = base_fields("txn_001", 100.0);
        a.source_system = "BANK".to_string();
        let mut b = base_fields("txn_002", 100.0);
        b.source_system = "PSP".to_string();

        let rec_a = decider.decide("evt-a", a.clone(), ts);
        let rec_b = decider.decide("evt-b", b.clone(), ts);

        assert_eq!(rec_a.decision, IdempotencyDecision::Accept);
        assert_eq!(rec_b.decision, IdempotencyDecision::Accept);
        assert_ne!(decider.key_for(&a), decider.key_for(&b));
    }

    #[test]
    fn source_event_id_under_new_key_flags_ambiguous() {
        let mut decider = IdentityDecider::new(1);
        let ts = Utc.with_ymd_and_hms(2026, 1, 22, 10, 0, 0).unwrap();
        decider.decide("evt-1", base_fields("txn_001", 100.0), ts);

        let mut collided = base_fields("txn_001", 100.0);
        collided.currency = "EUR".to_string();
        let record = decider.decide("evt-2", collided, ts);
        assert_eq!(record.decision, IdempotencyDecision::FlagAmbiguous);
    }
}
