//! Rejection evidence and a generic `ValidationResult` sum type, used
//! uniformly by every component that can reject an input (`spec.md` §7, §9
//! "Exceptions for ordinary rejections"). Also the canonical-event invariant
//! validator, checking traceability fields in a fixed declared order rather
//! than iterating a `HashSet` (Open Question #3 in `spec.md` §9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Structured, non-exceptional rejection detail. Every expected protocol
/// outcome (idempotency/identity decisions, normalization failures) that is
/// not a structural violation carries one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionEvidence {
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
    pub matched_event_id: Option<String>,
    pub conflicting_fields: Vec<String>,
    pub match_score: Option<f64>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

/// `Accept | Reject(RejectionEvidence)` — ordinary rejections are sum-typed
/// results, never thrown exceptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationResult {
    Accept,
    Reject(RejectionEvidence),
}

impl ValidationResult {
    pub fn is_accept(&self) -> bool {
        matches!(self, ValidationResult::Accept)
    }
}

/// Fixed, declared order in which traceability fields are checked — a
/// `HashSet` iteration order is non-deterministic and would make violation
/// reports non-reproducible across runs.
pub const TRACEABILITY_FIELDS: &[&str] = &[
    "event_id",
    "source_system",
    "source_connector",
    "raw_payload_hash",
    "raw_pointer",
    "normalizer_version",
    "adapter_version",
    "schema_version",
    "idempotency_key",
];

#[derive(Debug, Clone)]
pub struct InvariantViolationReport {
    pub field: String,
    pub message: String,
}

/// Minimal projection of a canonical event's traceability fields, checked
/// for non-emptiness in `TRACEABILITY_FIELDS` order.
#[derive(Debug, Clone, Default)]
pub struct TraceabilityFields {
    pub event_id: String,
    pub source_system: String,
    pub source_connector: String,
    pub raw_payload_hash: String,
    pub raw_pointer: String,
    pub normalizer_version: String,
    pub adapter_version: String,
    pub schema_version: String,
    pub idempotency_key: String,
}

impl TraceabilityFields {
    fn value_for(&self, field: &str) -> &str {
        match field {
            "event_id" => &self.event_id,
            "source_system" => &self.source_system,
            "source_connector" => &self.source_connector,
            "raw_payload_hash" => &self.raw_payload_hash,
            "raw_pointer" => &self.raw_pointer,
            "normalizer_version" => &self.normalizer_version,
            "adapter_version" => &self.adapter_version,
            "schema_version" => &self.schema_version,
            "idempotency_key" => &self.idempotency_key,
            _ => "",
        }
    }
}

pub struct InvariantValidator;

impl InvariantValidator {
    /// Uniqueness-by-id against an externally supplied set of known ids,
    /// plus non-empty traceability fields, checked in declared order. Every
    /// violation is reported, not just the first.
    pub fn validate(
        fields: &TraceabilityFields,
        known_ids: &std::collections::HashSet<String>,
    ) -> Vec<InvariantViolationReport> {
        let mut violations = Vec::new();

        if known_ids.contains(&fields.event_id) {
            violations.push(InvariantViolationReport {
                field: "event_id".to_string(),
                message: format!("event_id '{}' is already in use", fields.event_id),
            });
        }

        for field in TRACEABILITY_FIELDS {
            if fields.value_for(field).trim().is_empty() {
                violations.push(InvariantViolationReport {
                    field: field.to_string(),
                    message: format!("traceability field '{field}' must not be empty"),
                });
            }
        }

        violations
    }
}
