//! Ingest (other half of C5): content-addressed raw payload storage plus
//! the ingest protocol that turns an adapter's declaration into an
//! `IngestRecord` (always, even for duplicates and rejections) and, only
//! on an ACCEPT identity decision, a `CanonicalEvent`.

use crate::hashing::sha256_hex;
use crate::identity::{IdentityDecider, IdentityFields};
use crate::normalization::{NormalizationOutcome, Normalizer, RuleRegistry};
use crate::types::{
    CanonicalEvent, IdempotencyDecision, IngestRecord, IngestStatus, RawFormat, RawPayload,
    SourceSystem, UNKNOWN,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

pub const INGEST_PROTOCOL_VERSION: &str = "1.0.0";

impl crate::store::Identified for CanonicalEvent {
    fn id(&self) -> &str {
        &self.event_id
    }
}

/// Content-addressed store of raw bytes. Idempotent by hash: storing the
/// same bytes twice returns the existing payload instead of erroring, unlike
/// the WORM ledger and other append-only stores, which reject re-insertion.
#[derive(Debug, Default)]
pub struct RawPayloadStore {
    by_hash: HashMap<String, RawPayload>,
}

impl RawPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, bytes: Vec<u8>, format: RawFormat) -> RawPayload {
        let hash = sha256_hex(&bytes);
        if let Some(existing) = self.by_hash.get(&hash) {
            return existing.clone();
        }
        let size = bytes.len();
        let payload = RawPayload {
            bytes,
            format,
            sha256_hash: hash.clone(),
            size,
        };
        self.by_hash.insert(hash, payload.clone());
        payload
    }

    pub fn get(&self, hash: &str) -> Option<&RawPayload> {
        self.by_hash.get(hash)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

/// What an adapter hands to ingest: raw bytes plus the metadata the ingest
/// protocol needs to store, normalize, and decide identity. Deliberately
/// excludes anything downstream owns (`event_type`, `state`, `discrepancy`,
/// `cause`) — those are derived by later components, never supplied.
#[derive(Debug, Clone)]
pub struct IngestInput {
    pub bytes: Vec<u8>,
    pub raw_format: RawFormat,
    pub source_system: String,
    pub source_connector: String,
    pub source_environment: String,
    pub adapter_version: String,
    pub schema_hint: String,
    pub source_event_id: Option<String>,
    pub external_reference: Option<String>,
    pub source_timestamp: Option<DateTime<Utc>>,
}

fn parse_source_system(s: &str) -> Option<SourceSystem> {
    match s.to_ascii_uppercase().as_str() {
        "BANK" => Some(SourceSystem::Bank),
        "PSP" => Some(SourceSystem::Psp),
        "ERP" => Some(SourceSystem::Erp),
        "MARKETPLACE" => Some(SourceSystem::Marketplace),
        _ => None,
    }
}

pub struct IngestPipeline {
    rules: RuleRegistry,
}

impl IngestPipeline {
    pub fn new(rules: RuleRegistry) -> Self {
        Self { rules }
    }

    /// Steps of the ingest protocol (`spec.md` §4.5):
    /// 1. store the raw payload (idempotent by hash)
    /// 2. resolve and apply a normalization rule (or record its absence)
    /// 3. decide identity against prior events
    /// 4. emit an `IngestRecord` unconditionally
    /// 5. emit a `CanonicalEvent` only when the identity decision is ACCEPT
    ///
    /// `event_id` is supplied by the caller so that retries of the same
    /// logical event can be assigned distinct record ids (`spec.md` §4.4:
    /// "a record per observation, even duplicates") while the identity
    /// decider still recognizes them as the same entity.
    pub fn ingest(
        &self,
        input: IngestInput,
        raw_store: &mut RawPayloadStore,
        identity: &mut IdentityDecider,
        event_id: &str,
        observed_at: DateTime<Utc>,
        ingested_at: DateTime<Utc>,
        schema_version: &str,
    ) -> (IngestRecord, Option<CanonicalEvent>) {
        let raw_payload = raw_store.put(input.bytes.clone(), input.raw_format);

        let (raw_json, unparseable): (Value, bool) = if matches!(input.raw_format, RawFormat::Json) {
            match serde_json::from_slice(&input.bytes) {
                Ok(value) => (value, false),
                Err(_) => (Value::Null, true),
            }
        } else {
            // Only JSON is parsed for identity purposes today; other declared
            // formats are treated as opaque and never flagged unparseable.
            (Value::Null, false)
        };

        let resolved_rule =
            parse_source_system(&input.source_system).and_then(|system| {
                self.rules
                    .resolve(system, input.raw_format, &input.schema_hint)
            });

        let (outcome, normalizer_version): (NormalizationOutcome, String) = match resolved_rule {
            Some(rule) => (
                Normalizer::apply(rule, &raw_json),
                rule.normalizer_version.clone(),
            ),
            None => (
                Normalizer::unmapped(&input.source_system, input.raw_format, &input.schema_hint),
                UNKNOWN.to_string(),
            ),
        };

        let identity_fields = IdentityFields {
            source_event_id: input.source_event_id.clone(),
            external_reference: input.external_reference.clone(),
            source_system: input.source_system.clone(),
            source_timestamp: input.source_timestamp.map(crate::types::to_rfc3339),
            observed_at: crate::types::to_rfc3339(observed_at),
            amount: outcome.field("amount").parse().unwrap_or(0.0),
            currency: outcome.field("currency"),
            direction: outcome.field("direction"),
            event_type: outcome.field("event_type"),
            normalizer_version: normalizer_version.clone(),
            adapter_version: input.adapter_version.clone(),
            schema_version: schema_version.to_string(),
            canonicalization_context: None,
        };

        let mut decision_record = identity.decide(event_id, identity_fields, ingested_at);
        let mut warnings = outcome.warnings.clone();
        if unparseable {
            warnings.push(format!(
                "raw payload could not be parsed in declared format {:?}; identity decision forced to FLAG_AMBIGUOUS",
                input.raw_format
            ));
            decision_record.decision = IdempotencyDecision::FlagAmbiguous;
        }

        let status = if warnings.is_empty() {
            IngestStatus::Recorded
        } else {
            IngestStatus::RecordedWithWarnings
        };

        let ingest_id = crate::hashing::sha256_hex_str(&format!(
            "{}|{}|{}",
            event_id,
            raw_payload.sha256_hash,
            crate::types::to_rfc3339(ingested_at)
        ));

        let ingest_record = IngestRecord {
            ingest_id,
            observed_at,
            source_timestamp: input.source_timestamp,
            ingested_at,
            source_system: input.source_system.clone(),
            source_connector: input.source_connector.clone(),
            source_environment: input.source_environment.clone(),
            raw_pointer: RawPayload::pointer(&raw_payload.sha256_hash),
            raw_payload_hash: raw_payload.sha256_hash.clone(),
            raw_size: raw_payload.size,
            raw_format: raw_payload.format,
            adapter_version: input.adapter_version.clone(),
            ingest_protocol_version: INGEST_PROTOCOL_VERSION.to_string(),
            idempotency_decision: decision_record.decision,
            event_id: if decision_record.decision == IdempotencyDecision::Accept {
                Some(event_id.to_string())
            } else {
                None
            },
            status,
            warnings,
        };

        if decision_record.decision != IdempotencyDecision::Accept {
            return (ingest_record, None);
        }

        let canonical = CanonicalEvent {
            event_id: event_id.to_string(),
            source_system: input.source_system,
            source_connector: input.source_connector,
            source_environment: input.source_environment,
            observed_at,
            event_type: outcome.field("event_type"),
            direction: outcome.field("direction"),
            amount: outcome.field("amount"),
            currency: outcome.field("currency"),
            raw_payload_hash: raw_payload.sha256_hash.clone(),
            raw_pointer: RawPayload::pointer(&raw_payload.sha256_hash),
            raw_format: format!("{:?}", raw_payload.format).to_uppercase(),
            normalizer_version,
            adapter_version: input.adapter_version,
            schema_version: schema_version.to_string(),
            idempotency_key: decision_record.idempotency_key,
            idempotency_decision: decision_record.decision,
            source_event_id: input.source_event_id,
            external_reference: input.external_reference,
            source_timestamp: input.source_timestamp,
            lineage_links: Vec::new(),
        };

        (ingest_record, Some(canonical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::{FieldMapping, NormalizationRule};
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 22, 10, 0, 0).unwrap()
    }

    fn rules() -> RuleRegistry {
        let mut registry = RuleRegistry::new();
        registry.register(NormalizationRule {
            source_system: SourceSystem::Bank,
            raw_format: RawFormat::Json,
            schema_hint: "bank.payment.v1".to_string(),
            normalizer_version: "1.0.0".to_string(),
            mappings: vec![
                FieldMapping::new("amount", "/amount"),
                FieldMapping::new("currency", "/currency"),
                FieldMapping::new("direction", "/direction"),
                FieldMapping::new("event_type", "/status"),
            ],
            lossy_fields: vec![],
        });
        registry
    }

    fn input(bytes: &[u8], source_event_id: &str) -> IngestInput {
        IngestInput {
            bytes: bytes.to_vec(),
            raw_format: RawFormat::Json,
            source_system: "BANK".to_string(),
            source_connector: "bank-conn".to_string(),
            source_environment: "prod".to_string(),
            adapter_version: "1.0.0".to_string(),
            schema_hint: "bank.payment.v1".to_string(),
            source_event_id: Some(source_event_id.to_string()),
            external_reference: Some("REF-1".to_string()),
            source_timestamp: Some(ts()),
        }
    }

    #[test]
    fn first_observation_is_accepted_and_produces_canonical_event() {
        let pipeline = IngestPipeline::new(rules());
        let mut raw_store = RawPayloadStore::new();
        let mut identity = IdentityDecider::new(1);
        let bytes = br#"{"amount": 100.5, "currency": "USD", "direction": "IN", "status": "settled"}"#;

        let (record, event) = pipeline.ingest(
            input(bytes, "txn-1"),
            &mut raw_store,
            &mut identity,
            "evt-1",
            ts(),
            ts(),
            "1.0.0",
        );

        assert_eq!(record.idempotency_decision, IdempotencyDecision::Accept);
        assert_eq!(record.status, IngestStatus::Recorded);
        assert_eq!(record.event_id, Some("evt-1".to_string()));
        let event = event.unwrap();
        assert_eq!(event.amount, "100.5");
        assert_eq!(event.idempotency_decision, IdempotencyDecision::Accept);
    }

    /// Retry storm (`spec.md` §8 S1): the same raw payload arrives 5 times.
    /// The raw store dedupes by hash, every call still produces its own
    /// `IngestRecord`, and only the first is accepted.
    #[test]
    fn retry_storm_produces_a_record_per_attempt_but_accepts_once() {
        let pipeline = IngestPipeline::new(rules());
        let mut raw_store = RawPayloadStore::new();
        let mut identity = IdentityDecider::new(1);
        let bytes = br#"{"amount": 42.0, "currency": "USD", "direction": "IN", "status": "settled"}"#;

        let mut records = Vec::new();
        for i in 0..5 {
            let (record, _) = pipeline.ingest(
                input(bytes, "txn-retry"),
                &mut raw_store,
                &mut identity,
                &format!("evt-{i}"),
                ts(),
                ts(),
                "1.0.0",
            );
            records.push(record);
        }

        assert_eq!(records.len(), 5);
        assert_eq!(records[0].idempotency_decision, IdempotencyDecision::Accept);
        for record in &records[1..] {
            assert_eq!(record.idempotency_decision, IdempotencyDecision::RejectDuplicate);
            assert!(record.event_id.is_none());
        }
        assert_eq!(raw_store.len(), 1);
    }

    #[test]
    fn missing_normalization_rule_is_recorded_with_warnings() {
        let pipeline = IngestPipeline::new(RuleRegistry::new());
        let mut raw_store = RawPayloadStore::new();
        let mut identity = IdentityDecider::new(1);
        let bytes = br#"{"amount": 10.0}"#;

        let (record, event) = pipeline.ingest(
            input(bytes, "txn-unmapped"),
            &mut raw_store,
            &mut identity,
            "evt-unmapped",
            ts(),
            ts(),
            "1.0.0",
        );

        assert_eq!(record.status, IngestStatus::RecordedWithWarnings);
        assert_eq!(record.idempotency_decision, IdempotencyDecision::Accept);
        assert_eq!(event.unwrap().amount, UNKNOWN);
    }

    #[test]
    fn unparseable_json_forces_flag_ambiguous() {
        let pipeline = IngestPipeline::new(rules());
        let mut raw_store = RawPayloadStore::new();
        let mut identity = IdentityDecider::new(1);
        let bytes = b"{not valid json";

        let (record, event) = pipeline.ingest(
            input(bytes, "txn-broken"),
            &mut raw_store,
            &mut identity,
            "evt-broken",
            ts(),
            ts(),
            "1.0.0",
        );

        assert_eq!(record.idempotency_decision, IdempotencyDecision::FlagAmbiguous);
        assert_eq!(record.status, IngestStatus::RecordedWithWarnings);
        assert!(record.event_id.is_none());
        assert!(event.is_none());
    }

    #[test]
    fn raw_payload_store_is_idempotent_by_hash() {
        let mut store = RawPayloadStore::new();
        let a = store.put(b"same-bytes".to_vec(), RawFormat::Json);
        let b = store.put(b"same-bytes".to_vec(), RawFormat::Json);
        assert_eq!(a.sha256_hash, b.sha256_hash);
        assert_eq!(store.len(), 1);
    }
}
