//! Adapter ports: the boundary between TENON's deterministic core and the
//! outside world. An adapter may only assert what it observed — it may
//! never assert anything the core derives (`event_type`, `state`,
//! `discrepancy`, `cause`). `IngestDeclaration` enforces that by
//! construction: those fields are not present on the type at all.

#![deny(unsafe_code)]

pub mod conformance;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenon_core::RawFormat;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter boundary violation: {0}")]
    BoundaryViolation(String),
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
}

/// Everything an adapter is permitted to declare about one observed raw
/// event. Allowed: source identity, raw bytes, and format metadata.
/// Prohibited: anything downstream derives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestDeclaration {
    pub source_system: String,
    pub source_connector: String,
    pub source_environment: String,
    pub payload_raw: Vec<u8>,
    pub payload_format: RawFormat,
    pub adapter_version: String,
    pub schema_hint: String,
    pub source_event_id: Option<String>,
    pub external_reference: Option<String>,
    pub source_timestamp: Option<DateTime<Utc>>,
}

/// A source of raw financial-event observations. `poll` never blocks
/// indefinitely — an empty vec means "nothing pending right now", not an
/// error.
pub trait ExternalEventSource {
    fn adapter_version(&self) -> &str;
    fn source_system(&self) -> &str;
    fn poll(&mut self) -> Result<Vec<IngestDeclaration>, AdapterError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionRequest {
    pub request_id: String,
    pub subject_id: String,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionOutcome {
    pub request_id: String,
    pub operator_id: String,
    pub decision: String,
    pub notes: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// The outbound half of the human-in-the-loop boundary: FLAG_AMBIGUOUS and
/// AMBIGUOUS outcomes are surfaced here rather than auto-resolved.
pub trait HumanInterventionSink {
    fn notify(&mut self, request: InterventionRequest) -> Result<(), AdapterError>;
    fn outcomes(&mut self) -> Result<Vec<InterventionOutcome>, AdapterError>;
}

/// A reference adapter over an in-memory queue, used by tests and the
/// conformance suite. Production adapters (bank file drops, PSP webhooks,
/// ERP exports) implement the same trait against a real transport.
#[derive(Debug, Clone)]
pub struct QueueEventSource {
    adapter_version: String,
    source_system: String,
    queue: Vec<IngestDeclaration>,
}

impl QueueEventSource {
    pub fn new(source_system: impl Into<String>, adapter_version: impl Into<String>) -> Self {
        Self {
            adapter_version: adapter_version.into(),
            source_system: source_system.into(),
            queue: Vec::new(),
        }
    }

    pub fn enqueue(&mut self, declaration: IngestDeclaration) {
        self.queue.push(declaration);
    }
}

impl ExternalEventSource for QueueEventSource {
    fn adapter_version(&self) -> &str {
        &self.adapter_version
    }

    fn source_system(&self) -> &str {
        &self.source_system
    }

    fn poll(&mut self) -> Result<Vec<IngestDeclaration>, AdapterError> {
        Ok(std::mem::take(&mut self.queue))
    }
}

#[derive(Debug, Default, Clone)]
pub struct QueueInterventionSink {
    pending: Vec<InterventionRequest>,
    outcomes: Vec<InterventionOutcome>,
}

impl QueueInterventionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &[InterventionRequest] {
        &self.pending
    }

    pub fn resolve(&mut self, outcome: InterventionOutcome) {
        self.pending.retain(|r| r.request_id != outcome.request_id);
        self.outcomes.push(outcome);
    }
}

impl HumanInterventionSink for QueueInterventionSink {
    fn notify(&mut self, request: InterventionRequest) -> Result<(), AdapterError> {
        self.pending.push(request);
        Ok(())
    }

    fn outcomes(&mut self) -> Result<Vec<InterventionOutcome>, AdapterError> {
        Ok(std::mem::take(&mut self.outcomes))
    }
}
