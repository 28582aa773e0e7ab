//! TENON core: pure, deterministic domain logic for turning raw financial
//! event observations into a tamper-evident, causally-explained ledger of
//! money-movement state.
//!
//! This crate never reads a clock and never performs I/O. Every timestamp
//! a component needs (`written_at`, `evaluated_at`, `observed_at`, ...) is
//! supplied by the caller, so the same inputs always replay to the same
//! outputs.

#![deny(unsafe_code)]

pub mod causality;
pub mod change_control;
pub mod correlation;
pub mod discrepancy;
pub mod error;
pub mod evidence;
pub mod hashing;
pub mod identity;
pub mod idempotency;
pub mod ingest;
pub mod ledger;
pub mod money_state;
pub mod normalization;
pub mod risk;
pub mod store;
pub mod types;
pub mod validation;

pub use causality::{
    CausalContext, CausalRule, CausalityAttributor, CauseEmission, ChangeControlRule,
    CorrelationAmbiguityRule, NormalizationChangeRule,
};
pub use change_control::{ChangeDeclaration, ChangeEventBuilder, VersionRegistry, VersionResolver};
pub use correlation::{CandidateEvent, CorrelationEngine, CorrelationRule, StoredLink, SCORE_FLOOR};
pub use discrepancy::{
    AmountMismatchRule, CurrencyMismatchRule, DiagnosticRule, DiscrepancyDetector,
    DiscrepancyEmission, FlowDiagnosticContext,
};
pub use error::TenonError;
pub use evidence::EvidenceLog;
pub use identity::{IdentityDecider, IdentityDecisionRecord, IdentityEvidence, IdentityFields};
pub use idempotency::{ExecutionGate, Guardian, GuardDecision, KeyBuilder};
pub use ingest::{IngestInput, IngestPipeline, RawPayloadStore, INGEST_PROTOCOL_VERSION};
pub use ledger::WormLedger;
pub use money_state::{StateEvidence, StateMachine, Transition};
pub use normalization::{
    FieldDiff, FieldMapping, NormalizationDiff, NormalizationOutcome, NormalizationRule,
    Normalizer, RuleRegistry,
};
pub use risk::{is_forbidden_metric_key, AlertBuilder, RiskAssessor, SignalComputer};
pub use store::{AppendOnlyStore, Identified};
pub use validation::{
    InvariantValidator, InvariantViolationReport, RejectionEvidence, TraceabilityFields,
    ValidationResult, TRACEABILITY_FIELDS,
};

pub use types::*;
