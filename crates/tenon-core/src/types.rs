//! Shared data model (`spec.md` §3). Every closed-enum field is a concrete
//! Rust enum; dynamic dictionaries are reserved for `payload_raw` and
//! schema-free `context` fields.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RawFormat {
    Json,
    Csv,
    Xml,
    Pdf,
    Other,
}

/// Content-addressed raw bytes (`spec.md` §3 RawPayload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPayload {
    pub bytes: Vec<u8>,
    pub format: RawFormat,
    pub sha256_hash: String,
    pub size: usize,
}

impl RawPayload {
    /// Opaque pointer into the raw payload store.
    pub fn pointer(hash: &str) -> String {
        format!("raw:{hash}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyDecision {
    Accept,
    RejectDuplicate,
    FlagAmbiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestStatus {
    Recorded,
    RecordedWithWarnings,
}

/// One record per observation, even duplicates (`spec.md` §3 IngestRecord).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestRecord {
    pub ingest_id: String,
    pub observed_at: DateTime<Utc>,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    pub source_system: String,
    pub source_connector: String,
    pub source_environment: String,
    pub raw_pointer: String,
    pub raw_payload_hash: String,
    pub raw_size: usize,
    pub raw_format: RawFormat,
    pub adapter_version: String,
    pub ingest_protocol_version: String,
    pub idempotency_decision: IdempotencyDecision,
    pub event_id: Option<String>,
    pub status: IngestStatus,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceSystem {
    Bank,
    Psp,
    Erp,
    Marketplace,
}

/// 16-value closed taxonomy of canonical event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PaymentInitiated,
    AuthorizationConfirmed,
    AuthorizationDenied,
    ProcessingStarted,
    SettlementConfirmed,
    ProcessingFailed,
    SettlementRejected,
    RefundRequested,
    RefundConfirmed,
    ReversalRequested,
    ReversalConfirmed,
    TimeoutExceeded,
    ChargebackOpened,
    ChargebackResolved,
    DisputeOpened,
    DisputeResolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    In,
    Out,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineageType {
    DerivesFrom,
    ReversalOf,
    RefundOf,
    AdjustmentOf,
    RelatedTo,
}

/// Append-only; a link identified by `(type, target_event_id)` may never be
/// modified or deleted once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LineageLink {
    #[serde(rename = "type")]
    pub link_type: LineageType,
    pub target_event_id: String,
    pub evidence: String,
    pub version: String,
}

/// Output of normalization (`spec.md` §3 CanonicalEvent). Fields not covered
/// by a mapping rule carry the literal sentinel `"UNKNOWN"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanonicalEvent {
    pub event_id: String,
    pub source_system: String,
    pub source_connector: String,
    pub source_environment: String,
    pub observed_at: DateTime<Utc>,
    pub event_type: String,
    pub direction: String,
    pub amount: String,
    pub currency: String,
    pub raw_payload_hash: String,
    pub raw_pointer: String,
    pub raw_format: String,
    pub normalizer_version: String,
    pub adapter_version: String,
    pub schema_version: String,
    pub idempotency_key: String,
    pub idempotency_decision: IdempotencyDecision,
    pub source_event_id: Option<String>,
    pub external_reference: Option<String>,
    pub source_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lineage_links: Vec<LineageLink>,
}

pub const UNKNOWN: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyScope {
    Ingest,
    Canonicalize,
    EvidenceWrite,
}

/// `spec.md` §3 IdempotencyKey + IdempotencyRecord.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub id: String,
    pub key: String,
    pub scope: IdempotencyScope,
    pub decision: IdempotencyDecision,
    pub first_seen_at: DateTime<Utc>,
    pub decided_at: DateTime<Utc>,
    pub evidence_refs: Vec<String>,
    pub rule_version: String,
    pub notes: Option<String>,
}

/// `spec.md` §3 CorrelationLink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorrelationLink {
    pub link_id: String,
    pub source_event_id: String,
    pub target_event_id: String,
    pub link_type: String,
    pub rule_id: String,
    pub rule_version: String,
    pub score: f64,
    pub evidence: Vec<CorrelationEvidence>,
    pub engine_version: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceType {
    ReferenceMatch,
    AmountTolerance,
    TimeWindow,
    SequenceObserved,
    FieldMatch,
    ContradictionFlag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationEvidence {
    pub evidence_type: EvidenceType,
    pub pointer: String,
    #[serde(default)]
    pub details: Value,
}

/// Projection produced by `build_money_flow` (`spec.md` §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneyFlow {
    pub flow_id: String,
    pub event_ids: Vec<String>,
    pub link_ids: Vec<String>,
}

/// 11-value closed set of money states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MoneyState {
    Expected,
    Initiated,
    Authorized,
    InTransit,
    Settled,
    Refunded,
    Reversed,
    Failed,
    Expired,
    Ambiguous,
    Unknown,
}

/// `spec.md` §3 MoneyStateEvaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoneyStateEvaluation {
    pub evaluation_id: String,
    pub flow_id: String,
    pub event_id: String,
    pub timestamp: String,
    pub state: MoneyState,
    pub transition_reason: String,
    pub evidence_pointer: String,
    pub state_version: String,
    pub machine_version: String,
    pub confidence_level: f64,
    pub evaluated_at: DateTime<Utc>,
}

/// 11-value closed taxonomy of discrepancy types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyType {
    NoDiscrepancy,
    TimingDelay,
    MissingEvent,
    DuplicateEvent,
    AmountMismatch,
    CurrencyMismatch,
    StatusConflict,
    UnexpectedReversal,
    OrphanEvent,
    InconsistentFlow,
    InsufficientEvidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeverityHint {
    Low,
    Medium,
    High,
    Unknown,
}

/// `spec.md` §3 Discrepancy. At least one supporting list must be non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Discrepancy {
    pub discrepancy_id: String,
    pub flow_id: String,
    pub discrepancy_type: DiscrepancyType,
    pub severity_hint: SeverityHint,
    #[serde(default)]
    pub supporting_states: Vec<String>,
    #[serde(default)]
    pub supporting_events: Vec<String>,
    #[serde(default)]
    pub supporting_links: Vec<String>,
    pub rule_id: String,
    pub rule_version: String,
    pub explanation: String,
    pub detected_at: DateTime<Utc>,
}

/// 10-value closed taxonomy of causality types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CauseType {
    SourceDelay,
    SourceOmission,
    SourceDuplication,
    SourceInconsistency,
    IntegrationMappingError,
    NormalizationLoss,
    CorrelationAmbiguity,
    StateTransitionGap,
    ExternalSystemChange,
    UnknownCause,
}

/// `spec.md` §3 CausalityAttribution. Multiple attributions per discrepancy
/// are preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CausalityAttribution {
    pub causality_id: String,
    pub discrepancy_id: String,
    pub cause_type: CauseType,
    pub confidence_level: f64,
    #[serde(default)]
    pub supporting_events: Vec<String>,
    #[serde(default)]
    pub supporting_states: Vec<String>,
    #[serde(default)]
    pub supporting_rules: Vec<String>,
    pub explanation: String,
    pub attributed_at: DateTime<Utc>,
    pub model_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    EvidenceSnapshot,
    StateCheckpoint,
    AuditRecord,
    DiscrepancyLog,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetentionPolicy {
    pub retention_period: String,
    pub immutable_until: String,
}

/// `spec.md` §3 LedgerEntry. Genesis entry has `previous_entry_hash` = 64
/// zero bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence_number: u64,
    pub entry_type: LedgerEntryType,
    pub content: Vec<u8>,
    pub content_hash: String,
    pub written_at: DateTime<Utc>,
    pub retention_policy: RetentionPolicy,
    pub previous_entry_hash: String,
    pub entry_header_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceEventType {
    IngestReceived,
    NormalizationApplied,
    CorrelationMatch,
    StateTransition,
    DiscrepancyDetected,
    AuditCheckpoint,
}

/// `spec.md` §3 EvidenceEvent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceEvent {
    pub event_id: String,
    pub event_type: EvidenceEventType,
    pub produced_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub caused_by: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskSeverityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskSeverityLevel {
    pub fn max_of(levels: impl IntoIterator<Item = RiskSeverityLevel>) -> Option<RiskSeverityLevel> {
        levels.into_iter().max()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskScope {
    Global,
    Source,
    Flow,
    Component,
}

/// Closed taxonomy of exactly 25 signal types across six families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskSignalType {
    DiscrepancyConcentrationHighBySource,
    DiscrepancyConcentrationHighByType,
    DiscrepancyConcentrationHighByFlow,
    DiscrepancyTemporalTrendCritical,
    DiscrepancyAverageAgeUnresolved,
    CorrelationConfidenceScoreDegradation,
    CorrelationAmbiguousIncreaseByFlow,
    CorrelationOrphanEventGrowth,
    StateAmbiguousAccumulationOutsideSla,
    StateUnknownAccumulationOutsideSla,
    StateInTransitAccumulationOutsideSla,
    StateStaleFlowsNoEvolution,
    StateDivergenceExpectedVsObserved,
    IdempotencyRejectDuplicateIncrease,
    IdempotencyFlagAmbiguousIncrease,
    IdempotencyKeyCollisionRecurrent,
    IdempotencyGuardianBypassOrFailure,
    ChangeImpactOnCorrelation,
    ChangeImpactOnStates,
    ChangeImpactOnDiscrepancies,
    ChangeVersionCoexistenceDivergentResults,
    ChangeDiscrepancyIncreasePostChange,
    HumanInterventionOveruse,
    HumanDiscrepancyReopeningRecurrent,
    HumanOverrideDependency,
}

pub const RISK_SIGNAL_TYPE_COUNT: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskAlertType {
    EarlyWarning,
    RiskEscalation,
    InstitutionalBreach,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskObservation {
    pub metric_key: String,
    pub metric_value: f64,
    pub scope: RiskScope,
    pub scope_key: String,
    pub observed_at: DateTime<Utc>,
    pub evidence_refs: Vec<String>,
    pub risk_mapping: String,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSignal {
    pub risk_signal_id: String,
    pub signal_type: RiskSignalType,
    pub scope: RiskScope,
    pub severity_level: RiskSeverityLevel,
    pub supporting_metrics: Vec<SupportingMetric>,
    pub supporting_evidence: Vec<String>,
    pub explanation: String,
    pub observed_at: DateTime<Utc>,
    pub signal_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportingMetric {
    pub metric_key: String,
    pub metric_value: f64,
    pub metric_unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAggregate {
    pub aggregate_id: String,
    pub time_window: TimeWindow,
    pub risk_profile: Vec<RiskProfileEntry>,
    pub overall_risk_level: RiskSeverityLevel,
    pub drivers: Vec<String>,
    pub computed_at: DateTime<Utc>,
    pub model_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskProfileEntry {
    pub risk_signal_id: String,
    pub signal_type: RiskSignalType,
    pub severity_level: RiskSeverityLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlert {
    pub alert_id: String,
    pub alert_type: RiskAlertType,
    pub aggregate_id: String,
    pub signal_ids: Vec<String>,
    pub evidence_refs: Vec<String>,
    pub potential_impact: String,
    pub operational_recommendation: String,
    pub raised_at: DateTime<Utc>,
    pub alert_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdOperator {
    #[serde(rename = "GT")]
    Gt,
    #[serde(rename = "GTE")]
    Gte,
    #[serde(rename = "LT")]
    Lt,
    #[serde(rename = "LTE")]
    Lte,
    #[serde(rename = "EQ")]
    Eq,
}

impl ThresholdOperator {
    pub fn check(self, value: f64, threshold: f64) -> bool {
        match self {
            ThresholdOperator::Gt => value > threshold,
            ThresholdOperator::Gte => value >= threshold,
            ThresholdOperator::Lt => value < threshold,
            ThresholdOperator::Lte => value <= threshold,
            ThresholdOperator::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityMapping {
    pub severity_level: RiskSeverityLevel,
    pub operator: ThresholdOperator,
    pub threshold_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub signal_type: RiskSignalType,
    pub scope: RiskScope,
    pub metric_key: String,
    pub severity_mapping: Vec<SeverityMapping>,
}

/// A governed threshold set. Carries `approved_change_ref`; no
/// auto-adjustment fields may exist on this type by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub threshold_set_id: String,
    pub threshold_set_version: String,
    pub approved_change_ref: String,
    pub rules: Vec<ThresholdRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Patch,
    Minor,
    Major,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compatibility {
    BackwardCompatible,
    ForwardCompatible,
    Breaking,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionTransition {
    pub component: String,
    pub from_version: String,
    pub to_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub rfc_id: String,
    pub effective_at: DateTime<Utc>,
    pub components_impacted: Vec<String>,
    pub versions_affected: Vec<VersionTransition>,
    pub change_type: ChangeType,
    pub compatibility: Compatibility,
}
