//! HTTP and CLI host wiring the TENON evidence pipeline together. Core and
//! adapter crates stay synchronous and clock-free; this crate is the only
//! place `tokio` and `axum` appear, and the only place `Utc::now()` may be
//! called.

#![deny(unsafe_code)]

pub mod storage;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
pub use storage::LedgerStorageConfig;
use storage::PersistentLedger;
use tenon_core::{
    AppendOnlyStore, CanonicalEvent, FieldMapping, IdentityDecider, IngestInput, IngestPipeline,
    IngestRecord, LedgerEntryType, NormalizationRule, RawFormat, RawPayloadStore, RetentionPolicy,
    RiskAggregate, RuleRegistry, SourceSystem, TenonError,
};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub ledger_storage: LedgerStorageConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            ledger_storage: LedgerStorageConfig::Memory,
        }
    }
}

/// Two starter normalization rules (bank and PSP JSON payment events) so the
/// CLI has something to ingest against out of the box. A real deployment
/// registers its own rules per `(source_system, raw_format, schema_hint)`.
fn default_rule_registry() -> RuleRegistry {
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
    registry.register(NormalizationRule {
        source_system: SourceSystem::Psp,
        raw_format: RawFormat::Json,
        schema_hint: "psp.charge.v1".to_string(),
        normalizer_version: "1.0.0".to_string(),
        mappings: vec![
            FieldMapping::new("amount", "/amount"),
            FieldMapping::new("currency", "/currency_code"),
            FieldMapping::new("direction", "/flow"),
            FieldMapping::new("event_type", "/charge_status"),
        ],
        lossy_fields: vec!["processor_fee".to_string()],
    });
    registry
}

fn default_retention() -> RetentionPolicy {
    RetentionPolicy {
        retention_period: "P7Y".to_string(),
        immutable_until: "2099-01-01T00:00:00Z".to_string(),
    }
}

#[derive(Clone)]
pub struct ServiceState {
    ledger: Arc<Mutex<PersistentLedger>>,
    identity: Arc<Mutex<IdentityDecider>>,
    raw_store: Arc<Mutex<RawPayloadStore>>,
    events: Arc<Mutex<AppendOnlyStore<CanonicalEvent>>>,
    risk_aggregates: Arc<Mutex<Vec<RiskAggregate>>>,
    pipeline: Arc<IngestPipeline>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let ledger = PersistentLedger::bootstrap(config.ledger_storage).await?;
        Ok(Self {
            ledger: Arc::new(Mutex::new(ledger)),
            identity: Arc::new(Mutex::new(IdentityDecider::new(1))),
            raw_store: Arc::new(Mutex::new(RawPayloadStore::new())),
            events: Arc::new(Mutex::new(AppendOnlyStore::new())),
            risk_aggregates: Arc::new(Mutex::new(Vec::new())),
            pipeline: Arc::new(IngestPipeline::new(default_rule_registry())),
        })
    }

    pub async fn ledger_backend(&self) -> &'static str {
        self.ledger.lock().await.backend_label()
    }

    /// Runs the ingest protocol and records the result: the `IngestRecord`
    /// is always appended to the ledger as an `AuditRecord`; an accepted
    /// `CanonicalEvent` is additionally appended as an `EvidenceSnapshot`
    /// and kept in the in-memory event store for lookup.
    pub async fn ingest(
        &self,
        input: IngestInput,
        event_id: &str,
        observed_at: DateTime<Utc>,
        ingested_at: DateTime<Utc>,
        schema_version: &str,
    ) -> Result<(IngestRecord, Option<CanonicalEvent>), ServiceError> {
        let (record, canonical) = {
            let mut raw_store = self.raw_store.lock().await;
            let mut identity = self.identity.lock().await;
            self.pipeline.ingest(
                input,
                &mut raw_store,
                &mut identity,
                event_id,
                observed_at,
                ingested_at,
                schema_version,
            )
        };

        let record_bytes = serde_json::to_vec(&record)?;
        let mut ledger = self.ledger.lock().await;
        ledger
            .append(
                LedgerEntryType::AuditRecord,
                record_bytes,
                ingested_at,
                default_retention(),
            )
            .await?;

        if let Some(event) = &canonical {
            let event_bytes = serde_json::to_vec(event)?;
            ledger
                .append(
                    LedgerEntryType::EvidenceSnapshot,
                    event_bytes,
                    ingested_at,
                    default_retention(),
                )
                .await?;
            drop(ledger);
            self.events.lock().await.append(event.clone())?;
        }

        Ok((record, canonical))
    }

    pub async fn event(&self, event_id: &str) -> Option<CanonicalEvent> {
        self.events.lock().await.get(event_id).cloned()
    }

    pub async fn record_risk_aggregate(&self, aggregate: RiskAggregate) {
        self.risk_aggregates.lock().await.push(aggregate);
    }

    pub async fn latest_risk_aggregate(&self) -> Option<RiskAggregate> {
        self.risk_aggregates.lock().await.last().cloned()
    }

    pub async fn ledger_entry_count(&self) -> usize {
        self.ledger.lock().await.entries().len()
    }

    pub async fn verify_ledger(&self) -> (bool, Option<String>) {
        self.ledger.lock().await.verify_chain()
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ledger/verify", get(ledger_verify))
        .route("/events/:id", get(get_event))
        .route("/risk/aggregate", get(latest_aggregate))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] TenonError),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] TenonError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => {
                (status, Json(serde_json::json!({ "error": message }))).into_response()
            }
            ApiError::Core(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response(),
            ApiError::Service(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    ledger_backend: String,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "tenon-service",
        ledger_backend: state.ledger_backend().await.to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
struct LedgerVerifyResponse {
    valid: bool,
    reason: Option<String>,
    entry_count: usize,
    backend: String,
}

async fn ledger_verify(State(state): State<ServiceState>) -> Json<LedgerVerifyResponse> {
    let (valid, reason) = state.verify_ledger().await;
    Json(LedgerVerifyResponse {
        valid,
        reason,
        entry_count: state.ledger_entry_count().await,
        backend: state.ledger_backend().await.to_string(),
    })
}

async fn get_event(
    Path(id): Path<String>,
    State(state): State<ServiceState>,
) -> Result<Json<CanonicalEvent>, ApiError> {
    state
        .event(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("event '{id}' not found")))
}

async fn latest_aggregate(
    State(state): State<ServiceState>,
) -> Result<Json<RiskAggregate>, ApiError> {
    state
        .latest_risk_aggregate()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("no risk aggregate has been computed yet"))
}
