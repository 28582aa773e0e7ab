use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use tenon_core::{
    RawFormat, RiskAssessor, RiskObservation, RiskScope, RiskSeverityLevel, RiskSignalType,
    SeverityMapping, SignalComputer, ThresholdOperator, ThresholdRule, ThresholdSet, TimeWindow,
};
use tenon_service::{build_router, LedgerStorageConfig, ServiceConfig, ServiceState};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LedgerStorageMode {
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "tenond", version, about = "TENON evidence pipeline CLI and service")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Ledger persistence backend.
    #[arg(long, value_enum, default_value_t = LedgerStorageMode::Memory, env = "TENON_LEDGER_STORAGE", global = true)]
    ledger_storage: LedgerStorageMode,
    /// PostgreSQL url for WORM ledger persistence.
    #[arg(long, env = "TENON_LEDGER_DATABASE_URL", global = true)]
    ledger_database_url: Option<String>,
    /// Max PostgreSQL pool connections for ledger persistence.
    #[arg(long, default_value_t = 5, env = "TENON_LEDGER_PG_MAX_CONNECTIONS", global = true)]
    ledger_pg_max_connections: u32,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest a single raw payload through the normalization + identity pipeline.
    Ingest {
        /// Path to the raw payload bytes.
        #[arg(long)]
        input: PathBuf,
        /// Source system that produced the payload.
        #[arg(long)]
        source_system: String,
        /// Adapter-local connector name.
        #[arg(long)]
        source_connector: String,
        /// Source environment (e.g. prod, sandbox).
        #[arg(long, default_value = "prod")]
        source_environment: String,
        /// Adapter version string.
        #[arg(long, default_value = "1.0.0")]
        adapter_version: String,
        /// Schema hint used to resolve a normalization rule.
        #[arg(long)]
        schema_hint: String,
        /// Upstream event id, if the source provides one.
        #[arg(long)]
        source_event_id: Option<String>,
        /// Upstream external reference (e.g. invoice number), if any.
        #[arg(long)]
        external_reference: Option<String>,
    },
    /// Verify the WORM ledger's hash chain end to end.
    VerifyLedger,
    /// Compute a risk aggregate from a file of risk observations (JSON array).
    RiskSummary {
        /// Path to a JSON array of `RiskObservation` records.
        #[arg(long)]
        observations: PathBuf,
    },
    /// Run the read-only HTTP inspection surface.
    Serve {
        /// Socket address to bind, e.g. 127.0.0.1:8080
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
    },
}

fn resolve_ledger_storage(cli: &Cli) -> anyhow::Result<LedgerStorageConfig> {
    match cli.ledger_storage {
        LedgerStorageMode::Memory => Ok(LedgerStorageConfig::memory()),
        LedgerStorageMode::Postgres => {
            let database_url = cli.ledger_database_url.clone().ok_or_else(|| {
                anyhow::anyhow!("ledger-storage=postgres requires --ledger-database-url")
            })?;
            Ok(LedgerStorageConfig::postgres(
                database_url,
                cli.ledger_pg_max_connections,
            ))
        }
    }
}

/// A conservative, hand-approved default threshold set used by `risk-summary`
/// when the operator has not (yet) wired in a governed one via change
/// control. Mirrors the progressive-severity shape of `spec.md` §8 S6.
fn default_thresholds() -> ThresholdSet {
    ThresholdSet {
        threshold_set_id: "default-cli-thresholds".to_string(),
        threshold_set_version: "1.0.0".to_string(),
        approved_change_ref: "cli-bootstrap-default".to_string(),
        rules: vec![ThresholdRule {
            signal_type: RiskSignalType::IdempotencyRejectDuplicateIncrease,
            scope: RiskScope::Global,
            metric_key: "reject_duplicate_rate_pct".to_string(),
            severity_mapping: vec![
                SeverityMapping {
                    severity_level: RiskSeverityLevel::Low,
                    operator: ThresholdOperator::Gte,
                    threshold_value: 1.0,
                },
                SeverityMapping {
                    severity_level: RiskSeverityLevel::Medium,
                    operator: ThresholdOperator::Gte,
                    threshold_value: 5.0,
                },
                SeverityMapping {
                    severity_level: RiskSeverityLevel::High,
                    operator: ThresholdOperator::Gte,
                    threshold_value: 15.0,
                },
                SeverityMapping {
                    severity_level: RiskSeverityLevel::Critical,
                    operator: ThresholdOperator::Gte,
                    threshold_value: 30.0,
                },
            ],
        }],
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tenon_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let ledger_storage = resolve_ledger_storage(&cli)?;
    let config = ServiceConfig { ledger_storage };

    match cli.command {
        Command::Ingest {
            input,
            source_system,
            source_connector,
            source_environment,
            adapter_version,
            schema_hint,
            source_event_id,
            external_reference,
        } => {
            let state = ServiceState::bootstrap(config).await?;
            let bytes = std::fs::read(&input)?;
            let now = Utc::now();
            let event_id = Uuid::new_v4().to_string();

            let ingest_input = tenon_core::IngestInput {
                bytes,
                raw_format: RawFormat::Json,
                source_system,
                source_connector,
                source_environment,
                adapter_version,
                schema_hint,
                source_event_id,
                external_reference,
                source_timestamp: Some(now),
            };

            let (record, event) = state
                .ingest(ingest_input, &event_id, now, now, "1.0.0")
                .await?;

            info!(
                decision = ?record.idempotency_decision,
                status = ?record.status,
                "ingested payload from {}",
                input.display()
            );
            println!("{}", serde_json::to_string_pretty(&record)?);
            if let Some(event) = event {
                println!("{}", serde_json::to_string_pretty(&event)?);
            }
        }
        Command::VerifyLedger => {
            let state = ServiceState::bootstrap(config).await?;
            let (valid, reason) = state.verify_ledger().await;
            let entry_count = state.ledger_entry_count().await;
            if valid {
                info!(entry_count, "ledger chain verified intact");
            } else {
                tracing::error!(reason = ?reason, entry_count, "ledger chain verification failed");
            }
            println!(
                "{}",
                serde_json::json!({
                    "valid": valid,
                    "reason": reason,
                    "entry_count": entry_count,
                })
            );
            if !valid {
                std::process::exit(1);
            }
        }
        Command::RiskSummary { observations } => {
            let raw = std::fs::read_to_string(&observations)?;
            let observations: Vec<RiskObservation> = serde_json::from_str(&raw)?;
            if observations.is_empty() {
                anyhow::bail!("observations file contained no RiskObservation records");
            }

            let computer = SignalComputer::new(default_thresholds())?;
            let mut signals = Vec::new();
            for observation in &observations {
                if let Some(signal) = computer.compute(observation, "1.0.0")? {
                    signals.push(signal);
                }
            }

            let start_at = observations
                .iter()
                .map(|o| o.observed_at)
                .min()
                .expect("non-empty");
            let end_at = observations
                .iter()
                .map(|o| o.observed_at)
                .max()
                .expect("non-empty");
            let window = TimeWindow { start_at, end_at };
            let aggregate = RiskAssessor::assess(&window, &signals, "1.0.0");

            info!(
                overall_risk_level = ?aggregate.overall_risk_level,
                signal_count = signals.len(),
                "computed risk aggregate"
            );
            println!("{}", serde_json::to_string_pretty(&aggregate)?);
        }
        Command::Serve { listen } => {
            let state = ServiceState::bootstrap(config).await?;
            let app = build_router(state);
            let listener = tokio::net::TcpListener::bind(listen).await?;
            info!("tenon-service listening on {}", listener.local_addr()?);
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
