//! WORM ledger persistence: the in-memory hash-chained ledger is always the
//! authoritative structure, optionally mirrored to PostgreSQL so it
//! survives a restart. On bootstrap with a Postgres backend, entries are
//! loaded back and the chain is re-verified before the service starts.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tenon_core::{LedgerEntry, LedgerEntryType, RetentionPolicy, TenonError, WormLedger};

#[derive(Debug, Clone)]
pub enum LedgerStorageConfig {
    Memory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl LedgerStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for LedgerStorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Debug, Clone)]
enum Backend {
    Memory,
    Postgres(PostgresLedgerStore),
}

#[derive(Debug, Clone)]
pub struct PersistentLedger {
    ledger: WormLedger,
    backend: Backend,
}

impl PersistentLedger {
    pub async fn bootstrap(config: LedgerStorageConfig) -> Result<Self, TenonError> {
        match config {
            LedgerStorageConfig::Memory => Ok(Self {
                ledger: WormLedger::new(),
                backend: Backend::Memory,
            }),
            LedgerStorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresLedgerStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                let entries = store.load_entries().await?;
                let ledger = WormLedger::from_entries(entries)?;
                Ok(Self {
                    ledger,
                    backend: Backend::Postgres(store),
                })
            }
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            Backend::Memory => "memory",
            Backend::Postgres(_) => "postgres",
        }
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        self.ledger.all()
    }

    pub fn verify_chain(&self) -> (bool, Option<String>) {
        self.ledger.verify_chain()
    }

    pub async fn append(
        &mut self,
        entry_type: LedgerEntryType,
        content: Vec<u8>,
        written_at: DateTime<Utc>,
        retention_policy: RetentionPolicy,
    ) -> Result<LedgerEntry, TenonError> {
        let entry = self
            .ledger
            .append(entry_type, content, written_at, retention_policy)?;
        if let Backend::Postgres(store) = &self.backend {
            store.insert_entry(&entry).await?;
        }
        Ok(entry)
    }
}

#[derive(Debug, Clone)]
struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    async fn connect(database_url: &str, max_connections: u32) -> Result<Self, TenonError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| TenonError::contract(format!("postgres connect failed: {e}")))?;
        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> Result<(), TenonError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenon_ledger_entries (
                sequence_number BIGINT PRIMARY KEY,
                entry_type TEXT NOT NULL,
                content BYTEA NOT NULL,
                content_hash TEXT NOT NULL,
                written_at TIMESTAMPTZ NOT NULL,
                retention_period TEXT NOT NULL,
                immutable_until TEXT NOT NULL,
                previous_entry_hash TEXT NOT NULL,
                entry_header_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TenonError::contract(format!("postgres schema create failed: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tenon_ledger_entry_type ON tenon_ledger_entries (entry_type)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TenonError::contract(format!("postgres index create failed: {e}")))?;

        Ok(())
    }

    async fn load_entries(&self) -> Result<Vec<LedgerEntry>, TenonError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence_number, entry_type, content, content_hash, written_at,
                   retention_period, immutable_until, previous_entry_hash, entry_header_hash
            FROM tenon_ledger_entries
            ORDER BY sequence_number ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TenonError::contract(format!("postgres load failed: {e}")))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let sequence_number: i64 = row
                .try_get("sequence_number")
                .map_err(|e| TenonError::contract(format!("postgres decode sequence_number failed: {e}")))?;
            let entry_type_str: String = row
                .try_get("entry_type")
                .map_err(|e| TenonError::contract(format!("postgres decode entry_type failed: {e}")))?;

            entries.push(LedgerEntry {
                sequence_number: sequence_number
                    .try_into()
                    .map_err(|_| TenonError::contract("negative sequence_number in storage"))?,
                entry_type: parse_entry_type(&entry_type_str)?,
                content: row
                    .try_get("content")
                    .map_err(|e| TenonError::contract(format!("postgres decode content failed: {e}")))?,
                content_hash: row
                    .try_get("content_hash")
                    .map_err(|e| TenonError::contract(format!("postgres decode content_hash failed: {e}")))?,
                written_at: row
                    .try_get("written_at")
                    .map_err(|e| TenonError::contract(format!("postgres decode written_at failed: {e}")))?,
                retention_policy: RetentionPolicy {
                    retention_period: row.try_get("retention_period").map_err(|e| {
                        TenonError::contract(format!("postgres decode retention_period failed: {e}"))
                    })?,
                    immutable_until: row.try_get("immutable_until").map_err(|e| {
                        TenonError::contract(format!("postgres decode immutable_until failed: {e}"))
                    })?,
                },
                previous_entry_hash: row.try_get("previous_entry_hash").map_err(|e| {
                    TenonError::contract(format!("postgres decode previous_entry_hash failed: {e}"))
                })?,
                entry_header_hash: row.try_get("entry_header_hash").map_err(|e| {
                    TenonError::contract(format!("postgres decode entry_header_hash failed: {e}"))
                })?,
            });
        }

        Ok(entries)
    }

    async fn insert_entry(&self, entry: &LedgerEntry) -> Result<(), TenonError> {
        let sequence_number: i64 = entry
            .sequence_number
            .try_into()
            .map_err(|_| TenonError::contract("sequence_number exceeds postgres BIGINT range"))?;

        sqlx::query(
            r#"
            INSERT INTO tenon_ledger_entries (
                sequence_number, entry_type, content, content_hash, written_at,
                retention_period, immutable_until, previous_entry_hash, entry_header_hash
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(sequence_number)
        .bind(entry_type_to_str(&entry.entry_type))
        .bind(&entry.content)
        .bind(&entry.content_hash)
        .bind(entry.written_at)
        .bind(&entry.retention_policy.retention_period)
        .bind(&entry.retention_policy.immutable_until)
        .bind(&entry.previous_entry_hash)
        .bind(&entry.entry_header_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| TenonError::contract(format!("postgres insert failed: {e}")))?;

        Ok(())
    }
}

fn entry_type_to_str(entry_type: &LedgerEntryType) -> &'static str {
    match entry_type {
        LedgerEntryType::EvidenceSnapshot => "evidence_snapshot",
        LedgerEntryType::StateCheckpoint => "state_checkpoint",
        LedgerEntryType::AuditRecord => "audit_record",
        LedgerEntryType::DiscrepancyLog => "discrepancy_log",
    }
}

fn parse_entry_type(value: &str) -> Result<LedgerEntryType, TenonError> {
    match value {
        "evidence_snapshot" => Ok(LedgerEntryType::EvidenceSnapshot),
        "state_checkpoint" => Ok(LedgerEntryType::StateCheckpoint),
        "audit_record" => Ok(LedgerEntryType::AuditRecord),
        "discrepancy_log" => Ok(LedgerEntryType::DiscrepancyLog),
        other => Err(TenonError::contract(format!(
            "unknown ledger entry_type '{other}' in postgres"
        ))),
    }
}
