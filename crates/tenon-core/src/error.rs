use thiserror::Error;

/// TENON structural error taxonomy.
///
/// Only *structural* failures are represented here — a bug or an attack, in
/// the spec's words. Expected protocol outcomes (idempotency decisions,
/// identity decisions, normalization failures) are never `Err`; they are
/// returned as decision enums or `ValidationResult`s instead.
#[derive(Debug, Error)]
pub enum TenonError {
    #[error("schema validation failed at '{field}': {message}")]
    SchemaValidation { field: String, message: String },

    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("WORM violation: duplicate id '{0}'")]
    WormViolation(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("protocol rejection: {0}")]
    ProtocolRejection(String),

    #[error("unparseable input: {0}")]
    UnparseableInput(String),

    #[error("chain tampering detected at sequence {sequence}: {reason}")]
    ChainTampering { sequence: u64, reason: String },
}

impl TenonError {
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    pub fn worm(id: impl Into<String>) -> Self {
        Self::WormViolation(id.into())
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation(message.into())
    }
}
