//! Normalization (half of C5): declarative `raw_path -> canonical_path`
//! mapping rules, keyed by `(source_system, raw_format, schema_hint)`.
//! A field with no mapped value carries the `UNKNOWN` sentinel plus a
//! warning rather than being omitted — normalization never raises for a
//! missing field, only for a missing *rule*.

use crate::types::{RawFormat, SourceSystem, UNKNOWN};
use serde_json::Value;
use std::collections::HashMap;

/// One `raw_path -> canonical_field` mapping. `raw_path` is a JSON Pointer
/// (RFC 6901), e.g. `/payment/amount`.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub canonical_field: String,
    pub raw_path: String,
}

impl FieldMapping {
    pub fn new(canonical_field: impl Into<String>, raw_path: impl Into<String>) -> Self {
        Self {
            canonical_field: canonical_field.into(),
            raw_path: raw_path.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizationRule {
    pub source_system: SourceSystem,
    pub raw_format: RawFormat,
    pub schema_hint: String,
    pub normalizer_version: String,
    pub mappings: Vec<FieldMapping>,
    /// Raw fields this rule is known to discard during mapping — carried
    /// through to every diff so lossiness is visible even when no warning
    /// fires.
    pub lossy_fields: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: HashMap<(SourceSystem, RawFormat, String), NormalizationRule>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, rule: NormalizationRule) {
        let key = (rule.source_system, rule.raw_format, rule.schema_hint.clone());
        self.rules.insert(key, rule);
    }

    pub fn resolve(
        &self,
        source_system: SourceSystem,
        raw_format: RawFormat,
        schema_hint: &str,
    ) -> Option<&NormalizationRule> {
        self.rules
            .get(&(source_system, raw_format, schema_hint.to_string()))
    }
}

/// One mapped field's outcome, kept regardless of whether a warning fired —
/// the diff document is always written (`spec.md` §4.5 step 3), not only on
/// loss.
#[derive(Debug, Clone)]
pub struct FieldDiff {
    pub canonical_field: String,
    pub raw_path: String,
    pub raw_value_present: bool,
    pub canonical_value: String,
}

#[derive(Debug, Clone)]
pub struct NormalizationDiff {
    pub normalizer_version: String,
    pub fields: Vec<FieldDiff>,
    pub lossy_fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NormalizationOutcome {
    pub fields: HashMap<String, String>,
    pub warnings: Vec<String>,
    pub diff: NormalizationDiff,
}

impl NormalizationOutcome {
    pub fn field(&self, name: &str) -> String {
        self.fields
            .get(name)
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_string())
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

pub struct Normalizer;

impl Normalizer {
    pub fn apply(rule: &NormalizationRule, raw: &Value) -> NormalizationOutcome {
        let mut fields = HashMap::new();
        let mut warnings = Vec::new();
        let mut diffs = Vec::new();

        for mapping in &rule.mappings {
            let raw_value = raw.pointer(&mapping.raw_path);
            let present = matches!(raw_value, Some(v) if !v.is_null());
            let canonical_value = if present {
                stringify(raw_value.unwrap())
            } else {
                warnings.push(format!(
                    "no value at raw path '{}' for canonical field '{}'; recorded as UNKNOWN",
                    mapping.raw_path, mapping.canonical_field
                ));
                UNKNOWN.to_string()
            };

            diffs.push(FieldDiff {
                canonical_field: mapping.canonical_field.clone(),
                raw_path: mapping.raw_path.clone(),
                raw_value_present: present,
                canonical_value: canonical_value.clone(),
            });
            fields.insert(mapping.canonical_field.clone(), canonical_value);
        }

        NormalizationOutcome {
            fields,
            warnings,
            diff: NormalizationDiff {
                normalizer_version: rule.normalizer_version.clone(),
                fields: diffs,
                lossy_fields: rule.lossy_fields.clone(),
            },
        }
    }

    /// Used when no rule matches `(source_system, raw_format, schema_hint)`
    /// — every canonical field is UNKNOWN and a single warning explains why,
    /// rather than silently producing an empty event.
    pub fn unmapped(source_system: &str, raw_format: RawFormat, schema_hint: &str) -> NormalizationOutcome {
        NormalizationOutcome {
            fields: HashMap::new(),
            warnings: vec![format!(
                "no normalization rule registered for source_system={source_system}, raw_format={raw_format:?}, schema_hint={schema_hint}"
            )],
            diff: NormalizationDiff {
                normalizer_version: UNKNOWN.to_string(),
                fields: vec![],
                lossy_fields: vec![],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bank_json_rule() -> NormalizationRule {
        NormalizationRule {
            source_system: SourceSystem::Bank,
            raw_format: RawFormat::Json,
            schema_hint: "bank.payment.v1".to_string(),
            normalizer_version: "1.0.0".to_string(),
            mappings: vec![
                FieldMapping::new("amount", "/payment/amount"),
                FieldMapping::new("currency", "/payment/currency"),
                FieldMapping::new("direction", "/payment/direction"),
                FieldMapping::new("event_type", "/payment/status"),
            ],
            lossy_fields: vec!["payment/internal_memo".to_string()],
        }
    }

    #[test]
    fn mapped_fields_are_extracted() {
        let raw = json!({"payment": {"amount": 100.5, "currency": "USD", "direction": "IN", "status": "settled"}});
        let outcome = Normalizer::apply(&bank_json_rule(), &raw);
        assert_eq!(outcome.field("amount"), "100.5");
        assert_eq!(outcome.field("currency"), "USD");
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.diff.fields.len(), 4);
    }

    #[test]
    fn missing_raw_value_yields_unknown_and_warning() {
        let raw = json!({"payment": {"amount": 100.5}});
        let outcome = Normalizer::apply(&bank_json_rule(), &raw);
        assert_eq!(outcome.field("currency"), UNKNOWN);
        assert_eq!(outcome.warnings.len(), 3);
    }

    #[test]
    fn diff_is_always_produced_even_with_no_warnings() {
        let raw = json!({"payment": {"amount": 1, "currency": "USD", "direction": "IN", "status": "settled"}});
        let outcome = Normalizer::apply(&bank_json_rule(), &raw);
        assert!(!outcome.diff.fields.is_empty());
        assert_eq!(outcome.diff.lossy_fields, vec!["payment/internal_memo".to_string()]);
    }

    #[test]
    fn registry_resolves_by_exact_triple() {
        let mut registry = RuleRegistry::new();
        registry.register(bank_json_rule());
        assert!(registry
            .resolve(SourceSystem::Bank, RawFormat::Json, "bank.payment.v1")
            .is_some());
        assert!(registry
            .resolve(SourceSystem::Bank, RawFormat::Csv, "bank.payment.v1")
            .is_none());
        assert!(registry
            .resolve(SourceSystem::Psp, RawFormat::Json, "bank.payment.v1")
            .is_none());
    }

    #[test]
    fn unmapped_triple_produces_single_explanatory_warning() {
        let outcome = Normalizer::unmapped("PSP", RawFormat::Json, "unknown.v1");
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.fields.is_empty());
    }
}
