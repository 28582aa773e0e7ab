//! Change Control & Versioning (C12): deterministic version resolution by
//! effective-at timestamp, plus the minimal `ChangeEvent` wire record.
//! No ledger persistence is mandated at this layer per `spec.md` §4.12.

use crate::error::TenonError;
use crate::types::{ChangeEvent, ChangeType, Compatibility, VersionTransition};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct VersionEntry {
    version: String,
    effective_at: DateTime<Utc>,
}

/// Per-component ordered lists of `(version, effective_at)`.
#[derive(Debug, Default, Clone)]
pub struct VersionRegistry {
    components: HashMap<String, Vec<VersionEntry>>,
}

impl VersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, component: impl Into<String>, version: impl Into<String>, effective_at: DateTime<Utc>) {
        let entries = self.components.entry(component.into()).or_default();
        entries.push(VersionEntry {
            version: version.into(),
            effective_at,
        });
        entries.sort_by_key(|e| e.effective_at);
    }
}

pub struct VersionResolver;

impl VersionResolver {
    /// Returns the latest entry with `effective_at <= ts`, or `None`.
    pub fn resolve(registry: &VersionRegistry, component: &str, ts: DateTime<Utc>) -> Option<String> {
        registry
            .components
            .get(component)?
            .iter()
            .filter(|e| e.effective_at <= ts)
            .max_by_key(|e| e.effective_at)
            .map(|e| e.version.clone())
    }
}

/// Builder input: the raw facts of a change before it is converted into the
/// minimal `ChangeEvent` wire record. Enforces `Major => Breaking` at
/// construction time so the invariant cannot be bypassed by a caller who
/// forgets to check it (the reference implementation only checked this
/// loosely after the fact).
#[derive(Debug, Clone)]
pub struct ChangeDeclaration {
    pub rfc_id: String,
    pub effective_at: DateTime<Utc>,
    pub components_impacted: Vec<String>,
    pub versions_affected: Vec<VersionTransition>,
    pub change_type: ChangeType,
    pub compatibility: Compatibility,
}

impl ChangeDeclaration {
    pub fn new(
        rfc_id: impl Into<String>,
        effective_at: DateTime<Utc>,
        components_impacted: Vec<String>,
        versions_affected: Vec<VersionTransition>,
        change_type: ChangeType,
        compatibility: Compatibility,
    ) -> Result<Self, TenonError> {
        if change_type == ChangeType::Major && compatibility != Compatibility::Breaking {
            return Err(TenonError::ContractViolation(
                "a Major change_type must declare Breaking compatibility".to_string(),
            ));
        }
        Ok(Self {
            rfc_id: rfc_id.into(),
            effective_at,
            components_impacted,
            versions_affected,
            change_type,
            compatibility,
        })
    }
}

pub struct ChangeEventBuilder;

impl ChangeEventBuilder {
    pub fn build(declaration: ChangeDeclaration) -> ChangeEvent {
        ChangeEvent {
            rfc_id: declaration.rfc_id,
            effective_at: declaration.effective_at,
            components_impacted: declaration.components_impacted,
            versions_affected: declaration.versions_affected,
            change_type: declaration.change_type,
            compatibility: declaration.compatibility,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn resolves_latest_version_at_or_before_timestamp() {
        let mut registry = VersionRegistry::new();
        registry.register("normalizer", "1.0.0", ts(1));
        registry.register("normalizer", "2.0.0", ts(10));
        registry.register("normalizer", "3.0.0", ts(20));

        assert_eq!(
            VersionResolver::resolve(&registry, "normalizer", ts(15)),
            Some("2.0.0".to_string())
        );
        assert_eq!(
            VersionResolver::resolve(&registry, "normalizer", ts(25)),
            Some("3.0.0".to_string())
        );
        assert_eq!(VersionResolver::resolve(&registry, "normalizer", ts(0)), None);
    }

    #[test]
    fn unregistered_component_resolves_to_none() {
        let registry = VersionRegistry::new();
        assert_eq!(VersionResolver::resolve(&registry, "unknown", ts(1)), None);
    }

    #[test]
    fn major_change_must_be_breaking() {
        let result = ChangeDeclaration::new(
            "rfc-1",
            ts(1),
            vec!["correlation".to_string()],
            vec![],
            ChangeType::Major,
            Compatibility::BackwardCompatible,
        );
        assert!(result.is_err());
    }

    #[test]
    fn major_breaking_change_builds_event() {
        let declaration = ChangeDeclaration::new(
            "rfc-2",
            ts(1),
            vec!["correlation".to_string()],
            vec![VersionTransition {
                component: "correlation".to_string(),
                from_version: "1.0.0".to_string(),
                to_version: "2.0.0".to_string(),
            }],
            ChangeType::Major,
            Compatibility::Breaking,
        )
        .unwrap();
        let event = ChangeEventBuilder::build(declaration);
        assert_eq!(event.rfc_id, "rfc-2");
        assert_eq!(event.change_type, ChangeType::Major);
    }
}
