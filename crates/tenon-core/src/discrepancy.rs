//! Discrepancy Detector (C9): applies pure, versioned diagnostic rules to a
//! flow and its state evaluation, emitting typed discrepancies from the
//! closed taxonomy in `types::DiscrepancyType`.

use crate::error::TenonError;
use crate::types::{Discrepancy, DiscrepancyType, SeverityHint};
use chrono::{DateTime, Utc};

/// Everything a diagnostic rule needs to reason over a single flow. Pure
/// input: no clock, no external lookups.
#[derive(Debug, Clone)]
pub struct FlowDiagnosticContext {
    pub flow_id: String,
    pub expected_amount: Option<f64>,
    pub observed_amount: Option<f64>,
    pub amount_tolerance: f64,
    pub expected_currency: Option<String>,
    pub observed_currency: Option<String>,
    pub supporting_states: Vec<String>,
    pub supporting_events: Vec<String>,
    pub supporting_links: Vec<String>,
}

/// One emission from a rule, before `detected_at`/`rule_id`/`rule_version`
/// are injected by the detector.
pub struct DiscrepancyEmission {
    pub discrepancy_type: DiscrepancyType,
    pub severity_hint: SeverityHint,
    pub explanation: String,
    pub supporting_states: Vec<String>,
    pub supporting_events: Vec<String>,
    pub supporting_links: Vec<String>,
}

pub trait DiagnosticRule {
    fn rule_id(&self) -> &str;
    fn rule_version(&self) -> &str;
    /// Must emit `INSUFFICIENT_EVIDENCE` rather than guess when it cannot
    /// defend a classification. Returning `None` means the rule has nothing
    /// to say about this context (distinct from an explicit
    /// `INSUFFICIENT_EVIDENCE` emission).
    fn evaluate(&self, ctx: &FlowDiagnosticContext) -> Option<DiscrepancyEmission>;
}

pub struct AmountMismatchRule;

impl DiagnosticRule for AmountMismatchRule {
    fn rule_id(&self) -> &str {
        "amount_mismatch"
    }
    fn rule_version(&self) -> &str {
        "1.0.0"
    }
    fn evaluate(&self, ctx: &FlowDiagnosticContext) -> Option<DiscrepancyEmission> {
        let (expected, observed) = match (ctx.expected_amount, ctx.observed_amount) {
            (Some(e), Some(o)) => (e, o),
            _ => {
                return Some(DiscrepancyEmission {
                    discrepancy_type: DiscrepancyType::InsufficientEvidence,
                    severity_hint: SeverityHint::Unknown,
                    explanation: "expected or observed amount is missing".to_string(),
                    supporting_states: ctx.supporting_states.clone(),
                    supporting_events: ctx.supporting_events.clone(),
                    supporting_links: ctx.supporting_links.clone(),
                })
            }
        };
        let delta = (expected - observed).abs();
        if delta <= ctx.amount_tolerance {
            return None;
        }
        let severity = if delta > 10.0 {
            SeverityHint::High
        } else {
            SeverityHint::Medium
        };
        Some(DiscrepancyEmission {
            discrepancy_type: DiscrepancyType::AmountMismatch,
            severity_hint: severity,
            explanation: format!(
                "expected amount {expected} differs from observed {observed} by {delta}, exceeding tolerance {}",
                ctx.amount_tolerance
            ),
            supporting_states: ctx.supporting_states.clone(),
            supporting_events: ctx.supporting_events.clone(),
            supporting_links: ctx.supporting_links.clone(),
        })
    }
}

pub struct CurrencyMismatchRule;

impl DiagnosticRule for CurrencyMismatchRule {
    fn rule_id(&self) -> &str {
        "currency_mismatch"
    }
    fn rule_version(&self) -> &str {
        "1.0.0"
    }
    fn evaluate(&self, ctx: &FlowDiagnosticContext) -> Option<DiscrepancyEmission> {
        match (&ctx.expected_currency, &ctx.observed_currency) {
            (Some(e), Some(o)) if e != o => Some(DiscrepancyEmission {
                discrepancy_type: DiscrepancyType::CurrencyMismatch,
                severity_hint: SeverityHint::High,
                explanation: format!("expected currency {e} does not match observed {o}"),
                supporting_states: ctx.supporting_states.clone(),
                supporting_events: ctx.supporting_events.clone(),
                supporting_links: ctx.supporting_links.clone(),
            }),
            _ => None,
        }
    }
}

/// Iterates rules in registry order, collecting every emission, injecting
/// `detected_at`, validating that each emission's rule attribution matches
/// the emitting rule, and returning the result sorted by `(discrepancy_type,
/// rule_id, rule_version, discrepancy_id)` for replay stability.
pub struct DiscrepancyDetector {
    rules: Vec<Box<dyn DiagnosticRule>>,
}

impl Default for DiscrepancyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscrepancyDetector {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn register_rule(&mut self, rule: Box<dyn DiagnosticRule>) {
        self.rules.push(rule);
    }

    pub fn detect(
        &self,
        ctx: &FlowDiagnosticContext,
        detected_at: DateTime<Utc>,
    ) -> Result<Vec<Discrepancy>, TenonError> {
        let mut out = Vec::new();
        for rule in &self.rules {
            let Some(emission) = rule.evaluate(ctx) else {
                continue;
            };
            if emission.supporting_states.is_empty()
                && emission.supporting_events.is_empty()
                && emission.supporting_links.is_empty()
            {
                return Err(TenonError::invariant(format!(
                    "rule '{}' emitted a discrepancy with no supporting evidence",
                    rule.rule_id()
                )));
            }
            if emission.explanation.trim().is_empty() {
                return Err(TenonError::invariant(format!(
                    "rule '{}' emitted an empty explanation",
                    rule.rule_id()
                )));
            }
            let discrepancy_id = crate::hashing::sha256_hex_str(&format!(
                "{}|{}|{}|{:?}",
                ctx.flow_id,
                rule.rule_id(),
                rule.rule_version(),
                emission.discrepancy_type
            ));
            out.push(Discrepancy {
                discrepancy_id,
                flow_id: ctx.flow_id.clone(),
                discrepancy_type: emission.discrepancy_type,
                severity_hint: emission.severity_hint,
                supporting_states: emission.supporting_states,
                supporting_events: emission.supporting_events,
                supporting_links: emission.supporting_links,
                rule_id: rule.rule_id().to_string(),
                rule_version: rule.rule_version().to_string(),
                explanation: emission.explanation,
                detected_at,
            });
        }

        out.sort_by(|a, b| {
            (format!("{:?}", a.discrepancy_type), &a.rule_id, &a.rule_version, &a.discrepancy_id).cmp(&(
                format!("{:?}", b.discrepancy_type),
                &b.rule_id,
                &b.rule_version,
                &b.discrepancy_id,
            ))
        });

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 22, 10, 0, 0).unwrap()
    }

    fn ctx(expected: f64, observed: f64, tolerance: f64) -> FlowDiagnosticContext {
        FlowDiagnosticContext {
            flow_id: "flow-001".to_string(),
            expected_amount: Some(expected),
            observed_amount: Some(observed),
            amount_tolerance: tolerance,
            expected_currency: Some("USD".to_string()),
            observed_currency: Some("USD".to_string()),
            supporting_states: vec!["state-1".to_string()],
            supporting_events: vec![],
            supporting_links: vec![],
        }
    }

    fn detector() -> DiscrepancyDetector {
        let mut d = DiscrepancyDetector::new();
        d.register_rule(Box::new(AmountMismatchRule));
        d.register_rule(Box::new(CurrencyMismatchRule));
        d
    }

    #[test]
    fn within_tolerance_emits_nothing() {
        let result = detector().detect(&ctx(100.0, 100.5, 1.0), ts()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn large_delta_emits_high_severity() {
        let result = detector().detect(&ctx(100.0, 95.0, 1.0), ts()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].discrepancy_type, DiscrepancyType::AmountMismatch);
        assert_eq!(result[0].severity_hint, SeverityHint::High);
        assert_eq!(result[0].detected_at, ts());
    }

    #[test]
    fn small_delta_emits_medium_severity() {
        let result = detector().detect(&ctx(100.0, 91.0, 1.0), ts()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].severity_hint, SeverityHint::Medium);
    }

    #[test]
    fn missing_amount_emits_insufficient_evidence() {
        let mut context = ctx(100.0, 100.0, 1.0);
        context.observed_amount = None;
        let result = detector().detect(&context, ts()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(
            result[0].discrepancy_type,
            DiscrepancyType::InsufficientEvidence
        );
    }

    #[test]
    fn results_are_sorted_stably() {
        let mut context = ctx(100.0, 50.0, 1.0);
        context.observed_currency = Some("EUR".to_string());
        let result = detector().detect(&context, ts()).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].discrepancy_type, DiscrepancyType::AmountMismatch);
        assert_eq!(result[1].discrepancy_type, DiscrepancyType::CurrencyMismatch);
    }
}
