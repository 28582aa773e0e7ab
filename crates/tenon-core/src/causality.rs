//! Causality Attributor (C10): mirrors the discrepancy detector's pure,
//! versioned rule pipeline over causes rather than symptoms. Multiple
//! attributions per discrepancy are preserved — this component never
//! collapses ambiguity to a single "most likely" cause.

use crate::types::{CausalityAttribution, CauseType, Discrepancy};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct CausalContext {
    pub discrepancy: Discrepancy,
    pub historical_event_ids: Vec<String>,
    pub recent_rule_change: bool,
    pub recent_normalizer_change: bool,
    pub recent_correlation_ambiguity: bool,
}

pub struct CauseEmission {
    pub cause_type: CauseType,
    pub confidence_level: f64,
    pub explanation: String,
    pub supporting_events: Vec<String>,
    pub supporting_states: Vec<String>,
    pub supporting_rules: Vec<String>,
}

pub trait CausalRule {
    fn rule_id(&self) -> &str;
    fn rule_version(&self) -> &str;
    fn evaluate(&self, ctx: &CausalContext) -> Vec<CauseEmission>;
}

pub struct NormalizationChangeRule;

impl CausalRule for NormalizationChangeRule {
    fn rule_id(&self) -> &str {
        "normalization_change"
    }
    fn rule_version(&self) -> &str {
        "1.0.0"
    }
    fn evaluate(&self, ctx: &CausalContext) -> Vec<CauseEmission> {
        if !ctx.recent_normalizer_change {
            return vec![];
        }
        vec![CauseEmission {
            cause_type: CauseType::NormalizationLoss,
            confidence_level: 0.6,
            explanation: "a normalizer version change preceded this discrepancy".to_string(),
            supporting_events: ctx.discrepancy.supporting_events.clone(),
            supporting_states: ctx.discrepancy.supporting_states.clone(),
            supporting_rules: vec![self.rule_id().to_string()],
        }]
    }
}

pub struct CorrelationAmbiguityRule;

impl CausalRule for CorrelationAmbiguityRule {
    fn rule_id(&self) -> &str {
        "correlation_ambiguity"
    }
    fn rule_version(&self) -> &str {
        "1.0.0"
    }
    fn evaluate(&self, ctx: &CausalContext) -> Vec<CauseEmission> {
        if !ctx.recent_correlation_ambiguity {
            return vec![];
        }
        vec![CauseEmission {
            cause_type: CauseType::CorrelationAmbiguity,
            confidence_level: 0.5,
            explanation: "multiple plausible correlation links were present for this flow"
                .to_string(),
            supporting_events: ctx.discrepancy.supporting_events.clone(),
            supporting_states: ctx.discrepancy.supporting_states.clone(),
            supporting_rules: vec![self.rule_id().to_string()],
        }]
    }
}

pub struct ChangeControlRule;

impl CausalRule for ChangeControlRule {
    fn rule_id(&self) -> &str {
        "change_control"
    }
    fn rule_version(&self) -> &str {
        "1.0.0"
    }
    fn evaluate(&self, ctx: &CausalContext) -> Vec<CauseEmission> {
        if !ctx.recent_rule_change {
            return vec![];
        }
        vec![CauseEmission {
            cause_type: CauseType::ExternalSystemChange,
            confidence_level: 0.4,
            explanation: "a versioned rule change preceded this discrepancy".to_string(),
            supporting_events: ctx.discrepancy.supporting_events.clone(),
            supporting_states: ctx.discrepancy.supporting_states.clone(),
            supporting_rules: vec![self.rule_id().to_string()],
        }]
    }
}

/// Mirrors `DiscrepancyDetector`: iterates rules in registry order,
/// collects every emission, and sorts by `(cause_type, -confidence,
/// causality_id)`. Two conservatism rules: (a) if all rules return empty,
/// emit a single `UNKNOWN_CAUSE` with confidence 0; (b) multiple plausible
/// causes are all preserved.
pub struct CausalityAttributor {
    rules: Vec<Box<dyn CausalRule>>,
    model_version: String,
}

impl CausalityAttributor {
    pub fn new(model_version: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            model_version: model_version.into(),
        }
    }

    pub fn register_rule(&mut self, rule: Box<dyn CausalRule>) {
        self.rules.push(rule);
    }

    pub fn attribute(
        &self,
        ctx: &CausalContext,
        attributed_at: DateTime<Utc>,
    ) -> Vec<CausalityAttribution> {
        let mut emissions = Vec::new();
        for rule in &self.rules {
            emissions.extend(rule.evaluate(ctx));
        }

        if emissions.is_empty() {
            emissions.push(CauseEmission {
                cause_type: CauseType::UnknownCause,
                confidence_level: 0.0,
                explanation: "no rule could defend a causal classification; evidence was insufficient"
                    .to_string(),
                supporting_events: ctx.discrepancy.supporting_events.clone(),
                supporting_states: ctx.discrepancy.supporting_states.clone(),
                supporting_rules: vec![],
            });
        }

        let mut out: Vec<CausalityAttribution> = emissions
            .into_iter()
            .map(|emission| {
                let causality_id = crate::hashing::sha256_hex_str(&format!(
                    "{}|{:?}|{}",
                    ctx.discrepancy.discrepancy_id, emission.cause_type, attributed_at
                ));
                CausalityAttribution {
                    causality_id,
                    discrepancy_id: ctx.discrepancy.discrepancy_id.clone(),
                    cause_type: emission.cause_type,
                    confidence_level: emission.confidence_level,
                    supporting_events: emission.supporting_events,
                    supporting_states: emission.supporting_states,
                    supporting_rules: emission.supporting_rules,
                    explanation: emission.explanation,
                    attributed_at,
                    model_version: self.model_version.clone(),
                }
            })
            .collect();

        out.sort_by(|a, b| {
            (
                format!("{:?}", a.cause_type),
                -(a.confidence_level * 1e9) as i64,
                &a.causality_id,
            )
                .cmp(&(
                    format!("{:?}", b.cause_type),
                    -(b.confidence_level * 1e9) as i64,
                    &b.causality_id,
                ))
        });

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DiscrepancyType, SeverityHint};
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 22, 10, 0, 0).unwrap()
    }

    fn discrepancy() -> Discrepancy {
        Discrepancy {
            discrepancy_id: "disc-1".to_string(),
            flow_id: "flow-1".to_string(),
            discrepancy_type: DiscrepancyType::AmountMismatch,
            severity_hint: SeverityHint::High,
            supporting_states: vec!["state-1".to_string()],
            supporting_events: vec![],
            supporting_links: vec![],
            rule_id: "amount_mismatch".to_string(),
            rule_version: "1.0.0".to_string(),
            explanation: "delta exceeded tolerance".to_string(),
            detected_at: ts(),
        }
    }

    fn attributor() -> CausalityAttributor {
        let mut a = CausalityAttributor::new("1.0.0");
        a.register_rule(Box::new(NormalizationChangeRule));
        a.register_rule(Box::new(CorrelationAmbiguityRule));
        a.register_rule(Box::new(ChangeControlRule));
        a
    }

    #[test]
    fn no_signal_emits_single_unknown_cause() {
        let ctx = CausalContext {
            discrepancy: discrepancy(),
            historical_event_ids: vec![],
            recent_rule_change: false,
            recent_normalizer_change: false,
            recent_correlation_ambiguity: false,
        };
        let result = attributor().attribute(&ctx, ts());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].cause_type, CauseType::UnknownCause);
        assert_eq!(result[0].confidence_level, 0.0);
    }

    #[test]
    fn multiple_plausible_causes_are_all_preserved() {
        let ctx = CausalContext {
            discrepancy: discrepancy(),
            historical_event_ids: vec![],
            recent_rule_change: true,
            recent_normalizer_change: true,
            recent_correlation_ambiguity: true,
        };
        let result = attributor().attribute(&ctx, ts());
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn sorted_by_cause_type_then_descending_confidence() {
        let ctx = CausalContext {
            discrepancy: discrepancy(),
            historical_event_ids: vec![],
            recent_rule_change: true,
            recent_normalizer_change: true,
            recent_correlation_ambiguity: false,
        };
        let result = attributor().attribute(&ctx, ts());
        assert_eq!(result.len(), 2);
        assert!(result[0].confidence_level >= result[1].confidence_level || result[0].cause_type != result[1].cause_type);
    }
}
