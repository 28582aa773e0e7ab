//! Money-State Machine (C8): a diagnostic finite-state evaluator over
//! events and correlation links. Never reads a clock — `evaluated_at` and
//! `evidence_pointer` are always injected by the caller.

use crate::error::TenonError;
use crate::hashing::sha256_hex_str;
use crate::types::{MoneyState, MoneyStateEvaluation};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Closed set of evidence kinds the machine reasons over, inferred from
/// event types and correlation links by the caller before evaluation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateEvidence {
    InitiationObserved,
    AuthorizationConfirmation,
    AuthorizationDenial,
    SettlementConfirmation,
    ProcessingFailure,
    TimeoutExceeded,
    ReversalLink,
    RefundLink,
    ExpiryObserved,
}

fn is_success_terminal(evidence: &StateEvidence) -> bool {
    matches!(evidence, StateEvidence::SettlementConfirmation)
}

fn is_failure_terminal(evidence: &StateEvidence) -> bool {
    matches!(
        evidence,
        StateEvidence::ProcessingFailure
            | StateEvidence::AuthorizationDenial
            | StateEvidence::TimeoutExceeded
    )
}

/// A declared transition. On construction, `StateMachine::new` verifies that
/// `from`/`to` are both members of the 11-value `MoneyState` set — this is
/// trivially true in Rust since `MoneyState` is already a closed enum, but
/// the constructor also rejects transitions whose evidence lists overlap
/// between required and forbidden, which would make the rule unsatisfiable.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: MoneyState,
    pub to: MoneyState,
    pub required_evidence: Vec<StateEvidence>,
    pub forbidden_evidence: Vec<StateEvidence>,
    pub timeout_policy: Option<String>,
    pub version: String,
    pub confidence: f64,
}

pub struct StateMachine {
    transitions: Vec<Transition>,
    machine_version: String,
    state_version: String,
}

impl StateMachine {
    pub fn new(
        machine_version: impl Into<String>,
        state_version: impl Into<String>,
        transitions: Vec<Transition>,
    ) -> Result<Self, TenonError> {
        for transition in &transitions {
            let required: HashSet<_> = transition.required_evidence.iter().collect();
            let forbidden: HashSet<_> = transition.forbidden_evidence.iter().collect();
            if !required.is_disjoint(&forbidden) {
                return Err(TenonError::ContractViolation(format!(
                    "transition {:?}->{:?} has overlapping required/forbidden evidence",
                    transition.from, transition.to
                )));
            }
        }
        Ok(Self {
            transitions,
            machine_version: machine_version.into(),
            state_version: state_version.into(),
        })
    }

    /// Deterministic hash of `(flow_id, sorted event_ids, sorted link_ids,
    /// evaluated_at, evidence_pointer)` so replay reproduces the same id.
    pub fn evaluation_id(
        flow_id: &str,
        event_ids: &[String],
        link_ids: &[String],
        evaluated_at: DateTime<Utc>,
        evidence_pointer: &str,
    ) -> String {
        let mut events = event_ids.to_vec();
        events.sort();
        let mut links = link_ids.to_vec();
        links.sort();
        let canonical = format!(
            "{flow_id}|{}|{}|{}|{evidence_pointer}",
            events.join(","),
            links.join(","),
            crate::types::to_rfc3339(evaluated_at)
        );
        sha256_hex_str(&canonical)
    }

    /// Evaluate a flow's money state from an evidence projection. `evaluated_at`
    /// and `evidence_pointer` are injected by the caller; the core never
    /// reads a clock.
    pub fn evaluate(
        &self,
        flow_id: &str,
        event_id: &str,
        event_ids: &[String],
        link_ids: &[String],
        evidence: &[StateEvidence],
        evaluated_at: DateTime<Utc>,
        evidence_pointer: &str,
    ) -> MoneyStateEvaluation {
        let evaluation_id =
            Self::evaluation_id(flow_id, event_ids, link_ids, evaluated_at, evidence_pointer);

        let has_success_terminal = evidence.iter().any(is_success_terminal);
        let has_failure_terminal = evidence.iter().any(is_failure_terminal);

        let (state, reason, confidence) = if has_success_terminal && has_failure_terminal {
            (
                MoneyState::Ambiguous,
                "both success-terminal and failure-terminal evidence present".to_string(),
                0.5,
            )
        } else {
            let present: HashSet<_> = evidence.iter().collect();
            let mut plausible: Vec<&Transition> = self
                .transitions
                .iter()
                .filter(|t| {
                    t.required_evidence.iter().all(|e| present.contains(e))
                        && t.forbidden_evidence.iter().all(|e| !present.contains(e))
                })
                .collect();

            if plausible.is_empty() {
                default_fallback(evidence)
            } else {
                plausible.sort_by(|a, b| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                let top_confidence = plausible[0].confidence;
                let terminal_candidates: Vec<&&Transition> = plausible
                    .iter()
                    .filter(|t| (t.confidence - top_confidence).abs() < f64::EPSILON)
                    .collect();
                let distinct_targets: HashSet<MoneyState> =
                    terminal_candidates.iter().map(|t| t.to).collect();
                if distinct_targets.len() > 1 {
                    (
                        MoneyState::Ambiguous,
                        "multiple equally plausible terminal states".to_string(),
                        0.5,
                    )
                } else {
                    let chosen = plausible[0];
                    (
                        chosen.to,
                        format!("transition {:?}->{:?} satisfied", chosen.from, chosen.to),
                        chosen.confidence,
                    )
                }
            }
        };

        MoneyStateEvaluation {
            evaluation_id,
            flow_id: flow_id.to_string(),
            event_id: event_id.to_string(),
            timestamp: crate::types::to_rfc3339(evaluated_at),
            state,
            transition_reason: reason,
            evidence_pointer: evidence_pointer.to_string(),
            state_version: self.state_version.clone(),
            machine_version: self.machine_version.clone(),
            confidence_level: confidence,
            evaluated_at,
        }
    }
}

/// Small set of pattern-based defaults applied when no declared transition
/// matches. Falls back to `UNKNOWN` with confidence 0.1 when nothing fits.
fn default_fallback(evidence: &[StateEvidence]) -> (MoneyState, String, f64) {
    if evidence.contains(&StateEvidence::InitiationObserved) && evidence.len() == 1 {
        return (
            MoneyState::Initiated,
            "default pattern: initiation observed only".to_string(),
            0.3,
        );
    }
    if evidence.is_empty() {
        return (
            MoneyState::Expected,
            "default pattern: no evidence yet".to_string(),
            0.3,
        );
    }
    (
        MoneyState::Unknown,
        "no declared or default transition matched".to_string(),
        0.1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 22, 10, 0, 0).unwrap()
    }

    fn sample_machine() -> StateMachine {
        StateMachine::new(
            "1.0.0",
            "1.0.0",
            vec![
                Transition {
                    from: MoneyState::Initiated,
                    to: MoneyState::Authorized,
                    required_evidence: vec![StateEvidence::AuthorizationConfirmation],
                    forbidden_evidence: vec![],
                    timeout_policy: None,
                    version: "1.0.0".to_string(),
                    confidence: 0.9,
                },
                Transition {
                    from: MoneyState::Authorized,
                    to: MoneyState::Settled,
                    required_evidence: vec![StateEvidence::SettlementConfirmation],
                    forbidden_evidence: vec![],
                    timeout_policy: None,
                    version: "1.0.0".to_string(),
                    confidence: 0.95,
                },
                Transition {
                    from: MoneyState::Authorized,
                    to: MoneyState::Failed,
                    required_evidence: vec![StateEvidence::ProcessingFailure],
                    forbidden_evidence: vec![],
                    timeout_policy: None,
                    version: "1.0.0".to_string(),
                    confidence: 0.9,
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn rejects_overlapping_required_and_forbidden() {
        let result = StateMachine::new(
            "1.0.0",
            "1.0.0",
            vec![Transition {
                from: MoneyState::Initiated,
                to: MoneyState::Authorized,
                required_evidence: vec![StateEvidence::AuthorizationConfirmation],
                forbidden_evidence: vec![StateEvidence::AuthorizationConfirmation],
                timeout_policy: None,
                version: "1.0.0".to_string(),
                confidence: 0.9,
            }],
        );
        assert!(result.is_err());
    }

    #[test]
    fn settlement_confirmation_settles() {
        let machine = sample_machine();
        let eval = machine.evaluate(
            "flow-1",
            "evt-1",
            &["evt-1".to_string()],
            &[],
            &[StateEvidence::SettlementConfirmation],
            ts(),
            "evidence:ptr",
        );
        assert_eq!(eval.state, MoneyState::Settled);
        assert!(eval.confidence_level > 0.9);
    }

    #[test]
    fn conflicting_terminal_evidence_is_ambiguous() {
        let machine = sample_machine();
        let eval = machine.evaluate(
            "flow-1",
            "evt-1",
            &["evt-1".to_string()],
            &[],
            &[
                StateEvidence::SettlementConfirmation,
                StateEvidence::ProcessingFailure,
            ],
            ts(),
            "evidence:ptr",
        );
        assert_eq!(eval.state, MoneyState::Ambiguous);
        assert_eq!(eval.confidence_level, 0.5);
    }

    #[test]
    fn no_evidence_falls_back_to_expected() {
        let machine = sample_machine();
        let eval = machine.evaluate(
            "flow-1",
            "evt-1",
            &["evt-1".to_string()],
            &[],
            &[],
            ts(),
            "evidence:ptr",
        );
        assert_eq!(eval.state, MoneyState::Expected);
    }

    #[test]
    fn unmatched_evidence_falls_back_to_unknown() {
        let machine = sample_machine();
        let eval = machine.evaluate(
            "flow-1",
            "evt-1",
            &["evt-1".to_string()],
            &[],
            &[StateEvidence::ExpiryObserved, StateEvidence::ReversalLink],
            ts(),
            "evidence:ptr",
        );
        assert_eq!(eval.state, MoneyState::Unknown);
        assert_eq!(eval.confidence_level, 0.1);
    }

    #[test]
    fn evaluation_id_is_deterministic_and_order_independent() {
        let id1 = StateMachine::evaluation_id(
            "flow-1",
            &["b".to_string(), "a".to_string()],
            &["l2".to_string(), "l1".to_string()],
            ts(),
            "ptr",
        );
        let id2 = StateMachine::evaluation_id(
            "flow-1",
            &["a".to_string(), "b".to_string()],
            &["l1".to_string(), "l2".to_string()],
            ts(),
            "ptr",
        );
        assert_eq!(id1, id2);
    }
}
