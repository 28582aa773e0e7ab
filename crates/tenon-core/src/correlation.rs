//! Correlation Engine (C7): proposes evidence-backed links between
//! canonical events under versioned rules.

use crate::error::TenonError;
use crate::hashing::sha256_hex_str;
use crate::types::{CorrelationEvidence, CorrelationLink, EvidenceType, MoneyFlow};
use chrono::{DateTime, Utc};

/// Fixed per-evidence-type contribution to the aggregate score. Bounded
/// constants, never externally configured.
fn evidence_contribution(evidence_type: EvidenceType) -> f64 {
    match evidence_type {
        EvidenceType::ReferenceMatch => 0.9,
        EvidenceType::AmountTolerance => 0.6,
        EvidenceType::TimeWindow => 0.4,
        EvidenceType::SequenceObserved => 0.3,
        EvidenceType::FieldMatch => 0.5,
        EvidenceType::ContradictionFlag => -0.8,
    }
}

/// Below this, a candidate link is dropped rather than persisted.
pub const SCORE_FLOOR: f64 = 0.1;

/// A versioned rule producing evidence for a candidate pair. `evaluate`
/// must be a pure function of the two events — no external inputs, no
/// clocks.
pub trait CorrelationRule {
    fn rule_id(&self) -> &str;
    fn rule_version(&self) -> &str;
    fn link_type(&self) -> &str;
    fn evaluate(
        &self,
        source: &CandidateEvent,
        target: &CandidateEvent,
    ) -> Vec<CorrelationEvidence>;
}

/// Minimal projection of a canonical event the engine needs to correlate
/// pairs without depending on the full `CanonicalEvent` shape.
#[derive(Debug, Clone)]
pub struct CandidateEvent {
    pub event_id: String,
    pub external_reference: Option<String>,
    pub source_event_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub observed_at: DateTime<Utc>,
    pub event_type: String,
}

fn score_from_evidence(evidence: &[CorrelationEvidence]) -> f64 {
    if evidence.is_empty() {
        return 0.0;
    }
    let sum: f64 = evidence
        .iter()
        .map(|e| evidence_contribution(e.evidence_type))
        .sum();
    (sum / evidence.len() as f64).clamp(0.0, 1.0)
}

/// `link_id` deterministically derived from sorted (source_id, target_id,
/// rule_id, rule_version) so duplicate candidates collide.
pub fn link_id(source_id: &str, target_id: &str, rule_id: &str, rule_version: &str) -> String {
    let mut ids = [source_id, target_id];
    ids.sort_unstable();
    sha256_hex_str(&format!("{}|{}|{rule_id}|{rule_version}", ids[0], ids[1]))
}

pub struct CorrelationEngine {
    rules: Vec<Box<dyn CorrelationRule>>,
    engine_version: String,
}

impl CorrelationEngine {
    pub fn new(engine_version: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            engine_version: engine_version.into(),
        }
    }

    pub fn register_rule(&mut self, rule: Box<dyn CorrelationRule>) {
        self.rules.push(rule);
    }

    /// Runs every registered rule over every unordered pair, iterating over
    /// events sorted by `event_id` so the pair order is deterministic.
    /// Candidates scoring below `SCORE_FLOOR` are dropped. Emits every
    /// plausible link; never collapses to a single best match.
    pub fn correlate(&self, events: &[CandidateEvent], created_at: DateTime<Utc>) -> Vec<CorrelationLink> {
        let mut sorted: Vec<&CandidateEvent> = events.iter().collect();
        sorted.sort_by(|a, b| a.event_id.cmp(&b.event_id));

        let mut links = Vec::new();
        for i in 0..sorted.len() {
            for j in (i + 1)..sorted.len() {
                let source = sorted[i];
                let target = sorted[j];
                for rule in &self.rules {
                    let evidence = rule.evaluate(source, target);
                    if evidence.is_empty() {
                        continue;
                    }
                    let score = score_from_evidence(&evidence);
                    if score < SCORE_FLOOR {
                        continue;
                    }
                    links.push(CorrelationLink {
                        link_id: link_id(
                            &source.event_id,
                            &target.event_id,
                            rule.rule_id(),
                            rule.rule_version(),
                        ),
                        source_event_id: source.event_id.clone(),
                        target_event_id: target.event_id.clone(),
                        link_type: rule.link_type().to_string(),
                        rule_id: rule.rule_id().to_string(),
                        rule_version: rule.rule_version().to_string(),
                        score,
                        evidence,
                        engine_version: self.engine_version.clone(),
                        created_at,
                    });
                }
            }
        }
        links
    }
}

/// Strictly additive persistence: reattempting an existing `link_id` is an
/// error.
pub fn persist_links(
    store: &mut crate::store::AppendOnlyStore<StoredLink>,
    links: Vec<CorrelationLink>,
) -> Result<(), TenonError> {
    for link in links {
        store.append(StoredLink(link))?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct StoredLink(pub CorrelationLink);

impl crate::store::Identified for StoredLink {
    fn id(&self) -> &str {
        &self.0.link_id
    }
}

/// Returns all link_ids whose source or target is in `event_ids`, sorted
/// lexicographically, plus the input event_ids sorted — a canonical,
/// replayable artifact.
pub fn build_money_flow(flow_id: &str, event_ids: &[String], links: &[CorrelationLink]) -> MoneyFlow {
    let event_set: std::collections::HashSet<&str> = event_ids.iter().map(String::as_str).collect();
    let mut matching_link_ids: Vec<String> = links
        .iter()
        .filter(|l| event_set.contains(l.source_event_id.as_str()) || event_set.contains(l.target_event_id.as_str()))
        .map(|l| l.link_id.clone())
        .collect();
    matching_link_ids.sort();

    let mut sorted_events = event_ids.to_vec();
    sorted_events.sort();

    MoneyFlow {
        flow_id: flow_id.to_string(),
        event_ids: sorted_events,
        link_ids: matching_link_ids,
    }
}
