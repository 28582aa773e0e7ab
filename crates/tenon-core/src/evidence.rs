//! Append-only causal log of typed domain events with total order (C2).

use crate::error::TenonError;
use crate::hashing::sha256_hex_str;
use crate::types::EvidenceEvent;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

#[derive(Debug, Default, Clone)]
pub struct EvidenceLog {
    events: Vec<EvidenceEvent>,
    seen_ids: HashSet<String>,
    last_produced_at: Option<DateTime<Utc>>,
}

impl EvidenceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event. Enforces `produced_at` monotonicity against the last
    /// appended event and that every `caused_by` id already exists in the
    /// log. Returns the assigned sequence number.
    pub fn append(&mut self, event: EvidenceEvent) -> Result<u64, TenonError> {
        if self.seen_ids.contains(&event.event_id) {
            return Err(TenonError::worm(event.event_id.clone()));
        }
        if let Some(last) = self.last_produced_at {
            if event.produced_at < last {
                return Err(TenonError::invariant(format!(
                    "produced_at {} precedes last appended {}",
                    event.produced_at, last
                )));
            }
        }
        for cause_id in &event.caused_by {
            if !self.seen_ids.contains(cause_id) {
                return Err(TenonError::invariant(format!(
                    "caused_by references unlogged event_id '{cause_id}'"
                )));
            }
        }

        self.last_produced_at = Some(event.produced_at);
        self.seen_ids.insert(event.event_id.clone());
        let sequence_number = self.events.len() as u64;
        self.events.push(event);
        Ok(sequence_number)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn all(&self) -> &[EvidenceEvent] {
        &self.events
    }

    /// Events observed at or before `ts`, paired with their sequence number.
    pub fn at_or_before(&self, ts: DateTime<Utc>) -> Vec<(u64, &EvidenceEvent)> {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.produced_at <= ts)
            .map(|(i, e)| (i as u64, e))
            .collect()
    }

    /// `SHA-256(engine_version + "|" + semicolon-joined event_ids)`. Two
    /// replays with the same engine version and event sequence produce
    /// identical fingerprints.
    pub fn replay_fingerprint(&self, engine_version: &str) -> String {
        let joined = self
            .events
            .iter()
            .map(|e| e.event_id.as_str())
            .collect::<Vec<_>>()
            .join(";");
        sha256_hex_str(&format!("{engine_version}|{joined}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EvidenceEventType;
    use chrono::TimeZone;
    use serde_json::json;

    fn event(id: &str, ts: DateTime<Utc>, caused_by: Vec<&str>) -> EvidenceEvent {
        EvidenceEvent {
            event_id: id.to_string(),
            event_type: EvidenceEventType::IngestReceived,
            produced_at: ts,
            payload: json!({}),
            caused_by: caused_by.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn rejects_backward_produced_at() {
        let mut log = EvidenceLog::new();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        log.append(event("a", t1, vec![])).unwrap();
        let err = log.append(event("b", t0, vec![])).unwrap_err();
        assert!(matches!(err, TenonError::InvariantViolation(_)));
    }

    #[test]
    fn rejects_unlogged_causes() {
        let mut log = EvidenceLog::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let err = log.append(event("a", t0, vec!["ghost"])).unwrap_err();
        assert!(matches!(err, TenonError::InvariantViolation(_)));
    }

    #[test]
    fn replay_fingerprint_is_deterministic() {
        let mut log = EvidenceLog::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        log.append(event("a", t0, vec![])).unwrap();
        log.append(event("b", t0, vec!["a"])).unwrap();
        let fp1 = log.replay_fingerprint("v1");
        let fp2 = log.replay_fingerprint("v1");
        assert_eq!(fp1, fp2);
    }
}
