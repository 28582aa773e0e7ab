//! Risk Observability (C11): typed risk signals computed from derived
//! observations, aggregated over time windows, escalated into institutional
//! alerts. Infrastructure vanity metrics are a hard rejection, not a
//! filtering concern — `SignalComputer::compute` raises a
//! `ContractViolation` rather than silently dropping them.

use crate::error::TenonError;
use crate::hashing::sha256_hex_str;
use crate::types::{
    RiskAggregate, RiskAlert, RiskAlertType, RiskObservation, RiskProfileEntry, RiskScope,
    RiskSeverityLevel, RiskSignal, RiskSignalType, SupportingMetric, ThresholdSet, TimeWindow,
};
use chrono::{DateTime, Utc};

/// Case-insensitive substrings that identify an infrastructure/vanity metric.
/// Hard-coded, not configurable — per `spec.md` §4.11 "anti-noise" and
/// testable property 8.
const FORBIDDEN_METRIC_SUBSTRINGS: &[&str] = &[
    "cpu",
    "ram",
    "memory",
    "latency",
    "qps",
    "throughput",
    "bandwidth",
    "disk",
    "io_wait",
    "load_avg",
    "network",
];

pub fn is_forbidden_metric_key(metric_key: &str) -> bool {
    let lower = metric_key.to_ascii_lowercase();
    FORBIDDEN_METRIC_SUBSTRINGS
        .iter()
        .any(|needle| lower.contains(needle))
}

pub struct SignalComputer {
    thresholds: ThresholdSet,
}

impl SignalComputer {
    pub fn new(thresholds: ThresholdSet) -> Result<Self, TenonError> {
        if thresholds.approved_change_ref.trim().is_empty() {
            return Err(TenonError::ContractViolation(
                "ThresholdSet must carry a non-empty approved_change_ref".to_string(),
            ));
        }
        Ok(Self { thresholds })
    }

    /// Rejects a forbidden-pattern metric with `ContractViolation`. A
    /// `RiskSignal` is emitted only when a threshold actually fires —
    /// normal-range observations emit zero signals (anti-noise).
    pub fn compute(
        &self,
        observation: &RiskObservation,
        signal_version: &str,
    ) -> Result<Option<RiskSignal>, TenonError> {
        if is_forbidden_metric_key(&observation.metric_key) {
            return Err(TenonError::ContractViolation(format!(
                "metric_key '{}' matches a forbidden infrastructure pattern",
                observation.metric_key
            )));
        }

        let matching_rules: Vec<_> = self
            .thresholds
            .rules
            .iter()
            .filter(|r| {
                r.metric_key == observation.metric_key && r.scope == observation.scope
            })
            .collect();

        let mut fired_severities = Vec::new();
        for rule in &matching_rules {
            for mapping in &rule.severity_mapping {
                if mapping
                    .operator
                    .check(observation.metric_value, mapping.threshold_value)
                {
                    fired_severities.push((mapping.severity_level, rule));
                }
            }
        }

        if fired_severities.is_empty() {
            return Ok(None);
        }

        // Matching severities combined with max() per rule, then overall max.
        let overall_severity = fired_severities
            .iter()
            .map(|(s, _)| *s)
            .max()
            .expect("non-empty");
        let signal_type = fired_severities
            .iter()
            .find(|(s, _)| *s == overall_severity)
            .map(|(_, r)| r.signal_type)
            .unwrap_or(RiskSignalType::DiscrepancyConcentrationHighBySource);

        let risk_signal_id = sha256_hex_str(&format!(
            "{}|{:?}|{}|{}",
            observation.metric_key,
            observation.scope,
            observation.scope_key,
            crate::types::to_rfc3339(observation.observed_at)
        ));

        Ok(Some(RiskSignal {
            risk_signal_id,
            signal_type,
            scope: observation.scope,
            severity_level: overall_severity,
            supporting_metrics: vec![SupportingMetric {
                metric_key: observation.metric_key.clone(),
                metric_value: observation.metric_value,
                metric_unit: "ratio".to_string(),
            }],
            supporting_evidence: observation.evidence_refs.clone(),
            explanation: format!(
                "metric '{}' value {} crossed threshold for severity {:?} under rule set {}",
                observation.metric_key,
                observation.metric_value,
                overall_severity,
                self.thresholds.threshold_set_version
            ),
            observed_at: observation.observed_at,
            signal_version: signal_version.to_string(),
        }))
    }
}

/// Pure aggregation over a window's signals: no clock read, `computed_at`
/// comes from `window.end_at`.
pub struct RiskAssessor;

impl RiskAssessor {
    pub fn assess(
        window: &TimeWindow,
        signals: &[RiskSignal],
        model_version: &str,
    ) -> RiskAggregate {
        let overall_risk_level = signals
            .iter()
            .map(|s| s.severity_level)
            .max()
            .unwrap_or(RiskSeverityLevel::Low);

        let mut drivers: Vec<String> = signals
            .iter()
            .filter(|s| s.severity_level == overall_risk_level)
            .map(|s| s.risk_signal_id.clone())
            .collect();
        drivers.sort();

        let mut risk_profile: Vec<RiskProfileEntry> = signals
            .iter()
            .map(|s| RiskProfileEntry {
                risk_signal_id: s.risk_signal_id.clone(),
                signal_type: s.signal_type,
                severity_level: s.severity_level,
            })
            .collect();
        risk_profile.sort_by(|a, b| a.risk_signal_id.cmp(&b.risk_signal_id));

        let aggregate_id = sha256_hex_str(&format!(
            "{}|{}",
            crate::types::to_rfc3339(window.start_at),
            crate::types::to_rfc3339(window.end_at)
        ));

        RiskAggregate {
            aggregate_id,
            time_window: window.clone(),
            risk_profile,
            overall_risk_level,
            drivers,
            computed_at: window.end_at,
            model_version: model_version.to_string(),
        }
    }
}

pub struct AlertBuilder;

impl AlertBuilder {
    /// Deterministic severity → alert_type mapping. LOW never raises an
    /// alert.
    pub fn build(
        aggregate: &RiskAggregate,
        raised_at: DateTime<Utc>,
        alert_version: &str,
    ) -> Option<RiskAlert> {
        let alert_type = match aggregate.overall_risk_level {
            RiskSeverityLevel::Critical => RiskAlertType::InstitutionalBreach,
            RiskSeverityLevel::High => RiskAlertType::RiskEscalation,
            RiskSeverityLevel::Medium => RiskAlertType::EarlyWarning,
            RiskSeverityLevel::Low => return None,
        };

        let alert_id = sha256_hex_str(&format!(
            "{}|{:?}|{}",
            aggregate.aggregate_id, alert_type, raised_at
        ));

        Some(RiskAlert {
            alert_id,
            alert_type,
            aggregate_id: aggregate.aggregate_id.clone(),
            signal_ids: aggregate.drivers.clone(),
            evidence_refs: aggregate.drivers.clone(),
            potential_impact: format!(
                "overall risk level {:?} driven by {} signal(s)",
                aggregate.overall_risk_level,
                aggregate.drivers.len()
            ),
            operational_recommendation: match alert_type {
                RiskAlertType::InstitutionalBreach => {
                    "escalate to institutional risk committee immediately".to_string()
                }
                RiskAlertType::RiskEscalation => {
                    "route to risk operations for same-day review".to_string()
                }
                RiskAlertType::EarlyWarning => {
                    "monitor trend and schedule a review within the week".to_string()
                }
            },
            raised_at,
            alert_version: alert_version.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SeverityMapping, ThresholdOperator, ThresholdRule};
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 22, hour, 0, 0).unwrap()
    }

    fn thresholds() -> ThresholdSet {
        ThresholdSet {
            threshold_set_id: "ts-1".to_string(),
            threshold_set_version: "1.0.0".to_string(),
            approved_change_ref: "rfc-42".to_string(),
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

    fn observation(value: f64, hour: u32) -> RiskObservation {
        RiskObservation {
            metric_key: "reject_duplicate_rate_pct".to_string(),
            metric_value: value,
            scope: RiskScope::Global,
            scope_key: "global".to_string(),
            observed_at: ts(hour),
            evidence_refs: vec!["ledger:1".to_string()],
            risk_mapping: "idempotency".to_string(),
            context: Default::default(),
        }
    }

    #[test]
    fn rejects_forbidden_infrastructure_metric() {
        let computer = SignalComputer::new(thresholds()).unwrap();
        let mut obs = observation(99.0, 0);
        obs.metric_key = "cpu_utilization_pct".to_string();
        let err = computer.compute(&obs, "1.0.0").unwrap_err();
        assert!(matches!(err, TenonError::ContractViolation(_)));
    }

    #[test]
    fn normal_range_emits_no_signal() {
        let computer = SignalComputer::new(thresholds()).unwrap();
        let result = computer.compute(&observation(0.1, 0), "1.0.0").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn progressive_degradation_escalates_through_severities() {
        let computer = SignalComputer::new(thresholds()).unwrap();
        let rates = [2.0, 7.0, 18.0, 35.0];
        let expected = [
            RiskSeverityLevel::Low,
            RiskSeverityLevel::Medium,
            RiskSeverityLevel::High,
            RiskSeverityLevel::Critical,
        ];
        let mut alerts_emitted = 0;
        for (i, rate) in rates.iter().enumerate() {
            let signal = computer
                .compute(&observation(*rate, i as u32), "1.0.0")
                .unwrap()
                .unwrap();
            assert_eq!(signal.severity_level, expected[i]);

            let window = TimeWindow {
                start_at: ts(i as u32),
                end_at: ts(i as u32 + 1),
            };
            let aggregate = RiskAssessor::assess(&window, &[signal], "1.0.0");
            assert_eq!(aggregate.overall_risk_level, expected[i]);

            let alert = AlertBuilder::build(&aggregate, ts(i as u32 + 1), "1.0.0");
            if expected[i] == RiskSeverityLevel::Low {
                assert!(alert.is_none());
            } else {
                alerts_emitted += 1;
                let alert = alert.unwrap();
                match expected[i] {
                    RiskSeverityLevel::Medium => {
                        assert_eq!(alert.alert_type, RiskAlertType::EarlyWarning)
                    }
                    RiskSeverityLevel::High => {
                        assert_eq!(alert.alert_type, RiskAlertType::RiskEscalation)
                    }
                    RiskSeverityLevel::Critical => {
                        assert_eq!(alert.alert_type, RiskAlertType::InstitutionalBreach)
                    }
                    _ => unreachable!(),
                }
            }
        }
        assert_eq!(alerts_emitted, 3);
    }

    #[test]
    fn threshold_set_requires_approved_change_ref() {
        let mut bad = thresholds();
        bad.approved_change_ref = "".to_string();
        assert!(SignalComputer::new(bad).is_err());
    }
}
