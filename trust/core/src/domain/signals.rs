// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-agent operational counters and externally reported values consumed by the
//! trust factors. Every reported value stays `None` until something reports it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::errors::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalSignals {
    pub agent_id: AgentId,
    pub actions_allowed: u64,
    pub actions_denied: u64,
    pub uptime_ratio: Option<f64>,
    pub compliance_score: Option<f64>,
    pub feedback_sum: u64,
    pub feedback_count: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OperationalSignals {
    pub fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            actions_allowed: 0,
            actions_denied: 0,
            uptime_ratio: None,
            compliance_score: None,
            feedback_sum: 0,
            feedback_count: 0,
            updated_at: None,
        }
    }

    /// Record a user rating on the 1-5 scale.
    pub fn record_feedback(&mut self, rating: u8) -> Result<(), EngineError> {
        if !(1..=5).contains(&rating) {
            return Err(EngineError::InvalidInput(format!(
                "feedback rating must be between 1 and 5, got {rating}"
            )));
        }
        self.feedback_sum += u64::from(rating);
        self.feedback_count += 1;
        Ok(())
    }

    pub fn mean_feedback(&self) -> Option<f64> {
        if self.feedback_count == 0 {
            return None;
        }
        Some(self.feedback_sum as f64 / self.feedback_count as f64)
    }
}

/// Externally reported values. Absent fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalReport {
    pub uptime_ratio: Option<f64>,
    pub compliance_score: Option<f64>,
    pub feedback_rating: Option<u8>,
}

impl SignalReport {
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, value) in [
            ("uptime_ratio", self.uptime_ratio),
            ("compliance_score", self.compliance_score),
        ] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(EngineError::InvalidInput(format!(
                        "{name} must be within [0, 1], got {v}"
                    )));
                }
            }
        }
        if let Some(rating) = self.feedback_rating {
            if !(1..=5).contains(&rating) {
                return Err(EngineError::InvalidInput(format!(
                    "feedback rating must be between 1 and 5, got {rating}"
                )));
            }
        }
        Ok(())
    }

    /// Merge a validated report into `signals`.
    pub fn merge_into(&self, signals: &mut OperationalSignals, now: DateTime<Utc>) {
        if let Some(rating) = self.feedback_rating {
            signals.feedback_sum += u64::from(rating);
            signals.feedback_count += 1;
        }
        if self.uptime_ratio.is_some() {
            signals.uptime_ratio = self.uptime_ratio;
        }
        if self.compliance_score.is_some() {
            signals.compliance_score = self.compliance_score;
        }
        signals.updated_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_rating_bounds() {
        let mut signals = OperationalSignals::new(AgentId::new());
        assert!(signals.record_feedback(0).is_err());
        assert!(signals.record_feedback(6).is_err());
        signals.record_feedback(2).unwrap();
        signals.record_feedback(4).unwrap();
        assert_eq!(signals.mean_feedback(), Some(3.0));
    }

    #[test]
    fn test_report_rejects_out_of_range_ratio() {
        let report = SignalReport {
            uptime_ratio: Some(1.5),
            ..Default::default()
        };
        assert!(report.validate().is_err());
        assert!(SignalReport {
            feedback_rating: Some(9),
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_report_merges_present_fields() {
        let mut signals = OperationalSignals::new(AgentId::new());
        signals.compliance_score = Some(0.9);
        let report = SignalReport {
            uptime_ratio: Some(0.98),
            feedback_rating: Some(5),
            ..Default::default()
        };
        report.validate().unwrap();
        report.merge_into(&mut signals, Utc::now());
        assert_eq!(signals.uptime_ratio, Some(0.98));
        assert_eq!(signals.compliance_score, Some(0.9));
        assert_eq!(signals.feedback_count, 1);
    }
}
