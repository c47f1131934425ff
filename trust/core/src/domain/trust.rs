// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Trust Score Model
//!
//! Eight weighted factors combine into a single score in `[0.0, 1.0]`:
//!
//! ```text
//! verification   0.25   agent status (compromised forces 0.0)
//! uptime         0.15   reported ratio, default 0.75
//! success_rate   0.15   allowed / (allowed + denied), default 0.80
//! security       0.15   1.0 - 0.20·critical - 0.10·high over the look-back window
//! compliance     0.10   reported score, default 1.0
//! age            0.10   <7d 0.30, <30d 0.50, <90d 0.75, else 1.0
//! drift          0.05   1 - anomalous / evaluated, default 1.0
//! feedback       0.05   mean user rating (1-5) normalized to [0, 1], default 0.75
//! ```
//!
//! Violations inside the look-back window cost the larger of two amounts:
//! their effect on the factors above, or the sum of the immediate penalties
//! already charged for them. The two never stack, so a full recalculation
//! keeps a penalty in place instead of rebuilding the score around it.
//!
//! Snapshots are append-only. The agent's `trust_score` field mirrors the newest one.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::{AgentId, AgentStatus};
use crate::domain::capability::Severity;
use crate::domain::signals::OperationalSignals;

pub const DEFAULT_UPTIME: f64 = 0.75;
pub const DEFAULT_SUCCESS_RATE: f64 = 0.80;
pub const DEFAULT_COMPLIANCE: f64 = 1.0;
pub const DEFAULT_FEEDBACK: f64 = 0.75;
pub const FACTOR_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustWeights {
    pub verification: f64,
    pub uptime: f64,
    pub success_rate: f64,
    pub security: f64,
    pub compliance: f64,
    pub age: f64,
    pub drift: f64,
    pub feedback: f64,
}

impl Default for TrustWeights {
    fn default() -> Self {
        Self {
            verification: 0.25,
            uptime: 0.15,
            success_rate: 0.15,
            security: 0.15,
            compliance: 0.10,
            age: 0.10,
            drift: 0.05,
            feedback: 0.05,
        }
    }
}

impl TrustWeights {
    pub fn total(&self) -> f64 {
        self.verification
            + self.uptime
            + self.success_rate
            + self.security
            + self.compliance
            + self.age
            + self.drift
            + self.feedback
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustFactors {
    pub verification: f64,
    pub uptime: f64,
    pub success_rate: f64,
    pub security: f64,
    pub compliance: f64,
    pub age: f64,
    pub drift: f64,
    pub feedback: f64,
}

impl TrustFactors {
    pub fn weighted_score(&self, weights: &TrustWeights) -> f64 {
        let raw = self.verification * weights.verification
            + self.uptime * weights.uptime
            + self.success_rate * weights.success_rate
            + self.security * weights.security
            + self.compliance * weights.compliance
            + self.age * weights.age
            + self.drift * weights.drift
            + self.feedback * weights.feedback;
        clamp_score(raw)
    }
}

pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    FullRecalculation,
    ViolationPenalty,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullRecalculation => "full_recalculation",
            Self::ViolationPenalty => "violation_penalty",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full_recalculation" => Some(Self::FullRecalculation),
            "violation_penalty" => Some(Self::ViolationPenalty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustScoreSnapshot {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub factors: TrustFactors,
    pub weights: TrustWeights,
    pub score: f64,
    pub confidence: f64,
    pub source: SnapshotSource,
    pub computed_at: DateTime<Utc>,
}

impl TrustScoreSnapshot {
    /// A penalty snapshot keeps the previous factors and subtracts `delta` from the score.
    pub fn penalized(&self, delta: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: self.agent_id,
            factors: self.factors,
            weights: self.weights,
            score: clamp_score(self.score - delta),
            confidence: self.confidence,
            source: SnapshotSource::ViolationPenalty,
            computed_at: now,
        }
    }
}

/// Everything the factor functions read for one agent.
#[derive(Debug, Clone)]
pub struct TrustInputs<'a> {
    pub status: AgentStatus,
    pub is_compromised: bool,
    pub created_at: DateTime<Utc>,
    pub signals: &'a OperationalSignals,
    /// Severities of violations inside the look-back window.
    pub recent_violations: &'a [Severity],
    /// Sum of the immediate penalties charged for those violations.
    pub recent_penalties: f64,
    pub drift_evaluated: usize,
    pub drift_anomalous: usize,
}

pub fn verification_factor(status: AgentStatus, is_compromised: bool) -> f64 {
    if is_compromised {
        return 0.0;
    }
    match status {
        AgentStatus::Pending => 0.30,
        AgentStatus::Verified => 1.0,
        AgentStatus::Suspended => 0.10,
        AgentStatus::Revoked => 0.0,
    }
}

pub fn age_factor(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age = now - created_at;
    if age < Duration::days(7) {
        0.30
    } else if age < Duration::days(30) {
        0.50
    } else if age < Duration::days(90) {
        0.75
    } else {
        1.0
    }
}

pub fn security_factor(recent_violations: &[Severity]) -> f64 {
    let critical = recent_violations
        .iter()
        .filter(|s| **s == Severity::Critical)
        .count() as f64;
    let high = recent_violations
        .iter()
        .filter(|s| **s == Severity::High)
        .count() as f64;
    (1.0 - 0.20 * critical - 0.10 * high).max(0.0)
}

pub fn drift_factor(evaluated: usize, anomalous: usize) -> f64 {
    if evaluated == 0 {
        return 1.0;
    }
    clamp_score(1.0 - anomalous as f64 / evaluated as f64)
}

/// Compute all eight factors plus the confidence (share of factors backed by
/// observed data). Verification, age and security always count as observed.
pub fn compute_factors(inputs: &TrustInputs<'_>, now: DateTime<Utc>) -> (TrustFactors, f64) {
    let signals = inputs.signals;
    let mut observed = 3usize;

    let uptime = match signals.uptime_ratio {
        Some(ratio) => {
            observed += 1;
            clamp_score(ratio)
        }
        None => DEFAULT_UPTIME,
    };

    let total_actions = signals.actions_allowed + signals.actions_denied;
    let success_rate = if total_actions > 0 {
        observed += 1;
        signals.actions_allowed as f64 / total_actions as f64
    } else {
        DEFAULT_SUCCESS_RATE
    };

    let compliance = match signals.compliance_score {
        Some(score) => {
            observed += 1;
            clamp_score(score)
        }
        None => DEFAULT_COMPLIANCE,
    };

    let drift = if inputs.drift_evaluated > 0 {
        observed += 1;
        drift_factor(inputs.drift_evaluated, inputs.drift_anomalous)
    } else {
        1.0
    };

    let feedback = match signals.mean_feedback() {
        Some(mean) => {
            observed += 1;
            clamp_score((mean - 1.0) / 4.0)
        }
        None => DEFAULT_FEEDBACK,
    };

    let factors = TrustFactors {
        verification: verification_factor(inputs.status, inputs.is_compromised),
        uptime,
        success_rate,
        security: security_factor(inputs.recent_violations),
        compliance,
        age: age_factor(inputs.created_at, now),
        drift,
        feedback,
    };

    (factors, observed as f64 / FACTOR_COUNT as f64)
}

/// Score for a full recalculation, honouring the penalties already charged
/// for recent violations.
pub fn recalculated_score(
    inputs: &TrustInputs<'_>,
    factors: &TrustFactors,
    weights: &TrustWeights,
    now: DateTime<Utc>,
) -> f64 {
    let factor_score = factors.weighted_score(weights);
    if inputs.recent_violations.is_empty() {
        return factor_score;
    }

    // Every violation was recorded as one denied action.
    let mut without = inputs.signals.clone();
    without.actions_denied = without
        .actions_denied
        .saturating_sub(inputs.recent_violations.len() as u64);
    let clean_inputs = TrustInputs {
        signals: &without,
        recent_violations: &[],
        recent_penalties: 0.0,
        ..inputs.clone()
    };
    let (clean, _) = compute_factors(&clean_inputs, now);
    factor_score.min(clamp_score(clean.weighted_score(weights) - inputs.recent_penalties))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_inputs(signals: &OperationalSignals, now: DateTime<Utc>) -> TrustInputs<'_> {
        TrustInputs {
            status: AgentStatus::Pending,
            is_compromised: false,
            created_at: now,
            signals,
            recent_violations: &[],
            recent_penalties: 0.0,
            drift_evaluated: 0,
            drift_anomalous: 0,
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        assert!((TrustWeights::default().total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_new_pending_agent_scores_0_675() {
        let now = Utc::now();
        let signals = OperationalSignals::new(AgentId::new());
        let (factors, confidence) = compute_factors(&fresh_inputs(&signals, now), now);
        let score = factors.weighted_score(&TrustWeights::default());
        assert!((score - 0.675).abs() < 1e-9);
        assert!((confidence - 3.0 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_compromised_forces_zero_verification() {
        assert_eq!(verification_factor(AgentStatus::Verified, true), 0.0);
        assert_eq!(verification_factor(AgentStatus::Verified, false), 1.0);
        assert_eq!(verification_factor(AgentStatus::Suspended, false), 0.10);
    }

    #[test]
    fn test_age_brackets() {
        let now = Utc::now();
        assert_eq!(age_factor(now - Duration::days(3), now), 0.30);
        assert_eq!(age_factor(now - Duration::days(7), now), 0.50);
        assert_eq!(age_factor(now - Duration::days(45), now), 0.75);
        assert_eq!(age_factor(now - Duration::days(90), now), 1.0);
    }

    #[test]
    fn test_security_factor_floors_at_zero() {
        let many = vec![Severity::Critical; 8];
        assert_eq!(security_factor(&many), 0.0);
        let mixed = [Severity::Critical, Severity::High, Severity::Medium];
        assert!((security_factor(&mixed) - 0.70).abs() < 1e-9);
    }

    #[test]
    fn test_penalty_snapshot_floors_at_zero() {
        let now = Utc::now();
        let signals = OperationalSignals::new(AgentId::new());
        let (factors, confidence) = compute_factors(&fresh_inputs(&signals, now), now);
        let base = TrustScoreSnapshot {
            id: Uuid::new_v4(),
            agent_id: signals.agent_id,
            factors,
            weights: TrustWeights::default(),
            score: 0.075,
            confidence,
            source: SnapshotSource::FullRecalculation,
            computed_at: now,
        };
        let penalized = base.penalized(0.30, now);
        assert_eq!(penalized.score, 0.0);
        assert_eq!(penalized.factors, base.factors);
        assert_eq!(penalized.source, SnapshotSource::ViolationPenalty);
    }

    #[test]
    fn test_observed_signals_raise_confidence() {
        let now = Utc::now();
        let mut signals = OperationalSignals::new(AgentId::new());
        signals.uptime_ratio = Some(0.99);
        signals.actions_allowed = 9;
        signals.actions_denied = 1;
        signals.record_feedback(5).unwrap();
        let (factors, confidence) = compute_factors(&fresh_inputs(&signals, now), now);
        assert!((factors.success_rate - 0.9).abs() < 1e-9);
        assert_eq!(factors.feedback, 1.0);
        assert!((confidence - 6.0 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_recalculation_keeps_penalties_without_stacking() {
        let now = Utc::now();
        let mut signals = OperationalSignals::new(AgentId::new());
        let weights = TrustWeights::default();

        // file:read, db:query, network:access in sequence.
        let chain = [
            (Severity::High, 0.15, 0.525),
            (Severity::Critical, 0.20, 0.325),
            (Severity::Critical, 0.25, 0.075),
        ];
        let mut severities = Vec::new();
        let mut penalties = 0.0;
        for (severity, delta, expected) in chain {
            severities.push(severity);
            penalties += delta;
            signals.actions_denied += 1;
            let inputs = TrustInputs {
                recent_violations: &severities,
                recent_penalties: penalties,
                ..fresh_inputs(&signals, now)
            };
            let (factors, _) = compute_factors(&inputs, now);
            let score = recalculated_score(&inputs, &factors, &weights, now);
            assert!((score - expected).abs() < 1e-9, "expected {expected}, got {score}");
        }
    }

    #[test]
    fn test_factor_decline_wins_when_larger_than_penalties() {
        let now = Utc::now();
        let mut signals = OperationalSignals::new(AgentId::new());
        signals.actions_denied = 1;
        let severities = [Severity::Medium];
        let inputs = TrustInputs {
            recent_violations: &severities,
            recent_penalties: 0.01,
            ..fresh_inputs(&signals, now)
        };
        let (factors, _) = compute_factors(&inputs, now);
        let score = recalculated_score(&inputs, &factors, &TrustWeights::default(), now);
        // Success rate drops to 0.0, which costs more than the 0.01 penalty.
        assert!((score - factors.weighted_score(&TrustWeights::default())).abs() < 1e-9);
        assert!((score - 0.555).abs() < 1e-9);
    }
}
