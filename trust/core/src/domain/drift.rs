// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Behavioral Drift
//!
//! Raw [`MetricObservation`]s are folded into one active [`BehavioralBaseline`]
//! per `(agent, metric)` by a periodic refresh. Evaluation compares the newest
//! observation against the active baseline:
//!
//! ```text
//! deviation_pct = (current - baseline) / baseline
//! baseline == 0  →  0.0 if current == 0, else ±1.0
//! anomaly       ⇔  |deviation_pct| > threshold
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::AgentId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricObservation {
    pub agent_id: AgentId,
    pub metric: String,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralBaseline {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub metric: String,
    pub baseline_value: f64,
    pub current_value: Option<f64>,
    pub deviation_pct: Option<f64>,
    pub is_anomaly: bool,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub sample_count: usize,
    pub is_active: bool,
    pub established_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftResult {
    pub metric: String,
    pub baseline_value: f64,
    pub current_value: f64,
    pub deviation_pct: f64,
    pub is_anomaly: bool,
}

pub fn deviation_pct(baseline: f64, current: f64) -> f64 {
    if baseline == 0.0 {
        if current == 0.0 {
            0.0
        } else {
            current.signum()
        }
    } else {
        (current - baseline) / baseline
    }
}

impl BehavioralBaseline {
    /// Build a baseline from the samples inside `[window_start, window_end]`.
    /// Returns `None` when fewer than `min_samples` samples fall in the window.
    pub fn establish(
        agent_id: AgentId,
        metric: &str,
        samples: &[MetricObservation],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        min_samples: usize,
    ) -> Option<Self> {
        let values: Vec<f64> = samples
            .iter()
            .filter(|o| o.metric == metric && o.observed_at >= window_start && o.observed_at <= window_end)
            .map(|o| o.value)
            .collect();

        if values.is_empty() || values.len() < min_samples {
            return None;
        }

        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Some(Self {
            id: Uuid::new_v4(),
            agent_id,
            metric: metric.to_string(),
            baseline_value: mean,
            current_value: None,
            deviation_pct: None,
            is_anomaly: false,
            window_start,
            window_end,
            sample_count: values.len(),
            is_active: true,
            established_at: window_end,
        })
    }

    /// Compare `current` against this baseline and store the result on it.
    pub fn evaluate(&mut self, current: f64, threshold: f64) -> DriftResult {
        let deviation = deviation_pct(self.baseline_value, current);
        let is_anomaly = deviation.abs() > threshold;
        self.current_value = Some(current);
        self.deviation_pct = Some(deviation);
        self.is_anomaly = is_anomaly;

        DriftResult {
            metric: self.metric.clone(),
            baseline_value: self.baseline_value,
            current_value: current,
            deviation_pct: deviation,
            is_anomaly,
        }
    }
}
