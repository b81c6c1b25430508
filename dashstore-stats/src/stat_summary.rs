// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Mergeable streaming statistics
//!
//! `StatSummary` keeps `{count, mean, M2, min, max}` where M2 is the sum of
//! squared deviations from the mean. Single observations are folded in with
//! Welford's update; independently built summaries combine with the
//! pairwise identity of Chan et al.:
//!
//! ```text
//! delta = mean_b - mean_a
//! n     = n_a + n_b
//! M2    = M2_a + M2_b + delta² · n_a · n_b / n
//! mean  = (n_a · mean_a + n_b · mean_b) / n
//! ```
//!
//! Merging is associative and commutative up to rounding, so partial
//! summaries (per shard, per day) can be tree-reduced in any order.

use dashstore_core::entity::{RegressionMode, StoredStat};
use serde::{Deserialize, Serialize};

/// Online summary of one numeric stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatSummary {
    label: String,
    regression_mode: RegressionMode,
    count: u64,
    mean: f64,
    sum_squared_deviation: f64,
    min: f64,
    max: f64,
}

impl StatSummary {
    pub fn new(label: impl Into<String>, regression_mode: RegressionMode) -> Self {
        Self {
            label: label.into(),
            regression_mode,
            count: 0,
            mean: 0.0,
            sum_squared_deviation: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Summary of a slice of values.
    pub fn from_values(
        label: impl Into<String>,
        regression_mode: RegressionMode,
        values: &[f64],
    ) -> Self {
        let mut summary = Self::new(label, regression_mode);
        for &value in values {
            summary.update(value);
        }
        summary
    }

    /// Incorporate one observation (Welford).
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.sum_squared_deviation += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Combine with an independently accumulated summary of the same metric.
    pub fn merge(&mut self, other: &StatSummary) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            self.count = other.count;
            self.mean = other.mean;
            self.sum_squared_deviation = other.sum_squared_deviation;
            self.min = other.min;
            self.max = other.max;
            return;
        }

        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let count = self.count + other.count;
        let n = count as f64;
        let delta = other.mean - self.mean;

        self.sum_squared_deviation += other.sum_squared_deviation + delta * delta * n_a * n_b / n;
        self.mean = (n_a * self.mean + n_b * other.mean) / n;
        self.count = count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Merge a sequence of summaries into a new one labelled `label`.
    pub fn merge_all<'a>(
        label: impl Into<String>,
        regression_mode: RegressionMode,
        summaries: impl IntoIterator<Item = &'a StatSummary>,
    ) -> Self {
        let mut result = Self::new(label, regression_mode);
        for summary in summaries {
            result.merge(summary);
        }
        result
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn regression_mode(&self) -> RegressionMode {
        self.regression_mode
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn sum_squared_deviation(&self) -> f64 {
        self.sum_squared_deviation
    }

    /// Sample variance; 0 with fewer than two observations.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        self.sum_squared_deviation / (self.count - 1) as f64
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    /// Best observed value given the metric's direction of improvement.
    pub fn best_case(&self) -> Option<f64> {
        match self.regression_mode {
            RegressionMode::HigherIsBetter => self.max(),
            RegressionMode::LowerIsBetter => self.min(),
        }
    }

    pub fn to_stored(&self) -> StoredStat {
        StoredStat {
            label: self.label.clone(),
            count: self.count as i64,
            mean: self.mean,
            sum_squared_deviation: self.sum_squared_deviation,
            min: self.min().unwrap_or(0.0),
            max: self.max().unwrap_or(0.0),
        }
    }

    pub fn from_stored(stored: &StoredStat, regression_mode: RegressionMode) -> Self {
        if stored.count <= 0 {
            return Self::new(stored.label.clone(), regression_mode);
        }
        Self {
            label: stored.label.clone(),
            regression_mode,
            count: stored.count as u64,
            mean: stored.mean,
            sum_squared_deviation: stored.sum_squared_deviation,
            min: stored.min,
            max: stored.max,
        }
    }
}
