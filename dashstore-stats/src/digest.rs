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

//! Comparative digests
//!
//! Compares every label of a current window against the same label in each
//! of N baseline windows:
//!
//! ```text
//! point / label        current   baseline 1        baseline 2
//! boot_time / boot     812.0     +4.2% (0.04)      n/a
//! binder / 64          10.1      saturated (+)     -12.0% (-0.12)
//! ```
//!
//! Percent change is `(current - baseline) / baseline`. A zero baseline
//! yields a signed saturated marker instead of a division, and a label
//! missing from a baseline yields `Comparison::Unavailable`, never zero.

use crate::performance::PerformanceSummary;
use crate::stat_summary::StatSummary;
use dashstore_core::entity::RegressionMode;
use serde::{Deserialize, Serialize};

/// Which statistic represents a label in the digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestStatistic {
    #[default]
    Mean,
    BestCase,
    StdDev,
}

impl DigestStatistic {
    pub fn value_of(&self, stat: &StatSummary) -> Option<f64> {
        if stat.is_empty() {
            return None;
        }
        match self {
            DigestStatistic::Mean => Some(stat.mean()),
            DigestStatistic::BestCase => stat.best_case(),
            DigestStatistic::StdDev => Some(stat.std()),
        }
    }
}

/// Change of the current value relative to one baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Comparison {
    /// `percent` is the relative change in percent; `intensity` maps it to
    /// `[-1, 1]`, saturating at ±100%.
    Change { percent: f64, intensity: f64 },
    /// Baseline was zero and current was not.
    Saturated { positive: bool },
    /// Baseline has no data for this label.
    Unavailable,
}

impl Comparison {
    pub fn between(current: f64, baseline: Option<f64>) -> Self {
        let Some(baseline) = baseline else {
            return Comparison::Unavailable;
        };
        if baseline == 0.0 {
            if current == 0.0 {
                return Comparison::Change {
                    percent: 0.0,
                    intensity: 0.0,
                };
            }
            return Comparison::Saturated {
                positive: current > 0.0,
            };
        }
        let ratio = (current - baseline) / baseline;
        Comparison::Change {
            percent: ratio * 100.0,
            intensity: ratio.clamp(-1.0, 1.0),
        }
    }

    /// Whether the change is an improvement under `mode`.
    pub fn trend(&self, mode: RegressionMode) -> Option<Trend> {
        let increased = match *self {
            Comparison::Change { percent, .. } if percent == 0.0 => return Some(Trend::Unchanged),
            Comparison::Change { percent, .. } => percent > 0.0,
            Comparison::Saturated { positive } => positive,
            Comparison::Unavailable => return None,
        };
        let better = match mode {
            RegressionMode::HigherIsBetter => increased,
            RegressionMode::LowerIsBetter => !increased,
        };
        Some(if better {
            Trend::Improved
        } else {
            Trend::Regressed
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improved,
    Regressed,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestCell {
    pub baseline_value: Option<f64>,
    pub comparison: Comparison,
    pub trend: Option<Trend>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestRow {
    pub point: String,
    pub label: String,
    pub current: f64,
    /// One cell per baseline, in baseline order.
    pub cells: Vec<DigestCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub statistic: DigestStatistic,
    pub current_window: String,
    pub baseline_windows: Vec<String>,
    pub rows: Vec<DigestRow>,
}

impl Digest {
    /// Compare `current` against each of `baselines`.
    pub fn build(
        current: &PerformanceSummary,
        baselines: &[PerformanceSummary],
        statistic: DigestStatistic,
    ) -> Self {
        let mut rows = Vec::new();

        for (point, summary) in current.iter() {
            for stat in summary.iter() {
                let Some(value) = statistic.value_of(stat) else {
                    continue;
                };

                let cells = baselines
                    .iter()
                    .map(|baseline| {
                        let baseline_value = baseline
                            .get(point)
                            .and_then(|s| s.get(stat.label()))
                            .and_then(|s| statistic.value_of(s));
                        let comparison = Comparison::between(value, baseline_value);
                        DigestCell {
                            baseline_value,
                            comparison,
                            trend: comparison.trend(summary.regression_mode()),
                        }
                    })
                    .collect();

                rows.push(DigestRow {
                    point: point.to_string(),
                    label: stat.label().to_string(),
                    current: value,
                    cells,
                });
            }
        }

        Digest {
            statistic,
            current_window: current.label().to_string(),
            baseline_windows: baselines.iter().map(|b| b.label().to_string()).collect(),
            rows,
        }
    }

    pub fn row(&self, point: &str, label: &str) -> Option<&DigestRow> {
        self.rows
            .iter()
            .find(|row| row.point == point && row.label == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_change_and_intensity() {
        match Comparison::between(150.0, Some(100.0)) {
            Comparison::Change { percent, intensity } => {
                assert!((percent - 50.0).abs() < 1e-12);
                assert!((intensity - 0.5).abs() < 1e-12);
            }
            other => panic!("unexpected {:?}", other),
        }

        match Comparison::between(500.0, Some(100.0)) {
            Comparison::Change { percent, intensity } => {
                assert!((percent - 400.0).abs() < 1e-9);
                assert_eq!(intensity, 1.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_zero_baseline() {
        assert_eq!(
            Comparison::between(3.0, Some(0.0)),
            Comparison::Saturated { positive: true }
        );
        assert_eq!(
            Comparison::between(-3.0, Some(0.0)),
            Comparison::Saturated { positive: false }
        );
        assert_eq!(
            Comparison::between(0.0, Some(0.0)),
            Comparison::Change {
                percent: 0.0,
                intensity: 0.0
            }
        );
    }

    #[test]
    fn test_missing_baseline() {
        assert_eq!(Comparison::between(1.0, None), Comparison::Unavailable);
        assert_eq!(Comparison::Unavailable.trend(RegressionMode::LowerIsBetter), None);
    }

    #[test]
    fn test_trend_follows_regression_mode() {
        let up = Comparison::between(110.0, Some(100.0));
        assert_eq!(up.trend(RegressionMode::HigherIsBetter), Some(Trend::Improved));
        assert_eq!(up.trend(RegressionMode::LowerIsBetter), Some(Trend::Regressed));
        assert_eq!(
            Comparison::between(5.0, Some(5.0)).trend(RegressionMode::LowerIsBetter),
            Some(Trend::Unchanged)
        );
    }
}
