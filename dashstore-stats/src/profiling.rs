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

//! Per profiling point statistics.

use crate::stat_summary::StatSummary;
use dashstore_core::entity::{ProfilingPointRunEntity, RegressionMode, VectorKind};
use serde::Serialize;
use std::collections::HashMap;

/// Insertion-ordered collection of `StatSummary` keyed by label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfilingPointSummary {
    name: String,
    regression_mode: RegressionMode,
    x_label: String,
    y_label: String,
    stats: Vec<StatSummary>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl ProfilingPointSummary {
    pub fn new(name: impl Into<String>, regression_mode: RegressionMode) -> Self {
        Self {
            name: name.into(),
            regression_mode,
            x_label: String::new(),
            y_label: String::new(),
            stats: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Empty summary shaped after one run of the point.
    pub fn for_run(run: &ProfilingPointRunEntity) -> Self {
        let mut summary = Self::new(run.name.clone(), run.regression_mode);
        summary.x_label = run.x_label.clone();
        summary.y_label = run.y_label.clone();
        summary
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn regression_mode(&self) -> RegressionMode {
        self.regression_mode
    }

    pub fn x_label(&self) -> &str {
        &self.x_label
    }

    pub fn y_label(&self) -> &str {
        &self.y_label
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&StatSummary> {
        self.index.get(label).map(|&i| &self.stats[i])
    }

    /// Labels in first-seen order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.stats.iter().map(StatSummary::label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatSummary> {
        self.stats.iter()
    }

    fn stat_mut(&mut self, label: &str) -> &mut StatSummary {
        let i = match self.index.get(label) {
            Some(&i) => i,
            None => {
                self.stats
                    .push(StatSummary::new(label, self.regression_mode));
                self.index.insert(label.to_string(), self.stats.len() - 1);
                self.stats.len() - 1
            }
        };
        &mut self.stats[i]
    }

    /// Fold one run's values in. Labeled points update their labels;
    /// anything else is folded into a single label named after the point.
    pub fn update(&mut self, run: &ProfilingPointRunEntity) {
        if run.vector_kind == VectorKind::Labeled && run.labels.len() == run.values.len() {
            self.update_structured(&run.labels, &run.values);
        } else {
            if run.vector_kind == VectorKind::Labeled {
                tracing::warn!(
                    "Profiling point {} has {} labels for {} values, folding unlabeled",
                    run.name,
                    run.labels.len(),
                    run.values.len()
                );
            }
            let label = self.name.clone();
            self.update_unstructured(&label, &run.values);
        }
    }

    /// Merge each value into the summary of its label.
    pub fn update_structured(&mut self, labels: &[String], values: &[f64]) {
        for (label, &value) in labels.iter().zip(values) {
            self.stat_mut(label).update(value);
        }
    }

    /// Fold every value of one report into a single label.
    pub fn update_unstructured(&mut self, label: &str, values: &[f64]) {
        let stat = self.stat_mut(label);
        for &value in values {
            stat.update(value);
        }
    }

    /// Merge another summary of the same point, label by label.
    pub fn merge(&mut self, other: &ProfilingPointSummary) {
        if self.x_label.is_empty() {
            self.x_label = other.x_label.clone();
        }
        if self.y_label.is_empty() {
            self.y_label = other.y_label.clone();
        }
        for stat in &other.stats {
            self.stat_mut(stat.label()).merge(stat);
        }
    }

    /// Insert a pre-built label summary, merging if the label exists.
    pub fn merge_stat(&mut self, stat: &StatSummary) {
        self.stat_mut(stat.label()).merge(stat);
    }
}
