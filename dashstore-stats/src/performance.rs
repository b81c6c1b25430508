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

//! Time-windowed performance summaries
//!
//! A `PerformanceSummary` covers `[start_time, end_time)` (microseconds) and
//! holds one `ProfilingPointSummary` per profiling point seen in that window.
//! `PerformanceLoader` fills a set of windows in one pass: it resolves the
//! runs of a test across the union of the windows, reads each run's
//! profiling points, and feeds every window whose span contains the run's
//! start time.

use crate::error::{Result, StatsError};
use crate::profiling::ProfilingPointSummary;
use chrono::{TimeZone, Utc};
use dashstore_core::entity::{DeviceInfoEntity, ProfilingPointRunEntity, TestEntity};
use dashstore_core::{Filter, Key, Kind, SortDirection, StoreResult};
use dashstore_query::{ResolveRequest, Resolver};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Bound;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    start_time: i64,
    end_time: i64,
    label: String,
    points: BTreeMap<String, ProfilingPointSummary>,
}

impl PerformanceSummary {
    /// Window `[start_time, end_time)`, labelled with its UTC dates.
    pub fn new(start_time: i64, end_time: i64) -> Result<Self> {
        let label = format!("{} - {}", format_date(start_time), format_date(end_time));
        Self::with_label(start_time, end_time, label)
    }

    pub fn with_label(start_time: i64, end_time: i64, label: impl Into<String>) -> Result<Self> {
        if end_time <= start_time {
            return Err(StatsError::InvalidWindow {
                start: start_time,
                end: end_time,
            });
        }
        Ok(Self {
            start_time,
            end_time,
            label: label.into(),
            points: BTreeMap::new(),
        })
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn contains(&self, time: i64) -> bool {
        time >= self.start_time && time < self.end_time
    }

    /// Fold one profiling run in, optionally under a split suffix
    /// (e.g. a branch) so the same point on different devices stays apart.
    pub fn add_data(&mut self, run: &ProfilingPointRunEntity, split: Option<&str>) {
        let name = match split {
            Some(split) if !split.is_empty() => format!("{} ({})", run.name, split),
            _ => run.name.clone(),
        };
        self.points
            .entry(name)
            .or_insert_with(|| ProfilingPointSummary::for_run(run))
            .update(run);
    }

    pub fn get(&self, point: &str) -> Option<&ProfilingPointSummary> {
        self.points.get(point)
    }

    pub fn point_names(&self) -> impl Iterator<Item = &str> {
        self.points.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProfilingPointSummary)> {
        self.points.iter().map(|(name, summary)| (name.as_str(), summary))
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn format_date(micros: i64) -> String {
    Utc.timestamp_opt(micros.div_euclid(1_000_000), 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| micros.to_string())
}

/// Device dimension used to split a point's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SplitKey {
    Branch,
    Target,
}

impl SplitKey {
    fn value<'a>(&self, device: &'a DeviceInfoEntity) -> &'a str {
        match self {
            SplitKey::Branch => &device.branch,
            SplitKey::Target => &device.build_flavor,
        }
    }
}

/// Loads profiling data of a test into performance windows.
pub struct PerformanceLoader {
    resolver: Resolver,
}

impl PerformanceLoader {
    pub fn new(resolver: Resolver) -> Self {
        Self { resolver }
    }

    /// Fill `windows` with the test's profiling runs. `device_filter`
    /// restricts runs to those with a matching device; `split` partitions
    /// points by device dimensions. Returns the number of runs folded in.
    pub fn load(
        &self,
        test_name: &str,
        windows: &mut [PerformanceSummary],
        device_filter: Option<Filter>,
        split: &[SplitKey],
    ) -> StoreResult<usize> {
        let (start, end) = match (
            windows.iter().map(|w| w.start_time).min(),
            windows.iter().map(|w| w.end_time).max(),
        ) {
            (Some(start), Some(end)) => (start, end),
            _ => return Ok(0),
        };

        let test_key = TestEntity::key_for(test_name);
        let mut request = ResolveRequest::new(test_key.clone(), Kind::TestRun)
            .filter(Filter::new().key_range(
                Bound::Included(test_key.child(Kind::TestRun, start)),
                Bound::Excluded(test_key.child(Kind::TestRun, end)),
            ))
            .direction(SortDirection::Ascending);
        if let Some(filter) = device_filter {
            request = request.child(Kind::DeviceInfo, filter);
        }

        let runs = self.resolver.resolve(&request)?;
        let mut folded = 0;
        for run_key in &runs {
            let Some(run_start) = run_key.int_id() else {
                continue;
            };
            if !windows.iter().any(|w| w.contains(run_start)) {
                continue;
            }

            let split_label = self.split_label(run_key, split)?;
            let points = self.resolver.children_of::<ProfilingPointRunEntity>(run_key)?;
            if points.is_empty() {
                continue;
            }

            for window in windows.iter_mut().filter(|w| w.contains(run_start)) {
                for (_, point) in &points {
                    window.add_data(point, split_label.as_deref());
                }
            }
            folded += 1;
        }

        tracing::debug!(
            "Loaded {} of {} runs of {} into {} windows",
            folded,
            runs.len(),
            test_name,
            windows.len()
        );
        Ok(folded)
    }

    fn split_label(&self, run_key: &Key, split: &[SplitKey]) -> StoreResult<Option<String>> {
        if split.is_empty() {
            return Ok(None);
        }
        let devices = self.resolver.children_of::<DeviceInfoEntity>(run_key)?;
        Ok(devices.first().map(|(_, device)| {
            split
                .iter()
                .map(|key| key.value(device))
                .collect::<Vec<_>>()
                .join(", ")
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashstore_core::entity::{RegressionMode, VectorKind};

    fn point(values: &[f64]) -> ProfilingPointRunEntity {
        ProfilingPointRunEntity {
            name: "boot_time".into(),
            vector_kind: VectorKind::Unlabeled,
            regression_mode: RegressionMode::LowerIsBetter,
            labels: Vec::new(),
            values: values.to_vec(),
            x_label: String::new(),
            y_label: "ms".into(),
        }
    }

    #[test]
    fn test_window_is_half_open() {
        let window = PerformanceSummary::new(100, 200).unwrap();
        assert!(window.contains(100));
        assert!(window.contains(199));
        assert!(!window.contains(200));
        assert!(!window.contains(99));
    }

    #[test]
    fn test_invalid_window() {
        assert!(matches!(
            PerformanceSummary::new(200, 200),
            Err(StatsError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_label_uses_dates() {
        let day = 86_400_000_000i64;
        let window = PerformanceSummary::new(0, day).unwrap();
        assert_eq!(window.label(), "1970-01-01 - 1970-01-02");
    }

    #[test]
    fn test_add_data_with_split() {
        let mut window = PerformanceSummary::new(0, 10).unwrap();
        window.add_data(&point(&[1.0, 2.0]), None);
        window.add_data(&point(&[3.0]), Some("main"));
        window.add_data(&point(&[5.0]), Some(""));

        assert_eq!(
            window.point_names().collect::<Vec<_>>(),
            vec!["boot_time", "boot_time (main)"]
        );
        assert_eq!(
            window.get("boot_time").unwrap().get("boot_time").unwrap().count(),
            3
        );
    }
}
