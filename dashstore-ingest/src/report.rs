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

//! Test report input
//!
//! A `TestReport` is what a test harness uploads after one run: the run's
//! metadata, per-case results, the devices it ran on, and any profiling
//! points and coverage it collected.

use crate::error::{IngestError, Result};
use dashstore_core::entity::{
    CoverageEntity, DeviceInfoEntity, ProfilingPointRunEntity, TestCaseResult, TestRunEntity,
    TestRunType,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Case results counted as passing.
pub const RESULT_PASS: &str = "pass";
/// Case results counted as neither passing nor failing.
pub const RESULT_SKIP: &str = "skip";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub test_name: String,
    /// Run start, microseconds since the epoch. Becomes the run's key id.
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    #[serde(default)]
    pub run_type: TestRunType,
    #[serde(default)]
    pub test_build_id: String,
    #[serde(default)]
    pub host_name: String,
    /// Explicit counts, used when the report carries no per-case results.
    #[serde(default)]
    pub pass_count: Option<i64>,
    #[serde(default)]
    pub fail_count: Option<i64>,
    #[serde(default)]
    pub log_links: Vec<String>,
    #[serde(default)]
    pub test_cases: Vec<TestCaseResult>,
    #[serde(default)]
    pub devices: Vec<DeviceInfoEntity>,
    #[serde(default)]
    pub profiling_points: Vec<ProfilingPointRunEntity>,
    #[serde(default)]
    pub coverage: Vec<CoverageEntity>,
}

impl TestReport {
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Reject reports that cannot be keyed or are internally inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.test_name.trim().is_empty() {
            return Err(IngestError::InvalidReport("missing test name".into()));
        }
        if self.start_timestamp <= 0 {
            return Err(IngestError::InvalidReport(format!(
                "invalid start timestamp {}",
                self.start_timestamp
            )));
        }
        if self.end_timestamp < self.start_timestamp {
            return Err(IngestError::InvalidReport(format!(
                "run ends ({}) before it starts ({})",
                self.end_timestamp, self.start_timestamp
            )));
        }
        if let Some(point) = self.profiling_points.iter().find(|p| p.name.trim().is_empty()) {
            return Err(IngestError::InvalidReport(format!(
                "unnamed profiling point with {} values",
                point.values.len()
            )));
        }
        // Non-finite values cannot be stored and would be lost on read.
        if let Some(point) = self
            .profiling_points
            .iter()
            .find(|p| p.values.iter().any(|v| !v.is_finite()))
        {
            return Err(IngestError::InvalidReport(format!(
                "profiling point {} has a non-finite value",
                point.name
            )));
        }
        if let Some(file) = self
            .coverage
            .iter()
            .find(|c| c.total_line_count < 0 || c.covered_line_count < 0)
        {
            return Err(IngestError::InvalidReport(format!(
                "negative line count for {}",
                file.file_path
            )));
        }
        if matches!(self.pass_count, Some(n) if n < 0) || matches!(self.fail_count, Some(n) if n < 0)
        {
            return Err(IngestError::InvalidReport("negative case count".into()));
        }
        Ok(())
    }

    /// Drop repeated devices and profiling points. Points are keyed by name,
    /// so only the last report of a name survives.
    pub fn deduplicated(mut self) -> Self {
        let mut devices: Vec<DeviceInfoEntity> = Vec::with_capacity(self.devices.len());
        for device in self.devices {
            if !devices.contains(&device) {
                devices.push(device);
            }
        }
        self.devices = devices;

        let mut seen = HashSet::new();
        let before = self.profiling_points.len();
        let mut points: Vec<ProfilingPointRunEntity> = self
            .profiling_points
            .into_iter()
            .rev()
            .filter(|p| seen.insert(p.name.clone()))
            .collect();
        points.reverse();
        if points.len() != before {
            tracing::warn!(
                "Dropped {} repeated profiling points from report of {}",
                before - points.len(),
                self.test_name
            );
        }
        self.profiling_points = points;
        self
    }

    /// `(pass, fail)` from case results, or the explicit counts.
    pub fn counts(&self) -> (i64, i64) {
        if self.test_cases.is_empty() {
            return (self.pass_count.unwrap_or(0), self.fail_count.unwrap_or(0));
        }
        let mut pass = 0;
        let mut fail = 0;
        for case in &self.test_cases {
            if case.result.eq_ignore_ascii_case(RESULT_PASS) {
                pass += 1;
            } else if !case.result.eq_ignore_ascii_case(RESULT_SKIP) {
                fail += 1;
            }
        }
        (pass, fail)
    }

    /// The run record, given the ids of its test case batches.
    pub fn run_entity(&self, test_case_ids: Vec<i64>) -> TestRunEntity {
        let (pass_count, fail_count) = self.counts();
        TestRunEntity {
            run_type: self.run_type,
            start_timestamp: self.start_timestamp,
            end_timestamp: self.end_timestamp,
            test_build_id: self.test_build_id.clone(),
            host_name: self.host_name.clone(),
            pass_count,
            fail_count,
            test_case_ids,
            log_links: self.log_links.clone(),
            total_line_count: self.coverage.iter().map(|c| c.total_line_count).sum(),
            covered_line_count: self.coverage.iter().map(|c| c.covered_line_count).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashstore_core::entity::{RegressionMode, VectorKind};

    fn report() -> TestReport {
        TestReport::from_json(
            r#"{
                "test_name": "camera_hal",
                "start_timestamp": 1000,
                "end_timestamp": 2000,
                "run_type": "postsubmit",
                "test_cases": [
                    {"name": "open", "result": "pass"},
                    {"name": "close", "result": "FAIL"},
                    {"name": "flash", "result": "skip"}
                ]
            }"#,
        )
        .unwrap()
    }

    fn point(name: &str, value: f64) -> ProfilingPointRunEntity {
        ProfilingPointRunEntity {
            name: name.into(),
            vector_kind: VectorKind::Unlabeled,
            regression_mode: RegressionMode::LowerIsBetter,
            labels: Vec::new(),
            values: vec![value],
            x_label: String::new(),
            y_label: String::new(),
        }
    }

    #[test]
    fn test_counts_from_cases() {
        let report = report();
        assert!(report.validate().is_ok());
        assert_eq!(report.counts(), (1, 1));
        assert_eq!(report.run_type, TestRunType::Postsubmit);
    }

    #[test]
    fn test_validation_failures() {
        let mut r = report();
        r.test_name = " ".into();
        assert!(matches!(r.validate(), Err(IngestError::InvalidReport(_))));

        let mut r = report();
        r.end_timestamp = 10;
        assert!(r.validate().is_err());

        let mut r = report();
        r.start_timestamp = 0;
        assert!(r.validate().is_err());

        assert!(matches!(
            TestReport::from_json("{\"start_timestamp\": 1}"),
            Err(IngestError::Malformed(_))
        ));
    }

    #[test]
    fn test_non_finite_values_are_rejected() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut r = report();
            r.profiling_points = vec![point("ok", 1.0), point("lat", bad)];
            assert!(matches!(r.validate(), Err(IngestError::InvalidReport(_))));
        }
    }

    #[test]
    fn test_last_point_of_a_name_wins() {
        let mut r = report();
        r.profiling_points = vec![point("a", 1.0), point("b", 2.0), point("a", 3.0)];
        let r = r.deduplicated();
        let names: Vec<(&str, f64)> = r
            .profiling_points
            .iter()
            .map(|p| (p.name.as_str(), p.values[0]))
            .collect();
        assert_eq!(names, vec![("b", 2.0), ("a", 3.0)]);
    }
}
