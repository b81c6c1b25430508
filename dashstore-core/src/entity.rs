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

//! Typed entities stored per kind
//!
//! Every stored record has one of the shapes below. Conversion to and from
//! `RawRecord` happens only at the store boundary (`EntityKind::to_record` /
//! `EntityKind::from_record`), everything above it works with these types.
//!
//! # Key Layout
//!
//! - Root: `Test:{name}`
//! - Run: `Test:{name}/TestRun:{start_us}`
//! - Details: `Test:{name}/TestRun:{start_us}/{DeviceInfo|ProfilingPointRun|Coverage|TestCaseRun}:{id}`
//! - References: `Branch:{name}`, `BuildTarget:{name}`
//! - Rollups: `ProfilingPointSummary:{test}/{point}/{bucket_start}/{branch}/{flavor}`

use crate::error::{StoreError, StoreResult};
use crate::key::{Key, Kind};
use crate::record::RawRecord;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Stored property names that filters refer to.
pub mod fields {
    pub const NAME: &str = "name";
    pub const HAS_PROFILING_DATA: &str = "has_profiling_data";
    pub const RUN_TYPE: &str = "run_type";
    pub const TEST_BUILD_ID: &str = "test_build_id";
    pub const HOST_NAME: &str = "host_name";
    pub const PASS_COUNT: &str = "pass_count";
    pub const FAIL_COUNT: &str = "fail_count";
    pub const BRANCH: &str = "branch";
    pub const PRODUCT: &str = "product";
    pub const BUILD_FLAVOR: &str = "build_flavor";
    pub const BUILD_ID: &str = "build_id";
    pub const TEST_NAME: &str = "test_name";
    pub const POINT_NAME: &str = "point_name";
    pub const BUCKET_START: &str = "bucket_start";
}

/// A struct stored under exactly one kind.
pub trait EntityKind: Serialize + DeserializeOwned {
    const KIND: Kind;

    fn to_record(&self, key: Key) -> StoreResult<RawRecord> {
        check_kind(&key, Self::KIND)?;
        RawRecord::from_entity(key, self)
    }

    fn from_record(record: &RawRecord) -> StoreResult<Self> {
        check_kind(&record.key, Self::KIND)?;
        record.decode()
    }
}

fn check_kind(key: &Key, expected: Kind) -> StoreResult<()> {
    if key.kind() != expected {
        return Err(StoreError::Codec(format!(
            "key {} does not hold a {} entity",
            key, expected
        )));
    }
    Ok(())
}

/// Root record: one per test name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEntity {
    pub name: String,
    /// Derived: set once any run of this test reported profiling points.
    #[serde(default)]
    pub has_profiling_data: bool,
}

impl TestEntity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            has_profiling_data: false,
        }
    }

    pub fn key_for(name: &str) -> Key {
        Key::root(Kind::Test, name)
    }
}

impl EntityKind for TestEntity {
    const KIND: Kind = Kind::Test;
}

/// Run classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestRunType {
    Presubmit,
    /// Scheduled build; triggers follow-on work after commit.
    Postsubmit,
    #[default]
    Other,
}

impl TestRunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestRunType::Presubmit => "presubmit",
            TestRunType::Postsubmit => "postsubmit",
            TestRunType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "presubmit" => Some(TestRunType::Presubmit),
            "postsubmit" => Some(TestRunType::Postsubmit),
            "other" => Some(TestRunType::Other),
            _ => None,
        }
    }
}

/// One execution of a test, keyed by its start time in microseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunEntity {
    pub run_type: TestRunType,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub test_build_id: String,
    pub host_name: String,
    pub pass_count: i64,
    pub fail_count: i64,
    /// Ids of the `TestCaseRun` children holding per-case results.
    #[serde(default)]
    pub test_case_ids: Vec<i64>,
    #[serde(default)]
    pub log_links: Vec<String>,
    #[serde(default)]
    pub total_line_count: i64,
    #[serde(default)]
    pub covered_line_count: i64,
}

impl TestRunEntity {
    pub fn key_for(test_key: &Key, start_timestamp: i64) -> Key {
        test_key.child(Kind::TestRun, start_timestamp)
    }
}

impl EntityKind for TestRunEntity {
    const KIND: Kind = Kind::TestRun;
}

/// Device a run executed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfoEntity {
    pub branch: String,
    pub product: String,
    pub build_flavor: String,
    pub build_id: String,
    #[serde(default)]
    pub abi_bitness: String,
    #[serde(default)]
    pub abi_name: String,
}

impl EntityKind for DeviceInfoEntity {
    const KIND: Kind = Kind::DeviceInfo;
}

/// Whether a profiling point reports one value per label or a bare series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorKind {
    Labeled,
    Unlabeled,
}

/// Direction of improvement for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionMode {
    HigherIsBetter,
    #[default]
    LowerIsBetter,
}

/// Values one run reported for a single profiling point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilingPointRunEntity {
    pub name: String,
    pub vector_kind: VectorKind,
    #[serde(default)]
    pub regression_mode: RegressionMode,
    /// Parallel to `values` for labeled points, empty otherwise.
    #[serde(default)]
    pub labels: Vec<String>,
    pub values: Vec<f64>,
    #[serde(default)]
    pub x_label: String,
    #[serde(default)]
    pub y_label: String,
}

impl ProfilingPointRunEntity {
    pub fn key_for(run_key: &Key, point_name: &str) -> Key {
        run_key.child(Kind::ProfilingPointRun, point_name)
    }
}

impl EntityKind for ProfilingPointRunEntity {
    const KIND: Kind = Kind::ProfilingPointRun;
}

/// Line coverage of one source file in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageEntity {
    pub project_name: String,
    pub project_version: String,
    pub file_path: String,
    pub total_line_count: i64,
    pub covered_line_count: i64,
    /// Per-line hit counts, -1 for non-executable lines.
    #[serde(default)]
    pub line_coverage: Vec<i64>,
}

impl EntityKind for CoverageEntity {
    const KIND: Kind = Kind::Coverage;
}

/// Outcome of a single test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    pub result: String,
}

/// A batch of test case results belonging to one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseRunEntity {
    pub cases: Vec<TestCaseResult>,
}

impl EntityKind for TestCaseRunEntity {
    const KIND: Kind = Kind::TestCaseRun;
}

/// Flat reference record for a branch name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchEntity {
    pub name: String,
}

impl BranchEntity {
    pub fn key_for(name: &str) -> Key {
        Key::root(Kind::Branch, name)
    }
}

impl EntityKind for BranchEntity {
    const KIND: Kind = Kind::Branch;
}

/// Flat reference record for a build target (flavor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTargetEntity {
    pub name: String,
}

impl BuildTargetEntity {
    pub fn key_for(name: &str) -> Key {
        Key::root(Kind::BuildTarget, name)
    }
}

impl EntityKind for BuildTargetEntity {
    const KIND: Kind = Kind::BuildTarget;
}

/// Serialized form of one label's running statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredStat {
    pub label: String,
    pub count: i64,
    pub mean: f64,
    pub sum_squared_deviation: f64,
    pub min: f64,
    pub max: f64,
}

/// Derived rollup of one profiling point over a time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilingPointSummaryEntity {
    pub test_name: String,
    pub point_name: String,
    pub bucket_start: i64,
    pub bucket_end: i64,
    pub branch: String,
    pub build_flavor: String,
    #[serde(default)]
    pub regression_mode: RegressionMode,
    pub stats: Vec<StoredStat>,
}

impl ProfilingPointSummaryEntity {
    /// Root key naming one (test, point, bucket, branch, flavor) cell.
    ///
    /// Each string part is length-prefixed, so no two distinct cells share
    /// a key whatever characters the names contain.
    pub fn key_for(
        test_name: &str,
        point_name: &str,
        bucket_start: i64,
        branch: &str,
        build_flavor: &str,
    ) -> Key {
        Key::root(
            Kind::ProfilingPointSummary,
            format!(
                "{}{}{}/{}{}",
                length_prefixed(test_name),
                length_prefixed(point_name),
                bucket_start,
                length_prefixed(branch),
                length_prefixed(build_flavor)
            ),
        )
    }

    pub fn key(&self) -> Key {
        Self::key_for(
            &self.test_name,
            &self.point_name,
            self.bucket_start,
            &self.branch,
            &self.build_flavor,
        )
    }
}

fn length_prefixed(part: &str) -> String {
    format!("{}:{}/", part.len(), part)
}

impl EntityKind for ProfilingPointSummaryEntity {
    const KIND: Kind = Kind::ProfilingPointSummary;
}

/// Any stored entity, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entity")]
pub enum Entity {
    Test(TestEntity),
    TestRun(TestRunEntity),
    DeviceInfo(DeviceInfoEntity),
    ProfilingPointRun(ProfilingPointRunEntity),
    Coverage(CoverageEntity),
    TestCaseRun(TestCaseRunEntity),
    Branch(BranchEntity),
    BuildTarget(BuildTargetEntity),
    ProfilingPointSummary(ProfilingPointSummaryEntity),
}

impl Entity {
    pub fn kind(&self) -> Kind {
        match self {
            Entity::Test(_) => Kind::Test,
            Entity::TestRun(_) => Kind::TestRun,
            Entity::DeviceInfo(_) => Kind::DeviceInfo,
            Entity::ProfilingPointRun(_) => Kind::ProfilingPointRun,
            Entity::Coverage(_) => Kind::Coverage,
            Entity::TestCaseRun(_) => Kind::TestCaseRun,
            Entity::Branch(_) => Kind::Branch,
            Entity::BuildTarget(_) => Kind::BuildTarget,
            Entity::ProfilingPointSummary(_) => Kind::ProfilingPointSummary,
        }
    }

    /// Decode a raw record according to its key's kind.
    pub fn from_record(record: &RawRecord) -> StoreResult<Self> {
        Ok(match record.key.kind() {
            Kind::Test => Entity::Test(TestEntity::from_record(record)?),
            Kind::TestRun => Entity::TestRun(TestRunEntity::from_record(record)?),
            Kind::DeviceInfo => Entity::DeviceInfo(DeviceInfoEntity::from_record(record)?),
            Kind::ProfilingPointRun => {
                Entity::ProfilingPointRun(ProfilingPointRunEntity::from_record(record)?)
            }
            Kind::Coverage => Entity::Coverage(CoverageEntity::from_record(record)?),
            Kind::TestCaseRun => Entity::TestCaseRun(TestCaseRunEntity::from_record(record)?),
            Kind::Branch => Entity::Branch(BranchEntity::from_record(record)?),
            Kind::BuildTarget => Entity::BuildTarget(BuildTargetEntity::from_record(record)?),
            Kind::ProfilingPointSummary => {
                Entity::ProfilingPointSummary(ProfilingPointSummaryEntity::from_record(record)?)
            }
        })
    }

    pub fn to_record(&self, key: Key) -> StoreResult<RawRecord> {
        match self {
            Entity::Test(e) => e.to_record(key),
            Entity::TestRun(e) => e.to_record(key),
            Entity::DeviceInfo(e) => e.to_record(key),
            Entity::ProfilingPointRun(e) => e.to_record(key),
            Entity::Coverage(e) => e.to_record(key),
            Entity::TestCaseRun(e) => e.to_record(key),
            Entity::Branch(e) => e.to_record(key),
            Entity::BuildTarget(e) => e.to_record(key),
            Entity::ProfilingPointSummary(e) => e.to_record(key),
        }
    }
}

/// An entity together with the key it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedEntity {
    pub key: Key,
    pub entity: Entity,
}

impl KeyedEntity {
    pub fn from_record(record: &RawRecord) -> StoreResult<Self> {
        Ok(Self {
            key: record.key.clone(),
            entity: Entity::from_record(record)?,
        })
    }

    pub fn to_record(&self) -> StoreResult<RawRecord> {
        self.entity.to_record(self.key.clone())
    }
}
