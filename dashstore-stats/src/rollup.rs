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

//! Profiling point rollups
//!
//! `SummaryRollup` folds one time bucket of a test's profiling runs into
//! `ProfilingPointSummary` records, one per (point, branch, build flavor).
//! Rollups are derived data: re-running a bucket recomputes it from the
//! run records and overwrites the previous result.

use crate::error::{Result, StatsError};
use crate::profiling::ProfilingPointSummary;
use crate::stat_summary::StatSummary;
use dashstore_core::config::DEFAULT_MAX_GROUPS_PER_TRANSACTION;
use dashstore_core::entity::{
    fields, DeviceInfoEntity, ProfilingPointRunEntity, ProfilingPointSummaryEntity, TestEntity,
};
use dashstore_core::{
    Deadline, EntityKind, Filter, Key, Kind, Query, RangeFilter, SortDirection, StoreResult,
    Value,
};
use dashstore_query::{ResolveRequest, Resolver};
use dashstore_storage::TransactionRunner;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Bound;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RollupReport {
    pub runs_scanned: usize,
    pub summaries_written: usize,
    pub transactions: usize,
}

/// Selects stored rollups of one point.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryQuery {
    pub test_name: String,
    pub point_name: String,
    /// Buckets starting in `[from, to)` are merged.
    pub from: i64,
    pub to: i64,
    pub branch: Option<String>,
    pub build_flavor: Option<String>,
}

impl SummaryQuery {
    pub fn new(test_name: impl Into<String>, point_name: impl Into<String>, from: i64, to: i64) -> Self {
        Self {
            test_name: test_name.into(),
            point_name: point_name.into(),
            from,
            to,
            branch: None,
            build_flavor: None,
        }
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn build_flavor(mut self, build_flavor: impl Into<String>) -> Self {
        self.build_flavor = Some(build_flavor.into());
        self
    }

    fn filter(&self) -> Filter {
        let mut filter = Filter::new()
            .eq(fields::TEST_NAME, self.test_name.as_str())
            .eq(fields::POINT_NAME, self.point_name.as_str());
        if let Some(branch) = &self.branch {
            filter = filter.eq(fields::BRANCH, branch.as_str());
        }
        if let Some(flavor) = &self.build_flavor {
            filter = filter.eq(fields::BUILD_FLAVOR, flavor.as_str());
        }
        filter.with_range(RangeFilter::new(
            dashstore_core::Property::field(fields::BUCKET_START),
            Bound::Included(Value::Int(self.from)),
            Bound::Excluded(Value::Int(self.to)),
        ))
    }
}

/// Every rollup record is its own entity group, so a write transaction is
/// bounded by the cross-group limit as well as the entity cap.
pub struct SummaryRollup {
    resolver: Resolver,
    runner: TransactionRunner,
    max_groups: usize,
}

impl SummaryRollup {
    pub fn new(resolver: Resolver, runner: TransactionRunner) -> Self {
        Self {
            resolver,
            runner,
            max_groups: DEFAULT_MAX_GROUPS_PER_TRANSACTION,
        }
    }

    pub fn with_max_groups(mut self, max_groups: usize) -> Self {
        self.max_groups = max_groups.max(1);
        self
    }

    fn chunk_size(&self) -> usize {
        self.runner.max_per_transaction().min(self.max_groups)
    }

    /// Recompute and store the rollups of `test_name` for runs starting in
    /// `[bucket_start, bucket_end)`.
    pub fn rollup(&self, test_name: &str, bucket_start: i64, bucket_end: i64) -> Result<RollupReport> {
        if bucket_end <= bucket_start {
            return Err(StatsError::InvalidWindow {
                start: bucket_start,
                end: bucket_end,
            });
        }

        let test_key = TestEntity::key_for(test_name);
        let request = ResolveRequest::new(test_key.clone(), Kind::TestRun)
            .filter(Filter::new().key_range(
                Bound::Included(test_key.child(Kind::TestRun, bucket_start)),
                Bound::Excluded(test_key.child(Kind::TestRun, bucket_end)),
            ))
            .direction(SortDirection::Ascending);
        let runs = self.resolver.resolve(&request)?;

        let mut groups: BTreeMap<(String, String, String), ProfilingPointSummary> = BTreeMap::new();
        for run_key in &runs {
            let points = self.resolver.children_of::<ProfilingPointRunEntity>(run_key)?;
            if points.is_empty() {
                continue;
            }
            let devices = self.resolver.children_of::<DeviceInfoEntity>(run_key)?;
            let (branch, flavor) = devices
                .first()
                .map(|(_, d)| (d.branch.clone(), d.build_flavor.clone()))
                .unwrap_or_default();

            for (_, point) in &points {
                groups
                    .entry((point.name.clone(), branch.clone(), flavor.clone()))
                    .or_insert_with(|| ProfilingPointSummary::for_run(point))
                    .update(point);
            }
        }

        let mut records = Vec::with_capacity(groups.len());
        for ((point_name, branch, build_flavor), summary) in &groups {
            let entity = ProfilingPointSummaryEntity {
                test_name: test_name.to_string(),
                point_name: point_name.clone(),
                bucket_start,
                bucket_end,
                branch: branch.clone(),
                build_flavor: build_flavor.clone(),
                regression_mode: summary.regression_mode(),
                stats: summary.iter().map(StatSummary::to_stored).collect(),
            };
            records.push(entity.to_record(entity.key())?);
        }

        let mut report = RollupReport {
            runs_scanned: runs.len(),
            ..RollupReport::default()
        };
        let deadline = Deadline::none();
        for chunk in records.chunks(self.chunk_size()) {
            report.summaries_written += self.runner.put_all("rollup", chunk, &deadline)?;
            report.transactions += 1;
        }

        tracing::info!(
            "Rolled up {} runs of {} into {} summaries",
            report.runs_scanned,
            test_name,
            report.summaries_written
        );
        Ok(report)
    }

    /// Merge the stored rollups selected by `query` back into one summary.
    pub fn load_summaries(&self, query: &SummaryQuery) -> StoreResult<Option<ProfilingPointSummary>> {
        let keys: Vec<Key> = self
            .resolver
            .store()
            .query(
                &Query::new(Kind::ProfilingPointSummary)
                    .filter(query.filter())
                    .keys_only(),
            )?
            .into_iter()
            .map(|row| row.key)
            .collect();

        let mut merged: Option<ProfilingPointSummary> = None;
        for (_, entity) in self.resolver.fetch_as::<ProfilingPointSummaryEntity>(&keys)? {
            let summary = merged.get_or_insert_with(|| {
                ProfilingPointSummary::new(entity.point_name.clone(), entity.regression_mode)
            });
            for stored in &entity.stats {
                summary.merge_stat(&StatSummary::from_stored(stored, entity.regression_mode));
            }
        }
        Ok(merged)
    }
}
