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

use dashstore_core::config::ResolverConfig;
use dashstore_core::entity::{
    fields, DeviceInfoEntity, EntityKind, ProfilingPointRunEntity, ProfilingPointSummaryEntity,
    RegressionMode, TestEntity, TestRunEntity, TestRunType, VectorKind,
};
use dashstore_core::{Filter, KeyedStore, Kind, RetryPolicy};
use dashstore_query::Resolver;
use dashstore_stats::{
    Comparison, Digest, DigestStatistic, PerformanceLoader, PerformanceSummary, SplitKey,
    StatsError, SummaryQuery, SummaryRollup, Trend,
};
use dashstore_storage::{MemoryStore, TransactionRunner};
use std::sync::Arc;

struct Run {
    start: i64,
    branch: &'static str,
    boot: &'static [f64],
}

fn device(branch: &str) -> DeviceInfoEntity {
    DeviceInfoEntity {
        branch: branch.to_string(),
        product: "walleye".to_string(),
        build_flavor: "walleye-userdebug".to_string(),
        build_id: "1234".to_string(),
        abi_bitness: "64".to_string(),
        abi_name: "arm64-v8a".to_string(),
    }
}

fn boot_point(values: &[f64]) -> ProfilingPointRunEntity {
    ProfilingPointRunEntity {
        name: "boot_time".to_string(),
        vector_kind: VectorKind::Unlabeled,
        regression_mode: RegressionMode::LowerIsBetter,
        labels: Vec::new(),
        values: values.to_vec(),
        x_label: String::new(),
        y_label: "ms".to_string(),
    }
}

fn seed(store: &MemoryStore, runs: &[Run]) {
    let test_key = TestEntity::key_for("camera");
    let mut records = vec![TestEntity::new("camera").to_record(test_key.clone()).unwrap()];
    for run in runs {
        let run_key = TestRunEntity::key_for(&test_key, run.start);
        let entity = TestRunEntity {
            run_type: TestRunType::Postsubmit,
            start_timestamp: run.start,
            end_timestamp: run.start + 5,
            test_build_id: format!("b{}", run.start),
            host_name: "host".to_string(),
            pass_count: 1,
            fail_count: 0,
            test_case_ids: Vec::new(),
            log_links: Vec::new(),
            total_line_count: 0,
            covered_line_count: 0,
        };
        records.push(entity.to_record(run_key.clone()).unwrap());
        records.push(
            device(run.branch)
                .to_record(run_key.child(Kind::DeviceInfo, 1))
                .unwrap(),
        );
        records.push(
            boot_point(run.boot)
                .to_record(ProfilingPointRunEntity::key_for(&run_key, "boot_time"))
                .unwrap(),
        );
    }
    store.put_many(records).unwrap();
}

fn fixture() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    seed(
        &store,
        &[
            Run { start: 100, branch: "main", boot: &[10.0, 20.0] },
            Run { start: 1_100, branch: "main", boot: &[30.0] },
            Run { start: 1_200, branch: "dev", boot: &[50.0] },
            Run { start: 5_000, branch: "main", boot: &[1.0] },
        ],
    );
    store
}

fn resolver(store: Arc<MemoryStore>) -> Resolver {
    Resolver::new(store, ResolverConfig::default())
}

fn windows() -> Vec<PerformanceSummary> {
    vec![
        PerformanceSummary::with_label(0, 1_000, "baseline").unwrap(),
        PerformanceSummary::with_label(1_000, 2_000, "current").unwrap(),
    ]
}

#[test]
fn test_loader_fills_windows_by_run_start() {
    let loader = PerformanceLoader::new(resolver(fixture()));
    let mut windows = windows();

    let folded = loader.load("camera", &mut windows, None, &[]).unwrap();
    assert_eq!(folded, 3);

    let baseline = windows[0].get("boot_time").unwrap().get("boot_time").unwrap();
    assert_eq!(baseline.count(), 2);
    assert_eq!(baseline.mean(), 15.0);

    let current = windows[1].get("boot_time").unwrap().get("boot_time").unwrap();
    assert_eq!(current.count(), 2);
    assert_eq!(current.mean(), 40.0);
    assert_eq!(current.min(), Some(30.0));
}

#[test]
fn test_loader_device_filter_and_split() {
    let loader = PerformanceLoader::new(resolver(fixture()));

    let mut filtered = windows();
    let folded = loader
        .load(
            "camera",
            &mut filtered,
            Some(Filter::new().eq(fields::BRANCH, "main")),
            &[],
        )
        .unwrap();
    assert_eq!(folded, 2);
    let current = filtered[1].get("boot_time").unwrap().get("boot_time").unwrap();
    assert_eq!(current.mean(), 30.0);

    let mut split = windows();
    loader
        .load("camera", &mut split, None, &[SplitKey::Branch])
        .unwrap();
    let names: Vec<&str> = split[1].point_names().collect();
    assert_eq!(names, vec!["boot_time (dev)", "boot_time (main)"]);
}

#[test]
fn test_digest_compares_current_to_baseline() {
    let loader = PerformanceLoader::new(resolver(fixture()));
    let mut windows = windows();
    loader.load("camera", &mut windows, None, &[]).unwrap();

    let (baseline, current) = windows.split_at(1);
    let digest = Digest::build(&current[0], baseline, DigestStatistic::Mean);
    assert_eq!(digest.current_window, "current");
    assert_eq!(digest.baseline_windows, vec!["baseline".to_string()]);

    let row = digest.row("boot_time", "boot_time").unwrap();
    assert_eq!(row.current, 40.0);
    let cell = &row.cells[0];
    assert_eq!(cell.baseline_value, Some(15.0));
    match cell.comparison {
        Comparison::Change { percent, intensity } => {
            assert!((percent - 166.666_666_666).abs() < 1e-6);
            assert_eq!(intensity, 1.0);
        }
        other => panic!("unexpected comparison {:?}", other),
    }
    // Boot time went up, which is worse for a lower-is-better point.
    assert_eq!(cell.trend, Some(Trend::Regressed));

    let json = serde_json::to_value(&digest).unwrap();
    assert_eq!(json["statistic"], "mean");
    assert_eq!(json["rows"][0]["cells"][0]["comparison"]["type"], "change");
    assert_eq!(json["rows"][0]["cells"][0]["trend"], "regressed");
}

#[test]
fn test_rollup_round_trip() {
    let store = fixture();
    let runner = TransactionRunner::new(store.clone(), RetryPolicy::immediate(5), 300);
    let rollup = SummaryRollup::new(resolver(store.clone()), runner);

    let report = rollup.rollup("camera", 1_000, 2_000).unwrap();
    assert_eq!(report.runs_scanned, 2);
    assert_eq!(report.summaries_written, 2);
    assert_eq!(store.count_kind(Kind::ProfilingPointSummary), 2);

    let main_key =
        ProfilingPointSummaryEntity::key_for("camera", "boot_time", 1_000, "main", "walleye-userdebug");
    let stored = store.get(&main_key).unwrap().unwrap();
    let entity = ProfilingPointSummaryEntity::from_record(&stored).unwrap();
    assert_eq!(entity.stats.len(), 1);
    assert_eq!(entity.stats[0].count, 1);
    assert_eq!(entity.stats[0].mean, 30.0);

    let both = rollup
        .load_summaries(&SummaryQuery::new("camera", "boot_time", 0, 2_000))
        .unwrap()
        .unwrap();
    let merged = both.get("boot_time").unwrap();
    assert_eq!(merged.count(), 2);
    assert_eq!(merged.mean(), 40.0);

    let dev_only = rollup
        .load_summaries(&SummaryQuery::new("camera", "boot_time", 0, 2_000).branch("dev"))
        .unwrap()
        .unwrap();
    assert_eq!(dev_only.get("boot_time").unwrap().mean(), 50.0);

    assert!(rollup
        .load_summaries(&SummaryQuery::new("camera", "boot_time", 3_000, 9_000))
        .unwrap()
        .is_none());

    // Re-running a bucket overwrites rather than duplicating.
    rollup.rollup("camera", 1_000, 2_000).unwrap();
    assert_eq!(store.count_kind(Kind::ProfilingPointSummary), 2);
}

#[test]
fn test_rollup_rejects_inverted_bucket() {
    let store = fixture();
    let runner = TransactionRunner::new(store.clone(), RetryPolicy::immediate(1), 300);
    let rollup = SummaryRollup::new(resolver(store), runner);
    assert!(matches!(
        rollup.rollup("camera", 2_000, 1_000),
        Err(StatsError::InvalidWindow { .. })
    ));
}
