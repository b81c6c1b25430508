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

use dashstore_core::config::IngestConfig;
use dashstore_core::entity::{
    CoverageEntity, DeviceInfoEntity, EntityKind, ProfilingPointRunEntity, RegressionMode,
    TestCaseResult, TestEntity, TestRunEntity, TestRunType, VectorKind,
};
use dashstore_core::{Key, KeyedStore, Kind, RetryPolicy, StoreError};
use dashstore_ingest::{BatchId, IngestError, IngestOutcome, Ingestor, TestReport};
use dashstore_storage::{MemoryStore, QueueTaskSink};
use std::sync::Arc;

fn point(name: &str, values: &[f64]) -> ProfilingPointRunEntity {
    ProfilingPointRunEntity {
        name: name.to_string(),
        vector_kind: VectorKind::Unlabeled,
        regression_mode: RegressionMode::LowerIsBetter,
        labels: Vec::new(),
        values: values.to_vec(),
        x_label: String::new(),
        y_label: "ms".to_string(),
    }
}

fn device(branch: &str) -> DeviceInfoEntity {
    DeviceInfoEntity {
        branch: branch.to_string(),
        product: "walleye".to_string(),
        build_flavor: "walleye-userdebug".to_string(),
        build_id: "5678".to_string(),
        abi_bitness: "64".to_string(),
        abi_name: "arm64-v8a".to_string(),
    }
}

fn coverage(file: &str) -> CoverageEntity {
    CoverageEntity {
        project_name: "frameworks".to_string(),
        project_version: "abc123".to_string(),
        file_path: file.to_string(),
        total_line_count: 10,
        covered_line_count: 7,
        line_coverage: vec![1, 0, -1],
    }
}

fn report(start: i64, points: usize) -> TestReport {
    TestReport {
        test_name: "camera_hal".to_string(),
        start_timestamp: start,
        end_timestamp: start + 100,
        run_type: TestRunType::Postsubmit,
        test_build_id: "build-1".to_string(),
        host_name: "lab-host".to_string(),
        pass_count: None,
        fail_count: None,
        log_links: vec!["gs://logs/1".to_string()],
        test_cases: vec![
            TestCaseResult {
                name: "open".to_string(),
                result: "pass".to_string(),
            },
            TestCaseResult {
                name: "close".to_string(),
                result: "fail".to_string(),
            },
        ],
        devices: vec![device("main")],
        profiling_points: (0..points)
            .map(|i| point(&format!("point_{}", i), &[i as f64]))
            .collect(),
        coverage: vec![coverage("a.cpp")],
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    sink: Arc<QueueTaskSink>,
    ingestor: Ingestor,
}

fn harness(cap: usize) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(QueueTaskSink::default());
    let config = IngestConfig {
        max_entities_per_transaction: cap,
        retry: RetryPolicy::immediate(5),
        ..IngestConfig::default()
    };
    let ingestor = Ingestor::new(store.clone(), sink.clone(), config);
    Harness {
        store,
        sink,
        ingestor,
    }
}

fn run_key(start: i64) -> Key {
    TestRunEntity::key_for(&TestEntity::key_for("camera_hal"), start)
}

#[test]
fn test_identical_report_is_idempotent() {
    let h = harness(300);
    let r = report(1_000, 2);

    assert!(h.ingestor.ingest(&r));
    let after_first = h.store.len();
    assert!(h.ingestor.ingest(&r));

    assert_eq!(h.store.count_kind(Kind::Test), 1);
    assert_eq!(h.store.count_kind(Kind::TestRun), 1);
    assert_eq!(h.store.count_kind(Kind::ProfilingPointRun), 2);
    assert_eq!(h.store.len(), after_first);

    // Follow-on work is only issued when the run is first created.
    let items = h.sink.drain();
    let kinds: Vec<&str> = items.iter().map(|item| item.kind.as_str()).collect();
    assert_eq!(kinds, vec!["alert", "performance"]);
    assert!(items.iter().all(|item| item.key == run_key(1_000)));
}

#[test]
fn test_batch_over_cap_is_split_in_two() {
    let h = harness(3);
    let mut r = report(1_000, 4);
    r.test_cases.clear();
    r.devices.clear();
    r.coverage.clear();

    let outcome = h.ingestor.ingest_report(&r);
    let ledger = outcome.ledger().unwrap();
    assert!(matches!(outcome, IngestOutcome::Committed(_)));
    assert_eq!(
        ledger.planned(),
        &[BatchId::Root, BatchId::Profiling(0), BatchId::Profiling(1)]
    );
    assert_eq!(h.store.stats().commits, 3);
    assert_eq!(h.store.count_kind(Kind::ProfilingPointRun), 4);
}

#[test]
fn test_transient_conflicts_are_retried() {
    let h = harness(300);
    h.store.inject_commit_failures(
        Some(Kind::ProfilingPointRun),
        3,
        StoreError::Conflict(run_key(1_000)),
    );

    assert!(h.ingestor.ingest(&report(1_000, 2)));
    assert_eq!(h.store.stats().conflicts, 3);
    assert_eq!(h.store.count_kind(Kind::ProfilingPointRun), 2);
}

#[test]
fn test_failed_batch_is_isolated_and_resumable() {
    let h = harness(300);
    h.store.inject_commit_failures(
        Some(Kind::Coverage),
        5,
        StoreError::Unavailable("backend down".into()),
    );
    let r = report(1_000, 2);

    let outcome = h.ingestor.ingest_report(&r);
    assert!(!outcome.is_success());
    let IngestOutcome::PartiallyFailed(ledger) = outcome else {
        panic!("expected partial failure");
    };
    assert_eq!(ledger.failed().len(), 1);
    assert_eq!(ledger.failed()[0].batch, BatchId::Coverage(0));
    assert_eq!(h.store.count_kind(Kind::Coverage), 0);
    // Siblings committed before and after the failure stay committed.
    assert_eq!(h.store.count_kind(Kind::ProfilingPointRun), 2);
    assert_eq!(h.store.count_kind(Kind::Branch), 1);

    let commits_before = h.store.stats().commits;
    let resumed = h.ingestor.resume(&r, &ledger);
    assert!(matches!(resumed, IngestOutcome::Committed(_)));
    assert_eq!(h.store.stats().commits, commits_before + 1);
    assert_eq!(h.store.count_kind(Kind::Coverage), 1);
    assert_eq!(h.store.count_kind(Kind::Test), 1);
}

#[test]
fn test_resume_rejects_foreign_ledger() {
    let h = harness(300);
    h.store
        .inject_commit_failures(Some(Kind::Coverage), 5, StoreError::Unavailable("down".into()));
    let outcome = h.ingestor.ingest_report(&report(1_000, 1));
    let ledger = outcome.ledger().unwrap().clone();

    let other = report(2_000, 1);
    assert!(matches!(
        h.ingestor.resume(&other, &ledger),
        IngestOutcome::Skipped(_)
    ));
    assert_eq!(h.store.count_kind(Kind::TestRun), 1);
}

#[test]
fn test_different_run_on_same_key_is_rejected() {
    let h = harness(300);
    assert!(h.ingestor.ingest(&report(1_000, 1)));

    let mut changed = report(1_000, 3);
    changed.host_name = "other-host".to_string();
    let outcome = h.ingestor.ingest_report(&changed);
    assert_eq!(
        outcome,
        IngestOutcome::Rejected(IngestError::RunAlreadyCommitted(run_key(1_000)))
    );

    let stored = h.store.get(&run_key(1_000)).unwrap().unwrap();
    let run = TestRunEntity::from_record(&stored).unwrap();
    assert_eq!(run.host_name, "lab-host");
    assert_eq!(h.store.count_kind(Kind::ProfilingPointRun), 1);
}

#[test]
fn test_profiling_flag_is_sticky() {
    let h = harness(300);
    let test_key = TestEntity::key_for("camera_hal");
    assert!(h.ingestor.ingest(&report(1_000, 1)));

    let mut plain = report(2_000, 0);
    plain.run_type = TestRunType::Presubmit;
    assert!(h.ingestor.ingest(&plain));

    let stored = h.store.get(&test_key).unwrap().unwrap();
    assert!(TestEntity::from_record(&stored).unwrap().has_profiling_data);
    assert_eq!(h.store.count_kind(Kind::TestRun), 2);
    // Presubmit runs do not trigger follow-on work.
    assert_eq!(h.sink.len(), 2);
}

#[test]
fn test_invalid_input_writes_nothing() {
    let h = harness(300);
    let mut r = report(1_000, 1);
    r.test_name = String::new();

    assert!(matches!(h.ingestor.ingest_report(&r), IngestOutcome::Skipped(_)));
    assert!(matches!(h.ingestor.ingest_json("{not json"), IngestOutcome::Skipped(_)));
    assert!(h.store.is_empty());
    assert!(h.sink.is_empty());
}

#[test]
fn test_cases_are_batched_and_referenced_from_run() {
    let h = harness(300);
    let mut r = report(1_000, 0);
    r.test_cases = (0..250)
        .map(|i| TestCaseResult {
            name: format!("case_{}", i),
            result: if i % 5 == 0 { "fail" } else { "pass" }.to_string(),
        })
        .collect();

    assert!(h.ingestor.ingest(&r));
    assert_eq!(h.store.count_kind(Kind::TestCaseRun), 3);

    let stored = h.store.get(&run_key(1_000)).unwrap().unwrap();
    let run = TestRunEntity::from_record(&stored).unwrap();
    assert_eq!(run.test_case_ids, vec![1, 2, 3]);
    assert_eq!((run.pass_count, run.fail_count), (200, 50));
    assert_eq!((run.total_line_count, run.covered_line_count), (10, 7));
}

#[test]
fn test_reference_records_are_shared() {
    let h = harness(300);
    assert!(h.ingestor.ingest(&report(1_000, 0)));
    let mut second = report(2_000, 0);
    second.devices.push(device("release"));
    assert!(h.ingestor.ingest(&second));

    assert_eq!(h.store.count_kind(Kind::Branch), 2);
    assert_eq!(h.store.count_kind(Kind::BuildTarget), 1);
    assert_eq!(h.store.count_kind(Kind::DeviceInfo), 3);
}

#[test]
fn test_children_wait_for_their_run() {
    let h = harness(300);
    h.store.inject_commit_failures(
        Some(Kind::TestRun),
        5,
        StoreError::Unavailable("backend down".into()),
    );
    let r = report(1_000, 1);

    let outcome = h.ingestor.ingest_report(&r);
    let IngestOutcome::PartiallyFailed(ledger) = outcome else {
        panic!("expected partial failure");
    };
    assert_eq!(ledger.failed()[0].batch, BatchId::Root);
    assert_eq!(h.store.count_kind(Kind::TestRun), 0);
    assert_eq!(h.store.count_kind(Kind::TestCaseRun), 0);
    assert_eq!(h.store.count_kind(Kind::DeviceInfo), 0);
    assert_eq!(h.store.count_kind(Kind::ProfilingPointRun), 0);
    assert!(h.sink.is_empty());

    assert!(h.ingestor.resume(&r, &ledger).is_success());
    assert_eq!(h.store.count_kind(Kind::TestRun), 1);
    assert_eq!(h.store.count_kind(Kind::TestCaseRun), 1);
    assert_eq!(h.store.count_kind(Kind::DeviceInfo), 1);
}

#[test]
fn test_changed_run_does_not_touch_stored_children() {
    let h = harness(300);
    assert!(h.ingestor.ingest(&report(1_000, 1)));
    let case_key = run_key(1_000).child(Kind::TestCaseRun, 1);
    let before = h.store.get(&case_key).unwrap().unwrap();

    let mut changed = report(1_000, 1);
    changed.host_name = "other-host".to_string();
    changed.test_cases.reverse();
    assert!(matches!(
        h.ingestor.ingest_report(&changed),
        IngestOutcome::Rejected(_)
    ));
    assert_eq!(h.store.get(&case_key).unwrap().unwrap(), before);
}

#[test]
fn test_non_finite_value_writes_nothing() {
    let h = harness(300);
    let mut r = report(1_000, 0);
    r.profiling_points = vec![point("lat", &[1.0, f64::NAN])];

    assert!(matches!(h.ingestor.ingest_report(&r), IngestOutcome::Skipped(_)));
    assert!(h.store.is_empty());
}

#[test]
fn test_devices_over_cap_are_split() {
    let h = harness(2);
    let mut r = report(1_000, 0);
    r.test_cases.clear();
    r.coverage.clear();
    r.devices = ["main", "dev", "release"].into_iter().map(device).collect();

    let outcome = h.ingestor.ingest_report(&r);
    assert!(matches!(outcome, IngestOutcome::Committed(_)));
    let planned = outcome.ledger().unwrap().planned().to_vec();
    assert_eq!(&planned[..3], &[BatchId::Root, BatchId::Devices(0), BatchId::Devices(1)]);
    assert_eq!(h.store.count_kind(Kind::DeviceInfo), 3);
}
