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

//! Transactional report ingestion
//!
//! A report is committed as a fixed sequence of sub-batches:
//!
//! 1. `Root`: the `Test` record (only when absent or its derived flag
//!    changes) and the `TestRun` record, in one transaction on the test's
//!    entity group. A different run already stored under the same key
//!    rejects the report here, before any child is written.
//! 2. `Devices(i)`, `TestCases(i)`, `Profiling(i)` and `Coverage(i)`: run
//!    children, chunked by the per-transaction cap. None of them is
//!    attempted unless the run is stored.
//! 3. `References(i)`: `Branch`/`BuildTarget` records, created only if
//!    absent, in cross-group transactions.
//!
//! Every batch is retried on transient failure and is independent of its
//! siblings once the run exists. Failures are recorded in a `CommitLedger`
//! and can be re-run with `Ingestor::resume`.

use crate::error::IngestError;
use crate::ledger::{BatchId, CommitLedger};
use crate::report::TestReport;
use dashstore_core::config::{IngestConfig, DEFAULT_MAX_GROUPS_PER_TRANSACTION};
use dashstore_core::entity::{
    BranchEntity, BuildTargetEntity, EntityKind, ProfilingPointRunEntity, TestCaseRunEntity,
    TestEntity, TestRunEntity, TestRunType,
};
use dashstore_core::{Deadline, Key, KeyedStore, Kind, RawRecord, StoreResult, Transaction};
use dashstore_storage::{mode_for, TaskSink, TransactionRunner, WorkItem};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of one ingestion attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Every sub-batch committed.
    Committed(CommitLedger),
    /// Input was unusable; nothing was written.
    Skipped(String),
    /// A different run is already stored under the report's key; nothing
    /// was written.
    Rejected(IngestError),
    /// Some sub-batches failed; the ledger lists them for `resume`.
    PartiallyFailed(CommitLedger),
}

impl IngestOutcome {
    /// Skipped input counts as success: there is nothing to retry.
    pub fn is_success(&self) -> bool {
        matches!(self, IngestOutcome::Committed(_) | IngestOutcome::Skipped(_))
    }

    pub fn ledger(&self) -> Option<&CommitLedger> {
        match self {
            IngestOutcome::Committed(ledger) | IngestOutcome::PartiallyFailed(ledger) => Some(ledger),
            _ => None,
        }
    }
}

enum BatchBody {
    Records(Vec<RawRecord>),
    Root {
        test: TestEntity,
        run: TestRunEntity,
    },
    References(Vec<RawRecord>),
}

struct Batch {
    id: BatchId,
    body: BatchBody,
}

/// Everything one report writes, keyed and split into sub-batches.
struct Plan {
    test_key: Key,
    run_key: Key,
    run_type: TestRunType,
    batches: Vec<Batch>,
}

impl Plan {
    fn ids(&self) -> Vec<BatchId> {
        self.batches.iter().map(|b| b.id).collect()
    }
}

enum RootWrite {
    Written { run_created: bool, records: usize },
    RunConflict,
}

pub struct Ingestor {
    runner: TransactionRunner,
    sink: Arc<dyn TaskSink>,
    config: IngestConfig,
    max_groups: usize,
}

impl Ingestor {
    pub fn new(store: Arc<dyn KeyedStore>, sink: Arc<dyn TaskSink>, config: IngestConfig) -> Self {
        let runner = TransactionRunner::new(
            store,
            config.retry.clone(),
            config.max_entities_per_transaction,
        );
        Self {
            runner,
            sink,
            config,
            max_groups: DEFAULT_MAX_GROUPS_PER_TRANSACTION,
        }
    }

    /// Bound for cross-group reference transactions.
    pub fn with_max_groups(mut self, max_groups: usize) -> Self {
        self.max_groups = max_groups.max(1);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest a report, returning whether it is fully stored.
    pub fn ingest(&self, report: &TestReport) -> bool {
        self.ingest_report(report).is_success()
    }

    /// Ingest a JSON-encoded report. Unparseable bodies are skipped.
    pub fn ingest_json(&self, body: &str) -> IngestOutcome {
        match TestReport::from_json(body) {
            Ok(report) => self.ingest_report(&report),
            Err(e) => {
                warn!("Skipping report: {}", e);
                IngestOutcome::Skipped(e.to_string())
            }
        }
    }

    pub fn ingest_report(&self, report: &TestReport) -> IngestOutcome {
        if let Err(e) = report.validate() {
            warn!("Skipping report: {}", e);
            return IngestOutcome::Skipped(e.to_string());
        }
        let report = report.clone().deduplicated();
        let plan = match self.plan(&report) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Skipping report of {}: {}", report.test_name, e);
                return IngestOutcome::Skipped(e.to_string());
            }
        };

        let ledger = CommitLedger::new(plan.run_key.clone(), plan.ids());
        self.execute(&plan, ledger)
    }

    /// Re-run the sub-batches of `report` that `ledger` does not list as
    /// committed.
    pub fn resume(&self, report: &TestReport, ledger: &CommitLedger) -> IngestOutcome {
        if let Err(e) = report.validate() {
            warn!("Skipping resume: {}", e);
            return IngestOutcome::Skipped(e.to_string());
        }
        let report = report.clone().deduplicated();
        let plan = match self.plan(&report) {
            Ok(plan) => plan,
            Err(e) => return IngestOutcome::Skipped(e.to_string()),
        };
        if &plan.run_key != ledger.run_key() || plan.ids() != ledger.planned() {
            warn!(
                "Ledger for {} does not match report for {}",
                ledger.run_key(),
                plan.run_key
            );
            return IngestOutcome::Skipped("ledger does not match report".to_string());
        }
        info!(
            "Resuming {} with {} pending batches",
            plan.run_key,
            ledger.pending().count()
        );
        self.execute(&plan, ledger.retry())
    }

    fn plan(&self, report: &TestReport) -> StoreResult<Plan> {
        let test_key = TestEntity::key_for(&report.test_name);
        let run_key = TestRunEntity::key_for(&test_key, report.start_timestamp);
        let mut batches = Vec::new();

        let mut case_records = Vec::new();
        let mut test_case_ids = Vec::new();
        for (i, cases) in report
            .test_cases
            .chunks(self.config.test_cases_per_batch.max(1))
            .enumerate()
        {
            let id = i as i64 + 1;
            let entity = TestCaseRunEntity {
                cases: cases.to_vec(),
            };
            case_records.push(entity.to_record(run_key.child(Kind::TestCaseRun, id))?);
            test_case_ids.push(id);
        }

        batches.push(Batch {
            id: BatchId::Root,
            body: BatchBody::Root {
                test: TestEntity {
                    name: report.test_name.clone(),
                    has_profiling_data: !report.profiling_points.is_empty(),
                },
                run: report.run_entity(test_case_ids),
            },
        });

        let devices = report
            .devices
            .iter()
            .enumerate()
            .map(|(i, d)| d.to_record(run_key.child(Kind::DeviceInfo, i as i64 + 1)))
            .collect::<StoreResult<Vec<_>>>()?;
        self.push_chunks(&mut batches, &devices, BatchId::Devices);
        self.push_chunks(&mut batches, &case_records, BatchId::TestCases);

        let points = report
            .profiling_points
            .iter()
            .map(|p| p.to_record(ProfilingPointRunEntity::key_for(&run_key, &p.name)))
            .collect::<StoreResult<Vec<_>>>()?;
        self.push_chunks(&mut batches, &points, BatchId::Profiling);

        let coverage = report
            .coverage
            .iter()
            .enumerate()
            .map(|(i, c)| c.to_record(run_key.child(Kind::Coverage, i as i64 + 1)))
            .collect::<StoreResult<Vec<_>>>()?;
        self.push_chunks(&mut batches, &coverage, BatchId::Coverage);

        let mut references = BTreeSet::new();
        for device in &report.devices {
            if !device.branch.is_empty() {
                references.insert(BranchEntity::key_for(&device.branch));
            }
            if !device.build_flavor.is_empty() {
                references.insert(BuildTargetEntity::key_for(&device.build_flavor));
            }
        }
        let references = references
            .into_iter()
            .map(reference_record)
            .collect::<StoreResult<Vec<_>>>()?;
        let per_batch = self.runner.max_per_transaction().min(self.max_groups);
        for (i, chunk) in references.chunks(per_batch).enumerate() {
            batches.push(Batch {
                id: BatchId::References(i),
                body: BatchBody::References(chunk.to_vec()),
            });
        }

        Ok(Plan {
            test_key,
            run_key,
            run_type: report.run_type,
            batches,
        })
    }

    /// One `Records` batch per cap-sized chunk of `records`.
    fn push_chunks(
        &self,
        batches: &mut Vec<Batch>,
        records: &[RawRecord],
        id: impl Fn(usize) -> BatchId,
    ) {
        for (i, chunk) in self.runner.partition(records).enumerate() {
            batches.push(Batch {
                id: id(i),
                body: BatchBody::Records(chunk.to_vec()),
            });
        }
    }

    fn execute(&self, plan: &Plan, mut ledger: CommitLedger) -> IngestOutcome {
        let deadline = Deadline::from_millis(self.config.call_timeout_ms);
        let mut run_stored = ledger.is_committed(BatchId::Root);

        for batch in &plan.batches {
            if ledger.is_committed(batch.id) {
                continue;
            }
            if batch.id.needs_run() && !run_stored {
                ledger.record_failure(batch.id, "run not committed");
                continue;
            }

            let label = format!("{} {}", plan.run_key, batch.id);
            let result = match &batch.body {
                BatchBody::Records(records) => self
                    .runner
                    .put_all(&label, records, &deadline)
                    .map_err(|source| IngestError::Batch {
                        batch: batch.id,
                        source,
                    }),
                BatchBody::Root { test, run } => {
                    self.commit_root(plan, &label, test, run, &deadline)
                }
                BatchBody::References(records) => {
                    self.commit_references(batch.id, &label, records, &deadline)
                }
            };

            match result {
                Ok(written) => {
                    debug!("Committed {} ({} records)", label, written);
                    if batch.id == BatchId::Root {
                        run_stored = true;
                    }
                    ledger.record_success(batch.id, written);
                }
                Err(e @ IngestError::RunAlreadyCommitted(_)) => {
                    // Root is planned first, so nothing has been written.
                    warn!("Run {} already committed with different content", plan.run_key);
                    return IngestOutcome::Rejected(e);
                }
                Err(e) => {
                    error!("Ingestion batch {} failed: {}", label, e);
                    ledger.record_failure(batch.id, &e);
                }
            }
        }

        if ledger.is_complete() {
            info!(
                "Ingested {} ({} records in {} batches)",
                plan.run_key,
                ledger.records_written(),
                ledger.planned().len()
            );
            IngestOutcome::Committed(ledger)
        } else {
            IngestOutcome::PartiallyFailed(ledger)
        }
    }

    fn commit_root(
        &self,
        plan: &Plan,
        label: &str,
        test: &TestEntity,
        run: &TestRunEntity,
        deadline: &Deadline,
    ) -> Result<usize, IngestError> {
        let test_key = &plan.test_key;
        let run_key = &plan.run_key;
        let mode = mode_for(std::iter::once(test_key));
        let outcome = self
            .runner
            .run(label, mode, deadline, |txn: &mut dyn Transaction| {
                let mut records = 0;

                // A differing run aborts before anything is buffered.
                let run_created = match txn.get(run_key)? {
                    Some(existing) => {
                        if &TestRunEntity::from_record(&existing)? != run {
                            return Ok(RootWrite::RunConflict);
                        }
                        false
                    }
                    None => true,
                };

                let stored = txn
                    .get(test_key)?
                    .map(|r| TestEntity::from_record(&r))
                    .transpose()?;
                let merged = TestEntity {
                    name: test.name.clone(),
                    has_profiling_data: test.has_profiling_data
                        || stored.as_ref().map(|t| t.has_profiling_data).unwrap_or(false),
                };
                if stored.as_ref() != Some(&merged) {
                    txn.put(merged.to_record(test_key.clone())?)?;
                    records += 1;
                }

                if run_created {
                    txn.put(run.to_record(run_key.clone())?)?;
                    records += 1;
                }

                Ok(RootWrite::Written {
                    run_created,
                    records,
                })
            })
            .map_err(|source| IngestError::Batch {
                batch: BatchId::Root,
                source,
            })?;

        match outcome {
            RootWrite::RunConflict => Err(IngestError::RunAlreadyCommitted(run_key.clone())),
            RootWrite::Written {
                run_created,
                records,
            } => {
                if run_created && plan.run_type == TestRunType::Postsubmit {
                    self.enqueue_follow_on(run_key);
                }
                Ok(records)
            }
        }
    }

    fn commit_references(
        &self,
        batch: BatchId,
        label: &str,
        records: &[RawRecord],
        deadline: &Deadline,
    ) -> Result<usize, IngestError> {
        let mode = mode_for(records.iter().map(|r| &r.key));
        self.runner
            .run(label, mode, deadline, |txn: &mut dyn Transaction| {
                let mut created = 0;
                for record in records {
                    if txn.get(&record.key)?.is_none() {
                        txn.put(record.clone())?;
                        created += 1;
                    }
                }
                Ok(created)
            })
            .map_err(|source| IngestError::Batch { batch, source })
    }

    fn enqueue_follow_on(&self, run_key: &Key) {
        for kind in &self.config.follow_on_work_kinds {
            if let Err(e) = self.sink.enqueue(WorkItem::new(kind.as_str(), run_key.clone())) {
                warn!("Failed to enqueue {} work for {}: {}", kind, run_key, e);
            }
        }
    }
}

fn reference_record(key: Key) -> StoreResult<RawRecord> {
    let name = match key.id() {
        dashstore_core::KeyId::Name(name) => name.clone(),
        dashstore_core::KeyId::Int(id) => id.to_string(),
    };
    match key.kind() {
        Kind::Branch => BranchEntity { name }.to_record(key),
        _ => BuildTargetEntity { name }.to_record(key),
    }
}
