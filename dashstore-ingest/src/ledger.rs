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

//! Sub-batch bookkeeping for resumable ingestion
//!
//! One report is committed as several transactions. Each has a
//! deterministic `BatchId` derived from the report alone, so a ledger from
//! a partially failed ingestion tells `Ingestor::resume` exactly which
//! transactions still have to run. Re-running a committed batch is safe
//! as well, since every write lands on a deterministic key.

use dashstore_core::Key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identity of one sub-batch within a report, in commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "stage", content = "chunk", rename_all = "snake_case")]
pub enum BatchId {
    Root,
    Devices(usize),
    TestCases(usize),
    Profiling(usize),
    Coverage(usize),
    References(usize),
}

impl BatchId {
    /// Batches that write children of the run.
    pub fn needs_run(&self) -> bool {
        !matches!(self, BatchId::Root | BatchId::References(_))
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchId::Root => f.write_str("root"),
            BatchId::Devices(i) => write!(f, "devices#{}", i),
            BatchId::TestCases(i) => write!(f, "test_cases#{}", i),
            BatchId::Profiling(i) => write!(f, "profiling#{}", i),
            BatchId::Coverage(i) => write!(f, "coverage#{}", i),
            BatchId::References(i) => write!(f, "references#{}", i),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBatch {
    pub batch: BatchId,
    pub error: String,
}

/// Which sub-batches of one run's report have been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLedger {
    run_key: Key,
    planned: Vec<BatchId>,
    committed: BTreeSet<BatchId>,
    failed: Vec<FailedBatch>,
    records_written: usize,
}

impl CommitLedger {
    pub fn new(run_key: Key, planned: Vec<BatchId>) -> Self {
        Self {
            run_key,
            planned,
            committed: BTreeSet::new(),
            failed: Vec::new(),
            records_written: 0,
        }
    }

    pub fn run_key(&self) -> &Key {
        &self.run_key
    }

    pub fn planned(&self) -> &[BatchId] {
        &self.planned
    }

    pub fn is_committed(&self, batch: BatchId) -> bool {
        self.committed.contains(&batch)
    }

    pub fn committed(&self) -> impl Iterator<Item = BatchId> + '_ {
        self.committed.iter().copied()
    }

    pub fn failed(&self) -> &[FailedBatch] {
        &self.failed
    }

    /// Planned batches not yet committed.
    pub fn pending(&self) -> impl Iterator<Item = BatchId> + '_ {
        self.planned
            .iter()
            .copied()
            .filter(|batch| !self.committed.contains(batch))
    }

    pub fn is_complete(&self) -> bool {
        self.pending().next().is_none()
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn record_success(&mut self, batch: BatchId, records: usize) {
        self.failed.retain(|f| f.batch != batch);
        self.committed.insert(batch);
        self.records_written += records;
    }

    pub fn record_failure(&mut self, batch: BatchId, error: impl fmt::Display) {
        self.failed.retain(|f| f.batch != batch);
        self.failed.push(FailedBatch {
            batch,
            error: error.to_string(),
        });
    }

    /// Fresh attempt over the same plan, keeping what already committed.
    pub fn retry(&self) -> Self {
        Self {
            run_key: self.run_key.clone(),
            planned: self.planned.clone(),
            committed: self.committed.clone(),
            failed: Vec::new(),
            records_written: self.records_written,
        }
    }
}
