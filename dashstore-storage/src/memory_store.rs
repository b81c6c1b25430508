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

//! In-memory keyed store
//!
//! Reference `KeyedStore` backend: records live in one ordered map, so a
//! key's subtree is a contiguous range.
//!
//! # Transactions
//!
//! Every entity group (root key) carries a version. A transaction records the
//! version of each group on first touch; commit takes the write lock,
//! re-checks all recorded versions and fails with `StoreError::Conflict` if
//! any moved. Written groups get their version bumped.
//!
//! # Snapshots
//!
//! `save_snapshot` / `load_snapshot` persist the whole map as one bincode
//! file so command line runs can share state.

use dashmap::DashMap;
use dashstore_core::config::DEFAULT_MAX_GROUPS_PER_TRANSACTION;
use dashstore_core::filter::{Property, RangeFilter};
use dashstore_core::{
    Key, KeyedStore, Kind, Query, QueryRow, RawRecord, SortDirection, StoreError, StoreResult,
    Transaction, TransactionMode, Value,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Counters exposed for tests and the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub records: usize,
    pub commits: u64,
    pub conflicts: u64,
    pub queries: u64,
}

/// Injected commit failure, for exercising retry paths.
#[derive(Debug, Clone)]
struct FaultRule {
    /// Only commits writing a record of this kind fail. None = any commit
    kind: Option<Kind>,
    remaining: u32,
    error: StoreError,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    format_version: u32,
    records: Vec<RawRecord>,
    group_versions: Vec<(Key, u64)>,
}

/// In-memory store for tests, tooling and development.
pub struct MemoryStore {
    records: RwLock<BTreeMap<Key, RawRecord>>,
    group_versions: DashMap<Key, u64>,
    max_groups: usize,
    faults: Mutex<Vec<FaultRule>>,
    commits: AtomicU64,
    conflicts: AtomicU64,
    queries: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_max_groups(DEFAULT_MAX_GROUPS_PER_TRANSACTION)
    }

    /// Create a store with a custom cross-group transaction limit.
    pub fn with_max_groups(max_groups: usize) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            group_versions: DashMap::new(),
            max_groups: max_groups.max(1),
            faults: Mutex::new(Vec::new()),
            commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            queries: AtomicU64::new(0),
        }
    }

    /// Make the next `times` commits fail with `error`.
    ///
    /// With `kind` set, only commits that write a record of that kind are
    /// affected.
    pub fn inject_commit_failures(&self, kind: Option<Kind>, times: u32, error: StoreError) {
        self.faults.lock().push(FaultRule {
            kind,
            remaining: times,
            error,
        });
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of stored records of one kind.
    pub fn count_kind(&self, kind: Kind) -> usize {
        self.records
            .read()
            .keys()
            .filter(|key| key.kind() == kind)
            .count()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            records: self.len(),
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.records.write().clear();
        self.group_versions.clear();
    }

    /// Persist all records to `path` (written to a temporary file first).
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        let snapshot = {
            let records = self.records.read();
            Snapshot {
                format_version: SNAPSHOT_FORMAT_VERSION,
                records: records.values().cloned().collect(),
                group_versions: self
                    .group_versions
                    .iter()
                    .map(|entry| (entry.key().clone(), *entry.value()))
                    .collect(),
            }
        };

        let tmp = path.with_extension("tmp");
        let file = std::fs::File::create(&tmp)?;
        bincode::serialize_into(BufWriter::new(file), &snapshot)
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        std::fs::rename(&tmp, path)?;

        tracing::info!(
            "Saved snapshot of {} records to {}",
            snapshot.records.len(),
            path.display()
        );
        Ok(())
    }

    /// Load a store from a snapshot file.
    pub fn load_snapshot(path: impl AsRef<Path>, max_groups: usize) -> StoreResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let snapshot: Snapshot = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(StoreError::Codec(format!(
                "unsupported snapshot format {}",
                snapshot.format_version
            )));
        }

        let store = Self::with_max_groups(max_groups);
        {
            let mut records = store.records.write();
            for record in snapshot.records {
                records.insert(record.key.clone(), record);
            }
        }
        for (group, version) in snapshot.group_versions {
            store.group_versions.insert(group, version);
        }

        tracing::info!("Loaded snapshot of {} records from {}", store.len(), path.display());
        Ok(store)
    }

    /// Open a snapshot if it exists, else start empty.
    pub fn open_or_new(path: impl AsRef<Path>, max_groups: usize) -> StoreResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_snapshot(path, max_groups)
        } else {
            Ok(Self::with_max_groups(max_groups))
        }
    }

    fn group_version(&self, group: &Key) -> u64 {
        self.group_versions
            .get(group)
            .map(|version| *version)
            .unwrap_or(0)
    }

    fn take_fault(&self, writes: &BTreeMap<Key, RawRecord>) -> Option<StoreError> {
        let mut faults = self.faults.lock();
        let rule = faults.iter_mut().find(|rule| {
            rule.remaining > 0
                && rule
                    .kind
                    .map(|kind| writes.keys().any(|key| key.kind() == kind))
                    .unwrap_or(true)
        })?;
        rule.remaining -= 1;
        let error = rule.error.clone();
        faults.retain(|rule| rule.remaining > 0);
        Some(error)
    }
}

/// Key range to scan for a query, before filtering.
fn scan_bounds(query: &Query) -> (Bound<Key>, Bound<Key>) {
    if let Some(RangeFilter {
        property: Property::Key,
        lower,
        upper,
    }) = &query.filter.range
    {
        return (key_bound(lower), key_bound(upper));
    }
    match &query.ancestor {
        Some(ancestor) => (
            Bound::Included(ancestor.clone()),
            Bound::Excluded(ancestor.successor_sibling()),
        ),
        None => (Bound::Unbounded, Bound::Unbounded),
    }
}

fn key_bound(bound: &Bound<Value>) -> Bound<Key> {
    match bound {
        Bound::Included(Value::Key(key)) => Bound::Included(key.clone()),
        Bound::Excluded(Value::Key(key)) => Bound::Excluded(key.clone()),
        _ => Bound::Unbounded,
    }
}

/// `BTreeMap::range` panics on inverted or empty-exclusive ranges.
fn is_empty_range(lower: &Bound<Key>, upper: &Bound<Key>) -> bool {
    match (lower, upper) {
        (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
        (Bound::Included(lo) | Bound::Excluded(lo), Bound::Included(hi) | Bound::Excluded(hi)) => {
            lo >= hi
        }
        _ => false,
    }
}

impl KeyedStore for MemoryStore {
    fn get(&self, key: &Key) -> StoreResult<Option<RawRecord>> {
        Ok(self.records.read().get(key).cloned())
    }

    fn get_many(&self, keys: &[Key]) -> StoreResult<BTreeMap<Key, RawRecord>> {
        let records = self.records.read();
        Ok(keys
            .iter()
            .filter_map(|key| records.get(key).map(|record| (key.clone(), record.clone())))
            .collect())
    }

    fn query(&self, query: &Query) -> StoreResult<Vec<QueryRow>> {
        query.filter.validate()?;
        self.queries.fetch_add(1, Ordering::Relaxed);

        let (lower, upper) = scan_bounds(query);
        if is_empty_range(&lower, &upper) {
            return Ok(Vec::new());
        }

        let records = self.records.read();
        let mut rows: Vec<QueryRow> = records
            .range((lower, upper))
            .filter(|(_, record)| query.matches(record))
            .map(|(key, record)| QueryRow {
                key: key.clone(),
                record: if query.keys_only {
                    None
                } else {
                    Some(record.clone())
                },
            })
            .collect();
        drop(records);

        // Map order is ascending key order
        if query.sort == Some(SortDirection::Descending) {
            rows.reverse();
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        tracing::trace!("query {} under {:?} -> {} rows", query.kind, query.ancestor, rows.len());
        Ok(rows)
    }

    fn begin(&self, mode: TransactionMode) -> StoreResult<Box<dyn Transaction + '_>> {
        Ok(Box::new(MemoryTransaction {
            store: self,
            mode,
            observed: BTreeMap::new(),
            writes: BTreeMap::new(),
        }))
    }
}

/// Optimistic transaction over a `MemoryStore`.
pub struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    mode: TransactionMode,
    /// Group -> version seen on first touch
    observed: BTreeMap<Key, u64>,
    writes: BTreeMap<Key, RawRecord>,
}

impl MemoryTransaction<'_> {
    fn touch(&mut self, key: &Key) -> StoreResult<()> {
        let group = key.group();
        if self.observed.contains_key(&group) {
            return Ok(());
        }

        let limit = match self.mode {
            TransactionMode::SingleGroup => 1,
            TransactionMode::CrossGroup => self.store.max_groups,
        };
        if self.observed.len() >= limit {
            return Err(StoreError::CrossGroupLimit {
                touched: self.observed.len() + 1,
                limit,
            });
        }

        let version = self.store.group_version(&group);
        self.observed.insert(group, version);
        Ok(())
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn get(&mut self, key: &Key) -> StoreResult<Option<RawRecord>> {
        self.touch(key)?;
        if let Some(pending) = self.writes.get(key) {
            return Ok(Some(pending.clone()));
        }
        self.store.get(key)
    }

    fn put(&mut self, record: RawRecord) -> StoreResult<Key> {
        self.touch(&record.key)?;
        let key = record.key.clone();
        self.writes.insert(key.clone(), record);
        Ok(key)
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            store,
            observed,
            writes,
            ..
        } = *self;

        let mut records = store.records.write();

        if let Some(error) = store.take_fault(&writes) {
            if matches!(error, StoreError::Conflict(_)) {
                store.conflicts.fetch_add(1, Ordering::Relaxed);
            }
            return Err(error);
        }

        for (group, seen) in &observed {
            if store.group_version(group) != *seen {
                store.conflicts.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Commit conflict on {}", group);
                return Err(StoreError::Conflict(group.clone()));
            }
        }

        let mut written_groups: Vec<Key> = writes.keys().map(Key::group).collect();
        written_groups.dedup();
        let count = writes.len();
        records.extend(writes);
        for group in written_groups {
            *store.group_versions.entry(group).or_insert(0) += 1;
        }
        drop(records);

        store.commits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Committed {} records", count);
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        tracing::trace!("Rolled back {} pending writes", self.writes.len());
    }
}
