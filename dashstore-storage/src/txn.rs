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

//! Retried, partitioned transaction execution.

use dashstore_core::{
    Deadline, Key, KeyedStore, RawRecord, ResilienceError, RetryPolicy, StoreResult, Transaction,
    TransactionMode,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Runs transaction bodies against a store with bounded retry.
///
/// A body is re-executed from scratch in a fresh transaction on every
/// attempt, so it must derive its writes only from its inputs and what it
/// reads inside the transaction.
#[derive(Clone)]
pub struct TransactionRunner {
    store: Arc<dyn KeyedStore>,
    policy: RetryPolicy,
    max_per_transaction: usize,
}

impl TransactionRunner {
    pub fn new(store: Arc<dyn KeyedStore>, policy: RetryPolicy, max_per_transaction: usize) -> Self {
        Self {
            store,
            policy,
            max_per_transaction: max_per_transaction.max(1),
        }
    }

    pub fn max_per_transaction(&self) -> usize {
        self.max_per_transaction
    }

    /// Run `body` inside a transaction, committing on success.
    pub fn run<T, F>(
        &self,
        label: &str,
        mode: TransactionMode,
        deadline: &Deadline,
        mut body: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut(&mut dyn Transaction) -> StoreResult<T>,
    {
        self.policy.run(label, |_attempt| {
            deadline.check(label)?;
            let mut txn = self.store.begin(mode)?;
            match body(&mut *txn) {
                Ok(value) => {
                    txn.commit()?;
                    Ok(value)
                }
                Err(e) => {
                    txn.rollback();
                    Err(e)
                }
            }
        })
    }

    /// Write `records` in one retried transaction, picking the mode from the
    /// number of entity groups they span.
    pub fn put_all(
        &self,
        label: &str,
        records: &[RawRecord],
        deadline: &Deadline,
    ) -> Result<usize, ResilienceError> {
        let mode = mode_for(records.iter().map(|record| &record.key));
        self.run(label, mode, deadline, |txn| {
            txn.put_many(records.to_vec())?;
            Ok(records.len())
        })
    }

    /// Split `items` into chunks of at most `max_per_transaction`.
    pub fn partition<'a, T>(&self, items: &'a [T]) -> std::slice::Chunks<'a, T> {
        items.chunks(self.max_per_transaction)
    }
}

/// Single-group mode when every key shares one root, cross-group otherwise.
pub fn mode_for<'a>(keys: impl IntoIterator<Item = &'a Key>) -> TransactionMode {
    let groups: BTreeSet<Key> = keys.into_iter().map(Key::group).collect();
    if groups.len() > 1 {
        TransactionMode::CrossGroup
    } else {
        TransactionMode::SingleGroup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use dashstore_core::{Kind, StoreError};

    fn runner(store: Arc<MemoryStore>, max: usize) -> TransactionRunner {
        TransactionRunner::new(store, RetryPolicy::immediate(5), max)
    }

    fn branch(name: &str) -> RawRecord {
        RawRecord::new(Key::root(Kind::Branch, name)).with("name", name)
    }

    #[test]
    fn test_conflicts_are_retried() {
        let store = Arc::new(MemoryStore::new());
        store.inject_commit_failures(None, 3, StoreError::Conflict(Key::root(Kind::Branch, "a")));

        let written = runner(store.clone(), 10)
            .put_all("branches", &[branch("a")], &Deadline::none())
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.count_kind(Kind::Branch), 1);
        assert_eq!(store.stats().conflicts, 3);
    }

    #[test]
    fn test_retry_bound_is_respected() {
        let store = Arc::new(MemoryStore::new());
        store.inject_commit_failures(None, 5, StoreError::Unavailable("down".into()));

        let result = runner(store.clone(), 10).put_all("branches", &[branch("a")], &Deadline::none());
        assert!(matches!(
            result,
            Err(ResilienceError::Exhausted { attempts: 5, .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_expired_deadline_is_permanent() {
        let store = Arc::new(MemoryStore::new());
        let expired = Deadline::after(std::time::Duration::ZERO);
        let result = runner(store, 10).put_all("branches", &[branch("a")], &expired);
        assert!(matches!(
            result,
            Err(ResilienceError::Permanent(StoreError::DeadlineExceeded { .. }))
        ));
    }

    #[test]
    fn test_mode_follows_group_count() {
        let one = [Key::root(Kind::Test, "T").child(Kind::TestRun, 1), Key::root(Kind::Test, "T")];
        assert_eq!(mode_for(one.iter()), TransactionMode::SingleGroup);

        let two = [Key::root(Kind::Branch, "a"), Key::root(Kind::Branch, "b")];
        assert_eq!(mode_for(two.iter()), TransactionMode::CrossGroup);
    }

    #[test]
    fn test_partition_sizes() {
        let store = Arc::new(MemoryStore::new());
        let items: Vec<u32> = (0..7).collect();
        let sizes: Vec<usize> = runner(store, 3).partition(&items).map(<[u32]>::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }
}
