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

//! The keyed store contract
//!
//! Backends implement `KeyedStore`. Transactions are scoped to one entity
//! group (the root of a key) unless `TransactionMode::CrossGroup` is
//! requested, and are optimistic: conflicting commits fail with
//! `StoreError::Conflict` and can be re-run from scratch.

use crate::error::StoreResult;
use crate::filter::Filter;
use crate::key::{Key, Kind};
use crate::record::RawRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// A backend query: kind, optional ancestor, and one legal filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub kind: Kind,
    pub ancestor: Option<Key>,
    pub filter: Filter,
    pub keys_only: bool,
    pub sort: Option<SortDirection>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            ancestor: None,
            filter: Filter::new(),
            keys_only: false,
            sort: None,
            limit: None,
        }
    }

    /// Restrict to the ancestor and its descendants.
    pub fn ancestor(mut self, key: Key) -> Self {
        self.ancestor = Some(key);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    pub fn sort(mut self, direction: SortDirection) -> Self {
        self.sort = Some(direction);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check kind, ancestry and filter against a record.
    pub fn matches(&self, record: &RawRecord) -> bool {
        if record.key.kind() != self.kind {
            return false;
        }
        if let Some(ancestor) = &self.ancestor {
            if *ancestor != record.key && !ancestor.is_ancestor_of(&record.key) {
                return false;
            }
        }
        self.filter.matches(record)
    }
}

/// One query result; `record` is `None` for keys-only queries.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    pub key: Key,
    pub record: Option<RawRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    SingleGroup,
    CrossGroup,
}

/// An open transaction. Reads see committed state; writes are buffered
/// until `commit`.
pub trait Transaction {
    fn get(&mut self, key: &Key) -> StoreResult<Option<RawRecord>>;

    fn put(&mut self, record: RawRecord) -> StoreResult<Key>;

    fn put_many(&mut self, records: Vec<RawRecord>) -> StoreResult<Vec<Key>> {
        records.into_iter().map(|record| self.put(record)).collect()
    }

    fn commit(self: Box<Self>) -> StoreResult<()>;

    fn rollback(self: Box<Self>);
}

/// Hierarchical key-value store.
pub trait KeyedStore: Send + Sync {
    fn get(&self, key: &Key) -> StoreResult<Option<RawRecord>>;

    /// Fetch several keys; absent keys are left out of the map.
    fn get_many(&self, keys: &[Key]) -> StoreResult<BTreeMap<Key, RawRecord>> {
        let mut found = BTreeMap::new();
        for key in keys {
            if let Some(record) = self.get(key)? {
                found.insert(key.clone(), record);
            }
        }
        Ok(found)
    }

    fn query(&self, query: &Query) -> StoreResult<Vec<QueryRow>>;

    fn begin(&self, mode: TransactionMode) -> StoreResult<Box<dyn Transaction + '_>>;

    /// Write one record in its own transaction.
    fn put(&self, record: RawRecord) -> StoreResult<Key> {
        let mut txn = self.begin(TransactionMode::SingleGroup)?;
        let key = txn.put(record)?;
        txn.commit()?;
        Ok(key)
    }

    /// Write records with one transaction per entity group.
    fn put_many(&self, records: Vec<RawRecord>) -> StoreResult<Vec<Key>> {
        let mut by_group: BTreeMap<Key, Vec<RawRecord>> = BTreeMap::new();
        let mut keys = Vec::with_capacity(records.len());
        for record in records {
            keys.push(record.key.clone());
            by_group.entry(record.key.group()).or_default().push(record);
        }
        for (_, group) in by_group {
            let mut txn = self.begin(TransactionMode::SingleGroup)?;
            txn.put_many(group)?;
            txn.commit()?;
        }
        Ok(keys)
    }

    fn query_keys(&self, query: &Query) -> StoreResult<Vec<Key>> {
        let query = query.clone().keys_only();
        Ok(self.query(&query)?.into_iter().map(|row| row.key).collect())
    }
}
