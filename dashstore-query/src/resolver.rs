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

//! Compound predicate resolution
//!
//! The backend accepts any number of equalities but at most one inequality
//! per query, and cannot join across kinds. `Resolver` answers richer
//! predicates by issuing several legal keys-only queries and combining
//! their key sets:
//!
//! ```text
//! test_filters[0] ──┐
//! test_filters[1] ──┼── intersect ── candidates ── child join ── sort/limit
//! test_filters[n] ──┘                    │              ▲
//!                                        └── min/max ───┘ (key range for the child query)
//! ```
//!
//! A single filter without a child filter takes the fast path: one query
//! with sort and limit pushed to the backend.

use crate::filter_spec::FilterSpec;
use dashstore_core::config::ResolverConfig;
use dashstore_core::{
    Deadline, EntityKind, Filter, Key, KeyedEntity, KeyedStore, Kind, Query, SortDirection,
    StoreError, StoreResult,
};
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;
use tracing::{debug, warn};

/// Filter evaluated against a child kind of the candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildFilter {
    pub kind: Kind,
    pub filter: Filter,
}

impl ChildFilter {
    pub fn new(kind: Kind, filter: Filter) -> Self {
        Self { kind, filter }
    }
}

/// Arguments of one `resolve` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveRequest {
    pub ancestor: Key,
    pub kind: Kind,
    /// Conjunction of backend-legal filters. Empty means match all.
    pub test_filters: Vec<Filter>,
    pub child_filter: Option<ChildFilter>,
    pub direction: SortDirection,
    pub max_results: usize,
}

impl ResolveRequest {
    pub fn new(ancestor: Key, kind: Kind) -> Self {
        Self {
            ancestor,
            kind,
            test_filters: Vec::new(),
            child_filter: None,
            direction: SortDirection::Descending,
            max_results: usize::MAX,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.test_filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.test_filters.extend(filters);
        self
    }

    pub fn child(mut self, kind: Kind, filter: Filter) -> Self {
        self.child_filter = Some(ChildFilter::new(kind, filter));
        self
    }

    pub fn direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    fn base_query(&self) -> Query {
        Query::new(self.kind)
            .ancestor(self.ancestor.clone())
            .keys_only()
    }
}

/// Resolves compound predicates against a `KeyedStore`.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn KeyedStore>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(store: Arc<dyn KeyedStore>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn KeyedStore> {
        &self.store
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    fn deadline(&self) -> Deadline {
        Deadline::from_millis(self.config.call_timeout_ms)
    }

    /// Keys of `request.kind` under the ancestor that satisfy every test
    /// filter and, with a child filter, have at least one matching child.
    /// Sorted in the requested direction and truncated to `max_results`.
    pub fn resolve(&self, request: &ResolveRequest) -> StoreResult<Vec<Key>> {
        let deadline = self.deadline();

        let filters: Vec<Filter> = if request.test_filters.is_empty() {
            vec![Filter::new()]
        } else {
            request.test_filters.clone()
        };

        if filters.len() == 1 && request.child_filter.is_none() {
            deadline.check("resolve")?;
            let query = request
                .base_query()
                .filter(filters[0].clone())
                .sort(request.direction)
                .limit(request.max_results);
            let keys = self.store.query_keys(&query)?;
            debug!("resolve fast path under {}: {} keys", request.ancestor, keys.len());
            return Ok(keys);
        }

        let mut candidates = self.intersect_filters(request, &filters, &deadline)?;
        debug!(
            "resolve under {}: {} candidates after {} filters",
            request.ancestor,
            candidates.len(),
            filters.len()
        );

        if let Some(child) = &request.child_filter {
            if !candidates.is_empty() {
                candidates = self.join_children(request, child, candidates, &deadline)?;
            }
        }

        let ordered: Vec<Key> = match request.direction {
            SortDirection::Ascending => candidates.into_iter().take(request.max_results).collect(),
            SortDirection::Descending => candidates
                .into_iter()
                .rev()
                .take(request.max_results)
                .collect(),
        };
        Ok(ordered)
    }

    fn intersect_filters(
        &self,
        request: &ResolveRequest,
        filters: &[Filter],
        deadline: &Deadline,
    ) -> StoreResult<BTreeSet<Key>> {
        let queries: Vec<Query> = filters
            .iter()
            .map(|filter| request.base_query().filter(filter.clone()))
            .collect();

        if self.config.parallel_subqueries && queries.len() > 1 {
            deadline.check("resolve sub-queries")?;
            let results = self.run_parallel(&queries);
            let mut running: Option<BTreeSet<Key>> = None;
            for result in results {
                running = Some(intersect(running, result?));
            }
            return Ok(running.unwrap_or_default());
        }

        let mut running: Option<BTreeSet<Key>> = None;
        for query in &queries {
            if matches!(&running, Some(set) if set.is_empty()) {
                break;
            }
            deadline.check("resolve sub-query")?;
            let keys = self.store.query_keys(query)?;
            running = Some(intersect(running, keys));
        }
        Ok(running.unwrap_or_default())
    }

    /// One scoped thread per sub-query; results keep query order.
    fn run_parallel(&self, queries: &[Query]) -> Vec<StoreResult<Vec<Key>>> {
        let store: &dyn KeyedStore = self.store.as_ref();
        std::thread::scope(|scope| {
            let handles: Vec<_> = queries
                .iter()
                .map(|query| scope.spawn(move || store.query_keys(query)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(StoreError::Unavailable("sub-query thread panicked".to_string()))
                    })
                })
                .collect()
        })
    }

    /// Keep the candidates that have at least one child matching `child`.
    fn join_children(
        &self,
        request: &ResolveRequest,
        child: &ChildFilter,
        candidates: BTreeSet<Key>,
        deadline: &Deadline,
    ) -> StoreResult<BTreeSet<Key>> {
        let (lo, hi) = match (candidates.first(), candidates.last()) {
            (Some(lo), Some(hi)) => (lo.clone(), hi.clone()),
            _ => return Ok(candidates),
        };

        // The backend allows one range per query: bound the scan by the
        // candidates' subtrees unless the child filter already has one.
        let filter = if child.filter.has_range() {
            child.filter.clone()
        } else {
            child
                .filter
                .clone()
                .key_range(Bound::Excluded(lo), Bound::Excluded(hi.successor_sibling()))
        };

        deadline.check("resolve child query")?;
        let query = Query::new(child.kind)
            .ancestor(request.ancestor.clone())
            .filter(filter)
            .keys_only();
        let children = self.store.query_keys(&query)?;

        let depth = request.ancestor.depth() + 1;
        let parents: BTreeSet<Key> = children
            .iter()
            .filter_map(|key| key.prefix(depth))
            .filter(|parent| parent.kind() == request.kind)
            .collect();

        debug!(
            "child join on {}: {} matching children, {} parents",
            child.kind,
            children.len(),
            parents.len()
        );
        Ok(intersect(Some(candidates), parents))
    }

    /// Parse request parameters and resolve the matching runs of one test.
    pub fn resolve_params<'a, I>(
        &self,
        test_key: &Key,
        params: I,
        lenient: bool,
        direction: SortDirection,
        max_results: usize,
    ) -> crate::Result<Vec<Key>>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let spec = FilterSpec::from_params(params, lenient)?;
        let request = spec.to_request(test_key, direction, max_results);
        Ok(self.resolve(&request)?)
    }

    /// Load entities for `keys` in order, skipping keys that no longer exist.
    pub fn fetch(&self, keys: &[Key]) -> StoreResult<Vec<KeyedEntity>> {
        self.deadline().check("fetch")?;
        let found = self.store.get_many(keys)?;
        let mut entities = Vec::with_capacity(found.len());
        for key in keys {
            match found.get(key) {
                Some(record) => match KeyedEntity::from_record(record) {
                    Ok(entity) => entities.push(entity),
                    Err(e) => warn!("Skipping undecodable record {}: {}", key, e),
                },
                None => debug!("Skipping missing record {}", key),
            }
        }
        Ok(entities)
    }

    /// Typed variant of `fetch` for keys of one kind.
    pub fn fetch_as<T: EntityKind>(&self, keys: &[Key]) -> StoreResult<Vec<(Key, T)>> {
        self.deadline().check("fetch")?;
        let found = self.store.get_many(keys)?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let record = found.get(key)?;
                match T::from_record(record) {
                    Ok(entity) => Some((key.clone(), entity)),
                    Err(e) => {
                        warn!("Skipping undecodable record {}: {}", key, e);
                        None
                    }
                }
            })
            .collect())
    }

    /// All children of `parent` stored as `T`, in key order.
    pub fn children_of<T: EntityKind>(&self, parent: &Key) -> StoreResult<Vec<(Key, T)>> {
        self.deadline().check("children")?;
        let query = Query::new(T::KIND).ancestor(parent.clone());
        let rows = self.store.query(&query)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let record = row.record?;
                match T::from_record(&record) {
                    Ok(entity) => Some((row.key, entity)),
                    Err(e) => {
                        warn!("Skipping undecodable record {}: {}", row.key, e);
                        None
                    }
                }
            })
            .collect())
    }
}

fn intersect(running: Option<BTreeSet<Key>>, keys: impl IntoIterator<Item = Key>) -> BTreeSet<Key> {
    let next: BTreeSet<Key> = keys.into_iter().collect();
    match running {
        None => next,
        Some(mut set) => {
            set.retain(|key| next.contains(key));
            set
        }
    }
}
