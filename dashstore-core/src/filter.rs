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

//! Store filter grammar
//!
//! A `Filter` is any number of equality predicates ANDed with at most one
//! range predicate. The single-range rule of the backend is enforced by the
//! type: there is one `range` slot, and setting a second range replaces the
//! first.

use crate::error::{StoreError, StoreResult};
use crate::key::Key;
use crate::record::RawRecord;
use crate::value::Value;
use std::cmp::Ordering;
use std::ops::Bound;

/// What a predicate tests: the record key or a named property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Property {
    Key,
    Field(String),
}

impl Property {
    pub fn field(name: impl Into<String>) -> Self {
        Property::Field(name.into())
    }

    fn lookup(&self, record: &RawRecord) -> Option<Value> {
        match self {
            Property::Key => Some(Value::Key(record.key.clone())),
            Property::Field(name) => record.get(name).cloned(),
        }
    }
}

impl std::fmt::Display for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Property::Key => f.write_str("__key__"),
            Property::Field(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Equality {
    pub property: Property,
    pub value: Value,
}

/// One inequality: optional lower and upper bounds on a single property.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    pub property: Property,
    pub lower: Bound<Value>,
    pub upper: Bound<Value>,
}

impl RangeFilter {
    pub fn new(property: Property, lower: Bound<Value>, upper: Bound<Value>) -> Self {
        Self {
            property,
            lower,
            upper,
        }
    }

    /// Range over record keys.
    pub fn keys(lower: Bound<Key>, upper: Bound<Key>) -> Self {
        Self {
            property: Property::Key,
            lower: map_bound(lower),
            upper: map_bound(upper),
        }
    }

    /// Whether a single scalar lies within the bounds.
    pub fn contains(&self, value: &Value) -> bool {
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(lo) => matches!(
                value.compare(lo),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Bound::Excluded(lo) => value.compare(lo) == Some(Ordering::Greater),
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(hi) => {
                matches!(value.compare(hi), Some(Ordering::Less | Ordering::Equal))
            }
            Bound::Excluded(hi) => value.compare(hi) == Some(Ordering::Less),
        };
        above && below
    }

    fn bounds(&self) -> impl Iterator<Item = &Value> {
        [&self.lower, &self.upper]
            .into_iter()
            .filter_map(|bound| match bound {
                Bound::Included(v) | Bound::Excluded(v) => Some(v),
                Bound::Unbounded => None,
            })
    }
}

fn map_bound(bound: Bound<Key>) -> Bound<Value> {
    match bound {
        Bound::Included(key) => Bound::Included(Value::Key(key)),
        Bound::Excluded(key) => Bound::Excluded(Value::Key(key)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// A backend-legal filter: equalities plus at most one range.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    pub equalities: Vec<Equality>,
    pub range: Option<RangeFilter>,
}

impl Filter {
    /// Filter matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality on a property.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equalities.push(Equality {
            property: Property::Field(field.into()),
            value: value.into(),
        });
        self
    }

    /// Set the range predicate, replacing any previous one.
    pub fn with_range(mut self, range: RangeFilter) -> Self {
        self.range = Some(range);
        self
    }

    pub fn at_least(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_range(RangeFilter::new(
            Property::Field(field.into()),
            Bound::Included(value.into()),
            Bound::Unbounded,
        ))
    }

    pub fn at_most(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_range(RangeFilter::new(
            Property::Field(field.into()),
            Bound::Unbounded,
            Bound::Included(value.into()),
        ))
    }

    pub fn key_range(self, lower: Bound<Key>, upper: Bound<Key>) -> Self {
        self.with_range(RangeFilter::keys(lower, upper))
    }

    pub fn has_range(&self) -> bool {
        self.range.is_some()
    }

    /// Check the filter against what a backend accepts.
    pub fn validate(&self) -> StoreResult<()> {
        for eq in &self.equalities {
            if matches!(eq.value, Value::List(_) | Value::Map(_)) {
                return Err(StoreError::InvalidQuery(format!(
                    "equality on {} must compare a scalar",
                    eq.property
                )));
            }
        }
        if let Some(range) = &self.range {
            for bound in range.bounds() {
                let legal = match range.property {
                    Property::Key => matches!(bound, Value::Key(_)),
                    Property::Field(_) => !matches!(bound, Value::List(_) | Value::Map(_)),
                };
                if !legal {
                    return Err(StoreError::InvalidQuery(format!(
                        "range bound {:?} is not valid for {}",
                        bound, range.property
                    )));
                }
            }
        }
        Ok(())
    }

    /// Evaluate against a record. A missing property never matches.
    pub fn matches(&self, record: &RawRecord) -> bool {
        for eq in &self.equalities {
            match eq.property.lookup(record) {
                Some(value) if value.matches_eq(&eq.value) => {}
                _ => return false,
            }
        }
        if let Some(range) = &self.range {
            match range.property.lookup(record) {
                Some(value) => {
                    if !value.scalars().any(|scalar| range.contains(scalar)) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}
