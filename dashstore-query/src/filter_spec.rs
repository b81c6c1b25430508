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

//! Request parameter parsing
//!
//! Turns dashboard request parameters into a compound predicate the
//! `Resolver` can answer:
//!
//! | Parameter       | Predicate                               |
//! |-----------------|-----------------------------------------|
//! | `testBuildId`   | `test_build_id = v`                     |
//! | `hostName`      | `host_name = v`                         |
//! | `type`          | `run_type = v`                          |
//! | `passing`       | `pass_count >= n`                       |
//! | `nonpassing`    | `fail_count >= n`                       |
//! | `startTime`     | run key >= `TestRun:start`              |
//! | `endTime`       | run key <= `TestRun:end`                |
//! | `branch`        | device `branch = v`                     |
//! | `target`        | device `build_flavor = v`               |
//! | `deviceBuildId` | device `build_id = v`                   |
//!
//! Each inequality becomes its own backend-legal filter carrying every
//! equality; device parameters form the child filter. With `lenient` set a
//! malformed value drops its predicate with a warning, otherwise the whole
//! request is rejected.

use crate::resolver::{ChildFilter, ResolveRequest};
use dashstore_core::entity::{fields, TestRunType};
use dashstore_core::{Filter, Key, Kind, SortDirection, Value};
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use thiserror::Error;

pub const PARAM_TEST_BUILD_ID: &str = "testBuildId";
pub const PARAM_HOST_NAME: &str = "hostName";
pub const PARAM_TYPE: &str = "type";
pub const PARAM_PASSING: &str = "passing";
pub const PARAM_NONPASSING: &str = "nonpassing";
pub const PARAM_START_TIME: &str = "startTime";
pub const PARAM_END_TIME: &str = "endTime";
pub const PARAM_BRANCH: &str = "branch";
pub const PARAM_TARGET: &str = "target";
pub const PARAM_DEVICE_BUILD_ID: &str = "deviceBuildId";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterSpecError {
    #[error("Parameter {param} expects an integer, got {value:?}")]
    InvalidNumber { param: String, value: String },

    #[error("Unknown run type {0:?}")]
    InvalidRunType(String),

    #[error("Time range is inverted: start {start} > end {end}")]
    InvertedTimeRange { start: i64, end: i64 },
}

/// Inequality on a run count field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountBound {
    pub field: String,
    pub at_least: i64,
}

/// Parsed compound predicate over test runs and their devices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub run_equalities: Vec<(String, Value)>,
    pub count_bounds: Vec<CountBound>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub device_equalities: Vec<(String, Value)>,
    /// Parameters whose values were malformed and dropped.
    pub dropped: Vec<String>,
}

impl FilterSpec {
    pub fn from_params<'a, I>(params: I, lenient: bool) -> Result<Self, FilterSpecError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut spec = FilterSpec::default();

        for (name, raw) in params {
            let value = raw.trim();
            if value.is_empty() {
                continue;
            }

            let parsed = match name {
                PARAM_TEST_BUILD_ID => {
                    spec.run_equalities
                        .push((fields::TEST_BUILD_ID.to_string(), Value::from(value)));
                    Ok(())
                }
                PARAM_HOST_NAME => {
                    spec.run_equalities
                        .push((fields::HOST_NAME.to_string(), Value::from(value)));
                    Ok(())
                }
                PARAM_TYPE => match TestRunType::parse(value) {
                    Some(run_type) => {
                        spec.run_equalities
                            .push((fields::RUN_TYPE.to_string(), Value::from(run_type.as_str())));
                        Ok(())
                    }
                    None => Err(FilterSpecError::InvalidRunType(value.to_string())),
                },
                PARAM_PASSING => parse_int(name, value).map(|n| {
                    spec.count_bounds.push(CountBound {
                        field: fields::PASS_COUNT.to_string(),
                        at_least: n,
                    })
                }),
                PARAM_NONPASSING => parse_int(name, value).map(|n| {
                    spec.count_bounds.push(CountBound {
                        field: fields::FAIL_COUNT.to_string(),
                        at_least: n,
                    })
                }),
                PARAM_START_TIME => parse_int(name, value).map(|t| spec.start_time = Some(t)),
                PARAM_END_TIME => parse_int(name, value).map(|t| spec.end_time = Some(t)),
                PARAM_BRANCH => {
                    spec.device_equalities
                        .push((fields::BRANCH.to_string(), Value::from(value)));
                    Ok(())
                }
                PARAM_TARGET => {
                    spec.device_equalities
                        .push((fields::BUILD_FLAVOR.to_string(), Value::from(value)));
                    Ok(())
                }
                PARAM_DEVICE_BUILD_ID => {
                    spec.device_equalities
                        .push((fields::BUILD_ID.to_string(), Value::from(value)));
                    Ok(())
                }
                other => {
                    tracing::debug!("Ignoring unknown filter parameter {}", other);
                    Ok(())
                }
            };

            if let Err(e) = parsed {
                spec.reject_or_drop(name, e, lenient)?;
            }
        }

        if let (Some(start), Some(end)) = (spec.start_time, spec.end_time) {
            if start > end {
                spec.start_time = None;
                spec.end_time = None;
                spec.reject_or_drop(
                    PARAM_START_TIME,
                    FilterSpecError::InvertedTimeRange { start, end },
                    lenient,
                )?;
            }
        }

        Ok(spec)
    }

    fn reject_or_drop(
        &mut self,
        param: &str,
        error: FilterSpecError,
        lenient: bool,
    ) -> Result<(), FilterSpecError> {
        if !lenient {
            return Err(error);
        }
        tracing::warn!("Dropping filter parameter {}: {}", param, error);
        self.dropped.push(param.to_string());
        Ok(())
    }

    pub fn has_time_range(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }

    /// Backend-legal filters over the runs of `test_key`: one per
    /// inequality, each carrying all equalities. With no inequality, a
    /// single equality-only filter.
    pub fn test_filters(&self, test_key: &Key) -> Vec<Filter> {
        let base = self
            .run_equalities
            .iter()
            .fold(Filter::new(), |filter, (field, value)| {
                filter.eq(field.clone(), value.clone())
            });

        let mut filters: Vec<Filter> = self
            .count_bounds
            .iter()
            .map(|bound| base.clone().at_least(bound.field.clone(), bound.at_least))
            .collect();

        if self.has_time_range() {
            let lower = match self.start_time {
                Some(start) => Bound::Included(test_key.child(Kind::TestRun, start)),
                None => Bound::Unbounded,
            };
            let upper = match self.end_time {
                Some(end) => Bound::Included(test_key.child(Kind::TestRun, end)),
                None => Bound::Unbounded,
            };
            filters.push(base.clone().key_range(lower, upper));
        }

        if filters.is_empty() {
            filters.push(base);
        }
        filters
    }

    /// Equality filter over the runs' device records, if any device
    /// parameter was given.
    pub fn child_filter(&self) -> Option<ChildFilter> {
        if self.device_equalities.is_empty() {
            return None;
        }
        let filter = self
            .device_equalities
            .iter()
            .fold(Filter::new(), |filter, (field, value)| {
                filter.eq(field.clone(), value.clone())
            });
        Some(ChildFilter::new(Kind::DeviceInfo, filter))
    }

    /// Build the resolve request for the runs of one test.
    pub fn to_request(
        &self,
        test_key: &Key,
        direction: SortDirection,
        max_results: usize,
    ) -> ResolveRequest {
        ResolveRequest {
            ancestor: test_key.clone(),
            kind: Kind::TestRun,
            test_filters: self.test_filters(test_key),
            child_filter: self.child_filter(),
            direction,
            max_results,
        }
    }
}

fn parse_int(param: &str, value: &str) -> Result<i64, FilterSpecError> {
    value
        .parse::<i64>()
        .map_err(|_| FilterSpecError::InvalidNumber {
            param: param.to_string(),
            value: value.to_string(),
        })
}
