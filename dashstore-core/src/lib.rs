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

//! Dashstore Core
//!
//! Keys, values and typed entities of the dashboard data layer, the keyed
//! store contract the other crates are written against, and the shared
//! error, configuration and retry types.

pub mod config;
pub mod entity;
pub mod error;
pub mod filter;
pub mod key;
pub mod record;
pub mod resilience;
pub mod store;
pub mod value;

pub use config::DashConfig;
pub use entity::{Entity, EntityKind, KeyedEntity};
pub use error::{DashError, Result, StoreError, StoreResult};
pub use filter::{Filter, Property, RangeFilter};
pub use key::{Key, KeyId, Kind};
pub use record::RawRecord;
pub use resilience::{Deadline, ResilienceError, RetryPolicy};
pub use store::{KeyedStore, Query, QueryRow, SortDirection, Transaction, TransactionMode};
pub use value::Value;
