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

//! Dashstore Storage Layer
//!
//! - `MemoryStore`: ordered in-memory `KeyedStore` with optimistic
//!   entity-group transactions and bincode snapshots
//! - `TransactionRunner`: bounded retry and partitioning of writes
//! - Task sinks for fire-and-forget follow-on work

pub mod memory_store;
pub mod task_sink;
pub mod txn;

pub use memory_store::{MemoryStore, MemoryTransaction, StoreStats};
pub use task_sink::{NoopTaskSink, QueueTaskSink, TaskSink, TaskSinkError, WorkItem};
pub use txn::{mode_for, TransactionRunner};
