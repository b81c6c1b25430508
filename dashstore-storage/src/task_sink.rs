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

//! Follow-on work sinks
//!
//! After certain commits the ingestion path enqueues `(work kind, key)`
//! items for downstream consumers. Enqueueing is fire-and-forget: a sink
//! failure is logged by the caller and never undoes the commit.

use dashstore_core::Key;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// One unit of downstream work, keyed by the record that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub kind: String,
    pub key: Key,
}

impl WorkItem {
    pub fn new(kind: impl Into<String>, key: Key) -> Self {
        Self {
            kind: kind.into(),
            key,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskSinkError {
    #[error("Task queue full ({capacity} items)")]
    Full { capacity: usize },
    #[error("Task queue closed")]
    Closed,
}

pub trait TaskSink: Send + Sync {
    fn enqueue(&self, item: WorkItem) -> Result<(), TaskSinkError>;
}

/// Bounded in-process queue.
pub struct QueueTaskSink {
    queue: Mutex<VecDeque<WorkItem>>,
    capacity: usize,
}

impl Default for QueueTaskSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl QueueTaskSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Remove and return everything queued so far.
    pub fn drain(&self) -> Vec<WorkItem> {
        self.queue.lock().drain(..).collect()
    }
}

impl TaskSink for QueueTaskSink {
    fn enqueue(&self, item: WorkItem) -> Result<(), TaskSinkError> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return Err(TaskSinkError::Full {
                capacity: self.capacity,
            });
        }
        queue.push_back(item);
        Ok(())
    }
}

/// Sink that discards every item.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTaskSink;

impl TaskSink for NoopTaskSink {
    fn enqueue(&self, item: WorkItem) -> Result<(), TaskSinkError> {
        tracing::trace!("Dropping {} work item for {}", item.kind, item.key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashstore_core::Kind;

    #[test]
    fn test_queue_is_bounded_and_drains_in_order() {
        let sink = QueueTaskSink::new(2);
        let key = Key::root(Kind::Test, "T").child(Kind::TestRun, 1);

        sink.enqueue(WorkItem::new("alert", key.clone())).unwrap();
        sink.enqueue(WorkItem::new("performance", key.clone())).unwrap();
        assert_eq!(
            sink.enqueue(WorkItem::new("extra", key.clone())),
            Err(TaskSinkError::Full { capacity: 2 })
        );

        let drained = sink.drain();
        assert_eq!(drained[0].kind, "alert");
        assert_eq!(drained[1].kind, "performance");
        assert!(sink.is_empty());
    }
}
