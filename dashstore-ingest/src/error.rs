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

//! Ingestion error types

use crate::ledger::BatchId;
use dashstore_core::{Key, ResilienceError, StoreError};
use thiserror::Error;

/// Result type for ingestion
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IngestError {
    /// Report is missing required fields or is internally inconsistent
    #[error("Invalid report: {0}")]
    InvalidReport(String),

    /// Report body could not be parsed
    #[error("Malformed report: {0}")]
    Malformed(String),

    /// A different run is already stored under this key
    #[error("Run {0} already committed with different content")]
    RunAlreadyCommitted(Key),

    /// A sub-batch failed after retries
    #[error("Batch {batch} failed: {source}")]
    Batch {
        batch: BatchId,
        #[source]
        source: ResilienceError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Malformed(err.to_string())
    }
}
