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

//! Error types for the data layer

use crate::key::Key;
use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, DashError>;

/// Errors raised by a `KeyedStore` backend
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// Optimistic concurrency check failed on commit
    #[error("Transaction conflict on entity group {0}")]
    Conflict(Key),

    /// Backend temporarily unavailable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A transaction touched more entity groups than it may
    #[error("Transaction touches {touched} entity groups, limit is {limit}")]
    CrossGroupLimit { touched: usize, limit: usize },

    /// Query rejected by the backend grammar
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Record could not be converted to or from its typed form
    #[error("Codec error: {0}")]
    Codec(String),

    /// Call deadline passed before the operation was issued
    #[error("Deadline exceeded before {operation}")]
    DeadlineExceeded { operation: String },

    /// IO error (snapshot files)
    #[error("IO error: {0}")]
    Io(String),
}

impl StoreError {
    /// Whether re-running the same transaction may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Core error type
#[derive(Debug, Error)]
pub enum DashError {
    /// Backend error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for DashError {
    fn from(e: serde_json::Error) -> Self {
        DashError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for DashError {
    fn from(e: toml::de::Error) -> Self {
        DashError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Kind;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Conflict(Key::root(Kind::Test, "t")).is_transient());
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(!StoreError::InvalidQuery("bad".into()).is_transient());
        assert!(!StoreError::DeadlineExceeded { operation: "query".into() }.is_transient());
    }
}
