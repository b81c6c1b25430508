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

//! Stats error types

use dashstore_core::{ResilienceError, StoreError};
use thiserror::Error;

/// Result type for stats operations
pub type Result<T> = std::result::Result<T, StatsError>;

#[derive(Debug, Error)]
pub enum StatsError {
    /// Backend failure while loading inputs
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Writing rollups failed after retries
    #[error("Write failed: {0}")]
    Write(#[from] ResilienceError),

    /// Window end is not after its start
    #[error("Invalid window [{start}, {end})")]
    InvalidWindow { start: i64, end: i64 },
}
