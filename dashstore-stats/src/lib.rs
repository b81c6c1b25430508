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

//! Dashstore Stats
//!
//! Streaming statistics over profiling data: Welford summaries that merge
//! exactly, per-point label tables, time-windowed performance summaries,
//! comparative digests across windows, and stored per-bucket rollups.

pub mod digest;
pub mod error;
pub mod performance;
pub mod profiling;
pub mod rollup;
pub mod stat_summary;

pub use digest::{Comparison, Digest, DigestCell, DigestRow, DigestStatistic, Trend};
pub use error::{Result, StatsError};
pub use performance::{PerformanceLoader, PerformanceSummary, SplitKey};
pub use profiling::ProfilingPointSummary;
pub use rollup::{RollupReport, SummaryQuery, SummaryRollup};
pub use stat_summary::StatSummary;
