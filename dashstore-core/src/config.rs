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

//! Configuration for the data layer
//!
//! Every section defaults sensibly, so a TOML file only needs to name the
//! values it changes:
//!
//! ```toml
//! [store]
//! snapshot_path = "dash.snapshot"
//!
//! [ingest]
//! max_entities_per_transaction = 500
//!
//! [ingest.retry]
//! max_attempts = 3
//! ```

use crate::error::{DashError, Result};
use crate::resilience::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default cap on entities written by one transaction
pub const DEFAULT_MAX_ENTITIES_PER_TRANSACTION: usize = 300;

/// Default cap on entity groups touched by one cross-group transaction
pub const DEFAULT_MAX_GROUPS_PER_TRANSACTION: usize = 25;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashConfig {
    pub store: StoreConfig,
    pub resolver: ResolverConfig,
    pub ingest: IngestConfig,
    pub filters: FilterConfig,
    pub logging: LoggingConfig,
}

impl DashConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DashError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Where the in-memory store persists between runs.
    pub snapshot_path: Option<PathBuf>,
    pub max_groups_per_transaction: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            max_groups_per_transaction: DEFAULT_MAX_GROUPS_PER_TRANSACTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Issue the per-filter sub-queries on scoped threads.
    pub parallel_subqueries: bool,
    /// Budget for one `resolve` call. None = no deadline
    pub call_timeout_ms: Option<u64>,
    pub default_max_results: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            parallel_subqueries: true,
            call_timeout_ms: None,
            default_max_results: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub max_entities_per_transaction: usize,
    pub retry: RetryPolicy,
    /// Work kinds enqueued after a postsubmit run commits.
    pub follow_on_work_kinds: Vec<String>,
    pub test_cases_per_batch: usize,
    /// Budget for one `ingest` call. None = no deadline
    pub call_timeout_ms: Option<u64>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_entities_per_transaction: DEFAULT_MAX_ENTITIES_PER_TRANSACTION,
            retry: RetryPolicy::default(),
            follow_on_work_kinds: vec!["alert".to_string(), "performance".to_string()],
            test_cases_per_batch: 100,
            call_timeout_ms: None,
        }
    }
}

/// Handling of malformed request filter values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Drop malformed predicates with a warning instead of rejecting the request.
    pub lenient: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { lenient: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DashConfig::default();
        assert_eq!(config.ingest.retry.max_attempts, 5);
        assert_eq!(
            config.ingest.max_entities_per_transaction,
            DEFAULT_MAX_ENTITIES_PER_TRANSACTION
        );
        assert!(config.filters.lenient);
        assert!(config.resolver.parallel_subqueries);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DashConfig::from_toml_str(
            r#"
            [ingest]
            max_entities_per_transaction = 10

            [ingest.retry]
            max_attempts = 2

            [filters]
            lenient = false
            "#,
        )
        .unwrap();

        assert_eq!(config.ingest.max_entities_per_transaction, 10);
        assert_eq!(config.ingest.retry.max_attempts, 2);
        assert_eq!(config.ingest.retry.multiplier, 2.0);
        assert_eq!(config.ingest.test_cases_per_batch, 100);
        assert!(!config.filters.lenient);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = DashConfig::from_toml_str("[ingest]\nmax_entities_per_transaction = \"x\"");
        assert!(matches!(err, Err(DashError::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            DashConfig::load("/nonexistent/dash.toml"),
            Err(DashError::Config(_))
        ));
    }
}
