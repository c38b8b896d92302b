//! CLI configuration.
//!
//! Loaded from `MUSIFLOW_*` environment variables with defaults that keep
//! state in a redb file in the working directory.

use musiflow_core::admin::DEFAULT_PAGE_SIZE;
use musiflow_core::workflow::Delays;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Where the store lives.
    pub storage_backend: StorageBackendType,
    /// Log filter (e.g. `warn`, `musiflow_core=debug`).
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
    /// Simulated processing times.
    pub delays: Delays,
    /// Rows per admin page.
    pub page_size: usize,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory, gone when the command exits.
    Memory,
    /// redb file.
    Redb { path: String },
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// - `MUSIFLOW_STORAGE` — `memory` or `redb` (default: `redb`)
    /// - `MUSIFLOW_STORAGE_PATH` — redb file location (default: `./musiflow.redb`)
    /// - `MUSIFLOW_LOG_LEVEL` — log filter when `RUST_LOG` is unset (default: `warn`)
    /// - `MUSIFLOW_LOG_FORMAT` — `json` for JSON log lines (default: text)
    /// - `MUSIFLOW_FAST` — `1`/`true` to skip all simulated delays
    /// - `MUSIFLOW_PAGE_SIZE` — admin rows per page (default: `10`)
    #[must_use]
    pub fn from_env() -> Self {
        let path = std::env::var("MUSIFLOW_STORAGE_PATH").ok();

        let in_memory = std::env::var("MUSIFLOW_STORAGE")
            .is_ok_and(|v| v.eq_ignore_ascii_case("memory"));
        let storage_backend = if in_memory {
            StorageBackendType::Memory
        } else {
            StorageBackendType::Redb {
                path: path.unwrap_or_else(|| "./musiflow.redb".to_owned()),
            }
        };

        let log_level = std::env::var("MUSIFLOW_LOG_LEVEL").unwrap_or_else(|_| "warn".to_owned());

        let log_json = std::env::var("MUSIFLOW_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let fast = std::env::var("MUSIFLOW_FAST")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let delays = if fast { Delays::none() } else { Delays::default() };

        let page_size = std::env::var("MUSIFLOW_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);

        Self {
            storage_backend,
            log_level,
            log_json,
            delays,
            page_size,
        }
    }
}
