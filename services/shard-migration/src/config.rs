// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2020 Joyent, Inc.
// Copyright 2026 Edgecast Cloud LLC.

//! Configuration for the shard-migration worker

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::jobs::copy::MIN_COPY;

/// Batch size for copy jobs submitted without one.
pub const DEFAULT_COPY_COUNT: usize = 1000;

/// Worker configuration loaded from environment variables or JSON file
///
/// Configuration can be loaded from:
/// 1. Environment variables (primary method, see `from_env()`)
/// 2. JSON config file named by `CONFIG_FILE` (see [`ReloadableConfig`])
///
/// Only the copy tuning fields are read from the file; the rest require a
/// restart.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Jobs executed concurrently
    /// Note: This field is NOT reloadable
    pub worker_threads: usize,

    /// Smallest batch a shard timeout may shrink to
    pub min_copy: usize,

    /// Batch size used when a payload does not name one
    pub copy_count: usize,

    /// Whether to print Prometheus metrics on exit
    pub metrics_enabled: bool,

    /// Topology of the in-memory name server
    /// Note: This field is NOT reloadable
    pub topology_file: Option<PathBuf>,

    /// Copy job payloads, one JSON document per line
    /// Note: This field is NOT reloadable
    pub jobs_file: Option<PathBuf>,
}

/// Fields a config file may override
///
/// A field left out of the file is `None` and keeps whatever the
/// environment set.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ReloadableConfig {
    pub min_copy: Option<usize>,
    pub copy_count: Option<usize>,
    pub metrics_enabled: Option<bool>,
}

impl ReloadableConfig {
    /// Load overrides from a JSON file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            min_copy: MIN_COPY,
            copy_count: DEFAULT_COPY_COUNT,
            metrics_enabled: false,
            topology_file: None,
            jobs_file: None,
        }
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", name, v)),
        Err(_) => Ok(default),
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables
    ///
    /// When `CONFIG_FILE` is set, its reloadable fields override the
    /// environment.
    pub async fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let worker_threads = env_or("WORKER_THREADS", defaults.worker_threads)?;
        let min_copy = env_or("MIN_COPY", defaults.min_copy)?;
        let copy_count = env_or("COPY_COUNT", defaults.copy_count)?;

        // Accepts "true", "1", "yes" (case-insensitive) as true
        let metrics_enabled = std::env::var("METRICS_ENABLED")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        let topology_file = std::env::var_os("TOPOLOGY_FILE").map(PathBuf::from);
        let jobs_file = std::env::var_os("JOBS_FILE").map(PathBuf::from);

        let mut config = Self {
            worker_threads,
            min_copy,
            copy_count,
            metrics_enabled,
            topology_file,
            jobs_file,
        };

        if let Some(path) = std::env::var_os("CONFIG_FILE") {
            let overrides = ReloadableConfig::from_file(Path::new(&path)).await?;
            config.merge_reloadable(&overrides);
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply the reloadable fields present in `overrides`
    pub fn merge_reloadable(&mut self, overrides: &ReloadableConfig) {
        if let Some(min_copy) = overrides.min_copy {
            self.min_copy = min_copy;
        }
        if let Some(copy_count) = overrides.copy_count {
            self.copy_count = copy_count;
        }
        if let Some(metrics_enabled) = overrides.metrics_enabled {
            self.metrics_enabled = metrics_enabled;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            bail!("WORKER_THREADS must be at least 1");
        }
        if self.min_copy == 0 {
            bail!("MIN_COPY must be at least 1");
        }
        if self.copy_count == 0 {
            bail!("COPY_COUNT must be at least 1");
        }
        Ok(())
    }
}
