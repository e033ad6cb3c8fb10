//! Explicit, immutable-per-run configuration.
//!
//! No module-level singleton: callers build a [`ScanConfig`] once and thread
//! it through the [`crate::run_controller::RunController`] explicitly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::io_json::{read_json_file, write_json_file};

pub const DEFAULT_PROBE_TIMEOUT_S: u64 = 30;
pub const DEFAULT_QUICK_TIMEOUT_S: u64 = 60;
pub const DEFAULT_DEEP_TIMEOUT_S: u64 = 900;

pub const DEFAULT_CORRUPT_THRESHOLD: f64 = 0.5;
pub const DEFAULT_LOW_THRESHOLD: f64 = 0.15;

pub const DEFAULT_QUEUE_CAPACITY_MULTIPLIER: usize = 2;
pub const DEFAULT_MAX_WORKERS_CAP: usize = 16;

pub const DEFAULT_PROBE_CACHE_TTL_HOURS: f64 = 24.0;
pub const DEFAULT_INCREMENTAL_WINDOW_DAYS: u32 = 7;
pub const DEFAULT_STALE_RUN_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerConfig {
    /// Override auto-detection of the external tool binary.
    pub command: Option<PathBuf>,
    pub quick_timeout_s: u64,
    pub deep_timeout_s: u64,
    pub probe_timeout_s: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            command: None,
            quick_timeout_s: DEFAULT_QUICK_TIMEOUT_S,
            deep_timeout_s: DEFAULT_DEEP_TIMEOUT_S,
            probe_timeout_s: DEFAULT_PROBE_TIMEOUT_S,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierConfig {
    pub corrupt_threshold: f64,
    pub low_threshold: f64,
    /// Hybrid deep-promotion threshold; defaults to `low_threshold`.
    pub deep_trigger: Option<f64>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            corrupt_threshold: DEFAULT_CORRUPT_THRESHOLD,
            low_threshold: DEFAULT_LOW_THRESHOLD,
            deep_trigger: None,
        }
    }
}

impl ClassifierConfig {
    pub fn deep_trigger(&self) -> f64 {
        self.deep_trigger.unwrap_or(self.low_threshold)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PoolParallelism {
    /// Worker count fixed by the caller.
    Fixed(usize),
    /// `min(num_cpus, DEFAULT_MAX_WORKERS_CAP)`.
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub max_workers: PoolParallelism,
    pub queue_capacity: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: PoolParallelism::Auto,
            queue_capacity: None,
        }
    }
}

impl PoolConfig {
    pub fn resolved_max_workers(&self) -> usize {
        match self.max_workers {
            PoolParallelism::Fixed(n) => n.max(1),
            PoolParallelism::Auto => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(DEFAULT_MAX_WORKERS_CAP),
        }
    }

    pub fn resolved_queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| self.resolved_max_workers() * DEFAULT_QUEUE_CAPACITY_MULTIPLIER)
            .max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanPolicyConfig {
    pub mode: crate::domain::ScanMode,
    pub extensions: Vec<String>,
    pub require_probe_before_scan: bool,
    pub incremental: bool,
    pub incremental_window_days: u32,
}

impl Default for ScanPolicyConfig {
    fn default() -> Self {
        Self {
            mode: crate::domain::ScanMode::Hybrid,
            extensions: Vec::new(),
            require_probe_before_scan: true,
            incremental: false,
            incremental_window_days: DEFAULT_INCREMENTAL_WINDOW_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeCacheConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub ttl_hours: f64,
}

impl Default for ProbeCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("probe_cache.json"),
            ttl_hours: DEFAULT_PROBE_CACHE_TTL_HOURS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    pub path: PathBuf,
    /// 0 disables auto-cleanup.
    pub auto_cleanup_days: u32,
    pub stale_run_seconds: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("history.sqlite3"),
            auto_cleanup_days: 0,
            stale_run_seconds: DEFAULT_STALE_RUN_SECONDS,
        }
    }
}

/// Top-level configuration object, built once by the caller and passed into
/// the run controller. Treated as immutable for the duration of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    pub analyzer: AnalyzerConfig,
    pub classifier: ClassifierConfig,
    pub pool: PoolConfig,
    pub scan: ScanPolicyConfig,
    pub probe_cache: ProbeCacheConfig,
    pub history: HistoryConfig,
}

impl ScanConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let mut config: ScanConfig = read_json_file(path)?;
        config.normalize()?;
        Ok(config)
    }

    pub fn save(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        write_json_file(path, self)
    }

    /// Clamp out-of-range values and enforce cross-field invariants.
    pub fn normalize(&mut self) -> Result<(), ConfigError> {
        self.classifier.corrupt_threshold = self.classifier.corrupt_threshold.clamp(0.0, 1.0);
        self.classifier.low_threshold = self.classifier.low_threshold.clamp(0.0, 1.0);
        if let Some(trigger) = self.classifier.deep_trigger {
            self.classifier.deep_trigger = Some(trigger.clamp(0.0, 1.0));
        }
        if self.classifier.low_threshold > self.classifier.corrupt_threshold {
            return Err(ConfigError::Invalid(format!(
                "classifier.low_threshold ({}) must be <= classifier.corrupt_threshold ({})",
                self.classifier.low_threshold, self.classifier.corrupt_threshold
            )));
        }
        if let PoolParallelism::Fixed(n) = self.pool.max_workers {
            if n == 0 {
                return Err(ConfigError::Invalid(
                    "pool.max_workers must be >= 1".to_string(),
                ));
            }
        }
        if self.analyzer.quick_timeout_s == 0
            || self.analyzer.deep_timeout_s == 0
            || self.analyzer.probe_timeout_s == 0
        {
            return Err(ConfigError::Invalid(
                "analyzer timeouts must be >= 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut config = ScanConfig::default();
        config.normalize().expect("defaults must normalize cleanly");
    }

    #[test]
    fn rejects_low_threshold_above_corrupt_threshold() {
        let mut config = ScanConfig::default();
        config.classifier.low_threshold = 0.9;
        config.classifier.corrupt_threshold = 0.5;
        assert!(config.normalize().is_err());
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = ScanConfig::default();
        config.pool.max_workers = PoolParallelism::Fixed(0);
        assert!(config.normalize().is_err());
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let config = ScanConfig::load(&path).expect("missing file yields defaults");
        assert_eq!(config.scan.mode, crate::domain::ScanMode::Hybrid);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = ScanConfig::default();
        config.scan.mode = crate::domain::ScanMode::Deep;
        config.save(&path).unwrap();
        let loaded = ScanConfig::load(&path).unwrap();
        assert_eq!(loaded.scan.mode, crate::domain::ScanMode::Deep);
    }
}
