use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the analyzer driver (C1) launching the external media tool.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("analyzer binary could not be located or executed: {0}")]
    ToolMissing(String),

    #[error("failed to launch analyzer for {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("analyzer timed out after {timeout_secs}s for {path}")]
    Timeout { path: PathBuf, timeout_secs: u64 },

    #[error("failed to parse analyzer JSON output for {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by the probe cache (C3).
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to read probe cache file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write probe cache file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize probe cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised by the history store (C4).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("history store unreachable or corrupt at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("history store query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("scan {scan_id} invariant violation: expected {expected} processed, recomputed {actual}")]
    CounterMismatch {
        scan_id: i64,
        expected: i64,
        actual: i64,
    },

    #[error("scan {0} was already finalized")]
    AlreadyFinalized(i64),

    #[error("scan {0} was not found")]
    ScanNotFound(i64),

    #[error("history store I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize export row: {0}")]
    Export(#[from] serde_json::Error),

    #[error("failed to write csv export: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to write yaml export: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Per-entry walk errors (C5). Always logged and skipped, never fatal.
#[derive(Error, Debug)]
pub enum WalkError {
    #[error("permission denied reading {path}")]
    PermissionDenied { path: PathBuf },

    #[error("entry vanished during traversal: {path}")]
    Vanished { path: PathBuf },

    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
