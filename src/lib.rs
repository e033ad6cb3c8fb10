//! Discovers video files under a directory, probes and decode-checks them
//! with an external media analyzer, classifies the diagnostic output into a
//! corruption verdict, and persists scan history in an embedded store.
//!
//! [`run_controller::RunController`] is the entry point: build a
//! [`config::ScanConfig`], construct a controller, and call
//! [`run_controller::RunController::run`].

mod analyzer;
mod classifier;
mod config;
mod domain;
mod errors;
mod history;
mod io_json;
mod pool;
mod probe_cache;
mod process_ext;
mod run_controller;
mod scheduler;
mod sync_ext;
mod walker;

pub use crate::analyzer::{RawAnalysis, OUTPUT_CAP_BYTES};
pub use crate::classifier::{classify, Classification, ClassifierInput, EXIT_CODE_WEIGHT};
pub use crate::config::{
    AnalyzerConfig, ClassifierConfig, HistoryConfig, PoolConfig, PoolParallelism,
    ProbeCacheConfig, ScanConfig, ScanPolicyConfig,
};
pub use crate::domain::{
    Disposition, FileIdentity, Indicator, InspectDepth, InspectionResult, ProbeCacheEntry,
    ProbeResult, Progress, RunPhase, RunStatus, ScanMode, ScanSummary, SkipReason, StreamInfo,
    StreamKind, Verdict, VideoFile,
};
pub use crate::errors::{AnalyzerError, CacheError, ConfigError, StoreError, WalkError};
pub use crate::history::{ExportFormat, HistoryStore, ResultFilter, ScanComparison, TrendPoint};
pub use crate::pool::{Job, JobResult, WorkerPool};
pub use crate::probe_cache::ProbeCache;
pub use crate::run_controller::{RunController, RunError};
pub use crate::scheduler::Scheduler;
pub use crate::walker::{content_probe_filter, Walker};
