//! Core data model: the entity types shared across every module.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Stable identity of a filesystem artifact for caching and incremental-skip
/// purposes. Two files with the same tuple are treated as the same artifact;
/// a change in size or mtime invalidates any cached probe or result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    pub path: PathBuf,
    pub size: u64,
    pub mtime_nanos: i128,
}

/// A candidate input discovered by the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFile {
    pub identity: FileIdentity,
}

impl VideoFile {
    pub fn path(&self) -> &Path {
        &self.identity.path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: u32,
    pub kind: StreamKind,
    pub codec: Option<String>,
}

/// Outcome of metadata extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub identity: FileIdentity,
    pub success: bool,
    pub streams: Vec<StreamInfo>,
    pub container_format: Option<String>,
    pub duration_seconds: Option<f64>,
    pub probe_wall_clock_seconds: f64,
    pub failure_reason: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ProbeResult {
    pub fn has_video_stream(&self) -> bool {
        self.streams.iter().any(|s| s.kind == StreamKind::Video)
    }

    /// Scan-eligible iff the probe succeeded and found at least one video
    /// stream.
    pub fn is_scan_eligible(&self) -> bool {
        self.success && self.has_video_stream()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Healthy,
    Corrupt,
    Suspicious,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Quick,
    Deep,
    Hybrid,
}

impl ScanMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanMode::Quick => "quick",
            ScanMode::Deep => "deep",
            ScanMode::Hybrid => "hybrid",
        }
    }
}

impl std::str::FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick" => Ok(ScanMode::Quick),
            "deep" => Ok(ScanMode::Deep),
            "hybrid" => Ok(ScanMode::Hybrid),
            other => Err(format!("unknown scan mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InspectDepth {
    Quick,
    Deep,
}

/// A matched diagnostic pattern with its weight, as produced by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    pub tag: String,
    pub weight: f64,
}

/// Outcome of decode-level analysis of one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionResult {
    pub identity: FileIdentity,
    pub verdict: Verdict,
    pub confidence: f64,
    pub scan_mode: InspectDepth,
    pub indicators: Vec<Indicator>,
    /// Bounded raw diagnostic text; see the analyzer driver's output cap.
    pub raw_diagnostics: String,
    pub inspection_wall_clock_seconds: f64,
    pub needs_deep: bool,
    pub deep_completed: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub probe: Option<ProbeResult>,
    /// Surfaces the analyzer driver's truncation sentinel to callers.
    pub analyzer_stderr_truncated: bool,
}

impl InspectionResult {
    /// Tag-only projection of `indicators`.
    pub fn indicator_tags(&self) -> Vec<&str> {
        self.indicators.iter().map(|i| i.tag.as_str()).collect()
    }
}

/// Terminal status of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// One run of the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSummary {
    pub scan_id: i64,
    pub directory: PathBuf,
    pub mode: ScanMode,
    pub discovered: u64,
    pub eligible: u64,
    pub processed: u64,
    pub healthy: u64,
    pub corrupt: u64,
    pub suspicious: u64,
    pub deep_needed: u64,
    pub deep_completed: u64,
    pub scan_time_seconds: f64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub was_resumed: bool,
    pub status: RunStatus,
}

impl ScanSummary {
    /// Mean confidence over processed (non-skipped) results.
    pub fn average_confidence(&self, total_confidence: f64) -> Option<f64> {
        if self.processed == 0 {
            None
        } else {
            Some(total_confidence / self.processed as f64)
        }
    }

    pub fn invariants_hold(&self) -> bool {
        self.processed == self.healthy + self.corrupt + self.suspicious
            && self.processed <= self.eligible
            && self.eligible <= self.discovered
    }
}

/// A cached probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeCacheEntry {
    pub identity: FileIdentity,
    pub probe: ProbeResult,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Per-file terminal disposition distinct from a classified verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Probe failed or found no video stream; classifier never invoked.
    Ineligible,
    /// Incremental policy found a recent healthy result for this identity.
    RecentHealthy,
}

/// What the scheduler decided to do with one discovered candidate.
#[derive(Debug, Clone)]
pub enum Disposition {
    Enqueued(VideoFile),
    Skipped { file: VideoFile, reason: SkipReason },
}

/// Run phase surfaced on the progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Discovery,
    Quick,
    Deep,
    Finalizing,
}

/// One progress update: not persisted, delivered to the caller's reporter
/// callback.
#[derive(Debug, Clone)]
pub struct Progress {
    pub discovered: u64,
    pub eligible: u64,
    pub processed: u64,
    pub healthy: u64,
    pub corrupt: u64,
    pub suspicious: u64,
    pub current_file: Option<PathBuf>,
    pub elapsed_seconds: f64,
    pub estimated_remaining_seconds: Option<f64>,
    pub phase: RunPhase,
}
