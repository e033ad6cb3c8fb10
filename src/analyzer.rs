//! Launches the external media analyzer tool in two modes (metadata probe,
//! decode-level inspection) and returns normalized output. Stateless and
//! safe to call concurrently from any worker.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use serde::Deserialize;

use crate::config::AnalyzerConfig;
use crate::domain::{FileIdentity, ProbeResult, StreamInfo, StreamKind};
use crate::errors::AnalyzerError;
use crate::process_ext::run_with_timeout;

/// Bounded per-call output cap: 1 MiB.
pub const OUTPUT_CAP_BYTES: usize = 1024 * 1024;

/// Outcome of a decode-level analyzer invocation (quick or deep), prior to
/// classification.
#[derive(Debug, Clone)]
pub struct RawAnalysis {
    pub exit_code: Option<i32>,
    pub diagnostic_text: String,
    pub truncated: bool,
    pub timed_out: bool,
    pub wall_clock_seconds: f64,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

fn stream_kind(codec_type: Option<&str>) -> StreamKind {
    match codec_type {
        Some("video") => StreamKind::Video,
        Some("audio") => StreamKind::Audio,
        Some("subtitle") => StreamKind::Subtitle,
        _ => StreamKind::Other,
    }
}

/// Resolve the analyzer binary: explicit config path, then `PATH` lookup,
/// then a fatal [`AnalyzerError::ToolMissing`].
pub fn resolve_analyzer_binary(config: &AnalyzerConfig) -> Result<PathBuf, AnalyzerError> {
    if let Some(path) = &config.command {
        if path.is_file() {
            return Ok(path.clone());
        }
        return Err(AnalyzerError::ToolMissing(format!(
            "configured analyzer.command {} is not a file",
            path.display()
        )));
    }

    let candidate = if cfg!(windows) { "ffprobe.exe" } else { "ffprobe" };
    which_on_path(candidate).ok_or_else(|| {
        AnalyzerError::ToolMissing(
            "ffprobe not found on PATH and analyzer.command is not set".to_string(),
        )
    })
}

fn which_on_path(binary: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Runs a metadata-only probe and parses its JSON output into a [`ProbeResult`].
pub fn probe(
    analyzer_path: &Path,
    identity: &FileIdentity,
    timeout: Duration,
    cancel: &AtomicBool,
) -> ProbeResult {
    let start = std::time::Instant::now();

    let mut cmd = Command::new(analyzer_path);
    cmd.arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg(identity.path.as_os_str());

    let outcome = match run_with_timeout(cmd, timeout, OUTPUT_CAP_BYTES, cancel) {
        Ok(outcome) => outcome,
        Err(err) => {
            return ProbeResult {
                identity: identity.clone(),
                success: false,
                streams: Vec::new(),
                container_format: None,
                duration_seconds: None,
                probe_wall_clock_seconds: start.elapsed().as_secs_f64(),
                failure_reason: Some(format!("failed to launch probe: {err}")),
                timestamp: chrono::Utc::now(),
            };
        }
    };

    let wall_clock = start.elapsed().as_secs_f64();

    if outcome.timed_out {
        return ProbeResult {
            identity: identity.clone(),
            success: false,
            streams: Vec::new(),
            container_format: None,
            duration_seconds: None,
            probe_wall_clock_seconds: wall_clock,
            failure_reason: Some("probe timed out".to_string()),
            timestamp: chrono::Utc::now(),
        };
    }

    let success_exit = outcome.status.map(|s| s.success()).unwrap_or(false);
    if !success_exit {
        return ProbeResult {
            identity: identity.clone(),
            success: false,
            streams: Vec::new(),
            container_format: None,
            duration_seconds: None,
            probe_wall_clock_seconds: wall_clock,
            failure_reason: Some(format!(
                "probe exited non-zero: {}",
                String::from_utf8_lossy(&outcome.stderr.bytes)
            )),
            timestamp: chrono::Utc::now(),
        };
    }

    match serde_json::from_slice::<FfprobeOutput>(&outcome.stdout.bytes) {
        Ok(parsed) => {
            let streams = parsed
                .streams
                .into_iter()
                .map(|s| StreamInfo {
                    index: s.index,
                    kind: stream_kind(s.codec_type.as_deref()),
                    codec: s.codec_name,
                })
                .collect();
            let (container_format, duration_seconds) = match parsed.format {
                Some(format) => (
                    format.format_name,
                    format.duration.and_then(|d| d.trim().parse::<f64>().ok()),
                ),
                None => (None, None),
            };
            ProbeResult {
                identity: identity.clone(),
                success: true,
                streams,
                container_format,
                duration_seconds,
                probe_wall_clock_seconds: wall_clock,
                failure_reason: None,
                timestamp: chrono::Utc::now(),
            }
        }
        Err(err) => ProbeResult {
            identity: identity.clone(),
            success: false,
            streams: Vec::new(),
            container_format: None,
            duration_seconds: None,
            probe_wall_clock_seconds: wall_clock,
            failure_reason: Some(format!("failed to parse probe JSON: {err}")),
            timestamp: chrono::Utc::now(),
        },
    }
}

/// Runs the decoder to a null sink and captures the diagnostic stream +
/// exit code.
pub fn inspect(analyzer_path: &Path, path: &Path, timeout: Duration, cancel: &AtomicBool) -> RawAnalysis {
    let start = std::time::Instant::now();

    let mut cmd = Command::new(analyzer_path);
    cmd.arg("-v")
        .arg("error")
        .arg("-i")
        .arg(path.as_os_str())
        .arg("-f")
        .arg("null")
        .arg("-");

    let outcome = match run_with_timeout(cmd, timeout, OUTPUT_CAP_BYTES, cancel) {
        Ok(outcome) => outcome,
        Err(err) => {
            return RawAnalysis {
                exit_code: None,
                diagnostic_text: format!("failed to launch inspect: {err}"),
                truncated: false,
                timed_out: false,
                wall_clock_seconds: start.elapsed().as_secs_f64(),
            };
        }
    };

    RawAnalysis {
        exit_code: outcome.status.and_then(|s| s.code()),
        diagnostic_text: String::from_utf8_lossy(&outcome.stderr.bytes).into_owned(),
        truncated: outcome.stderr.truncated,
        timed_out: outcome.timed_out,
        wall_clock_seconds: start.elapsed().as_secs_f64(),
    }
}
