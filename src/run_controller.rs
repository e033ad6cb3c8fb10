//! Top-level orchestrator that wires the walker, probe cache, scheduler,
//! worker pool, and history store into one run: load config, open
//! resources, drive a discover/quick/deep phased work loop, finalize on
//! every exit path including cancellation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analyzer;
use crate::config::ScanConfig;
use crate::domain::{
    Disposition, FileIdentity, Indicator, InspectDepth, InspectionResult, Progress, RunPhase,
    RunStatus, ScanMode, ScanSummary, Verdict,
};
use crate::errors::{AnalyzerError, ConfigError, StoreError};
use crate::history::HistoryStore;
use crate::io_json::{read_json_file, write_json_file};
use crate::pool::{Job, WorkerPool};
use crate::probe_cache::ProbeCache;
use crate::scheduler::Scheduler;
use crate::walker::Walker;

/// Progress is emitted at most this often; results that complete faster than
/// this are coarsened into the next tick rather than each triggering a call.
const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Fatal, run-level errors: config, tool-missing, and store errors are the
/// only ones that can abort a run outright; every per-file error is recorded
/// as a result or a skip instead.
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Survives a crash alongside the history store so an interrupted run can be
/// resumed without re-inspecting already-completed files. No explicit
/// "resume enabled" config flag exists; a matching on-disk record for the
/// same `(directory, mode)` is itself the enable signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ResumeRecord {
    directory: PathBuf,
    mode: Option<ScanMode>,
    completed: HashSet<FileIdentity>,
}

fn resume_path(history_path: &Path) -> PathBuf {
    history_path.with_extension("resume.json")
}

fn load_resume(path: &Path) -> ResumeRecord {
    read_json_file(path).unwrap_or_default()
}

fn save_resume(path: &Path, record: &ResumeRecord) {
    if let Err(err) = write_json_file(path, record) {
        warn!(error = %err, "failed to persist resume record, continuing without it");
    }
}

fn clear_resume(path: &Path) {
    if path.exists() {
        if let Err(err) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "failed to remove completed resume record");
        }
    }
}

/// Drives one complete scan of `directory` to completion, cancellation, or
/// failure.
pub struct RunController {
    config: ScanConfig,
}

impl RunController {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    /// Run one scan. `on_progress` is called from the orchestrating thread
    /// only (never concurrently); `cancel` may be flipped from any other
    /// thread to request cooperative cancellation.
    pub fn run(
        &self,
        directory: &Path,
        mut on_progress: impl FnMut(Progress),
        cancel: Arc<AtomicBool>,
    ) -> Result<ScanSummary, RunError> {
        let mut config = self.config.clone();
        config.normalize()?;

        let analyzer_path = analyzer::resolve_analyzer_binary(&config.analyzer)?;
        let mut history = HistoryStore::open(&config.history.path, config.history.stale_run_seconds)?;

        let resume_file = resume_path(&config.history.path);
        let on_disk_resume = load_resume(&resume_file);
        let (mut resume_record, was_resumed) = if on_disk_resume.directory == directory
            && on_disk_resume.mode == Some(config.scan.mode)
            && !on_disk_resume.completed.is_empty()
        {
            (on_disk_resume, true)
        } else {
            (
                ResumeRecord {
                    directory: directory.to_path_buf(),
                    mode: Some(config.scan.mode),
                    completed: HashSet::new(),
                },
                false,
            )
        };

        let scan_id = history.open_run(directory, config.scan.mode)?;
        let started_at = chrono::Utc::now();
        let start_instant = Instant::now();

        let probe_cache = config.probe_cache.enabled.then(|| {
            let cache = ProbeCache::open(&config.probe_cache.path, config.probe_cache.ttl_hours);
            if let Err(err) = cache.purge_expired() {
                warn!(error = %err, "failed to purge expired probe cache entries, continuing");
            }
            cache
        });

        let mut scheduler = Scheduler::new(
            config.scan.mode,
            config.scan.incremental,
            config.scan.incremental_window_days,
        );

        let mut pool = WorkerPool::new(
            config.pool.resolved_max_workers(),
            config.pool.resolved_queue_capacity(),
            analyzer_path.clone(),
            config.classifier.clone(),
            Duration::from_secs(config.analyzer.quick_timeout_s),
            Duration::from_secs(config.analyzer.deep_timeout_s),
            scheduler.is_hybrid(),
            config.classifier.deep_trigger(),
            Arc::clone(&cancel),
        );

        let mut counters = RunCounters::default();
        let mut pending_quick: HashMap<FileIdentity, InspectionResult> = HashMap::new();
        let probe_timeout = Duration::from_secs(config.analyzer.probe_timeout_s);

        let status = self.discover_and_drain(
            directory,
            &config,
            &analyzer_path,
            probe_timeout,
            &probe_cache,
            &mut scheduler,
            &mut pool,
            &mut history,
            scan_id,
            &mut resume_record,
            &resume_file,
            &mut counters,
            &mut pending_quick,
            start_instant,
            &mut on_progress,
        );

        pool.shutdown();
        history.set_discovered_total(scan_id, counters.discovered)?;
        history.finalize_run(scan_id, status)?;

        if config.history.auto_cleanup_days != 0 {
            match history.cleanup(config.history.auto_cleanup_days, false) {
                Ok((scans, results)) => {
                    if scans > 0 {
                        info!(scans, results, "auto-cleanup removed scans past retention window");
                    }
                }
                Err(err) => warn!(error = %err, "auto-cleanup of old scan history failed, continuing"),
            }
        }

        match status {
            RunStatus::Completed => clear_resume(&resume_file),
            RunStatus::Cancelled => save_resume(&resume_file, &resume_record),
            RunStatus::Failed | RunStatus::Running => {}
        }

        Ok(ScanSummary {
            scan_id,
            directory: directory.to_path_buf(),
            mode: config.scan.mode,
            discovered: counters.discovered,
            eligible: counters.eligible,
            processed: counters.processed,
            healthy: counters.healthy,
            corrupt: counters.corrupt,
            suspicious: counters.suspicious,
            deep_needed: counters.deep_needed,
            deep_completed: counters.deep_completed,
            scan_time_seconds: start_instant.elapsed().as_secs_f64(),
            started_at,
            completed_at: Some(chrono::Utc::now()),
            was_resumed,
            status,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn discover_and_drain(
        &self,
        directory: &Path,
        config: &ScanConfig,
        analyzer_path: &Path,
        probe_timeout: Duration,
        probe_cache: &Option<ProbeCache>,
        scheduler: &mut Scheduler,
        pool: &mut WorkerPool,
        history: &mut HistoryStore,
        scan_id: i64,
        resume_record: &mut ResumeRecord,
        resume_file: &Path,
        counters: &mut RunCounters,
        pending_quick: &mut HashMap<FileIdentity, InspectionResult>,
        start_instant: Instant,
        on_progress: &mut impl FnMut(Progress),
    ) -> RunStatus {
        let walker = Walker::new(directory, &config.scan.extensions);
        let mut outstanding: u64 = 0;
        let mut last_progress = Instant::now() - PROGRESS_MIN_INTERVAL;
        let cancel = pool.cancel_token();
        let captured_probe: std::cell::Cell<Option<crate::domain::ProbeResult>> =
            std::cell::Cell::new(None);

        for file in walker {
            if pool.cancel_token().load(Ordering::SeqCst) {
                break;
            }
            counters.discovered += 1;

            if resume_record.completed.contains(&file.identity) {
                continue;
            }

            let probe = if config.scan.require_probe_before_scan {
                captured_probe.set(None);
                let passed = crate::walker::content_probe_filter(
                    std::iter::once(file.clone()),
                    |identity| {
                        let result = probe_cache
                            .as_ref()
                            .and_then(|cache| cache.get(identity))
                            .unwrap_or_else(|| {
                                let result =
                                    analyzer::probe(analyzer_path, identity, probe_timeout, &cancel);
                                if let Some(cache) = probe_cache {
                                    if let Err(err) = cache.put(identity.clone(), result.clone()) {
                                        warn!(error = %err, "failed to persist probe cache entry, continuing");
                                    }
                                }
                                result
                            });
                        let eligible = result.is_scan_eligible();
                        captured_probe.set(Some(result));
                        eligible
                    },
                )
                .next()
                .is_some();

                if !passed {
                    continue; // skipped_ineligible: never enqueued, never persisted
                }
                captured_probe.take()
            } else {
                None
            };

            match scheduler.disposition(file, history) {
                Ok(Disposition::Enqueued(file)) => {
                    counters.eligible += 1;
                    let depth = scheduler.initial_depth();
                    if let Err(job) = pool.submit(Job {
                        file,
                        depth,
                        probe,
                    }) {
                        warn!(path = %job.file.path().display(), "submission channel closed, dropping job");
                        continue;
                    }
                    outstanding += 1;
                }
                Ok(Disposition::Skipped { .. }) => continue, // skipped_recent_healthy
                Err(err) => {
                    warn!(error = %err, "history lookup failed during scheduling, treating as not-incremental-eligible");
                }
            }

            self.drain_available(
                pool,
                history,
                scan_id,
                resume_record,
                resume_file,
                scheduler,
                counters,
                pending_quick,
                &mut outstanding,
                start_instant,
                &mut last_progress,
                on_progress,
                RunPhase::Discovery,
            );
        }

        if pool.cancel_token().load(Ordering::SeqCst) {
            return RunStatus::Cancelled;
        }

        // Discovery is done; drain whatever is still in flight to completion.
        while outstanding > 0 {
            let phase = if pool.cancel_token().load(Ordering::SeqCst) {
                break;
            } else {
                RunPhase::Finalizing
            };
            let received = self.drain_one(
                pool,
                history,
                scan_id,
                resume_record,
                resume_file,
                scheduler,
                counters,
                pending_quick,
                &mut outstanding,
                start_instant,
                &mut last_progress,
                on_progress,
                phase,
            );
            if !received {
                break; // channel closed with nothing more coming
            }
        }

        if pool.cancel_token().load(Ordering::SeqCst) {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        }
    }

    /// Drain whatever results are immediately available without blocking,
    /// so discovery keeps making progress while results trickle in.
    #[allow(clippy::too_many_arguments)]
    fn drain_available(
        &self,
        pool: &WorkerPool,
        history: &mut HistoryStore,
        scan_id: i64,
        resume_record: &mut ResumeRecord,
        resume_file: &Path,
        scheduler: &mut Scheduler,
        counters: &mut RunCounters,
        pending_quick: &mut HashMap<FileIdentity, InspectionResult>,
        outstanding: &mut u64,
        start_instant: Instant,
        last_progress: &mut Instant,
        on_progress: &mut impl FnMut(Progress),
        phase: RunPhase,
    ) {
        while let Ok(job_result) = pool.results().try_recv() {
            *outstanding -= 1;
            self.handle_result(
                job_result,
                pool,
                history,
                scan_id,
                resume_record,
                resume_file,
                scheduler,
                counters,
                pending_quick,
                outstanding,
                start_instant,
                last_progress,
                on_progress,
                phase,
            );
        }
    }

    /// Blocking variant used once discovery has finished and there is
    /// nothing left to interleave with.
    #[allow(clippy::too_many_arguments)]
    fn drain_one(
        &self,
        pool: &WorkerPool,
        history: &mut HistoryStore,
        scan_id: i64,
        resume_record: &mut ResumeRecord,
        resume_file: &Path,
        scheduler: &mut Scheduler,
        counters: &mut RunCounters,
        pending_quick: &mut HashMap<FileIdentity, InspectionResult>,
        outstanding: &mut u64,
        start_instant: Instant,
        last_progress: &mut Instant,
        on_progress: &mut impl FnMut(Progress),
        phase: RunPhase,
    ) -> bool {
        match pool
            .results()
            .recv_timeout(Duration::from_millis(200))
        {
            Ok(job_result) => {
                *outstanding -= 1;
                self.handle_result(
                    job_result,
                    pool,
                    history,
                    scan_id,
                    resume_record,
                    resume_file,
                    scheduler,
                    counters,
                    pending_quick,
                    outstanding,
                    start_instant,
                    last_progress,
                    on_progress,
                    phase,
                );
                true
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => true,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_result(
        &self,
        job_result: crate::pool::JobResult,
        pool: &WorkerPool,
        history: &mut HistoryStore,
        scan_id: i64,
        resume_record: &mut ResumeRecord,
        resume_file: &Path,
        scheduler: &mut Scheduler,
        counters: &mut RunCounters,
        pending_quick: &mut HashMap<FileIdentity, InspectionResult>,
        outstanding: &mut u64,
        start_instant: Instant,
        last_progress: &mut Instant,
        on_progress: &mut impl FnMut(Progress),
        phase: RunPhase,
    ) {
        let crate::pool::JobResult { file, result } = job_result;
        let identity = result.identity.clone();

        let final_result = if result.scan_mode == InspectDepth::Quick && result.needs_deep {
            counters.deep_needed += 1;
            if scheduler.mark_promoted(&identity) {
                *outstanding += 1;
                if let Err(job) = pool.submit(Job {
                    file,
                    depth: InspectDepth::Deep,
                    probe: result.probe.clone(),
                }) {
                    warn!(path = %job.file.path().display(), "submission channel closed while promoting to deep");
                    *outstanding -= 1;
                } else {
                    pending_quick.insert(identity.clone(), result);
                }
            }
            None
        } else if result.scan_mode == InspectDepth::Deep {
            match pending_quick.remove(&identity) {
                Some(quick) => {
                    let mut merged = result;
                    merged.indicators.push(Indicator {
                        tag: format!("quick_confidence={:.3}", quick.confidence),
                        weight: 0.0,
                    });
                    merged.needs_deep = true;
                    Some(merged)
                }
                None => Some(result),
            }
        } else {
            Some(result)
        };

        let reported_phase = match &final_result {
            Some(result) => match result.scan_mode {
                InspectDepth::Quick => RunPhase::Quick,
                InspectDepth::Deep => RunPhase::Deep,
            },
            // No terminal verdict this tick (a quick result just got promoted
            // to deep): fall back to the caller's discovery/finalizing phase.
            None => phase,
        };

        if let Some(result) = final_result {
            match result.verdict {
                Verdict::Healthy => counters.healthy += 1,
                Verdict::Corrupt => counters.corrupt += 1,
                Verdict::Suspicious => counters.suspicious += 1,
            }
            if result.deep_completed {
                counters.deep_completed += 1;
            }
            counters.processed += 1;
            resume_record.completed.insert(identity.clone());
            if let Err(err) = history.append_result(scan_id, &result) {
                warn!(error = %err, "failed to persist inspection result");
            }
            if counters.processed % 20 == 0 {
                save_resume(resume_file, resume_record);
            }
        }

        if last_progress.elapsed() >= PROGRESS_MIN_INTERVAL {
            *last_progress = Instant::now();
            let elapsed = start_instant.elapsed().as_secs_f64();
            let estimated_remaining = if counters.processed > 0 && counters.eligible > counters.processed {
                let rate = elapsed / counters.processed as f64;
                Some(rate * (counters.eligible - counters.processed) as f64)
            } else {
                None
            };
            on_progress(Progress {
                discovered: counters.discovered,
                eligible: counters.eligible,
                processed: counters.processed,
                healthy: counters.healthy,
                corrupt: counters.corrupt,
                suspicious: counters.suspicious,
                current_file: Some(identity.path),
                elapsed_seconds: elapsed,
                estimated_remaining_seconds: estimated_remaining,
                phase: reported_phase,
            });
        }
        info!(processed = counters.processed, eligible = counters.eligible, "inspection progress");
    }
}

#[derive(Default)]
struct RunCounters {
    discovered: u64,
    eligible: u64,
    processed: u64,
    healthy: u64,
    corrupt: u64,
    suspicious: u64,
    deep_needed: u64,
    deep_completed: u64,
}
