//! Fixed pool of worker threads draining a bounded submission channel, each
//! owning one analyzer child process at a time, backed by plain OS threads
//! and `std::sync::mpsc::sync_channel` for bounded-channel backpressure.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::analyzer;
use crate::classifier::{self, ClassifierInput};
use crate::config::ClassifierConfig;
use crate::domain::{InspectDepth, InspectionResult, ProbeResult, Verdict, VideoFile};
use crate::sync_ext::MutexExt;

/// One unit of inspection work.
pub struct Job {
    pub file: VideoFile,
    pub depth: InspectDepth,
    pub probe: Option<ProbeResult>,
}

/// A completed inspection, published on the pool's single result channel
/// with no ordering guarantee across files.
pub struct JobResult {
    pub file: VideoFile,
    pub result: InspectionResult,
}

struct WorkerContext {
    analyzer_path: PathBuf,
    classifier_config: ClassifierConfig,
    quick_timeout: Duration,
    deep_timeout: Duration,
    hybrid: bool,
    deep_trigger: f64,
    cancel: Arc<AtomicBool>,
}

/// Fixed pool of worker threads. The submission channel's bounded capacity
/// is the producer's only backpressure signal.
pub struct WorkerPool {
    job_tx: Option<SyncSender<Job>>,
    result_rx: Receiver<JobResult>,
    handles: Vec<std::thread::JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_count: usize,
        queue_capacity: usize,
        analyzer_path: PathBuf,
        classifier_config: ClassifierConfig,
        quick_timeout: Duration,
        deep_timeout: Duration,
        hybrid: bool,
        deep_trigger: f64,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        let (job_tx, job_rx) = sync_channel::<Job>(queue_capacity.max(1));
        let job_rx = Arc::new(Mutex::new(job_rx));
        // Capacity mirrors the job channel: a slow persistence consumer
        // should exert the same backpressure as a slow producer.
        let (result_tx, result_rx) = sync_channel::<JobResult>(queue_capacity.max(1));

        let mut handles = Vec::with_capacity(worker_count.max(1));
        for _ in 0..worker_count.max(1) {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let ctx = WorkerContext {
                analyzer_path: analyzer_path.clone(),
                classifier_config: classifier_config.clone(),
                quick_timeout,
                deep_timeout,
                hybrid,
                deep_trigger,
                cancel: Arc::clone(&cancel),
            };
            handles.push(std::thread::spawn(move || worker_loop(job_rx, result_tx, ctx)));
        }
        // Drop our own sender so the channel only closes once every worker's
        // clone is gone.
        drop(result_tx);

        Self {
            job_tx: Some(job_tx),
            result_rx,
            handles,
            cancel,
        }
    }

    /// Submit one job. Blocks when the bounded channel is full (producer
    /// backpressure). Returns `Err` once the pool has been shut down or
    /// cancelled.
    pub fn submit(&self, job: Job) -> Result<(), Job> {
        match &self.job_tx {
            Some(tx) => tx.send(job).map_err(|e| e.0),
            None => Err(job),
        }
    }

    pub fn results(&self) -> &Receiver<JobResult> {
        &self.result_rx
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Flip the shared cancellation flag and close the submission channel.
    /// Workers kill their in-flight analyzer child, if any, and then exit.
    pub fn cancel(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.job_tx = None;
    }

    /// Close the submission channel (if not already closed) and wait for
    /// every worker thread to drain and exit.
    pub fn shutdown(mut self) {
        self.job_tx = None;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    job_rx: Arc<Mutex<Receiver<Job>>>,
    result_tx: SyncSender<JobResult>,
    ctx: WorkerContext,
) {
    loop {
        if ctx.cancel.load(Ordering::SeqCst) {
            break;
        }

        let job = {
            let rx = job_rx.lock_unpoisoned();
            rx.recv()
        };
        let job = match job {
            Ok(job) => job,
            Err(_) => break, // submission channel closed: no more work ever
        };

        if ctx.cancel.load(Ordering::SeqCst) {
            break;
        }

        let timeout = match job.depth {
            InspectDepth::Quick => ctx.quick_timeout,
            InspectDepth::Deep => ctx.deep_timeout,
        };
        let raw = analyzer::inspect(&ctx.analyzer_path, job.file.path(), timeout, &ctx.cancel);

        if ctx.cancel.load(Ordering::SeqCst) {
            break; // killed mid-flight: don't publish a result for a job that never really ran
        }

        let probe_succeeded_with_video = job
            .probe
            .as_ref()
            .map(ProbeResult::has_video_stream)
            .unwrap_or(false);
        let classification = classifier::classify(
            &ClassifierInput {
                exit_code: raw.exit_code,
                diagnostic_text: &raw.diagnostic_text,
                probe_succeeded_with_video,
            },
            &ctx.classifier_config,
        );

        // Hybrid promotion decision: only a quick job can trigger it, and an
        // ambiguous failure (timeout, or a non-zero exit with no usable
        // diagnostics) is promoted directly rather than classified
        // suspicious-on-nothing.
        let needs_deep = ctx.hybrid
            && job.depth == InspectDepth::Quick
            && {
                let ambiguous_failure = raw.timed_out
                    || (raw.exit_code.map(|c| c != 0).unwrap_or(true)
                        && raw.diagnostic_text.trim().is_empty());
                ambiguous_failure
                    || classification.verdict != Verdict::Healthy
                    || classification.confidence >= ctx.deep_trigger
            };

        let result = InspectionResult {
            identity: job.file.identity.clone(),
            verdict: classification.verdict,
            confidence: classification.confidence,
            scan_mode: job.depth,
            indicators: classification.indicators,
            raw_diagnostics: raw.diagnostic_text,
            inspection_wall_clock_seconds: raw.wall_clock_seconds,
            needs_deep,
            deep_completed: job.depth == InspectDepth::Deep,
            timestamp: chrono::Utc::now(),
            probe: job.probe.clone(),
            analyzer_stderr_truncated: raw.truncated,
        };

        if result_tx
            .send(JobResult {
                file: job.file,
                result,
            })
            .is_err()
        {
            break; // result consumer gone
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FileIdentity;
    use std::io::Write;
    use std::path::Path;

    fn write_mock_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("mock_ffprobe.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{body}").unwrap();
        drop(file);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    fn video(path: &Path) -> VideoFile {
        std::fs::write(path, b"data").unwrap();
        VideoFile {
            identity: FileIdentity {
                path: path.to_path_buf(),
                size: 4,
                mtime_nanos: 0,
            },
        }
    }

    #[test]
    fn processes_a_healthy_job_and_reports_result() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_mock_script(dir.path(), "exit 0");
        let file = video(&dir.path().join("a.mp4"));

        let pool = WorkerPool::new(
            1,
            4,
            script,
            ClassifierConfig::default(),
            Duration::from_secs(5),
            Duration::from_secs(5),
            false,
            0.15,
            Arc::new(AtomicBool::new(false)),
        );
        pool.submit(Job {
            file,
            depth: InspectDepth::Quick,
            probe: None,
        })
        .unwrap();

        let result = pool.results().recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.result.verdict, Verdict::Healthy);
        pool.shutdown();
    }

    #[test]
    fn hybrid_quick_failure_with_no_diagnostics_requests_promotion() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_mock_script(dir.path(), "exit 1");
        let file = video(&dir.path().join("a.mp4"));

        let pool = WorkerPool::new(
            1,
            4,
            script,
            ClassifierConfig::default(),
            Duration::from_secs(5),
            Duration::from_secs(5),
            true,
            0.15,
            Arc::new(AtomicBool::new(false)),
        );
        pool.submit(Job {
            file,
            depth: InspectDepth::Quick,
            probe: None,
        })
        .unwrap();

        let result = pool.results().recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(result.result.needs_deep);
        pool.shutdown();
    }

    #[test]
    fn deep_job_never_requests_further_promotion() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_mock_script(dir.path(), "echo 'Invalid NAL unit size' 1>&2; exit 1");
        let file = video(&dir.path().join("a.mp4"));

        let pool = WorkerPool::new(
            1,
            4,
            script,
            ClassifierConfig::default(),
            Duration::from_secs(5),
            Duration::from_secs(5),
            true,
            0.15,
            Arc::new(AtomicBool::new(false)),
        );
        pool.submit(Job {
            file,
            depth: InspectDepth::Deep,
            probe: None,
        })
        .unwrap();

        let result = pool.results().recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!result.result.needs_deep);
        assert!(result.result.deep_completed);
        pool.shutdown();
    }

    #[test]
    fn cancel_stops_workers_and_closes_submission() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_mock_script(dir.path(), "exit 0");

        let mut pool = WorkerPool::new(
            1,
            4,
            script,
            ClassifierConfig::default(),
            Duration::from_secs(5),
            Duration::from_secs(5),
            false,
            0.15,
            Arc::new(AtomicBool::new(false)),
        );
        pool.cancel();
        let file = video(&dir.path().join("a.mp4"));
        assert!(pool.submit(Job {
            file,
            depth: InspectDepth::Quick,
            probe: None,
        })
        .is_err());
        pool.shutdown();
    }
}
