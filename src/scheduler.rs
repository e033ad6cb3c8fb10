//! Decides, per discovered candidate, what depth of job to enqueue first and
//! whether a quick result warrants promotion to a deep one. Deliberately
//! thin — the actual submission and draining loop lives in
//! [`crate::run_controller`], which owns the pool and the history store;
//! this module only encapsulates the decision logic so it stays
//! unit-testable without either.

use std::collections::HashSet;

use crate::domain::{Disposition, FileIdentity, InspectDepth, ScanMode, SkipReason, VideoFile};
use crate::errors::StoreError;
use crate::history::HistoryStore;

/// Per-run scheduling state: the scan mode plus the dedup set guarding
/// against submitting more than one deep-promotion job per identity within
/// a run.
pub struct Scheduler {
    mode: ScanMode,
    incremental: bool,
    incremental_window_days: u32,
    promoted: HashSet<FileIdentity>,
}

impl Scheduler {
    pub fn new(mode: ScanMode, incremental: bool, incremental_window_days: u32) -> Self {
        Self {
            mode,
            incremental,
            incremental_window_days,
            promoted: HashSet::new(),
        }
    }

    pub fn is_hybrid(&self) -> bool {
        matches!(self.mode, ScanMode::Hybrid)
    }

    /// Depth of the first job submitted for a newly-eligible file:
    /// quick-only and hybrid both start at quick, deep-only starts and ends
    /// at deep.
    pub fn initial_depth(&self) -> InspectDepth {
        match self.mode {
            ScanMode::Deep => InspectDepth::Deep,
            ScanMode::Quick | ScanMode::Hybrid => InspectDepth::Quick,
        }
    }

    /// Apply the incremental recent-healthy skip, orthogonal to scan mode.
    /// Only ever returns [`Disposition::Skipped`] with
    /// [`SkipReason::RecentHealthy`]; ineligible files are filtered out
    /// earlier by the caller, before a `Scheduler` is even consulted.
    pub fn disposition(
        &self,
        file: VideoFile,
        history: &HistoryStore,
    ) -> Result<Disposition, StoreError> {
        if self.incremental
            && history.recent_healthy(&file.identity, self.incremental_window_days)?
        {
            return Ok(Disposition::Skipped {
                file,
                reason: SkipReason::RecentHealthy,
            });
        }
        Ok(Disposition::Enqueued(file))
    }

    /// First-time dedup gate for phase-2 deep promotion: `true` the first
    /// time `identity` is promoted in this run, `false` on any repeat.
    pub fn mark_promoted(&mut self, identity: &FileIdentity) -> bool {
        self.promoted.insert(identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryStore;

    fn identity(path: &str) -> FileIdentity {
        FileIdentity {
            path: path.into(),
            size: 10,
            mtime_nanos: 0,
        }
    }

    #[test]
    fn quick_and_hybrid_start_at_quick_deep_starts_at_deep() {
        assert_eq!(
            Scheduler::new(ScanMode::Quick, false, 7).initial_depth(),
            InspectDepth::Quick
        );
        assert_eq!(
            Scheduler::new(ScanMode::Hybrid, false, 7).initial_depth(),
            InspectDepth::Quick
        );
        assert_eq!(
            Scheduler::new(ScanMode::Deep, false, 7).initial_depth(),
            InspectDepth::Deep
        );
    }

    #[test]
    fn incremental_skip_recent_healthy_file() {
        let mut store = HistoryStore::open_in_memory().unwrap();
        let scan_id = store.open_run(std::path::Path::new("/videos"), ScanMode::Quick).unwrap();
        let id = identity("/videos/a.mp4");
        store
            .append_result(
                scan_id,
                &crate::domain::InspectionResult {
                    identity: id.clone(),
                    verdict: crate::domain::Verdict::Healthy,
                    confidence: 0.0,
                    scan_mode: InspectDepth::Quick,
                    indicators: vec![],
                    raw_diagnostics: String::new(),
                    inspection_wall_clock_seconds: 0.1,
                    needs_deep: false,
                    deep_completed: false,
                    timestamp: chrono::Utc::now(),
                    probe: None,
                    analyzer_stderr_truncated: false,
                },
            )
            .unwrap();

        let scheduler = Scheduler::new(ScanMode::Quick, true, 7);
        let file = VideoFile { identity: id };
        match scheduler.disposition(file, &store).unwrap() {
            Disposition::Skipped { reason, .. } => assert_eq!(reason, SkipReason::RecentHealthy),
            Disposition::Enqueued(_) => panic!("expected a recent-healthy skip"),
        }
    }

    #[test]
    fn non_incremental_never_skips() {
        let store = HistoryStore::open_in_memory().unwrap();
        let scheduler = Scheduler::new(ScanMode::Quick, false, 7);
        let file = VideoFile {
            identity: identity("/videos/a.mp4"),
        };
        match scheduler.disposition(file, &store).unwrap() {
            Disposition::Enqueued(_) => {}
            Disposition::Skipped { .. } => panic!("incremental is off, should never skip"),
        }
    }

    #[test]
    fn promotion_dedup_fires_once_per_identity() {
        let mut scheduler = Scheduler::new(ScanMode::Hybrid, false, 7);
        let id = identity("/videos/a.mp4");
        assert!(scheduler.mark_promoted(&id));
        assert!(!scheduler.mark_promoted(&id));
    }
}
