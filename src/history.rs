//! Embedded relational store of scan runs and per-file results: `rusqlite`
//! with the `bundled` feature, WAL journaling, `foreign_keys=ON` so the
//! cascade-delete invariant is enforced by SQLite rather than application
//! code.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{
    Indicator, InspectDepth, InspectionResult, RunStatus, ScanMode, ScanSummary, Verdict,
};
use crate::errors::StoreError;

const SCHEMA_VERSION: i64 = 1;

/// Filter for [`HistoryStore::query`] and [`HistoryStore::export`].
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    pub directory_prefix: Option<PathBuf>,
    pub verdicts: Vec<Verdict>,
    pub min_confidence: Option<f64>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub until: Option<chrono::DateTime<chrono::Utc>>,
    pub filename_like: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Result of [`HistoryStore::compare`].
#[derive(Debug, Clone, Default)]
pub struct ScanComparison {
    pub new_corrupt: Vec<PathBuf>,
    pub newly_healthy: Vec<PathBuf>,
    pub still_corrupt: Vec<PathBuf>,
    pub still_healthy: Vec<PathBuf>,
    pub gone: Vec<PathBuf>,
    pub added: Vec<PathBuf>,
}

/// One day's aggregate point from [`HistoryStore::corruption_trend`].
#[derive(Debug, Clone)]
pub struct TrendPoint {
    pub date: chrono::NaiveDate,
    pub total: i64,
    pub corrupt: i64,
    pub rate: f64,
}

/// Export serialization target for [`HistoryStore::export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Yaml,
}

#[derive(serde::Serialize)]
struct ExportRow {
    scan_id: i64,
    file_path: String,
    verdict: String,
    confidence: f64,
    indicator_tags: String,
    timestamp: String,
}

fn verdict_str(v: Verdict) -> &'static str {
    match v {
        Verdict::Healthy => "healthy",
        Verdict::Corrupt => "corrupt",
        Verdict::Suspicious => "suspicious",
    }
}

fn parse_verdict(s: &str) -> Verdict {
    match s {
        "corrupt" => Verdict::Corrupt,
        "suspicious" => Verdict::Suspicious,
        _ => Verdict::Healthy,
    }
}

fn scan_mode_str(m: ScanMode) -> &'static str {
    m.as_str()
}

fn inspect_depth_str(d: InspectDepth) -> &'static str {
    match d {
        InspectDepth::Quick => "quick",
        InspectDepth::Deep => "deep",
    }
}

fn parse_inspect_depth(s: &str) -> InspectDepth {
    if s == "deep" {
        InspectDepth::Deep
    } else {
        InspectDepth::Quick
    }
}

/// Embedded store of scan runs and per-file inspection results.
pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    /// Open (creating if absent) the store at `path`, run migrations, and
    /// sweep stale `running` scans older than `stale_run_seconds` — a run
    /// left `running` past that age is treated as crashed and finalized as
    /// failed.
    pub fn open(path: &Path, stale_run_seconds: u64) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let store = Self { conn };
        store.migrate()?;
        store.recover_stale_runs(stale_run_seconds)?;
        Ok(store)
    }

    /// In-memory store, used by tests and short-lived tooling.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let user_version: i64 =
            self.conn
                .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if user_version >= SCHEMA_VERSION {
            return Ok(());
        }

        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                directory TEXT NOT NULL,
                mode TEXT NOT NULL,
                total INTEGER NOT NULL DEFAULT 0,
                processed INTEGER NOT NULL DEFAULT 0,
                corrupt INTEGER NOT NULL DEFAULT 0,
                healthy INTEGER NOT NULL DEFAULT 0,
                suspicious INTEGER NOT NULL DEFAULT 0,
                deep_needed INTEGER NOT NULL DEFAULT 0,
                deep_completed INTEGER NOT NULL DEFAULT 0,
                scan_time_seconds REAL NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                was_resumed INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_scans_directory_started
                ON scans(directory, started_at DESC);

            CREATE TABLE IF NOT EXISTS scan_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_id INTEGER NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
                file_path TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                mtime INTEGER NOT NULL,
                is_corrupt INTEGER NOT NULL,
                verdict TEXT NOT NULL,
                confidence REAL NOT NULL,
                indicators TEXT NOT NULL,
                raw_diagnostics TEXT NOT NULL,
                inspection_time_seconds REAL NOT NULL,
                scan_mode TEXT NOT NULL,
                needs_deep INTEGER NOT NULL,
                deep_completed INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_results_scan_id ON scan_results(scan_id);
            CREATE INDEX IF NOT EXISTS idx_results_file_path ON scan_results(file_path);
            CREATE INDEX IF NOT EXISTS idx_results_verdict ON scan_results(verdict);
            CREATE INDEX IF NOT EXISTS idx_results_scan_verdict ON scan_results(scan_id, verdict);
            ",
        )?;
        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    fn recover_stale_runs(&self, stale_run_seconds: u64) -> Result<(), StoreError> {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(stale_run_seconds as i64);
        let mut stmt = self.conn.prepare(
            "SELECT id FROM scans WHERE status = 'running' AND started_at < ?1",
        )?;
        let stale_ids: Vec<i64> = stmt
            .query_map(params![cutoff.to_rfc3339()], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        for scan_id in stale_ids {
            self.finalize_run(scan_id, RunStatus::Failed)?;
        }
        Ok(())
    }

    // ---- writes ----------------------------------------------------

    /// Opens a new run row in `running` status and returns its id.
    pub fn open_run(&self, directory: &Path, mode: ScanMode) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO scans (directory, mode, started_at, status)
             VALUES (?1, ?2, ?3, 'running')",
            params![
                directory.to_string_lossy(),
                scan_mode_str(mode),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Inserts the result row and bumps the run's denormalized counters in
    /// the same transaction. Safe under concurrent callers only if they're
    /// serialized by a single writer thread upstream.
    pub fn append_result(
        &mut self,
        scan_id: i64,
        result: &InspectionResult,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        let indicators_json = serde_json::to_string(&result.indicators)?;
        tx.execute(
            "INSERT INTO scan_results (
                scan_id, file_path, file_size, mtime, is_corrupt, verdict, confidence,
                indicators, raw_diagnostics, inspection_time_seconds, scan_mode,
                needs_deep, deep_completed, timestamp
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                scan_id,
                result.identity.path.to_string_lossy(),
                result.identity.size as i64,
                result.identity.mtime_nanos.to_string(),
                matches!(result.verdict, Verdict::Corrupt) as i64,
                verdict_str(result.verdict),
                result.confidence,
                indicators_json,
                result.raw_diagnostics,
                result.inspection_wall_clock_seconds,
                inspect_depth_str(result.scan_mode),
                result.needs_deep as i64,
                result.deep_completed as i64,
                result.timestamp.to_rfc3339(),
            ],
        )?;

        let (healthy_delta, corrupt_delta, suspicious_delta) = match result.verdict {
            Verdict::Healthy => (1, 0, 0),
            Verdict::Corrupt => (0, 1, 0),
            Verdict::Suspicious => (0, 0, 1),
        };
        tx.execute(
            "UPDATE scans SET
                processed = processed + 1,
                healthy = healthy + ?1,
                corrupt = corrupt + ?2,
                suspicious = suspicious + ?3,
                deep_needed = deep_needed + ?4,
                deep_completed = deep_completed + ?5
             WHERE id = ?6",
            params![
                healthy_delta,
                corrupt_delta,
                suspicious_delta,
                result.needs_deep as i64,
                result.deep_completed as i64,
                scan_id,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Record the discovered-file total known up front (walker output),
    /// separate from `append_result`'s per-row counters. The schema's
    /// `total` column doubles as both `discovered` and `eligible` in the
    /// in-memory [`ScanSummary`] — the run controller tracks the
    /// discovered/eligible split live and only the final total is persisted.
    pub fn set_discovered_total(
        &self,
        scan_id: i64,
        discovered: u64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE scans SET total = ?1 WHERE id = ?2",
            params![discovered as i64, scan_id],
        )?;
        Ok(())
    }

    /// Recomputes denormalized counters from `scan_results` as an authority
    /// check and fails loudly on mismatch before marking the run finalized.
    pub fn finalize_run(&self, scan_id: i64, final_status: RunStatus) -> Result<(), StoreError> {
        let exists: Option<i64> = self
            .conn
            .query_row("SELECT id FROM scans WHERE id = ?1", params![scan_id], |r| {
                r.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::ScanNotFound(scan_id));
        }

        let current_status: String = self.conn.query_row(
            "SELECT status FROM scans WHERE id = ?1",
            params![scan_id],
            |r| r.get(0),
        )?;
        if current_status != "running" {
            return Err(StoreError::AlreadyFinalized(scan_id));
        }

        let recomputed_processed: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM scan_results WHERE scan_id = ?1 AND verdict IN ('healthy','corrupt','suspicious')",
            params![scan_id],
            |r| r.get(0),
        )?;
        let stored_processed: i64 = self.conn.query_row(
            "SELECT processed FROM scans WHERE id = ?1",
            params![scan_id],
            |r| r.get(0),
        )?;
        if recomputed_processed != stored_processed {
            return Err(StoreError::CounterMismatch {
                scan_id,
                expected: stored_processed,
                actual: recomputed_processed,
            });
        }

        self.conn.execute(
            "UPDATE scans SET status = ?1, completed_at = ?2 WHERE id = ?3",
            params![
                final_status.as_str(),
                chrono::Utc::now().to_rfc3339(),
                scan_id
            ],
        )?;
        Ok(())
    }

    // ---- reads -------------------------------------------------------

    fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScanSummary> {
        let mode_str: String = row.get("mode")?;
        let status_str: String = row.get("status")?;
        let started_at: String = row.get("started_at")?;
        let completed_at: Option<String> = row.get("completed_at")?;
        Ok(ScanSummary {
            scan_id: row.get("id")?,
            directory: PathBuf::from(row.get::<_, String>("directory")?),
            mode: mode_str.parse().unwrap_or(ScanMode::Hybrid),
            discovered: row.get::<_, i64>("total")? as u64,
            eligible: row.get::<_, i64>("total")? as u64,
            processed: row.get::<_, i64>("processed")? as u64,
            healthy: row.get::<_, i64>("healthy")? as u64,
            corrupt: row.get::<_, i64>("corrupt")? as u64,
            suspicious: row.get::<_, i64>("suspicious")? as u64,
            deep_needed: row.get::<_, i64>("deep_needed")? as u64,
            deep_completed: row.get::<_, i64>("deep_completed")? as u64,
            scan_time_seconds: row.get("scan_time_seconds")?,
            started_at: chrono::DateTime::parse_from_rfc3339(&started_at)
                .map(|d| d.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now()),
            completed_at: completed_at.and_then(|s| {
                chrono::DateTime::parse_from_rfc3339(&s)
                    .ok()
                    .map(|d| d.with_timezone(&chrono::Utc))
            }),
            was_resumed: row.get::<_, i64>("was_resumed")? != 0,
            status: match status_str.as_str() {
                "completed" => RunStatus::Completed,
                "failed" => RunStatus::Failed,
                "cancelled" => RunStatus::Cancelled,
                _ => RunStatus::Running,
            },
        })
    }

    /// Most recent scans, newest first, optionally scoped to one directory.
    pub fn recent_scans(
        &self,
        limit: i64,
        directory: Option<&Path>,
    ) -> Result<Vec<ScanSummary>, StoreError> {
        let query = "SELECT * FROM scans WHERE (?1 IS NULL OR directory = ?1)
                     ORDER BY started_at DESC LIMIT ?2";
        let mut stmt = self.conn.prepare(query)?;
        let directory_str = directory.map(|p| p.to_string_lossy().to_string());
        let rows = stmt.query_map(params![directory_str, limit], Self::row_to_summary)?;
        rows.collect::<Result<_, _>>().map_err(StoreError::from)
    }

    fn row_to_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, InspectionResult)> {
        let scan_id: i64 = row.get("scan_id")?;
        let verdict_str: String = row.get("verdict")?;
        let indicators_json: String = row.get("indicators")?;
        let indicators: Vec<Indicator> = serde_json::from_str(&indicators_json).unwrap_or_default();
        let mtime: String = row.get("mtime")?;
        let timestamp: String = row.get("timestamp")?;
        let scan_mode_str: String = row.get("scan_mode")?;
        let result = InspectionResult {
            identity: crate::domain::FileIdentity {
                path: PathBuf::from(row.get::<_, String>("file_path")?),
                size: row.get::<_, i64>("file_size")? as u64,
                mtime_nanos: mtime.parse().unwrap_or(0),
            },
            verdict: parse_verdict(&verdict_str),
            confidence: row.get("confidence")?,
            scan_mode: parse_inspect_depth(&scan_mode_str),
            indicators,
            raw_diagnostics: row.get("raw_diagnostics")?,
            inspection_wall_clock_seconds: row.get("inspection_time_seconds")?,
            needs_deep: row.get::<_, i64>("needs_deep")? != 0,
            deep_completed: row.get::<_, i64>("deep_completed")? != 0,
            timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp)
                .map(|d| d.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now()),
            probe: None,
            analyzer_stderr_truncated: false,
        };
        Ok((scan_id, result))
    }

    /// Results for one scan, optionally narrowed by `filter` (its
    /// `directory_prefix` is ignored here — a scan already belongs to one
    /// directory).
    pub fn results_for(
        &self,
        scan_id: i64,
        filter: Option<&ResultFilter>,
    ) -> Result<Vec<InspectionResult>, StoreError> {
        let mut effective = filter.cloned().unwrap_or_default();
        effective.directory_prefix = None;
        let (where_clause, query_params_tail) = Self::build_where(&effective);
        let mut query_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(scan_id)];
        query_params.extend(query_params_tail);
        let sql = format!(
            "SELECT * FROM scan_results WHERE scan_id = ? AND ({where_clause}) ORDER BY id ASC{}",
            Self::limit_offset_clause(&effective)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            query_params.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_result)?;
        rows.map(|r| r.map(|(_, result)| result))
            .collect::<Result<_, _>>()
            .map_err(StoreError::from)
    }

    /// Builds a `WHERE` fragment using bare `?` placeholders. Bare `?` binds
    /// positionally to whatever parameter slice the caller passes to
    /// `query_map`, in left-to-right occurrence order — callers that splice
    /// in additional placeholders (a leading `scan_id = ?`, a trailing
    /// `directory LIKE ?`) must keep their own parameter vector in the same
    /// order as those placeholders appear in the final SQL string.
    fn build_where(filter: &ResultFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut clauses = vec!["1=1".to_string()];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.verdicts.is_empty() {
            let placeholders: Vec<&str> = filter
                .verdicts
                .iter()
                .map(|v| {
                    params.push(Box::new(verdict_str(*v).to_string()));
                    "?"
                })
                .collect();
            clauses.push(format!("verdict IN ({})", placeholders.join(",")));
        }
        if let Some(min_confidence) = filter.min_confidence {
            params.push(Box::new(min_confidence));
            clauses.push("confidence >= ?".to_string());
        }
        if let Some(since) = filter.since {
            params.push(Box::new(since.to_rfc3339()));
            clauses.push("timestamp >= ?".to_string());
        }
        if let Some(until) = filter.until {
            params.push(Box::new(until.to_rfc3339()));
            clauses.push("timestamp <= ?".to_string());
        }
        if let Some(pattern) = &filter.filename_like {
            params.push(Box::new(pattern.clone()));
            clauses.push("file_path LIKE ?".to_string());
        }
        (clauses.join(" AND "), params)
    }

    fn limit_offset_clause(filter: &ResultFilter) -> String {
        let mut clause = String::new();
        if let Some(limit) = filter.limit {
            clause.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = filter.offset {
            clause.push_str(&format!(" OFFSET {offset}"));
        }
        clause
    }

    /// Cross-scan result query, joined against `scans` for the
    /// directory-prefix clause.
    pub fn query(&self, filter: &ResultFilter) -> Result<Vec<InspectionResult>, StoreError> {
        let (where_clause, mut query_params) = Self::build_where(filter);
        let mut sql = format!(
            "SELECT scan_results.* FROM scan_results
             JOIN scans ON scans.id = scan_results.scan_id
             WHERE ({where_clause})"
        );
        if let Some(prefix) = &filter.directory_prefix {
            query_params.push(Box::new(format!("{}%", prefix.to_string_lossy())));
            sql.push_str(" AND scans.directory LIKE ?");
        }
        sql.push_str(" ORDER BY scan_results.timestamp DESC");
        sql.push_str(&Self::limit_offset_clause(filter));

        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            query_params.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_result)?;
        rows.map(|r| r.map(|(_, result)| result))
            .collect::<Result<_, _>>()
            .map_err(StoreError::from)
    }

    /// True if `identity` has a healthy result within `window_days`, matched
    /// by path, size, and mtime.
    pub fn recent_healthy(
        &self,
        identity: &crate::domain::FileIdentity,
        window_days: u32,
    ) -> Result<bool, StoreError> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(window_days as i64);
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM scan_results
             WHERE file_path = ?1 AND file_size = ?2 AND mtime = ?3
               AND verdict = 'healthy' AND timestamp >= ?4",
            params![
                identity.path.to_string_lossy(),
                identity.size as i64,
                identity.mtime_nanos.to_string(),
                cutoff.to_rfc3339(),
            ],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Daily corruption-rate aggregation over a directory's results for the
    /// trailing `days`.
    pub fn corruption_trend(
        &self,
        directory: &Path,
        days: u32,
    ) -> Result<Vec<TrendPoint>, StoreError> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days as i64);
        let mut stmt = self.conn.prepare(
            "SELECT date(scan_results.timestamp) as day,
                    COUNT(*) as total,
                    SUM(CASE WHEN scan_results.verdict = 'corrupt' THEN 1 ELSE 0 END) as corrupt
             FROM scan_results
             JOIN scans ON scans.id = scan_results.scan_id
             WHERE scans.directory = ?1 AND scan_results.timestamp >= ?2
             GROUP BY day
             ORDER BY day ASC",
        )?;
        let rows = stmt.query_map(
            params![directory.to_string_lossy(), cutoff.to_rfc3339()],
            |row| {
                let day: String = row.get("day")?;
                let total: i64 = row.get("total")?;
                let corrupt: i64 = row.get("corrupt")?;
                Ok((day, total, corrupt))
            },
        )?;

        let mut points = Vec::new();
        for row in rows {
            let (day, total, corrupt) = row?;
            let date = chrono::NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                .unwrap_or_else(|_| chrono::Utc::now().date_naive());
            let rate = if total > 0 {
                corrupt as f64 / total as f64
            } else {
                0.0
            };
            points.push(TrendPoint {
                date,
                total,
                corrupt,
                rate,
            });
        }
        Ok(points)
    }

    /// File-path set comparison between two scans of the same directory.
    pub fn compare(&self, scan_id_a: i64, scan_id_b: i64) -> Result<ScanComparison, StoreError> {
        use std::collections::HashMap;

        let results_a = self.results_for(scan_id_a, None)?;
        let results_b = self.results_for(scan_id_b, None)?;

        let map_a: HashMap<PathBuf, Verdict> = results_a
            .iter()
            .map(|r| (r.identity.path.clone(), r.verdict))
            .collect();
        let map_b: HashMap<PathBuf, Verdict> = results_b
            .iter()
            .map(|r| (r.identity.path.clone(), r.verdict))
            .collect();

        let mut comparison = ScanComparison::default();
        for (path, verdict_b) in &map_b {
            match map_a.get(path) {
                None => comparison.added.push(path.clone()),
                Some(verdict_a) => match (verdict_a, verdict_b) {
                    (Verdict::Corrupt, Verdict::Corrupt) => {
                        comparison.still_corrupt.push(path.clone())
                    }
                    (Verdict::Healthy, Verdict::Healthy) => {
                        comparison.still_healthy.push(path.clone())
                    }
                    (a, Verdict::Corrupt) if *a != Verdict::Corrupt => {
                        comparison.new_corrupt.push(path.clone())
                    }
                    (a, Verdict::Healthy) if *a != Verdict::Healthy => {
                        comparison.newly_healthy.push(path.clone())
                    }
                    _ => {}
                },
            }
        }
        for path in map_a.keys() {
            if !map_b.contains_key(path) {
                comparison.gone.push(path.clone());
            }
        }
        Ok(comparison)
    }

    // ---- retention & transfer -----------------------------------------

    /// Deletes scans (and their results, via FK cascade) older than
    /// `older_than_days` in a single transaction, then vacuums. `dry_run`
    /// reports the counts without deleting anything.
    pub fn cleanup(&mut self, older_than_days: u32, dry_run: bool) -> Result<(i64, i64), StoreError> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(older_than_days as i64);
        let cutoff_str = cutoff.to_rfc3339();

        let scans_to_delete: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM scans WHERE started_at < ?1",
            params![cutoff_str],
            |r| r.get(0),
        )?;
        let results_to_delete: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM scan_results WHERE scan_id IN
             (SELECT id FROM scans WHERE started_at < ?1)",
            params![cutoff_str],
            |r| r.get(0),
        )?;

        if dry_run {
            return Ok((scans_to_delete, results_to_delete));
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM scans WHERE started_at < ?1",
            params![cutoff_str],
        )?;
        tx.commit()?;
        self.conn.execute_batch("VACUUM;")?;
        Ok((scans_to_delete, results_to_delete))
    }

    /// Online snapshot-consistent copy of the store to `destination` via
    /// SQLite's backup API. Returns the bytes written.
    pub fn backup(&self, destination: &Path) -> Result<u64, StoreError> {
        let mut dest_conn = Connection::open(destination).map_err(|source| StoreError::Open {
            path: destination.to_path_buf(),
            source,
        })?;
        {
            let backup = rusqlite::backup::Backup::new(&self.conn, &mut dest_conn)?;
            backup.run_to_completion(5, std::time::Duration::from_millis(250), None)?;
        }
        std::fs::metadata(destination)
            .map(|m| m.len())
            .map_err(|source| StoreError::Io {
                path: destination.to_path_buf(),
                source,
            })
    }

    /// Replaces the store at `path` with `source`, moving the current file
    /// aside as `.bak` unless `force`.
    pub fn restore(path: &Path, source: &Path, force: bool) -> Result<(), StoreError> {
        if path.exists() && !force {
            let backup_path = path.with_extension("bak");
            std::fs::rename(path, &backup_path).map_err(|source_err| StoreError::Io {
                path: backup_path,
                source: source_err,
            })?;
        }
        std::fs::copy(source, path).map_err(|source_err| StoreError::Io {
            path: path.to_path_buf(),
            source: source_err,
        })?;
        Ok(())
    }

    /// Streams matching results to `writer` in the given format, without
    /// materializing beyond one row at a time's worth of intermediate
    /// serialization buffers.
    pub fn export(
        &self,
        filter: &ResultFilter,
        format: ExportFormat,
        writer: &mut impl std::io::Write,
    ) -> Result<(), StoreError> {
        let (where_clause, mut query_params) = Self::build_where(filter);
        let mut sql = format!(
            "SELECT scan_results.* FROM scan_results
             JOIN scans ON scans.id = scan_results.scan_id
             WHERE ({where_clause})"
        );
        if let Some(prefix) = &filter.directory_prefix {
            query_params.push(Box::new(format!("{}%", prefix.to_string_lossy())));
            sql.push_str(" AND scans.directory LIKE ?");
        }
        sql.push_str(" ORDER BY scan_results.timestamp ASC");
        sql.push_str(&Self::limit_offset_clause(filter));

        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            query_params.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_result)?;

        match format {
            ExportFormat::Json => {
                write!(writer, "[").map_err(|source| StoreError::Io {
                    path: PathBuf::new(),
                    source,
                })?;
                let mut first = true;
                for row in rows {
                    let (scan_id, result) = row?;
                    let export_row = ExportRow {
                        scan_id,
                        file_path: result.identity.path.to_string_lossy().into_owned(),
                        verdict: verdict_str(result.verdict).to_string(),
                        confidence: result.confidence,
                        indicator_tags: result.indicator_tags().join(","),
                        timestamp: result.timestamp.to_rfc3339(),
                    };
                    if !first {
                        write!(writer, ",").ok();
                    }
                    first = false;
                    serde_json::to_writer(&mut *writer, &export_row)?;
                }
                write!(writer, "]").ok();
            }
            ExportFormat::Csv => {
                let mut csv_writer = csv::Writer::from_writer(writer);
                for row in rows {
                    let (scan_id, result) = row?;
                    let export_row = ExportRow {
                        scan_id,
                        file_path: result.identity.path.to_string_lossy().into_owned(),
                        verdict: verdict_str(result.verdict).to_string(),
                        confidence: result.confidence,
                        indicator_tags: result.indicator_tags().join(","),
                        timestamp: result.timestamp.to_rfc3339(),
                    };
                    csv_writer.serialize(export_row)?;
                }
                csv_writer.flush().ok();
            }
            ExportFormat::Yaml => {
                let mut rows_vec = Vec::new();
                for row in rows {
                    let (scan_id, result) = row?;
                    rows_vec.push(ExportRow {
                        scan_id,
                        file_path: result.identity.path.to_string_lossy().into_owned(),
                        verdict: verdict_str(result.verdict).to_string(),
                        confidence: result.confidence,
                        indicator_tags: result.indicator_tags().join(","),
                        timestamp: result.timestamp.to_rfc3339(),
                    });
                }
                let yaml = serde_yaml::to_string(&rows_vec)?;
                writer.write_all(yaml.as_bytes()).ok();
            }
        }
        Ok(())
    }
}
