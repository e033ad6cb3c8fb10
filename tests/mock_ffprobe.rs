//! End-to-end scenario harness driving a mock `ffprobe`/`ffmpeg` stand-in.
//! `harness = false` in `Cargo.toml`: this is a plain binary, not a `#[test]`
//! suite, because several scenarios (cancellation, resume) need to drive
//! real OS threads and timing that don't fit the default test harness well.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use corrovid::{
    AnalyzerConfig, HistoryStore, InspectDepth, InspectionResult, PoolConfig, PoolParallelism,
    RunController, RunStatus, ScanConfig, ScanMode, ScanPolicyConfig, Verdict,
};

type ScenarioResult = Result<(), String>;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("mock_ffprobe.sh");
    let mut file = fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(file, "{body}").unwrap();
    drop(file);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Dispatches on whether the invocation is a probe (`-show_streams` present)
/// or an inspect call, and counts per-file inspect invocations via a sibling
/// counter file so a script can behave differently on quick vs. deep calls.
const DISPATCH_SCRIPT: &str = r#"
is_probe=0
for arg in "$@"; do
  if [ "$arg" = "-show_streams" ]; then is_probe=1; fi
done
eval path='${'"$#"'}'
base=$(basename "$path")
dir=$(dirname "$0")

if [ "$is_probe" = "1" ]; then
  printf '{"streams":[{"index":0,"codec_type":"video","codec_name":"h264"}],"format":{"duration":"1.0","format_name":"mov,mp4"}}'
  exit 0
fi

counter_file="$dir/.count.$base"
count=0
if [ -f "$counter_file" ]; then count=$(cat "$counter_file"); fi
count=$((count + 1))
echo "$count" > "$counter_file"

case "$base" in
  a.mp4)
    exit 0
    ;;
  b.mp4)
    if [ "$count" = "1" ]; then
      echo "Non-monotonous DTS" 1>&2
      exit 0
    else
      echo "Invalid NAL unit size" 1>&2
      exit 1
    fi
    ;;
  c.mp4)
    if [ "$count" = "1" ]; then
      echo "Frame corrupt or truncated" 1>&2
      exit 1
    else
      echo "Error while decoding stream" 1>&2
      exit 1
    fi
    ;;
  corrupt.mp4)
    echo "Invalid NAL unit size" 1>&2
    echo "Invalid NAL unit size" 1>&2
    echo "Error while decoding stream" 1>&2
    exit 1
    ;;
  *)
    exit 0
    ;;
esac
"#;

fn base_config(script: PathBuf, mode: ScanMode, history_path: PathBuf, workers: usize) -> ScanConfig {
    let mut config = ScanConfig {
        analyzer: AnalyzerConfig {
            command: Some(script),
            ..Default::default()
        },
        scan: ScanPolicyConfig {
            mode,
            extensions: vec!["mp4".to_string()],
            ..Default::default()
        },
        pool: PoolConfig {
            max_workers: PoolParallelism::Fixed(workers),
            queue_capacity: Some(workers.max(1) * 2),
        },
        ..Default::default()
    };
    config.probe_cache.enabled = false;
    config.history.path = history_path;
    config
}

fn healthy_file_quick_scan() -> ScenarioResult {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), DISPATCH_SCRIPT);
    fs::write(dir.path().join("a.mp4"), b"x").unwrap();

    let config = base_config(script, ScanMode::Quick, dir.path().join("history.sqlite3"), 1);
    let summary = RunController::new(config)
        .run(dir.path(), |_| {}, Arc::new(AtomicBool::new(false)))
        .map_err(|e| e.to_string())?;

    if summary.discovered != 1 || summary.eligible != 1 || summary.processed != 1 {
        return Err(format!("unexpected counts: {summary:?}"));
    }
    if summary.healthy != 1 || summary.corrupt != 0 || summary.suspicious != 0 {
        return Err(format!("unexpected verdict tally: {summary:?}"));
    }
    if summary.status != RunStatus::Completed {
        return Err(format!("expected completed, got {:?}", summary.status));
    }
    Ok(())
}

fn corrupt_file_deep_scan() -> ScenarioResult {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), DISPATCH_SCRIPT);
    fs::write(dir.path().join("corrupt.mp4"), b"x").unwrap();

    let config = base_config(script, ScanMode::Deep, dir.path().join("history.sqlite3"), 1);
    let summary = RunController::new(config)
        .run(dir.path(), |_| {}, Arc::new(AtomicBool::new(false)))
        .map_err(|e| e.to_string())?;

    if summary.corrupt != 1 || summary.healthy != 0 {
        return Err(format!("expected exactly one corrupt result: {summary:?}"));
    }
    Ok(())
}

fn hybrid_mode_promotes_ambiguous_quick_results() -> ScenarioResult {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), DISPATCH_SCRIPT);
    fs::write(dir.path().join("a.mp4"), b"x").unwrap();
    fs::write(dir.path().join("b.mp4"), b"x").unwrap();
    fs::write(dir.path().join("c.mp4"), b"x").unwrap();

    let config = base_config(script, ScanMode::Hybrid, dir.path().join("history.sqlite3"), 2);
    let summary = RunController::new(config)
        .run(dir.path(), |_| {}, Arc::new(AtomicBool::new(false)))
        .map_err(|e| e.to_string())?;

    if summary.discovered != 3 || summary.eligible != 3 || summary.processed != 3 {
        return Err(format!("unexpected counts: {summary:?}"));
    }
    if summary.deep_needed != 2 || summary.deep_completed != 2 {
        return Err(format!(
            "expected b.mp4 and c.mp4 to be promoted to deep: {summary:?}"
        ));
    }
    // a.mp4 should settle healthy without ever running a deep pass; b/c
    // should reflect their *deep* verdicts, not their quick ones.
    let history = HistoryStore::open(&dir.path().join("history.sqlite3"), 3600).unwrap();
    let results = history.results_for(summary.scan_id, None).map_err(|e| e.to_string())?;
    let by_name = |name: &str| -> Option<&InspectionResult> {
        results
            .iter()
            .find(|r| r.identity.path.file_name().and_then(|f| f.to_str()) == Some(name))
    };
    let a = by_name("a.mp4").ok_or("missing a.mp4 result")?;
    if a.verdict != Verdict::Healthy || a.scan_mode != InspectDepth::Quick {
        return Err(format!("a.mp4 should stay a healthy quick result: {a:?}"));
    }
    let b = by_name("b.mp4").ok_or("missing b.mp4 result")?;
    if b.scan_mode != InspectDepth::Deep || b.verdict != Verdict::Corrupt {
        return Err(format!("b.mp4 should have a deep corrupt verdict: {b:?}"));
    }
    let c = by_name("c.mp4").ok_or("missing c.mp4 result")?;
    if c.scan_mode != InspectDepth::Deep || c.verdict != Verdict::Corrupt {
        return Err(format!("c.mp4 should have a deep corrupt verdict: {c:?}"));
    }
    Ok(())
}

fn incremental_mode_skips_recent_healthy_files() -> ScenarioResult {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), DISPATCH_SCRIPT);
    let history_path = dir.path().join("history.sqlite3");

    // 80 files already have a recent healthy result on file; 20 are new.
    {
        let mut history = HistoryStore::open(&history_path, 3600).unwrap();
        let scan_id = history.open_run(dir.path(), ScanMode::Quick).unwrap();
        for i in 0..80 {
            let name = format!("old_{i}.mp4");
            let path = dir.path().join(&name);
            fs::write(&path, b"x").unwrap();
            let meta = fs::metadata(&path).unwrap();
            history
                .append_result(
                    scan_id,
                    &InspectionResult {
                        identity: corrovid::FileIdentity {
                            path,
                            size: meta.len(),
                            mtime_nanos: 0,
                        },
                        verdict: Verdict::Healthy,
                        confidence: 0.0,
                        scan_mode: InspectDepth::Quick,
                        indicators: vec![],
                        raw_diagnostics: String::new(),
                        inspection_wall_clock_seconds: 0.01,
                        needs_deep: false,
                        deep_completed: false,
                        timestamp: chrono::Utc::now(),
                        probe: None,
                        analyzer_stderr_truncated: false,
                    },
                )
                .unwrap();
        }
        history.finalize_run(scan_id, RunStatus::Completed).unwrap();
    }
    for i in 0..20 {
        fs::write(dir.path().join(format!("new_{i}.mp4")), b"x").unwrap();
    }

    let mut config = base_config(script, ScanMode::Quick, history_path, 4);
    config.scan.incremental = true;
    config.scan.incremental_window_days = 7;

    let summary = RunController::new(config)
        .run(dir.path(), |_| {}, Arc::new(AtomicBool::new(false)))
        .map_err(|e| e.to_string())?;

    if summary.discovered != 100 {
        return Err(format!("expected 100 discovered, got {}", summary.discovered));
    }
    if summary.eligible != 20 || summary.processed != 20 {
        return Err(format!(
            "expected 20 eligible/processed (80 skipped as recent-healthy): {summary:?}"
        ));
    }
    Ok(())
}

fn cancellation_stops_run_and_keeps_resume_record() -> ScenarioResult {
    let dir = tempfile::tempdir().unwrap();
    // Each inspect call sleeps briefly so cancellation has a real window to
    // land mid-run rather than racing a run that finishes instantly.
    let script = write_script(
        dir.path(),
        r#"
for arg in "$@"; do
  if [ "$arg" = "-show_streams" ]; then
    printf '{"streams":[{"index":0,"codec_type":"video","codec_name":"h264"}],"format":{"duration":"1.0","format_name":"mov,mp4"}}'
    exit 0
  fi
done
sleep 0.05
exit 0
"#,
    );
    for i in 0..40 {
        fs::write(dir.path().join(format!("f_{i}.mp4")), b"x").unwrap();
    }

    let config = base_config(script, ScanMode::Quick, dir.path().join("history.sqlite3"), 4);
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_trigger = Arc::clone(&cancel);
    std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(150));
        cancel_trigger.store(true, Ordering::SeqCst);
    });

    let summary = RunController::new(config)
        .run(dir.path(), |_| {}, cancel)
        .map_err(|e| e.to_string())?;

    if summary.status != RunStatus::Cancelled {
        return Err(format!("expected cancelled status, got {:?}", summary.status));
    }
    if summary.processed == 0 {
        return Err("expected at least some results before cancellation landed".to_string());
    }
    let resume_path = dir.path().join("history.resume.json");
    if !resume_path.exists() {
        return Err("resume record should be retained after cancellation".to_string());
    }
    Ok(())
}

fn resume_after_crash_finishes_remaining_files() -> ScenarioResult {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        r#"
for arg in "$@"; do
  if [ "$arg" = "-show_streams" ]; then
    printf '{"streams":[{"index":0,"codec_type":"video","codec_name":"h264"}],"format":{"duration":"1.0","format_name":"mov,mp4"}}'
    exit 0
  fi
done
sleep 0.02
exit 0
"#,
    );
    let total_files = 60;
    for i in 0..total_files {
        fs::write(dir.path().join(format!("f_{i}.mp4")), b"x").unwrap();
    }
    let history_path = dir.path().join("history.sqlite3");

    // First run: cancel partway through to emulate a crash, leaving a
    // ResumeRecord behind.
    let config1 = base_config(script.clone(), ScanMode::Quick, history_path.clone(), 4);
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_trigger = Arc::clone(&cancel);
    std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(100));
        cancel_trigger.store(true, Ordering::SeqCst);
    });
    let first = RunController::new(config1)
        .run(dir.path(), |_| {}, cancel)
        .map_err(|e| e.to_string())?;
    if first.status != RunStatus::Cancelled {
        return Err(format!("expected first run cancelled, got {:?}", first.status));
    }
    if first.processed == 0 || first.processed >= total_files as u64 {
        return Err(format!(
            "expected a partial first run, got processed={}",
            first.processed
        ));
    }

    // Second run: same (directory, mode), should pick up the ResumeRecord
    // and finish off only the remaining files.
    let config2 = base_config(script, ScanMode::Quick, history_path, 4);
    let second = RunController::new(config2)
        .run(dir.path(), |_| {}, Arc::new(AtomicBool::new(false)))
        .map_err(|e| e.to_string())?;

    if !second.was_resumed {
        return Err("second run should report was_resumed=true".to_string());
    }
    if second.status != RunStatus::Completed {
        return Err(format!("expected second run completed, got {:?}", second.status));
    }
    let combined = first.processed + second.processed;
    if combined != total_files as u64 {
        return Err(format!(
            "expected all {total_files} files classified exactly once across both runs, got {combined}"
        ));
    }
    Ok(())
}

fn main() {
    let scenarios: Vec<(&str, fn() -> ScenarioResult)> = vec![
        ("healthy file, quick scan", healthy_file_quick_scan),
        ("corrupt file, deep scan", corrupt_file_deep_scan),
        ("hybrid mode promotion", hybrid_mode_promotes_ambiguous_quick_results),
        ("incremental skip", incremental_mode_skips_recent_healthy_files),
        ("crash then resume", resume_after_crash_finishes_remaining_files),
        ("cancellation mid-run", cancellation_stops_run_and_keeps_resume_record),
    ];

    let mut failures = 0;
    for (name, scenario) in scenarios {
        match scenario() {
            Ok(()) => println!("ok   {name}"),
            Err(err) => {
                println!("FAIL {name}: {err}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        eprintln!("{failures} scenario(s) failed");
        std::process::exit(1);
    }
}
