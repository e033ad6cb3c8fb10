//! Subprocess execution with a wall-clock timeout and bounded output
//! capture. Captures stdout and/or stderr and reports a truncation
//! sentinel instead of silently dropping overflow.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Output captured from a child process, bounded per `cap_bytes`.
#[derive(Debug, Default)]
pub(crate) struct CapturedStream {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

pub(crate) struct CommandOutcome {
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
}

fn spawn_capture_thread(
    stream: Option<impl Read + Send + 'static>,
    cap_bytes: usize,
) -> std::thread::JoinHandle<CapturedStream> {
    std::thread::spawn(move || {
        let Some(mut stream) = stream else {
            return CapturedStream::default();
        };
        let mut captured = Vec::new();
        let mut truncated = false;
        let mut buf = [0u8; 8192];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };
            if captured.len() < cap_bytes {
                let remaining = cap_bytes - captured.len();
                let to_copy = remaining.min(n);
                captured.extend_from_slice(&buf[..to_copy]);
                if to_copy < n {
                    truncated = true;
                }
            } else {
                truncated = true;
            }
        }
        CapturedStream {
            bytes: captured,
            truncated,
        }
    })
}

/// Run `cmd` to completion, until `timeout` elapses, or until `cancel` flips
/// true, capturing stdout and stderr independently up to `cap_bytes` each.
/// On timeout or cancellation the child is killed and `timed_out` is set —
/// never a spurious success. Polling `cancel` on the same cadence as the
/// timeout check bounds cancellation latency to one poll tick instead of
/// the child's full timeout.
pub(crate) fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    cap_bytes: usize,
    cancel: &AtomicBool,
) -> std::io::Result<CommandOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child: Child = cmd.spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_handle = spawn_capture_thread(stdout, cap_bytes);
    let stderr_handle = spawn_capture_thread(stderr, cap_bytes);

    let start = Instant::now();
    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if start.elapsed() >= timeout || cancel.load(Ordering::SeqCst) {
            timed_out = true;
            drop(child.kill());
            break child.wait().ok();
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutcome {
        status,
        timed_out,
        stdout,
        stderr,
    })
}
