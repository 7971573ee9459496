//! Helpers for running child processes with timeouts and line-streamed output.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, instrument};
use wait_timeout::ChildExt;

use crate::io::tee::Tee;

/// How a child process ended.
#[derive(Debug)]
pub struct CommandOutcome {
    pub status: ExitStatus,
    pub timed_out: bool,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

/// Run a command with a timeout, forwarding each stdout/stderr line to `tee`.
///
/// Both pipes are drained concurrently while the child runs, so a chatty
/// child cannot deadlock on a full pipe. If `capture_path` is `Some`, every
/// forwarded line is also appended to that file (created fresh, flushed per line).
///
/// The child leads its own process group; on timeout the whole group is
/// killed, so pipeline stages holding the output pipes die with it.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), capturing = capture_path.is_some()))]
pub fn run_command_streaming(
    mut cmd: Command,
    tee: &Tee,
    timeout: Duration,
    capture_path: Option<&Path>,
) -> Result<CommandOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let capture = match capture_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create capture dir {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("create capture file {}", path.display()))?;
            Some(Mutex::new(BufWriter::new(file)))
        }
        None => None,
    };

    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let capture = capture.as_ref();
    let (status, timed_out) = thread::scope(|scope| -> Result<(ExitStatus, bool)> {
        let stdout_handle = scope.spawn(move || forward_lines(stdout, tee, capture));
        let stderr_handle = scope.spawn(move || forward_lines(stderr, tee, capture));

        let mut timed_out = false;
        let status = match child.wait_timeout(timeout).context("wait for command")? {
            Some(status) => status,
            None => {
                debug!(
                    timeout_secs = timeout.as_secs(),
                    "command timed out, killing process group"
                );
                timed_out = true;
                kill_process_group(&mut child)?;
                child.wait().context("wait command after kill")?
            }
        };

        join_forwarder(stdout_handle).context("forward stdout")?;
        join_forwarder(stderr_handle).context("forward stderr")?;
        Ok((status, timed_out))
    })?;

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutcome { status, timed_out })
}

fn kill_process_group(child: &mut Child) -> Result<()> {
    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        // Group already gone.
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(err) => Err(err).context("kill process group"),
    }
}

fn join_forwarder(handle: thread::ScopedJoinHandle<'_, Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output forwarder thread panicked")),
    }
}

/// Forward a stream line by line to the tee (and optional capture file).
///
/// The stream is read to EOF even after a write fails, so the child never
/// blocks on a full pipe; the first failure is returned at the end.
fn forward_lines<R: Read>(
    reader: R,
    tee: &Tee,
    capture: Option<&Mutex<BufWriter<File>>>,
) -> Result<()> {
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    let mut first_err: Option<anyhow::Error> = None;

    loop {
        raw.clear();
        let n = reader.read_until(b'\n', &mut raw).context("read line")?;
        if n == 0 {
            break;
        }
        if first_err.is_some() {
            continue;
        }

        if let Some(mutex) = capture {
            let written = match mutex.lock() {
                Ok(mut writer) => writer
                    .write_all(&raw)
                    .and_then(|()| writer.flush())
                    .context("write capture file"),
                Err(_) => Err(anyhow!("capture file lock poisoned")),
            };
            if let Err(err) = written {
                first_err = Some(err);
                continue;
            }
        }

        let line = String::from_utf8_lossy(&raw);
        if let Err(err) = tee.line(&line) {
            first_err = Some(err);
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
