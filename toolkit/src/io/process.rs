//! Child process supervision.
//!
//! [`ProcessRunner`] is the seam between the pipeline and real processes.
//! [`NativeProcessRunner`] streams merged stdout/stderr line by line and can
//! stop the whole process tree on request. [`capture_with_timeout`]
//! captures output of short-lived probes.

use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::cancel::CancelToken;
use crate::core::command::CommandLine;
use crate::io::process_tree::{self, Signal};
use crate::io::sink::OutputSink;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Success,
    /// Non-zero exit; `code` is `None` when the process died from a signal.
    Failed { code: Option<i32> },
    /// Ended after a stop request.
    Stopped,
}

/// Runs one external command at a time on behalf of the pipeline.
pub trait ProcessRunner: Send + Sync {
    /// Run `command` to completion, forwarding each output line to `sink`.
    ///
    /// Returns `Err` only when the process could not be started or supervised.
    fn run(
        &self,
        command: &CommandLine,
        cwd: Option<&Path>,
        sink: &dyn OutputSink,
        cancel: &CancelToken,
    ) -> Result<ProcessExit>;

    /// Stop the process currently running, if any. Safe to call at any time.
    fn request_stop(&self);
}

/// Spawns real processes and tracks the active child for stop requests.
#[derive(Debug, Clone)]
pub struct NativeProcessRunner {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    active: Mutex<Option<Child>>,
    grace: Duration,
}

impl NativeProcessRunner {
    /// `grace` is how long a stopped process may take to exit before it is killed.
    pub fn new(grace: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                active: Mutex::new(None),
                grace,
            }),
        }
    }

    fn stop_active(&self) {
        let Ok(mut active) = self.shared.active.lock() else {
            warn!("process slot poisoned; cannot stop");
            return;
        };
        if let Some(child) = active.as_mut() {
            terminate_tree(child, self.shared.grace);
        }
    }

    /// Wait for the tracked child to exit without holding the slot between polls.
    fn wait_active(&self) -> Result<ExitStatus> {
        loop {
            let mut active = self
                .shared
                .active
                .lock()
                .map_err(|_| anyhow!("process slot poisoned"))?;
            let child = active
                .as_mut()
                .ok_or_else(|| anyhow!("no active process to wait for"))?;
            if let Some(status) = child.wait_timeout(POLL_INTERVAL).context("wait for process")? {
                *active = None;
                return Ok(status);
            }
            drop(active);
            thread::yield_now();
        }
    }
}

impl ProcessRunner for NativeProcessRunner {
    #[instrument(skip_all, fields(program = command.program()))]
    fn run(
        &self,
        command: &CommandLine,
        cwd: Option<&Path>,
        sink: &dyn OutputSink,
        cancel: &CancelToken,
    ) -> Result<ProcessExit> {
        let mut cmd = command.to_command();
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(argv = ?command.argv(), "spawning process");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(err = %err, "failed to spawn process");
                return Err(err).with_context(|| format!("spawn {}", command.program()));
            }
        };
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;
        info!(pid = child.id(), "process started");

        {
            let mut active = self
                .shared
                .active
                .lock()
                .map_err(|_| anyhow!("process slot poisoned"))?;
            *active = Some(child);
        }
        // A stop requested before the child was tracked found an empty slot.
        let mut stop_sent = false;
        if cancel.is_cancelled() {
            self.stop_active();
            stop_sent = true;
        }

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let stdout_handle = spawn_line_reader(stdout, tx.clone());
        let stderr_handle = spawn_line_reader(stderr, tx);

        // After a stop the loop ends at the next line or poll tick, even if an
        // escaped descendant still holds the pipes open.
        loop {
            let received = rx.recv_timeout(POLL_INTERVAL);
            if cancel.is_cancelled() {
                if !stop_sent {
                    self.stop_active();
                    stop_sent = true;
                }
                break;
            }
            match received {
                Ok(line) => sink.line(&decode_line(&line)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        drop(rx);
        if stop_sent {
            // Readers end on their next line or at EOF; a pipe held by an
            // orphan would block a join.
            debug!("detaching output readers after stop");
        } else {
            join_reader(stdout_handle).context("join stdout reader")?;
            join_reader(stderr_handle).context("join stderr reader")?;
        }

        let status = self.wait_active()?;
        let exit = if cancel.is_cancelled() {
            ProcessExit::Stopped
        } else if status.success() {
            ProcessExit::Success
        } else {
            ProcessExit::Failed {
                code: status.code(),
            }
        };
        debug!(exit_code = ?status.code(), ?exit, "process finished");
        Ok(exit)
    }

    fn request_stop(&self) {
        self.stop_active();
    }
}

/// Graceful stop of `child` and everything below it, escalating to a kill
/// after `grace`.
fn terminate_tree(child: &mut Child, grace: Duration) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    let pid = child.id();
    let tree = process_tree::descendants(pid);
    info!(pid, descendants = tree.len(), "stopping process tree");
    for descendant in &tree {
        process_tree::signal(*descendant, Signal::Terminate);
    }
    process_tree::signal(pid, Signal::Terminate);

    match child.wait_timeout(grace) {
        Ok(Some(status)) => debug!(exit_code = ?status.code(), "process exited after terminate"),
        Ok(None) => {
            warn!(pid, grace_ms = grace.as_millis(), "process ignored terminate; killing");
            if let Err(err) = child.kill() {
                warn!(pid, err = %err, "failed to kill process");
            }
            if let Err(err) = child.wait() {
                warn!(pid, err = %err, "failed to reap process");
            }
        }
        Err(err) => warn!(pid, err = %err, "failed to wait for process"),
    }
    for descendant in tree {
        process_tree::signal(descendant, Signal::Kill);
    }
}

fn spawn_line_reader<R: Read + Send + 'static>(
    reader: R,
    tx: mpsc::Sender<Vec<u8>>,
) -> thread::JoinHandle<Result<()>> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        loop {
            let mut line = Vec::new();
            let n = reader.read_until(b'\n', &mut line).context("read line")?;
            if n == 0 {
                return Ok(());
            }
            if tx.send(line).is_err() {
                return Ok(());
            }
        }
    })
}

fn join_reader(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Decode one raw output line, replacing invalid UTF-8 and trimming the line ending.
pub fn decode_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.trim_end_matches(['\n', '\r']).to_string()
}

/// Output of a short-lived command.
#[derive(Debug)]
pub struct CapturedRun {
    /// stdout followed by stderr, lossily decoded.
    pub text: String,
    pub timed_out: bool,
}

/// Run `command` until it exits or `timeout` passes, then kill it.
///
/// At most `limit` bytes of each stream are kept; the rest is drained so the
/// child never blocks on a full pipe.
#[instrument(skip_all, fields(program = command.program(), timeout_secs = timeout.as_secs()))]
pub fn capture_with_timeout(
    command: &CommandLine,
    timeout: Duration,
    limit: usize,
) -> Result<CapturedRun> {
    let mut cmd = command.to_command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(argv = ?command.argv(), "spawning capture");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, "failed to spawn capture");
            return Err(err).with_context(|| format!("spawn {}", command.program()));
        }
    };
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || read_capped(stdout, limit));
    let stderr_handle = thread::spawn(move || read_capped(stderr, limit));

    let timed_out = match child.wait_timeout(timeout).context("wait for capture")? {
        Some(_) => false,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "capture timed out; killing");
            child.kill().context("kill capture")?;
            child.wait().context("reap capture")?;
            true
        }
    };

    let mut bytes = join_capture(stdout_handle).context("join stdout")?;
    bytes.extend(join_capture(stderr_handle).context("join stderr")?);
    Ok(CapturedRun {
        text: String::from_utf8_lossy(&bytes).into_owned(),
        timed_out,
    })
}

fn join_capture(handle: thread::JoinHandle<Result<Vec<u8>>>) -> Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| anyhow!("capture reader thread panicked"))?
}

/// Keep the first `limit` bytes of `reader` and discard the rest.
fn read_capped<R: Read>(mut reader: R, limit: usize) -> Result<Vec<u8>> {
    let mut kept = Vec::new();
    (&mut reader)
        .take(limit as u64)
        .read_to_end(&mut kept)
        .context("read output")?;
    let dropped = io::copy(&mut reader, &mut io::sink()).context("drain output")?;
    if dropped > 0 {
        debug!(dropped, "capture output truncated");
    }
    Ok(kept)
}
