//! Process tree discovery and per-process signalling.
//!
//! Compilers spawn their own helpers (scons, the C compiler, ...) that are not
//! reliably in the tracked child's process group, so stopping a build walks
//! the tree below the tracked pid.
//!
//! Child enumeration is native on Linux (a scan of `/proc`). Other Unix
//! platforms fall back to `pgrep -P`, Windows to `wmic`.

use std::collections::HashSet;
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, warn};

/// Bound on recursion depth; pid reuse can in theory produce cycles.
const MAX_DEPTH: usize = 64;

static PID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\d+)\s*$").expect("pid regex should be valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the process to exit.
    Terminate,
    /// Kill without giving the process a chance to clean up.
    Kill,
}

/// Direct children of `pid`.
pub fn child_pids(pid: u32) -> Result<Vec<u32>> {
    platform_child_pids(pid)
}

/// All descendants of `pid`, deepest first, excluding `pid` itself.
///
/// Enumeration errors are logged and treated as "no children" so a stop
/// request always makes progress.
pub fn descendants(pid: u32) -> Vec<u32> {
    let mut seen = HashSet::from([pid]);
    let mut ordered = Vec::new();
    collect(pid, 0, &mut seen, &mut ordered);
    ordered
}

fn collect(pid: u32, depth: usize, seen: &mut HashSet<u32>, ordered: &mut Vec<u32>) {
    if depth >= MAX_DEPTH {
        warn!(pid, "process tree too deep; stopping walk");
        return;
    }
    let children = match child_pids(pid) {
        Ok(children) => children,
        Err(err) => {
            warn!(pid, err = %err, "failed to enumerate child processes");
            return;
        }
    };
    for child in children {
        if seen.insert(child) {
            collect(child, depth + 1, seen, ordered);
            ordered.push(child);
        }
    }
}

/// Send `signal` to a single process. Failures (e.g. already exited) are ignored.
pub fn signal(pid: u32, sig: Signal) {
    let mut cmd = signal_command(pid, sig);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    match cmd.status() {
        Ok(status) => debug!(pid, ?sig, exit_code = ?status.code(), "signalled process"),
        Err(err) => debug!(pid, ?sig, err = %err, "failed to signal process"),
    }
}

#[cfg(unix)]
fn signal_command(pid: u32, signal: Signal) -> Command {
    let flag = match signal {
        Signal::Terminate => "-TERM",
        Signal::Kill => "-KILL",
    };
    let mut cmd = Command::new("kill");
    cmd.arg(flag).arg(pid.to_string());
    cmd
}

#[cfg(windows)]
fn signal_command(pid: u32, signal: Signal) -> Command {
    let mut cmd = Command::new("taskkill");
    cmd.arg("/PID").arg(pid.to_string());
    if signal == Signal::Kill {
        cmd.arg("/F");
    }
    cmd
}

#[cfg(target_os = "linux")]
fn platform_child_pids(pid: u32) -> Result<Vec<u32>> {
    let mut children = Vec::new();
    for entry in std::fs::read_dir("/proc").context("read /proc")? {
        let Ok(entry) = entry else { continue };
        let Some(candidate) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        // Processes may exit between listing and reading.
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        if parse_stat_ppid(&stat) == Some(pid) {
            children.push(candidate);
        }
    }
    children.sort_unstable();
    Ok(children)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn platform_child_pids(pid: u32) -> Result<Vec<u32>> {
    let output = Command::new("pgrep")
        .arg("-P")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .output()
        .context("run pgrep")?;
    Ok(parse_pid_lines(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(windows)]
fn platform_child_pids(pid: u32) -> Result<Vec<u32>> {
    let output = Command::new("wmic")
        .args([
            "process",
            "where",
            &format!("(ParentProcessId={pid})"),
            "get",
            "ProcessId",
        ])
        .stdin(Stdio::null())
        .output()
        .context("run wmic")?;
    Ok(parse_pid_lines(&String::from_utf8_lossy(&output.stdout)))
}

/// Parent pid from the contents of `/proc/<pid>/stat`.
///
/// The command name may contain spaces and parentheses, so fields are read
/// after the last `)`.
pub fn parse_stat_ppid(stat: &str) -> Option<u32> {
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// Pids from tool output that prints one pid per line (headers are skipped).
pub fn parse_pid_lines(output: &str) -> Vec<u32> {
    PID_PATTERN
        .captures_iter(output)
        .filter_map(|captures| captures[1].parse().ok())
        .collect()
}
