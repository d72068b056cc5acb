//! Compiler availability probe.
//!
//! Runs `<interpreter> -m <compiler> --version` and classifies the output. The
//! compiler asks before downloading a missing C compiler; with stdin closed
//! that prompt ends the probe and is reported as [`ProbeStatus::MissingCCompiler`].

use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::command::{CommandBuilder, CommandLine};
use crate::core::synth::Toolchain;
use crate::io::process::{ProcessExit, ProcessRunner, capture_with_timeout};
use crate::io::sink::OutputSink;

pub const DOWNLOAD_PROMPT: &str = "Is it OK to download and put it in";
pub const DOWNLOAD_FAILURE: &str = "Failed to download";

const PROBE_OUTPUT_LIMIT: usize = 64 * 1024;

static LINE_BREAKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\r\n]+").expect("line break regex should be valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Ready { version: String },
    /// The compiler runs but wants to download a C compiler first.
    MissingCCompiler { output: String },
    Unavailable { reason: String },
}

/// `--version` invocation, optionally answering download prompts with yes.
pub fn version_command(toolchain: &Toolchain, assume_yes: bool) -> CommandLine {
    let mut builder =
        CommandBuilder::new(&toolchain.interpreter).module(&toolchain.compiler_module);
    builder.switch("--version");
    if assume_yes {
        builder.switch("--assume-yes-for-downloads");
    }
    builder.build().0
}

/// Classify captured `--version` output.
pub fn classify(output: &str) -> ProbeStatus {
    let text = LINE_BREAKS.replace_all(output, "\n").trim().to_string();
    if text.is_empty() {
        ProbeStatus::Unavailable {
            reason: "compiler produced no output".to_string(),
        }
    } else if text.contains(DOWNLOAD_PROMPT) {
        ProbeStatus::MissingCCompiler { output: text }
    } else {
        ProbeStatus::Ready { version: text }
    }
}

#[instrument(skip_all, fields(interpreter = %toolchain.interpreter))]
pub fn probe_compiler(toolchain: &Toolchain, timeout: Duration) -> ProbeStatus {
    let command = version_command(toolchain, false);
    let output = match capture_with_timeout(&command, timeout, PROBE_OUTPUT_LIMIT) {
        Ok(output) => output,
        Err(err) => {
            warn!(err = %err, "compiler probe failed to run");
            return ProbeStatus::Unavailable {
                reason: format!("{err:#}"),
            };
        }
    };
    let status = classify(&output.text);
    if output.timed_out && !matches!(status, ProbeStatus::MissingCCompiler { .. }) {
        return ProbeStatus::Unavailable {
            reason: format!("compiler probe timed out after {}s", timeout.as_secs()),
        };
    }
    info!(?status, "compiler probe finished");
    status
}

/// Rerun the probe accepting downloads, streaming its output to `sink`.
///
/// Fails when the command fails or any line reports a download failure.
#[instrument(skip_all)]
pub fn download_c_compiler(
    runner: &dyn ProcessRunner,
    toolchain: &Toolchain,
    sink: &dyn OutputSink,
    cancel: &CancelToken,
) -> Result<()> {
    let watch = FailureWatch {
        inner: sink,
        failed: AtomicBool::new(false),
    };
    let command = version_command(toolchain, true);
    let exit = runner.run(&command, None, &watch, cancel)?;
    if watch.failed.load(Ordering::SeqCst) {
        bail!("failed to download the C compiler; see the log and install it manually");
    }
    match exit {
        ProcessExit::Success => Ok(()),
        ProcessExit::Failed { code } => bail!("compiler download exited with code {code:?}"),
        ProcessExit::Stopped => bail!("compiler download cancelled"),
    }
}

struct FailureWatch<'a> {
    inner: &'a dyn OutputSink,
    failed: AtomicBool,
}

impl OutputSink for FailureWatch<'_> {
    fn line(&self, line: &str) {
        if line.contains(DOWNLOAD_FAILURE) {
            self.failed.store(true, Ordering::SeqCst);
        }
        self.inner.line(line);
    }
}
