//! Test-only helpers: a scripted process runner and plan builders.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

use crate::core::cancel::CancelToken;
use crate::core::command::{CommandBuilder, CommandLine};
use crate::core::platform::Platform;
use crate::core::synth::{PackagingRequest, Preparation};
use crate::io::process::{ProcessExit, ProcessRunner};
use crate::io::sink::OutputSink;
use crate::pipeline::BuildPlan;

/// Upper bound on how long a blocking scripted run waits for a stop.
const BLOCK_LIMIT: Duration = Duration::from_secs(10);

/// One scripted response of [`ScriptedProcessRunner`].
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub lines: Vec<String>,
    pub exit: ProcessExit,
    /// Wait for cancellation after emitting `lines`, then report `Stopped`.
    pub block_until_stopped: bool,
    /// Directory created before output is emitted (simulates an installer).
    pub creates_dir: Option<PathBuf>,
    /// Fail to start instead of running.
    pub spawn_error: Option<String>,
}

impl ScriptedRun {
    pub fn lines(exit: ProcessExit, lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(ToString::to_string).collect(),
            exit,
            block_until_stopped: false,
            creates_dir: None,
            spawn_error: None,
        }
    }

    pub fn success() -> Self {
        Self::lines(ProcessExit::Success, &[])
    }

    pub fn exit_code(code: i32) -> Self {
        Self::lines(ProcessExit::Failed { code: Some(code) }, &[])
    }

    /// Emit `lines`, then block until the run is cancelled.
    pub fn blocking(lines: &[&str]) -> Self {
        Self {
            block_until_stopped: true,
            ..Self::lines(ProcessExit::Stopped, lines)
        }
    }

    pub fn spawn_error(message: &str) -> Self {
        Self {
            spawn_error: Some(message.to_string()),
            ..Self::success()
        }
    }

    pub fn creating(mut self, dir: impl Into<PathBuf>) -> Self {
        self.creates_dir = Some(dir.into());
        self
    }
}

/// [`ProcessRunner`] that replays [`ScriptedRun`]s in order and records commands.
#[derive(Debug, Default)]
pub struct ScriptedProcessRunner {
    script: Mutex<VecDeque<ScriptedRun>>,
    commands: Mutex<Vec<CommandLine>>,
    stops: AtomicUsize,
}

impl ScriptedProcessRunner {
    pub fn new(script: Vec<ScriptedRun>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            commands: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        }
    }

    /// Commands received so far, in order.
    pub fn commands(&self) -> Vec<CommandLine> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }

    pub fn stop_requests(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl ProcessRunner for ScriptedProcessRunner {
    fn run(
        &self,
        command: &CommandLine,
        _cwd: Option<&Path>,
        sink: &dyn OutputSink,
        cancel: &CancelToken,
    ) -> Result<ProcessExit> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.clone());
        }
        let next = self
            .script
            .lock()
            .map_err(|_| anyhow!("script poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted run left for {}", command.program()))?;

        if let Some(message) = next.spawn_error {
            return Err(anyhow!("spawn {}: {message}", command.program()));
        }
        if let Some(dir) = &next.creates_dir {
            fs::create_dir_all(dir)?;
            fs::write(dir.join("installed.txt"), "scripted")?;
        }
        for line in &next.lines {
            sink.line(line);
        }
        if next.block_until_stopped {
            let deadline = Instant::now() + BLOCK_LIMIT;
            while !cancel.is_cancelled() {
                if Instant::now() >= deadline {
                    return Ok(ProcessExit::Failed { code: None });
                }
                thread::sleep(Duration::from_millis(5));
            }
            return Ok(ProcessExit::Stopped);
        }
        Ok(next.exit)
    }

    fn request_stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Primary-only plan compiling `main.py` into `output_dir` on Linux.
pub fn plan(output_dir: &Path) -> BuildPlan {
    let mut builder = CommandBuilder::new("python3").module("nuitka");
    builder.switch("--standalone");
    builder.valued("--output-dir", output_dir.to_string_lossy());
    let (primary, _) = builder.finish("main.py");
    BuildPlan {
        preparation: None,
        primary,
        output_dir: output_dir.to_path_buf(),
        entry_stem: "main".to_string(),
        artifact_name: "app".to_string(),
        packaging: PackagingRequest::default(),
        platform: Platform::Linux,
        cwd: None,
    }
}

/// [`plan`] with a dependency install staged into `<output_dir>/main.pips`.
pub fn plan_with_preparation(output_dir: &Path) -> BuildPlan {
    let staging_dir = output_dir.join("main.pips");
    let mut builder = CommandBuilder::new("python3").module("pip");
    builder.raw("install");
    builder.raw("requests");
    builder.raw("-t");
    builder.raw(staging_dir.to_string_lossy());
    BuildPlan {
        preparation: Some(Preparation {
            command: builder.build().0,
            staging_dir,
        }),
        ..plan(output_dir)
    }
}

/// Temporary directory holding one test's output tree.
#[derive(Debug)]
pub struct TestWorkspace {
    pub dir: tempfile::TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("nuitka_output")
    }

    /// Create `<output>/<stem>.dist` with a placeholder executable.
    pub fn create_artifact_dir(&self, stem: &str, artifact: &str) -> Result<PathBuf> {
        let dist = self.output_dir().join(format!("{stem}.dist"));
        fs::create_dir_all(&dist)?;
        fs::write(dist.join(artifact), "#!/bin/sh\n")?;
        Ok(dist)
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
