//! Build pipeline orchestration.
//!
//! A run walks `PreparingDeps -> Compiling -> Packaging -> Done`, skipping
//! stages the [`BuildPlan`] does not need. Any stage can end the run in
//! `Failed` or `Cancelled`. Whatever the outcome, the staging directory is
//! removed and the orchestrator returns to `Idle`.
//!
//! Only one run is active at a time. A trigger while a run is active is a
//! no-op and returns `None`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::command::CommandLine;
use crate::core::diagnostics::Diagnostics;
use crate::core::platform::Platform;
use crate::core::stage::Stage;
use crate::core::synth::{PackagingRequest, Preparation, Synthesis};
use crate::error::PipelineError;
use crate::io::packaging::{self, ArchiveOutcome};
use crate::io::process::{ProcessExit, ProcessRunner};
use crate::io::sink::OutputSink;

/// Everything a run needs, captured at trigger time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub preparation: Option<Preparation>,
    pub primary: CommandLine,
    pub output_dir: PathBuf,
    pub entry_stem: String,
    pub artifact_name: String,
    pub packaging: PackagingRequest,
    pub platform: Platform,
    /// Working directory for child processes; relative plan paths resolve here.
    pub cwd: Option<PathBuf>,
}

impl BuildPlan {
    pub fn from_synthesis(synthesis: &Synthesis) -> Self {
        Self {
            preparation: synthesis.preparation.clone(),
            primary: synthesis.primary.clone(),
            output_dir: synthesis.output_dir.clone(),
            entry_stem: synthesis.entry_stem.clone(),
            artifact_name: synthesis.artifact_name.clone(),
            packaging: synthesis.packaging,
            platform: synthesis.platform,
            cwd: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.cwd {
            Some(cwd) if path.is_relative() => cwd.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn first_stage(&self) -> Stage {
        if self.preparation.is_some() {
            Stage::PreparingDeps
        } else {
            Stage::Compiling
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// `Done`, `Failed` or `Cancelled`.
    pub terminal: Stage,
    pub failures: Vec<PipelineError>,
    /// Stages entered, in order, ending with `terminal`.
    pub transitions: Vec<Stage>,
    pub diagnostics: Diagnostics,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.terminal == Stage::Done
    }

    pub fn entered(&self, stage: Stage) -> bool {
        self.transitions.contains(&stage)
    }
}

struct Control {
    stage: Mutex<Stage>,
    cancel: CancelToken,
    stopper: Arc<dyn ProcessRunner>,
}

impl Control {
    fn stage(&self) -> MutexGuard<'_, Stage> {
        self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The stop is sent with the stage held, so it cannot reach a child of a
    /// later run.
    fn cancel(&self) -> bool {
        let stage = self.stage();
        if !stage.is_running() {
            debug!(stage = %*stage, "cancel ignored; no run active");
            return false;
        }
        self.cancel.cancel();
        info!(stage = %*stage, "cancellation requested");
        self.stopper.request_stop();
        true
    }
}

/// Cloneable handle that cancels the active run from another thread.
#[derive(Clone)]
pub struct CancelHandle {
    control: Arc<Control>,
}

impl CancelHandle {
    /// Request cancellation. Returns `false` when no run is active.
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.control.cancel.is_cancelled())
            .finish()
    }
}

/// Owns the run state machine and the runner that executes its commands.
pub struct PipelineOrchestrator<R: ProcessRunner + 'static> {
    runner: Arc<R>,
    control: Arc<Control>,
}

impl<R: ProcessRunner + 'static> PipelineOrchestrator<R> {
    pub fn new(runner: R) -> Self {
        let runner = Arc::new(runner);
        let stopper: Arc<dyn ProcessRunner> = runner.clone();
        Self {
            runner,
            control: Arc::new(Control {
                stage: Mutex::new(Stage::Idle),
                cancel: CancelToken::new(),
                stopper,
            }),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn stage(&self) -> Stage {
        *self.control.stage()
    }

    pub fn is_idle(&self) -> bool {
        self.stage() == Stage::Idle
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// Request cancellation of the active run. Returns `false` when idle.
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// Run `plan` on the calling thread. Returns `None` if a run is already active.
    pub fn run(&self, plan: &BuildPlan, sink: &dyn OutputSink) -> Option<RunReport> {
        let first = self.claim(plan)?;
        Some(self.execute(plan, sink, first))
    }

    /// Run `plan` on a background thread. Returns `None` if a run is already active.
    pub fn spawn(
        self: &Arc<Self>,
        plan: BuildPlan,
        sink: Arc<dyn OutputSink>,
    ) -> Option<JoinHandle<RunReport>> {
        let first = self.claim(&plan)?;
        let this = Arc::clone(self);
        Some(thread::spawn(move || this.execute(&plan, sink.as_ref(), first)))
    }

    fn claim(&self, plan: &BuildPlan) -> Option<Stage> {
        let mut stage = self.control.stage();
        if *stage != Stage::Idle {
            info!(stage = %*stage, "build already running; trigger ignored");
            return None;
        }
        let first = plan.first_stage();
        self.control.cancel.reset();
        *stage = first;
        info!(stage = %first, "run started");
        Some(first)
    }

    #[instrument(skip_all, fields(entry = %plan.entry_stem))]
    fn execute(&self, plan: &BuildPlan, sink: &dyn OutputSink, first: Stage) -> RunReport {
        let _guard = RunGuard {
            control: &self.control,
            staging: plan
                .preparation
                .as_ref()
                .map(|preparation| plan.resolve(&preparation.staging_dir)),
        };
        let mut run = Run {
            control: &self.control,
            transitions: vec![first],
            failures: Vec::new(),
            diagnostics: Diagnostics::default(),
        };
        let terminal = self.drive(plan, sink, &mut run);
        let terminal = run.finish(terminal);
        match terminal {
            Stage::Done => sink.section("Mission Completed"),
            Stage::Cancelled => sink.section("Cancelled"),
            _ => {
                for failure in &run.failures {
                    sink.line(&failure.to_string());
                }
                sink.section("Error");
            }
        }
        RunReport {
            terminal,
            failures: run.failures,
            transitions: run.transitions,
            diagnostics: run.diagnostics,
        }
    }

    /// Run every stage and return the terminal stage.
    fn drive(&self, plan: &BuildPlan, sink: &dyn OutputSink, run: &mut Run<'_>) -> Stage {
        let output_dir = plan.resolve(&plan.output_dir);
        if let Err(err) = fs::create_dir_all(&output_dir) {
            run.failures.push(PipelineError::Setup {
                message: format!("create output directory {}: {err}", output_dir.display()),
            });
            return Stage::Failed;
        }

        if let Some(preparation) = &plan.preparation {
            if self.control.cancel.is_cancelled() {
                return Stage::Cancelled;
            }
            sink.section("\"pip install\" Start");
            sink.line(&preparation.command.display_for(plan.platform));
            if let Some(terminal) =
                self.run_stage(Stage::PreparingDeps, &preparation.command, plan, sink, run)
            {
                return terminal;
            }
            sink.section("\"pip install\" Finished");
            run.enter(Stage::Compiling);
        }

        if self.control.cancel.is_cancelled() {
            return Stage::Cancelled;
        }
        sink.section("Build Start");
        sink.line(&plan.primary.display_for(plan.platform));
        if let Some(terminal) = self.run_stage(Stage::Compiling, &plan.primary, plan, sink, run) {
            return terminal;
        }
        sink.section("Build Success");

        if plan.packaging.any() {
            if self.control.cancel.is_cancelled() {
                return Stage::Cancelled;
            }
            run.enter(Stage::Packaging);
            if !package(plan, &output_dir, sink, run, &self.control.cancel) {
                return Stage::Cancelled;
            }
            if !run.failures.is_empty() {
                return Stage::Failed;
            }
        }
        Stage::Done
    }

    /// Run one command. Returns the terminal stage if the run must stop here.
    fn run_stage(
        &self,
        stage: Stage,
        command: &CommandLine,
        plan: &BuildPlan,
        sink: &dyn OutputSink,
        run: &mut Run<'_>,
    ) -> Option<Stage> {
        let cwd = plan.cwd.as_deref();
        match self.runner.run(command, cwd, sink, &self.control.cancel) {
            Ok(ProcessExit::Success) => None,
            Ok(ProcessExit::Stopped) => Some(Stage::Cancelled),
            Ok(ProcessExit::Failed { code }) => {
                if self.control.cancel.is_cancelled() {
                    return Some(Stage::Cancelled);
                }
                warn!(%stage, exit_code = ?code, "stage failed");
                run.failures
                    .push(PipelineError::StageFailure { stage, code });
                Some(Stage::Failed)
            }
            Err(err) => {
                run.failures.push(PipelineError::Spawn {
                    stage,
                    message: format!("{err:#}"),
                });
                Some(Stage::Failed)
            }
        }
    }
}

/// Launcher first, then archive. Each step's failure is recorded without
/// stopping the other. Returns `false` if the run was cancelled in between.
fn package(
    plan: &BuildPlan,
    output_dir: &Path,
    sink: &dyn OutputSink,
    run: &mut Run<'_>,
    cancel: &CancelToken,
) -> bool {
    let mut launcher = None;
    if plan.packaging.launcher {
        match packaging::write_launcher(
            output_dir,
            &plan.entry_stem,
            &plan.artifact_name,
            plan.platform,
        ) {
            Ok(path) => {
                sink.line(&format!("launcher written: {}", path.display()));
                launcher = Some(path);
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "launcher step failed");
                run.failures.push(PipelineError::Packaging {
                    step: "launcher".to_string(),
                    message: format!("{err:#}"),
                });
            }
        }
    }

    if cancel.is_cancelled() {
        return false;
    }

    if plan.packaging.archive {
        sink.section("Compress Start");
        match packaging::create_archive(output_dir, &plan.entry_stem, launcher.as_deref()) {
            Ok(ArchiveOutcome::Created(path)) => {
                sink.line(&format!("archive written: {}", path.display()));
                sink.section("Compress Finished");
            }
            Ok(ArchiveOutcome::Skipped { missing }) => {
                let message = format!(
                    "archive skipped: artifact directory {} does not exist",
                    missing.display()
                );
                sink.line(&message);
                run.diagnostics.note(message);
                sink.section("Compress Skipped");
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "archive step failed");
                run.failures.push(PipelineError::Packaging {
                    step: "archive".to_string(),
                    message: format!("{err:#}"),
                });
            }
        }
    }
    true
}

struct Run<'a> {
    control: &'a Control,
    transitions: Vec<Stage>,
    failures: Vec<PipelineError>,
    diagnostics: Diagnostics,
}

impl Run<'_> {
    fn enter(&mut self, next: Stage) {
        let control = self.control;
        self.advance(control.stage(), next);
    }

    /// Enter the terminal stage. A cancel accepted while the run was still
    /// active turns `Done` into `Cancelled`.
    fn finish(&mut self, terminal: Stage) -> Stage {
        debug_assert!(terminal.is_terminal());
        let control = self.control;
        let stage = control.stage();
        let terminal = if terminal == Stage::Done && control.cancel.is_cancelled() {
            Stage::Cancelled
        } else {
            terminal
        };
        self.advance(stage, terminal);
        terminal
    }

    fn advance(&mut self, mut stage: MutexGuard<'_, Stage>, next: Stage) {
        if !stage.can_transition_to(next) {
            warn!(from = %*stage, to = %next, "unexpected stage transition");
        }
        info!(from = %*stage, to = %next, "stage transition");
        *stage = next;
        self.transitions.push(next);
    }
}

/// Removes the staging directory and returns the orchestrator to `Idle`,
/// also when the run unwinds.
struct RunGuard<'a> {
    control: &'a Control,
    staging: Option<PathBuf>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Some(staging) = &self.staging {
            match fs::remove_dir_all(staging) {
                Ok(()) => debug!(path = %staging.display(), "staging directory removed"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %staging.display(), err = %err, "failed to remove staging directory");
                }
            }
        }
        let mut stage = self.control.stage();
        debug!(from = %*stage, "returning to idle");
        *stage = Stage::Idle;
    }
}
