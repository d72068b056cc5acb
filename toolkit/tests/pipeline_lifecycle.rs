//! Orchestrator lifecycle tests.
//!
//! Most scenarios drive `PipelineOrchestrator` through a scripted runner so
//! stage transitions, cancellation and cleanup can be checked without a
//! compiler. The `real_process` module runs `sh` children on Unix.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use nuitka_toolkit::core::platform::Platform;
use nuitka_toolkit::core::stage::Stage;
use nuitka_toolkit::core::state::ConfigurationState;
use nuitka_toolkit::core::synth::{CommandSynthesizer, PackagingRequest, Toolchain, Trigger};
use nuitka_toolkit::error::PipelineError;
use nuitka_toolkit::io::process::ProcessExit;
use nuitka_toolkit::io::sink::{BufferedSink, OutputSink};
use nuitka_toolkit::pipeline::{BuildPlan, CancelHandle, PipelineOrchestrator};
use nuitka_toolkit::test_support::{
    ScriptedProcessRunner, ScriptedRun, TestWorkspace, plan, plan_with_preparation, wait_for,
};

const WAIT: Duration = Duration::from_secs(5);

fn toolchain() -> Toolchain {
    Toolchain {
        interpreter: "python3".to_string(),
        compiler_module: "nuitka".to_string(),
        installer_module: "pip".to_string(),
    }
}

fn all_packaging() -> PackagingRequest {
    PackagingRequest {
        archive: true,
        launcher: true,
    }
}

/// Cancel while the compiler runs: no packaging, staging removed, back to idle.
#[test]
fn cancel_mid_compile_skips_packaging_and_cleans_staging() {
    let workspace = TestWorkspace::new().expect("workspace");
    let output = workspace.output_dir();
    let mut plan = plan_with_preparation(&output);
    plan.packaging = all_packaging();
    let staging = output.join("main.pips");

    let runner = ScriptedProcessRunner::new(vec![
        ScriptedRun::lines(ProcessExit::Success, &["Successfully installed requests"])
            .creating(&staging),
        ScriptedRun::blocking(&["Nuitka-Options: Used command line options"]),
    ]);
    let orchestrator = Arc::new(PipelineOrchestrator::new(runner));
    let sink = BufferedSink::new();
    let shared: Arc<dyn OutputSink> = Arc::new(sink.clone());

    let handle = orchestrator.spawn(plan, shared).expect("spawn");
    assert!(wait_for(WAIT, || {
        orchestrator.stage() == Stage::Compiling
            && sink
                .snapshot()
                .iter()
                .any(|line| line.contains("Nuitka-Options"))
    }));
    assert!(staging.is_dir(), "staging exists while compiling");

    assert!(orchestrator.cancel());
    let report = handle.join().expect("join");

    assert_eq!(report.terminal, Stage::Cancelled);
    assert_eq!(
        report.transitions,
        vec![Stage::PreparingDeps, Stage::Compiling, Stage::Cancelled]
    );
    assert!(!report.entered(Stage::Packaging));
    assert!(report.failures.is_empty());
    assert!(!staging.exists(), "staging removed after cancel");
    assert!(orchestrator.runner().stop_requests() >= 1);
    assert!(orchestrator.is_idle());
    assert!(!output.join("main.tar.zst").exists());
}

#[test]
fn preparation_failure_never_compiles() {
    let workspace = TestWorkspace::new().expect("workspace");
    let output = workspace.output_dir();
    let staging = output.join("main.pips");
    let runner = ScriptedProcessRunner::new(vec![
        ScriptedRun::lines(
            ProcessExit::Failed { code: Some(1) },
            &["ERROR: No matching distribution found for nosuchpkg"],
        )
        .creating(&staging),
    ]);
    let orchestrator = PipelineOrchestrator::new(runner);
    let sink = BufferedSink::new();

    let report = orchestrator
        .run(&plan_with_preparation(&output), &sink)
        .expect("run");

    assert_eq!(report.terminal, Stage::Failed);
    assert!(!report.entered(Stage::Compiling));
    assert_eq!(
        report.failures,
        vec![PipelineError::StageFailure {
            stage: Stage::PreparingDeps,
            code: Some(1),
        }]
    );
    assert_eq!(orchestrator.runner().commands().len(), 1);
    assert!(!staging.exists(), "partial staging removed");
    let lines = sink.drain();
    assert!(lines.iter().any(|line| line.contains("Error")));
    assert!(!lines.iter().any(|line| line.contains("Build Start")));
}

#[test]
fn compile_failure_never_packages() {
    let workspace = TestWorkspace::new().expect("workspace");
    let output = workspace.output_dir();
    workspace.create_artifact_dir("main", "app").expect("dist");
    let mut plan = plan(&output);
    plan.packaging = all_packaging();
    let orchestrator =
        PipelineOrchestrator::new(ScriptedProcessRunner::new(vec![ScriptedRun::exit_code(2)]));

    let report = orchestrator.run(&plan, &BufferedSink::new()).expect("run");

    assert_eq!(report.terminal, Stage::Failed);
    assert!(!report.entered(Stage::Packaging));
    assert!(!output.join("main.sh").exists());
    assert!(!output.join("main.tar.zst").exists());
}

/// A failed launcher write still lets the archive step run; the run fails.
#[test]
fn packaging_steps_fail_independently() {
    let workspace = TestWorkspace::new().expect("workspace");
    let output = workspace.output_dir();
    workspace.create_artifact_dir("main", "app").expect("dist");
    // A directory where the launcher should go makes the write fail.
    fs::create_dir_all(output.join("main.sh")).expect("blocker");
    let mut plan = plan(&output);
    plan.packaging = all_packaging();
    let orchestrator =
        PipelineOrchestrator::new(ScriptedProcessRunner::new(vec![ScriptedRun::success()]));
    let sink = BufferedSink::new();

    let report = orchestrator.run(&plan, &sink).expect("run");

    assert_eq!(report.terminal, Stage::Failed);
    assert!(report.entered(Stage::Packaging));
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        &report.failures[0],
        PipelineError::Packaging { step, .. } if step == "launcher"
    ));
    assert!(output.join("main.tar.zst").is_file(), "archive still written");
    let lines = sink.drain();
    assert!(lines.iter().any(|line| line.contains("Compress Finished")));
    assert!(!lines.iter().any(|line| line.contains("Mission Completed")));
}

#[test]
fn packaging_writes_launcher_and_archive() {
    let workspace = TestWorkspace::new().expect("workspace");
    let output = workspace.output_dir();
    workspace.create_artifact_dir("main", "app").expect("dist");
    let mut plan = plan(&output);
    plan.packaging = all_packaging();
    let orchestrator =
        PipelineOrchestrator::new(ScriptedProcessRunner::new(vec![ScriptedRun::success()]));

    let report = orchestrator.run(&plan, &BufferedSink::new()).expect("run");

    assert!(report.succeeded());
    assert_eq!(
        report.transitions,
        vec![Stage::Compiling, Stage::Packaging, Stage::Done]
    );
    let launcher = fs::read_to_string(output.join("main.sh")).expect("launcher");
    assert!(launcher.contains("main.dist"));
    assert!(launcher.contains("exec ./app"));
    assert!(output.join("main.tar.zst").is_file());
}

/// Requests cancellation when a given section separator is written.
struct CancelOnSection {
    inner: BufferedSink,
    title: &'static str,
    handle: OnceLock<CancelHandle>,
    accepted: AtomicBool,
}

impl OutputSink for CancelOnSection {
    fn line(&self, line: &str) {
        self.inner.line(line);
    }

    fn section(&self, title: &str) {
        self.inner.section(title);
        if title == self.title
            && let Some(handle) = self.handle.get()
        {
            self.accepted.store(handle.cancel(), Ordering::SeqCst);
        }
    }
}

/// A cancel accepted while packaging ends the run as cancelled, not done.
#[test]
fn cancel_during_packaging_is_not_reported_as_done() {
    let workspace = TestWorkspace::new().expect("workspace");
    let output = workspace.output_dir();
    workspace.create_artifact_dir("main", "app").expect("dist");
    let mut plan = plan(&output);
    plan.packaging = PackagingRequest {
        archive: true,
        launcher: false,
    };
    let orchestrator =
        PipelineOrchestrator::new(ScriptedProcessRunner::new(vec![ScriptedRun::success()]));
    let sink = CancelOnSection {
        inner: BufferedSink::new(),
        title: "Compress Start",
        handle: OnceLock::new(),
        accepted: AtomicBool::new(false),
    };
    sink.handle
        .set(orchestrator.cancel_handle())
        .expect("handle set once");

    let report = orchestrator.run(&plan, &sink).expect("run");

    assert!(sink.accepted.load(Ordering::SeqCst));
    assert_eq!(report.terminal, Stage::Cancelled);
    assert!(report.terminal.is_terminal());
    assert_eq!(
        report.transitions,
        vec![Stage::Compiling, Stage::Packaging, Stage::Cancelled]
    );
    assert!(report.failures.is_empty());
    assert!(orchestrator.is_idle());
    let lines = sink.inner.drain();
    assert!(!lines.iter().any(|line| line.contains("Mission Completed")));
    assert!(lines.last().is_some_and(|line| line.contains("Cancelled")));
}

#[test]
fn missing_artifact_dir_skips_archive_with_note() {
    let workspace = TestWorkspace::new().expect("workspace");
    let output = workspace.output_dir();
    let mut plan = plan(&output);
    plan.packaging = PackagingRequest {
        archive: true,
        launcher: false,
    };
    let orchestrator =
        PipelineOrchestrator::new(ScriptedProcessRunner::new(vec![ScriptedRun::success()]));
    let sink = BufferedSink::new();

    let report = orchestrator.run(&plan, &sink).expect("run");

    assert!(report.succeeded());
    assert!(report.diagnostics.mentions("archive skipped"));
    assert!(sink.drain().iter().any(|line| line.contains("Compress Skipped")));
    assert!(!output.join("main.tar.zst").exists());
}

/// A trigger while a run is active is ignored.
#[test]
fn trigger_while_running_is_a_no_op() {
    let workspace = TestWorkspace::new().expect("workspace");
    let output = workspace.output_dir();
    let runner = ScriptedProcessRunner::new(vec![ScriptedRun::blocking(&["compiling"])]);
    let orchestrator = Arc::new(PipelineOrchestrator::new(runner));
    let sink: Arc<dyn OutputSink> = Arc::new(BufferedSink::new());

    let handle = orchestrator
        .spawn(plan(&output), Arc::clone(&sink))
        .expect("first spawn");
    assert!(wait_for(WAIT, || orchestrator.runner().commands().len() == 1));

    assert!(orchestrator.run(&plan(&output), sink.as_ref()).is_none());
    assert!(orchestrator.spawn(plan(&output), Arc::clone(&sink)).is_none());
    assert_eq!(orchestrator.runner().commands().len(), 1);

    assert!(orchestrator.cancel_handle().cancel());
    let report = handle.join().expect("join");
    assert_eq!(report.terminal, Stage::Cancelled);
    assert!(orchestrator.is_idle());
    assert!(!orchestrator.cancel(), "cancel after the run is a no-op");
}

#[test]
fn orchestrator_is_reusable_after_each_outcome() {
    let workspace = TestWorkspace::new().expect("workspace");
    let output = workspace.output_dir();
    let runner = ScriptedProcessRunner::new(vec![
        ScriptedRun::exit_code(1),
        ScriptedRun::success(),
    ]);
    let orchestrator = PipelineOrchestrator::new(runner);
    let sink = BufferedSink::new();

    let first = orchestrator.run(&plan(&output), &sink).expect("first run");
    assert_eq!(first.terminal, Stage::Failed);
    assert!(orchestrator.is_idle());

    let second = orchestrator.run(&plan(&output), &sink).expect("second run");
    assert_eq!(second.terminal, Stage::Done);
}

/// A synthesized plan with pip arguments stages dependencies, then compiles
/// with the staging directory bundled.
#[test]
fn synthesized_plan_runs_install_then_compile() {
    let workspace = TestWorkspace::new().expect("workspace");
    let mut state = ConfigurationState::default();
    state.set("file_path", "src/main.py");
    state.set("pip_args", "requests==2.32.3");
    state.set("is_compress", true);
    let synthesis =
        CommandSynthesizer::new(toolchain(), Platform::Linux).synthesize(&state, &Trigger::None);
    let plan = BuildPlan::from_synthesis(&synthesis).with_cwd(workspace.path());
    let staging = workspace.path().join("nuitka_output/main.pips");

    let runner = ScriptedProcessRunner::new(vec![
        ScriptedRun::success().creating(&staging),
        ScriptedRun::success(),
    ]);
    let orchestrator = PipelineOrchestrator::new(runner);
    let report = orchestrator.run(&plan, &BufferedSink::new()).expect("run");

    assert!(report.succeeded());
    let commands = orchestrator.runner().commands();
    assert_eq!(
        commands[0].argv(),
        vec![
            "python3",
            "-m",
            "pip",
            "install",
            "requests==2.32.3",
            "-t",
            "nuitka_output/main.pips",
        ]
    );
    assert!(commands[1].contains_arg("--include-raw-dir=nuitka_output/main.pips=./"));
    assert_eq!(commands[1].positional(), Some("src/main.py"));
    assert!(!staging.exists(), "staging removed after success");
    assert!(report.diagnostics.mentions("archive skipped"));
}

#[cfg(unix)]
mod real_process {
    use std::time::Instant;

    use super::*;
    use nuitka_toolkit::core::command::{CommandBuilder, CommandLine};
    use nuitka_toolkit::core::synth::Preparation;
    use nuitka_toolkit::io::process::NativeProcessRunner;

    fn sh(script: &str) -> CommandLine {
        let mut builder = CommandBuilder::new("sh");
        builder.raw("-c");
        builder.raw(script);
        builder.build().0
    }

    fn native_plan(workspace: &TestWorkspace, compile: &str) -> BuildPlan {
        BuildPlan {
            primary: sh(compile),
            ..plan(&workspace.output_dir())
        }
    }

    #[test]
    fn shell_build_streams_output_and_cleans_staging() {
        let workspace = TestWorkspace::new().expect("workspace");
        let staging = workspace.output_dir().join("main.pips");
        let mut plan = native_plan(
            &workspace,
            "mkdir -p nuitka_output/main.dist && echo compiled > nuitka_output/main.dist/app && echo done",
        );
        plan.cwd = Some(workspace.path().to_path_buf());
        plan.preparation = Some(Preparation {
            command: sh("mkdir -p nuitka_output/main.pips && echo staged"),
            staging_dir: staging.clone(),
        });
        plan.packaging = all_packaging();

        let orchestrator = PipelineOrchestrator::new(NativeProcessRunner::new(
            Duration::from_millis(500),
        ));
        let sink = BufferedSink::new();
        let report = orchestrator.run(&plan, &sink).expect("run");

        assert!(report.succeeded(), "report: {report:?}");
        let lines = sink.drain();
        assert!(lines.iter().any(|line| line == "staged"));
        assert!(lines.iter().any(|line| line == "done"));
        assert!(!staging.exists());
        assert!(workspace.output_dir().join("main.tar.zst").is_file());
    }

    #[test]
    fn cancel_stops_a_real_compile() {
        let workspace = TestWorkspace::new().expect("workspace");
        let orchestrator = Arc::new(PipelineOrchestrator::new(NativeProcessRunner::new(
            Duration::from_millis(500),
        )));
        let sink = BufferedSink::new();
        let shared: Arc<dyn OutputSink> = Arc::new(sink.clone());

        let started = Instant::now();
        let handle = orchestrator
            .spawn(native_plan(&workspace, "echo started; sleep 30; echo never"), shared)
            .expect("spawn");
        assert!(wait_for(WAIT, || sink.snapshot().iter().any(|line| line == "started")));
        assert!(orchestrator.cancel());
        let report = handle.join().expect("join");

        assert_eq!(report.terminal, Stage::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(15));
        assert!(!sink.snapshot().iter().any(|line| line == "never"));
        assert!(orchestrator.is_idle());
    }

    #[test]
    fn nonzero_exit_is_reported_with_code() {
        let workspace = TestWorkspace::new().expect("workspace");
        let orchestrator = PipelineOrchestrator::new(NativeProcessRunner::new(
            Duration::from_millis(500),
        ));
        let report = orchestrator
            .run(&native_plan(&workspace, "echo failing; exit 4"), &BufferedSink::new())
            .expect("run");
        assert_eq!(
            report.failures,
            vec![PipelineError::StageFailure {
                stage: Stage::Compiling,
                code: Some(4),
            }]
        );
    }
}
