//! Nuitka build toolkit CLI.
//!
//! Reads a build configuration (`config.json`), turns it into a compiler
//! invocation and runs the build pipeline with live output.

use std::fs;
use std::io::{BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use nuitka_toolkit::core::cancel::CancelToken;
use nuitka_toolkit::core::platform::Platform;
use nuitka_toolkit::core::stage::Stage;
use nuitka_toolkit::core::state::ConfigurationState;
use nuitka_toolkit::core::synth::{CommandSynthesizer, Synthesis, Trigger};
use nuitka_toolkit::core::value::OptionValue;
use nuitka_toolkit::exit_codes;
use nuitka_toolkit::io::cache::{directory_size, format_gb, resolve_cache_dir};
use nuitka_toolkit::io::config_store::{dump_configuration, load_configuration};
use nuitka_toolkit::io::probe::{self, ProbeStatus};
use nuitka_toolkit::io::process::NativeProcessRunner;
use nuitka_toolkit::io::settings::{
    DEFAULT_SETTINGS_FILE, ToolkitSettings, load_settings, write_settings,
};
use nuitka_toolkit::io::sink::{OutputSink, StdoutSink};
use nuitka_toolkit::logging;
use nuitka_toolkit::pipeline::{BuildPlan, CancelHandle, PipelineOrchestrator};

const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Parser)]
#[command(
    name = "nuitka-toolkit",
    version,
    about = "Synthesize Nuitka command lines and run supervised builds"
)]
struct Cli {
    /// Toolkit settings file (TOML).
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    /// Debug tracing on stderr (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// Build configuration document (JSON).
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override one option; `true`/`false` become booleans.
    #[arg(long = "set", value_name = "KEY=VALUE", allow_hyphen_values = true)]
    overrides: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default configuration document (and settings file if missing).
    Init {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Overwrite an existing document.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the commands a build would run, with diagnostics.
    Show {
        #[command(flatten)]
        config: ConfigArgs,
        /// Treat this key as the edited field (enables dependent-field suggestions).
        #[arg(long, value_name = "KEY", allow_hyphen_values = true)]
        trigger: Option<String>,
        /// Save suggested field updates back to the document.
        #[arg(long)]
        write: bool,
    },
    /// Run the build pipeline. Type `q` + Enter to cancel.
    Build {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Check that the compiler and a C compiler are available.
    Doctor {
        /// Let the compiler download a missing C compiler.
        #[arg(long)]
        download: bool,
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
    /// Report the compiler cache location and size.
    Cache,
    /// Remove the configured output directory.
    Clean {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let settings = load_settings(&cli.settings)?;
    match cli.command {
        Command::Init { config, force } => cmd_init(&cli.settings, &settings, &config, force),
        Command::Show {
            config,
            trigger,
            write,
        } => cmd_show(&settings, &config, trigger, write),
        Command::Build { config } => cmd_build(&settings, &config),
        Command::Doctor {
            download,
            timeout_secs,
        } => cmd_doctor(&settings, download, Duration::from_secs(timeout_secs)),
        Command::Cache => cmd_cache(&settings),
        Command::Clean { config } => cmd_clean(&settings, &config),
    }
}

fn cmd_init(
    settings_path: &Path,
    settings: &ToolkitSettings,
    config: &Path,
    force: bool,
) -> Result<i32> {
    if config.exists() && !force {
        bail!("{} already exists; use --force to overwrite", config.display());
    }
    dump_configuration(config, &ConfigurationState::default())?;
    println!("wrote {}", config.display());
    if !settings_path.exists() {
        write_settings(settings_path, settings)?;
        println!("wrote {}", settings_path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_show(
    settings: &ToolkitSettings,
    args: &ConfigArgs,
    trigger: Option<String>,
    write: bool,
) -> Result<i32> {
    let mut state = load_state(args)?;
    let trigger = trigger.map_or(Trigger::None, Trigger::field);
    let synthesis = synthesizer(settings).synthesize_and_apply(&mut state, &trigger);
    println!("{}", synthesis.preview());
    print_diagnostics(&synthesis);
    for feedback in &synthesis.feedback {
        let value = serde_json::to_string(&feedback.value).context("serialize suggestion")?;
        println!("suggested: {} = {}", feedback.key, value);
    }
    if write && !synthesis.feedback.is_empty() {
        dump_configuration(&args.config, &state)?;
        println!("updated {}", args.config.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_build(settings: &ToolkitSettings, args: &ConfigArgs) -> Result<i32> {
    let state = load_state(args)?;
    let synthesis = synthesizer(settings).synthesize(&state, &Trigger::None);
    println!("{}", synthesis.preview());
    print_diagnostics(&synthesis);

    let plan = BuildPlan::from_synthesis(&synthesis);
    let orchestrator = Arc::new(PipelineOrchestrator::new(NativeProcessRunner::new(
        settings.stop_grace(),
    )));
    let sink: Arc<dyn OutputSink> = Arc::new(StdoutSink);
    let handle = orchestrator
        .spawn(plan, sink)
        .context("a build is already running")?;
    if std::io::stdin().is_terminal() {
        eprintln!("type q + Enter to cancel");
        watch_for_cancel(orchestrator.cancel_handle());
    }
    let report = handle
        .join()
        .map_err(|_| anyhow!("pipeline thread panicked"))?;
    for line in report.diagnostics.lines() {
        eprintln!("{line}");
    }
    Ok(match report.terminal {
        Stage::Done => exit_codes::OK,
        Stage::Cancelled => exit_codes::CANCELLED,
        _ => exit_codes::BUILD_FAILED,
    })
}

/// Cancel the run when the user types `q` or `cancel` on stdin.
fn watch_for_cancel(handle: CancelHandle) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if matches!(line.trim(), "q" | "cancel") {
                if handle.cancel() {
                    eprintln!("cancelling build...");
                }
                break;
            }
        }
    });
}

fn cmd_doctor(settings: &ToolkitSettings, download: bool, timeout: Duration) -> Result<i32> {
    let toolchain = settings.toolchain();
    match probe::probe_compiler(&toolchain, timeout) {
        ProbeStatus::Ready { version } => {
            println!("Nuitka version: {version}");
            Ok(exit_codes::OK)
        }
        ProbeStatus::MissingCCompiler { output } => {
            println!("{output}");
            let retry = probe::version_command(&toolchain, true);
            if !download {
                println!(
                    "\nMissing C compiler. Rerun with --download, or run:\n\n{}\n",
                    retry.display_for(Platform::current())
                );
                return Ok(exit_codes::BUILD_FAILED);
            }
            let runner = NativeProcessRunner::new(settings.stop_grace());
            probe::download_c_compiler(&runner, &toolchain, &StdoutSink, &CancelToken::new())?;
            println!("C compiler downloaded");
            Ok(exit_codes::OK)
        }
        ProbeStatus::Unavailable { reason } => {
            eprintln!("compiler unavailable: {reason}");
            Ok(exit_codes::BUILD_FAILED)
        }
    }
}

fn cmd_cache(settings: &ToolkitSettings) -> Result<i32> {
    let dir = resolve_cache_dir(settings.compiler_cache_dir.as_deref(), Platform::current())?;
    println!("{}", dir.display());
    println!("{}", format_gb(directory_size(&dir)));
    Ok(exit_codes::OK)
}

fn cmd_clean(settings: &ToolkitSettings, args: &ConfigArgs) -> Result<i32> {
    let state = load_state(args)?;
    let synthesis = synthesizer(settings).synthesize(&state, &Trigger::None);
    let output_dir = &synthesis.output_dir;
    if output_dir.is_dir() {
        fs::remove_dir_all(output_dir)
            .with_context(|| format!("remove {}", output_dir.display()))?;
        println!("removed {}", output_dir.display());
    } else {
        println!("nothing to clean at {}", output_dir.display());
    }
    Ok(exit_codes::OK)
}

fn synthesizer(settings: &ToolkitSettings) -> CommandSynthesizer {
    CommandSynthesizer::new(settings.toolchain(), Platform::current())
}

fn print_diagnostics(synthesis: &Synthesis) {
    for line in synthesis.diagnostics.lines() {
        eprintln!("{line}");
    }
}

/// Load the configuration (defaults if the file is missing) and apply `--set` overrides.
fn load_state(args: &ConfigArgs) -> Result<ConfigurationState> {
    let mut state = if args.config.exists() {
        load_configuration(&args.config)?
    } else {
        debug!(path = %args.config.display(), "configuration missing; using defaults");
        ConfigurationState::default()
    };
    apply_overrides(&mut state, &args.overrides)?;
    Ok(state)
}

fn apply_overrides(state: &mut ConfigurationState, overrides: &[String]) -> Result<()> {
    for raw in overrides {
        let (key, value) = raw
            .split_once('=')
            .with_context(|| format!("invalid --set {raw:?}; expected KEY=VALUE"))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("invalid --set {raw:?}; key is empty");
        }
        state.set(key, OptionValue::parse_override(value));
    }
    Ok(())
}
