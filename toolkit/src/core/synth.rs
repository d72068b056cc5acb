//! Configuration → compiler invocation.
//!
//! [`CommandSynthesizer::synthesize`] is a pure function of the configuration,
//! the trigger that caused the pass and the target platform. It never fails:
//! anything it cannot use becomes a [`Diagnostics`] entry. The only state it
//! proposes to change is returned as [`Feedback`] for the caller to apply.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use crate::core::command::{CommandBuilder, CommandLine};
use crate::core::diagnostics::Diagnostics;
use crate::core::platform::Platform;
use crate::core::schema::{self, Rule};
use crate::core::state::ConfigurationState;
use crate::core::value::{OptionValue, Shape};

/// Entry name used while no entry point has been chosen.
pub const DEFAULT_ENTRY: &str = "app";

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["' ]"#).expect("filename regex should be valid"));

/// Interpreter and hosted modules used to build both commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub interpreter: String,
    pub compiler_module: String,
    pub installer_module: String,
}

/// Event that caused a synthesis pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Trigger {
    #[default]
    None,
    /// A single field was edited.
    Field(String),
}

impl Trigger {
    pub fn field(key: impl Into<String>) -> Self {
        Self::Field(key.into())
    }

    fn is(&self, key: &str) -> bool {
        matches!(self, Self::Field(field) if field == key)
    }
}

/// Suggested update of a dependent field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub key: String,
    pub value: OptionValue,
}

/// Dependency staging step that runs before compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preparation {
    pub command: CommandLine,
    pub staging_dir: PathBuf,
}

/// Post-build steps requested at synthesis time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackagingRequest {
    pub archive: bool,
    pub launcher: bool,
}

impl PackagingRequest {
    pub fn any(self) -> bool {
        self.archive || self.launcher
    }
}

/// Everything one synthesis pass produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub primary: CommandLine,
    pub preparation: Option<Preparation>,
    pub diagnostics: Diagnostics,
    pub feedback: Vec<Feedback>,
    /// Output location shared with later pipeline stages.
    pub output_dir: PathBuf,
    pub entry_point: String,
    /// Base name of the entry point; names the artifact directory and archive.
    pub entry_stem: String,
    /// File name of the produced executable inside the artifact directory.
    pub artifact_name: String,
    pub packaging: PackagingRequest,
    pub platform: Platform,
}

impl Synthesis {
    /// Human-readable summary of the commands a build would run.
    pub fn preview(&self) -> String {
        let mut text = format!("[Interpreter]: {}\n[Build]", self.primary.program());
        if let Some(preparation) = &self.preparation {
            text.push('\n');
            text.push_str(&preparation.command.display_for(self.platform));
        }
        text.push('\n');
        text.push_str(&self.primary.display_for(self.platform));
        text.push('\n');
        text.push_str(&"- ".repeat(50));
        text
    }
}

/// Builds compiler and dependency-install commands from a configuration.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    toolchain: Toolchain,
    platform: Platform,
}

impl CommandSynthesizer {
    pub fn new(toolchain: Toolchain, platform: Platform) -> Self {
        Self {
            toolchain,
            platform,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Synthesize, then write the returned feedback back into `state`.
    pub fn synthesize_and_apply(
        &self,
        state: &mut ConfigurationState,
        trigger: &Trigger,
    ) -> Synthesis {
        let synthesis = self.synthesize(state, trigger);
        for feedback in &synthesis.feedback {
            state.set(feedback.key.clone(), feedback.value.clone());
        }
        synthesis
    }

    #[instrument(skip_all, fields(trigger = ?trigger, platform = %self.platform))]
    pub fn synthesize(&self, state: &ConfigurationState, trigger: &Trigger) -> Synthesis {
        let mut diagnostics = Diagnostics::default();
        let feedback = self.feedback_for(state, trigger);
        let mut effective = state.clone();
        for item in &feedback {
            effective.set(item.key.clone(), item.value.clone());
        }

        let entry_raw = effective.text(schema::ENTRY_POINT);
        let entry_point = if entry_raw.is_empty() {
            diagnostics.warn(format!(
                "no entry point selected; using `{DEFAULT_ENTRY}`"
            ));
            DEFAULT_ENTRY.to_string()
        } else {
            normalize_path(&entry_raw, self.platform)
        };
        let entry_stem = file_stem(&entry_point);
        let output_dir = normalize_path(&effective.text(schema::OUTPUT_DIR), self.platform);
        let staging_dir = join_posix(&output_dir, &format!("{entry_stem}.pips"));
        let output_name = sanitize_filename(&effective.text(schema::OUTPUT_FILENAME));
        let artifact_name = if output_name.is_empty() {
            entry_stem.clone()
        } else {
            output_name
        };

        let mut builder =
            CommandBuilder::new(&self.toolchain.interpreter).module(&self.toolchain.compiler_module);
        let mut pip_args: Vec<String> = Vec::new();
        let mut packaging_mode: Option<&str> = None;
        let mut build_tool: Option<&str> = None;

        for (key, value) in effective.iter() {
            if schema::is_inert_key(key) {
                continue;
            }
            let Some(option) = schema::lookup(key) else {
                if schema::plugin_id(key).is_none() && schema::is_flag_key(key) {
                    passthrough_unknown(&mut builder, &mut diagnostics, key, value);
                }
                continue;
            };
            if !value.matches(option.shape) {
                diagnostics.warn(format!(
                    "`{key}` expects a {} value, found a {}; ignored",
                    shape_name(option.shape),
                    value.shape_name()
                ));
                continue;
            }
            if let Some(owner) = option.platform
                && owner != self.platform
            {
                if value.is_set() {
                    debug!(key, %owner, "dropping option owned by another platform");
                }
                continue;
            }

            match option.rule {
                Rule::Switch => {
                    if value.as_bool() == Some(true) {
                        builder.switch(key);
                    }
                }
                Rule::Valued => {
                    let text = trimmed(value);
                    if !text.is_empty() {
                        builder.valued(key, text);
                    }
                }
                Rule::PackagingMode => {
                    exclusive_switch(&mut builder, &mut diagnostics, &mut packaging_mode, key, value);
                }
                Rule::BuildTool => {
                    exclusive_switch(&mut builder, &mut diagnostics, &mut build_tool, key, value);
                }
                Rule::SingleFile => {
                    if value.as_bool() == Some(true) {
                        builder.switch(key);
                        let tempdir = effective.text(schema::ONEFILE_TEMPDIR_SPEC);
                        if !tempdir.is_empty() {
                            builder.valued(schema::ONEFILE_TEMPDIR_SPEC, tempdir);
                        }
                        let cache_mode = if effective.flag(schema::ONEFILE_CACHED) {
                            "cached"
                        } else {
                            "temporary"
                        };
                        builder.valued("--onefile-cache-mode", cache_mode);
                    }
                }
                Rule::SpaceSeparated => {
                    for item in trimmed(value).split_whitespace() {
                        builder.valued(key, item);
                    }
                }
                Rule::WindowsIcon => {
                    let text = trimmed(value);
                    if !text.is_empty() {
                        let path = normalize_path(&text, self.platform);
                        windows_icon(&mut builder, &mut diagnostics, &path);
                    }
                }
                Rule::PathValued => {
                    let text = trimmed(value);
                    if !text.is_empty() {
                        builder.valued(key, normalize_path(&text, self.platform));
                    }
                }
                Rule::OutputDir => {
                    if !trimmed(value).is_empty() {
                        builder.valued(key, output_dir.clone());
                    }
                }
                Rule::OutputFilename => {
                    let name = sanitize_filename(&trimmed(value));
                    if !name.is_empty() {
                        builder.valued(key, name);
                    }
                }
                Rule::Passthrough => {
                    for segment in trimmed(value).split(',') {
                        let segment = segment.trim();
                        if !segment.is_empty() {
                            builder.raw(segment);
                        }
                    }
                }
                Rule::PipArgs => {
                    pip_args = trimmed(value)
                        .split_whitespace()
                        .map(str::to_string)
                        .collect();
                    if !pip_args.is_empty() {
                        builder.valued("--include-raw-dir", format!("{staging_dir}=./"));
                    }
                }
                Rule::EntryPoint | Rule::Companion => {}
            }
        }

        for plugin in effective.enabled_plugins() {
            builder.valued("--enable-plugin", plugin);
        }

        let (primary, rejected) = builder.finish(entry_point.clone());
        for arg in rejected {
            diagnostics.warn(format!("dropped argument `{arg}`: contains a NUL byte"));
        }

        let preparation = if pip_args.is_empty() {
            None
        } else {
            let mut install = CommandBuilder::new(&self.toolchain.interpreter)
                .module(&self.toolchain.installer_module);
            install.raw("install");
            for arg in &pip_args {
                install.raw(arg.clone());
            }
            install.raw("-t");
            install.raw(staging_dir.clone());
            let (command, rejected) = install.build();
            for arg in rejected {
                diagnostics.warn(format!("dropped install argument `{arg}`: contains a NUL byte"));
            }
            Some(Preparation {
                command,
                staging_dir: PathBuf::from(&staging_dir),
            })
        };

        let onefile = effective.flag(schema::ONEFILE);
        let requested = PackagingRequest {
            archive: effective.flag(schema::ARCHIVE),
            launcher: effective.flag(schema::LAUNCHER),
        };
        let packaging = if onefile {
            if requested.any() {
                diagnostics.note("archive and launcher options are inert in single-file mode");
            }
            PackagingRequest::default()
        } else {
            requested
        };

        debug!(
            tokens = primary.tokens().len(),
            preparation = preparation.is_some(),
            diagnostics = diagnostics.len(),
            "synthesis complete"
        );
        Synthesis {
            primary,
            preparation,
            diagnostics,
            feedback,
            output_dir: PathBuf::from(output_dir),
            entry_point,
            entry_stem,
            artifact_name,
            packaging,
            platform: self.platform,
        }
    }

    /// Suggestions for dependent fields. Only the field named by the trigger
    /// seeds suggestions, and unchanged values are not re-suggested.
    fn feedback_for(&self, state: &ConfigurationState, trigger: &Trigger) -> Vec<Feedback> {
        let mut suggestions: Vec<Feedback> = Vec::new();
        if trigger.is(schema::ENTRY_POINT) {
            let entry = state.text(schema::ENTRY_POINT);
            if !entry.is_empty() {
                let stem = file_stem(&normalize_path(&entry, self.platform));
                suggestions.push(Feedback {
                    key: schema::OUTPUT_FILENAME.to_string(),
                    value: OptionValue::text(stem.clone()),
                });
                suggestions.push(Feedback {
                    key: schema::ONEFILE_TEMPDIR_SPEC.to_string(),
                    value: OptionValue::text(format!("./{stem}_cache")),
                });
            }
        } else if trigger.is(schema::OUTPUT_FILENAME) {
            let name = sanitize_filename(&state.text(schema::OUTPUT_FILENAME));
            if !name.is_empty() {
                suggestions.push(Feedback {
                    key: schema::ONEFILE_TEMPDIR_SPEC.to_string(),
                    value: OptionValue::text(format!("./{name}_cache")),
                });
            }
        } else if trigger.is(schema::PIP_ARGS) {
            let raw = state.text(schema::PIP_ARGS);
            if !raw.is_empty() && Path::new(&raw).is_file() {
                suggestions.push(Feedback {
                    key: schema::PIP_ARGS.to_string(),
                    value: OptionValue::text(format!("-r {raw}")),
                });
            }
        }
        suggestions.retain(|item| state.get(&item.key) != Some(&item.value));
        suggestions
    }
}

fn trimmed(value: &OptionValue) -> String {
    value
        .as_text()
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}

fn shape_name(shape: Shape) -> &'static str {
    match shape {
        Shape::Bool => "boolean",
        Shape::Text => "string",
    }
}

fn exclusive_switch<'a>(
    builder: &mut CommandBuilder,
    diagnostics: &mut Diagnostics,
    chosen: &mut Option<&'a str>,
    key: &'a str,
    value: &OptionValue,
) {
    if value.as_bool() != Some(true) {
        return;
    }
    match chosen {
        Some(previous) => diagnostics.warn(format!(
            "`{key}` conflicts with `{previous}`; only `{previous}` is used"
        )),
        None => {
            builder.switch(key);
            *chosen = Some(key);
        }
    }
}

fn windows_icon(builder: &mut CommandBuilder, diagnostics: &mut Diagnostics, path: &str) {
    let extension = Path::new(path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("exe") => builder.valued("--windows-icon-from-exe", path),
        Some("ico") => builder.valued("--windows-icon-from-ico", path),
        _ => {
            diagnostics.warn(format!(
                "icon `{path}` has an unrecognized extension; passing it as an image icon, which may be wrong"
            ));
            builder.valued("--windows-icon-from-ico", path);
        }
    }
}

fn passthrough_unknown(
    builder: &mut CommandBuilder,
    diagnostics: &mut Diagnostics,
    key: &str,
    value: &OptionValue,
) {
    if !value.is_set() {
        return;
    }
    diagnostics.note(format!("`{key}` is not a modeled option; passed through as-is"));
    match value {
        OptionValue::Bool(_) => builder.switch(key),
        OptionValue::Text(text) => builder.valued(key, text.trim()),
        OptionValue::List(items) => {
            for item in items.iter().map(|item| item.trim()).filter(|item| !item.is_empty()) {
                builder.valued(key, item);
            }
        }
    }
}

/// Replace characters that cannot be embedded in a path component.
pub fn sanitize_filename(name: &str) -> String {
    UNSAFE_FILENAME_CHARS.replace_all(name, "_").into_owned()
}

/// Canonical forward-slash form of a user supplied path.
///
/// Backslashes are separators only on Windows. Empty and `.` components are
/// dropped; `..` is preserved. An empty result is `.`.
pub fn normalize_path(raw: &str, platform: Platform) -> String {
    let raw = if platform.is_windows() {
        raw.replace('\\', "/")
    } else {
        raw.to_string()
    };
    let absolute = raw.starts_with('/');
    let joined = raw
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

fn join_posix(dir: &str, name: &str) -> String {
    match dir {
        "." => name.to_string(),
        "/" => format!("/{name}"),
        _ => format!("{dir}/{name}"),
    }
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| DEFAULT_ENTRY.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthesizer(platform: Platform) -> CommandSynthesizer {
        CommandSynthesizer::new(
            Toolchain {
                interpreter: "python3".to_string(),
                compiler_module: "nuitka".to_string(),
                installer_module: "pip".to_string(),
            },
            platform,
        )
    }

    fn state_with_entry() -> ConfigurationState {
        let mut state = ConfigurationState::default();
        state.set("file_path", "src/hello.py");
        state
    }

    #[test]
    fn default_state_synthesizes_standalone_build() {
        let synthesis = synthesizer(Platform::Linux).synthesize(&state_with_entry(), &Trigger::None);
        assert_eq!(
            synthesis.primary.argv(),
            vec![
                "python3",
                "-m",
                "nuitka",
                "--output-filename=app",
                "--standalone",
                "--nofollow-imports",
                "--remove-output",
                "--no-pyi-file",
                "--assume-yes-for-downloads",
                "--output-dir=nuitka_output",
                "src/hello.py",
            ]
        );
        assert!(synthesis.preparation.is_none());
        assert!(synthesis.diagnostics.is_empty());
        assert_eq!(synthesis.entry_stem, "hello");
        assert_eq!(synthesis.output_dir, PathBuf::from("nuitka_output"));
    }

    #[test]
    fn empty_state_still_ends_with_entry_point() {
        let synthesis =
            synthesizer(Platform::Linux).synthesize(&ConfigurationState::empty(), &Trigger::None);
        assert_eq!(synthesis.primary.positional(), Some(DEFAULT_ENTRY));
        assert!(synthesis.diagnostics.mentions("no entry point"));
    }

    #[test]
    fn single_file_adds_cache_mode_tracking_companion() {
        let mut state = state_with_entry();
        state.set("--onefile", true);
        let synth = synthesizer(Platform::Linux);

        let temporary = synth.synthesize(&state, &Trigger::None);
        assert!(temporary.primary.contains_arg("--onefile"));
        assert!(temporary.primary.contains_arg("--onefile-cache-mode=temporary"));
        assert!(temporary.primary.contains_arg("--onefile-tempdir-spec=./app_cache"));

        state.set("tmp_cached", true);
        let cached = synth.synthesize(&state, &Trigger::None);
        let modes: Vec<String> = cached
            .primary
            .argv()
            .into_iter()
            .filter(|arg| arg.starts_with("--onefile-cache-mode"))
            .collect();
        assert_eq!(modes, vec!["--onefile-cache-mode=cached"]);
    }

    #[test]
    fn single_file_off_does_not_leak_companions() {
        let mut state = state_with_entry();
        state.set("--onefile", false);
        state.set("tmp_cached", true);
        state.set("--onefile-tempdir-spec", "%TEMP%/leak");
        let synthesis = synthesizer(Platform::Linux).synthesize(&state, &Trigger::None);
        for arg in synthesis.primary.argv() {
            assert!(!arg.starts_with("--onefile"), "leaked {arg}");
            assert!(!arg.contains("leak"), "leaked {arg}");
        }
    }

    #[test]
    fn include_lists_expand_per_token() {
        let mut state = state_with_entry();
        state.set("--include-package", "pkg1 pkg2");
        let synthesis = synthesizer(Platform::Linux).synthesize(&state, &Trigger::None);
        let argv = synthesis.primary.argv();
        assert!(argv.contains(&"--include-package=pkg1".to_string()));
        assert!(argv.contains(&"--include-package=pkg2".to_string()));
        assert!(!argv.iter().any(|arg| arg == "--include-package=pkg1 pkg2"));
    }

    #[test]
    fn pip_args_produce_preparation_and_raw_dir() {
        let mut state = state_with_entry();
        state.set("pip_args", "requests==2.32 rich");
        let synthesis = synthesizer(Platform::Linux).synthesize(&state, &Trigger::None);
        let preparation = synthesis.preparation.expect("preparation");
        assert_eq!(
            preparation.command.argv(),
            vec![
                "python3",
                "-m",
                "pip",
                "install",
                "requests==2.32",
                "rich",
                "-t",
                "nuitka_output/hello.pips",
            ]
        );
        assert_eq!(preparation.staging_dir, PathBuf::from("nuitka_output/hello.pips"));
        assert!(
            synthesis
                .primary
                .contains_arg("--include-raw-dir=nuitka_output/hello.pips=./")
        );
    }

    #[test]
    fn empty_pip_args_discard_preparation() {
        let mut state = state_with_entry();
        state.set("pip_args", "rich");
        let synth = synthesizer(Platform::Linux);
        assert!(synth.synthesize(&state, &Trigger::None).preparation.is_some());

        state.set("pip_args", "  ");
        let synthesis = synth.synthesize(&state, &Trigger::None);
        assert!(synthesis.preparation.is_none());
        assert!(
            !synthesis
                .primary
                .argv()
                .iter()
                .any(|arg| arg.starts_with("--include-raw-dir"))
        );
    }

    #[test]
    fn pip_requirements_file_rewritten_only_on_own_trigger() {
        let temp = tempfile::tempdir().expect("tempdir");
        let requirements = temp.path().join("requirements.txt");
        std::fs::write(&requirements, "rich\n").expect("write requirements");
        let raw = requirements.to_string_lossy().into_owned();

        let mut state = state_with_entry();
        state.set("pip_args", raw.as_str());
        let synth = synthesizer(Platform::Linux);

        let unrelated = synth.synthesize(&state, &Trigger::field("--jobs"));
        assert!(unrelated.feedback.is_empty());

        let own = synth.synthesize_and_apply(&mut state, &Trigger::field("pip_args"));
        let expected = format!("-r {raw}");
        assert_eq!(state.text("pip_args"), expected);
        let preparation = own.preparation.expect("preparation");
        assert!(preparation.command.contains_arg("-r"));
        assert!(preparation.command.contains_arg(&raw));

        let again = synth.synthesize(&state, &Trigger::field("pip_args"));
        assert!(again.feedback.is_empty());
    }

    #[test]
    fn platform_conditional_flags_dropped_elsewhere() {
        let mut state = state_with_entry();
        state.set("--windows-console-mode", "disable");
        state.set("--windows-icon", "assets/app.ico");
        state.set("--macos-create-app-bundle", true);
        state.set("--macos-app-icon", "assets/app.icns");

        let linux = synthesizer(Platform::Linux).synthesize(&state, &Trigger::None);
        for arg in linux.primary.argv() {
            assert!(!arg.starts_with("--windows"), "leaked {arg}");
            assert!(!arg.starts_with("--macos"), "leaked {arg}");
        }
        assert!(linux.diagnostics.is_empty());

        let windows = synthesizer(Platform::Windows).synthesize(&state, &Trigger::None);
        assert!(windows.primary.contains_arg("--windows-console-mode=disable"));
        assert!(windows.primary.contains_arg("--windows-icon-from-ico=assets/app.ico"));
        assert!(!windows.primary.contains_arg("--macos-create-app-bundle"));

        let mac = synthesizer(Platform::MacOs).synthesize(&state, &Trigger::None);
        assert!(mac.primary.contains_arg("--macos-create-app-bundle"));
        assert!(mac.primary.contains_arg("--macos-app-icon=assets/app.icns"));
    }

    #[test]
    fn icon_flag_follows_extension() {
        let synth = synthesizer(Platform::Windows);
        let mut state = state_with_entry();

        state.set("--windows-icon", r"C:\icons\tool.EXE");
        let exe = synth.synthesize(&state, &Trigger::None);
        assert!(exe.primary.contains_arg("--windows-icon-from-exe=C:/icons/tool.EXE"));
        assert!(exe.diagnostics.is_empty());

        state.set("--windows-icon", "icons/tool.png");
        let png = synth.synthesize(&state, &Trigger::None);
        assert!(png.primary.contains_arg("--windows-icon-from-ico=icons/tool.png"));
        assert!(png.diagnostics.mentions("may be wrong"));
    }

    #[test]
    fn output_filename_is_sanitized() {
        let mut state = state_with_entry();
        state.set("--output-filename", r#"my "cool" app's"#);
        let synthesis = synthesizer(Platform::Linux).synthesize(&state, &Trigger::None);
        assert!(
            synthesis
                .primary
                .contains_arg("--output-filename=my__cool__app_s")
        );
        assert_eq!(synthesis.artifact_name, "my__cool__app_s");
    }

    #[test]
    fn passthrough_splits_on_commas() {
        let mut state = state_with_entry();
        state.set("--other-args", "--lto=no, --show-progress,,");
        let synthesis = synthesizer(Platform::Linux).synthesize(&state, &Trigger::None);
        let argv = synthesis.primary.argv();
        let lto = argv.iter().position(|arg| arg == "--lto=no").expect("lto");
        assert_eq!(argv[lto + 1], "--show-progress");
        assert_eq!(argv.last().map(String::as_str), Some("src/hello.py"));
    }

    #[test]
    fn plugins_sorted_before_entry_point() {
        let mut state = state_with_entry();
        state.set_plugin("tk-inter", true);
        state.set_plugin("anti-bloat", true);
        let argv = synthesizer(Platform::Linux)
            .synthesize(&state, &Trigger::None)
            .primary
            .argv();
        let tail: Vec<&str> = argv[argv.len() - 3..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec!["--enable-plugin=anti-bloat", "--enable-plugin=tk-inter", "src/hello.py"]
        );
    }

    #[test]
    fn conflicting_mode_switches_emit_one() {
        let mut state = state_with_entry();
        state.set("--module", true);
        let synthesis = synthesizer(Platform::Linux).synthesize(&state, &Trigger::None);
        assert!(synthesis.primary.contains_arg("--standalone"));
        assert!(!synthesis.primary.contains_arg("--module"));
        assert!(synthesis.diagnostics.mentions("conflicts"));
    }

    #[test]
    fn malformed_values_degrade_to_diagnostics() {
        let mut state = state_with_entry();
        state.set("--standalone", "yes");
        state.set("--jobs", true);
        state.set("--unknown-flag", "x");
        state.set("____--windows-icon", "Browse");
        state.set("something-else", true);
        let synthesis = synthesizer(Platform::Linux).synthesize(&state, &Trigger::None);
        assert!(!synthesis.primary.contains_arg("--standalone"));
        assert!(synthesis.primary.contains_arg("--unknown-flag=x"));
        assert!(!synthesis.primary.argv().iter().any(|arg| arg.contains("Browse")));
        assert!(synthesis.diagnostics.mentions("`--standalone` expects a boolean"));
        assert!(synthesis.diagnostics.mentions("`--jobs` expects a string"));
        assert_eq!(synthesis.primary.positional(), Some("src/hello.py"));
    }

    #[test]
    fn output_filename_trigger_suggests_tempdir_once() {
        let synth = synthesizer(Platform::Linux);
        let mut state = state_with_entry();
        state.set("--output-filename", "tool");

        let first = synth.synthesize_and_apply(&mut state, &Trigger::field("--output-filename"));
        assert_eq!(first.feedback.len(), 1);
        assert_eq!(state.text("--onefile-tempdir-spec"), "./tool_cache");

        let second = synth.synthesize_and_apply(&mut state, &Trigger::field("--output-filename"));
        assert!(second.feedback.is_empty());
        assert_eq!(first.primary, second.primary);
    }

    #[test]
    fn unrelated_trigger_keeps_manual_tempdir() {
        let synth = synthesizer(Platform::Linux);
        let mut state = state_with_entry();
        state.set("--output-filename", "tool");
        state.set("--onefile-tempdir-spec", "%CACHE_DIR%/tool");
        let synthesis = synth.synthesize_and_apply(&mut state, &Trigger::field("--jobs"));
        assert!(synthesis.feedback.is_empty());
        assert_eq!(state.text("--onefile-tempdir-spec"), "%CACHE_DIR%/tool");
    }

    #[test]
    fn entry_point_trigger_seeds_name_and_tempdir() {
        let synth = synthesizer(Platform::Linux);
        let mut state = ConfigurationState::default();
        state.set("file_path", "./tools/convert.py");
        let synthesis = synth.synthesize_and_apply(&mut state, &Trigger::field("file_path"));
        assert_eq!(state.text("--output-filename"), "convert");
        assert_eq!(state.text("--onefile-tempdir-spec"), "./convert_cache");
        assert!(synthesis.primary.contains_arg("--output-filename=convert"));
        assert_eq!(synthesis.primary.positional(), Some("tools/convert.py"));
    }

    #[test]
    fn synthesis_is_idempotent() {
        let synth = synthesizer(Platform::Linux);
        let mut state = state_with_entry();
        state.set("pip_args", "rich");
        state.set("--include-module", "a b");
        state.set_plugin("numpy", true);
        let first = synth.synthesize(&state, &Trigger::None);
        let second = synth.synthesize(&state, &Trigger::None);
        assert_eq!(first.primary.argv(), second.primary.argv());
        assert_eq!(first.preparation, second.preparation);
    }

    #[test]
    fn packaging_inert_in_single_file_mode() {
        let mut state = state_with_entry();
        state.set("is_compress", true);
        state.set("need_start_file", true);
        let synth = synthesizer(Platform::Linux);
        assert!(synth.synthesize(&state, &Trigger::None).packaging.archive);

        state.set("--onefile", true);
        let synthesis = synth.synthesize(&state, &Trigger::None);
        assert!(!synthesis.packaging.any());
        assert!(synthesis.diagnostics.mentions("inert"));
    }

    #[test]
    fn normalize_path_produces_forward_slash_form() {
        assert_eq!(normalize_path("./nuitka_output/", Platform::Linux), "nuitka_output");
        assert_eq!(normalize_path("", Platform::Linux), ".");
        assert_eq!(normalize_path("/opt//app/./main.py", Platform::Linux), "/opt/app/main.py");
        assert_eq!(normalize_path(r"C:\work\app.py", Platform::Windows), "C:/work/app.py");
        assert_eq!(normalize_path("../app.py", Platform::MacOs), "../app.py");
    }

    #[test]
    fn preview_lists_both_commands() {
        let mut state = state_with_entry();
        state.set("pip_args", "rich");
        let preview = synthesizer(Platform::Linux)
            .synthesize(&state, &Trigger::None)
            .preview();
        let lines: Vec<&str> = preview.lines().collect();
        assert_eq!(lines[0], "[Interpreter]: python3");
        assert!(lines[2].starts_with("python3 -m pip install rich -t"));
        assert!(lines[3].starts_with("python3 -m nuitka"));
    }
}
