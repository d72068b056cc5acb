//! Declarative option table: key → expected shape → synthesis rule.
//!
//! Every option the synthesizer understands is declared once here. Keys that
//! start with [`FLAG_MARKER`] are compiler flags; everything else is a control
//! key read by the toolkit itself and never emitted as a flag.

use crate::core::platform::Platform;
use crate::core::value::{OptionValue, Shape};

/// Prefix shared by every compiler flag key.
pub const FLAG_MARKER: &str = "--";

/// Prefix of UI-only companion controls (e.g. browse buttons).
pub const UI_ONLY_PREFIX: &str = "____";

/// Prefix of per-plugin enable toggles (`_plugin_<id>`).
pub const PLUGIN_PREFIX: &str = "_plugin_";

/// Key the persistence layer injects to identify the document format.
pub const SCHEMA_ID_KEY: &str = "build-system";

/// Keys that must never reach a synthesized command, whatever their value.
pub const NON_PROPAGATING: &[&str] = &[
    "dump_config",
    "load_config",
    "--onefile-tempdir-spec",
    SCHEMA_ID_KEY,
];

pub const ENTRY_POINT: &str = "file_path";
pub const OUTPUT_FILENAME: &str = "--output-filename";
pub const OUTPUT_DIR: &str = "--output-dir";
pub const ONEFILE: &str = "--onefile";
pub const ONEFILE_TEMPDIR_SPEC: &str = "--onefile-tempdir-spec";
pub const ONEFILE_CACHED: &str = "tmp_cached";
pub const PIP_ARGS: &str = "pip_args";
pub const ARCHIVE: &str = "is_compress";
pub const LAUNCHER: &str = "need_start_file";

/// How a key contributes to the synthesized command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Boolean flag emitted bare when true.
    Switch,
    /// Text flag emitted as `--key=value` when non-empty.
    Valued,
    /// Member of the standalone/module group; at most one is emitted.
    PackagingMode,
    /// Member of the C backend group; at most one is emitted.
    BuildTool,
    /// Single-file toggle with its cache-mode and temp-dir companions.
    SingleFile,
    /// Space separated list expanded to one flag occurrence per token.
    SpaceSeparated,
    /// Icon path whose flag name depends on the file extension.
    WindowsIcon,
    /// Path flag normalized to forward slashes.
    PathValued,
    OutputDir,
    OutputFilename,
    /// Comma separated raw tokens appended as-is.
    Passthrough,
    EntryPoint,
    PipArgs,
    /// Read by another rule or the pipeline; never emitted on its own.
    Companion,
}

/// Session-start value of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initial {
    Bool(bool),
    Text(&'static str),
}

impl Initial {
    pub fn to_value(self) -> OptionValue {
        match self {
            Self::Bool(value) => OptionValue::Bool(value),
            Self::Text(value) => OptionValue::text(value),
        }
    }
}

/// One declared option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub key: &'static str,
    pub shape: Shape,
    pub rule: Rule,
    /// Only propagated when synthesizing on this platform.
    pub platform: Option<Platform>,
    pub initial: Initial,
}

const fn spec(key: &'static str, shape: Shape, rule: Rule, initial: Initial) -> OptionSpec {
    OptionSpec {
        key,
        shape,
        rule,
        platform: None,
        initial,
    }
}

const fn on(platform: Platform, option: OptionSpec) -> OptionSpec {
    OptionSpec {
        platform: Some(platform),
        ..option
    }
}

/// All known options in presentation order. Default state insertion order
/// follows this table, which in turn fixes the token order of the command.
pub const OPTIONS: &[OptionSpec] = &[
    spec(ENTRY_POINT, Shape::Text, Rule::EntryPoint, Initial::Text("")),
    spec(OUTPUT_FILENAME, Shape::Text, Rule::OutputFilename, Initial::Text("app")),
    spec(ONEFILE, Shape::Bool, Rule::SingleFile, Initial::Bool(false)),
    spec(ONEFILE_TEMPDIR_SPEC, Shape::Text, Rule::Companion, Initial::Text("./app_cache")),
    spec(ONEFILE_CACHED, Shape::Bool, Rule::Companion, Initial::Bool(false)),
    spec("--standalone", Shape::Bool, Rule::PackagingMode, Initial::Bool(true)),
    spec("--module", Shape::Bool, Rule::PackagingMode, Initial::Bool(false)),
    on(
        Platform::Windows,
        spec("--windows-console-mode", Shape::Text, Rule::Valued, Initial::Text("")),
    ),
    on(
        Platform::Windows,
        spec("--windows-icon", Shape::Text, Rule::WindowsIcon, Initial::Text("")),
    ),
    on(
        Platform::MacOs,
        spec("--macos-create-app-bundle", Shape::Bool, Rule::Switch, Initial::Bool(false)),
    ),
    on(
        Platform::MacOs,
        spec("--macos-app-icon", Shape::Text, Rule::PathValued, Initial::Text("")),
    ),
    spec("--nofollow-imports", Shape::Bool, Rule::Switch, Initial::Bool(true)),
    spec("--remove-output", Shape::Bool, Rule::Switch, Initial::Bool(true)),
    spec("--no-pyi-file", Shape::Bool, Rule::Switch, Initial::Bool(true)),
    spec("--jobs", Shape::Text, Rule::Valued, Initial::Text("")),
    spec("--mingw64", Shape::Bool, Rule::BuildTool, Initial::Bool(false)),
    spec("--clang", Shape::Bool, Rule::BuildTool, Initial::Bool(false)),
    spec("--assume-yes-for-downloads", Shape::Bool, Rule::Switch, Initial::Bool(true)),
    spec("--include-package", Shape::Text, Rule::SpaceSeparated, Initial::Text("")),
    spec("--include-module", Shape::Text, Rule::SpaceSeparated, Initial::Text("")),
    spec("--other-args", Shape::Text, Rule::Passthrough, Initial::Text("")),
    spec(PIP_ARGS, Shape::Text, Rule::PipArgs, Initial::Text("")),
    spec(OUTPUT_DIR, Shape::Text, Rule::OutputDir, Initial::Text("./nuitka_output")),
    spec(ARCHIVE, Shape::Bool, Rule::Companion, Initial::Bool(false)),
    spec(LAUNCHER, Shape::Bool, Rule::Companion, Initial::Bool(false)),
];

pub fn lookup(key: &str) -> Option<&'static OptionSpec> {
    OPTIONS.iter().find(|option| option.key == key)
}

pub fn is_flag_key(key: &str) -> bool {
    key.starts_with(FLAG_MARKER)
}

/// Keys that never contribute tokens: the non-propagating set and UI-only controls.
pub fn is_inert_key(key: &str) -> bool {
    NON_PROPAGATING.contains(&key) || key.starts_with(UI_ONLY_PREFIX)
}

/// Plugin identifier for a `_plugin_<id>` key.
pub fn plugin_id(key: &str) -> Option<&str> {
    key.strip_prefix(PLUGIN_PREFIX).filter(|id| !id.is_empty())
}

pub fn plugin_key(id: &str) -> String {
    format!("{PLUGIN_PREFIX}{id}")
}
