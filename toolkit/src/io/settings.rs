//! Toolkit settings stored in `nuitka-toolkit.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::synth::Toolchain;

pub const DEFAULT_SETTINGS_FILE: &str = "nuitka-toolkit.toml";

/// Toolkit settings (TOML).
///
/// Describes the interpreter hosting the compiler and how builds are
/// supervised. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolkitSettings {
    /// Interpreter binary used for both the compiler and the installer.
    pub interpreter: String,

    /// Module run with `-m` to compile.
    pub compiler_module: String,

    /// Module run with `-m` to stage dependencies.
    pub installer_module: String,

    /// Time a stopped process gets to exit before it is killed.
    pub stop_grace_millis: u64,

    /// Compiler cache location; falls back to `NUITKA_CACHE_DIR`, then the
    /// platform cache directory.
    pub compiler_cache_dir: Option<PathBuf>,
}

impl Default for ToolkitSettings {
    fn default() -> Self {
        let interpreter = if cfg!(windows) { "python" } else { "python3" };
        Self {
            interpreter: interpreter.to_string(),
            compiler_module: "nuitka".to_string(),
            installer_module: "pip".to_string(),
            stop_grace_millis: 1_000,
            compiler_cache_dir: None,
        }
    }
}

impl ToolkitSettings {
    pub fn validate(&self) -> Result<()> {
        if self.interpreter.trim().is_empty() {
            return Err(anyhow!("interpreter must be non-empty"));
        }
        if self.compiler_module.trim().is_empty() {
            return Err(anyhow!("compiler_module must be non-empty"));
        }
        if self.installer_module.trim().is_empty() {
            return Err(anyhow!("installer_module must be non-empty"));
        }
        if self.stop_grace_millis == 0 {
            return Err(anyhow!("stop_grace_millis must be > 0"));
        }
        Ok(())
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_millis)
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain {
            interpreter: console_interpreter(self.interpreter.trim()),
            compiler_module: self.compiler_module.trim().to_string(),
            installer_module: self.installer_module.trim().to_string(),
        }
    }
}

/// Map a windowed interpreter (`pythonw`, `pythonw.exe`) to its console sibling
/// so child output can be captured.
pub fn console_interpreter(interpreter: &str) -> String {
    if let Some(base) = interpreter.strip_suffix("pythonw") {
        format!("{base}python")
    } else if let Some(base) = interpreter.strip_suffix("pythonw.exe") {
        format!("{base}python.exe")
    } else {
        interpreter.to_string()
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `ToolkitSettings::default()`.
pub fn load_settings(path: &Path) -> Result<ToolkitSettings> {
    if !path.exists() {
        let settings = ToolkitSettings::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: ToolkitSettings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_settings(path: &Path, settings: &ToolkitSettings) -> Result<()> {
    settings.validate()?;
    let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp settings {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace settings {}", path.display()))?;
    Ok(())
}
