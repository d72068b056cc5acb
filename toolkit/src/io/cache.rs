//! Compiler cache location and size report.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::debug;
use walkdir::WalkDir;

use crate::core::platform::Platform;

pub const CACHE_DIR_ENV: &str = "NUITKA_CACHE_DIR";

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Resolve the compiler cache: explicit setting, then `NUITKA_CACHE_DIR`,
/// then the platform cache directory.
pub fn resolve_cache_dir(configured: Option<&Path>, platform: Platform) -> Result<PathBuf> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env::var_os(CACHE_DIR_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let base = dirs::cache_dir().ok_or_else(|| anyhow!("no platform cache directory"))?;
    Ok(platform_cache_dir(&base, platform))
}

/// Compiler cache below the platform cache root `base`.
pub fn platform_cache_dir(base: &Path, platform: Platform) -> PathBuf {
    if platform.is_windows() {
        base.join("Nuitka").join("Nuitka").join("Cache")
    } else {
        base.join("Nuitka")
    }
}

/// Total size of regular files below `dir`; a missing directory is empty.
pub fn directory_size(dir: &Path) -> u64 {
    let total = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum();
    debug!(dir = %dir.display(), bytes = total, "measured directory");
    total
}

/// Size rendered in gigabytes with three decimals.
pub fn format_gb(bytes: u64) -> String {
    format!("{:.3} GB", bytes as f64 / BYTES_PER_GB)
}
