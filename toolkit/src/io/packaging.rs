//! Post-build packaging: launcher scripts and compressed archives.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tar::Builder as TarBuilder;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::core::command::quote_arg;
use crate::core::platform::Platform;

const BATCH_LAUNCHER: &str = include_str!("../templates/launcher.bat");
const SHELL_LAUNCHER: &str = include_str!("../templates/launcher.sh");

const ZSTD_LEVEL: i32 = 19;

/// Directory the compiler produces for a standalone build of `stem`.
pub fn artifact_dir(output_dir: &Path, stem: &str) -> PathBuf {
    output_dir.join(format!("{stem}.dist"))
}

pub fn archive_path(output_dir: &Path, stem: &str) -> PathBuf {
    output_dir.join(format!("{stem}.tar.zst"))
}

pub fn launcher_path(output_dir: &Path, stem: &str, platform: Platform) -> PathBuf {
    output_dir.join(platform.launcher_file_name(stem))
}

/// Render the launcher script that starts `artifact` from `<stem>.dist`.
pub fn render_launcher(stem: &str, artifact: &str, platform: Platform) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("launcher.bat", BATCH_LAUNCHER)
        .expect("batch launcher template should be valid");
    env.add_template("launcher.sh", SHELL_LAUNCHER)
        .expect("shell launcher template should be valid");

    let dist_dir = format!("{stem}.dist");
    let rendered = if platform.is_windows() {
        let template = env.get_template("launcher.bat")?;
        let text = template.render(context! { dist_dir => dist_dir, artifact => artifact })?;
        format!("{text}\n").replace('\n', "\r\n")
    } else {
        let template = env.get_template("launcher.sh")?;
        let text = template.render(context! {
            dist_dir => quote_arg(&dist_dir, platform),
            artifact => quote_arg(artifact, platform),
        })?;
        format!("{text}\n")
    };
    Ok(rendered)
}

/// Write the launcher script next to the artifact directory.
#[instrument(skip_all, fields(stem, artifact, %platform))]
pub fn write_launcher(
    output_dir: &Path,
    stem: &str,
    artifact: &str,
    platform: Platform,
) -> Result<PathBuf> {
    let script = render_launcher(stem, artifact, platform)?;
    fs::create_dir_all(output_dir)
        .with_context(|| format!("create directory {}", output_dir.display()))?;
    let path = launcher_path(output_dir, stem, platform);
    fs::write(&path, script).with_context(|| format!("write launcher {}", path.display()))?;
    #[cfg(unix)]
    if !platform.is_windows() {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("make launcher executable {}", path.display()))?;
    }
    debug!(path = %path.display(), "launcher written");
    Ok(path)
}

/// Result of an archive request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Created(PathBuf),
    /// The artifact directory does not exist (e.g. a non-directory build mode).
    Skipped { missing: PathBuf },
}

/// Archive `<stem>.dist` (plus `launcher`, if given) into `<stem>.tar.zst`.
///
/// Entries are stored under `<stem>.dist/`, the launcher at the archive root.
#[instrument(skip_all, fields(stem))]
pub fn create_archive(
    output_dir: &Path,
    stem: &str,
    launcher: Option<&Path>,
) -> Result<ArchiveOutcome> {
    let src_dir = artifact_dir(output_dir, stem);
    if !src_dir.is_dir() {
        debug!(missing = %src_dir.display(), "artifact directory missing; archive skipped");
        return Ok(ArchiveOutcome::Skipped { missing: src_dir });
    }
    let out_path = archive_path(output_dir, stem);
    let out = File::create(&out_path)
        .with_context(|| format!("create archive {}", out_path.display()))?;
    let encoder = zstd::stream::Encoder::new(out, ZSTD_LEVEL).context("create zstd encoder")?;
    let mut builder = TarBuilder::new(encoder);
    builder.follow_symlinks(false);

    let root = output_dir;
    for path in collect_entries(&src_dir)? {
        let rel = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let metadata = fs::symlink_metadata(&path)
            .with_context(|| format!("stat {}", path.display()))?;
        if metadata.is_dir() {
            builder
                .append_dir(&rel, &path)
                .with_context(|| format!("archive directory {}", path.display()))?;
        } else {
            builder
                .append_path_with_name(&path, &rel)
                .with_context(|| format!("archive file {}", path.display()))?;
        }
    }

    if let Some(launcher) = launcher
        && launcher.is_file()
    {
        let name = launcher
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{stem}.launcher"));
        builder
            .append_path_with_name(launcher, &name)
            .with_context(|| format!("archive launcher {}", launcher.display()))?;
    }

    let encoder = builder.into_inner().context("finalize tar builder")?;
    encoder.finish().context("finish zstd stream")?;
    debug!(path = %out_path.display(), "archive written");
    Ok(ArchiveOutcome::Created(out_path))
}

/// Every path under `dir` (itself included), sorted. Any walk error fails the whole listing.
fn collect_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .map(|entry| entry.map(walkdir::DirEntry::into_path))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("walk {}", dir.display()))?;
    entries.sort();
    Ok(entries)
}
