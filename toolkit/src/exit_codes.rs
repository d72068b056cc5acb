//! Stable exit codes for toolkit CLI commands.

/// Command succeeded; for `build`, the pipeline reached `Done`.
pub const OK: i32 = 0;
/// Invalid settings, configuration or arguments, or another setup error.
pub const INVALID: i32 = 1;
/// `build` ended in `Failed`, or `doctor` found the compiler unusable.
pub const BUILD_FAILED: i32 = 2;
/// `build` was cancelled.
pub const CANCELLED: i32 = 3;
