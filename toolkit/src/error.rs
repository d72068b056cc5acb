//! Failure taxonomy for pipeline runs.

use thiserror::Error;

use crate::core::stage::Stage;

/// Why a pipeline run, or one of its packaging steps, failed.
///
/// Cancellation is not represented here; a cancelled run ends in
/// [`Stage::Cancelled`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("{stage} exited with {}", describe_code(*.code))]
    StageFailure { stage: Stage, code: Option<i32> },

    #[error("failed to start {stage}: {message}")]
    Spawn { stage: Stage, message: String },

    #[error("packaging step '{step}' failed: {message}")]
    Packaging { step: String, message: String },

    #[error("pipeline setup failed: {message}")]
    Setup { message: String },
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
