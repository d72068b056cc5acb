//! Pipeline stage state machine.

use std::fmt;

use serde::Serialize;

/// Stage of a build run. `Idle` means no run is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    PreparingDeps,
    Compiling,
    Packaging,
    Done,
    Failed,
    Cancelled,
}

impl Stage {
    /// Stages during which a child process or packaging step may be active.
    pub fn is_running(self) -> bool {
        matches!(self, Self::PreparingDeps | Self::Compiling | Self::Packaging)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: Stage) -> bool {
        use Stage::{Cancelled, Compiling, Done, Failed, Idle, Packaging, PreparingDeps};
        match (self, next) {
            (Idle, PreparingDeps | Compiling | Cancelled | Failed) => true,
            (PreparingDeps, Compiling | Failed | Cancelled) => true,
            (Compiling, Packaging | Done | Failed | Cancelled) => true,
            (Packaging, Done | Failed | Cancelled) => true,
            (Done | Failed | Cancelled, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::PreparingDeps => "preparing dependencies",
            Self::Compiling => "compiling",
            Self::Packaging => "packaging",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
