//! Deterministic logic behind the toolkit.
//!
//! Core modules perform no I/O. Synthesis in particular is a pure function of
//! the configuration, the trigger and the target platform.

pub mod cancel;
pub mod command;
pub mod diagnostics;
pub mod platform;
pub mod schema;
pub mod stage;
pub mod state;
pub mod synth;
pub mod value;
