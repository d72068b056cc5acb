//! Command synthesis and build orchestration for the Nuitka compiler.
//!
//! A flat build configuration is turned into a compiler invocation, then run
//! through a short linear pipeline (dependency staging, compilation,
//! packaging) with streamed output, cancellation and guaranteed cleanup.
//!
//! - **[`core`]**: Pure, deterministic logic (option schema, configuration
//!   state, command synthesis, stage machine). No I/O.
//! - **[`io`]**: Side-effecting operations (configuration files, child
//!   processes, process trees, packaging).
//!
//! [`pipeline`] coordinates the two to run a build.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
