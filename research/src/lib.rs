//! Citation-verified research report pipeline engine.
//!
//! This crate turns a free-text topic into a citation-verified report through
//! a fixed nine-stage sequence driven by a resumable state machine. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (clarification gate, citation-id
//!   bookkeeping, structural verification). No I/O, fully testable in
//!   isolation.
//! - **[`io`]**: Side-effecting operations (run artifacts, transition log,
//!   cache, acquisition capabilities). Isolated to enable scripted fakes in
//!   tests.
//!
//! [`machine`] coordinates core logic with I/O to drive the stage sequence;
//! [`pool`] bounds concurrent source acquisition while keeping results in
//! submission order so citation ids stay deterministic.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod machine;
pub mod pool;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
