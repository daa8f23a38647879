//! Sequential multi-agent pipeline for resolving customer-support inquiries.
//!
//! A [`pipeline::Pipeline`] runs an ordered list of tasks, each bound to an
//! agent role. Every stage sees the previous stage's answer, may call lookup
//! tools, and may delegate a narrowed sub-task to a coworker agent. The
//! architecture keeps the same split throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (data model, template resolution,
//!   code-block checks, run state). No I/O, fully testable in isolation.
//! - **[`tools`]** and **[`reasoning`]**: the external capabilities behind
//!   traits, plus default HTTP adapters for them.
//! - **[`io`]**: Side-effecting helpers (config files, run transcripts).
//!
//! [`pipeline`] coordinates core logic with the capabilities; [`support`]
//! defines the canonical three-stage support crew.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod reasoning;
pub mod support;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
