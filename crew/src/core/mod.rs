//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod code_blocks;
pub mod scope;
pub mod state;
pub mod template;
pub mod types;
