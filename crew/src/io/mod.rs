//! I/O helpers for crew commands.

pub mod config;
pub mod transcript;
