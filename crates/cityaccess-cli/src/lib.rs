//! City access CLI library.
//!
//! Command handlers and logging setup for the `cityaccess-cli` binary.

pub mod commands;
pub mod logging;
