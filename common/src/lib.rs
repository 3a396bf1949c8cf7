//! Shared building blocks for chainscan: the configuration model, target
//! input handling and the logging macros used across the workspace.

pub mod config;
pub mod log;
pub mod targets;
