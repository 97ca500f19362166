//! Command implementations behind the CLI.

pub mod app;
pub mod job;
pub mod keys;
pub mod render;
