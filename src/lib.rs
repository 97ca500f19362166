//! Enumerate registry keys across local and remote machines.

pub mod commands;
pub mod config;
pub mod domain;
pub mod infrastructure;
