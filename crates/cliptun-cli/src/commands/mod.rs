//! Subcommand implementations.

pub mod client;
pub mod exec;
pub mod readline;
pub mod server;
pub mod stdio;
