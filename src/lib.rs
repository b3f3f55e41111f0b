//! vibe-mcp: MCP server wrapping the Vibe CLI.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod cli;
pub mod config;
pub mod cost;
pub mod format;
pub mod install;
pub mod process;
pub mod server;
pub mod session;
pub mod state;
pub mod tools;
pub mod utils;
