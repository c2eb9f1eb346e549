//! Infrastructure layer for jobweave.
//!
//! Contains implementations of the port traits defined in `jobweave-core`:
//! an in-memory job store, a SQLite job store, the `jobweave.toml` config
//! loader, and the `run_locally` entry point that wires them together.

pub mod config;
pub mod local;
pub mod memory;
pub mod sqlite;
