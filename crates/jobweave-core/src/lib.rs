//! Engine core and port trait definitions for jobweave.
//!
//! This crate turns flows into a mutable execution graph and runs it. It
//! defines the "ports" (`JobStore`, `WorkdirProvider`, `JobFunction`) that
//! adapters implement, and depends only on `jobweave-types` -- never on
//! `jobweave-infra` or any database crate.
//!
//! - `graph` -- flattening, the execution graph, and directive mutations
//! - `resolve` -- output cache and reference resolution
//! - `function` -- callable trait, registry, and invocation context
//! - `scheduler` -- the run loop
//! - `store` -- job store port
//! - `workdir` -- per-job working directories
//! - `definition` -- YAML/JSON flow definitions

pub mod definition;
pub mod function;
pub mod graph;
pub mod resolve;
pub mod responses;
pub mod scheduler;
pub mod store;
pub mod workdir;

#[cfg(test)]
mod testing;
