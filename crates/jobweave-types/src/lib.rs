//! Shared domain types for jobweave.
//!
//! This crate contains the data model the engine operates on: jobs, flows,
//! output references, job responses, persisted job documents, and the run
//! configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod document;
pub mod error;
pub mod flow;
pub mod input;
pub mod job;
pub mod reference;
pub mod response;
