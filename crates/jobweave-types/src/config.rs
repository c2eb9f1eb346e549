//! Run configuration types for jobweave.
//!
//! `RunConfig` controls a single local run: lifecycle logging, per-job working
//! directories, and whether references may point outside the submitted flow.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Options for one engine run.
///
/// Loaded from `jobweave.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Run each job inside a freshly created, uniquely named directory.
    #[serde(default)]
    pub create_folders: bool,

    /// Emit run and job lifecycle messages at INFO level.
    #[serde(default = "default_log")]
    pub log: bool,

    /// Parent directory for per-job working directories.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Allow references to jobs outside the flow, resolved from the store.
    #[serde(default)]
    pub allow_external_references: bool,
}

fn default_log() -> bool {
    true
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            create_folders: false,
            log: default_log(),
            root_dir: default_root_dir(),
            allow_external_references: false,
        }
    }
}

impl RunConfig {
    pub fn with_log(mut self, log: bool) -> Self {
        self.log = log;
        self
    }

    pub fn with_folders(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.create_folders = true;
        self.root_dir = root_dir.into();
        self
    }

    pub fn with_external_references(mut self, allow: bool) -> Self {
        self.allow_external_references = allow;
        self
    }
}
