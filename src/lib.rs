//! Packages an installed compiler toolchain as a Bazel module.
//!
//! A packaging run takes an install tree (binaries, headers, runtime
//! libraries), mirrors a rule-selected subset into a staging workspace,
//! strips and deduplicates it, and publishes a reproducible archive plus a
//! `source.json` integrity record into a local Bazel registry.
//!
//! # Architecture
//!
//! ```text
//! job.toml ──> config::load_job ──> PackagingJob
//!                                     │
//!                                     ├── ModuleWorkspace (module)
//!                                     └── PackagingPlan (pipeline)
//!                                           │
//! Pipeline: clean ─> selective copy ─> metadata attach ─> strip host
//!           ─> strip target ─> deduplicate ─> archive + digest
//!                                           │
//!            <registry>/tarballs/<name>-<version>.tar.xz
//!            <registry>/modules/<name>/<version>/{MODULE.bazel,BUILD,source.json}
//! ```
//!
//! External tools (rsync, strip, rdfind, tar, openssl) run through
//! [`process::Cmd`] on a [`process::CommandExecutor`]. Every tool-driven
//! stage except stripping also has an in-process backend.

pub mod config;
pub mod module;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod rules;

pub use config::{load_job, PackagingJob, RegistryConfig, ToolConfig};
pub use module::{ModuleIdentity, ModuleWorkspace, RegistryLock, SourceRecord};
pub use pipeline::{
    PackagingPlan, Pipeline, PipelineObserver, RecordingObserver, RunReport, Stage, StageFailure,
    TracingObserver,
};
pub use process::{Cmd, CommandExecutor, SystemExecutor};
pub use rules::{RuleSet, StripList};
