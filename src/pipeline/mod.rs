//! The seven-stage module packaging pipeline.
//!
//! Stages must run in order: clean, selective copy, metadata attach, strip
//! host, strip target, deduplicate, archive + digest. [`Pipeline`] enforces
//! the order and stops for good after the first fatal failure. Strip stages
//! are best-effort per item; their failures are collected as warnings.
//!
//! ```rust,ignore
//! let workspace = job.workspace()?;
//! let mut observer = TracingObserver::new();
//! let report = Pipeline::new(&workspace, &job.plan, &SystemExecutor, &mut observer)
//!     .run_all()?;
//! println!("{}", report.record.integrity);
//! ```

pub mod error;
pub mod observer;
pub mod stages;

use std::fmt;
use std::path::PathBuf;

use crate::config::ToolConfig;
use crate::module::{ModuleWorkspace, SourceRecord};
use crate::process::CommandExecutor;
use crate::rules::{RuleSet, StripList};

pub use error::{FatalCause, ItemFailure, StageFailure};
pub use observer::{PipelineEvent, PipelineObserver, RecordingObserver, TracingObserver};

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Clean,
    SelectiveCopy,
    MetadataAttach,
    StripHost,
    StripTarget,
    Deduplicate,
    ArchiveAndDigest,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Clean,
        Stage::SelectiveCopy,
        Stage::MetadataAttach,
        Stage::StripHost,
        Stage::StripTarget,
        Stage::Deduplicate,
        Stage::ArchiveAndDigest,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Clean => "clean",
            Stage::SelectiveCopy => "selective-copy",
            Stage::MetadataAttach => "metadata-attach",
            Stage::StripHost => "strip-host",
            Stage::StripTarget => "strip-target",
            Stage::Deduplicate => "deduplicate",
            Stage::ArchiveAndDigest => "archive-digest",
        }
    }

    pub fn next(self) -> Option<Stage> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the stages need besides the workspace.
#[derive(Debug, Clone)]
pub struct PackagingPlan {
    /// Installed toolchain tree to mirror from.
    pub install_dir: PathBuf,
    /// Directory holding `MODULE.bazel`, `BUILD` and friends.
    pub descriptor_dir: PathBuf,
    pub descriptors: Vec<String>,
    pub selection: RuleSet,
    pub strip_host: StripList,
    pub strip_target: StripList,
    /// Tool prefix for target binaries, e.g. `riscv64-unknown-linux-gnu-`.
    pub target_prefix: Option<String>,
    pub tools: ToolConfig,
}

/// Result of a complete run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub archive: PathBuf,
    pub record: SourceRecord,
    pub warnings: Vec<ItemFailure>,
}

/// Shared inputs of one stage invocation.
pub(crate) struct StageContext<'r> {
    pub workspace: &'r ModuleWorkspace,
    pub plan: &'r PackagingPlan,
    pub executor: &'r dyn CommandExecutor,
    pub observer: &'r mut dyn PipelineObserver,
}

impl StageContext<'_> {
    pub fn emit(&mut self, event: PipelineEvent) {
        self.observer.on_event(&event);
    }
}

/// Order-enforcing driver over one workspace.
pub struct Pipeline<'a> {
    workspace: &'a ModuleWorkspace,
    plan: &'a PackagingPlan,
    executor: &'a dyn CommandExecutor,
    observer: &'a mut dyn PipelineObserver,
    next: Option<Stage>,
    poisoned: bool,
    warnings: Vec<ItemFailure>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        workspace: &'a ModuleWorkspace,
        plan: &'a PackagingPlan,
        executor: &'a dyn CommandExecutor,
        observer: &'a mut dyn PipelineObserver,
    ) -> Self {
        Self {
            workspace,
            plan,
            executor,
            observer,
            next: Some(Stage::Clean),
            poisoned: false,
            warnings: Vec::new(),
        }
    }

    /// Stage the next call must invoke; `None` once everything ran.
    pub fn next_stage(&self) -> Option<Stage> {
        self.next
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn warnings(&self) -> &[ItemFailure] {
        &self.warnings
    }

    pub fn clean(&mut self) -> Result<(), StageFailure> {
        self.run_unit(Stage::Clean, stages::clean::run)
    }

    pub fn selective_copy(&mut self) -> Result<(), StageFailure> {
        self.run_unit(Stage::SelectiveCopy, stages::mirror::run)
    }

    pub fn attach_metadata(&mut self) -> Result<(), StageFailure> {
        self.run_unit(Stage::MetadataAttach, stages::metadata::run)
    }

    pub fn strip_host(&mut self) -> Result<(), StageFailure> {
        self.run_best_effort(Stage::StripHost, stages::strip::run_host)
    }

    pub fn strip_target(&mut self) -> Result<(), StageFailure> {
        self.run_best_effort(Stage::StripTarget, stages::strip::run_target)
    }

    pub fn deduplicate(&mut self) -> Result<(), StageFailure> {
        self.run_unit(Stage::Deduplicate, stages::dedup::run)
    }

    /// Archive the workspace, digest it and publish `source.json`.
    pub fn archive_and_digest(&mut self) -> Result<SourceRecord, StageFailure> {
        self.run_stage(Stage::ArchiveAndDigest, stages::archive::run)
    }

    /// Run every remaining stage in order.
    pub fn run_all(mut self) -> Result<RunReport, StageFailure> {
        self.clean()?;
        self.selective_copy()?;
        self.attach_metadata()?;
        self.strip_host()?;
        self.strip_target()?;
        self.deduplicate()?;
        let record = self.archive_and_digest()?;
        Ok(RunReport {
            archive: self.workspace.tarball_path(),
            record,
            warnings: self.warnings,
        })
    }

    fn run_unit(
        &mut self,
        stage: Stage,
        body: fn(&mut StageContext<'_>) -> Result<(), FatalCause>,
    ) -> Result<(), StageFailure> {
        self.run_stage(stage, body)
    }

    fn run_best_effort(
        &mut self,
        stage: Stage,
        body: fn(&mut StageContext<'_>) -> Result<Vec<ItemFailure>, FatalCause>,
    ) -> Result<(), StageFailure> {
        let failures = self.run_stage(stage, body)?;
        self.warnings.extend(failures);
        Ok(())
    }

    fn run_stage<T>(
        &mut self,
        stage: Stage,
        body: fn(&mut StageContext<'_>) -> Result<T, FatalCause>,
    ) -> Result<T, StageFailure> {
        self.enter(stage)?;

        let mut ctx = StageContext {
            workspace: self.workspace,
            plan: self.plan,
            executor: self.executor,
            observer: &mut *self.observer,
        };
        match body(&mut ctx) {
            Ok(value) => {
                self.next = stage.next();
                self.observer
                    .on_event(&PipelineEvent::StageFinished { stage });
                Ok(value)
            }
            Err(cause) => {
                self.poisoned = true;
                self.observer.on_event(&PipelineEvent::StageFailed {
                    stage,
                    message: cause.to_string(),
                });
                Err(StageFailure::Fatal { stage, cause })
            }
        }
    }

    fn enter(&mut self, stage: Stage) -> Result<(), StageFailure> {
        if self.poisoned {
            return Err(StageFailure::Poisoned);
        }
        if self.next != Some(stage) {
            return Err(StageFailure::OutOfOrder {
                expected: self.next,
                requested: stage,
            });
        }
        self.observer
            .on_event(&PipelineEvent::StageStarted { stage });
        Ok(())
    }
}
