//! Staging workspace and registry layout for one module.
//!
//! The registry is laid out as:
//!
//! ```text
//! <root>/<module_subdir>/<name>/<version>/MODULE.bazel
//! <root>/<module_subdir>/<name>/<version>/source.json
//! <root>/<tarball_subdir>/<name>-<version>.tar.xz
//! <root>/locks/<name>-<version>.lock
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::ModuleIdentity;
use crate::config::RegistryConfig;

/// File name of the integrity record inside the registry module directory.
pub const SOURCE_RECORD_FILENAME: &str = "source.json";

const LOCKS_SUBDIR: &str = "locks";

/// Setup failures; nothing has been staged when one of these is returned.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("creating module workspace '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("module workspace '{0}' exists but is not a directory")]
    NotADirectory(PathBuf),
}

/// Destination paths of a module inside the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLayout {
    config: RegistryConfig,
}

impl RegistryLayout {
    pub fn new(config: RegistryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn tarball_dir(&self) -> PathBuf {
        self.config.root.join(&self.config.tarball_subdir)
    }

    pub fn tarball_path(&self, identity: &ModuleIdentity) -> PathBuf {
        self.tarball_dir().join(format!(
            "{}.{}",
            identity.archive_stem(),
            self.config.compression.extension()
        ))
    }

    pub fn module_dir(&self, identity: &ModuleIdentity) -> PathBuf {
        self.config
            .root
            .join(&self.config.module_subdir)
            .join(identity.name())
            .join(identity.version())
    }

    pub fn source_record_path(&self, identity: &ModuleIdentity) -> PathBuf {
        self.module_dir(identity).join(SOURCE_RECORD_FILENAME)
    }

    pub fn lock_path(&self, identity: &ModuleIdentity) -> PathBuf {
        self.config
            .root
            .join(LOCKS_SUBDIR)
            .join(format!("{}.lock", identity.archive_stem()))
    }
}

/// The staging tree of one packaging run plus its registry destinations.
///
/// A workspace is owned by exactly one run at a time. It survives between
/// runs; stale content is removed by the clean stage, not implicitly.
#[derive(Debug, Clone)]
pub struct ModuleWorkspace {
    identity: ModuleIdentity,
    staging_dir: PathBuf,
    layout: RegistryLayout,
}

impl ModuleWorkspace {
    /// Ensure the staging directory exists and bind it to its destinations.
    pub fn create(
        identity: ModuleIdentity,
        staging_dir: impl Into<PathBuf>,
        registry: RegistryConfig,
    ) -> Result<Self, WorkspaceError> {
        let staging_dir = staging_dir.into();
        if staging_dir.exists() && !staging_dir.is_dir() {
            return Err(WorkspaceError::NotADirectory(staging_dir));
        }
        fs::create_dir_all(&staging_dir).map_err(|source| WorkspaceError::CreateDir {
            path: staging_dir.clone(),
            source,
        })?;

        Ok(Self {
            identity,
            staging_dir,
            layout: RegistryLayout::new(registry),
        })
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn layout(&self) -> &RegistryLayout {
        &self.layout
    }

    pub fn tarball_path(&self) -> PathBuf {
        self.layout.tarball_path(&self.identity)
    }

    pub fn module_dir(&self) -> PathBuf {
        self.layout.module_dir(&self.identity)
    }

    pub fn source_record_path(&self) -> PathBuf {
        self.layout.source_record_path(&self.identity)
    }
}
