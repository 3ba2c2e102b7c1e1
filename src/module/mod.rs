//! Module identity, workspace layout and the published integrity record.

pub mod integrity;
pub mod lock;
pub mod workspace;

use std::fmt;

use thiserror::Error;

pub use integrity::{SourceRecord, Verification};
pub use lock::RegistryLock;
pub use workspace::{ModuleWorkspace, RegistryLayout, WorkspaceError};

/// Rejected identity fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid module {field} '{value}': {reason}")]
pub struct IdentityError {
    pub field: &'static str,
    pub value: String,
    pub reason: &'static str,
}

/// Name, version and build target of a packaged module.
///
/// The version is the upstream toolchain version followed by a local patch
/// ordinal, e.g. `15.0.1.3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleIdentity {
    name: String,
    version: String,
    build_target: String,
}

impl ModuleIdentity {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        build_target: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let identity = Self {
            name: name.into(),
            version: version.into(),
            build_target: build_target.into(),
        };
        validate_segment("name", &identity.name)?;
        validate_segment("version", &identity.version)?;
        validate_segment("build target", &identity.build_target)?;
        Ok(identity)
    }

    /// Join an upstream version and a patch ordinal: `("15.0.1", 3)` gives
    /// `"15.0.1.3"`.
    pub fn version_from_parts(upstream: &str, patch: u32) -> String {
        format!("{}.{patch}", upstream.trim())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn build_target(&self) -> &str {
        &self.build_target
    }

    /// `<name>-<version>`, the stem of the archive file name.
    pub fn archive_stem(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.name, self.version, self.build_target)
    }
}

/// Identity fields become directory names, so they must be a single safe
/// path segment.
fn validate_segment(field: &'static str, value: &str) -> Result<(), IdentityError> {
    let reason = if value.trim().is_empty() {
        Some("must not be empty")
    } else if value.trim() != value {
        Some("must not have surrounding whitespace")
    } else if value.contains('/') || value.contains('\\') {
        Some("must not contain path separators")
    } else if value == "." || value.contains("..") {
        Some("must not contain '..'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(IdentityError {
            field,
            value: value.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
