//! Stage-level and item-level failures.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::Stage;
use crate::config::CompressionFormat;
use crate::module::integrity::RecordError;
use crate::process::CommandError;

/// Why a stage could not complete. The pipeline is poisoned afterwards.
#[derive(Debug, Error)]
pub enum FatalCause {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("{action} '{path}': {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("walking source tree: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("source install dir '{0}' does not exist or is not a directory")]
    MissingSource(PathBuf),
    #[error("descriptor file '{0}' is missing")]
    MissingDescriptor(PathBuf),
    #[error("{count} target strip item(s) listed but no target tool prefix is configured")]
    MissingTargetPrefix { count: usize },
    #[error("{tool} backend cannot write {format} archives")]
    UnsupportedFormat {
        tool: &'static str,
        format: CompressionFormat,
    },
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("digest tool produced '{0}', expected a base64 sha256 digest")]
    BadDigest(String),
}

impl FatalCause {
    pub(crate) fn io(
        action: &'static str,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source: io::Error| Self::Io {
            action,
            path,
            source,
        }
    }
}

/// A stage call that did not run to completion.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("{stage} stage failed: {cause}")]
    Fatal { stage: Stage, cause: FatalCause },
    #[error("{requested} stage invoked out of order (expected {})", expected_name(.expected))]
    OutOfOrder {
        expected: Option<Stage>,
        requested: Stage,
    },
    #[error("pipeline already failed; no further stages can run")]
    Poisoned,
}

fn expected_name(expected: &Option<Stage>) -> &'static str {
    expected.map(Stage::name).unwrap_or("no further stage")
}

/// A best-effort item that failed without stopping its stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage}: {item}: {cause}")]
pub struct ItemFailure {
    pub stage: Stage,
    pub item: String,
    pub cause: String,
}
