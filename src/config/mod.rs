//! Configuration: registry destinations, tool backends and job files.
//!
//! Every option has a default matching a stock local Bazel registry under
//! `/opt/bazel/bzlmod` driven by the usual host tools (rsync, strip, rdfind,
//! tar, openssl).

pub mod job;
pub mod vars;

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

pub use job::{load_job, PackagingJob};

/// Default local registry root.
pub const DEFAULT_REGISTRY_ROOT: &str = "/opt/bazel/bzlmod";
/// Default archive directory under the registry root.
pub const DEFAULT_TARBALL_SUBDIR: &str = "tarballs";
/// Default module metadata directory under the registry root.
pub const DEFAULT_MODULE_SUBDIR: &str = "modules";
/// Default host strip program.
pub const DEFAULT_HOST_STRIP: &str = "strip";

/// Compression applied to the module archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    Xz,
    #[serde(alias = "zst")]
    Zstd,
    #[serde(alias = "gz")]
    Gzip,
}

impl CompressionFormat {
    /// File extension of the archive, without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Xz => "tar.xz",
            Self::Zstd => "tar.zst",
            Self::Gzip => "tar.gz",
        }
    }

    /// Compression flag understood by GNU tar.
    pub fn tar_flag(self) -> &'static str {
        match self {
            Self::Xz => "--xz",
            Self::Zstd => "--zstd",
            Self::Gzip => "--gzip",
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Xz => "xz",
            Self::Zstd => "zstd",
            Self::Gzip => "gzip",
        })
    }
}

/// Where finished modules are published.
///
/// - `root`: registry root; modules and tarballs live beneath it.
/// - `tarball_subdir`: archive directory, relative to `root`.
/// - `module_subdir`: metadata directory (`<name>/<version>/`), relative to `root`.
/// - `compression`: archive compression, which also picks the file extension.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    pub root: PathBuf,
    pub tarball_subdir: String,
    pub module_subdir: String,
    pub compression: CompressionFormat,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_REGISTRY_ROOT),
            tarball_subdir: DEFAULT_TARBALL_SUBDIR.to_string(),
            module_subdir: DEFAULT_MODULE_SUBDIR.to_string(),
            compression: CompressionFormat::Xz,
        }
    }
}

/// How the selective copy stage mirrors the install tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorTool {
    #[default]
    Rsync,
    Native,
}

/// How duplicate files are turned into hard links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupTool {
    #[default]
    Rdfind,
    Native,
}

/// How the archive is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveTool {
    #[default]
    Tar,
    Native,
}

impl ArchiveTool {
    /// Whether this backend can produce `format`.
    pub fn supports(self, format: CompressionFormat) -> bool {
        match self {
            Self::Tar => true,
            Self::Native => matches!(format, CompressionFormat::Zstd | CompressionFormat::Gzip),
        }
    }
}

/// How the archive digest is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestTool {
    #[default]
    Openssl,
    Native,
}

/// Backend selection for each tool-driven stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub mirror: MirrorTool,
    pub dedup: DedupTool,
    pub archive: ArchiveTool,
    pub digest: DigestTool,
    pub host_strip: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            mirror: MirrorTool::default(),
            dedup: DedupTool::default(),
            archive: ArchiveTool::default(),
            digest: DigestTool::default(),
            host_strip: DEFAULT_HOST_STRIP.to_string(),
        }
    }
}

impl ToolConfig {
    /// All stages in-process; only the strip tools remain external.
    pub fn native() -> Self {
        Self {
            mirror: MirrorTool::Native,
            dedup: DedupTool::Native,
            archive: ArchiveTool::Native,
            digest: DigestTool::Native,
            ..Self::default()
        }
    }
}
