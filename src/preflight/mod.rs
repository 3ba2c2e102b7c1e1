//! Host tool checks run before packaging.
//!
//! A job only needs the external programs its backends use: a job with
//! native mirror, dedup, archive and digest backends still needs `strip`
//! when it lists host binaries.
//!
//! Strip tools are best-effort. A missing strip only costs one warning per
//! listed binary, so [`check_packaging_tools`] reports them instead of
//! failing; [`check_required_tools`] treats every tool alike.
//!
//! # Example
//!
//! ```rust,ignore
//! use toolchain_packager::preflight::{check_packaging_tools, required_tools};
//!
//! let tools = required_tools(&job.plan);
//! for tool in check_packaging_tools(&tools)? {
//!     println!("warning: {} not found, {} will be skipped", tool.program, tool.used_by);
//! }
//! ```

use anyhow::{bail, Result};

use crate::config::{ArchiveTool, DedupTool, DigestTool, MirrorTool};
use crate::pipeline::PackagingPlan;

/// An external program a job depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequirement {
    pub program: String,
    /// Distribution package that usually provides it.
    pub package: &'static str,
    /// Stage that runs it.
    pub used_by: &'static str,
    /// The stage survives without it.
    pub best_effort: bool,
}

impl ToolRequirement {
    fn new(program: impl Into<String>, package: &'static str, used_by: &'static str) -> Self {
        Self {
            program: program.into(),
            package,
            used_by,
            best_effort: false,
        }
    }

    fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }
}

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Programs `plan` will invoke, in stage order.
pub fn required_tools(plan: &PackagingPlan) -> Vec<ToolRequirement> {
    let mut tools = Vec::new();

    if plan.tools.mirror == MirrorTool::Rsync {
        tools.push(ToolRequirement::new("rsync", "rsync", "selective-copy"));
    }
    if !plan.strip_host.is_empty() {
        tools.push(ToolRequirement::new(
            plan.tools.host_strip.clone(),
            "binutils",
            "strip-host",
        )
        .best_effort());
    }
    if !plan.strip_target.is_empty() {
        if let Some(prefix) = &plan.target_prefix {
            tools.push(ToolRequirement::new(
                format!("{prefix}strip"),
                "cross binutils",
                "strip-target",
            )
            .best_effort());
        }
    }
    if plan.tools.dedup == DedupTool::Rdfind {
        tools.push(ToolRequirement::new("rdfind", "rdfind", "deduplicate"));
    }
    if plan.tools.archive == ArchiveTool::Tar {
        tools.push(ToolRequirement::new("tar", "tar", "archive-digest"));
    }
    if plan.tools.digest == DigestTool::Openssl {
        tools.push(ToolRequirement::new("sh", "coreutils", "archive-digest"));
        tools.push(ToolRequirement::new("openssl", "openssl", "archive-digest"));
    }
    tools
}

/// Tools from `tools` that are not on `PATH`.
pub fn missing_tools(tools: &[ToolRequirement]) -> Vec<&ToolRequirement> {
    tools
        .iter()
        .filter(|tool| !command_exists(&tool.program))
        .collect()
}

fn missing_list(missing: &[&ToolRequirement]) -> String {
    missing
        .iter()
        .map(|t| format!("  {} (install: {}, used by {})", t.program, t.package, t.used_by))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Check that specific tools are available.
///
/// Returns an error listing every missing tool and its package.
pub fn check_required_tools(tools: &[ToolRequirement]) -> Result<()> {
    let missing = missing_tools(tools);
    if !missing.is_empty() {
        bail!("Missing required host tools:\n{}", missing_list(&missing));
    }
    Ok(())
}

/// Check the tools a packaging run cannot do without.
///
/// Fails only on missing tools that are not best-effort; missing best-effort
/// tools are returned so the caller can warn about them.
pub fn check_packaging_tools(tools: &[ToolRequirement]) -> Result<Vec<&ToolRequirement>> {
    let (optional, fatal): (Vec<_>, Vec<_>) =
        missing_tools(tools).into_iter().partition(|t| t.best_effort);
    if !fatal.is_empty() {
        bail!("Missing required host tools:\n{}", missing_list(&fatal));
    }
    Ok(optional)
}
