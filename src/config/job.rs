//! Packaging job files.
//!
//! A job names the module, points at an installed toolchain and carries the
//! selection and strip rules:
//!
//! ```toml
//! [module]
//! name = "gcc_riscv64"
//! upstream_version = "15.0.0"
//! patch = 1
//! build_target = "riscv64-unknown-linux-gnu"
//!
//! [source]
//! install_dir = "/opt/riscv/sysroot"
//! descriptor_dir = "bazel/gcc_riscv64"
//!
//! [rules]
//! selection_file = "rules/gcc_riscv64.filter"
//! strip_host = "bin/${build_target}-gcc\nlibexec/gcc/${build_target}/${gcc_version}/cc1"
//! target_prefix = "${build_target}-"
//!
//! [vars]
//! gcc_version = "15.0.0"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use super::vars::expand;
use super::{RegistryConfig, ToolConfig};
use crate::module::{ModuleIdentity, ModuleWorkspace};
use crate::pipeline::PackagingPlan;
use crate::rules::{RuleSet, StripList};

/// Descriptor files copied into every module when the job names none.
pub const DEFAULT_DESCRIPTORS: &[&str] = &["MODULE.bazel", "BUILD"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobToml {
    module: ModuleToml,
    source: SourceToml,
    #[serde(default)]
    workspace: WorkspaceToml,
    #[serde(default)]
    registry: RegistryConfig,
    #[serde(default)]
    tools: ToolConfig,
    #[serde(default)]
    vars: BTreeMap<String, String>,
    rules: RulesToml,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleToml {
    name: String,
    version: Option<String>,
    upstream_version: Option<String>,
    patch: Option<u32>,
    build_target: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceToml {
    install_dir: String,
    descriptor_dir: String,
    descriptors: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkspaceToml {
    staging_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RulesToml {
    selection: Option<String>,
    selection_file: Option<String>,
    strip_host: Option<String>,
    strip_host_file: Option<String>,
    strip_target: Option<String>,
    strip_target_file: Option<String>,
    target_prefix: Option<String>,
}

/// A fully resolved job: identity, staging dir, registry and the plan
/// handed to the pipeline.
#[derive(Debug, Clone)]
pub struct PackagingJob {
    pub job_path: PathBuf,
    pub identity: ModuleIdentity,
    pub staging_dir: PathBuf,
    pub registry: RegistryConfig,
    pub plan: PackagingPlan,
}

impl PackagingJob {
    /// Create (or reuse) the staging dir and bind it to the registry.
    pub fn workspace(&self) -> Result<ModuleWorkspace> {
        ModuleWorkspace::create(
            self.identity.clone(),
            self.staging_dir.clone(),
            self.registry.clone(),
        )
        .with_context(|| format!("preparing workspace for {}", self.identity))
    }
}

/// Load and resolve a job file.
///
/// Relative paths resolve against the job file's directory, `${var}`
/// references expand from `name`, `version`, `build_target` and `[vars]`.
pub fn load_job(job_path: &Path) -> Result<PackagingJob> {
    let text = fs::read_to_string(job_path)
        .with_context(|| format!("reading job file '{}'", job_path.display()))?;
    let base_dir = job_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parse_job(&text, job_path, base_dir)
}

/// Resolve job text as if it were read from `job_path`.
pub fn parse_job(text: &str, job_path: &Path, base_dir: &Path) -> Result<PackagingJob> {
    let parsed: JobToml = toml::from_str(text)
        .with_context(|| format!("parsing job file '{}'", job_path.display()))?;
    let invalid = |msg: String| anyhow!("invalid job file '{}': {}", job_path.display(), msg);

    let version = match (
        parsed.module.version,
        parsed.module.upstream_version,
        parsed.module.patch,
    ) {
        (Some(version), None, None) => version,
        (None, Some(upstream), patch) => {
            ModuleIdentity::version_from_parts(&upstream, patch.unwrap_or(0))
        }
        (None, None, _) => {
            return Err(invalid(
                "[module] needs either 'version' or 'upstream_version'".to_string(),
            ))
        }
        _ => {
            return Err(invalid(
                "[module] 'version' cannot be combined with 'upstream_version'/'patch'"
                    .to_string(),
            ))
        }
    };

    let identity = ModuleIdentity::new(
        parsed.module.name.trim(),
        version.trim(),
        parsed.module.build_target.trim(),
    )
    .map_err(|err| invalid(err.to_string()))?;

    let vars = substitution_vars(&identity, parsed.vars).map_err(invalid)?;

    if !parsed.tools.archive.supports(parsed.registry.compression) {
        return Err(invalid(format!(
            "the native archive backend cannot write {} archives (use archive = \"tar\")",
            parsed.registry.compression
        )));
    }

    let rules = parsed.rules;
    let selection_text = read_rule_text(
        "selection",
        rules.selection,
        rules.selection_file,
        base_dir,
        job_path,
    )?
    .ok_or_else(|| invalid("[rules] needs 'selection' or 'selection_file'".to_string()))?;
    let selection_text = expand(&selection_text, &vars)
        .with_context(|| format!("expanding selection rules in '{}'", job_path.display()))?;
    let selection = RuleSet::parse(&selection_text)
        .with_context(|| format!("parsing selection rules in '{}'", job_path.display()))?;

    let strip_host = load_strip_list(
        "strip_host",
        rules.strip_host,
        rules.strip_host_file,
        base_dir,
        job_path,
        &vars,
    )?;
    let strip_target = load_strip_list(
        "strip_target",
        rules.strip_target,
        rules.strip_target_file,
        base_dir,
        job_path,
        &vars,
    )?;
    let target_prefix = rules
        .target_prefix
        .map(|prefix| expand(&prefix, &vars))
        .transpose()
        .with_context(|| format!("expanding target_prefix in '{}'", job_path.display()))?
        .filter(|prefix| !prefix.trim().is_empty());

    let descriptors = parsed
        .source
        .descriptors
        .unwrap_or_else(|| DEFAULT_DESCRIPTORS.iter().map(|d| d.to_string()).collect());
    for descriptor in &descriptors {
        if descriptor.is_empty() || descriptor.contains('/') || descriptor == ".." {
            return Err(invalid(format!(
                "descriptor '{}' must be a plain file name",
                descriptor
            )));
        }
    }

    let staging_dir = match parsed.workspace.staging_dir {
        Some(dir) => resolve_job_path(base_dir, &dir),
        None => base_dir.join("staging").join(identity.name()),
    };

    let mut registry = parsed.registry;
    registry.root = resolve_job_path(base_dir, &registry.root);

    let plan = PackagingPlan {
        install_dir: resolve_job_path(base_dir, &parsed.source.install_dir),
        descriptor_dir: resolve_job_path(base_dir, &parsed.source.descriptor_dir),
        descriptors,
        selection,
        strip_host,
        strip_target,
        target_prefix,
        tools: parsed.tools,
    };

    Ok(PackagingJob {
        job_path: job_path.to_path_buf(),
        identity,
        staging_dir,
        registry,
        plan,
    })
}

fn substitution_vars(
    identity: &ModuleIdentity,
    extra: BTreeMap<String, String>,
) -> std::result::Result<BTreeMap<String, String>, String> {
    let mut vars = BTreeMap::from([
        ("name".to_string(), identity.name().to_string()),
        ("version".to_string(), identity.version().to_string()),
        ("build_target".to_string(), identity.build_target().to_string()),
    ]);
    for (key, value) in extra {
        if vars.contains_key(&key) {
            return Err(format!("[vars] cannot redefine built-in variable '{}'", key));
        }
        vars.insert(key, value);
    }
    Ok(vars)
}

fn read_rule_text(
    field: &str,
    inline: Option<String>,
    file: Option<String>,
    base_dir: &Path,
    job_path: &Path,
) -> Result<Option<String>> {
    match (inline, file) {
        (Some(_), Some(_)) => bail!(
            "invalid job file '{}': [rules] sets both '{}' and '{}_file'",
            job_path.display(),
            field,
            field
        ),
        (Some(text), None) => Ok(Some(text)),
        (None, Some(file)) => {
            let path = resolve_job_path(base_dir, &file);
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading {} rules '{}'", field, path.display()))?;
            Ok(Some(text))
        }
        (None, None) => Ok(None),
    }
}

fn load_strip_list(
    field: &str,
    inline: Option<String>,
    file: Option<String>,
    base_dir: &Path,
    job_path: &Path,
    vars: &BTreeMap<String, String>,
) -> Result<StripList> {
    match read_rule_text(field, inline, file, base_dir, job_path)? {
        Some(text) => {
            let text = expand(&text, vars).with_context(|| {
                format!("expanding {} list in '{}'", field, job_path.display())
            })?;
            Ok(StripList::parse(&text))
        }
        None => Ok(StripList::default()),
    }
}

fn resolve_job_path(base_dir: &Path, path: impl AsRef<Path>) -> PathBuf {
    let candidate = path.as_ref();
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArchiveTool, CompressionFormat, MirrorTool};
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
[module]
name = "gcc_riscv64"
upstream_version = "15.0.0"
patch = 2
build_target = "riscv64-unknown-linux-gnu"

[source]
install_dir = "install"
descriptor_dir = "/srv/descriptors"

[rules]
selection = """
+ bin/
+ bin/${build_target}-*
+ lib/
+ lib/gcc/**
"""
strip_host = "bin/${build_target}-gcc\n\nbin/${build_target}-gcc\n"
strip_target = "lib/gcc/${build_target}/${gcc_version}/libgcc.a"
target_prefix = "${build_target}-"

[vars]
gcc_version = "15.0.0"
"#;

    fn parse(text: &str) -> Result<PackagingJob> {
        parse_job(text, Path::new("/jobs/gcc.toml"), Path::new("/jobs"))
    }

    #[test]
    fn minimal_job_resolves_identity_and_defaults() {
        let job = parse(MINIMAL).unwrap();
        assert_eq!(job.identity.name(), "gcc_riscv64");
        assert_eq!(job.identity.version(), "15.0.0.2");
        assert_eq!(job.staging_dir, PathBuf::from("/jobs/staging/gcc_riscv64"));
        assert_eq!(job.registry, RegistryConfig::default());
        assert_eq!(job.plan.tools, ToolConfig::default());
        assert_eq!(job.plan.install_dir, PathBuf::from("/jobs/install"));
        assert_eq!(job.plan.descriptor_dir, PathBuf::from("/srv/descriptors"));
        assert_eq!(job.plan.descriptors, vec!["MODULE.bazel", "BUILD"]);
    }

    #[test]
    fn variables_expand_into_rules_and_prefix() {
        let job = parse(MINIMAL).unwrap();
        assert!(job
            .plan
            .selection
            .is_selected("bin/riscv64-unknown-linux-gnu-gcc", false));
        assert!(!job.plan.selection.is_selected("bin/gcc", false));
        assert_eq!(
            job.plan.strip_host.entries(),
            ["bin/riscv64-unknown-linux-gnu-gcc"]
        );
        assert_eq!(
            job.plan.strip_target.entries(),
            ["lib/gcc/riscv64-unknown-linux-gnu/15.0.0/libgcc.a"]
        );
        assert_eq!(
            job.plan.target_prefix.as_deref(),
            Some("riscv64-unknown-linux-gnu-")
        );
    }

    #[test]
    fn explicit_version_and_sections() {
        let text = MINIMAL
            .replace("upstream_version = \"15.0.0\"\npatch = 2", "version = \"15.0.0.7\"")
            + r#"
[workspace]
staging_dir = "/tmp/stage"

[registry]
root = "registry"
compression = "zstd"

[tools]
mirror = "native"
archive = "native"
"#;
        let job = parse(&text).unwrap();
        assert_eq!(job.identity.version(), "15.0.0.7");
        assert_eq!(job.staging_dir, PathBuf::from("/tmp/stage"));
        assert_eq!(job.registry.root, PathBuf::from("/jobs/registry"));
        assert_eq!(job.registry.compression, CompressionFormat::Zstd);
        assert_eq!(job.plan.tools.mirror, MirrorTool::Native);
        assert_eq!(job.plan.tools.archive, ArchiveTool::Native);
    }

    #[test]
    fn conflicting_version_fields_are_rejected() {
        let text = MINIMAL.replace("patch = 2", "patch = 2\nversion = \"1\"");
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("cannot be combined"));
    }

    #[test]
    fn unknown_variable_is_a_config_error() {
        let text = MINIMAL.replace("${gcc_version}", "${gcc_ver}");
        let err = parse(&text).unwrap_err();
        assert!(format!("{err:#}").contains("unknown variable '${gcc_ver}'"));
    }

    #[test]
    fn builtin_variables_cannot_be_redefined() {
        let text = MINIMAL.replace("[vars]\n", "[vars]\nname = \"other\"\n");
        assert!(parse(&text).is_err());
    }

    #[test]
    fn native_archive_with_xz_is_rejected() {
        let text = format!("{MINIMAL}\n[tools]\narchive = \"native\"\n");
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("cannot write xz"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = MINIMAL.replace("[source]\n", "[source]\nprefix = \"x\"\n");
        assert!(parse(&text).is_err());
    }

    #[test]
    fn selection_can_come_from_a_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("gcc.filter"), "+ bin/\n+ bin/${name}\n").unwrap();
        let text = r#"
[module]
name = "tc"
version = "1.0.0"
build_target = "x86_64-linux-gnu"

[source]
install_dir = "install"
descriptor_dir = "descriptors"
descriptors = ["MODULE.bazel"]

[rules]
selection_file = "gcc.filter"
"#;
        let job_path = dir.path().join("job.toml");
        fs::write(&job_path, text).unwrap();

        let job = load_job(&job_path).unwrap();
        assert!(job.plan.selection.is_selected("bin/tc", false));
        assert!(job.plan.strip_host.is_empty());
        assert!(job.plan.target_prefix.is_none());
        assert_eq!(job.plan.descriptors, vec!["MODULE.bazel"]);
        assert_eq!(job.plan.install_dir, dir.path().join("install"));
    }

    #[test]
    fn missing_selection_is_rejected() {
        let text = MINIMAL.replace("selection = \"\"\"", "unused = \"\"\"");
        assert!(parse(&text).is_err());
    }
}
