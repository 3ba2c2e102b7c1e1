//! Stage bodies. Each takes the shared [`StageContext`](super::StageContext)
//! and reports fatal problems as a [`FatalCause`](super::FatalCause).

pub(crate) mod archive;
pub(crate) mod clean;
pub(crate) mod dedup;
pub(crate) mod metadata;
pub(crate) mod mirror;
pub(crate) mod strip;

/// Top-level subtrees an installed toolchain populates.
pub const CLEANED_SUBTREES: &[&str] = &["bin", "lib", "include", "usr", "lib64", "libexec"];

#[cfg(test)]
pub(crate) mod test_support {
    use std::cell::RefCell;
    use std::fs;
    use std::io;

    use tempfile::TempDir;

    use crate::config::{CompressionFormat, RegistryConfig, ToolConfig};
    use crate::module::{ModuleIdentity, ModuleWorkspace};
    use crate::pipeline::{PackagingPlan, PipelineObserver, StageContext};
    use crate::process::{Cmd, CommandExecutor, CommandResult};
    use crate::rules::{RuleSet, StripList};

    /// Answers commands from a script keyed on substrings of the command
    /// line and records every call.
    #[derive(Default)]
    pub struct ScriptedExecutor {
        pub calls: RefCell<Vec<String>>,
        exits: Vec<(String, i32)>,
        outputs: Vec<(String, String)>,
        creates: Vec<(String, std::path::PathBuf)>,
    }

    impl ScriptedExecutor {
        pub fn exit_when(mut self, needle: &str, code: i32) -> Self {
            self.exits.push((needle.to_string(), code));
            self
        }

        pub fn stdout_when(mut self, needle: &str, stdout: &str) -> Self {
            self.outputs.push((needle.to_string(), stdout.to_string()));
            self
        }

        /// Leave an empty file at `path` when a matching command succeeds.
        pub fn creates_when(mut self, needle: &str, path: &std::path::Path) -> Self {
            self.creates.push((needle.to_string(), path.to_path_buf()));
            self
        }
    }

    impl CommandExecutor for ScriptedExecutor {
        fn execute(&self, cmd: &Cmd) -> io::Result<CommandResult> {
            let line = cmd.to_string();
            self.calls.borrow_mut().push(line.clone());
            let exit_code = self
                .exits
                .iter()
                .find(|(needle, _)| line.contains(needle.as_str()))
                .map(|(_, code)| *code)
                .unwrap_or(0);
            let stdout = self
                .outputs
                .iter()
                .find(|(needle, _)| line.contains(needle.as_str()))
                .map(|(_, out)| out.clone())
                .unwrap_or_default();
            if exit_code == 0 {
                let created = self.creates.iter().filter(|(n, _)| line.contains(n.as_str()));
                for (_, path) in created {
                    fs::write(path, b"")?;
                }
            }
            Ok(CommandResult {
                exit_code,
                stdout,
                stderr: if exit_code == 0 {
                    String::new()
                } else {
                    "scripted failure\n".to_string()
                },
            })
        }
    }

    /// Temp install tree, descriptor dir, registry and workspace.
    pub struct Harness {
        pub temp: TempDir,
        pub workspace: ModuleWorkspace,
        pub plan: PackagingPlan,
        pub executor: ScriptedExecutor,
    }

    impl Harness {
        pub fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let install = temp.path().join("install");
            let descriptors = temp.path().join("descriptors");
            fs::create_dir_all(&install).unwrap();
            fs::create_dir_all(&descriptors).unwrap();
            fs::write(descriptors.join("MODULE.bazel"), "module(name = \"tc\")\n").unwrap();
            fs::write(descriptors.join("BUILD"), "exports_files(glob([\"**\"]))\n").unwrap();

            let identity = ModuleIdentity::new("tc", "15.0.0.1", "x86_64-linux-gnu").unwrap();
            let registry = RegistryConfig {
                root: temp.path().join("registry"),
                compression: CompressionFormat::Zstd,
                ..RegistryConfig::default()
            };
            let workspace =
                ModuleWorkspace::create(identity, temp.path().join("staging"), registry).unwrap();
            let plan = PackagingPlan {
                install_dir: install,
                descriptor_dir: descriptors,
                descriptors: vec!["MODULE.bazel".to_string(), "BUILD".to_string()],
                selection: RuleSet::parse("+ **").unwrap(),
                strip_host: StripList::default(),
                strip_target: StripList::default(),
                target_prefix: None,
                tools: ToolConfig::native(),
            };
            Self {
                temp,
                workspace,
                plan,
                executor: ScriptedExecutor::default(),
            }
        }

        pub fn install_file(&self, rel: &str, contents: &str) {
            let path = self.plan.install_dir.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }

        pub fn staged(&self, rel: &str) -> std::path::PathBuf {
            self.workspace.staging_dir().join(rel)
        }

        pub fn context<'r>(&'r self, observer: &'r mut dyn PipelineObserver) -> StageContext<'r> {
            StageContext {
                workspace: &self.workspace,
                plan: &self.plan,
                executor: &self.executor,
                observer,
            }
        }
    }
}
