//! External command execution.
//!
//! Every third-party tool the pipeline drives (rsync, strip, rdfind, tar,
//! openssl) goes through a [`Cmd`] run on a [`CommandExecutor`]. The
//! executor is a trait so tests can script exit codes without touching the
//! host.
//!
//! # Example
//!
//! ```rust,ignore
//! use toolchain_packager::process::{Cmd, SystemExecutor};
//!
//! let result = Cmd::new("strip")
//!     .arg_path(&binary)
//!     .allow_fail()
//!     .run_on(&SystemExecutor)?;
//! if !result.success() {
//!     eprintln!("strip failed: {}", result.stderr.trim());
//! }
//! ```

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code, or -1 when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors from running a [`Cmd`].
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{} (exit code {exit_code}): {}", context_line(.message, .command), .stderr.trim())]
    Failed {
        command: String,
        message: Option<String>,
        exit_code: i32,
        stderr: String,
    },
}

fn context_line(message: &Option<String>, command: &str) -> String {
    match message {
        Some(msg) => format!("{msg}: `{command}`"),
        None => format!("`{command}` failed"),
    }
}

/// Something that can run a [`Cmd`] to completion.
pub trait CommandExecutor {
    fn execute(&self, cmd: &Cmd) -> io::Result<CommandResult>;
}

/// Runs commands as real child processes, blocking until they exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn execute(&self, cmd: &Cmd) -> io::Result<CommandResult> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).stdin(Stdio::null());
        if let Some(dir) = &cmd.dir {
            command.current_dir(dir);
        }
        let output = command.output()?;
        Ok(CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Builder for one external tool invocation.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    dir: Option<PathBuf>,
    shell: bool,
    allow_fail: bool,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            dir: None,
            shell: false,
            allow_fail: false,
            error_msg: None,
        }
    }

    /// A command line interpreted by `sh -c`, for pipelines and redirects.
    pub fn shell(script: impl Into<String>) -> Self {
        let mut cmd = Self::new("sh").arg("-c").arg(script.into());
        cmd.shell = true;
        cmd
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn dir(mut self, dir: &Path) -> Self {
        self.dir = Some(dir.to_path_buf());
        self
    }

    /// Report non-zero exits as a result instead of an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn is_shell(&self) -> bool {
        self.shell
    }

    /// Program followed by its arguments, lossily converted for display.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    pub fn run_on(&self, executor: &dyn CommandExecutor) -> Result<CommandResult, CommandError> {
        let result = executor
            .execute(self)
            .map_err(|source| CommandError::Spawn {
                command: self.to_string(),
                source,
            })?;

        if !result.success() && !self.allow_fail {
            return Err(CommandError::Failed {
                command: self.to_string(),
                message: self.error_msg.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }

        Ok(result)
    }
}

/// Quote `path` for interpolation into a [`Cmd::shell`] script.
pub fn shell_quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    if !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@".contains(c))
    {
        return raw.into_owned();
    }
    format!("'{}'", raw.replace('\'', "'\\''"))
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Scripted {
        exit_code: i32,
        seen: RefCell<Vec<Vec<String>>>,
    }

    impl CommandExecutor for Scripted {
        fn execute(&self, cmd: &Cmd) -> io::Result<CommandResult> {
            self.seen.borrow_mut().push(cmd.argv());
            Ok(CommandResult {
                exit_code: self.exit_code,
                stdout: "out\n".to_string(),
                stderr: "boom\n".to_string(),
            })
        }
    }

    struct Unspawnable;

    impl CommandExecutor for Unspawnable {
        fn execute(&self, _cmd: &Cmd) -> io::Result<CommandResult> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such tool"))
        }
    }

    fn scripted(exit_code: i32) -> Scripted {
        Scripted {
            exit_code,
            seen: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn builder_collects_argv_in_order() {
        let exec = scripted(0);
        Cmd::new("rdfind")
            .args(["-makehardlinks", "true"])
            .arg_path(Path::new("/tmp/ws"))
            .run_on(&exec)
            .unwrap();

        assert_eq!(
            exec.seen.borrow()[0],
            ["rdfind", "-makehardlinks", "true", "/tmp/ws"]
        );
    }

    #[test]
    fn shell_commands_go_through_sh() {
        let cmd = Cmd::shell("openssl dgst -binary -sha256 < a.tar | openssl base64 -A");
        assert!(cmd.is_shell());
        assert_eq!(
            cmd.argv(),
            [
                "sh",
                "-c",
                "openssl dgst -binary -sha256 < a.tar | openssl base64 -A"
            ]
        );
    }

    #[test]
    fn non_zero_exit_is_an_error_with_stderr() {
        let err = Cmd::new("tar")
            .error_msg("archive creation failed")
            .run_on(&scripted(2))
            .unwrap_err();

        match &err {
            CommandError::Failed {
                exit_code, stderr, ..
            } => {
                assert_eq!(*exit_code, 2);
                assert_eq!(stderr, "boom\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "archive creation failed: `tar` (exit code 2): boom"
        );
    }

    #[test]
    fn allow_fail_returns_the_result() {
        let result = Cmd::new("strip").allow_fail().run_on(&scripted(1)).unwrap();
        assert!(!result.success());
        assert_eq!(result.stdout, "out\n");
    }

    #[test]
    fn spawn_failure_is_reported_even_with_allow_fail() {
        let err = Cmd::new("rsync")
            .allow_fail()
            .run_on(&Unspawnable)
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
        assert!(err.to_string().contains("failed to start `rsync`"));
    }

    #[test]
    fn system_executor_captures_output_and_exit_code() {
        let ok = Cmd::shell("printf hello; printf oops >&2")
            .run_on(&SystemExecutor)
            .unwrap();
        assert_eq!(ok.stdout, "hello");
        assert_eq!(ok.stderr, "oops");

        let failed = Cmd::shell("exit 3")
            .allow_fail()
            .run_on(&SystemExecutor)
            .unwrap();
        assert_eq!(failed.exit_code, 3);
    }

    #[test]
    fn shell_quote_leaves_plain_paths_alone() {
        assert_eq!(
            shell_quote(Path::new("/opt/bazel/gcc-15.0.0.1.tar.xz")),
            "/opt/bazel/gcc-15.0.0.1.tar.xz"
        );
        assert_eq!(shell_quote(Path::new("a b")), "'a b'");
        assert_eq!(shell_quote(Path::new("it's")), "'it'\\''s'");

        let quoted = Cmd::shell(format!("printf %s {}", shell_quote(Path::new("x'; y"))))
            .run_on(&SystemExecutor)
            .unwrap();
        assert_eq!(quoted.stdout, "x'; y");
    }

    #[test]
    fn system_executor_honours_working_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker"), "x").unwrap();

        let result = Cmd::new("ls")
            .dir(temp.path())
            .run_on(&SystemExecutor)
            .unwrap();
        assert!(result.stdout.contains("marker"));
    }
}
