//! Build Command Execution
//!
//! Every external command the pipeline runs (configure scripts, make,
//! setup.py) goes through [`run_command`]:
//!
//! - The child runs in its own process group and is registered with the
//!   global [`ChildRegistry`], so an interrupt stops the whole tree
//! - The run's search-path overlay is applied to the child environment
//! - Output is inherited, build logs stream to the terminal as they happen

use crate::env::SearchPaths;
use crate::error::{BuildError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use std::ffi::OsStr;
use std::process::{Command, Stdio};
use std::sync::PoisonError;
use tracing::{debug, info, warn};

/// Exit status of a finished build command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// The command as it was logged
    pub label: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    /// Whether the command exited with code 0
    pub success: bool,
}

/// Run a command line through `sh -c`
pub fn run_shell(line: &str, paths: &SearchPaths) -> Result<CommandOutput> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    run_command(cmd, line.to_string(), paths)
}

/// Run a program with explicit arguments, no shell involved
pub fn run_program<I, S>(program: &str, args: I, paths: &SearchPaths) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    let mut label = program.to_string();
    for arg in args {
        label.push(' ');
        label.push_str(&arg.as_ref().to_string_lossy());
        cmd.arg(arg);
    }
    run_command(cmd, label, paths)
}

/// Spawn `cmd` in a tracked process group and wait for it
pub fn run_command(mut cmd: Command, label: String, paths: &SearchPaths) -> Result<CommandOutput> {
    info!("Running: {}", label);
    paths.apply(&mut cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .in_new_process_group();

    let mut child = cmd
        .spawn()
        .map_err(|e| BuildError::command(format!("Failed to spawn `{}`: {}", label, e)))?;
    let pid = child.id();

    ChildRegistry::global()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .register(pid, &label);

    let status = child.wait();

    ChildRegistry::global()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .unregister(pid);

    let status =
        status.map_err(|e| BuildError::command(format!("Failed waiting for `{}`: {}", label, e)))?;

    let output = CommandOutput {
        label,
        exit_code: status.code(),
        success: status.success(),
    };
    if output.success {
        debug!("`{}` finished", output.label);
    } else {
        warn!(
            "`{}` failed with exit code {}",
            output.label,
            output.exit_code.unwrap_or(-1)
        );
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_success_and_failure() {
        let paths = SearchPaths::default();

        let ok = run_shell("true", &paths).unwrap();
        assert!(ok.success);
        assert_eq!(ok.exit_code, Some(0));

        let failed = run_shell("exit 3", &paths).unwrap();
        assert!(!failed.success);
        assert_eq!(failed.exit_code, Some(3));
    }

    #[test]
    fn test_program_label_includes_arguments() {
        let out = run_program("sh", ["-c", "exit 0"], &SearchPaths::default()).unwrap();
        assert_eq!(out.label, "sh -c exit 0");
        assert!(out.success);
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let err = run_program("definitely-not-a-real-tool", ["--version"], &SearchPaths::default())
            .unwrap_err();
        assert!(matches!(err, BuildError::Command(_)));
    }

    #[test]
    fn test_overlay_reaches_child_environment() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut paths = SearchPaths::default();
        paths.prepend_python_path(dir.path());

        let check = format!(
            "case \"$PYTHONPATH\" in {}*) exit 0;; *) exit 1;; esac",
            dir.path().display()
        );
        assert!(run_shell(&check, &paths).unwrap().success);
    }
}
