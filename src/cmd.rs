use std::path::Path;
use std::process::{Command, Output, Stdio};

use tracing::debug;

use crate::error::{ProvisionError, ProvisionResult};

/// Run a command and capture its output. Fails if the command
/// returns a non-zero exit code; the error carries the tool's
/// stderr verbatim.
pub fn run(program: &str, args: &[&str]) -> ProvisionResult<String> {
    run_in(None, program, args)
}

/// Like [`run`], with the child's working directory set to `dir`.
pub fn run_in(dir: Option<&Path>, program: &str, args: &[&str]) -> ProvisionResult<String> {
    let output = spawn(dir, program, args)?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(ProvisionError::CommandFailed {
            command: format_command(program, args),
            status: output.status,
            stderr,
        })
    }
}

/// Run a command with stdin/stdout/stderr inherited, so the
/// operator sees the tool's own progress output.
pub fn run_interactive(dir: Option<&Path>, program: &str, args: &[&str]) -> ProvisionResult<()> {
    debug!(command = %format_command(program, args), "running interactive command");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    let status = command.status().map_err(|e| not_found_or_io(program, e))?;

    if status.success() {
        Ok(())
    } else {
        Err(ProvisionError::CommandFailed {
            command: format_command(program, args),
            status,
            stderr: "see output above".to_string(),
        })
    }
}

/// Check if a command exists on PATH.
#[must_use]
pub fn command_exists(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

fn spawn(dir: Option<&Path>, program: &str, args: &[&str]) -> ProvisionResult<Output> {
    debug!(command = %format_command(program, args), "running command");

    let mut command = Command::new(program);
    command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    command.output().map_err(|e| not_found_or_io(program, e))
}

fn not_found_or_io(program: &str, e: std::io::Error) -> ProvisionError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ProvisionError::CommandNotFound(program.to_string())
    } else {
        ProvisionError::Io(e)
    }
}

pub(crate) fn format_command(program: &str, args: &[&str]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().map(|a| (*a).to_string()));
    parts.join(" ")
}
