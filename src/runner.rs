use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;

/// Run a local command in `cwd` and capture stdout and stderr together.
///
/// Some tools (the tracker CLI among them) print their results on stderr,
/// so both streams are returned.
pub fn run_capture_in(cmd: &str, args: &[&str], cwd: &Path) -> Result<String> {
    log::debug!("$ {} {}", cmd, args.join(" "));
    let output = Command::new(cmd)
        .args(args)
        .current_dir(cwd)
        .output()
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() {
        Ok(format!("{stdout}{stderr}"))
    } else {
        anyhow::bail!("{cmd} failed: {}", stderr.trim())
    }
}

/// Check if a command is on `PATH`
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}
