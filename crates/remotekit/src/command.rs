//! Typed launch command lines.
//!
//! Launch scripts take positional arguments in a fixed order:
//!
//! ```text
//! <script> <repo_url> <entrypoint | sweep_id> <snapshot> <modules> <env>
//! ```
//!
//! [`LaunchCommand`] holds them as fields, so the order lives in one place.

use std::fmt;

/// How the script is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launcher {
    /// `bash -l <script> ...` (login shell, so modules and conda are set up)
    BashLogin,
    /// `source /etc/profile; sbatch <script> ...`
    Sbatch,
}

/// Separator for the module list argument.
pub const MODULE_SEPARATOR: &str = "@";

/// A launch or sweep invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// How the script is started
    pub launcher: Launcher,
    /// Script path on the target
    pub script: String,
    /// Repository to clone (or directory holding the checkout)
    pub repo_url: String,
    /// Entrypoint for single runs, sweep id for sweeps
    pub target: String,
    /// Snapshot reference to check out
    pub snapshot: String,
    /// Environment modules to load
    pub modules: Vec<String>,
    /// Environment (conda env) name
    pub env: String,
}

impl LaunchCommand {
    /// Positional arguments after the script, in order.
    pub fn args(&self) -> [String; 5] {
        [
            self.repo_url.clone(),
            self.target.clone(),
            self.snapshot.clone(),
            self.modules.join(MODULE_SEPARATOR),
            self.env.clone(),
        ]
    }

    /// The shell command line.
    pub fn render(&self) -> String {
        let prefix = match self.launcher {
            Launcher::BashLogin => "bash -l",
            Launcher::Sbatch => "source /etc/profile; sbatch",
        };
        let mut line = format!("{prefix} {}", quote(&self.script));
        for arg in self.args() {
            line.push(' ');
            line.push_str(&quote(&arg));
        }
        line
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Quote `s` for a POSIX shell, leaving plain words untouched.
pub fn quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '@' | ':' | '=' | '+' | ',' | '%')
        });
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}
