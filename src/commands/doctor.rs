use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use crate::Context;
use crate::config::BuddyConfig;
use crate::paths;
use crate::runner;
use crate::ui;
use gitsnap::{GitCli, VersionControl};

struct Issue {
    category: &'static str,
    summary: String,
    detail: Option<String>,
    fix: Option<String>,
}

/// Local tools, as (command, purpose, required).
const TOOLS: [(&str, &str, bool); 6] = [
    ("ssh", "Connections to hosts and clusters", true),
    ("scp", "Script uploads", true),
    ("git", "Code snapshots", true),
    ("docker", "docker:// targets", false),
    ("aws", "aws:// targets", false),
    ("wandb", "Sweep registration", false),
];

pub fn run(ctx: &Context) -> Result<()> {
    ui::header("Deployment Health Check");

    let mut issues: Vec<Issue> = Vec::new();

    check_commands(&mut issues);
    let config = check_config(&mut issues);
    if let Some(config) = &config {
        check_credentials(config, &mut issues);
        check_repository(&config.defaults.remote, &mut issues);
    }

    println!();
    if issues.is_empty() {
        ui::success("Ready to deploy!");
    } else {
        print_issue_summary(ctx, &issues);
    }

    Ok(())
}

fn print_issue_summary(ctx: &Context, issues: &[Issue]) {
    let count = issues.len();
    let label = if count == 1 { "Issue" } else { "Issues" };
    ui::header(&format!("{count} {label} Found"));

    for (i, issue) in issues.iter().enumerate() {
        println!(
            "  {}  {} {}",
            format!("{}.", i + 1).bold(),
            issue.summary,
            format!("[{}]", issue.category).dimmed()
        );
        if !ctx.quiet
            && let Some(detail) = &issue.detail
        {
            for line in detail.lines() {
                println!("      {}", line.dimmed());
            }
        }
        if let Some(fix) = &issue.fix {
            println!("      {} {}", "Fix:".cyan(), fix);
        }
        println!();
    }
}

fn check_commands(issues: &mut Vec<Issue>) {
    ui::section("Local Tools");

    for (cmd, purpose, required) in TOOLS {
        if runner::command_exists(cmd) {
            println!("  {} {} - {}", "✓".green(), cmd, purpose.dimmed());
        } else if required {
            println!("  {} {} - {} {}", "✗".red(), cmd, purpose, "(missing)".red());
            issues.push(Issue {
                category: "Local Tools",
                summary: format!("{cmd} is not installed"),
                detail: Some(format!("{purpose}; needed for every deployment")),
                fix: Some(format!("Install {cmd} and make sure it is on PATH")),
            });
        } else {
            println!("  {} {} - {} {}", "○".yellow(), cmd, purpose, "(optional)".dimmed());
        }
    }
}

fn check_config(issues: &mut Vec<Issue>) -> Option<BuddyConfig> {
    ui::section("Configuration");

    let file = match paths::config_file() {
        Ok(file) => file,
        Err(e) => {
            println!("  {} {}", "✗".red(), e);
            issues.push(Issue {
                category: "Configuration",
                summary: "Config directory cannot be determined".to_string(),
                detail: Some(e.to_string()),
                fix: Some(format!("Set {}", paths::ENV_CONFIG_DIR)),
            });
            return None;
        }
    };

    match BuddyConfig::load_from(&file) {
        Ok(config) => {
            let state = if file.exists() { "" } else { " (defaults)" };
            println!("  {} {}{}", "✓".green(), file.display(), state.dimmed());
            Some(config)
        }
        Err(e) => {
            println!("  {} {}", "✗".red(), file.display());
            issues.push(Issue {
                category: "Configuration",
                summary: "Config file is invalid".to_string(),
                detail: Some(format!("{e:#}")),
                fix: Some("Fix the file or recreate it with 'buddy config init --force'".to_string()),
            });
            None
        }
    }
}

fn check_credentials(config: &BuddyConfig, issues: &mut Vec<Issue>) {
    ui::section("Credentials");

    match config.credential_file() {
        Some(path) if path.is_file() => {
            println!("  {} {}", "✓".green(), path.display());
        }
        Some(path) => {
            println!("  {} {} {}", "✗".red(), path.display(), "(missing)".red());
            issues.push(Issue {
                category: "Credentials",
                summary: "Tracker credential file not found".to_string(),
                detail: Some(
                    "Targets without their own copy get this file; jobs cannot log runs without it"
                        .to_string(),
                ),
                fix: Some("Run 'wandb login' or set defaults.credential_file".to_string()),
            });
        }
        None => {
            println!("  {} credential copy disabled", "○".yellow());
        }
    }

    let token = std::env::var(cloudkit::hetzner::TOKEN_ENV).is_ok_and(|t| !t.is_empty());
    if token {
        println!("  {} {}", "✓".green(), cloudkit::hetzner::TOKEN_ENV);
    } else {
        println!(
            "  {} {} {}",
            "○".yellow(),
            cloudkit::hetzner::TOKEN_ENV,
            "(needed for hetzner:// targets)".dimmed()
        );
    }
}

fn check_repository(remote: &str, issues: &mut Vec<Issue>) {
    ui::section("Repository");

    let repo = match GitCli::open(Path::new(".")) {
        Ok(repo) => repo,
        Err(_) => {
            println!("  {} not inside a git repository", "○".yellow());
            return;
        }
    };
    println!("  {} {}", "✓".green(), repo.repo_root().display());

    match repo.remote_url(remote) {
        Ok(url) => match gitsnap::ensure_ssh_remote(&url) {
            Ok(()) => println!("  {} {remote}: {url}", "✓".green()),
            Err(e) => {
                println!("  {} {remote}: {url}", "✗".red());
                issues.push(Issue {
                    category: "Repository",
                    summary: e.to_string(),
                    detail: Some("Targets clone the snapshot over SSH".to_string()),
                    fix: Some(format!("git remote set-url {remote} git@<host>:<owner>/<repo>.git")),
                });
            }
        },
        Err(e) => {
            println!("  {} {remote}", "✗".red());
            issues.push(Issue {
                category: "Repository",
                summary: format!("Remote '{remote}' is not configured"),
                detail: Some(e.to_string()),
                fix: Some(format!("git remote add {remote} git@<host>:<owner>/<repo>.git")),
            });
        }
    }
}
