mod cli;
mod commands;
mod config;
mod experiment;
mod fanout;
mod paths;
mod progress;
mod runner;
mod session;
mod sweep;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use colored::Colorize;
use std::io;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match dispatch(&ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            ui::error(&format!("{err:#}"));
            if let Some(advice) = advice(&err) {
                eprintln!("  {} {}", "Hint:".cyan(), advice);
            }
            ExitCode::FAILURE
        }
    }
}

fn dispatch(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Deploy(args) => commands::deploy::run(ctx, args),
        Command::Detect {
            target,
            project_dir,
        } => commands::detect::run(ctx, &target, &project_dir),
        Command::Doctor => commands::doctor::run(ctx),
        Command::Config(cmd) => commands::config::run(ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "buddy", &mut io::stdout());
            Ok(())
        }
    }
}

/// Advice for the first library error in the cause chain.
fn advice(err: &anyhow::Error) -> Option<&'static str> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<remotekit::Error>() {
            if let remotekit::Error::Provisioning(cloud) = e {
                return Some(cloud.category().advice());
            }
            return Some(e.category().advice());
        }
        if let Some(e) = cause.downcast_ref::<cloudkit::Error>() {
            return Some(e.category().advice());
        }
        cause.downcast_ref::<gitsnap::Error>().map(gitsnap_advice)
    })
}

fn gitsnap_advice(err: &gitsnap::Error) -> &'static str {
    match err {
        gitsnap::Error::UnsupportedRemote { .. } => {
            "Switch the remote to SSH: git remote set-url origin git@<host>:<owner>/<repo>.git"
        }
        gitsnap::Error::NotARepository(_) => "Run buddy from inside the project's git repository",
        gitsnap::Error::DetachedHead => "Check out a branch first: git switch <branch>",
        gitsnap::Error::CommandFailed { .. } | gitsnap::Error::Io(_) => {
            "Check that git works in this repository and the remote accepts pushes"
        }
    }
}
