use anyhow::{Context as _, Result, bail};
use chrono::Local;
use colored::Colorize;
use dialoguer::Input;
use std::env;
use std::fs;

use crate::Context;
use crate::cli::DeployArgs;
use crate::config::BuddyConfig;
use crate::experiment::{self, DeployEnv};
use crate::fanout::{FanOut, Workload};
use crate::session::{DeployRequest, Deployment, DeploymentSession};
use crate::sweep::{self, SweepRequest, SweepSpec, WandbCli};
use crate::ui;
use gitsnap::{GitCli, VersionControl};
use remotekit::{Dispatcher, Launcher, Scheme, Target};

/// Placeholder used in dry runs before the real value exists.
const PENDING: &str = "<pending>";

pub fn run(ctx: &Context, args: DeployArgs) -> Result<()> {
    let deploy_env = DeployEnv::from_env();
    if deploy_env.already_deployed() {
        ui::info(&format!(
            "Already running on a target ({} or {} is set), nothing to deploy",
            experiment::ENV_SLURM_JOB_ID,
            experiment::ENV_IS_DEPLOYED
        ));
        return Ok(());
    }

    let config = BuddyConfig::load()?;
    let cwd = env::current_dir().context("Could not read the current directory")?;
    let project_dir = fs::canonicalize(cwd.join(&args.project_dir))
        .with_context(|| format!("Project directory not found: {}", args.project_dir.display()))?;
    let repo = GitCli::open(&project_dir)?;

    let target: Target = args
        .target
        .parse()
        .with_context(|| format!("Invalid target '{}'", args.target))?;
    let modules = modules(&args, &config);
    let env_name = args
        .env
        .clone()
        .unwrap_or_else(|| config.defaults.conda_env.clone());
    let remote = args
        .remote
        .clone()
        .unwrap_or_else(|| config.defaults.remote.clone());

    if let Some(warning) = experiment::module_warning(&modules) {
        ui::warn(&warning);
    }
    if target.scheme == Scheme::Detect {
        if let Some(warning) = experiment::torch_warning_for(repo.repo_root()) {
            ui::warn(warning);
        }
    }

    let sweep_spec = args.sweep.as_deref().map(|raw| SweepSpec::parse(raw, &cwd));
    let entrypoint = match &args.entrypoint {
        Some(path) => Some(experiment::relative_entrypoint(path, repo.repo_root(), &cwd)?),
        None if sweep_spec.is_some() => None,
        None => bail!("An entrypoint is required unless --sweep is given"),
    };

    let experiment_id = experiment::experiment_id(
        args.name.as_deref(),
        &deploy_env,
        sweep_spec.is_some(),
        |title| {
            if args.dry_run {
                return Ok(PENDING.to_string());
            }
            ask_experiment_id(title)
        },
    )?;

    let fan_out = FanOut {
        jobs: args.jobs as usize,
        parallelism: args
            .parallel
            .map_or(config.defaults.parallelism, |p| p as usize),
        sequential: args.sequential || deploy_env.debug_deployment,
    };

    if args.dry_run {
        print_plan(&target, &experiment_id, entrypoint.as_deref(), sweep_spec.as_ref(), &modules, &env_name, fan_out);
        return Ok(());
    }

    // Sweeps are registered before the snapshot so a bad definition costs no commit
    let workload = match &sweep_spec {
        Some(spec) => {
            let repo_url = repo.remote_url(&remote)?;
            let project = experiment::project_name(&repo_url)
                .with_context(|| format!("Cannot derive a project name from {repo_url}"))?;
            let sweep_id = sweep::resolve(
                &SweepRequest {
                    spec,
                    experiment_id: &experiment_id,
                    entrypoint: entrypoint.as_deref(),
                    project: &project,
                    entity: args.entity.as_deref(),
                },
                &WandbCli {
                    cwd: repo.repo_root().to_path_buf(),
                },
            )?;
            Workload::Sweep { sweep_id }
        }
        None => Workload::Job {
            entrypoint: entrypoint.unwrap_or_default(),
        },
    };

    if !ctx.quiet {
        ui::header(&format!("Deploying {experiment_id}"));
        ui::kv("Target", &target.to_string());
        ui::kv("Launching", &format!("{} x {}", fan_out.jobs, workload.describe()));
        println!();
    }

    let dispatcher = Dispatcher::new(
        config.ssh_options(),
        config.cloud_settings(),
        config.executor_settings(),
    );
    let request = DeployRequest {
        target: args.target.clone(),
        experiment_id,
        workload,
        modules,
        env: env_name,
        extra_header: args.extra_header.clone(),
        fan_out,
    };

    let deployment = DeploymentSession::new(&dispatcher, &repo, remote).deploy(&request)?;
    print_summary(ctx, &deployment);

    let failures = deployment.failures();
    if failures > 0 {
        bail!("{failures} of {} launches failed", deployment.outcomes.len());
    }
    Ok(())
}

/// `--module` replaces the configured list.
fn modules(args: &DeployArgs, config: &BuddyConfig) -> Vec<String> {
    if args.modules.is_empty() {
        config.defaults.modules.clone()
    } else {
        args.modules.clone()
    }
}

fn ask_experiment_id(title: &str) -> Result<String> {
    Input::<String>::new()
        .with_prompt(format!("{title} Enter a name for this experiment"))
        .allow_empty(true)
        .interact_text()
        .context("Could not read the experiment id")
}

fn print_plan(
    target: &Target,
    experiment_id: &str,
    entrypoint: Option<&str>,
    sweep: Option<&SweepSpec>,
    modules: &[String],
    env_name: &str,
    fan_out: FanOut,
) {
    ui::header("Deployment plan");
    ui::warn("Dry run - nothing will be committed, pushed or launched");
    println!();
    ui::kv("Target", &target.to_string());
    ui::kv("Experiment", experiment_id);
    ui::kv("Modules", &modules.join(", "));
    ui::kv("Environment", env_name);
    ui::kv("Jobs", &fan_out.jobs.to_string());
    let workers = if fan_out.sequential { 1 } else { fan_out.jobs.min(fan_out.parallelism) };
    ui::kv("Workers", &workers.to_string());

    let (script, launch_target) = match sweep {
        Some(SweepSpec::Id(id)) => ("run_sweep.sh", id.clone()),
        Some(SweepSpec::Definition(path)) => {
            ui::kv("Sweep definition", &path.display().to_string());
            ("run_sweep.sh", PENDING.to_string())
        }
        None => ("run_experiment.sh", entrypoint.unwrap_or(PENDING).to_string()),
    };

    let job = remotekit::JobContext {
        repo_url: PENDING.to_string(),
        snapshot: PENDING.to_string(),
        modules: modules.to_vec(),
        env: env_name.to_string(),
    };
    ui::section("Launch command");
    ui::command(&job.command(Launcher::BashLogin, "<scripts>", script, &launch_target).render());
}

fn print_summary(ctx: &Context, deployment: &Deployment) {
    if ctx.quiet {
        return;
    }

    ui::header("Deployment");
    ui::kv("Executor", &deployment.kind.to_string());
    ui::kv("Host", &deployment.host);
    ui::kv("Snapshot", &deployment.snapshot.reference);
    if let Some(tag) = &deployment.snapshot.tag {
        ui::kv("Tag", tag);
    }
    ui::kv("Scripts", &deployment.scripts_folder);
    ui::kv("Finished", &Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
    println!();

    for outcome in &deployment.outcomes {
        match &outcome.result {
            Ok(output) => {
                let detail = output.lines().last().unwrap_or("started");
                println!("  {} job {} {}", "✓".green(), outcome.index, detail.dimmed());
            }
            Err(e) => println!("  {} job {} {}", "✗".red(), outcome.index, format!("{e:#}").red()),
        }
    }

    let failures = deployment.failures();
    println!();
    if failures == 0 {
        ui::success(&format!("Launched {} jobs", deployment.outcomes.len()));
    } else {
        ui::warn(&format!(
            "Launched {}, {failures} failed",
            deployment.outcomes.len() - failures
        ));
    }
}
