use anyhow::{Result, bail};

use crate::Context;
use crate::cli::ConfigCommand;
use crate::config::BuddyConfig;
use crate::paths;
use crate::ui;

pub fn run(ctx: &Context, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(ctx),
        ConfigCommand::Path => path(),
        ConfigCommand::Init { force } => init(force),
    }
}

fn show(ctx: &Context) -> Result<()> {
    let file = paths::config_file()?;
    let config = BuddyConfig::load_from(&file)?;

    ui::header("Configuration");
    ui::kv("File", &file.display().to_string());
    if !file.exists() {
        ui::dim("Not found, showing defaults. Run 'buddy config init' to create it.");
    }

    ui::section("defaults");
    ui::kv("modules", &config.defaults.modules.join(", "));
    ui::kv("conda_env", &config.defaults.conda_env);
    ui::kv("parallelism", &config.defaults.parallelism.to_string());
    ui::kv("remote", &config.defaults.remote);
    ui::kv(
        "credential_file",
        config.defaults.credential_file.as_deref().unwrap_or("(none)"),
    );

    ui::section("targets");
    ui::kv("slurm.scratch_dir", &config.slurm.scratch_dir);
    ui::kv("hetzner.image", &config.hetzner.image);
    ui::kv("aws.region", config.aws.region.as_deref().unwrap_or("(aws cli default)"));
    ui::kv("docker.image_tag", &config.docker.image_tag);

    if ctx.verbose > 0 {
        ui::section("TOML");
        println!("{}", config.to_toml()?);
    }

    Ok(())
}

fn path() -> Result<()> {
    println!("{}", paths::config_file()?.display());
    Ok(())
}

fn init(force: bool) -> Result<()> {
    let file = paths::config_file()?;
    if file.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            file.display()
        );
    }

    BuddyConfig::default().save_to(&file)?;
    ui::success(&format!("Wrote {}", file.display()));
    Ok(())
}
