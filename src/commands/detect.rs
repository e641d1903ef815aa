use anyhow::{Context as _, Result, bail};
use std::path::Path;

use crate::Context;
use crate::config::BuddyConfig;
use crate::progress;
use crate::ui;
use remotekit::bundle::OVERRIDE_DIR;
use remotekit::{Connector, Scheme, ScriptBundle, SshConnector, Target};

pub fn run(ctx: &Context, target: &str, project_dir: &Path) -> Result<()> {
    let target: Target = target
        .parse()
        .with_context(|| format!("Invalid target '{target}'"))?;
    if !matches!(target.scheme, Scheme::Detect | Scheme::Ssh) {
        bail!(
            "Backend detection needs an SSH host, got a {} target",
            target.scheme.as_str()
        );
    }

    let config = BuddyConfig::load()?;
    let connector = SshConnector::new(config.ssh_options());

    let pb = (!ctx.quiet).then(|| progress::spinner(&format!("Connecting to {}", target.host)));
    let connected = connector.connect(&target.host);
    if let Some(pb) = &pb {
        match &connected {
            Ok(_) => progress::finish_success(pb, &format!("Connected to {}", target.host)),
            Err(_) => progress::finish_error(pb, &format!("Could not connect to {}", target.host)),
        }
    }
    let transport = connected?;

    let backend = remotekit::detect(transport.as_ref(), project_dir)?;
    let bundle = ScriptBundle::resolve(project_dir, backend)?;

    ui::header(&format!("Target {target}"));
    ui::kv("Backend", &backend.to_string());
    ui::kv("Bundle", backend.bundle_dir());
    if project_dir.join(OVERRIDE_DIR).join(backend.bundle_dir()).is_dir() {
        ui::kv("Scripts", &format!("{OVERRIDE_DIR}/{} (project override)", backend.bundle_dir()));
    } else {
        ui::kv("Scripts", "embedded");
    }
    for file in bundle.files() {
        ui::dim(&file.name);
    }

    Ok(())
}
