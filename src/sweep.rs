//! Sweep ids and sweep definitions.
//!
//! `--sweep` takes either an existing sweep id or a YAML definition. A
//! definition is renamed after the experiment, registered with the tracker
//! CLI, and the resulting id qualified as `entity/project/id`.

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::runner;

/// Tracker CLI used to register definitions.
pub const TRACKER_CLI: &str = "wandb";

/// What `--sweep` refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepSpec {
    /// Existing sweep, passed through unchanged
    Id(String),
    /// YAML definition to register
    Definition(PathBuf),
}

impl SweepSpec {
    /// An existing `.yaml`/`.yml` file is a definition, anything else an id.
    pub fn parse(raw: &str, cwd: &Path) -> Self {
        let path = cwd.join(raw);
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e, "yaml" | "yml"));
        if is_yaml && path.is_file() {
            Self::Definition(path)
        } else {
            Self::Id(raw.to_string())
        }
    }
}

/// Registers sweep definitions with the tracker.
pub trait SweepRegistry {
    /// Register the definition at `path` and return the tool's output.
    fn register(&self, path: &Path, project: &str, entity: Option<&str>) -> Result<String>;
}

/// `wandb sweep` run in the project directory.
pub struct WandbCli {
    pub cwd: PathBuf,
}

impl SweepRegistry for WandbCli {
    fn register(&self, path: &Path, project: &str, entity: Option<&str>) -> Result<String> {
        let path = path.to_string_lossy();
        let mut args = vec!["sweep", "--project", project];
        if let Some(entity) = entity {
            args.extend(["--entity", entity]);
        }
        args.push(&path);
        runner::run_capture_in(TRACKER_CLI, &args, &self.cwd)
            .context("Could not register the sweep (is `wandb` installed and logged in?)")
    }
}

/// A loaded definition, ready to register.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepDefinition {
    pub body: Mapping,
}

impl SweepDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read sweep definition {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid sweep definition {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        match serde_yaml::from_str::<Value>(content)? {
            Value::Mapping(body) => Ok(Self { body }),
            _ => bail!("a sweep definition must be a mapping"),
        }
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }

    pub fn program(&self) -> Option<&str> {
        self.str_field("program")
    }

    pub fn entity(&self) -> Option<&str> {
        self.str_field("entity")
    }

    pub fn set_name(&mut self, name: &str) {
        self.body.insert(Value::from("name"), Value::from(name));
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.body).context("Could not serialize sweep definition")
    }
}

/// Warning when the definition runs a different program than `entrypoint`.
/// Nothing to compare without an entrypoint.
pub fn program_mismatch(definition: &SweepDefinition, entrypoint: Option<&str>) -> Option<String> {
    let entrypoint = entrypoint?;
    match definition.program() {
        Some(program) if program != entrypoint => Some(format!(
            "Sweep program {program} does not match the entrypoint {entrypoint}"
        )),
        _ => None,
    }
}

/// Sweep id from the tracker's output, qualified as `entity/project/id`.
///
/// The `wandb agent <path>` hint already carries the full path; otherwise the
/// bare id is qualified with `entity` and `project`.
pub fn parse_sweep_id(output: &str, project: &str, entity: Option<&str>) -> Result<String> {
    let agent = Regex::new(r"wandb agent (\S+)")?;
    if let Some(caps) = agent.captures(output) {
        return Ok(caps[1].to_string());
    }

    let created = Regex::new(r"Created sweep with ID: (\w+)")?;
    let Some(caps) = created.captures(output) else {
        bail!("No sweep id in the tracker output:\n{}", output.trim());
    };
    let id = &caps[1];
    Ok(match entity {
        Some(entity) => format!("{entity}/{project}/{id}"),
        None => format!("{project}/{id}"),
    })
}

/// Inputs for [`resolve`].
pub struct SweepRequest<'a> {
    pub spec: &'a SweepSpec,
    pub experiment_id: &'a str,
    pub entrypoint: Option<&'a str>,
    pub project: &'a str,
    pub entity: Option<&'a str>,
}

/// Turn `--sweep` into the id the agents run.
pub fn resolve(request: &SweepRequest<'_>, registry: &dyn SweepRegistry) -> Result<String> {
    let path = match request.spec {
        SweepSpec::Id(id) => return Ok(id.clone()),
        SweepSpec::Definition(path) => path,
    };

    let mut definition = SweepDefinition::load(path)?;
    definition.set_name(request.experiment_id);
    if let Some(warning) = program_mismatch(&definition, request.entrypoint) {
        log::warn!("{warning}");
    }
    let entity = request.entity.or(definition.entity()).map(str::to_string);

    let mut staged = tempfile::Builder::new()
        .prefix("buddy-sweep-")
        .suffix(".yaml")
        .tempfile()
        .context("Could not stage the sweep definition")?;
    staged.write_all(definition.to_yaml()?.as_bytes())?;
    staged.flush()?;

    let output = registry.register(staged.path(), request.project, entity.as_deref())?;
    let id = parse_sweep_id(&output, request.project, entity.as_deref())?;
    log::info!("Registered sweep {id}");
    Ok(id)
}

// ============================================================================
// Tests
// ============================================================================
