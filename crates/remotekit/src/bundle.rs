//! Launch script bundles.
//!
//! One bundle per [`Backend`]. The default bundles are compiled into the
//! binary; a project can override them with a `buddy_scripts/<backend>/`
//! directory next to its code.

use crate::detect::Backend;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Project-local override directory.
pub const OVERRIDE_DIR: &str = "buddy_scripts";

/// Files that receive the extra scheduler header.
pub const SCHEDULER_TEMPLATES: [&str; 2] = ["run_sweep.sh", "srun_python.sh"];

const GENERAL: &[(&str, &str)] = &[
    ("common.sh", include_str!("../scripts/general/common.sh")),
    ("run_experiment.sh", include_str!("../scripts/general/run_experiment.sh")),
    ("run_sweep.sh", include_str!("../scripts/general/run_sweep.sh")),
];

const SLURM: &[(&str, &str)] = &[
    ("common.sh", include_str!("../scripts/slurm/common.sh")),
    ("run_experiment.sh", include_str!("../scripts/slurm/run_experiment.sh")),
    ("run_sweep.sh", include_str!("../scripts/slurm/run_sweep.sh")),
    ("srun_python.sh", include_str!("../scripts/slurm/srun_python.sh")),
];

const DOCKER: &[(&str, &str)] = &[
    ("Dockerfile", include_str!("../scripts/docker/Dockerfile")),
    ("common.sh", include_str!("../scripts/docker/common.sh")),
    ("container_entry.sh", include_str!("../scripts/docker/container_entry.sh")),
    ("run_experiment.sh", include_str!("../scripts/docker/run_experiment.sh")),
];

/// A file of a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFile {
    /// File name (no directories)
    pub name: String,
    /// File contents
    pub contents: String,
}

impl ScriptFile {
    /// Whether the extra scheduler header goes into this file.
    pub fn is_scheduler_template(&self) -> bool {
        SCHEDULER_TEMPLATES.contains(&self.name.as_str())
    }
}

/// The script set uploaded for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBundle {
    backend: Backend,
    files: Vec<ScriptFile>,
}

impl ScriptBundle {
    /// The bundle compiled into the binary.
    pub fn embedded(backend: Backend) -> Self {
        let files = match backend {
            Backend::General => GENERAL,
            Backend::Slurm => SLURM,
            Backend::Docker => DOCKER,
        };
        Self {
            backend,
            files: files
                .iter()
                .map(|(name, contents)| ScriptFile {
                    name: (*name).to_string(),
                    contents: (*contents).to_string(),
                })
                .collect(),
        }
    }

    /// Load `<root>/<backend>/*` (top level only).
    pub fn from_dir(root: &Path, backend: Backend) -> Result<Self> {
        let dir = root.join(backend.bundle_dir());
        let mut files = Vec::new();

        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::Bundle(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            files.push(ScriptFile {
                name: entry.file_name().to_string_lossy().to_string(),
                contents: fs::read_to_string(entry.path())?,
            });
        }

        if files.is_empty() {
            return Err(Error::Bundle(format!("no scripts in {}", dir.display())));
        }
        Ok(Self { backend, files })
    }

    /// Project override if present, else the embedded bundle.
    pub fn resolve(project_dir: &Path, backend: Backend) -> Result<Self> {
        let root = project_dir.join(OVERRIDE_DIR);
        if root.join(backend.bundle_dir()).is_dir() {
            log::info!("Using script overrides from {}", root.display());
            return Self::from_dir(&root, backend);
        }
        Ok(Self::embedded(backend))
    }

    /// Backend this bundle is for.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Files, sorted by name.
    pub fn files(&self) -> &[ScriptFile] {
        &self.files
    }

    /// Look up a file by name.
    pub fn file(&self, name: &str) -> Option<&ScriptFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Write the bundle into `dir` (e.g. as a docker build context).
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        self.files
            .iter()
            .map(|file| {
                let path = dir.join(&file.name);
                fs::write(&path, &file.contents)?;
                Ok(path)
            })
            .collect()
    }
}
