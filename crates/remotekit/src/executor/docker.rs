//! Local container engine.
//!
//! No SSH here: every step is a `docker --context <ctx>` command run on this
//! machine. The base image is built from the docker script bundle once per
//! context, the snapshot is checked out locally and shipped into a
//! placeholder container as a tarball, and the entrypoint is exec'd inside
//! with the tracker key in the environment.

use super::{ready, Executor, ExecutorKind, ExecutorSettings, JobContext};
use crate::bundle::ScriptBundle;
use crate::command::{quote, MODULE_SEPARATOR};
use crate::detect::Backend;
use crate::error::{Error, Result};
use crate::transport::{CommandOutput, Connector, Transport};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Context used when the target names none.
pub const DEFAULT_CONTEXT: &str = "default";

/// Where the image keeps the launch scripts.
const IMAGE_SCRIPTS_DIR: &str = "/opt/buddy";

/// Where the snapshot is unpacked inside the container.
const CONTAINER_PROJECT_DIR: &str = "/experiment";

/// Environment variable carrying the tracker key.
const TRACKER_KEY_ENV: &str = "WANDB_API_KEY";

/// Host entry of the tracker in the credential file.
const TRACKER_MACHINE: &str = "api.wandb.ai";

/// A snapshot packed for one reference.
struct Archive {
    snapshot: String,
    path: PathBuf,
    _dir: TempDir,
}

/// Runs jobs in containers on a docker context.
pub struct DockerExecutor {
    context: String,
    connector: Arc<dyn Connector>,
    transport: Box<dyn Transport>,
    settings: ExecutorSettings,
    scripts: Option<String>,
    archive: Option<Arc<Archive>>,
}

impl DockerExecutor {
    /// Talk to `context` (empty means [`DEFAULT_CONTEXT`]) through `connector`.
    pub fn connect(connector: Arc<dyn Connector>, context: &str, settings: ExecutorSettings) -> Result<Self> {
        let context = if context.is_empty() {
            DEFAULT_CONTEXT
        } else {
            context
        };
        let transport = connector.connect("localhost")?;
        Ok(Self {
            context: context.to_string(),
            connector,
            transport,
            settings,
            scripts: None,
            archive: None,
        })
    }

    fn docker(&self, context: &str, args: &str) -> String {
        format!("docker --context {} {args}", quote(context))
    }

    fn run_docker(&self, args: &str) -> Result<CommandOutput> {
        self.transport.run(&self.docker(&self.context, args))
    }

    fn image(&self) -> String {
        quote(&self.settings.docker_image)
    }

    /// Build the base image in the default context and move it over if needed.
    fn build_image(&self, working_dir: &Path) -> Result<()> {
        let bundle = ScriptBundle::resolve(working_dir, Backend::Docker)?;
        let build_dir = tempfile::Builder::new().prefix("buddy-image-").tempdir()?;
        bundle.write_to(build_dir.path())?;

        log::info!("Building {} (this may take a while)", self.settings.docker_image);
        let dir = quote(&build_dir.path().to_string_lossy());
        self.transport.run(&self.docker(
            DEFAULT_CONTEXT,
            &format!("build -q -t {} -f {dir}/Dockerfile {dir}", self.image()),
        ))?;

        if self.context != DEFAULT_CONTEXT {
            log::info!("Transferring {} to context {}", self.settings.docker_image, self.context);
            self.transport.run(&format!(
                "{} | {}",
                self.docker(DEFAULT_CONTEXT, &format!("save {}", self.image())),
                self.docker(&self.context, "load")
            ))?;
        }
        Ok(())
    }

    /// Check out `job.snapshot` and pack it, once per snapshot.
    fn archive(&mut self, job: &JobContext) -> Result<Arc<Archive>> {
        if let Some(archive) = self.archive.as_ref().filter(|a| a.snapshot == job.snapshot) {
            return Ok(Arc::clone(archive));
        }

        let dir = tempfile::Builder::new().prefix("buddy-snapshot-").tempdir()?;
        let checkout = dir.path().join("checkout");
        fs::create_dir_all(&checkout)?;
        let target = quote(&checkout.to_string_lossy());

        log::info!("Checking out {} for the container", job.snapshot);
        self.transport.run(&format!(
            "git clone --quiet {} {target} && git -C {target} checkout --quiet {}",
            quote(&job.repo_url),
            quote(&job.snapshot)
        ))?;

        let path = dir.path().join("snapshot.tar.gz");
        pack(&checkout, &path)?;

        let archive = Arc::new(Archive {
            snapshot: job.snapshot.clone(),
            path,
            _dir: dir,
        });
        self.archive = Some(Arc::clone(&archive));
        Ok(archive)
    }

    /// Start a placeholder container and unpack the snapshot into it.
    ///
    /// The container is stopped again if any step after `run` fails.
    fn start_container(&self, archive: &Archive) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("buddy-{}", &id[..8]);

        self.run_docker(&format!(
            "run -d --rm --name {name} {} sleep infinity",
            self.image()
        ))?;
        if let Err(e) = self.unpack_into(&name, archive) {
            self.stop_container(&name);
            return Err(e);
        }
        Ok(name)
    }

    fn unpack_into(&self, name: &str, archive: &Archive) -> Result<()> {
        self.run_docker(&format!("exec {name} mkdir -p {CONTAINER_PROJECT_DIR}"))?;
        self.run_docker(&format!(
            "cp {} {name}:{CONTAINER_PROJECT_DIR}/snapshot.tar.gz",
            quote(&archive.path.to_string_lossy())
        ))?;
        self.run_docker(&format!(
            "exec {name} tar -xzf {CONTAINER_PROJECT_DIR}/snapshot.tar.gz -C {CONTAINER_PROJECT_DIR}"
        ))?;
        Ok(())
    }

    fn stop_container(&self, name: &str) {
        if let Err(e) = self.run_docker(&format!("stop {name}")) {
            log::warn!("Could not stop container {name}: {e}");
        }
    }

    /// Tracker key from the environment, else from the credential file.
    fn tracker_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(TRACKER_KEY_ENV) {
            if !key.is_empty() {
                return Some(key);
            }
        }
        let path = self.settings.credential_file.as_ref()?;
        let contents = fs::read_to_string(path).ok()?;
        netrc_password(&contents, TRACKER_MACHINE)
    }
}

impl Executor for DockerExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Docker
    }

    fn host(&self) -> &str {
        &self.context
    }

    fn run(&self, _command: &str) -> Result<CommandOutput> {
        Err(Error::not_supported(ExecutorKind::Docker, "run"))
    }

    fn put(&self, _local: &Path, _remote: &str) -> Result<()> {
        Err(Error::not_supported(ExecutorKind::Docker, "put"))
    }

    fn setup_remote(&mut self, extra_header: Option<&str>, working_dir: &Path) -> Result<String> {
        if let Some(folder) = &self.scripts {
            return Ok(folder.clone());
        }
        if extra_header.is_some() {
            return Err(Error::not_supported(ExecutorKind::Docker, "an extra scheduler header"));
        }

        if self.run_docker(&format!("image inspect {}", self.image())).is_ok() {
            log::info!("{} present in context {}", self.settings.docker_image, self.context);
        } else {
            self.build_image(working_dir)?;
        }

        self.scripts = Some(IMAGE_SCRIPTS_DIR.to_string());
        Ok(IMAGE_SCRIPTS_DIR.to_string())
    }

    fn scripts_folder(&self) -> Option<&str> {
        self.scripts.as_deref()
    }

    fn launch_job(&mut self, job: &JobContext, entrypoint: &str) -> Result<CommandOutput> {
        let folder = ready(self.scripts.as_deref())?.to_string();
        let archive = self.archive(job)?;
        let name = self.start_container(&archive)?;

        let args = [
            CONTAINER_PROJECT_DIR.to_string(),
            entrypoint.to_string(),
            job.snapshot.clone(),
            job.modules.join(MODULE_SEPARATOR),
            job.env.clone(),
        ];
        let args: Vec<String> = args.iter().map(|a| quote(a)).collect();
        let command = self.docker(
            &self.context,
            &format!(
                "exec -e {TRACKER_KEY_ENV} {name} bash -l {folder}/container_entry.sh {}",
                args.join(" ")
            ),
        );

        let key = self.tracker_key();
        if key.is_none() {
            log::warn!("No {TRACKER_KEY_ENV} found; the run will not be able to log to the tracker");
        }
        let env: Vec<(&str, &str)> = key
            .as_deref()
            .map(|k| vec![(TRACKER_KEY_ENV, k)])
            .unwrap_or_default();

        log::info!("[{}] {command}", self.context);
        let result = self.transport.run_with_env(&command, &env);

        self.stop_container(&name);
        result
    }

    fn sweep_agent(&mut self, _job: &JobContext, _sweep_id: &str) -> Result<CommandOutput> {
        Err(Error::not_supported(ExecutorKind::Docker, "sweep_agent"))
    }

    fn fork(&self) -> Result<Box<dyn Executor>> {
        Ok(Box::new(Self {
            context: self.context.clone(),
            connector: Arc::clone(&self.connector),
            transport: self.connector.connect("localhost")?,
            settings: self.settings.clone(),
            scripts: self.scripts.clone(),
            archive: self.archive.clone(),
        }))
    }
}

/// Write `source` (minus `.git`) as a gzipped tarball at `archive`.
fn pack(source: &Path, archive: &Path) -> Result<()> {
    let file = File::create(archive)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    let entries = WalkDir::new(source)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in entries {
        let entry = entry.map_err(|e| Error::Bundle(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::Bundle(e.to_string()))?;
        if entry.file_type().is_dir() {
            builder.append_dir(relative, entry.path())?;
        } else if entry.file_type().is_file() {
            builder.append_path_with_name(entry.path(), relative)?;
        }
    }

    builder.into_inner()?.finish()?;
    Ok(())
}

/// Split one netrc line into tokens. Double-quoted tokens may contain
/// whitespace and backslash escapes.
fn netrc_tokens(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut token = String::new();
        if c == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => token.extend(chars.next()),
                    _ => token.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }
    tokens
}

/// Password of `machine` in netrc-formatted `contents`.
///
/// `macdef` bodies run to the next blank line and are skipped.
fn netrc_password(contents: &str, machine: &str) -> Option<String> {
    let mut tokens = Vec::new();
    let mut in_macro = false;
    for line in contents.lines() {
        if in_macro {
            in_macro = !line.trim().is_empty();
            continue;
        }
        let line_tokens = netrc_tokens(line);
        if let Some(pos) = line_tokens.iter().position(|t| t == "macdef") {
            tokens.extend(line_tokens.into_iter().take(pos));
            in_macro = true;
        } else {
            tokens.extend(line_tokens);
        }
    }

    let mut tokens = tokens.into_iter();
    let mut in_machine = false;
    while let Some(token) = tokens.next() {
        match token.as_str() {
            "machine" => in_machine = tokens.next().as_deref() == Some(machine),
            "default" => in_machine = false,
            "password" if in_machine => return tokens.next(),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::sample_job as job;
    use crate::mock::{MockConnector, MockTransport};
    use flate2::read::GzDecoder;

    fn executor(mock: &MockTransport, context: &str) -> DockerExecutor {
        let connector = Arc::new(MockConnector::new(mock.clone()));
        DockerExecutor::connect(connector, context, ExecutorSettings::default()).unwrap()
    }

    #[test]
    fn test_empty_context_is_default() {
        let mock = MockTransport::default();
        assert_eq!(executor(&mock, "").host(), DEFAULT_CONTEXT);
    }

    #[test]
    fn test_existing_image_skips_build() {
        let mock = MockTransport::default();
        let project = TempDir::new().unwrap();
        let mut executor = executor(&mock, "");

        let folder = executor.setup_remote(None, project.path()).unwrap();
        assert_eq!(folder, "/opt/buddy");
        assert_eq!(
            mock.commands(),
            vec!["true", "docker --context default image inspect buddy-base-cpu:latest"]
        );
    }

    #[test]
    fn test_missing_image_is_built_and_transferred() {
        let mock = MockTransport::default().fail("image inspect", 1, "No such image");
        let project = TempDir::new().unwrap();
        let mut executor = executor(&mock, "gpu-box");

        executor.setup_remote(None, project.path()).unwrap();
        let commands = mock.commands();
        assert!(commands[2].starts_with("docker --context default build -q -t buddy-base-cpu:latest"));
        assert_eq!(
            commands[3],
            "docker --context default save buddy-base-cpu:latest | docker --context gpu-box load"
        );
    }

    #[test]
    fn test_setup_is_idempotent() {
        let mock = MockTransport::default();
        let project = TempDir::new().unwrap();
        let mut executor = executor(&mock, "");
        executor.setup_remote(None, project.path()).unwrap();
        let count = mock.commands().len();
        executor.setup_remote(None, project.path()).unwrap();
        assert_eq!(mock.commands().len(), count);
    }

    #[test]
    fn test_launch_sequence() {
        let mock = MockTransport::default();
        let project = TempDir::new().unwrap();
        let mut executor = executor(&mock, "");
        executor.setup_remote(None, project.path()).unwrap();

        executor.launch_job(&job(), "train.py").unwrap();
        let commands = mock.commands();
        let launch: Vec<&String> = commands.iter().skip(2).collect();

        assert!(launch[0].starts_with("git clone --quiet git@github.com:lab/project.git "));
        assert!(launch[1].contains("run -d --rm --name buddy-"));
        assert!(launch[1].ends_with("buddy-base-cpu:latest sleep infinity"));
        assert!(launch[2].contains("mkdir -p /experiment"));
        assert!(launch[3].contains(" cp "));
        assert!(launch[4].contains("tar -xzf /experiment/snapshot.tar.gz -C /experiment"));
        assert!(launch[5].contains("exec -e WANDB_API_KEY buddy-"));
        assert!(launch[5].ends_with(
            "bash -l /opt/buddy/container_entry.sh /experiment train.py 3f2a9c python/3.7@pytorch/1.7 research"
        ));
        assert!(launch[6].contains(" stop buddy-"));
    }

    #[test]
    fn test_archive_reused_for_same_snapshot() {
        let mock = MockTransport::default();
        let project = TempDir::new().unwrap();
        let mut executor = executor(&mock, "");
        executor.setup_remote(None, project.path()).unwrap();

        executor.launch_job(&job(), "train.py").unwrap();
        executor.launch_job(&job(), "train.py").unwrap();
        let clones = mock.commands().iter().filter(|c| c.starts_with("git clone")).count();
        assert_eq!(clones, 1);
    }

    #[test]
    fn test_failed_job_still_stops_container() {
        let mock = MockTransport::default().fail("container_entry.sh", 1, "Traceback");
        let project = TempDir::new().unwrap();
        let mut executor = executor(&mock, "");
        executor.setup_remote(None, project.path()).unwrap();

        assert!(executor.launch_job(&job(), "train.py").is_err());
        assert!(mock.commands().last().unwrap().contains(" stop buddy-"));
    }

    #[test]
    fn test_failed_unpack_stops_container() {
        let mock = MockTransport::default().fail(" cp ", 1, "no space left on device");
        let project = TempDir::new().unwrap();
        let mut executor = executor(&mock, "");
        executor.setup_remote(None, project.path()).unwrap();

        assert!(executor.launch_job(&job(), "train.py").is_err());
        let commands = mock.commands();
        assert!(commands.last().unwrap().contains(" stop buddy-"));
        assert!(!commands.iter().any(|c| c.contains("container_entry.sh")));
    }

    #[test]
    fn test_unsupported_operations() {
        let mock = MockTransport::default();
        let mut executor = executor(&mock, "");
        assert!(matches!(executor.run("ls"), Err(Error::NotSupported { .. })));
        assert!(matches!(
            executor.sweep_agent(&job(), "abc"),
            Err(Error::NotSupported { .. })
        ));
        assert!(matches!(
            executor.setup_remote(Some("#SBATCH -N 1"), Path::new(".")),
            Err(Error::NotSupported { .. })
        ));
    }

    #[test]
    fn test_pack_skips_git_dir() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        fs::create_dir_all(source.join(".git")).unwrap();
        fs::create_dir_all(source.join("pkg")).unwrap();
        fs::write(source.join(".git/HEAD"), "ref").unwrap();
        fs::write(source.join("train.py"), "print(1)").unwrap();
        fs::write(source.join("pkg/model.py"), "x = 1").unwrap();

        let archive = dir.path().join("out.tar.gz");
        pack(&source, &archive).unwrap();

        let mut names: Vec<String> = tar::Archive::new(GzDecoder::new(File::open(&archive).unwrap()))
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().trim_end_matches('/').to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["pkg", "pkg/model.py", "train.py"]);
    }

    #[test]
    fn test_netrc_password() {
        let netrc = "machine github.com login a password gh\n\
                     machine api.wandb.ai\n  login user\n  password secret\n";
        assert_eq!(netrc_password(netrc, "api.wandb.ai").as_deref(), Some("secret"));
        assert_eq!(netrc_password(netrc, "example.com"), None);
    }

    #[test]
    fn test_netrc_skips_macdef_body() {
        let netrc = "machine github.com login a password gh\n\
                     macdef init\n\
                     machine api.wandb.ai password fake\n\
                     \n\
                     machine api.wandb.ai login user password \"two words\"\n";
        assert_eq!(netrc_password(netrc, "api.wandb.ai").as_deref(), Some("two words"));
    }

    #[test]
    fn test_netrc_quoted_escape() {
        assert_eq!(
            netrc_tokens(r#"password "a\"b c" login u"#),
            vec!["password", "a\"b c", "login", "u"]
        );
    }
}
