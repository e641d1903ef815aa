//! Remote bootstrap: get the launch scripts and the tracker credential onto
//! the target.
//!
//! A fresh remote temporary directory is created per call and the bundle is
//! uploaded into it. Scheduler templates are patched with the extra header
//! in a local temporary copy; the bundle itself is never modified.

use crate::bundle::{ScriptBundle, ScriptFile};
use crate::command::quote;
use crate::error::{Error, Result};
use crate::transport::Transport;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Substring that marks a scheduler directive line.
pub const SCHEDULER_MARKER: &str = "#SBATCH";

/// Name prefix of the remote scripts folder.
pub const REMOTE_DIR_PREFIX: &str = "experiment_buddy";

/// Home-relative path of the tracker credential on the remote.
pub const REMOTE_CREDENTIAL: &str = ".netrc";

/// Insert `header` after the last line containing [`SCHEDULER_MARKER`].
///
/// The header is surrounded by blank lines. A template without any
/// directive line is [`Error::MalformedTemplate`].
pub fn insert_extra_header(template: &str, header: &str, file: &str) -> Result<String> {
    let lines: Vec<&str> = template.split_inclusive('\n').collect();
    let anchor = lines
        .iter()
        .rposition(|line| line.contains(SCHEDULER_MARKER))
        .ok_or_else(|| Error::MalformedTemplate {
            file: file.to_string(),
        })?;

    let mut patched = String::with_capacity(template.len() + header.len() + 3);
    for (i, line) in lines.iter().enumerate() {
        patched.push_str(line);
        if i == anchor {
            if !line.ends_with('\n') {
                patched.push('\n');
            }
            patched.push('\n');
            patched.push_str(header.trim_end_matches('\n'));
            patched.push_str("\n\n");
        }
    }
    Ok(patched)
}

/// Make sure the remote home has the tracker credential.
///
/// A failing existence probe means "absent": the local file is copied.
/// Returns whether a copy was made.
pub fn check_or_copy_credential(transport: &dyn Transport, local: &Path) -> Result<bool> {
    if transport.probe(&format!("test -f \"$HOME/{REMOTE_CREDENTIAL}\""))? {
        log::debug!("{} already has a tracker credential", transport.host());
        return Ok(false);
    }

    if !local.is_file() {
        return Err(Error::CredentialNotFound(local.to_path_buf()));
    }

    log::info!("Copying {} to {}", local.display(), transport.host());
    transport.put(local, REMOTE_CREDENTIAL)?;
    Ok(true)
}

/// Create a unique remote directory and return its path.
///
/// `parent` is expanded by the remote shell, so it may reference variables
/// such as `${SCRATCH:-$HOME}`. Without a parent the system temp dir is used.
pub fn create_remote_dir(transport: &dyn Transport, parent: Option<&str>) -> Result<String> {
    let template = format!("{REMOTE_DIR_PREFIX}-XXXXXXXXXX");
    let command = match parent {
        Some(parent) => format!(
            "mkdir -p \"{parent}\" && mktemp -d -p \"{parent}\" {template}"
        ),
        None => format!("mktemp -d -t {template}"),
    };

    let output = transport.run(&command).map_err(|e| match e {
        Error::CommandFailed { stderr, .. } => Error::RemoteDir {
            host: transport.host().to_string(),
            message: stderr.trim().to_string(),
        },
        other => other,
    })?;

    let path = output.stdout.trim();
    if path.is_empty() {
        return Err(Error::RemoteDir {
            host: transport.host().to_string(),
            message: "mktemp printed no path".to_string(),
        });
    }
    Ok(path.to_string())
}

/// What to put on the target.
#[derive(Debug, Clone)]
pub struct BootstrapPlan<'a> {
    /// Scripts for the detected backend
    pub bundle: &'a ScriptBundle,
    /// Parent of the remote scripts folder (`None` = remote temp dir)
    pub parent_dir: Option<&'a str>,
    /// Extra scheduler header for the scheduler templates
    pub extra_header: Option<&'a str>,
    /// Local tracker credential file
    pub credential: Option<&'a Path>,
}

/// Upload the bundle into a fresh remote folder and return the folder.
///
/// Callers memoize the result; every call creates a new folder.
pub fn ensure_scripts(transport: &dyn Transport, plan: &BootstrapPlan<'_>) -> Result<String> {
    if let Some(credential) = plan.credential {
        check_or_copy_credential(transport, credential)?;
    }

    let folder = create_remote_dir(transport, plan.parent_dir)?;
    log::info!(
        "Uploading {} scripts to {}:{folder}",
        plan.bundle.backend(),
        transport.host()
    );

    for file in plan.bundle.files() {
        let remote = format!("{folder}/{}", file.name);
        let staged = stage(file, plan.extra_header)?;
        transport.put(staged.path(), &remote)?;
    }

    transport.run(&format!("chmod +x {}/*.sh", quote(&folder)))?;
    Ok(folder)
}

/// Write the (possibly patched) file to a local temporary copy.
fn stage(file: &ScriptFile, extra_header: Option<&str>) -> Result<NamedTempFile> {
    let contents = match extra_header {
        Some(header) if file.is_scheduler_template() => {
            insert_extra_header(&file.contents, header, &file.name)?
        }
        _ => file.contents.clone(),
    };

    let mut staged = tempfile::Builder::new()
        .prefix("buddy-")
        .suffix(&format!("-{}", file.name))
        .tempfile()?;
    staged.write_all(contents.as_bytes())?;
    staged.flush()?;
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Backend;
    use crate::mock::MockTransport;
    use std::fs;
    use tempfile::TempDir;

    const HEADER: &str = "#SBATCH --mem=48GB";

    fn template(directives: usize, body: usize) -> String {
        let mut text = String::from("#!/bin/bash\n");
        for i in 0..directives {
            text.push_str(&format!("#SBATCH --opt{i}=x\n"));
        }
        for i in 0..body {
            text.push_str(&format!("echo body{i}\n"));
        }
        text
    }

    #[test]
    fn test_header_follows_last_directive() {
        for n in 1..5 {
            let patched = insert_extra_header(&template(n, 3), HEADER, "t.sh").unwrap();
            let lines: Vec<&str> = patched.lines().collect();
            // shebang + n directives, then blank, header, blank
            assert_eq!(lines[n], format!("#SBATCH --opt{}=x", n - 1));
            assert_eq!(lines[n + 1], "");
            assert_eq!(lines[n + 2], HEADER);
            assert_eq!(lines[n + 3], "");
            assert_eq!(lines[n + 4], "echo body0");
            assert_eq!(patched.matches(HEADER).count(), 1);
        }
    }

    #[test]
    fn test_header_uses_last_marker_line() {
        let text = "#!/bin/bash\n#SBATCH -a\necho x\n#SBATCH -b\necho y\n";
        let patched = insert_extra_header(text, "EXTRA", "t.sh").unwrap();
        assert_eq!(
            patched,
            "#!/bin/bash\n#SBATCH -a\necho x\n#SBATCH -b\n\nEXTRA\n\necho y\n"
        );
    }

    #[test]
    fn test_header_without_trailing_newline() {
        let patched = insert_extra_header("#SBATCH -a", "EXTRA", "t.sh").unwrap();
        assert_eq!(patched, "#SBATCH -a\n\nEXTRA\n\n");
    }

    #[test]
    fn test_no_marker_is_malformed() {
        let err = insert_extra_header(&template(0, 3), HEADER, "run_sweep.sh").unwrap_err();
        assert!(matches!(err, Error::MalformedTemplate { file } if file == "run_sweep.sh"));
    }

    #[test]
    fn test_credential_present_is_not_copied() {
        let mock = MockTransport::new("box");
        let copied = check_or_copy_credential(&mock, Path::new("/nonexistent/.netrc")).unwrap();
        assert!(!copied);
        assert!(mock.puts().is_empty());
    }

    #[test]
    fn test_credential_absent_is_copied() {
        let dir = TempDir::new().unwrap();
        let netrc = dir.path().join(".netrc");
        fs::write(&netrc, "machine api.wandb.ai login user password key\n").unwrap();
        let mock = MockTransport::new("box").fail("test -f", 1, "");

        assert!(check_or_copy_credential(&mock, &netrc).unwrap());
        let puts = mock.puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].remote, ".netrc");
    }

    #[test]
    fn test_credential_missing_locally() {
        let mock = MockTransport::new("box").fail("test -f", 1, "");
        let err = check_or_copy_credential(&mock, Path::new("/nonexistent/.netrc")).unwrap_err();
        assert!(matches!(err, Error::CredentialNotFound(_)));
    }

    #[test]
    fn test_create_remote_dir_under_parent() {
        let mock = MockTransport::new("box");
        let dir = create_remote_dir(&mock, Some("${SCRATCH:-$HOME}")).unwrap();
        assert_eq!(dir, "/tmp/experiment_buddy-mock");
        assert!(mock.commands()[0].contains("mktemp -d -p \"${SCRATCH:-$HOME}\""));
    }

    #[test]
    fn test_create_remote_dir_failure() {
        let mock = MockTransport::new("box").fail("mktemp", 1, "File exists");
        let err = create_remote_dir(&mock, None).unwrap_err();
        assert!(matches!(err, Error::RemoteDir { message, .. } if message == "File exists"));
    }

    #[test]
    fn test_ensure_scripts_patches_both_templates_once() {
        let mock = MockTransport::new("cluster");
        let bundle = ScriptBundle::embedded(Backend::Slurm);
        let plan = BootstrapPlan {
            bundle: &bundle,
            parent_dir: Some("${SCRATCH:-$HOME}"),
            extra_header: Some(HEADER),
            credential: None,
        };

        let folder = ensure_scripts(&mock, &plan).unwrap();
        assert_eq!(folder, "/tmp/experiment_buddy-mock");

        let puts = mock.puts();
        assert_eq!(puts.len(), bundle.files().len());
        for put in &puts {
            let expected = if put.remote.ends_with("run_sweep.sh")
                || put.remote.ends_with("srun_python.sh")
            {
                1
            } else {
                0
            };
            assert_eq!(put.contents.matches(HEADER).count(), expected, "{}", put.remote);
            assert!(put.remote.starts_with("/tmp/experiment_buddy-mock/"));
        }

        // Canonical bundle untouched
        assert!(!bundle.file("run_sweep.sh").unwrap().contents.contains(HEADER));
    }

    #[test]
    fn test_ensure_scripts_without_header_uploads_verbatim() {
        let mock = MockTransport::new("box");
        let bundle = ScriptBundle::embedded(Backend::General);
        let plan = BootstrapPlan {
            bundle: &bundle,
            parent_dir: None,
            extra_header: None,
            credential: None,
        };

        ensure_scripts(&mock, &plan).unwrap();
        for (put, file) in mock.puts().iter().zip(bundle.files()) {
            assert_eq!(put.contents, file.contents);
        }
        assert!(mock.commands().last().unwrap().starts_with("chmod +x"));
    }

    #[test]
    fn test_ensure_scripts_checks_credential_first() {
        let mock = MockTransport::new("box");
        let bundle = ScriptBundle::embedded(Backend::General);
        let plan = BootstrapPlan {
            bundle: &bundle,
            parent_dir: None,
            extra_header: None,
            credential: Some(Path::new("/nonexistent/.netrc")),
        };

        ensure_scripts(&mock, &plan).unwrap();
        assert!(mock.commands()[0].starts_with("test -f"));
    }
}
