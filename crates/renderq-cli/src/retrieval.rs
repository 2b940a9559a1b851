//! Copies rendered output back from the server with an external sync tool.
//!
//! The tool is invoked as `<tool> <args…> <source> <destination>`, which fits
//! `rsync` and `scp -r` alike. Failures are reported together with the
//! equivalent command line so the user can retry by hand.

use std::fs;
use std::io;
use std::process::{Command, ExitStatus, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use renderq_config::ClientConfig;
use renderq_protocol::is_valid_job_id;

use crate::sink::{Level, LogSink};

/// Failures while running the sync tool.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The job id does not have the daemon's format and cannot name a folder.
    #[error("refusing to fetch results for invalid job id '{job_id}'")]
    InvalidJobId {
        /// Identifier as reported by the server.
        job_id: String,
    },
    /// The local destination could not be created.
    #[error("failed to create local folder '{path}': {source}")]
    LocalFolder {
        /// Folder that could not be created.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The sync tool could not be started.
    #[error("failed to run '{tool}': {source}. Run manually: {manual}")]
    Spawn {
        /// Sync tool executable.
        tool: String,
        /// Equivalent command line.
        manual: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The sync tool exited unsuccessfully.
    #[error("'{tool}' exited with {status}. Run manually: {manual}")]
    Failed {
        /// Sync tool executable.
        tool: String,
        /// Exit status reported by the tool.
        status: ExitStatus,
        /// Equivalent command line.
        manual: String,
    },
}

/// A sync tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCommand {
    tool: String,
    args: Vec<String>,
}

impl SyncCommand {
    /// Builds `<tool> <tool_args…> <source> <destination>`.
    pub fn new(tool: &str, tool_args: &[String], source: String, destination: String) -> Self {
        let mut args = tool_args.to_vec();
        args.push(source);
        args.push(destination);
        Self {
            tool: tool.to_owned(),
            args,
        }
    }

    /// Shell-style rendering used in manual retry hints.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.tool.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn run(&self) -> Result<(), RetrievalError> {
        let status = Command::new(&self.tool)
            .args(&self.args)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| RetrievalError::Spawn {
                tool: self.tool.clone(),
                manual: self.display(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(RetrievalError::Failed {
                tool: self.tool.clone(),
                status,
                manual: self.display(),
            })
        }
    }
}

/// `[user@]host:path`.
#[must_use]
pub fn remote_spec(user: Option<&str>, host: &str, path: &str) -> String {
    match user {
        Some(user) => format!("{user}@{host}:{path}"),
        None => format!("{host}:{path}"),
    }
}

/// Command copying `<remote_root>/<job_id>/` into `local_folder`.
#[must_use]
pub fn fetch_command(config: &ClientConfig, job_id: &str, local_folder: &Utf8Path) -> SyncCommand {
    let remote_dir = format!("{}/{job_id}/", config.remote_root.trim_end_matches('/'));
    SyncCommand::new(
        &config.sync_tool,
        &config.sync_args,
        remote_spec(config.remote_user.as_deref(), &config.host, &remote_dir),
        format!("{local_folder}/"),
    )
}

/// Downloads the job directory into `<output_dir>/<job_id>`.
///
/// Progress and failures are reported to `sink`; there is no retry.
///
/// # Errors
///
/// Returns [`RetrievalError::InvalidJobId`] before touching the filesystem
/// when `job_id` is not a daemon-generated id, and another
/// [`RetrievalError`] when the folder cannot be created or the sync tool
/// fails.
pub fn fetch_results<L: LogSink>(
    config: &ClientConfig,
    job_id: &str,
    sink: &mut L,
) -> Result<Utf8PathBuf, RetrievalError> {
    if !is_valid_job_id(job_id) {
        let error = RetrievalError::InvalidJobId {
            job_id: job_id.to_owned(),
        };
        sink.emit(Level::Error, &error.to_string());
        return Err(error);
    }
    let local_folder = config.output_dir.join(job_id);
    fs::create_dir_all(&local_folder).map_err(|source| RetrievalError::LocalFolder {
        path: local_folder.clone(),
        source,
    })?;
    let command = fetch_command(config, job_id, &local_folder);
    sink.emit(Level::Info, &format!("Fetching results: {}", command.display()));
    match command.run() {
        Ok(()) => {
            sink.emit(
                Level::Success,
                &format!("Results downloaded to {local_folder}"),
            );
            Ok(local_folder)
        }
        Err(error) => {
            sink.emit(Level::Error, &error.to_string());
            Err(error)
        }
    }
}

/// Pushes the local add-ons directory to the server before a submission.
///
/// Does nothing unless both add-on directories are configured. A missing
/// local directory is reported and skipped.
///
/// # Errors
///
/// Returns a [`RetrievalError`] when the sync tool fails; callers treat this
/// as a warning.
pub fn push_addons<L: LogSink>(config: &ClientConfig, sink: &mut L) -> Result<(), RetrievalError> {
    let (Some(local), Some(remote)) = (&config.addons_dir, &config.remote_addons_dir) else {
        return Ok(());
    };
    if !local.is_dir() {
        sink.emit(
            Level::Error,
            &format!("add-ons directory '{local}' not found; skipping add-on sync"),
        );
        return Ok(());
    }
    let command = SyncCommand::new(
        &config.sync_tool,
        &config.sync_args,
        format!("{}/", local.as_str().trim_end_matches('/')),
        remote_spec(config.remote_user.as_deref(), &config.host, remote),
    );
    sink.emit(Level::Info, &format!("Syncing add-ons: {}", command.display()));
    command.run().inspect_err(|error| sink.emit(Level::Error, &error.to_string()))?;
    sink.emit(Level::Success, "Add-ons synced.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const JOB_ID: &str = "20240101_120000_000001_0badc0de";

    fn config() -> ClientConfig {
        ClientConfig {
            host: "render.example".to_owned(),
            remote_user: Some("artist".to_owned()),
            remote_root: "~/render_jobs/".to_owned(),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn fetch_command_targets_the_job_directory() {
        let local = Utf8PathBuf::from("/tmp/out").join(JOB_ID);
        let command = fetch_command(&config(), JOB_ID, &local);
        assert_eq!(
            command.display(),
            format!("rsync -avz artist@render.example:~/render_jobs/{JOB_ID}/ /tmp/out/{JOB_ID}/")
        );
    }

    #[test]
    fn remote_spec_omits_missing_user() {
        assert_eq!(remote_spec(None, "host", "/srv"), "host:/srv");
    }

    #[test]
    fn missing_tool_reports_manual_command() {
        let temp = tempfile::tempdir().expect("temp dir");
        let config = ClientConfig {
            sync_tool: temp.path().join("no-such-sync").display().to_string(),
            output_dir: Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8"),
            ..config()
        };
        let mut messages = Vec::new();
        let mut sink = |level: Level, message: &str| messages.push((level, message.to_owned()));

        let error = fetch_results(&config, JOB_ID, &mut sink).expect_err("spawn fails");

        assert!(matches!(error, RetrievalError::Spawn { .. }));
        assert!(error.to_string().contains("Run manually:"));
        assert!(messages.iter().any(|(level, _)| *level == Level::Error));
    }

    #[rstest]
    #[case("../../escaped")]
    #[case("/etc")]
    #[case("")]
    #[case("20240101_120000_000001_0badc0de/..")]
    fn invalid_job_id_is_refused_before_any_io(#[case] job_id: &str) {
        let temp = tempfile::tempdir().expect("temp dir");
        let output = Utf8PathBuf::from_path_buf(temp.path().join("Rendered")).expect("utf8");
        let config = ClientConfig {
            sync_tool: temp.path().join("no-such-sync").display().to_string(),
            output_dir: output.clone(),
            ..config()
        };
        let mut messages = Vec::new();
        let mut sink = |level: Level, message: &str| messages.push((level, message.to_owned()));

        let error = fetch_results(&config, job_id, &mut sink).expect_err("id is refused");

        assert!(matches!(error, RetrievalError::InvalidJobId { .. }));
        assert!(!output.exists());
        assert!(messages.iter().any(|(level, _)| *level == Level::Error));
    }

    #[test]
    fn missing_addons_directory_is_skipped() {
        let config = ClientConfig {
            addons_dir: Some(Utf8PathBuf::from("/definitely/not/here")),
            remote_addons_dir: Some("~/addons".to_owned()),
            ..config()
        };
        let mut messages = Vec::new();
        let mut sink = |level: Level, message: &str| messages.push((level, message.to_owned()));

        push_addons(&config, &mut sink).expect("skip is not an error");

        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("not found"));
    }

    #[cfg(unix)]
    mod with_fake_tool {
        use std::os::unix::fs::PermissionsExt;

        use super::*;

        /// Writes a sync tool that records its arguments and exits with `code`.
        fn fake_tool(dir: &Utf8Path, code: i32) -> Utf8PathBuf {
            let path = dir.join("fake-sync.sh");
            let log = dir.join("sync-args.txt");
            fs::write(
                &path,
                format!("#!/bin/sh\nprintf '%s\\n' \"$@\" > '{log}'\nexit {code}\n"),
            )
            .expect("write tool");
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
            path
        }

        fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
            let temp = tempfile::tempdir().expect("temp dir");
            let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
            (temp, root)
        }

        #[test]
        fn fetch_creates_folder_and_passes_paths() {
            let (_temp, root) = temp_root();
            let config = ClientConfig {
                sync_tool: fake_tool(&root, 0).into_string(),
                output_dir: root.join("Rendered"),
                ..config()
            };
            let mut sink = |_: Level, _: &str| {};

            let folder = fetch_results(&config, JOB_ID, &mut sink).expect("fetch");

            assert!(folder.is_dir());
            let args = fs::read_to_string(root.join("sync-args.txt")).expect("args log");
            let expected = format!(
                "-avz\nartist@render.example:~/render_jobs/{JOB_ID}/\n{}/\n",
                root.join("Rendered").join(JOB_ID)
            );
            assert_eq!(args, expected);
        }

        #[test]
        fn failing_tool_is_reported() {
            let (_temp, root) = temp_root();
            let config = ClientConfig {
                sync_tool: fake_tool(&root, 23).into_string(),
                output_dir: root.join("Rendered"),
                ..config()
            };
            let mut sink = |_: Level, _: &str| {};

            let error = fetch_results(&config, JOB_ID, &mut sink).expect_err("tool fails");

            assert!(matches!(error, RetrievalError::Failed { .. }));
        }

        #[test]
        fn addons_are_pushed_to_the_remote_directory() {
            let (_temp, root) = temp_root();
            fs::create_dir_all(root.join("addons")).expect("create addons");
            let config = ClientConfig {
                sync_tool: fake_tool(&root, 0).into_string(),
                addons_dir: Some(root.join("addons")),
                remote_addons_dir: Some("~/.config/blender/addons".to_owned()),
                remote_user: None,
                ..config()
            };
            let mut sink = |_: Level, _: &str| {};

            push_addons(&config, &mut sink).expect("push addons");

            let args = fs::read_to_string(root.join("sync-args.txt")).expect("args log");
            let expected = format!(
                "-avz\n{}/\nrender.example:~/.config/blender/addons\n",
                root.join("addons")
            );
            assert_eq!(args, expected);
        }
    }
}
