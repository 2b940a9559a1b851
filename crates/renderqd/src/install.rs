//! Per-run installation of the render engine from an archive.
//!
//! The scratch directory is emptied, a remote archive is downloaded into it
//! with `curl`, and `tar` unpacks the archive with its top-level folder
//! stripped. The engine binary must then sit directly inside the scratch
//! directory.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const INSTALL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::install");

const DOWNLOAD_TOOL: &str = "curl";
const EXTRACT_TOOL: &str = "tar";
const DOWNLOADED_ARCHIVE: &str = "engine-archive.download";

/// Errors raised while installing the engine.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The scratch directory could not be emptied or created.
    #[error("failed to prepare engine scratch directory '{path}': {source}")]
    ScratchDir {
        /// Scratch directory.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A local archive could not be found.
    #[error("engine archive '{archive}' is not readable: {source}")]
    Archive {
        /// Archive as configured.
        archive: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// `curl` or `tar` could not be started.
    #[error("failed to run '{tool}': {source}")]
    Spawn {
        /// Tool executable.
        tool: &'static str,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// `curl` or `tar` exited unsuccessfully.
    #[error("'{tool}' exited with {status}: {stderr}")]
    Tool {
        /// Tool executable.
        tool: &'static str,
        /// Exit status reported by the tool.
        status: ExitStatus,
        /// Trimmed standard error of the tool.
        stderr: String,
    },
    /// The unpacked archive has no engine binary at its top level.
    #[error("engine binary '{path}' not found after extraction")]
    MissingBinary {
        /// Expected binary location.
        path: Utf8PathBuf,
    },
    /// The engine binary could not be marked executable.
    #[error("failed to mark '{path}' executable: {source}")]
    Permissions {
        /// Engine binary.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Installs the engine from `archive` into `scratch_dir` and returns the path
/// of `binary_name` inside it.
///
/// `archive` is downloaded when it contains a URL scheme and read from disk
/// otherwise. Anything already in `scratch_dir` is removed first. On failure
/// the partial installation is removed again.
///
/// # Errors
///
/// Returns an [`InstallError`] describing the first step that failed.
pub(crate) fn install_engine(
    archive: &str,
    scratch_dir: &Utf8Path,
    binary_name: &str,
) -> Result<Utf8PathBuf, InstallError> {
    info!(
        target: INSTALL_TARGET,
        archive,
        path = %scratch_dir,
        "installing render engine"
    );
    let installed = unpack(archive, scratch_dir, binary_name);
    match &installed {
        Ok(binary) => info!(target: INSTALL_TARGET, engine = %binary, "render engine installed"),
        Err(_) => discard(scratch_dir),
    }
    installed
}

fn unpack(
    archive: &str,
    scratch_dir: &Utf8Path,
    binary_name: &str,
) -> Result<Utf8PathBuf, InstallError> {
    reset_dir(scratch_dir)?;
    let archive_path = if is_remote(archive) {
        let target = scratch_dir.join(DOWNLOADED_ARCHIVE);
        run_tool(
            DOWNLOAD_TOOL,
            Command::new(DOWNLOAD_TOOL)
                .args(["-fsSL", "-o"])
                .arg(&target)
                .arg(archive),
        )?;
        target.into_std_path_buf()
    } else {
        local_archive(archive)?
    };

    run_tool(
        EXTRACT_TOOL,
        Command::new(EXTRACT_TOOL)
            .arg("-xf")
            .arg(&archive_path)
            .arg("--strip-components=1")
            .arg("-C")
            .arg(scratch_dir),
    )?;

    let binary = scratch_dir.join(binary_name);
    if !binary.is_file() {
        return Err(InstallError::MissingBinary { path: binary });
    }
    mark_executable(&binary)?;
    Ok(binary)
}

fn is_remote(archive: &str) -> bool {
    archive.contains("://")
}

fn local_archive(archive: &str) -> Result<PathBuf, InstallError> {
    fs::canonicalize(archive).map_err(|source| InstallError::Archive {
        archive: archive.to_owned(),
        source,
    })
}

fn reset_dir(dir: &Utf8Path) -> Result<(), InstallError> {
    let scratch_error = |source| InstallError::ScratchDir {
        path: dir.to_owned(),
        source,
    };
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(scratch_error(error)),
    }
    fs::create_dir_all(dir).map_err(scratch_error)
}

fn run_tool(tool: &'static str, command: &mut Command) -> Result<(), InstallError> {
    let output = command
        .stdin(Stdio::null())
        .output()
        .map_err(|source| InstallError::Spawn { tool, source })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(InstallError::Tool {
            tool,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

#[cfg(unix)]
fn mark_executable(binary: &Utf8Path) -> Result<(), InstallError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(binary, fs::Permissions::from_mode(0o755)).map_err(|source| {
        InstallError::Permissions {
            path: binary.to_owned(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn mark_executable(_binary: &Utf8Path) -> Result<(), InstallError> {
    Ok(())
}

fn discard(scratch_dir: &Utf8Path) {
    match fs::remove_dir_all(scratch_dir) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => warn!(
            target: INSTALL_TARGET,
            path = %scratch_dir,
            error = %error,
            "failed to remove partial engine installation"
        ),
    }
}
