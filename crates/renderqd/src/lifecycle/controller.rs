use std::fs;
use std::io;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use renderq_protocol::response::STOP_REQUESTED;

use super::{ConnectionRegistry, LIFECYCLE_TARGET, ShutdownToken};

/// Owns the shutdown token, the connection registry and the engine
/// installation unpacked by this run.
#[derive(Debug, Clone)]
pub(crate) struct LifecycleController {
    token: ShutdownToken,
    registry: Arc<ConnectionRegistry>,
    scratch_dir: Option<Utf8PathBuf>,
}

impl LifecycleController {
    pub(crate) fn new(scratch_dir: Option<Utf8PathBuf>) -> Self {
        Self {
            token: ShutdownToken::new(),
            registry: Arc::new(ConnectionRegistry::new()),
            scratch_dir,
        }
    }

    pub(crate) fn token(&self) -> &ShutdownToken {
        &self.token
    }

    pub(crate) fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Cancels the token and tells every registered client the server is
    /// stopping. Only the first call has any effect.
    pub(crate) fn begin_shutdown(&self) {
        if !self.token.cancel() {
            return;
        }
        let notified = self.registry.broadcast_and_close_all(STOP_REQUESTED);
        info!(
            target: LIFECYCLE_TARGET,
            notified,
            "shutdown requested; open connections notified"
        );
    }

    /// Removes the engine installation this run unpacked, if any.
    pub(crate) fn remove_scratch_install(&self) {
        let Some(dir) = self.scratch_dir.as_deref() else {
            return;
        };
        match remove_dir_if_present(dir) {
            Ok(true) => info!(target: LIFECYCLE_TARGET, path = %dir, "engine scratch directory removed"),
            Ok(false) => {}
            Err(error) => warn!(
                target: LIFECYCLE_TARGET,
                path = %dir,
                error = %error,
                "failed to remove engine scratch directory"
            ),
        }
    }
}

fn remove_dir_if_present(dir: &Utf8Path) -> io::Result<bool> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_shutdown_cancels_once() {
        let controller = LifecycleController::new(None);
        controller.begin_shutdown();
        assert!(controller.token().is_cancelled());
        controller.begin_shutdown();
    }

    #[test]
    fn scratch_install_is_removed() {
        let temp = tempfile::tempdir().expect("temp dir");
        let scratch = Utf8PathBuf::from_path_buf(temp.path().join("engine"))
            .expect("utf8 temp path");
        fs::create_dir_all(scratch.join("bin")).expect("create scratch");
        fs::write(scratch.join("bin/engine"), b"#!/bin/sh\n").expect("write file");

        let controller = LifecycleController::new(Some(scratch.clone()));
        controller.remove_scratch_install();
        assert!(!scratch.exists());

        controller.remove_scratch_install();
    }
}
