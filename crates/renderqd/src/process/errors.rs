//! Errors surfaced while starting or stopping the daemon.

use std::io;

use thiserror::Error;

use crate::install::InstallError;
use crate::transport::ListenerError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Installing the engine from its archive failed.
    #[error("failed to install render engine: {source}")]
    Install {
        /// Underlying install error.
        #[source]
        source: InstallError,
    },
    /// Socket listener startup failed.
    #[error("daemon socket listener failed: {source}")]
    Listener {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
    /// A worker thread could not be spawned.
    #[error("failed to start worker threads: {source}")]
    Workers {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
}

impl From<InstallError> for LaunchError {
    fn from(source: InstallError) -> Self {
        Self::Install { source }
    }
}

impl From<ListenerError> for LaunchError {
    fn from(source: ListenerError) -> Self {
        Self::Listener { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}
