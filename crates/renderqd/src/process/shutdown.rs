//! Waiting for the event that ends the serving phase.

use std::io;
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use renderq_config::POLL_INTERVAL;

use crate::lifecycle::ShutdownToken;

use super::PROCESS_TARGET;

const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Why the daemon stopped serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A termination signal arrived.
    Signal(i32),
    /// The shutdown token was cancelled from inside the process.
    Cancelled,
}

/// Source of the request to stop serving.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should begin. Implementations must return once
    /// `token` is cancelled.
    fn wait(&self, token: &ShutdownToken) -> Result<ShutdownReason, ShutdownError>;
}

/// Errors reported while waiting for shutdown.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Waits for SIGTERM, SIGINT, SIGQUIT or SIGHUP.
///
/// Handlers are installed when [`ShutdownSignal::wait`] is first called and
/// checked every [`POLL_INTERVAL`] alongside the shutdown token.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self, token: &ShutdownToken) -> Result<ShutdownReason, ShutdownError> {
        let mut signals =
            Signals::new(TERMINATION_SIGNALS).map_err(|source| ShutdownError::Install { source })?;
        let reason = loop {
            if let Some(signal) = signals.pending().next() {
                info!(target: PROCESS_TARGET, signal, "termination signal received");
                break ShutdownReason::Signal(signal);
            }
            if token.is_cancelled() {
                break ShutdownReason::Cancelled;
            }
            thread::sleep(POLL_INTERVAL);
        };
        Ok(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_token_ends_the_wait() {
        let token = ShutdownToken::new();
        let canceller = token.clone();
        let thread = thread::spawn(move || {
            thread::sleep(POLL_INTERVAL);
            canceller.cancel();
        });

        let reason = SystemShutdownSignal.wait(&token).expect("wait for shutdown");

        assert_eq!(reason, ShutdownReason::Cancelled);
        thread.join().expect("canceller thread");
    }
}
