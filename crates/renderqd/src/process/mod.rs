//! Daemon startup, signal handling and the shutdown sequence.

mod errors;
mod launch;
mod shutdown;

pub use self::errors::LaunchError;
pub use self::launch::{RunningServer, run_server, run_server_with, start_server};
pub use self::shutdown::{ShutdownError, ShutdownReason, ShutdownSignal, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
