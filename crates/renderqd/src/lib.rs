//! Render queue dispatch daemon.
//!
//! `renderqd` accepts job submissions over TCP, queues them in arrival order
//! and hands each one to a fixed pool of worker threads. A worker reads the
//! header frame and payload described in [`renderq_protocol`], stores the
//! payload in a fresh job directory, runs the render engine in batch mode and
//! streams the engine's output back to the submitting client, ending with a
//! `DONE:` status and the job id.
//!
//! Admission never reads from a client; it only writes the queue
//! acknowledgement, so a queued connection costs a socket until a worker picks
//! it up. A termination signal cancels a shared [`ShutdownToken`], tells every
//! connected client that the server is stopping, waits for workers within the
//! configured budget and removes the engine installation the daemon unpacked
//! at startup, if any.
//!
//! ```no_run
//! use renderq_config::ServerConfig;
//!
//! # fn main() -> Result<(), renderqd::LaunchError> {
//! let config = ServerConfig::default();
//! renderqd::run_server(&config)?;
//! # Ok(())
//! # }
//! ```

mod admission;
mod engine;
mod install;
mod job;
mod lifecycle;
mod process;
mod queue;
pub mod telemetry;
mod transport;
mod worker;

pub use install::InstallError;
pub use job::{JobError, JobId, JobStatus};
pub use lifecycle::ShutdownToken;
pub use process::{
    LaunchError, RunningServer, ShutdownError, ShutdownReason, ShutdownSignal, SystemShutdownSignal,
    run_server, run_server_with, start_server,
};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
