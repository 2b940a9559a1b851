//! Wires the listener, queue and worker pool together and tears them down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use tracing::{info, warn};

use renderq_config::{DEFAULT_ENGINE, ServerConfig};
use renderq_protocol::response::STOP_REQUESTED;

use crate::admission::AdmissionHandler;
use crate::install::{InstallError, install_engine};
use crate::job::{ExecutorSettings, JobExecutor};
use crate::lifecycle::{LifecycleController, ShutdownToken, notify_and_close};
use crate::queue::JobQueue;
use crate::transport::{ListenerHandle, SocketListener};
use crate::worker::WorkerPool;

use super::errors::LaunchError;
use super::shutdown::{ShutdownReason, ShutdownSignal, SystemShutdownSignal};
use super::PROCESS_TARGET;

/// Runs the daemon until a termination signal arrives.
///
/// # Errors
///
/// Returns a [`LaunchError`] when the listener cannot be bound, workers
/// cannot be spawned or signal handlers cannot be installed.
pub fn run_server(config: &ServerConfig) -> Result<ShutdownReason, LaunchError> {
    run_server_with(config, &SystemShutdownSignal)
}

/// Runs the daemon until `signal` reports that shutdown should begin, then
/// runs the shutdown sequence. Returns why serving stopped.
///
/// # Errors
///
/// See [`run_server`]. A failure while waiting still shuts the daemon down
/// before it is returned.
pub fn run_server_with<S: ShutdownSignal>(
    config: &ServerConfig,
    signal: &S,
) -> Result<ShutdownReason, LaunchError> {
    let server = start_server(config)?;
    let waited = signal.wait(&server.shutdown_token());
    info!(
        target: PROCESS_TARGET,
        reason = ?waited.as_ref().ok(),
        budget_ms = config.shutdown_timeout().as_millis(),
        "stopping render queue daemon"
    );
    server.shutdown();
    waited.map_err(LaunchError::from)
}

/// Installs the engine when an archive is configured, binds the listener and
/// starts the worker pool.
///
/// # Errors
///
/// Returns a [`LaunchError`] when the engine cannot be installed, the
/// listener cannot be bound or workers cannot be spawned. A failed start
/// leaves no engine installation behind.
pub fn start_server(config: &ServerConfig) -> Result<RunningServer, LaunchError> {
    let EngineSetup {
        engine,
        installed_dir,
    } = prepare_engine(config)?;
    let lifecycle = LifecycleController::new(installed_dir);
    let listener = SocketListener::bind(&config.host, config.port)
        .inspect_err(|_| lifecycle.remove_scratch_install())?;
    let local_addr = listener.local_addr();
    let queue = Arc::new(JobQueue::new(config.queue_capacity));

    let executor = JobExecutor::new(
        ExecutorSettings {
            engine: engine.clone(),
            ..ExecutorSettings::from(config)
        },
        Arc::clone(lifecycle.registry()),
        lifecycle.token().clone(),
    );
    let pool = WorkerPool::start(config.workers, &queue, &executor, lifecycle.token())
        .map_err(|source| {
            lifecycle.token().cancel();
            lifecycle.remove_scratch_install();
            LaunchError::Workers { source }
        })?;

    let admission = Arc::new(AdmissionHandler::new(
        Arc::clone(&queue),
        Arc::clone(lifecycle.registry()),
        lifecycle.token().clone(),
    ));
    let listener = match listener.start(admission, lifecycle.token().clone()) {
        Ok(handle) => handle,
        Err(error) => {
            lifecycle.token().cancel();
            pool.join(config.shutdown_timeout());
            lifecycle.remove_scratch_install();
            return Err(error.into());
        }
    };
    info!(
        target: PROCESS_TARGET,
        address = %local_addr,
        workers = config.workers,
        queue_capacity = ?config.queue_capacity,
        jobs_root = %config.jobs_root,
        engine = %engine,
        "render queue daemon ready"
    );

    Ok(RunningServer {
        lifecycle,
        listener,
        pool,
        queue,
        local_addr,
        shutdown_timeout: config.shutdown_timeout(),
    })
}

struct EngineSetup {
    engine: Utf8PathBuf,
    installed_dir: Option<Utf8PathBuf>,
}

/// Installs the engine archive into the scratch directory when both are
/// configured. Otherwise `--engine` is used as is and no directory is owned
/// by this run.
fn prepare_engine(config: &ServerConfig) -> Result<EngineSetup, InstallError> {
    let (Some(archive), Some(scratch_dir)) = (&config.engine_archive, &config.engine_scratch_dir)
    else {
        if config.engine_archive.is_some() || config.engine_scratch_dir.is_some() {
            warn!(
                target: PROCESS_TARGET,
                archive = ?config.engine_archive,
                scratch_dir = ?config.engine_scratch_dir,
                "engine archive and scratch directory must be set together; using the configured engine"
            );
        }
        return Ok(EngineSetup {
            engine: config.engine.clone(),
            installed_dir: None,
        });
    };
    let binary_name = config.engine.file_name().unwrap_or(DEFAULT_ENGINE);
    let engine = install_engine(archive, scratch_dir, binary_name)?;
    Ok(EngineSetup {
        engine,
        installed_dir: Some(scratch_dir.clone()),
    })
}

/// A started daemon. Dropping it without calling
/// [`RunningServer::shutdown`] stops the listener but leaves workers
/// detached.
pub struct RunningServer {
    lifecycle: LifecycleController,
    listener: ListenerHandle,
    pool: WorkerPool,
    queue: Arc<JobQueue>,
    local_addr: SocketAddr,
    shutdown_timeout: Duration,
}

impl RunningServer {
    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token cancelled when shutdown begins.
    #[must_use]
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.lifecycle.token().clone()
    }

    /// Number of connections waiting for a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Stops accepting work, notifies every waiting or running client,
    /// waits for workers within the shutdown budget and removes the engine
    /// installation unpacked at startup.
    pub fn shutdown(self) {
        let Self {
            lifecycle,
            listener,
            pool,
            queue,
            shutdown_timeout,
            ..
        } = self;

        lifecycle.begin_shutdown();
        listener.shutdown();
        if listener.join().is_err() {
            warn!(target: PROCESS_TARGET, "listener thread panicked");
        }

        let drained = close_waiting(&queue);
        let unfinished = pool.join(shutdown_timeout);
        let drained = drained + close_waiting(&queue);
        if unfinished > 0 {
            warn!(
                target: PROCESS_TARGET,
                unfinished,
                timeout_ms = shutdown_timeout.as_millis(),
                "workers still running after the shutdown budget"
            );
        }
        lifecycle.remove_scratch_install();
        info!(
            target: PROCESS_TARGET,
            drained,
            "shutdown sequence completed"
        );
    }
}

fn close_waiting(queue: &JobQueue) -> usize {
    let waiting = queue.drain();
    let count = waiting.len();
    for mut connection in waiting {
        notify_and_close(&mut connection.stream, STOP_REQUESTED);
    }
    count
}
