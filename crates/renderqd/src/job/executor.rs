//! Runs one queued connection through receive, render and report.

use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use tracing::{info, warn};

use renderq_config::ServerConfig;
use renderq_protocol::{JobOutcome, ServerMessage};

use crate::engine::{self, EngineInvocation, RelayEnd};
use crate::lifecycle::{ConnectionRegistry, ShutdownToken};
use crate::queue::QueuedConnection;
use crate::worker::WORKER_TARGET;

use super::{ClientChannel, Job, JobError, JobStatus, read_header, receive_payload};

/// Settings the executor needs from the daemon configuration.
#[derive(Debug, Clone)]
pub(crate) struct ExecutorSettings {
    pub(crate) jobs_root: Utf8PathBuf,
    pub(crate) engine: Utf8PathBuf,
    pub(crate) socket_timeout: Option<Duration>,
    pub(crate) engine_timeout: Option<Duration>,
}

impl From<&ServerConfig> for ExecutorSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            jobs_root: config.jobs_root.clone(),
            engine: config.engine.clone(),
            socket_timeout: config.read_timeout(),
            engine_timeout: config.engine_timeout(),
        }
    }
}

/// Executes jobs on behalf of worker threads.
#[derive(Debug, Clone)]
pub(crate) struct JobExecutor {
    settings: Arc<ExecutorSettings>,
    registry: Arc<ConnectionRegistry>,
    token: ShutdownToken,
}

impl JobExecutor {
    pub(crate) fn new(
        settings: ExecutorSettings,
        registry: Arc<ConnectionRegistry>,
        token: ShutdownToken,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            registry,
            token,
        }
    }

    /// Runs the job carried by `queued` and closes the connection.
    ///
    /// Failures are reported to the client as an `ERR:` line and logged;
    /// they never propagate to the worker.
    pub(crate) fn execute(&self, queued: QueuedConnection) {
        let QueuedConnection {
            id,
            mut stream,
            peer,
            arrived_at,
        } = queued;
        info!(
            target: WORKER_TARGET,
            connection = %id,
            %peer,
            waited_ms = arrived_at.elapsed().as_millis(),
            "job dequeued"
        );
        if let Err(error) = self.run_job(&mut stream, peer) {
            warn!(target: WORKER_TARGET, connection = %id, %peer, error = %error, "job failed");
            let message = error.to_string();
            let _ = ServerMessage::Error(&message).write_to(&mut stream);
        }
        self.registry.unregister(id);
        let _ = stream.shutdown(Shutdown::Both);
    }

    fn run_job(&self, stream: &mut TcpStream, peer: SocketAddr) -> Result<(), JobError> {
        let transport = |source| JobError::Transport { source };
        stream
            .set_read_timeout(self.settings.socket_timeout)
            .map_err(transport)?;
        stream
            .set_write_timeout(self.settings.socket_timeout)
            .map_err(transport)?;

        let (header, overflow) = read_header(stream)?;
        let mut job = Job::create(&self.settings.jobs_root, header)?;
        info!(
            target: WORKER_TARGET,
            job_id = %job.id,
            %peer,
            file = %job.header.file_name,
            mode = %job.header.mode,
            format = %job.header.format,
            size = job.header.payload_size,
            "job received"
        );

        let receipt = receive_payload(
            stream,
            &overflow,
            job.header.payload_size,
            &job.source_path(),
        )?;
        if receipt.is_truncated() {
            warn!(
                target: WORKER_TARGET,
                job_id = %job.id,
                expected = receipt.expected,
                received = receipt.written,
                "client closed before sending the whole payload; rendering what arrived"
            );
        }
        if self.token.is_cancelled() {
            job.status = JobStatus::Aborted;
            info!(
                target: WORKER_TARGET,
                job_id = %job.id,
                status = %job.status,
                "shutdown began during upload; engine not started"
            );
            return Ok(());
        }

        let mut client = ClientChannel::new(stream, peer);
        client.send(ServerMessage::Processing);
        let invocation = EngineInvocation::for_job(&self.settings.engine, &job);
        let end = engine::run(
            &invocation,
            &job.id,
            &mut client,
            &self.token,
            self.settings.engine_timeout,
        )?;

        let outcome = match end {
            RelayEnd::Exited(status) if status.success() => Some(JobOutcome::Success),
            RelayEnd::Exited(status) => {
                warn!(target: WORKER_TARGET, job_id = %job.id, exit_code = ?status.code(), "render engine failed");
                Some(JobOutcome::Failure)
            }
            RelayEnd::TimedOut => Some(JobOutcome::Failure),
            RelayEnd::Aborted => None,
        };
        job.status = match outcome {
            Some(JobOutcome::Success) => JobStatus::Completed,
            Some(JobOutcome::Failure) => JobStatus::Failed,
            None => JobStatus::Aborted,
        };
        if let Some(outcome) = outcome {
            client.send(ServerMessage::Done {
                outcome,
                job_id: job.id.as_str(),
            });
        }
        info!(
            target: WORKER_TARGET,
            job_id = %job.id,
            status = %job.status,
            client_connected = client.is_connected(),
            directory = %job.directory,
            "job finished"
        );
        Ok(())
    }
}
