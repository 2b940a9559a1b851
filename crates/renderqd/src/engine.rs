//! Render engine invocation and output relay.
//!
//! The engine's stdout and stderr share one pipe, so its output keeps the
//! order in which it was written. A pump thread splits the pipe into lines
//! and pushes them through a bounded channel. The calling worker forwards
//! each line to the client, so a slow client applies back-pressure to the
//! engine rather than growing an unbounded buffer.

use std::ffi::OsString;
use std::io::{self, PipeReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use renderq_config::POLL_INTERVAL;
use renderq_protocol::{LineReader, RenderMode, ResponseLine};

use crate::job::{ClientChannel, Job, JobError, JobId};
use crate::lifecycle::ShutdownToken;

pub(crate) const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");

const RELAY_CAPACITY: usize = 256;

/// Command line for one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EngineInvocation {
    pub(crate) program: Utf8PathBuf,
    pub(crate) args: Vec<OsString>,
}

impl EngineInvocation {
    /// `<engine> -b <source> -o <template> -F <FORMAT>` followed by `-a` for
    /// animations or `-f 1` for a single image.
    pub(crate) fn for_job(engine: &Utf8Path, job: &Job) -> Self {
        let mut args: Vec<OsString> = vec![
            "-b".into(),
            job.source_path().into_string().into(),
            "-o".into(),
            job.output_template().into_string().into(),
            "-F".into(),
            job.header.format.to_string().into(),
        ];
        match job.header.mode {
            RenderMode::Animation => args.push("-a".into()),
            RenderMode::Image => args.extend(["-f".into(), "1".into()]),
        }
        Self {
            program: engine.to_owned(),
            args,
        }
    }
}

/// How the relay ended.
#[derive(Debug)]
pub(crate) enum RelayEnd {
    /// The engine exited on its own.
    Exited(ExitStatus),
    /// The engine outlived its deadline and was killed.
    TimedOut,
    /// Shutdown was requested and the engine was killed.
    Aborted,
}

/// Runs the engine and relays its output until it exits, times out or the
/// server shuts down.
pub(crate) fn run(
    invocation: &EngineInvocation,
    job_id: &JobId,
    client: &mut ClientChannel<'_>,
    token: &ShutdownToken,
    timeout: Option<Duration>,
) -> Result<RelayEnd, JobError> {
    info!(
        target: ENGINE_TARGET,
        job_id = %job_id,
        engine = %invocation.program,
        args = ?invocation.args,
        "launching render engine"
    );
    let (reader, writer) = io::pipe().map_err(|source| JobError::OutputPipe { source })?;
    let stderr_writer = writer
        .try_clone()
        .map_err(|source| JobError::OutputPipe { source })?;
    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(stderr_writer)
        .spawn()
        .map_err(|source| JobError::EngineSpawn {
            engine: invocation.program.clone(),
            source,
        })?;

    let (sender, receiver) = sync_channel(RELAY_CAPACITY);
    let pump = match spawn_pump(reader, sender) {
        Ok(pump) => pump,
        Err(error) => {
            stop_child(&mut child);
            return Err(error);
        }
    };

    let deadline = timeout.map(|limit| Instant::now() + limit);
    let end = forward_output(&mut child, &receiver, job_id, client, token, deadline)?;
    drop(receiver);
    if matches!(end, RelayEnd::Exited(_)) && pump.join().is_err() {
        warn!(target: ENGINE_TARGET, job_id = %job_id, "engine output pump panicked");
    }
    Ok(end)
}

/// Reads the merged stdout and stderr pipe line by line.
fn spawn_pump(reader: PipeReader, sender: SyncSender<Vec<u8>>) -> Result<JoinHandle<()>, JobError> {
    thread::Builder::new()
        .name("renderqd-engine-output".to_owned())
        .spawn(move || {
            for line in LineReader::new(reader) {
                match line {
                    Ok(line) => {
                        if sender.send(line).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        debug!(target: ENGINE_TARGET, error = %error, "engine output read failed");
                        break;
                    }
                }
            }
        })
        .map_err(|source| JobError::RelayThread { source })
}

fn forward_output(
    child: &mut Child,
    receiver: &Receiver<Vec<u8>>,
    job_id: &JobId,
    client: &mut ClientChannel<'_>,
    token: &ShutdownToken,
    deadline: Option<Instant>,
) -> Result<RelayEnd, JobError> {
    loop {
        if let Some(end) = check_interrupt(child, job_id, token, deadline) {
            return Ok(end);
        }
        match receiver.recv_timeout(poll_budget(deadline)) {
            Ok(line) => {
                log_engine_line(job_id, &line);
                client.forward_line(&line);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    loop {
        if let Some(end) = check_interrupt(child, job_id, token, deadline) {
            return Ok(end);
        }
        match child.try_wait() {
            Ok(Some(status)) => return Ok(RelayEnd::Exited(status)),
            Ok(None) => thread::sleep(poll_budget(deadline)),
            Err(source) => {
                stop_child(child);
                return Err(JobError::EngineWait { source });
            }
        }
    }
}

fn check_interrupt(
    child: &mut Child,
    job_id: &JobId,
    token: &ShutdownToken,
    deadline: Option<Instant>,
) -> Option<RelayEnd> {
    if token.is_cancelled() {
        warn!(target: ENGINE_TARGET, job_id = %job_id, "stopping render engine for shutdown");
        stop_child(child);
        return Some(RelayEnd::Aborted);
    }
    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        warn!(target: ENGINE_TARGET, job_id = %job_id, "render engine exceeded its time limit");
        stop_child(child);
        return Some(RelayEnd::TimedOut);
    }
    None
}

fn poll_budget(deadline: Option<Instant>) -> Duration {
    deadline.map_or(POLL_INTERVAL, |deadline| {
        deadline
            .saturating_duration_since(Instant::now())
            .min(POLL_INTERVAL)
    })
}

fn stop_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn log_engine_line(job_id: &JobId, line: &[u8]) {
    let text = String::from_utf8_lossy(line);
    match ResponseLine::classify(&text) {
        ResponseLine::Progress(progress) => {
            info!(target: ENGINE_TARGET, job_id = %job_id, progress, "render progress");
        }
        ResponseLine::Saved(saved) => {
            info!(target: ENGINE_TARGET, job_id = %job_id, saved, "render output saved");
        }
        other => debug!(target: ENGINE_TARGET, job_id = %job_id, line = ?other, "engine output"),
    }
}
