//! Command-line client for the render queue.
//!
//! `renderq` uploads a blend file to the dispatch daemon, prints the status
//! lines and engine progress it streams back, and, once the server reports a
//! job id, copies the job directory into a local output folder with the
//! configured sync tool. Add-ons can be pushed to the server before the
//! upload.
//!
//! The runtime is exposed as [`run`] so tests can substitute the output
//! streams.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, Write};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;

use renderq_config::ClientConfig;
use renderq_protocol::{JobHeader, OutputFormat, RenderMode};

mod consumer;
mod errors;
mod retrieval;
mod sink;
mod transport;

pub use consumer::Submission;
pub(crate) use errors::AppError;
pub use retrieval::{
    RetrievalError, SyncCommand, fetch_command, fetch_results, push_addons, remote_spec,
};
pub use sink::{Level, LogSink};

use sink::WriterSink;

/// Submit a blend file to the render queue.
#[derive(Debug, Parser)]
#[command(name = "renderq", version, about)]
struct Cli {
    /// Blend file to render.
    file: Utf8PathBuf,
    /// Render every frame instead of a single image.
    #[arg(long)]
    animation: bool,
    /// Output format requested from the engine.
    #[arg(long, default_value_t = OutputFormat::Png)]
    format: OutputFormat,
    #[command(flatten)]
    config: ClientConfig,
}

impl Cli {
    fn mode(&self) -> RenderMode {
        if self.animation {
            RenderMode::Animation
        } else {
            RenderMode::Image
        }
    }
}

/// Runs the client using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) if !error.use_stderr() => {
            let _ = write!(stdout, "{error}");
            return ExitCode::SUCCESS;
        }
        Err(error) => {
            let _ = write!(stderr, "{}", AppError::CliUsage(error));
            return ExitCode::FAILURE;
        }
    };

    let mut sink = WriterSink::new(stdout, stderr);
    match submit_and_fetch(&cli, &mut sink) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            sink.emit(Level::Error, &error.to_string());
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the job rendered and its results were fetched.
fn submit_and_fetch<L: LogSink>(cli: &Cli, sink: &mut L) -> Result<bool, AppError> {
    let (header, mut source) = open_job(cli)?;

    if let Err(error) = push_addons(&cli.config, sink) {
        sink.emit(
            Level::Error,
            &format!("add-on sync failed, submitting anyway: {error}"),
        );
    }

    let mut stream = transport::connect(&cli.config.host, cli.config.port)?;
    sink.emit(
        Level::Info,
        &format!(
            "Submitting {} ({} bytes, {}, {}) to {}:{}",
            header.file_name,
            header.payload_size,
            header.mode,
            header.format,
            cli.config.host,
            cli.config.port
        ),
    );
    let submission = consumer::submit(&mut stream, &header, &mut source, sink)?;

    let fetched = match (&submission.job_id, cli.config.no_fetch) {
        (Some(job_id), false) => fetch_results(&cli.config, job_id, sink).is_ok(),
        (Some(job_id), true) => {
            sink.emit(Level::Info, &format!("Skipping result fetch for job {job_id}."));
            true
        }
        (None, _) => {
            if submission.error.is_none() && submission.outcome.is_none() {
                sink.emit(
                    Level::Error,
                    "server closed the connection without reporting a result",
                );
            }
            true
        }
    };
    Ok(submission.succeeded() && fetched)
}

fn open_job(cli: &Cli) -> Result<(JobHeader, BufReader<File>), AppError> {
    let path = &cli.file;
    if !path.is_file() {
        return Err(AppError::MissingFile { path: path.clone() });
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| AppError::InvalidFileName { path: path.clone() })?;
    let read_error = |source| AppError::ReadFile {
        path: path.clone(),
        source,
    };
    let file = File::open(path).map_err(read_error)?;
    let size = file.metadata().map_err(read_error)?.len();
    let header = JobHeader::new(file_name, cli.mode(), size, cli.format);
    Ok((header, BufReader::new(file)))
}
