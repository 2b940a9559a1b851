//! Status lines streamed from the daemon to the submitting client.
//!
//! Every response line is plain text terminated by `\n`. Engine output is
//! forwarded verbatim between the `PROCESSING:` line and the terminal
//! `DONE:` pair, so classification relies on prefixes for protocol lines and
//! on substring markers for engine progress.

use std::fmt;
use std::io::{self, Write};

/// Prefix of the admission acknowledgement.
pub const QUEUED_PREFIX: &str = "QUEUED:";
/// Prefix of the line announcing that rendering has started.
pub const PROCESSING_PREFIX: &str = "PROCESSING:";
/// Prefix of fatal error lines; no job id follows them.
pub const ERROR_PREFIX: &str = "ERR:";
/// Prefix of the line carrying the job id.
pub const JOB_ID_PREFIX: &str = "JOB_ID:";
/// Terminal status line for a successful render.
pub const DONE_OK: &str = "DONE: OK";
/// Terminal status line for a failed render.
pub const DONE_ERROR: &str = "DONE: ERROR";
/// Engine marker reported when an output file is written.
pub const SAVED_MARKER: &str = "Saved:";
/// Engine markers reported while frames are rendering.
pub const PROGRESS_MARKERS: [&str; 2] = ["Fra:", "Rendering"];
/// Notice sent to connections interrupted by a server shutdown.
pub const STOP_REQUESTED: &str = "Server Stop Requested";
/// Notice sent to connections arriving after shutdown began.
pub const NOT_ACCEPTING: &str = "Server not accepting connections.";

/// Field widths of a job id: `YYYYMMDD_HHMMSS_ffffff_xxxxxxxx`.
const JOB_ID_FIELDS: [usize; 4] = [8, 6, 6, 8];

/// Whether `id` has the shape the daemon assigns: a UTC date, time and
/// microseconds followed by eight lowercase hex digits, joined by `_`.
///
/// Anything else, including ids carrying path separators or `..`, is
/// rejected, so an accepted id is always a single safe path component.
#[must_use]
pub fn is_valid_job_id(id: &str) -> bool {
    let fields: Vec<&str> = id.split('_').collect();
    let [date, time, micros, suffix] = fields.as_slice() else {
        return false;
    };
    let widths_match = [date, time, micros, suffix]
        .iter()
        .zip(JOB_ID_FIELDS)
        .all(|(field, width)| field.len() == width);
    widths_match
        && [date, time, micros]
            .iter()
            .all(|field| field.bytes().all(|byte| byte.is_ascii_digit()))
        && suffix
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
}

/// Terminal result reported with the job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The engine exited with status zero.
    Success,
    /// The engine exited with a nonzero status or was stopped.
    Failure,
}

impl JobOutcome {
    /// Returns the status line announcing this outcome.
    #[must_use]
    pub const fn status_line(self) -> &'static str {
        match self {
            Self::Success => DONE_OK,
            Self::Failure => DONE_ERROR,
        }
    }
}

/// Protocol lines written by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMessage<'a> {
    /// Admission acknowledgement with the 1-based queue position.
    Queued {
        /// Position in the queue at admission time.
        position: usize,
    },
    /// Rendering has started.
    Processing,
    /// Fatal error; the connection closes afterwards.
    Error(&'a str),
    /// Terminal status followed by the job id line.
    Done {
        /// Render result.
        outcome: JobOutcome,
        /// Identifier naming the job directory.
        job_id: &'a str,
    },
}

impl ServerMessage<'_> {
    /// Writes the message and flushes `writer`.
    ///
    /// # Errors
    ///
    /// Returns any error reported by the writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self.to_string().as_bytes())?;
        writer.flush()
    }
}

impl fmt::Display for ServerMessage<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued { position } => writeln!(
                formatter,
                "{QUEUED_PREFIX} Your request has been added to the queue. Current position: {position}"
            ),
            Self::Processing => writeln!(formatter, "{PROCESSING_PREFIX} Your job is now rendering."),
            Self::Error(message) => writeln!(formatter, "{ERROR_PREFIX} {message}"),
            Self::Done { outcome, job_id } => {
                writeln!(formatter, "{}", outcome.status_line())?;
                writeln!(formatter, "{JOB_ID_PREFIX}{job_id}")
            }
        }
    }
}

/// Classification of a single response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLine<'a> {
    /// `QUEUED:` acknowledgement.
    Queued(&'a str),
    /// `PROCESSING:` notice.
    Processing(&'a str),
    /// Engine line carrying a frame progress marker.
    Progress(&'a str),
    /// Engine line reporting a written output file.
    Saved(&'a str),
    /// `JOB_ID:` line; holds the trimmed id.
    JobId(&'a str),
    /// `DONE: OK` or `DONE: ERROR`.
    Done(JobOutcome),
    /// `ERR:` line; holds the message after the prefix.
    Error(&'a str),
    /// Any other line, usually engine chatter.
    Output(&'a str),
}

impl<'a> ResponseLine<'a> {
    /// Classifies `line` after trimming surrounding whitespace.
    #[must_use]
    pub fn classify(line: &'a str) -> Self {
        let line = line.trim();
        if let Some(job_id) = line.strip_prefix(JOB_ID_PREFIX) {
            return Self::JobId(job_id.trim());
        }
        if let Some(message) = line.strip_prefix(ERROR_PREFIX) {
            return Self::Error(message.trim());
        }
        if line.contains(DONE_ERROR) {
            return Self::Done(JobOutcome::Failure);
        }
        if line.contains(DONE_OK) {
            return Self::Done(JobOutcome::Success);
        }
        if line.starts_with(QUEUED_PREFIX) {
            return Self::Queued(line);
        }
        if line.starts_with(PROCESSING_PREFIX) {
            return Self::Processing(line);
        }
        if PROGRESS_MARKERS.iter().any(|marker| line.contains(marker)) {
            return Self::Progress(line);
        }
        if line.contains(SAVED_MARKER) {
            return Self::Saved(line);
        }
        Self::Output(line)
    }
}
