//! Per-job state and the steps a worker runs for one connection.

mod client;
mod errors;
mod executor;
mod receive;

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use strum::Display;
use time::OffsetDateTime;
use time::macros::format_description;
use uuid::Uuid;

use renderq_protocol::JobHeader;

pub(crate) use self::client::ClientChannel;
pub use self::errors::JobError;
pub(crate) use self::executor::{ExecutorSettings, JobExecutor};
pub(crate) use self::receive::{read_header, receive_payload};

const OUTPUT_PATTERN: &str = "frame_#####";
const ID_SUFFIX_LEN: usize = 8;

/// Identifier naming a job and its directory under the jobs root.
///
/// Formatted as `YYYYMMDD_HHMMSS_ffffff_xxxxxxxx`: a UTC timestamp with
/// microseconds and eight hex digits of a random UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    /// Generates a fresh identifier from the current UTC time.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::JobId`] when the timestamp cannot be formatted.
    pub fn generate() -> Result<Self, JobError> {
        Self::at(OffsetDateTime::now_utc())
    }

    fn at(moment: OffsetDateTime) -> Result<Self, JobError> {
        let format = format_description!(
            "[year][month][day]_[hour][minute][second]_[subsecond digits:6]"
        );
        let stamp = moment
            .format(&format)
            .map_err(|source| JobError::JobId { source })?;
        let suffix: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(ID_SUFFIX_LEN)
            .collect();
        Ok(Self(format!("{stamp}_{suffix}")))
    }

    /// Borrows the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    /// Admitted and waiting in the queue for a worker.
    Queued,
    /// Dequeued by a worker: receiving the payload or rendering it.
    Processing,
    /// Engine exited with status zero.
    Completed,
    /// Engine failed, timed out or could not be run.
    Failed,
    /// Interrupted by server shutdown.
    Aborted,
}

/// A received job with its own directory under the jobs root.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) id: JobId,
    pub(crate) header: JobHeader,
    pub(crate) status: JobStatus,
    pub(crate) directory: Utf8PathBuf,
}

impl Job {
    /// Allocates an id and creates the job directory. Called by the worker
    /// that dequeued the connection, so the job starts out processing.
    ///
    /// The directory must not exist yet; the jobs root is created on demand.
    pub(crate) fn create(jobs_root: &Utf8Path, header: JobHeader) -> Result<Self, JobError> {
        fs::create_dir_all(jobs_root).map_err(|source| JobError::JobDirectory {
            path: jobs_root.to_owned(),
            source,
        })?;
        let id = JobId::generate()?;
        let directory = jobs_root.join(id.as_str());
        fs::create_dir(&directory).map_err(|source| JobError::JobDirectory {
            path: directory.clone(),
            source,
        })?;
        Ok(Self {
            id,
            header,
            status: JobStatus::Processing,
            directory,
        })
    }

    /// Path the payload is written to.
    pub(crate) fn source_path(&self) -> Utf8PathBuf {
        self.directory.join(&self.header.file_name)
    }

    /// Output path template handed to the engine.
    pub(crate) fn output_template(&self) -> Utf8PathBuf {
        self.directory.join(OUTPUT_PATTERN)
    }
}

#[cfg(test)]
mod tests {
    use renderq_protocol::{OutputFormat, RenderMode};
    use time::macros::datetime;

    use super::*;

    #[test]
    fn job_id_has_timestamp_and_hex_suffix() {
        let id = JobId::at(datetime!(2024-03-05 07:08:09.123456 UTC)).expect("format id");
        let (stamp, suffix) = id.as_str().rsplit_once('_').expect("suffix separator");
        assert_eq!(stamp, "20240305_070809_123456");
        assert_eq!(suffix.len(), ID_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(renderq_protocol::is_valid_job_id(id.as_str()));
    }

    #[test]
    fn generated_ids_are_accepted_by_clients() {
        let id = JobId::generate().expect("id");
        assert!(renderq_protocol::is_valid_job_id(id.as_str()), "{id}");
    }

    #[test]
    fn generated_ids_differ() {
        let first = JobId::generate().expect("first id");
        let second = JobId::generate().expect("second id");
        assert_ne!(first, second);
    }

    #[test]
    fn job_directory_holds_source_and_output_template() {
        let temp = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().join("jobs")).expect("utf8 path");
        let header = JobHeader::new("movie.blend", RenderMode::Image, 4, OutputFormat::Png);

        let job = Job::create(&root, header).expect("create job");

        assert!(job.directory.is_dir());
        assert_eq!(job.directory.file_name(), Some(job.id.as_str()));
        assert_eq!(job.source_path(), job.directory.join("movie.blend"));
        assert_eq!(job.output_template(), job.directory.join("frame_#####"));
        assert_eq!(job.status.to_string(), "processing");
    }
}
