use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

use renderq_protocol::HeaderError;

/// Failures that end a job before a terminal status could be reported.
///
/// The message is sent to the client as an `ERR:` line.
#[derive(Debug, Error)]
pub enum JobError {
    /// The header frame was incomplete or invalid.
    #[error(transparent)]
    MalformedHeader(#[from] HeaderError),
    /// Reading from or configuring the client socket failed.
    #[error("failed to receive job from client: {source}")]
    Transport {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The job directory could not be created.
    #[error("failed to create job directory '{path}': {source}")]
    JobDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the payload to disk failed.
    #[error("failed to store uploaded file '{path}': {source}")]
    PayloadWrite {
        /// Destination file.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The render engine could not be started.
    #[error("failed to start render engine '{engine}': {source}")]
    EngineSpawn {
        /// Engine executable.
        engine: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The pipe carrying the engine's output could not be created.
    #[error("failed to create engine output pipe: {source}")]
    OutputPipe {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Waiting for the render engine failed.
    #[error("failed to wait for render engine: {source}")]
    EngineWait {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The engine output relay thread could not be started.
    #[error("failed to start engine output relay: {source}")]
    RelayThread {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The job identifier could not be formatted.
    #[error("failed to generate job id: {source}")]
    JobId {
        /// Underlying formatting error.
        #[source]
        source: time::error::Format,
    },
}
