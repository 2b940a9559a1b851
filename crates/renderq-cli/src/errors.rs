//! Error types for the submission client.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("blend file '{path}' does not exist")]
    MissingFile { path: Utf8PathBuf },
    #[error("'{path}' has no usable file name")]
    InvalidFileName { path: Utf8PathBuf },
    #[error("failed to read blend file '{path}': {source}")]
    ReadFile {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to resolve render server address {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("no addresses found for render server {endpoint}")]
    ResolveEmpty { endpoint: String },
    #[error("failed to connect to render server at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to send job to render server: {0}")]
    SendRequest(#[source] io::Error),
    #[error("failed to read response from render server: {0}")]
    ReadResponse(#[source] io::Error),
}
