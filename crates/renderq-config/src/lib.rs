//! Shared configuration for the render queue daemon and client.
//!
//! Both binaries read their settings from command-line flags with
//! environment-variable fallbacks (`RENDERQD_*` for the daemon, `RENDERQ_*`
//! for the client). The structures here are `clap` argument groups so each
//! binary can flatten them into its own parser and tests can build them
//! directly.

mod defaults;
mod logging;

use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Args;

pub use defaults::{
    DEFAULT_BIND_HOST, DEFAULT_ENGINE, DEFAULT_LOG_FILTER, DEFAULT_PORT, DEFAULT_READ_TIMEOUT_SECS,
    DEFAULT_REMOTE_ROOT, DEFAULT_SERVER_HOST, DEFAULT_SHUTDOWN_TIMEOUT_SECS, DEFAULT_SYNC_ARGS,
    DEFAULT_SYNC_TOOL, DEFAULT_WORKERS, POLL_INTERVAL, default_jobs_root, default_output_dir,
    default_sync_args,
};
pub use logging::LogFormat;

/// Settings for the dispatch daemon.
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Interface to bind.
    #[arg(long, env = "RENDERQD_HOST", default_value = DEFAULT_BIND_HOST)]
    pub host: String,
    /// TCP port to listen on.
    #[arg(long, env = "RENDERQD_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Number of jobs rendered concurrently.
    #[arg(long, env = "RENDERQD_WORKERS", default_value_t = DEFAULT_WORKERS, value_parser = parse_positive)]
    pub workers: usize,
    /// Maximum number of waiting connections; unbounded when omitted.
    #[arg(long, env = "RENDERQD_QUEUE_CAPACITY", value_parser = parse_positive)]
    pub queue_capacity: Option<usize>,
    /// Directory under which one folder per job is created.
    #[arg(long, env = "RENDERQD_JOBS_ROOT", default_value_t = default_jobs_root())]
    pub jobs_root: Utf8PathBuf,
    /// Render engine executable. With `--engine-archive`, only its file name
    /// is used to find the binary in the unpacked archive.
    #[arg(long, env = "RENDERQD_ENGINE", default_value = DEFAULT_ENGINE)]
    pub engine: Utf8PathBuf,
    /// Engine archive (URL or local path) unpacked into the scratch directory
    /// at startup.
    #[arg(long, env = "RENDERQD_ENGINE_ARCHIVE", requires = "engine_scratch_dir")]
    pub engine_archive: Option<String>,
    /// Per-run engine installation, emptied at startup and removed during
    /// shutdown. Only used together with `--engine-archive`.
    #[arg(long, env = "RENDERQD_ENGINE_SCRATCH_DIR")]
    pub engine_scratch_dir: Option<Utf8PathBuf>,
    /// Socket read timeout while receiving a job, in seconds; 0 disables it.
    #[arg(long, env = "RENDERQD_READ_TIMEOUT_SECS", default_value_t = DEFAULT_READ_TIMEOUT_SECS)]
    pub read_timeout_secs: u64,
    /// Wall-clock limit for a single engine run, in seconds.
    #[arg(long, env = "RENDERQD_ENGINE_TIMEOUT_SECS")]
    pub engine_timeout_secs: Option<u64>,
    /// Time allowed for workers to finish once shutdown begins, in seconds.
    #[arg(long, env = "RENDERQD_SHUTDOWN_TIMEOUT_SECS", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout_secs: u64,
    /// Tracing filter expression.
    #[arg(long, env = "RENDERQD_LOG_FILTER", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
    /// Log output format.
    #[arg(long, env = "RENDERQD_LOG_FORMAT", default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Socket read timeout, or `None` when disabled.
    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_secs > 0).then(|| Duration::from_secs(self.read_timeout_secs))
    }

    /// Engine wall-clock limit, if configured.
    #[must_use]
    pub fn engine_timeout(&self) -> Option<Duration> {
        self.engine_timeout_secs.map(Duration::from_secs)
    }

    /// Drain budget applied during shutdown.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BIND_HOST.to_owned(),
            port: DEFAULT_PORT,
            workers: DEFAULT_WORKERS,
            queue_capacity: None,
            jobs_root: default_jobs_root(),
            engine: Utf8PathBuf::from(DEFAULT_ENGINE),
            engine_archive: None,
            engine_scratch_dir: None,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            engine_timeout_secs: None,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: LogFormat::Json,
        }
    }
}

/// Settings for submitting jobs and fetching their results.
#[derive(Debug, Clone, Args)]
pub struct ClientConfig {
    /// Render server host.
    #[arg(long, env = "RENDERQ_HOST", default_value = DEFAULT_SERVER_HOST)]
    pub host: String,
    /// Render server port.
    #[arg(long, env = "RENDERQ_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Local folder receiving one sub-folder per fetched job.
    #[arg(long, env = "RENDERQ_OUTPUT_DIR", default_value_t = default_output_dir())]
    pub output_dir: Utf8PathBuf,
    /// Account used for the sync tool's remote side.
    #[arg(long, env = "RENDERQ_REMOTE_USER")]
    pub remote_user: Option<String>,
    /// Job directory root on the server, as addressed by the sync tool.
    #[arg(long, env = "RENDERQ_REMOTE_ROOT", default_value = DEFAULT_REMOTE_ROOT)]
    pub remote_root: String,
    /// Directory-sync executable.
    #[arg(long, env = "RENDERQ_SYNC_TOOL", default_value = DEFAULT_SYNC_TOOL)]
    pub sync_tool: String,
    /// Argument passed to the sync tool before the paths; repeatable.
    #[arg(
        long = "sync-arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        default_values_t = default_sync_args()
    )]
    pub sync_args: Vec<String>,
    /// Local add-ons directory pushed to the server before submitting.
    #[arg(long, env = "RENDERQ_ADDONS_DIR")]
    pub addons_dir: Option<Utf8PathBuf>,
    /// Remote add-ons directory receiving `--addons-dir`.
    #[arg(long, env = "RENDERQ_REMOTE_ADDONS_DIR", requires = "addons_dir")]
    pub remote_addons_dir: Option<String>,
    /// Skips fetching results after the job finishes.
    #[arg(long)]
    pub no_fetch: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_owned(),
            port: DEFAULT_PORT,
            output_dir: default_output_dir(),
            remote_user: None,
            remote_root: DEFAULT_REMOTE_ROOT.to_owned(),
            sync_tool: DEFAULT_SYNC_TOOL.to_owned(),
            sync_args: default_sync_args(),
            addons_dir: None,
            remote_addons_dir: None,
            no_fetch: false,
        }
    }
}

fn parse_positive(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("value must be at least 1".to_owned()),
        Ok(parsed) => Ok(parsed),
        Err(error) => Err(error.to_string()),
    }
}
