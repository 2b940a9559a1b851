use std::time::Duration;

use camino::Utf8PathBuf;
use dirs::home_dir;

/// Default TCP port the daemon listens on.
pub const DEFAULT_PORT: u16 = 5555;

/// Default interface the daemon binds.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default host the client connects to.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default number of concurrent render workers.
pub const DEFAULT_WORKERS: usize = 2;

/// Default render engine executable, resolved through `PATH`.
pub const DEFAULT_ENGINE: &str = "blender";

/// Default socket read timeout while receiving headers and payloads.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 300;

/// Default budget for draining workers once shutdown begins.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Interval at which blocking loops re-check the shutdown token.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Job directory root as seen from the client over the sync tool.
pub const DEFAULT_REMOTE_ROOT: &str = "~/render_jobs";

/// Default directory-sync executable.
pub const DEFAULT_SYNC_TOOL: &str = "rsync";

/// Default arguments passed to the sync tool before the paths.
pub const DEFAULT_SYNC_ARGS: &[&str] = &["-avz"];

const JOBS_DIR_NAME: &str = "render_jobs";
const OUTPUT_DIR_NAME: &str = "Rendered";

/// Default job directory root on the server.
pub fn default_jobs_root() -> Utf8PathBuf {
    home_relative(JOBS_DIR_NAME)
}

/// Default local folder receiving fetched results.
pub fn default_output_dir() -> Utf8PathBuf {
    home_relative(OUTPUT_DIR_NAME)
}

/// Owned copy of [`DEFAULT_SYNC_ARGS`].
pub fn default_sync_args() -> Vec<String> {
    DEFAULT_SYNC_ARGS.iter().map(|arg| (*arg).to_owned()).collect()
}

fn home_relative(name: &str) -> Utf8PathBuf {
    home_dir()
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."))
        .join(name)
}
