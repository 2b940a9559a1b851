use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;

use renderq_config::ServerConfig;

/// Render queue dispatch daemon.
#[derive(Debug, Parser)]
#[command(name = "renderqd", version, about)]
struct Cli {
    #[command(flatten)]
    config: ServerConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let telemetry = match renderqd::telemetry::initialise(&cli.config) {
        Ok(handle) => handle,
        Err(error) => {
            let _ = writeln!(io::stderr(), "renderqd: {error}");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(target: "renderqd::process", format = %telemetry.format(), "telemetry initialised");
    match renderqd::run_server(&cli.config) {
        Ok(reason) => {
            tracing::info!(target: "renderqd::process", ?reason, "daemon stopped");
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(target: "renderqd::process", error = %error, "daemon exited with an error");
            let _ = writeln!(io::stderr(), "renderqd: {error}");
            ExitCode::FAILURE
        }
    }
}
