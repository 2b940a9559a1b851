//! Fake render engines and client helpers for behavioural tests.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

use renderq_config::DEFAULT_ENGINE;
use renderq_protocol::{JobHeader, OutputFormat, RenderMode};

use crate::install::test_support::pack_archive;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(15);

/// Engine scripts receive `-b <source> -o <template> -F <format> -f 1`, so
/// `$2` is the source file and `$4` the output template.
pub(crate) const SUCCESSFUL_ENGINE: &str = r#"echo "Blender 4.0.2 (hash 0000000)"
echo "Fra:1 Mem:12.00M | Rendering 1 / 64 samples"
out=$(echo "$4" | sed 's/#####/00001/').png
printf 'png' > "$out"
echo "Saved: '$out'""#;

pub(crate) const SIZE_REPORTING_ENGINE: &str =
    r#"echo "source bytes: $(wc -c < "$2" | tr -d ' ')""#;

pub(crate) const LONG_RUNNING_ENGINE: &str = "echo \"Fra:1 Mem:1M\"\nexec sleep 30";

pub(crate) fn failing_engine(code: i32) -> String {
    format!("echo \"Error: cannot read file\" >&2\nexit {code}")
}

/// Packs a shell-script engine named [`DEFAULT_ENGINE`] into a release-style
/// archive for the daemon to install.
pub(crate) fn engine_archive(dir: &Utf8Path, body: &str) -> Utf8PathBuf {
    let script = format!("#!/bin/sh\n{body}\n");
    pack_archive(dir, &[(DEFAULT_ENGINE, script.as_str())])
}

/// Client connection reading response lines as they arrive.
pub(crate) struct TestClient {
    reader: BufReader<TcpStream>,
    pub(crate) lines: Vec<String>,
}

impl TestClient {
    pub(crate) fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect to daemon");
        stream
            .set_read_timeout(Some(CLIENT_TIMEOUT))
            .expect("set read timeout");
        Self {
            reader: BufReader::new(stream),
            lines: Vec::new(),
        }
    }

    pub(crate) fn send(&mut self, bytes: &[u8]) {
        self.reader.get_mut().write_all(bytes).expect("send to daemon");
    }

    pub(crate) fn submit(&mut self, name: &str, declared: u64, payload: &[u8]) {
        let header = JobHeader::new(name, RenderMode::Image, declared, OutputFormat::Png);
        self.send(header.encode().as_bytes());
        self.send(payload);
    }

    pub(crate) fn close_write(&self) {
        self.reader
            .get_ref()
            .shutdown(Shutdown::Write)
            .expect("half-close client");
    }

    /// Reads lines until one starts with `prefix`.
    pub(crate) fn read_until(&mut self, prefix: &str) {
        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line).expect("read response line");
            assert!(read > 0, "connection closed before a {prefix} line: {:?}", self.lines);
            let line = line.trim_end().to_owned();
            let found = line.starts_with(prefix);
            self.lines.push(line);
            if found {
                return;
            }
        }
    }

    /// Reads until the daemon closes the connection.
    pub(crate) fn read_to_close(&mut self) {
        let mut rest = String::new();
        self.reader
            .read_to_string(&mut rest)
            .expect("read until close");
        self.lines.extend(rest.lines().map(str::to_owned));
    }

    pub(crate) fn position_of(&self, prefix: &str) -> Option<usize> {
        self.lines.iter().position(|line| line.starts_with(prefix))
    }

    pub(crate) fn job_id(&self) -> Option<&str> {
        self.lines
            .iter()
            .find_map(|line| line.strip_prefix("JOB_ID:"))
            .map(str::trim)
    }
}
