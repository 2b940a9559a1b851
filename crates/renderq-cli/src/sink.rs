//! Progress reporting seam between the client logic and its caller.

use std::io::Write;

/// Severity attached to a reported message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Routine status.
    Info,
    /// Render progress forwarded from the engine.
    Progress,
    /// A step completed successfully.
    Success,
    /// A failure the user should see.
    Error,
}

/// Receives one message per response line or retrieval step.
pub trait LogSink {
    /// Handles a single message.
    fn emit(&mut self, level: Level, message: &str);
}

impl<F> LogSink for F
where
    F: FnMut(Level, &str),
{
    fn emit(&mut self, level: Level, message: &str) {
        self(level, message);
    }
}

/// Sink writing `[renderq]` prefixed lines, errors to `stderr`.
pub(crate) struct WriterSink<'a, W: Write, E: Write> {
    stdout: &'a mut W,
    stderr: &'a mut E,
}

impl<'a, W: Write, E: Write> WriterSink<'a, W, E> {
    pub(crate) fn new(stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self { stdout, stderr }
    }
}

impl<W: Write, E: Write> LogSink for WriterSink<'_, W, E> {
    fn emit(&mut self, level: Level, message: &str) {
        let _ = match level {
            Level::Error => writeln!(self.stderr, "[renderq] error: {message}"),
            Level::Info | Level::Progress | Level::Success => {
                writeln!(self.stdout, "[renderq] {message}")
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_go_to_stderr() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut sink = WriterSink::new(&mut stdout, &mut stderr);
        sink.emit(Level::Progress, "Fra:1");
        sink.emit(Level::Error, "boom");
        assert_eq!(String::from_utf8(stdout).expect("utf8"), "[renderq] Fra:1\n");
        assert_eq!(
            String::from_utf8(stderr).expect("utf8"),
            "[renderq] error: boom\n"
        );
    }
}
