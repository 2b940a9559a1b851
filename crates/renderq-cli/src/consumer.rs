//! Sends a job and follows the server's response stream.

use std::io::{self, Read, Write};

use renderq_protocol::response::JOB_ID_PREFIX;
use renderq_protocol::{JobHeader, JobOutcome, LineReader, ResponseLine, is_valid_job_id};

use crate::AppError;
use crate::sink::{Level, LogSink};

const UPLOAD_CHUNK_BYTES: usize = 4096;

/// What the server reported about a submitted job.
///
/// Engine output is relayed verbatim, so `DONE:` and `JOB_ID:` lines can also
/// come from the engine. Only a `JOB_ID:` line directly following a `DONE:`
/// line is taken as the job id, and the last such pair wins; the daemon's own
/// pair always closes the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    /// Identifier from the `JOB_ID:` line following the terminal status.
    pub job_id: Option<String>,
    /// Terminal status, when one arrived.
    pub outcome: Option<JobOutcome>,
    /// Message of the last `ERR:` line, or the protocol violation that
    /// invalidated the response.
    pub error: Option<String>,
    awaiting_job_id: bool,
}

impl Submission {
    /// Whether the server reported `DONE: OK` and no error.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome == Some(JobOutcome::Success) && self.error.is_none()
    }

    fn record(&mut self, line: ResponseLine<'_>, sink: &mut impl LogSink) {
        let awaiting_job_id = std::mem::take(&mut self.awaiting_job_id);
        match line {
            ResponseLine::Queued(text) | ResponseLine::Processing(text) => {
                sink.emit(Level::Info, text);
            }
            ResponseLine::Progress(text) => sink.emit(Level::Progress, text),
            ResponseLine::Saved(text) => sink.emit(Level::Success, text),
            ResponseLine::JobId(id) if !awaiting_job_id => {
                sink.emit(Level::Info, &format!("{JOB_ID_PREFIX}{id}"));
            }
            ResponseLine::JobId(id) if is_valid_job_id(id) => {
                self.job_id = Some(id.to_owned());
                sink.emit(Level::Info, &format!("Job ID: {id}"));
            }
            ResponseLine::JobId(id) => {
                self.job_id = None;
                let message = format!("server reported an invalid job id '{id}'");
                sink.emit(Level::Error, &message);
                self.error = Some(message);
            }
            ResponseLine::Done(outcome) => {
                self.outcome = Some(outcome);
                self.awaiting_job_id = true;
                match outcome {
                    JobOutcome::Success => sink.emit(Level::Success, "Render completed successfully."),
                    JobOutcome::Failure => sink.emit(Level::Error, "Render failed on the server."),
                }
            }
            ResponseLine::Error(message) => {
                self.error = Some(message.to_owned());
                sink.emit(Level::Error, message);
            }
            ResponseLine::Output(text) if text.is_empty() => {}
            ResponseLine::Output(text) => sink.emit(Level::Info, text),
        }
    }
}

/// Sends `header` followed by `source`, then reports every response line
/// until the server closes the connection.
///
/// An upload cut short by the server is not an error when the server explained
/// itself with an `ERR:` line.
///
/// # Errors
///
/// Returns [`AppError::SendRequest`] when the upload fails without a server
/// explanation and [`AppError::ReadResponse`] when the response stream
/// breaks.
pub(crate) fn submit<S, R, L>(
    stream: &mut S,
    header: &JobHeader,
    source: &mut R,
    sink: &mut L,
) -> Result<Submission, AppError>
where
    S: Read + Write,
    R: Read,
    L: LogSink,
{
    let sent = send_job(stream, header, source);
    let mut submission = Submission::default();
    let mut read_error = None;
    for line in LineReader::new(&mut *stream) {
        match line {
            Ok(line) => {
                let text = String::from_utf8_lossy(&line);
                submission.record(ResponseLine::classify(&text), sink);
            }
            Err(error) => {
                read_error = Some(error);
                break;
            }
        }
    }

    match (sent, read_error) {
        (Err(_), _) if submission.error.is_some() => Ok(submission),
        (Err(error), _) => Err(error),
        (Ok(()), Some(error)) => Err(AppError::ReadResponse(error)),
        (Ok(()), None) => Ok(submission),
    }
}

fn send_job<S: Write, R: Read>(
    stream: &mut S,
    header: &JobHeader,
    source: &mut R,
) -> Result<(), AppError> {
    header.write_to(stream).map_err(AppError::SendRequest)?;
    let mut chunk = [0_u8; UPLOAD_CHUNK_BYTES];
    loop {
        let read = match source.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(AppError::SendRequest(error)),
        };
        stream
            .write_all(chunk.get(..read).unwrap_or_default())
            .map_err(AppError::SendRequest)?;
    }
    stream.flush().map_err(AppError::SendRequest)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    use renderq_protocol::{OutputFormat, RenderMode, split_header};
    use rstest::rstest;

    use super::*;

    struct ScriptedServer {
        address: std::net::SocketAddr,
        handle: JoinHandle<Vec<u8>>,
    }

    /// Reads the request, then replies with `chunks` written separately.
    fn scripted_server(chunks: Vec<&'static str>, expected_len: usize) -> ScriptedServer {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let address = listener.local_addr().expect("addr");
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut request = vec![0_u8; expected_len];
            stream.read_exact(&mut request).expect("read request");
            for chunk in chunks {
                stream.write_all(chunk.as_bytes()).expect("write chunk");
                stream.flush().expect("flush");
                thread::sleep(std::time::Duration::from_millis(5));
            }
            request
        });
        ScriptedServer { address, handle }
    }

    fn header(size: u64) -> JobHeader {
        JobHeader::new("movie.blend", RenderMode::Image, size, OutputFormat::Png)
    }

    fn run_submission(chunks: Vec<&'static str>) -> (Submission, Vec<(Level, String)>, Vec<u8>) {
        let payload = vec![9_u8; 5000];
        let header = header(payload.len() as u64);
        let server = scripted_server(chunks, header.encode().len() + payload.len());
        let mut stream = TcpStream::connect(server.address).expect("connect");
        let mut messages = Vec::new();
        let mut sink = |level: Level, message: &str| messages.push((level, message.to_owned()));

        let submission = submit(&mut stream, &header, &mut Cursor::new(payload), &mut sink)
            .expect("submit");
        let request = server.handle.join().expect("server thread");
        (submission, messages, request)
    }

    #[test]
    fn successful_job_reports_id_and_outcome() {
        let (submission, messages, request) = run_submission(vec![
            "QUEUED: Your request has been added to the queue. Current position: 1\n",
            "PROCESSING: Your job is now rendering.\nFra:1 Mem:12M\n",
            "Saved: '/jobs/x/frame_00001.png'\n",
            "DONE: OK\nJOB_ID:20240101_000000_000000_abcd1234\n",
        ]);

        assert!(submission.succeeded());
        assert_eq!(
            submission.job_id.as_deref(),
            Some("20240101_000000_000000_abcd1234")
        );
        assert!(messages.contains(&(Level::Progress, "Fra:1 Mem:12M".to_owned())));
        assert!(messages.contains(&(Level::Success, "Saved: '/jobs/x/frame_00001.png'".to_owned())));

        let (head, payload) = split_header(&request).expect("sentinel in request");
        assert_eq!(JobHeader::parse(head).expect("parse"), header(5000));
        assert_eq!(payload.len(), 5000);
    }

    const JOB_ID: &str = "20240101_000000_000000_abcd1234";

    #[rstest]
    #[case(vec!["DONE: ERR", "OR\nJOB_", "ID:20240101_000000", "_000000_abcd1234\n"])]
    #[case(vec!["DONE: ERROR\nJOB_ID:20240101_000000_000000_abcd1234"])]
    #[case(vec!["DONE: ERROR\n", "JOB_ID:20240101_000000_000000_abcd1234\n", "JOB_ID:20240101_000000_000000_ffffffff\n"])]
    fn lines_split_across_reads_are_reassembled(#[case] chunks: Vec<&'static str>) {
        let (submission, _, _) = run_submission(chunks);
        assert_eq!(submission.outcome, Some(JobOutcome::Failure));
        assert_eq!(submission.job_id.as_deref(), Some(JOB_ID));
        assert!(!submission.succeeded());
    }

    #[test]
    fn engine_job_id_lines_are_treated_as_output() {
        let (submission, messages, _) = run_submission(vec![
            "PROCESSING: Your job is now rendering.\n",
            "JOB_ID:../../escaped\n",
            "DONE: OK\nJOB_ID:20240101_000000_000000_abcd1234\n",
        ]);

        assert!(submission.succeeded());
        assert_eq!(submission.job_id.as_deref(), Some(JOB_ID));
        assert!(messages.contains(&(Level::Info, "JOB_ID:../../escaped".to_owned())));
    }

    #[rstest]
    #[case("DONE: OK\nJOB_ID:../../escaped\n")]
    #[case("DONE: OK\nJOB_ID:\n")]
    #[case("DONE: OK\nJOB_ID:20240101_000000_000000_abcd1234/..\n")]
    fn invalid_job_id_is_a_protocol_error(#[case] reply: &'static str) {
        let (submission, messages, _) = run_submission(vec![reply]);

        assert_eq!(submission.job_id, None);
        assert!(!submission.succeeded());
        let error = submission.error.expect("protocol error recorded");
        assert!(error.contains("invalid job id"), "{error}");
        assert!(messages.iter().any(|(level, _)| *level == Level::Error));
    }

    #[test]
    fn server_error_is_retained() {
        let (submission, messages, _) = run_submission(vec!["ERR: Server Stop Requested\n"]);
        assert_eq!(submission.error.as_deref(), Some("Server Stop Requested"));
        assert_eq!(submission.job_id, None);
        assert_eq!(
            messages,
            vec![(Level::Error, "Server Stop Requested".to_owned())]
        );
    }

    /// Stream whose writes fail as if the server hung up mid-upload.
    struct RefusingStream {
        reply: Cursor<Vec<u8>>,
    }

    impl Read for RefusingStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reply.read(buf)
        }
    }

    impl Write for RefusingStream {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed by server"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn rejected_upload_still_surfaces_the_server_error() {
        let mut stream = RefusingStream {
            reply: Cursor::new(b"ERR: Render queue is full.\n".to_vec()),
        };
        let mut sink = |_: Level, _: &str| {};

        let submission = submit(
            &mut stream,
            &header(16),
            &mut Cursor::new(vec![0_u8; 16]),
            &mut sink,
        )
        .expect("server error is reported as a submission");

        assert_eq!(submission.error.as_deref(), Some("Render queue is full."));
    }

    #[test]
    fn unexplained_upload_failure_is_an_error() {
        let mut stream = RefusingStream {
            reply: Cursor::new(Vec::new()),
        };
        let mut sink = |_: Level, _: &str| {};

        let error = submit(
            &mut stream,
            &header(16),
            &mut Cursor::new(vec![0_u8; 16]),
            &mut sink,
        )
        .expect_err("upload failure without a reply");

        assert!(matches!(error, AppError::SendRequest(_)));
    }
}
