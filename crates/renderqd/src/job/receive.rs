//! Reading the header frame and payload from a client socket.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};

use camino::Utf8Path;

use renderq_protocol::{HeaderError, JobHeader, MAX_HEADER_BYTES, split_header};

use super::JobError;

const HEADER_CHUNK_BYTES: usize = 1024;
const PAYLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Outcome of receiving the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PayloadReceipt {
    pub(crate) expected: u64,
    pub(crate) written: u64,
}

impl PayloadReceipt {
    /// Whether the client closed before sending every declared byte.
    pub(crate) fn is_truncated(self) -> bool {
        self.written < self.expected
    }
}

/// Reads until the sentinel line and parses the header.
///
/// Returns the header together with any payload bytes that arrived in the
/// same reads.
pub(crate) fn read_header<R: Read>(reader: &mut R) -> Result<(JobHeader, Vec<u8>), JobError> {
    let mut buffer = Vec::with_capacity(HEADER_CHUNK_BYTES);
    let mut chunk = [0_u8; HEADER_CHUNK_BYTES];
    loop {
        if let Some((head, overflow)) = split_header(&buffer) {
            let header = JobHeader::parse(head)?;
            return Ok((header, overflow.to_vec()));
        }
        if buffer.len() > MAX_HEADER_BYTES {
            return Err(HeaderError::TooLarge {
                limit: MAX_HEADER_BYTES,
            }
            .into());
        }
        let read = read_retrying(reader, &mut chunk)?;
        if read == 0 {
            return Err(HeaderError::Incomplete.into());
        }
        buffer.extend_from_slice(chunk.get(..read).unwrap_or_default());
    }
}

/// Writes the declared payload to `path`, starting with `overflow`.
///
/// Bytes past the declared size are discarded. A connection closed early is
/// not an error: the receipt records how much arrived.
pub(crate) fn receive_payload<R: Read>(
    reader: &mut R,
    overflow: &[u8],
    expected: u64,
    path: &Utf8Path,
) -> Result<PayloadReceipt, JobError> {
    let write_error = |source| JobError::PayloadWrite {
        path: path.to_owned(),
        source,
    };
    let mut file = BufWriter::new(File::create(path).map_err(write_error)?);

    let head_len = usize::try_from(expected).map_or(overflow.len(), |limit| limit.min(overflow.len()));
    let head = overflow.get(..head_len).unwrap_or_default();
    file.write_all(head).map_err(write_error)?;
    let mut written = head.len() as u64;

    let mut chunk = vec![0_u8; PAYLOAD_CHUNK_BYTES];
    while written < expected {
        let wanted = usize::try_from(expected - written).map_or(chunk.len(), |left| left.min(chunk.len()));
        let read = read_retrying(reader, chunk.get_mut(..wanted).unwrap_or_default())?;
        if read == 0 {
            break;
        }
        file.write_all(chunk.get(..read).unwrap_or_default())
            .map_err(write_error)?;
        written += read as u64;
    }
    file.flush().map_err(write_error)?;

    Ok(PayloadReceipt { expected, written })
}

fn read_retrying<R: Read>(reader: &mut R, chunk: &mut [u8]) -> Result<usize, JobError> {
    loop {
        match reader.read(chunk) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(JobError::Transport { source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;

    use camino::Utf8PathBuf;
    use renderq_protocol::{OutputFormat, RenderMode};
    use rstest::rstest;

    use super::*;

    struct Chunked<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Chunked<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let take = self.step.min(buf.len()).min(self.data.len());
            let (head, tail) = self.data.split_at(take);
            buf[..take].copy_from_slice(head);
            self.data = tail;
            Ok(take)
        }
    }

    fn temp_file(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).expect("utf8 path")
    }

    #[rstest]
    #[case(1)]
    #[case(5)]
    #[case(1024)]
    fn header_survives_any_chunking(#[case] step: usize) {
        let wire = b"movie.blend\nimage\n4\nPNG\n===END===\nabcd";
        let mut reader = Chunked { data: wire, step };
        let (header, overflow) = read_header(&mut reader).expect("read header");
        assert_eq!(
            header,
            JobHeader::new("movie.blend", RenderMode::Image, 4, OutputFormat::Png)
        );
        let mut rest = overflow;
        reader.read_to_end(&mut rest).expect("read rest");
        assert_eq!(rest, b"abcd");
    }

    #[test]
    fn close_before_sentinel_is_incomplete() {
        let mut reader = Cursor::new(b"movie.blend\nimage\n4\n".to_vec());
        let error = read_header(&mut reader).expect_err("should fail");
        assert!(matches!(
            error,
            JobError::MalformedHeader(HeaderError::Incomplete)
        ));
    }

    #[test]
    fn oversized_header_is_rejected() {
        let mut reader = Cursor::new(vec![b'a'; MAX_HEADER_BYTES + HEADER_CHUNK_BYTES * 2]);
        let error = read_header(&mut reader).expect_err("should fail");
        assert!(matches!(
            error,
            JobError::MalformedHeader(HeaderError::TooLarge { .. })
        ));
    }

    #[test]
    fn payload_combines_overflow_and_stream() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = temp_file(&dir, "movie.blend");
        let mut reader = Cursor::new(b"efgh".to_vec());

        let receipt = receive_payload(&mut reader, b"abcd", 8, &path).expect("receive");

        assert!(!receipt.is_truncated());
        assert_eq!(fs::read(&path).expect("read payload"), b"abcdefgh");
    }

    #[test]
    fn overflow_past_declared_size_is_discarded() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = temp_file(&dir, "movie.blend");
        let mut reader = Cursor::new(b"more".to_vec());

        let receipt = receive_payload(&mut reader, b"abcdef", 3, &path).expect("receive");

        assert_eq!(receipt.written, 3);
        assert_eq!(fs::read(&path).expect("read payload"), b"abc");
        assert_eq!(reader.position(), 0, "stream is not read once the size is met");
    }

    #[test]
    fn early_close_yields_truncated_receipt() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = temp_file(&dir, "movie.blend");
        let mut reader = Cursor::new(vec![7_u8; 500]);

        let receipt = receive_payload(&mut reader, &[], 1024, &path).expect("receive");

        assert!(receipt.is_truncated());
        assert_eq!(receipt.written, 500);
        assert_eq!(fs::metadata(&path).expect("metadata").len(), 500);
    }
}
