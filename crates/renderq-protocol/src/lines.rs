//! Reassembly of newline-delimited records from chunked byte streams.

use std::io::{self, Read};

const READ_CHUNK_BYTES: usize = 4096;

/// Incremental splitter turning arbitrary byte chunks into complete lines.
///
/// Bytes after the last newline are carried over until a later chunk supplies
/// the terminator, or until [`LineSplitter::finish`] flushes them at end of
/// stream.
#[derive(Debug, Default)]
pub struct LineSplitter {
    carry: Vec<u8>,
    scanned: usize,
}

impl LineSplitter {
    /// Creates an empty splitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk read from the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.carry.extend_from_slice(chunk);
    }

    /// Returns the next complete line without its trailing newline.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let unscanned = self.carry.get(self.scanned..)?;
        match unscanned.iter().position(|byte| *byte == b'\n') {
            Some(offset) => {
                let end = self.scanned + offset;
                let mut line: Vec<u8> = self.carry.drain(..=end).collect();
                line.pop();
                self.scanned = 0;
                Some(line)
            }
            None => {
                self.scanned = self.carry.len();
                None
            }
        }
    }

    /// Flushes the unterminated remainder once the stream has ended.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        if self.carry.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.carry))
        }
    }

    /// Number of buffered bytes not yet emitted as a line.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

/// Lazy iterator over the lines of a reader.
///
/// Reads are issued only when the buffered bytes hold no complete line. The
/// iterator ends after the reader reports end of stream and any trailing
/// partial line has been yielded; a read error is yielded once and also ends
/// iteration.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: R,
    splitter: LineSplitter,
    chunk: Box<[u8]>,
    finished: bool,
}

impl<R: Read> LineReader<R> {
    /// Wraps `reader`.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            splitter: LineSplitter::new(),
            chunk: vec![0_u8; READ_CHUNK_BYTES].into_boxed_slice(),
            finished: false,
        }
    }
}

impl<R: Read> Iterator for LineReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.splitter.next_line() {
                return Some(Ok(line));
            }
            if self.finished {
                return None;
            }
            match read_chunk_with_retry(&mut self.reader, &mut self.chunk) {
                Ok(0) => {
                    self.finished = true;
                    return self.splitter.finish().map(Ok);
                }
                Ok(read) => self
                    .splitter
                    .push(self.chunk.get(..read).unwrap_or_default()),
                Err(error) => {
                    self.finished = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

fn read_chunk_with_retry<R: Read>(reader: &mut R, chunk: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(chunk) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
}
