//! Wire vocabulary shared by the render queue daemon and its clients.
//!
//! A client opens a plain stream connection and sends a four-field textual
//! header terminated by the `===END===` sentinel line, immediately followed by
//! the declared number of payload bytes. The daemon answers with
//! newline-terminated status lines and closes the connection once the job has
//! reached a terminal state:
//!
//! ```text
//! movie.blend
//! image
//! 1024
//! PNG
//! ===END===
//! <1024 raw bytes>
//! ```
//!
//! ```text
//! QUEUED: Your request has been added to the queue. Current position: 1
//! PROCESSING: Your job is now rendering.
//! Fra:1 Mem:12.00M | Rendering 1 / 64 samples
//! DONE: OK
//! JOB_ID:20240101_120000_000000_1a2b3c4d
//! ```
//!
//! The [`header`] module frames and parses the request preamble, [`lines`]
//! reassembles newline-delimited records from arbitrarily chunked reads, and
//! [`response`] defines the status lines and their classification.

pub mod header;
pub mod lines;
pub mod response;

pub use header::{
    HeaderError, JobHeader, MAX_HEADER_BYTES, OutputFormat, RenderMode, SENTINEL, split_header,
};
pub use lines::{LineReader, LineSplitter};
pub use response::{JobOutcome, ResponseLine, ServerMessage, is_valid_job_id};
