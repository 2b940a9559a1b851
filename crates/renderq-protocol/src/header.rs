//! Header frame encoding and decoding.
//!
//! The frame is four newline-terminated fields (source file name, render mode,
//! decimal payload size, output format) followed by the sentinel line. The
//! payload starts immediately after the sentinel, so a single network read can
//! carry both the end of the header and the first payload bytes;
//! [`split_header`] hands those bytes back as overflow.

use std::fmt;
use std::io::{self, Write};

use strum::{Display, EnumString};
use thiserror::Error;

/// Literal text of the line terminating the header frame.
pub const SENTINEL: &str = "===END===";

/// Upper bound on the bytes accepted before the sentinel must appear.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

const SENTINEL_LINE: &[u8] = b"===END===\n";

/// Frame range the render engine is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RenderMode {
    /// Render a single frame.
    #[default]
    Image,
    /// Render every frame of the scene.
    Animation,
}

/// Output container requested from the render engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum OutputFormat {
    /// Portable Network Graphics stills.
    #[default]
    Png,
    /// Video encoded through the engine's FFmpeg writer.
    Ffmpeg,
    /// JPEG stills.
    Jpeg,
}

/// Decoded job request preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHeader {
    /// Bare file name the payload is stored under on the server.
    pub file_name: String,
    /// Requested frame range.
    pub mode: RenderMode,
    /// Number of payload bytes following the sentinel.
    pub payload_size: u64,
    /// Requested output format.
    pub format: OutputFormat,
}

/// Reasons a header frame is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    /// Fewer than four fields preceded the sentinel.
    #[error("invalid header format: expected 4 fields, found {found}")]
    MissingFields {
        /// Number of fields that were present.
        found: usize,
    },
    /// Header bytes were not valid UTF-8.
    #[error("invalid header format: header is not valid UTF-8")]
    NotUtf8,
    /// The size field was not a decimal byte count.
    #[error("invalid payload size '{value}'")]
    InvalidSize {
        /// Raw field text.
        value: String,
    },
    /// The render mode field was not recognised.
    #[error("unsupported render mode '{value}'")]
    InvalidMode {
        /// Raw field text.
        value: String,
    },
    /// The output format field was not recognised.
    #[error("unsupported output format '{value}'")]
    InvalidFormat {
        /// Raw field text.
        value: String,
    },
    /// The file name was empty or would escape the job directory.
    #[error("invalid source file name '{value}'")]
    InvalidFileName {
        /// Raw field text.
        value: String,
    },
    /// The connection closed before the sentinel line arrived.
    #[error("client disconnected before sending a complete header")]
    Incomplete,
    /// The sentinel did not appear within [`MAX_HEADER_BYTES`].
    #[error("header exceeds {limit} bytes without a sentinel line")]
    TooLarge {
        /// Enforced limit in bytes.
        limit: usize,
    },
}

impl JobHeader {
    /// Builds a header for the given file name and payload size.
    #[must_use]
    pub fn new(
        file_name: impl Into<String>,
        mode: RenderMode,
        payload_size: u64,
        format: OutputFormat,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mode,
            payload_size,
            format,
        }
    }

    /// Returns the encoded frame, sentinel line included.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Writes the encoded frame to `writer`.
    ///
    /// # Errors
    ///
    /// Returns any error reported by the writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self.encode().as_bytes())
    }

    /// Parses the header text that preceded the sentinel.
    ///
    /// Surrounding whitespace is ignored and fields beyond the fourth are
    /// discarded.
    ///
    /// # Errors
    ///
    /// Returns a [`HeaderError`] describing the first field that failed
    /// validation.
    pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
        let text = std::str::from_utf8(bytes).map_err(|_| HeaderError::NotUtf8)?;
        let trimmed = text.trim();
        let fields: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('\n').map(str::trim).collect()
        };
        let [name, mode, size, format, ..] = fields.as_slice() else {
            return Err(HeaderError::MissingFields {
                found: fields.len(),
            });
        };

        Ok(Self {
            file_name: parse_file_name(name)?,
            mode: mode.parse().map_err(|_| HeaderError::InvalidMode {
                value: (*mode).to_owned(),
            })?,
            payload_size: size.parse().map_err(|_| HeaderError::InvalidSize {
                value: (*size).to_owned(),
            })?,
            format: format.parse().map_err(|_| HeaderError::InvalidFormat {
                value: (*format).to_owned(),
            })?,
        })
    }
}

impl fmt::Display for JobHeader {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(formatter, "{}", self.file_name)?;
        writeln!(formatter, "{}", self.mode)?;
        writeln!(formatter, "{}", self.payload_size)?;
        writeln!(formatter, "{}", self.format)?;
        writeln!(formatter, "{SENTINEL}")
    }
}

fn parse_file_name(value: &str) -> Result<String, HeaderError> {
    let escapes = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if escapes {
        return Err(HeaderError::InvalidFileName {
            value: value.to_owned(),
        });
    }
    Ok(value.to_owned())
}

/// Splits `buffer` at the first sentinel line.
///
/// Returns the header bytes preceding the sentinel and the bytes following it,
/// which belong to the payload. Returns `None` while the sentinel has not been
/// received in full.
#[must_use]
pub fn split_header(buffer: &[u8]) -> Option<(&[u8], &[u8])> {
    let start = find_sentinel(buffer)?;
    let (head, rest) = buffer.split_at(start);
    let overflow = rest.get(SENTINEL_LINE.len()..)?;
    Some((head, overflow))
}

fn find_sentinel(buffer: &[u8]) -> Option<usize> {
    if buffer.starts_with(SENTINEL_LINE) {
        return Some(0);
    }
    buffer
        .windows(SENTINEL_LINE.len() + 1)
        .position(|window| {
            window.first() == Some(&b'\n') && window.get(1..) == Some(SENTINEL_LINE)
        })
        .map(|newline| newline + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(JobHeader::new("movie.blend", RenderMode::Image, 1024, OutputFormat::Png))]
    #[case(JobHeader::new("shot 01.blend", RenderMode::Animation, 0, OutputFormat::Ffmpeg))]
    #[case(JobHeader::new("a.blend", RenderMode::Image, u64::MAX, OutputFormat::Jpeg))]
    fn encoded_header_parses_back(#[case] header: JobHeader) {
        let encoded = header.encode();
        let (head, overflow) = split_header(encoded.as_bytes()).expect("sentinel present");
        assert!(overflow.is_empty());
        assert_eq!(JobHeader::parse(head).expect("parse header"), header);
    }

    #[test]
    fn encodes_fields_in_wire_order() {
        let header = JobHeader::new("movie.blend", RenderMode::Image, 1024, OutputFormat::Png);
        assert_eq!(header.encode(), "movie.blend\nimage\n1024\nPNG\n===END===\n");
    }

    #[test]
    fn overflow_keeps_payload_bytes_from_the_same_read() {
        let buffer = b"movie.blend\nimage\n4\nPNG\n===END===\nabcd";
        let (head, overflow) = split_header(buffer).expect("sentinel present");
        assert_eq!(overflow, b"abcd");
        assert_eq!(
            JobHeader::parse(head).expect("parse header").payload_size,
            4
        );
    }

    #[test]
    fn splits_on_first_sentinel_only() {
        let buffer = b"a.blend\nimage\n10\nPNG\n===END===\n===END===\nxx";
        let (_, overflow) = split_header(buffer).expect("sentinel present");
        assert_eq!(overflow, b"===END===\nxx");
    }

    #[test]
    fn partial_sentinel_is_not_split() {
        assert!(split_header(b"a.blend\nimage\n10\nPNG\n===END==").is_none());
        assert!(split_header(b"a.blend\nimage\n10\nPNG\nfoo===END===\n").is_none());
    }

    #[test]
    fn format_is_case_normalised() {
        let header = JobHeader::parse(b"a.blend\nanimation\n3\nffmpeg\n").expect("parse header");
        assert_eq!(header.format, OutputFormat::Ffmpeg);
        assert!(header.encode().contains("\nFFMPEG\n"));
    }

    #[rstest]
    #[case(b"".as_slice(), HeaderError::MissingFields { found: 0 })]
    #[case(b"a.blend\nimage\n12\n".as_slice(), HeaderError::MissingFields { found: 3 })]
    #[case(b"a.blend\nimage\ntwelve\nPNG\n".as_slice(), HeaderError::InvalidSize { value: "twelve".to_owned() })]
    #[case(b"a.blend\nstill\n12\nPNG\n".as_slice(), HeaderError::InvalidMode { value: "still".to_owned() })]
    #[case(b"a.blend\nimage\n12\nTIFF\n".as_slice(), HeaderError::InvalidFormat { value: "TIFF".to_owned() })]
    #[case(b"../a.blend\nimage\n12\nPNG\n".as_slice(), HeaderError::InvalidFileName { value: "../a.blend".to_owned() })]
    #[case(b"..\nimage\n12\nPNG\n".as_slice(), HeaderError::InvalidFileName { value: "..".to_owned() })]
    #[case(b"\xff\xfe\nimage\n12\nPNG\n".as_slice(), HeaderError::NotUtf8)]
    fn rejects_malformed_headers(#[case] bytes: &[u8], #[case] expected: HeaderError) {
        assert_eq!(JobHeader::parse(bytes), Err(expected));
    }

    #[test]
    fn malformed_header_message_names_the_condition() {
        let error = JobHeader::parse(b"only-one-field\n").expect_err("should fail");
        assert_eq!(
            error.to_string(),
            "invalid header format: expected 4 fields, found 1"
        );
    }
}
