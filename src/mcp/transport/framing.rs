//! Message framing for the stdio transport.
//!
//! Two framings are accepted, detected independently for every message by
//! looking at its first non-blank line:
//!
//! - **Line**: the line starts with `{` and is one complete JSON message.
//! - **Header**: `Key: Value` lines up to a blank line, with a mandatory
//!   `Content-Length: N`, followed by exactly `N` bytes of JSON.
//!
//! Outbound messages are always written in line form.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::FrameError;

/// Largest header-form body accepted. Larger bodies are skipped.
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// The framing of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One JSON object per line.
    Line,
    /// `Content-Length` headers followed by a raw body.
    Header,
}

impl Framing {
    /// Selects the framing from the first non-blank line of a message.
    #[must_use]
    pub fn detect(first_line: &[u8]) -> Self {
        if trim_ascii(first_line).first() == Some(&b'{') {
            Self::Line
        } else {
            Self::Header
        }
    }
}

/// Splits a `Key: Value` header line. Lines without a colon yield `None`.
#[must_use]
pub fn parse_header(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    Some((name.trim(), value.trim()))
}

/// Finds and parses the `Content-Length` header. The name is matched
/// case-insensitively; the last occurrence wins.
///
/// # Errors
///
/// Returns [`FrameError::MissingContentLength`] if no such header is present
/// and [`FrameError::InvalidContentLength`] if its value is not a byte count.
pub fn content_length<'a, I>(headers: I) -> Result<usize, FrameError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let value = headers
        .into_iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| value)
        .last()
        .ok_or(FrameError::MissingContentLength)?;

    value
        .parse::<usize>()
        .map_err(|_| FrameError::InvalidContentLength(value.to_string()))
}

/// Reads framed messages from a buffered byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    max_frame: usize,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Creates a reader with the default size cap.
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            max_frame: MAX_FRAME_SIZE,
        }
    }

    /// Overrides the header-form size cap.
    #[must_use]
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Reads the next message and returns its raw JSON bytes.
    ///
    /// Blank lines between messages are skipped. After a framing error the
    /// reader is positioned at the start of the next message whenever the
    /// header block was complete.
    ///
    /// # Errors
    ///
    /// - [`FrameError::Eof`] if the stream ends before a message starts
    /// - [`FrameError::Truncated`] if it ends inside a message
    /// - [`FrameError::MissingContentLength`], [`FrameError::InvalidContentLength`]
    ///   or [`FrameError::TooLarge`] for malformed header blocks
    /// - [`FrameError::Io`] for any other read failure
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, FrameError> {
        let first = loop {
            let mut line = Vec::new();
            if self.read_line(&mut line).await? == 0 {
                return Err(FrameError::Eof);
            }
            if !trim_ascii(&line).is_empty() {
                break line;
            }
        };

        match Framing::detect(&first) {
            Framing::Line => Ok(trim_ascii(&first).to_vec()),
            Framing::Header => self.read_header_frame(first).await,
        }
    }

    async fn read_header_frame(&mut self, first: Vec<u8>) -> Result<Vec<u8>, FrameError> {
        let mut lines = vec![String::from_utf8_lossy(trim_ascii(&first)).into_owned()];
        loop {
            let mut line = Vec::new();
            if self.read_line(&mut line).await? == 0 {
                return Err(FrameError::Truncated);
            }
            let line = trim_ascii(&line);
            if line.is_empty() {
                break;
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
        }

        let length = content_length(lines.iter().map(String::as_str).filter_map(parse_header))?;

        if length > self.max_frame {
            let skipped = tokio::io::copy(
                &mut (&mut self.reader).take(length as u64),
                &mut tokio::io::sink(),
            )
            .await
            .map_err(FrameError::Io)?;
            if skipped < length as u64 {
                return Err(FrameError::Truncated);
            }
            return Err(FrameError::TooLarge {
                length,
                limit: self.max_frame,
            });
        }

        let mut body = vec![0; length];
        self.reader.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FrameError::Truncated
            } else {
                FrameError::Io(e)
            }
        })?;
        Ok(body)
    }

    async fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<usize, FrameError> {
        self.reader
            .read_until(b'\n', buf)
            .await
            .map_err(FrameError::Io)
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol;
    use tokio::io::BufReader;

    fn reader(input: &[u8]) -> FrameReader<&[u8]> {
        FrameReader::new(input)
    }

    #[test]
    fn detect_framing() {
        assert_eq!(Framing::detect(b"{\"a\":1}\n"), Framing::Line);
        assert_eq!(Framing::detect(b"  {\"a\":1}"), Framing::Line);
        assert_eq!(Framing::detect(b"Content-Length: 5\r\n"), Framing::Header);
    }

    #[test]
    fn header_lines() {
        assert_eq!(
            parse_header("Content-Length:  42 "),
            Some(("Content-Length", "42"))
        );
        assert_eq!(parse_header("no colon here"), None);
    }

    #[test]
    fn content_length_is_case_insensitive() {
        let headers = [("content-type", "application/json"), ("CONTENT-LENGTH", "17")];
        assert_eq!(content_length(headers).unwrap(), 17);
    }

    #[test]
    fn content_length_errors() {
        assert!(matches!(
            content_length([("Content-Type", "x")]),
            Err(FrameError::MissingContentLength)
        ));
        assert!(matches!(
            content_length([("Content-Length", "-3")]),
            Err(FrameError::InvalidContentLength(_))
        ));
    }

    #[tokio::test]
    async fn read_line_frame() {
        let mut frames = reader(b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":1}\n");
        let frame = frames.read_frame().await.unwrap();
        assert_eq!(frame, br#"{"jsonrpc":"2.0","method":"ping","id":1}"#);
        assert!(matches!(frames.read_frame().await, Err(FrameError::Eof)));
    }

    #[tokio::test]
    async fn header_frame_matches_line_frame() {
        let body = br#"{"jsonrpc":"2.0","method":"initialize","id":1}"#;
        let mut input = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        input.extend_from_slice(body);
        input.push(b'\n');
        input.extend_from_slice(body);
        input.push(b'\n');

        let mut frames = reader(&input);
        let from_headers = frames.read_frame().await.unwrap();
        let from_line = frames.read_frame().await.unwrap();

        assert_eq!(from_headers, from_line);
        assert_eq!(
            protocol::decode(&from_headers).unwrap(),
            protocol::decode(&from_line).unwrap()
        );
    }

    #[tokio::test]
    async fn header_frame_needs_no_trailing_delimiter() {
        let input = b"Content-Type: application/json\r\nContent-Length: 2\r\n\r\n{}{\"a\":1}\n";
        let mut frames = reader(input);
        assert_eq!(frames.read_frame().await.unwrap(), b"{}");
        assert_eq!(frames.read_frame().await.unwrap(), b"{\"a\":1}");
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let mut frames = reader(b"\n\r\n   \n{}\n");
        assert_eq!(frames.read_frame().await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn missing_length_resyncs_at_next_message() {
        let mut frames = reader(b"Content-Type: json\r\n\r\n{\"next\":true}\n");
        assert!(matches!(
            frames.read_frame().await,
            Err(FrameError::MissingContentLength)
        ));
        assert_eq!(frames.read_frame().await.unwrap(), b"{\"next\":true}");
    }

    #[tokio::test]
    async fn truncated_body() {
        let mut frames = reader(b"Content-Length: 100\r\n\r\n{\"short\":1}");
        assert!(matches!(frames.read_frame().await, Err(FrameError::Truncated)));
    }

    #[tokio::test]
    async fn truncated_headers() {
        let mut frames = reader(b"Content-Length: 10\r\n");
        assert!(matches!(frames.read_frame().await, Err(FrameError::Truncated)));
    }

    #[tokio::test]
    async fn oversized_frame_is_skipped() {
        let mut input = b"Content-Length: 8\r\n\r\n".to_vec();
        input.extend_from_slice(b"{\"x\":12}");
        input.extend_from_slice(b"{}\n");

        let mut frames = reader(&input).with_max_frame(4);
        assert!(matches!(
            frames.read_frame().await,
            Err(FrameError::TooLarge { length: 8, limit: 4 })
        ));
        assert_eq!(frames.read_frame().await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn frames_split_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"Content-Le")
            .read(b"ngth: 7\r\n")
            .read(b"\r\n{\"a\"")
            .read(b":1}")
            .read(b"{\"b\":2}\n")
            .build();

        let mut frames = FrameReader::new(BufReader::new(mock));
        assert_eq!(frames.read_frame().await.unwrap(), b"{\"a\":1}");
        assert_eq!(frames.read_frame().await.unwrap(), b"{\"b\":2}");
        assert!(matches!(frames.read_frame().await, Err(FrameError::Eof)));
    }

    #[test]
    fn trim_ascii_edges() {
        assert_eq!(trim_ascii(b"  {} \r\n"), b"{}");
        assert_eq!(trim_ascii(b" \r\n"), b"");
        assert_eq!(trim_ascii(b""), b"");
    }
}
