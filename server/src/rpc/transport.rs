//! Line-delimited transport
//!
//! Generic over the byte streams so the server can be driven from stdio or
//! from in-memory pipes.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::JsonRpcResponse;

/// Default upper bound for one input line
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// One line of input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    /// Non-blank text, trimmed
    Text(String),
    /// A line that cannot be a request: too long or not UTF-8
    Rejected(String),
}

/// Reads non-blank lines of at most `max_line_bytes` bytes
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_line_bytes: usize,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_limit(inner: R, max_line_bytes: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// Next non-blank line. `None` at EOF.
    ///
    /// Bytes past the limit are discarded up to the next newline, so an
    /// oversized line never grows the buffer beyond `max_line_bytes`.
    pub async fn next_line(&mut self) -> io::Result<Option<InputLine>> {
        loop {
            self.buf.clear();
            let mut read_any = false;
            let mut oversized = false;

            loop {
                let available = self.inner.fill_buf().await?;
                if available.is_empty() {
                    break; // EOF
                }
                read_any = true;
                let (chunk, complete) = match available.iter().position(|&b| b == b'\n') {
                    Some(end) => (&available[..end], true),
                    None => (available, false),
                };
                if !oversized {
                    if self.buf.len() + chunk.len() > self.max_line_bytes {
                        oversized = true;
                        self.buf.clear();
                    } else {
                        self.buf.extend_from_slice(chunk);
                    }
                }
                let used = chunk.len() + usize::from(complete);
                self.inner.consume(used);
                if complete {
                    break;
                }
            }

            if !read_any {
                return Ok(None);
            }
            if oversized {
                return Ok(Some(InputLine::Rejected(format!(
                    "Line exceeds {} bytes",
                    self.max_line_bytes
                ))));
            }
            match std::str::from_utf8(&self.buf) {
                Ok(text) => {
                    let line = text.trim();
                    if !line.is_empty() {
                        return Ok(Some(InputLine::Text(line.to_string())));
                    }
                }
                Err(e) => {
                    return Ok(Some(InputLine::Rejected(format!(
                        "Input is not valid UTF-8: {}",
                        e
                    ))));
                }
            }
        }
    }
}

/// Writes one response per line
pub struct LineWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_response(&mut self, response: &JsonRpcResponse) -> io::Result<()> {
        let json = serde_json::to_string(response)?;
        self.inner.write_all(json.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await
    }
}
