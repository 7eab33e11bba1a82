//! Framed newline-delimited JSON over the subprocess pipes.
//!
//! The CLI writes one JSON object per line, but pipe buffering can hand the
//! reader anything from a fragment of one object to several objects glued
//! together. The reader therefore keeps a carry buffer: complete lines parse
//! directly, concatenated objects are separated by brace scanning outside
//! string literals, and net-open fragments wait for their continuation.

use serde_json::Value;
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SdkError;

/// Default cap on buffered, not-yet-parsed bytes.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 8 * 1024 * 1024;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Reads framed JSON values from a byte stream.
pub struct FramedReader<R> {
    reader: R,
    pending: Vec<u8>,
    carry: String,
    queued: VecDeque<Value>,
    eof: bool,
    max_buffer_size: usize,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    /// Wraps a reader with the default buffer cap.
    pub fn new(reader: R) -> Self {
        Self::with_max_buffer(reader, DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Wraps a reader with an explicit buffer cap.
    pub fn with_max_buffer(reader: R, max_buffer_size: usize) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            carry: String::new(),
            queued: VecDeque::new(),
            eof: false,
            max_buffer_size,
        }
    }

    /// Yields the next JSON value, or `None` at end of stream.
    ///
    /// A malformed segment returns a [`SdkError::Decode`] carrying the
    /// offending text; the reader stays usable and subsequent valid lines
    /// still parse.
    pub async fn next_value(&mut self) -> Result<Option<Value>, SdkError> {
        loop {
            if let Some(value) = self.queued.pop_front() {
                return Ok(Some(value));
            }

            if self.eof {
                if self.carry.trim().is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.carry);
                return match serde_json::from_str::<Value>(line.trim()) {
                    Ok(value) => Ok(Some(value)),
                    Err(source) => Err(SdkError::Decode { line, source }),
                };
            }

            self.fill().await?;
            self.drain_lines()?;
        }
    }

    async fn fill(&mut self) -> Result<(), SdkError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let n = self.reader.read(&mut chunk).await?;
        if n == 0 {
            self.eof = true;
            // The terminal fragment may lack its newline; treat it as a line.
            if !self.pending.is_empty() {
                let rest = std::mem::take(&mut self.pending);
                self.process_line(&decode_utf8(rest)?)?;
            }
            return Ok(());
        }
        self.pending.extend_from_slice(&chunk[..n]);
        if self.pending.len() + self.carry.len() > self.max_buffer_size {
            let line = preview(&self.pending);
            self.pending.clear();
            self.carry.clear();
            return Err(decode_error(line, "buffered data exceeded the size cap"));
        }
        Ok(())
    }

    fn drain_lines(&mut self) -> Result<(), SdkError> {
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut segment: Vec<u8> = self.pending.drain(..=pos).collect();
            segment.pop();
            self.process_line(&decode_utf8(segment)?)?;
        }
        Ok(())
    }

    fn process_line(&mut self, line: &str) -> Result<(), SdkError> {
        let line = line.trim();
        if line.is_empty() && self.carry.is_empty() {
            return Ok(());
        }

        let joined = if self.carry.is_empty() {
            line.to_string()
        } else {
            let mut joined = std::mem::take(&mut self.carry);
            joined.push_str(line);
            joined
        };

        if let Ok(value) = serde_json::from_str::<Value>(&joined) {
            self.queued.push_back(value);
            return Ok(());
        }

        // Not a single complete value. Either several objects share the
        // segment, or the object continues on a later line.
        if joined.starts_with('{') {
            return self.scan_objects(joined);
        }
        if net_open(&joined) > 0 {
            self.carry = joined;
            return Ok(());
        }
        if joined.starts_with('[') {
            return match serde_json::from_str::<Value>(&joined) {
                Ok(value) => {
                    self.queued.push_back(value);
                    Ok(())
                }
                Err(source) => Err(SdkError::Decode {
                    line: joined,
                    source,
                }),
            };
        }
        // Free-form diagnostic text on stdout; not part of the protocol.
        tracing::debug!(line = %preview(joined.as_bytes()), "skipping non-JSON line");
        Ok(())
    }

    /// Splits a segment holding one or more top-level objects, queueing each
    /// complete one and carrying a trailing incomplete object.
    fn scan_objects(&mut self, segment: String) -> Result<(), SdkError> {
        let mut rest = segment.as_str();
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                return Ok(());
            }
            match balanced_object_end(rest) {
                Some(end) => {
                    let (candidate, remainder) = rest.split_at(end);
                    match serde_json::from_str::<Value>(candidate) {
                        Ok(value) => {
                            self.queued.push_back(value);
                            rest = remainder;
                        }
                        Err(source) => {
                            return Err(SdkError::Decode {
                                line: candidate.to_string(),
                                source,
                            });
                        }
                    }
                }
                None => {
                    // Net-open: wait for the continuation.
                    self.carry = rest.to_string();
                    return Ok(());
                }
            }
        }
    }
}

/// Byte offset one past the closing brace of the object starting at the
/// beginning of `text`, or `None` if the object is still open. Braces inside
/// string literals (with backslash escapes) do not count.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, byte) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Net count of open braces and brackets outside string literals.
fn net_open(text: &str) -> i64 {
    let mut net = 0i64;
    let mut in_string = false;
    let mut escaped = false;
    for byte in text.bytes() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => net += 1,
            b'}' | b']' => net -= 1,
            _ => {}
        }
    }
    net
}

fn decode_utf8(bytes: Vec<u8>) -> Result<String, SdkError> {
    String::from_utf8(bytes).map_err(|err| {
        let line = preview(err.as_bytes());
        decode_error(line, "channel data is not valid UTF-8")
    })
}

fn decode_error(line: String, message: &str) -> SdkError {
    SdkError::Decode {
        line,
        source: serde::de::Error::custom(message),
    }
}

fn preview(bytes: &[u8]) -> String {
    const PREVIEW_LEN: usize = 200;
    let text = String::from_utf8_lossy(bytes);
    text.chars().take(PREVIEW_LEN).collect()
}

/// Serializes one envelope and appends the line feed.
///
/// Callers funnel through a single writer task, which is what makes each
/// envelope's bytes atomic on the pipe.
pub async fn write_value<W: AsyncWrite + Unpin>(
    writer: &mut W,
    value: &Value,
) -> Result<(), SdkError> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
