// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Line framing for IPC messages.
//!
//! Each message is a single JSON object followed by `\n`. Readers skip blank
//! lines and log-and-drop lines that fail to decode, so a bot that writes a
//! stray `println!` to stdout cannot take down its own control channel.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::warn;

/// Maximum accepted line length (64 KB).
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Errors that can occur while encoding or decoding IPC lines.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("line too long: {0} bytes (max: {MAX_LINE_LEN})")]
    LineTooLong(usize),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode a message as a single newline-terminated line.
pub fn encode_line<M: Serialize>(msg: &M) -> Result<String, ProtocolError> {
    // serde_json never emits raw newlines for compact output
    let mut line = serde_json::to_string(msg)?;
    if line.len() > MAX_LINE_LEN {
        return Err(ProtocolError::LineTooLong(line.len()));
    }
    line.push('\n');
    Ok(line)
}

/// Decode a single line (with or without the trailing newline).
pub fn decode_line<M: DeserializeOwned>(line: &str) -> Result<M, ProtocolError> {
    let trimmed = line.trim_end_matches(['\n', '\r']);
    if trimmed.len() > MAX_LINE_LEN {
        return Err(ProtocolError::LineTooLong(trimmed.len()));
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Reads messages from an async byte stream, one per line.
///
/// At most `MAX_LINE_LEN` bytes of a line are buffered; the rest of an
/// oversized line is read and discarded.
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wrap a reader.
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Read the next decodable message.
    ///
    /// Returns `Ok(None)` at end of stream. Blank, oversized, non-UTF-8 and
    /// malformed lines are skipped.
    pub async fn next<M: DeserializeOwned>(&mut self) -> Result<Option<M>, ProtocolError> {
        loop {
            let Some(len) = self.read_line().await? else {
                return Ok(None);
            };
            if len > self.buf.len() {
                warn!(len, "Dropping oversized IPC line");
                continue;
            }
            let line = match std::str::from_utf8(&self.buf) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, len, "Dropping non-UTF-8 IPC line");
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match decode_line(line) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    warn!(error = %e, len, "Dropping undecodable IPC line");
                }
            }
        }
    }

    /// Read one line into `buf`, keeping at most the limit plus a CRLF.
    ///
    /// Returns the full length of the line as read from the stream, or
    /// `None` at end of stream.
    async fn read_line(&mut self) -> std::io::Result<Option<usize>> {
        let cap = MAX_LINE_LEN + 2;
        self.buf.clear();
        let mut total = 0;
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok((total > 0).then_some(total));
            }
            let (chunk, done) = match available.iter().position(|b| *b == b'\n') {
                Some(i) => (&available[..=i], true),
                None => (available, false),
            };
            let room = cap.saturating_sub(self.buf.len());
            self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            let used = chunk.len();
            total += used;
            self.inner.consume(used);
            if done {
                return Ok(Some(total));
            }
        }
    }
}

/// Writes messages to an async byte stream, one per line.
pub struct LineWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    /// Encode, write and flush a single message.
    pub async fn send<M: Serialize>(&mut self, msg: &M) -> Result<(), ProtocolError> {
        let line = encode_line(msg)?;
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }
}
