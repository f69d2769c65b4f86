//! Isolate channel protocol
//!
//! Messages cross the isolate boundary as newline-delimited JSON, one message
//! per line, tagged by a `type` field:
//!
//! ```text
//! -> {"type":"init","basePath":"runtime"}
//! <- {"type":"ready"}
//! -> {"type":"reset"}
//! -> {"type":"run","code":"print 1+1;"}
//! <- {"type":"result","data":{"result":"","output":"2\n","errors":[],"warnings":[]}}
//! ```

use std::io::{BufRead, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::ResultPayload;

/// Largest accepted message line (16 MiB)
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Message sent from the supervisor to the isolate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inbound {
    /// Load the foreign runtime from the given base path.
    ///
    /// Issued once per generation, before any `run`.
    Init {
        #[serde(rename = "basePath", default)]
        base_path: String,
    },

    /// Execute a program
    Run { code: String },

    /// Clear the foreign runtime's global state
    Reset,
}

/// Message sent from the isolate back to the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    /// The runtime finished loading
    Ready,

    /// A program ran to completion
    Result { data: ResultPayload },

    /// Loading or execution failed
    Error { content: String },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message too large: {0} bytes")]
    TooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode a message as a single JSON line, including the trailing newline
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one JSON line (with or without its trailing newline)
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(ProtocolError::TooLarge(line.len()));
    }
    let message = serde_json::from_str(line.trim_end_matches(['\n', '\r']))?;
    Ok(message)
}

/// Write a message to a writer and flush it
pub fn write_message<W: Write, T: Serialize>(
    writer: &mut W,
    message: &T,
) -> Result<(), ProtocolError> {
    let line = encode_line(message)?;
    writer.write_all(line.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Read the next message from a reader
///
/// Returns `Ok(None)` at end of stream. Blank lines are skipped.
pub fn read_message<R: BufRead, T: DeserializeOwned>(
    reader: &mut R,
) -> Result<Option<T>, ProtocolError> {
    loop {
        let mut line = String::new();
        // One byte past the limit so oversized lines are detectable
        let read = reader
            .by_ref()
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        if line.trim().is_empty() {
            continue;
        }
        return decode_line(&line).map(Some);
    }
}

/// Write a message to an async writer and flush it
pub async fn write_message_async<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    message: &T,
) -> Result<(), ProtocolError> {
    let line = encode_line(message)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads messages from an async stream, one line at a time
///
/// A partially read line is kept across calls, so [`next_message`] can be
/// raced in `select!`. No more than [`MAX_LINE_BYTES`] + 1 bytes of a line
/// are ever buffered. After [`ProtocolError::TooLarge`] the stream is out of
/// sync and should be abandoned.
///
/// [`next_message`]: MessageReader::next_message
#[derive(Debug)]
pub struct MessageReader<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
        }
    }

    /// Read the next message
    ///
    /// Returns `Ok(None)` at end of stream. Blank lines are skipped.
    pub async fn next_message<T: DeserializeOwned>(
        &mut self,
    ) -> Result<Option<T>, ProtocolError> {
        loop {
            // Never below one: a longer line has already been rejected
            let budget = (MAX_LINE_BYTES + 1 - self.line.len()) as u64;
            let read = AsyncReadExt::take(&mut self.reader, budget)
                .read_until(b'\n', &mut self.line)
                .await?;

            if self.line.len() > MAX_LINE_BYTES {
                let len = self.line.len();
                self.line.clear();
                return Err(ProtocolError::TooLarge(len));
            }
            if read == 0 && self.line.is_empty() {
                return Ok(None);
            }

            // Either a full line or the unterminated tail of the stream
            let line = std::mem::take(&mut self.line);
            if line.trim_ascii().is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_slice(&line)?));
        }
    }
}
