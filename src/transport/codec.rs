//! `Content-Length` framing for JSON-RPC messages.
//!
//! Each frame is a header block terminated by an empty line followed by exactly
//! `Content-Length` bytes of UTF-8 JSON. Framing errors are fatal for the stream
//! (the reader cannot resynchronize), while a body that is not valid JSON is
//! returned as raw bytes and reported by the connection as a parse error.

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error on transport: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected end of stream while reading headers")]
    UnexpectedEof,

    #[error("missing Content-Length header")]
    MissingContentLength,

    #[error("invalid Content-Length value: {0}")]
    InvalidContentLength(String),

    #[error("Content-Length {0} exceeds maximum {max}", max = MAX_FRAME_BYTES)]
    FrameTooLarge(usize),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Reads framed message bodies from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Reads the next frame body.
    ///
    /// Returns `Ok(None)` on a clean EOF between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        if content_length > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge(content_length));
        }

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await?;
        Ok(Some(body))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>, CodecError> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(CodecError::UnexpectedEof);
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some((key, value)) = trimmed.split_once(':') {
                if key.trim().eq_ignore_ascii_case("Content-Length") {
                    let value = value.trim();
                    let len = value
                        .parse::<usize>()
                        .map_err(|_| CodecError::InvalidContentLength(value.to_string()))?;
                    content_length = Some(len);
                }
            }
            // Content-Type and unknown headers are ignored
        }

        content_length
            .map(Some)
            .ok_or(CodecError::MissingContentLength)
    }
}

/// Writes framed messages to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, body: &[u8]) -> Result<(), CodecError> {
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn write_message(&mut self, message: &Value) -> Result<(), CodecError> {
        let body = serde_json::to_vec(message)?;
        self.write_frame(&body).await
    }
}
