//! `Content-Length` framing for JSON-RPC over stdio.
//!
//! The reader hands back raw bodies so the server can answer a malformed
//! JSON payload with a parse error instead of dropping the connection.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single message body (4 MiB).
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Reads framed message bodies from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    header: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            header: String::new(),
        }
    }

    /// Read the next message body.
    ///
    /// Returns `Ok(None)` when the stream ends between messages.
    pub async fn read_body(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(len) = self.read_content_length().await? else {
            return Ok(None);
        };
        if len > MAX_FRAME_BYTES {
            bail!("message of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit");
        }
        let mut body = vec![0u8; len];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading message body")?;
        Ok(Some(body))
    }

    /// Read the next message and parse it as JSON.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        match self.read_body().await? {
            Some(body) => Ok(Some(
                serde_json::from_slice(&body).context("parsing message body")?,
            )),
            None => Ok(None),
        }
    }

    async fn read_content_length(&mut self) -> Result<Option<usize>> {
        let mut content_length = None;
        let mut started = false;
        loop {
            self.header.clear();
            let read = self
                .reader
                .read_line(&mut self.header)
                .await
                .context("reading message header")?;
            if read == 0 {
                if started {
                    bail!("stream ended inside a message header");
                }
                return Ok(None);
            }
            started = true;

            let line = self.header.trim();
            if line.is_empty() {
                break;
            }
            let Some((name, value)) = line.split_once(':') else {
                tracing::debug!("Ignoring malformed header line: {line}");
                continue;
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                let len = value
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("invalid Content-Length `{}`", value.trim()))?;
                content_length = Some(len);
            }
        }
        content_length
            .map(Some)
            .context("message header has no Content-Length")
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

    pub async fn write_frame<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<()> {
        let body = serde_json::to_vec(message).context("serializing message")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing message header")?;
        self.writer
            .write_all(&body)
            .await
            .context("writing message body")?;
        self.writer.flush().await.context("flushing message")
    }
}
