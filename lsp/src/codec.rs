//! JSON-RPC framing for the language-server transport.
//!
//! Messages travel as `Content-Length: N\r\n\r\n{json}` over stdin/stdout.
//! [`FrameReader`] and [`FrameWriter`] move whole JSON values across that
//! framing; [`Incoming::classify`] sorts a decoded frame into request,
//! notification or response.

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Largest body accepted from the client (4 MiB).
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Reads framed JSON values.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Next frame, or `Ok(None)` if the stream ended cleanly between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Value>> {
        let Some(length) = self.read_headers().await? else {
            return Ok(None);
        };
        if length > MAX_FRAME_BYTES {
            bail!("Content-Length {length} exceeds maximum {MAX_FRAME_BYTES}");
        }

        let mut body = vec![0u8; length];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;

        serde_json::from_slice(&body)
            .map(Some)
            .context("parsing JSON-RPC frame")
    }

    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut length = None;
        let mut line = String::new();
        let mut started = false;

        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header line")?;
            if read == 0 {
                if started {
                    bail!("unexpected EOF while reading headers");
                }
                return Ok(None);
            }
            started = true;

            let header = line.trim();
            if header.is_empty() {
                break;
            }
            let Some((name, value)) = header.split_once(':') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                let parsed = value
                    .trim()
                    .parse::<usize>()
                    .context("invalid Content-Length value")?;
                length = Some(parsed);
            }
        }

        match length {
            Some(length) => Ok(Some(length)),
            None => bail!("missing Content-Length header"),
        }
    }
}

/// Writes framed JSON values.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, message: &Value) -> Result<()> {
        let body = serde_json::to_vec(message).context("serializing JSON-RPC frame")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(&body)
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")
    }
}

/// A decoded frame sorted by JSON-RPC role.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Client-to-server call expecting a response.
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// Reply to a request this server sent. Only numeric ids are ours.
    Response { id: u64, body: Value },
}

impl Incoming {
    /// `None` for frames that fit no role (e.g. an id with neither method nor
    /// result). Missing params become `Value::Null`.
    #[must_use]
    pub fn classify(frame: &Value) -> Option<Self> {
        let id = frame.get("id").filter(|id| !id.is_null());
        let method = frame.get("method").and_then(Value::as_str);
        let params = frame.get("params").cloned().unwrap_or(Value::Null);
        let is_reply = frame.get("result").is_some() || frame.get("error").is_some();

        match (id, method) {
            (Some(id), Some(method)) => Some(Self::Request {
                id: id.clone(),
                method: method.to_string(),
                params,
            }),
            (None, Some(method)) => Some(Self::Notification {
                method: method.to_string(),
                params,
            }),
            (Some(id), None) if is_reply => Some(Self::Response {
                id: id.as_u64()?,
                body: frame.clone(),
            }),
            _ => None,
        }
    }
}
