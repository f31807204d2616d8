//! Response head assembly and the simple (single-buffer) response path.

use std::io::Write;

use bytes::{BufMut, BytesMut};
use http::StatusCode;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::cors::CorsStyle;
use crate::date::HeaderStamp;
use crate::protocol::SendError;

/// Initial buffer size reserved for a response head
const INIT_HEAD_SIZE: usize = 1024;

/// Default content type when the embedder passes none
pub(crate) const DEFAULT_CONTENT_TYPE: &str = "text/plain";

pub(crate) type BoxWriter = Box<dyn AsyncWrite + Unpin>;

/// How the response body is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    Length(u64),
    Chunked,
}

/// Buffered writer for one connection's responses.
///
/// Owns the transport write half for the connection's lifetime; the active
/// request borrows it exclusively while it is bound, which is what makes the
/// one-write-in-flight discipline a compile-time property.
pub(crate) struct ResponseWriter {
    io: BoxWriter,
    buf: BytesMut,
    stamp: HeaderStamp,
    cors: CorsStyle,
}

impl ResponseWriter {
    pub(crate) fn new(io: BoxWriter, stamp: HeaderStamp, cors: CorsStyle) -> Self {
        Self { io, buf: BytesMut::with_capacity(INIT_HEAD_SIZE), stamp, cors }
    }

    /// Assembles a full response head into the buffer: status line, cached
    /// date/thread stamp, CORS block, content type and framing header.
    pub(crate) fn buffer_head(&mut self, status: StatusCode, content_type: &str, framing: Framing) {
        self.buf.reserve(INIT_HEAD_SIZE);
        let reason = status.canonical_reason().unwrap_or("Unknown");
        // infallible: BufWrite only grows the buffer
        let _ = write!(BufWrite(&mut self.buf), "HTTP/1.1 {} {}\r\n", status.as_str(), reason);

        self.stamp.render_into(&mut self.buf);
        self.cors.render_into(&mut self.buf);

        let _ = write!(BufWrite(&mut self.buf), "Content-Type: {content_type}\r\n");
        match framing {
            Framing::Length(n) => {
                let _ = write!(BufWrite(&mut self.buf), "Content-Length: {n}\r\n");
            }
            Framing::Chunked => self.buf.extend_from_slice(b"Transfer-Encoding: chunked\r\n"),
        }
        self.buf.extend_from_slice(b"\r\n");
    }

    pub(crate) fn buffer_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Pushes everything buffered to the transport and flushes it.
    ///
    /// Resolves only once the bytes are confirmed queued, which is the
    /// completion signal response operations hand back to the embedder.
    pub(crate) async fn flush(&mut self) -> Result<(), SendError> {
        self.io.write_all_buf(&mut self.buf).await.map_err(SendError::io)?;
        self.io.flush().await.map_err(SendError::io)?;
        Ok(())
    }

    /// Fire-and-forget single-buffer response: head and body in one write.
    pub(crate) async fn send_simple(
        &mut self,
        status: StatusCode,
        content_type: &str,
        body: &[u8],
    ) -> Result<(), SendError> {
        self.buffer_head(status, content_type, Framing::Length(body.len() as u64));
        self.buffer_bytes(body);
        self.flush().await
    }
}

impl std::fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWriter").field("buffered", &self.buf.len()).finish()
    }
}

/// Writer over `BytesMut` so `write!` can format straight into the buffer.
struct BufWrite<'a>(&'a mut BytesMut);

impl Write for BufWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer_into(buf_size: usize) -> (ResponseWriter, tokio::io::DuplexStream) {
        let (server, client) = tokio::io::duplex(buf_size);
        (ResponseWriter::new(Box::new(server), HeaderStamp::new(1), CorsStyle::Old), client)
    }

    #[tokio::test]
    async fn simple_response_has_correct_framing() {
        use tokio::io::AsyncReadExt;

        let (mut writer, mut client) = writer_into(4096);
        writer.send_simple(StatusCode::OK, "text/plain", b"hi").await.unwrap();
        drop(writer);

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("Thread-Id: 000001\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[tokio::test]
    async fn empty_body_still_carries_zero_length() {
        use tokio::io::AsyncReadExt;

        let (mut writer, mut client) = writer_into(4096);
        writer.send_simple(StatusCode::NO_CONTENT, "text/plain", b"").await.unwrap();
        drop(writer);

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
