//! The active request handed to embedder callbacks.
//!
//! A [`Request`] binds a pooled core to one parsed message on one connection.
//! It exclusively owns the connection's response writer for its lifetime, so
//! response operations take `&mut self` and at most one write can be in flight
//! at a time. Every async response operation resolves once its bytes are
//! confirmed queued to the transport; awaiting it is the signal that the next
//! operation may be issued.

use std::any::Any;
use std::borrow::Cow;
use std::rc::Rc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};
use serde::de::DeserializeOwned;

use crate::chunked::{self, ChunkState};
use crate::pool::RequestCore;
use crate::protocol::{Outcome, ParseError, RequestHeader, SendError};
use crate::response::{DEFAULT_CONTENT_TYPE, Framing, ResponseWriter};

/// One in-flight request, bound to a pooled core and a connection's writer.
#[derive(Debug)]
pub struct Request<T> {
    core: Box<RequestCore>,
    header: RequestHeader,
    writer: ResponseWriter,
    thread_data: Rc<T>,
    chunk: Bytes,
    chunk_state: ChunkState,
    responded: bool,
}

impl<T> Request<T> {
    pub(crate) fn new(
        core: Box<RequestCore>,
        header: RequestHeader,
        writer: ResponseWriter,
        thread_data: Rc<T>,
    ) -> Self {
        Self {
            core,
            header,
            writer,
            thread_data,
            chunk: Bytes::new(),
            chunk_state: ChunkState::NotStarted,
            responded: false,
        }
    }

    /// Stable id of the pooled core serving this request.
    pub fn id(&self) -> usize {
        self.core.id()
    }

    pub fn method(&self) -> &Method {
        self.header.method()
    }

    /// Raw request path, percent-encoding untouched.
    pub fn path(&self) -> &str {
        self.header.uri().path()
    }

    /// Request path with percent-escapes decoded.
    pub fn decoded_path(&self) -> Cow<'_, str> {
        percent_decode(self.path())
    }

    pub fn query(&self) -> Option<&str> {
        self.header.uri().query()
    }

    pub fn version(&self) -> Version {
        self.header.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.header.headers()
    }

    /// The worker's shared thread data.
    pub fn thread_data(&self) -> &T {
        &self.thread_data
    }

    /// Attaches free-form per-request data; survives until release.
    pub fn set_user_data<U: Any>(&mut self, value: U) {
        self.core.user_data = Some(Box::new(value));
    }

    pub fn user_data<U: Any>(&self) -> Option<&U> {
        self.core.user_data.as_deref().and_then(|d| d.downcast_ref())
    }

    pub fn user_data_mut<U: Any>(&mut self) -> Option<&mut U> {
        self.core.user_data.as_deref_mut().and_then(|d| d.downcast_mut())
    }

    pub fn outcome(&self) -> Outcome {
        self.core.outcome
    }

    pub(crate) fn set_outcome(&mut self, outcome: Outcome) {
        self.core.outcome = outcome;
    }

    /// The body fragment delivered to the current `on_chunk` call.
    pub fn chunk(&self) -> &[u8] {
        &self.chunk
    }

    /// All body bytes accumulated so far in the request arena.
    pub fn body(&self) -> &[u8] {
        &self.core.arena
    }

    /// Deserializes the accumulated body as JSON.
    pub fn json_body<D: DeserializeOwned>(&self) -> Result<D, ParseError> {
        serde_json::from_slice(self.body()).map_err(ParseError::invalid_body)
    }

    pub(crate) fn append_chunk(&mut self, bytes: Bytes) {
        self.core.arena.extend_from_slice(&bytes);
        self.chunk = bytes;
    }

    /// Sends a complete single-buffer response.
    ///
    /// `status` defaults to 200 and `content_type` to `text/plain`. The future
    /// resolves once the full response is queued to the transport. Errors if a
    /// response was already sent or a chunked response was started.
    pub async fn write_simple_response(
        &mut self,
        status: Option<StatusCode>,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<(), SendError> {
        if self.responded || self.chunk_state != ChunkState::NotStarted {
            return Err(SendError::invalid_state("response already in progress"));
        }
        let status = status.unwrap_or(StatusCode::OK);
        let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);
        self.writer.send_simple(status, content_type, body).await?;
        self.responded = true;
        Ok(())
    }

    /// Starts a chunked response: queues the status line, headers and
    /// `Transfer-Encoding: chunked`. Resolves once the head is queued.
    pub async fn start_chunked(&mut self, content_type: Option<&str>) -> Result<(), SendError> {
        if self.responded || self.chunk_state != ChunkState::NotStarted {
            return Err(SendError::invalid_state("response already in progress"));
        }
        let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);
        self.writer.buffer_head(StatusCode::OK, content_type, Framing::Chunked);
        self.writer.flush().await?;
        self.chunk_state = ChunkState::HeadersSent;
        Ok(())
    }

    /// Queues one data chunk. Resolves once the chunk is queued, which is the
    /// signal that the next chunk may be issued. An empty body is a no-op so
    /// it cannot terminate the stream early.
    pub async fn send_chunk(&mut self, body: &[u8]) -> Result<(), SendError> {
        self.send_chunk_two_part(body, &[]).await
    }

    /// Queues one chunk assembled from two parts without copying them into a
    /// single buffer first. Both parts share one chunk frame.
    pub async fn send_chunk_two_part(&mut self, head: &[u8], tail: &[u8]) -> Result<(), SendError> {
        chunked::ensure_state(self.chunk_state, "send_chunk")?;
        if head.is_empty() && tail.is_empty() {
            return Ok(());
        }
        chunked::frame_chunk(self.writer.buffer_mut(), &[head, tail]);
        self.writer.flush().await?;
        self.chunk_state = ChunkState::Streaming;
        Ok(())
    }

    /// Queues the terminating zero-length chunk and completes the response.
    pub async fn finish_chunked(&mut self) -> Result<(), SendError> {
        chunked::ensure_state(self.chunk_state, "finish_chunked")?;
        chunked::frame_eof(self.writer.buffer_mut());
        self.writer.flush().await?;
        self.chunk_state = ChunkState::Finished;
        self.responded = true;
        Ok(())
    }

    pub(crate) fn has_responded(&self) -> bool {
        self.responded
    }

    pub(crate) fn mark_responded(&mut self) {
        self.responded = true;
    }

    pub(crate) fn chunk_state(&self) -> ChunkState {
        self.chunk_state
    }

    pub(crate) fn writer_mut(&mut self) -> &mut ResponseWriter {
        &mut self.writer
    }

    /// Unbinds the request, handing the core back for release and the writer
    /// back to the connection.
    pub(crate) fn into_parts(self) -> (Box<RequestCore>, ResponseWriter) {
        (self.core, self.writer)
    }
}

fn percent_decode(raw: &str) -> Cow<'_, str> {
    if !raw.contains('%') {
        return Cow::Borrowed(raw);
    }

    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = |b: u8| (b as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    Cow::Owned(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cors::CorsStyle;
    use crate::date::HeaderStamp;
    use crate::pool::RequestPool;
    use tokio::io::AsyncReadExt;

    fn test_request_on(target: &str, transport_buf: usize) -> (Request<u32>, tokio::io::DuplexStream) {
        let mut pool = RequestPool::new(1);
        let core = pool.acquire().unwrap();
        let header = http::Request::builder().method("GET").uri(target).body(()).unwrap().into();
        let (server, client) = tokio::io::duplex(transport_buf);
        let writer =
            ResponseWriter::new(Box::new(server), HeaderStamp::new(0), CorsStyle::Old);
        (Request::new(core, header, writer, Rc::new(7)), client)
    }

    fn test_request(target: &str) -> (Request<u32>, tokio::io::DuplexStream) {
        test_request_on(target, 16 * 1024)
    }

    #[test]
    fn percent_decode_leaves_plain_paths_borrowed() {
        assert!(matches!(percent_decode("/plain/path"), Cow::Borrowed(_)));
        assert_eq!(percent_decode("/a%20b%2Fc"), "/a b/c");
        // malformed escape passes through untouched
        assert_eq!(percent_decode("/x%zz"), "/x%zz");
    }

    #[test]
    fn user_data_is_typed() {
        let (mut req, _client) = test_request("/");
        assert!(req.user_data::<String>().is_none());

        req.set_user_data(String::from("session"));
        assert_eq!(req.user_data::<String>().unwrap(), "session");
        assert!(req.user_data::<u64>().is_none());

        req.user_data_mut::<String>().unwrap().push_str("-42");
        assert_eq!(req.user_data::<String>().unwrap(), "session-42");
    }

    #[tokio::test]
    async fn chunked_sequence_produces_ordered_frames() {
        let (mut req, mut client) = test_request("/stream");

        req.start_chunked(Some("application/json")).await.unwrap();
        req.send_chunk(b"foo").await.unwrap();
        req.send_chunk_two_part(b"ba", b"r").await.unwrap();
        req.finish_chunked().await.unwrap();
        drop(req);

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(text.ends_with("3\r\nfoo\r\n3\r\nbar\r\n0\r\n\r\n"));
    }

    /// Polls `fut` to completion against a tiny transport, draining the read
    /// side whenever the write side is blocked and recording every byte.
    async fn drive<T>(
        fut: impl std::future::Future<Output = Result<T, SendError>>,
        client: &mut tokio::io::DuplexStream,
        wire: &mut Vec<u8>,
    ) -> Result<T, SendError> {
        let mut fut = std::pin::pin!(fut);
        loop {
            match futures::poll!(fut.as_mut()) {
                std::task::Poll::Ready(result) => return result,
                std::task::Poll::Pending => {
                    let mut buf = [0u8; 8];
                    let n = client.read(&mut buf).await.unwrap();
                    wire.extend_from_slice(&buf[..n]);
                }
            }
        }
    }

    #[tokio::test]
    async fn chunk_continuation_waits_for_transport_drain() {
        const TRANSPORT_BUF: usize = 8;
        let (mut req, mut client) = test_request_on("/stream", TRANSPORT_BUF);
        let mut wire = Vec::new();

        drive(req.start_chunked(None), &mut client, &mut wire).await.unwrap();

        let payload = vec![b'a'; 64];
        {
            let mut send = std::pin::pin!(req.send_chunk(&payload));
            // the transport holds at most 8 bytes, so the continuation cannot
            // resolve before the reader starts draining the chunk
            assert!(futures::poll!(send.as_mut()).is_pending());

            let drained_before = wire.len();
            loop {
                match futures::poll!(send.as_mut()) {
                    std::task::Poll::Ready(result) => {
                        result.unwrap();
                        break;
                    }
                    std::task::Poll::Pending => {
                        let mut buf = [0u8; 8];
                        let n = client.read(&mut buf).await.unwrap();
                        wire.extend_from_slice(&buf[..n]);
                    }
                }
            }
            // frame is "40\r\n" + 64 bytes + "\r\n"; by resolution time all of
            // it except at most the transport buffer was already observed
            let frame_len = 4 + payload.len() + 2;
            assert!(wire.len() - drained_before >= frame_len - TRANSPORT_BUF);
        }

        // the next chunk can only be issued after the previous one resolved
        drive(req.send_chunk(b"z"), &mut client, &mut wire).await.unwrap();
        drive(req.finish_chunked(), &mut client, &mut wire).await.unwrap();
        drop(req);
        client.read_to_end(&mut wire).await.unwrap();

        // the decoded stream reproduces the payloads in call order
        let body_start = wire.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let mut decoder = crate::codec::PayloadDecoder::from(crate::protocol::PayloadSize::Chunked);
        let mut buf = bytes::BytesMut::from(&wire[body_start..]);
        let mut decoded = Vec::new();
        while let Some(item) = decoder.decode(&mut buf).unwrap() {
            match item {
                crate::protocol::PayloadItem::Chunk(bytes) => decoded.extend_from_slice(&bytes),
                crate::protocol::PayloadItem::Eof => break,
            }
        }
        let mut expected = vec![b'a'; 64];
        expected.push(b'z');
        assert_eq!(decoded, expected);
    }

    #[tokio::test]
    async fn out_of_order_chunk_calls_are_rejected() {
        let (mut req, _client) = test_request("/stream");

        assert!(req.send_chunk(b"early").await.is_err());
        assert!(req.finish_chunked().await.is_err());

        req.start_chunked(None).await.unwrap();
        assert!(req.start_chunked(None).await.is_err());
        assert!(req.write_simple_response(None, None, b"late").await.is_err());

        req.finish_chunked().await.unwrap();
        assert!(req.send_chunk(b"after-eof").await.is_err());
    }

    #[tokio::test]
    async fn simple_response_can_only_fire_once() {
        let (mut req, mut client) = test_request("/hello");
        req.write_simple_response(None, None, b"hi").await.unwrap();
        assert!(req.has_responded());
        assert!(req.write_simple_response(None, None, b"again").await.is_err());
        drop(req);

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }
}
