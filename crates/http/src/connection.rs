//! Per-connection dispatch loop: decoded messages in, responses out.
//!
//! One `process` task runs per accepted connection on its worker's local set.
//! It owns both transport halves, binds a pooled request core to each decoded
//! message, drives the handler callbacks, then releases the core and recovers
//! the writer for the next message on the same connection.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use http::{StatusCode, Version};
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, warn};

use crate::chunked::ChunkState;
use crate::codec::RequestDecoder;
use crate::cors::CorsStyle;
use crate::date::HeaderStamp;
use crate::handler::ServiceHandler;
use crate::pool::RequestPool;
use crate::protocol::{EngineError, Message, Outcome, PayloadItem, RequestHeader};
use crate::request::Request;
use crate::response::{BoxWriter, DEFAULT_CONTENT_TYPE, ResponseWriter};

const INIT_READ_BUFFER: usize = 8 * 1024;

/// Everything a connection task needs from its worker.
pub(crate) struct ConnectionContext<H: ServiceHandler> {
    pub(crate) handler: Arc<H>,
    pub(crate) pool: Rc<RefCell<RequestPool>>,
    pub(crate) thread_data: Rc<H::ThreadData>,
    pub(crate) stamp: HeaderStamp,
    pub(crate) cors: CorsStyle,
    pub(crate) idle_timeout: Duration,
}

impl<H: ServiceHandler> Clone for ConnectionContext<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            pool: Rc::clone(&self.pool),
            thread_data: Rc::clone(&self.thread_data),
            stamp: self.stamp.clone(),
            cors: self.cors,
            idle_timeout: self.idle_timeout,
        }
    }
}

/// Serves one connection until close, error or idle timeout.
pub(crate) async fn process<H, R>(
    ctx: ConnectionContext<H>,
    reader: R,
    writer: BoxWriter,
) -> Result<(), EngineError>
where
    H: ServiceHandler,
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::with_capacity(reader, RequestDecoder::new(), INIT_READ_BUFFER);
    let mut io = Some(ResponseWriter::new(writer, ctx.stamp.clone(), ctx.cors));

    loop {
        let header = match tokio::time::timeout(ctx.idle_timeout, framed.next()).await {
            Err(_) => {
                debug!("closing idle connection");
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => {
                warn!(cause = %e, "failed to parse request head");
                if let Some(w) = io.as_mut() {
                    let _ = w.send_simple(StatusCode::BAD_REQUEST, DEFAULT_CONTENT_TYPE, b"").await;
                }
                return Err(e.into());
            }
            Ok(Some(Ok(Message::Header((header, _))))) => header,
            Ok(Some(Ok(Message::Payload(_)))) => {
                return Err(EngineError::worker("payload frame outside an active message"));
            }
        };

        let keep_alive = should_keep_alive(&header);

        let core = ctx.pool.borrow_mut().acquire();
        let Some(core) = core else {
            warn!("request pool exhausted, rejecting connection");
            if let Some(w) = io.as_mut() {
                w.send_simple(StatusCode::SERVICE_UNAVAILABLE, DEFAULT_CONTENT_TYPE, b"").await?;
            }
            return Ok(());
        };

        let writer = io
            .take()
            .ok_or_else(|| EngineError::worker("connection writer already taken"))?;
        let mut request = Request::new(core, header, writer, Rc::clone(&ctx.thread_data));

        drive_request(&ctx, &mut framed, &mut request).await;

        let outcome = request.outcome();
        let (core, writer) = request.into_parts();
        ctx.pool.borrow_mut().release(core);
        io = Some(writer);

        if !outcome.is_ok() || !keep_alive {
            return Ok(());
        }
    }
}

/// Runs one bound request to completion. Terminal errors are recorded on the
/// request's outcome; the caller decides the connection's fate from it.
async fn drive_request<H, R>(
    ctx: &ConnectionContext<H>,
    framed: &mut FramedRead<R, RequestDecoder>,
    request: &mut Request<H::ThreadData>,
) where
    H: ServiceHandler,
    R: AsyncRead + Unpin,
{
    if let Err(e) = ctx.handler.on_url(request).await {
        error!(cause = %e, "on_url callback failed");
        fail_request(request, Outcome::InternalError, StatusCode::INTERNAL_SERVER_ERROR).await;
        return;
    }

    loop {
        match tokio::time::timeout(ctx.idle_timeout, framed.next()).await {
            Err(_) => {
                debug!("request body timed out");
                request.set_outcome(Outcome::TimedOut);
                return;
            }
            Ok(None) => {
                warn!("connection closed mid-body");
                request.set_outcome(Outcome::BadRequest);
                return;
            }
            Ok(Some(Err(e))) => {
                warn!(cause = %e, "failed to parse request body");
                fail_request(request, Outcome::BadRequest, StatusCode::BAD_REQUEST).await;
                return;
            }
            Ok(Some(Ok(Message::Payload(PayloadItem::Chunk(bytes))))) => {
                request.append_chunk(bytes);
                if let Err(e) = ctx.handler.on_chunk(request).await {
                    error!(cause = %e, "on_chunk callback failed");
                    fail_request(request, Outcome::InternalError, StatusCode::INTERNAL_SERVER_ERROR)
                        .await;
                    return;
                }
            }
            Ok(Some(Ok(Message::Payload(PayloadItem::Eof)))) => break,
            Ok(Some(Ok(Message::Header(_)))) => {
                error!("request head decoded inside an active message");
                fail_request(request, Outcome::InternalError, StatusCode::INTERNAL_SERVER_ERROR)
                    .await;
                return;
            }
        }
    }

    if request.has_responded() {
        return;
    }
    match request.chunk_state() {
        ChunkState::NotStarted => {
            if let Err(e) = ctx.handler.on_request_complete(request).await {
                error!(cause = %e, "on_request_complete callback failed");
                fail_request(request, Outcome::InternalError, StatusCode::INTERNAL_SERVER_ERROR)
                    .await;
            } else if !request.has_responded() {
                fail_request(request, Outcome::InternalError, StatusCode::INTERNAL_SERVER_ERROR)
                    .await;
            }
        }
        // stream started but never finished; nothing valid can be sent now
        _ => {
            error!("chunked response left unfinished");
            request.set_outcome(Outcome::InternalError);
        }
    }
}

/// Records a terminal outcome and answers with a bare status if the response
/// head has not gone out yet.
async fn fail_request<T>(request: &mut Request<T>, outcome: Outcome, status: StatusCode) {
    request.set_outcome(outcome);
    if !request.has_responded() && request.chunk_state() == ChunkState::NotStarted {
        let _ = request.writer_mut().send_simple(status, DEFAULT_CONTENT_TYPE, b"").await;
        request.mark_responded();
    }
}

fn should_keep_alive(header: &RequestHeader) -> bool {
    let connection =
        header.headers().get(http::header::CONNECTION).and_then(|v| v.to_str().ok());
    match header.version() {
        Version::HTTP_10 => {
            matches!(connection, Some(v) if v.eq_ignore_ascii_case("keep-alive"))
        }
        _ => !matches!(connection, Some(v) if v.eq_ignore_ascii_case("close")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerError;
    use async_trait::async_trait;
    use indoc::indoc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct TestHandler {
        on_url_calls: AtomicUsize,
        seen_paths: Mutex<Vec<String>>,
    }

    impl TestHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self { on_url_calls: AtomicUsize::new(0), seen_paths: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait(?Send)]
    impl ServiceHandler for TestHandler {
        type ThreadData = ();

        fn create_thread_data(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn on_url(&self, request: &mut Request<()>) -> Result<(), HandlerError> {
            self.on_url_calls.fetch_add(1, Ordering::Relaxed);
            self.seen_paths.lock().unwrap().push(request.path().to_string());
            if request.path() == "/hello" {
                request.write_simple_response(None, None, b"hi").await?;
            }
            Ok(())
        }

        async fn on_request_complete(&self, request: &mut Request<()>) -> Result<(), HandlerError> {
            // echo the accumulated body
            let body = request.body().to_vec();
            request.write_simple_response(None, None, &body).await?;
            Ok(())
        }
    }

    fn test_context<H: ServiceHandler>(handler: Arc<H>, pool_size: usize) -> ConnectionContext<H> {
        let thread_data = Rc::new(
            handler.create_thread_data().expect("thread data"),
        );
        ConnectionContext {
            handler,
            pool: Rc::new(RefCell::new(RequestPool::new(pool_size))),
            thread_data,
            stamp: HeaderStamp::new(0),
            cors: CorsStyle::Old,
            idle_timeout: Duration::from_secs(5),
        }
    }

    /// Runs one connection over an in-memory duplex and returns the raw
    /// response bytes plus the connection result.
    async fn exchange<H: ServiceHandler>(
        ctx: ConnectionContext<H>,
        raw_request: &[u8],
    ) -> (String, Result<(), EngineError>) {
        let (server, mut client) = tokio::io::duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(server);

        let server_fut = process(ctx, read_half, Box::new(write_half));
        let client_fut = async {
            client.write_all(raw_request).await.unwrap();
            client.shutdown().await.unwrap();
            let mut out = Vec::new();
            client.read_to_end(&mut out).await.unwrap();
            String::from_utf8(out).unwrap()
        };

        let (result, response) = tokio::join!(server_fut, client_fut);
        (response, result)
    }

    #[tokio::test]
    async fn simple_get_round_trip() {
        let handler = TestHandler::new();
        let request = indoc! {"
            GET /hello HTTP/1.1\r
            host: localhost\r
            connection: close\r
            \r
        "};

        let (response, result) = exchange(test_context(Arc::clone(&handler), 4), request.as_bytes()).await;
        result.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Length: 2\r\n"));
        assert!(response.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(response.ends_with("\r\n\r\nhi"));
        assert_eq!(handler.on_url_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn chunked_body_is_accumulated_before_completion() {
        let handler = TestHandler::new();
        let request = indoc! {"
            POST /upload HTTP/1.1\r
            host: localhost\r
            transfer-encoding: chunked\r
            connection: close\r
            \r
            3\r
            foo\r
            3\r
            bar\r
            0\r
            \r
        "};

        let (response, result) = exchange(test_context(Arc::clone(&handler), 4), request.as_bytes()).await;
        result.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Length: 6\r\n"));
        assert!(response.ends_with("\r\n\r\nfoobar"));
    }

    struct StreamingHandler;

    #[async_trait(?Send)]
    impl ServiceHandler for StreamingHandler {
        type ThreadData = ();

        fn create_thread_data(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn on_url(&self, request: &mut Request<()>) -> Result<(), HandlerError> {
            request.start_chunked(Some("text/plain")).await?;
            request.send_chunk(b"foo").await?;
            request.send_chunk(b"bar").await?;
            request.finish_chunked().await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn chunked_response_decodes_to_original_bytes() {
        let request = indoc! {"
            GET /stream HTTP/1.1\r
            host: localhost\r
            connection: close\r
            \r
        "};

        let (response, result) =
            exchange(test_context(Arc::new(StreamingHandler), 4), request.as_bytes()).await;
        result.unwrap();

        let (head, body) = response.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK"));
        assert!(head.contains("Transfer-Encoding: chunked"));

        // client-side decode of the chunked body
        let mut decoder = crate::codec::PayloadDecoder::from(crate::protocol::PayloadSize::Chunked);
        let mut buf = bytes::BytesMut::from(body.as_bytes());
        let mut decoded = Vec::new();
        while let Some(item) = decoder.decode(&mut buf).unwrap() {
            match item {
                PayloadItem::Chunk(bytes) => decoded.extend_from_slice(&bytes),
                PayloadItem::Eof => break,
            }
        }
        assert_eq!(decoded, b"foobar");
    }

    #[tokio::test]
    async fn malformed_request_answers_400_without_callbacks() {
        let handler = TestHandler::new();

        let (response, result) =
            exchange(test_context(Arc::clone(&handler), 4), b"GET /hello\r\n\r\n").await;

        assert!(result.is_err());
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert_eq!(handler.on_url_calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn exhausted_pool_answers_503_without_on_url() {
        let handler = TestHandler::new();
        let request = indoc! {"
            GET /hello HTTP/1.1\r
            host: localhost\r
            \r
        "};

        let (response, result) = exchange(test_context(Arc::clone(&handler), 0), request.as_bytes()).await;
        result.unwrap();

        assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert_eq!(handler.on_url_calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn keep_alive_serves_pipelined_requests() {
        let handler = TestHandler::new();
        let request = indoc! {"
            GET /hello HTTP/1.1\r
            host: localhost\r
            \r
            GET /hello HTTP/1.1\r
            host: localhost\r
            connection: close\r
            \r
        "};

        let (response, result) = exchange(test_context(Arc::clone(&handler), 4), request.as_bytes()).await;
        result.unwrap();

        assert_eq!(response.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert_eq!(handler.on_url_calls.load(Ordering::Relaxed), 2);
        assert_eq!(*handler.seen_paths.lock().unwrap(), vec!["/hello", "/hello"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_times_out_cleanly() {
        let handler = TestHandler::new();
        let mut ctx = test_context(handler, 4);
        ctx.idle_timeout = Duration::from_millis(50);

        let (server, _client) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(server);
        process(ctx, read_half, Box::new(write_half)).await.unwrap();
    }
}
