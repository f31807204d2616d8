//! Typed view over a parsed request head.

use http::{HeaderMap, Method, Request, Uri, Version};

/// The head of an incoming request: method, URI, version and headers.
///
/// Wraps `http::Request<()>`. The body never lives here; payload fragments
/// flow through the connection bridge into the active request's arena.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl RequestHeader {
    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Whether a body is expected for this request's method.
    ///
    /// GET, HEAD, DELETE, OPTIONS and CONNECT carry no body regardless of
    /// framing headers.
    pub fn need_body(&self) -> bool {
        !matches!(
            self.method(),
            &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT
        )
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}
