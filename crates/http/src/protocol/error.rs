use std::io;
use thiserror::Error;

/// Top level error type for the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("request error: {0}")]
    Request(#[from] ParseError),

    #[error("response error: {0}")]
    Response(#[from] SendError),

    #[error("failed to bind endpoint: {0}")]
    Bind(#[source] io::Error),

    #[error("thread data error: {reason}")]
    ThreadData { reason: String },

    #[error("worker error: {reason}")]
    Worker { reason: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl EngineError {
    pub fn bind<E: Into<io::Error>>(e: E) -> Self {
        Self::Bind(e.into())
    }

    pub fn thread_data<S: ToString>(reason: S) -> Self {
        Self::ThreadData { reason: reason.to_string() }
    }

    pub fn worker<S: ToString>(reason: S) -> Self {
        Self::Worker { reason: reason.to_string() }
    }

    pub fn config<S: ToString>(reason: S) -> Self {
        Self::Config { reason: reason.to_string() }
    }
}

/// Errors detected while parsing an incoming request.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("request head of {size} bytes exceeds the {limit} byte limit")]
    HeaderTooLarge { size: usize, limit: usize },

    #[error("more than {limit} headers in request head")]
    TooManyHeaders { limit: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid chunk framing: {reason}")]
    InvalidChunk { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ParseError {
    pub fn header_too_large(size: usize, limit: usize) -> Self {
        Self::HeaderTooLarge { size, limit }
    }

    pub fn too_many_headers(limit: usize) -> Self {
        Self::TooManyHeaders { limit }
    }

    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::InvalidHeader { reason: reason.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(reason: S) -> Self {
        Self::InvalidContentLength { reason: reason.to_string() }
    }

    pub fn invalid_chunk<S: ToString>(reason: S) -> Self {
        Self::InvalidChunk { reason: reason.to_string() }
    }

    pub fn invalid_body<S: ToString>(reason: S) -> Self {
        Self::InvalidBody { reason: reason.to_string() }
    }
}

/// Errors detected while writing a response.
#[derive(Error, Debug)]
pub enum SendError {
    /// A response operation was issued in a state that does not permit it,
    /// e.g. a chunk after the terminating chunk.
    #[error("invalid response state: {reason}")]
    InvalidState { reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SendError {
    pub fn invalid_state<S: ToString>(reason: S) -> Self {
        Self::InvalidState { reason: reason.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io(e.into())
    }
}
