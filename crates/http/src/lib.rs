//! An embeddable shard-per-thread HTTP/1.1 server engine
//!
//! This crate provides a small, self-contained HTTP/1.1 server core meant to
//! be embedded into a larger application. It runs one single-threaded tokio
//! runtime per worker thread, so every connection, request pool and piece of
//! thread data stays on the thread that created it and no request path takes
//! a lock.
//!
//! # Features
//!
//! - Full HTTP/1.1 request parsing including chunked request bodies
//! - Bounded per-worker request pools with free-list reuse
//! - Simple single-buffer responses and explicit chunked streaming
//! - Keep-alive connections with idle timeouts
//! - TCP, unix-socket and inherited-descriptor endpoints
//! - A built-in synthetic-load (hammer) mode replaying URL lists through the
//!   normal dispatch path
//! - Cached `Date`/`Thread-Id` response stamps refreshed off the hot path
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tracing::Level;
//! use tracing_subscriber::FmtSubscriber;
//! use ember_http::handler::{HandlerError, ServiceHandler};
//! use ember_http::protocol::EngineError;
//! use ember_http::request::Request;
//! use ember_http::server::Server;
//!
//! struct HelloService;
//!
//! #[async_trait(?Send)]
//! impl ServiceHandler for HelloService {
//!     type ThreadData = ();
//!
//!     fn create_thread_data(&self) -> Result<(), EngineError> {
//!         Ok(())
//!     }
//!
//!     async fn on_url(&self, request: &mut Request<()>) -> Result<(), HandlerError> {
//!         if request.path() == "/hello" {
//!             request.write_simple_response(None, None, b"hi").await?;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), EngineError> {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber)
//!         .expect("setting default subscriber failed");
//!
//!     let server = Server::tcp(8080, HelloService).threads(4).build()?;
//!     server.run()?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`server`]: supervisor that binds the endpoint, spawns workers and joins
//!   them
//! - [`handler`]: the [`ServiceHandler`](handler::ServiceHandler) callbacks an
//!   embedder implements
//! - [`request`]: the pooled, exclusively-owned request handed to callbacks
//! - [`endpoint`]: TCP / unix / inherited-fd / hammer traffic sources
//! - [`protocol`]: message types, outcome taxonomy and error types
//! - [`codec`]: HTTP/1.1 request head and body decoding
//! - [`hammer`]: synthetic-load reporting types
//!
//! # Limitations
//!
//! - HTTP/1.1 only
//! - No TLS (terminate it in front of the engine)
//! - Maximum header size: 8KB, maximum number of headers: 64

pub mod codec;
pub mod cors;
pub mod endpoint;
pub mod hammer;
pub mod handler;
pub mod protocol;
pub mod request;
pub mod server;

mod chunked;
mod connection;
mod date;
mod pool;
mod response;
mod worker;

mod utils;
pub(crate) use utils::ensure;
