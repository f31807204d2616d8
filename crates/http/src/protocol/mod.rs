//! Core protocol abstractions shared by the codec, the connection bridge and
//! the public request surface.
//!
//! - [`Message`], [`PayloadItem`], [`PayloadSize`]: frame types produced by the
//!   request decoder
//! - [`RequestHeader`]: typed view over a parsed request head
//! - [`Outcome`]: terminal classification of a request's processing result
//! - [`EngineError`], [`ParseError`], [`SendError`]: error taxonomy

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod outcome;
pub use outcome::Outcome;

mod error;
pub use error::EngineError;
pub use error::ParseError;
pub use error::SendError;
