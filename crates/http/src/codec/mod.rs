//! Streaming codec for incoming requests.
//!
//! The decoding side is a two-phase state machine: the head is parsed with
//! `httparse` (the external wire-parsing engine), then a body decoder selected
//! from the framing headers produces payload fragments until EOF. Outbound
//! bytes are assembled directly by the response writer and the chunked
//! protocol, so there is no encoder half here.

mod body;
mod request_decoder;

pub use body::PayloadDecoder;
pub use request_decoder::RequestDecoder;
