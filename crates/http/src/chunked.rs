//! Chunked-response framing and the per-request streaming state machine.
//!
//! The state machine is layered over an active request once a response cannot
//! be produced as a single buffer:
//!
//! ```text
//! NotStarted -> HeadersSent -> (Streaming)* -> Finished
//! ```
//!
//! Transitions are driven by the request's `start_chunked` / `send_chunk` /
//! `finish_chunked` operations; every operation's future resolves only once
//! its bytes are confirmed queued, so awaiting it is the continuation the
//! protocol requires before the next chunk may be issued.

use std::io::Write;

use bytes::{BufMut, BytesMut};

use crate::protocol::SendError;

/// Streaming state of a request's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkState {
    /// No chunked response started; the simple path is still available
    #[default]
    NotStarted,
    /// Status line and `Transfer-Encoding: chunked` queued
    HeadersSent,
    /// At least one data chunk queued
    Streaming,
    /// Terminating zero-length chunk queued; the request is done
    Finished,
}

impl ChunkState {
    /// Whether a data chunk or the terminator may be written now.
    pub(crate) fn can_stream(&self) -> bool {
        matches!(self, ChunkState::HeadersSent | ChunkState::Streaming)
    }
}

/// Frames one logical chunk from one or more payload parts.
///
/// All parts share a single size prefix and trailing CRLF, which is how the
/// two-part variant sends a header and payload without copying them together.
/// Zero total length is skipped entirely: an empty frame would terminate the
/// stream.
pub(crate) fn frame_chunk(dst: &mut BytesMut, parts: &[&[u8]]) {
    let total: usize = parts.iter().map(|p| p.len()).sum();
    if total == 0 {
        return;
    }

    // infallible: writing into BytesMut only grows it
    let _ = write!(HexWrite(dst), "{total:X}\r\n");
    dst.reserve(total + 2);
    for part in parts {
        dst.extend_from_slice(part);
    }
    dst.extend_from_slice(b"\r\n");
}

/// Frames the terminating zero-length chunk.
pub(crate) fn frame_eof(dst: &mut BytesMut) {
    dst.extend_from_slice(b"0\r\n\r\n");
}

struct HexWrite<'a>(&'a mut BytesMut);

impl Write for HexWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Rejects a streaming operation issued from the wrong state.
pub(crate) fn ensure_state(state: ChunkState, expected: &str) -> Result<(), SendError> {
    if state.can_stream() {
        Ok(())
    } else {
        Err(SendError::invalid_state(format!("{expected} called in state {state:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PayloadDecoder;
    use crate::protocol::{PayloadItem, PayloadSize};

    /// Runs framed output through the engine's own chunked decoder.
    fn decode(framed: &[u8]) -> Vec<u8> {
        let mut decoder = PayloadDecoder::from(PayloadSize::Chunked);
        let mut buf = BytesMut::from(framed);
        let mut out = Vec::new();
        while let Some(item) = decoder.decode(&mut buf).unwrap() {
            match item {
                PayloadItem::Chunk(bytes) => out.extend_from_slice(&bytes),
                PayloadItem::Eof => break,
            }
        }
        out
    }

    #[test]
    fn framed_chunks_round_trip_in_call_order() {
        let mut dst = BytesMut::new();
        frame_chunk(&mut dst, &[b"foo"]);
        frame_chunk(&mut dst, &[b"bar"]);
        frame_chunk(&mut dst, &[b"quux"]);
        frame_eof(&mut dst);

        assert_eq!(decode(&dst), b"foobarquux");
    }

    #[test]
    fn two_part_chunk_is_one_frame() {
        let mut dst = BytesMut::new();
        frame_chunk(&mut dst, &[b"head:", b"payload"]);
        frame_eof(&mut dst);

        // one size prefix covering both parts
        assert!(dst.starts_with(b"C\r\nhead:payload\r\n"));
        assert_eq!(decode(&dst), b"head:payload");
    }

    #[test]
    fn empty_chunk_is_skipped() {
        let mut dst = BytesMut::new();
        frame_chunk(&mut dst, &[b""]);
        assert!(dst.is_empty());

        frame_chunk(&mut dst, &[b"", b""]);
        assert!(dst.is_empty());
    }

    #[test]
    fn state_gates_streaming_operations() {
        assert!(ensure_state(ChunkState::HeadersSent, "send_chunk").is_ok());
        assert!(ensure_state(ChunkState::Streaming, "send_chunk").is_ok());
        assert!(ensure_state(ChunkState::NotStarted, "send_chunk").is_err());
        assert!(ensure_state(ChunkState::Finished, "send_chunk").is_err());
    }
}
