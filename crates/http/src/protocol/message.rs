use bytes::Bytes;

/// One item in a request's payload stream: a data fragment or the end marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    Chunk(Bytes),
    Eof,
}

impl PayloadItem {
    #[inline]
    pub fn is_eof(&self) -> bool {
        match self {
            PayloadItem::Eof => true,
            PayloadItem::Chunk(_) => false,
        }
    }
}

/// Payload framing derived from a request head, selecting the body decoder
/// that runs after the head: a fixed byte count, chunked transfer framing, or
/// nothing at all.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    Length(u64),
    Chunked,
    Empty,
}

impl PayloadSize {
    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == PayloadSize::Empty
    }
}

/// A decoded frame: either the head of a request or a piece of its payload.
///
/// The decoder emits exactly one `Header` per message, then zero or more
/// `Payload` chunks closed by a `Payload(Eof)`.
#[derive(Debug)]
pub enum Message<T> {
    Header(T),
    Payload(PayloadItem),
}
