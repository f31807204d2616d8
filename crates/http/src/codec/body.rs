//! Body decoders: content-length and chunked transfer framing.
//!
//! Each decoder yields [`PayloadItem::Chunk`] fragments as data arrives and a
//! single [`PayloadItem::Eof`] when the body is complete. Decoders never block
//! on missing data; `Ok(None)` asks the framed reader for more bytes.

use bytes::{Buf, BytesMut};

use crate::protocol::{ParseError, PayloadItem, PayloadSize};

/// Per-request body decoder, selected from the framing headers of the head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadDecoder {
    /// No body: yields EOF on first poll
    Empty,
    /// Content-Length framing
    Length(LengthDecoder),
    /// Chunked transfer framing
    Chunked(ChunkedDecoder),
}

impl PayloadDecoder {
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PayloadItem>, ParseError> {
        match self {
            PayloadDecoder::Empty => Ok(Some(PayloadItem::Eof)),
            PayloadDecoder::Length(decoder) => decoder.decode(src),
            PayloadDecoder::Chunked(decoder) => decoder.decode(src),
        }
    }
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(size: PayloadSize) -> Self {
        match size {
            PayloadSize::Empty => PayloadDecoder::Empty,
            PayloadSize::Length(n) => PayloadDecoder::Length(LengthDecoder::new(n)),
            PayloadSize::Chunked => PayloadDecoder::Chunked(ChunkedDecoder::new()),
        }
    }
}

/// Decoder for bodies with a known Content-Length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    remaining: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: length }
    }

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PayloadItem>, ParseError> {
        if self.remaining == 0 {
            return Ok(Some(PayloadItem::Eof));
        }
        if src.is_empty() {
            return Ok(None);
        }

        let take = usize::try_from(self.remaining).unwrap_or(usize::MAX).min(src.len());
        self.remaining -= take as u64;
        let bytes = src.split_to(take).freeze();
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}

/// Decoder for chunked transfer encoded bodies.
///
/// Explicit state machine over the chunk grammar: size line, data, the CRLF
/// closing each chunk, then the trailer section after the zero-length chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkReadState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkReadState {
    Size,
    Data { remaining: u64 },
    DataCrlf,
    Trailer,
    Finished,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: ChunkReadState::Size }
    }

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PayloadItem>, ParseError> {
        loop {
            match self.state {
                ChunkReadState::Size => {
                    let Some(line) = split_line(src) else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&line)?;
                    self.state = if size == 0 { ChunkReadState::Trailer } else { ChunkReadState::Data { remaining: size } };
                }

                ChunkReadState::Data { remaining } => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let take = usize::try_from(remaining).unwrap_or(usize::MAX).min(src.len());
                    let left = remaining - take as u64;
                    self.state = if left == 0 { ChunkReadState::DataCrlf } else { ChunkReadState::Data { remaining: left } };
                    return Ok(Some(PayloadItem::Chunk(src.split_to(take).freeze())));
                }

                ChunkReadState::DataCrlf => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(ParseError::invalid_chunk("chunk data not terminated by CRLF"));
                    }
                    src.advance(2);
                    self.state = ChunkReadState::Size;
                }

                ChunkReadState::Trailer => {
                    let Some(line) = split_line(src) else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = ChunkReadState::Finished;
                        return Ok(Some(PayloadItem::Eof));
                    }
                    // trailer fields are consumed and dropped
                }

                ChunkReadState::Finished => return Ok(Some(PayloadItem::Eof)),
            }
        }
    }
}

/// Splits one CRLF-terminated line off the buffer, without the CRLF.
fn split_line(src: &mut BytesMut) -> Option<BytesMut> {
    let pos = src.windows(2).position(|w| w == b"\r\n")?;
    let line = src.split_to(pos);
    src.advance(2);
    Some(line)
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    // chunk extensions after ';' are ignored
    let digits = line.split(|b| *b == b';').next().unwrap_or(line);
    let digits = digits.trim_ascii();
    if digits.is_empty() {
        return Err(ParseError::invalid_chunk("empty chunk size line"));
    }

    let mut size: u64 = 0;
    for b in digits {
        let v = match b {
            b'0'..=b'9' => u64::from(b - b'0'),
            b'a'..=b'f' => u64::from(b - b'a' + 10),
            b'A'..=b'F' => u64::from(b - b'A' + 10),
            _ => return Err(ParseError::invalid_chunk("chunk size is not hex")),
        };
        size = size.checked_mul(16).and_then(|s| s.checked_add(v)).ok_or_else(|| ParseError::invalid_chunk("chunk size overflow"))?;
    }
    Ok(size)
}
