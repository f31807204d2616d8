//! Request decoder: head parsing plus body-decoder selection.
//!
//! The decoder holds its phase in the `payload` field: `None` while a head is
//! being parsed, `Some(PayloadDecoder)` while the body of the current request
//! is streaming. Once the body decoder yields EOF the decoder flips back to
//! head parsing, which is what gives the bridge its one-pooled-request-per-
//! message cadence.

use bytes::BytesMut;
use http::{HeaderValue, Request};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::body::PayloadDecoder;
use crate::ensure;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

/// Maximum number of headers accepted in a request head
const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes accepted for the entire head section
const MAX_HEADER_BYTES: usize = 8 * 1024;

#[derive(Default)]
pub struct RequestDecoder {
    payload: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // body phase
        if let Some(payload_decoder) = &mut self.payload {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    self.payload.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };
            return Ok(message);
        }

        // head phase
        let message = match decode_head(src)? {
            Some((header, payload_size)) => {
                self.payload = Some(PayloadDecoder::from(payload_size));
                Some(Message::Header((header, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }
}

fn decode_head(src: &mut BytesMut) -> Result<Option<(RequestHeader, PayloadSize)>, ParseError> {
    // shortest parseable request is "GET / HTTP/1.1\r\n\r\n"
    if src.len() < 14 {
        return Ok(None);
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
    let mut req = httparse::Request::new(&mut headers);

    let parsed = req.parse(src).map_err(|e| match e {
        httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
        e => ParseError::invalid_header(e.to_string()),
    })?;

    let body_offset = match parsed {
        Status::Complete(n) => n,
        Status::Partial => {
            ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::header_too_large(src.len(), MAX_HEADER_BYTES));
            return Ok(None);
        }
    };

    trace!(head_size = body_offset, "parsed request head");
    ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::header_too_large(body_offset, MAX_HEADER_BYTES));

    let version = match req.version {
        Some(0) => http::Version::HTTP_10,
        Some(1) => http::Version::HTTP_11,
        v => return Err(ParseError::InvalidVersion(v)),
    };

    let mut builder = Request::builder()
        .method(req.method.ok_or(ParseError::InvalidMethod)?)
        .uri(req.path.ok_or(ParseError::InvalidUri)?)
        .version(version);

    // builder cannot fail here: method/uri/version were validated above and
    // httparse only yields visible ASCII in names and values
    let headers_mut = builder.headers_mut().ok_or(ParseError::InvalidUri)?;
    headers_mut.reserve(req.headers.len());
    for h in req.headers.iter() {
        let name = http::HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| ParseError::invalid_header(e.to_string()))?;
        let value = HeaderValue::from_bytes(h.value).map_err(|e| ParseError::invalid_header(e.to_string()))?;
        headers_mut.append(name, value);
    }

    let request = builder.body(()).map_err(|e| ParseError::invalid_header(e.to_string()))?;
    let header = RequestHeader::from(request);
    let payload_size = parse_payload_size(&header)?;

    let _ = src.split_to(body_offset);
    Ok(Some((header, payload_size)))
}

/// Selects payload framing from the head, per RFC 9112 §6.
///
/// Transfer-Encoding and Content-Length together are rejected; chunked must be
/// the final listed transfer coding to count.
fn parse_payload_size(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    if !header.need_body() {
        return Ok(PayloadSize::Empty);
    }

    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Empty),

        (te_value @ Some(_), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Ok(PayloadSize::Empty)
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value is not a string"))?;
            let length = cl_str
                .trim()
                .parse::<u64>()
                .map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;
            Ok(PayloadSize::Length(length))
        }

        (Some(_), Some(_)) => {
            Err(ParseError::invalid_content_length("transfer-encoding and content-length both present"))
        }
    }
}

fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    if let Some(value) = header_value {
        if let Some(bytes) = value.as_bytes().rsplit(|b| *b == b',').next() {
            return bytes.trim_ascii() == CHUNKED;
        }
    }
    false
}
