//! CORS header injection.
//!
//! Two fixed variants, appended to the head of every outgoing response
//! (simple and chunked start alike). Pure formatting; toggling the style
//! changes only the emitted header set.

use bytes::BytesMut;

const OLD_STYLE_BLOCK: &str = "Access-Control-Allow-Origin: *\r\n\
                               Access-Control-Allow-Headers: Origin, X-Requested-With, Content-Type, Accept\r\n";

const NEW_STYLE_BLOCK: &str = "Access-Control-Allow-Origin: *\r\n\
                               Access-Control-Allow-Methods: GET, POST, PUT, DELETE, OPTIONS\r\n\
                               Access-Control-Allow-Headers: Content-Type, Authorization\r\n\
                               Access-Control-Max-Age: 86400\r\n";

/// Which of the two access-control header sets responses carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorsStyle {
    /// The historical header set
    #[default]
    Old,
    /// The newer set including allowed methods and a max-age
    New,
}

impl CorsStyle {
    pub(crate) fn render_into(&self, dst: &mut BytesMut) {
        let block = match self {
            CorsStyle::Old => OLD_STYLE_BLOCK,
            CorsStyle::New => NEW_STYLE_BLOCK,
        };
        dst.extend_from_slice(block.as_bytes());
    }
}
