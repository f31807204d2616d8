//! Synthetic-load (hammer) driver.
//!
//! Hammer mode replays a fixed URL list through the normal connection
//! dispatch path, with an in-memory reader standing in for the socket. Each
//! worker owns a cursor clone and walks the whole list `repeat` times, so a
//! run with W workers issues `W * urls * repeat` requests.

use std::sync::Arc;
use std::time::Duration;

/// Walks a URL list front to back, wrapping until the repeat budget is spent.
#[derive(Debug, Clone)]
pub(crate) struct HammerCursor {
    urls: Arc<[String]>,
    pos: usize,
    remaining: u32,
}

impl HammerCursor {
    pub(crate) fn new(urls: Vec<String>, repeat: u32) -> Self {
        Self { urls: urls.into(), pos: 0, remaining: repeat }
    }

    /// Next URL to hit, `None` once every pass is done.
    pub(crate) fn next(&mut self) -> Option<&str> {
        if self.remaining == 0 || self.urls.is_empty() {
            return None;
        }
        let idx = self.pos;
        self.pos += 1;
        if self.pos == self.urls.len() {
            self.pos = 0;
            self.remaining -= 1;
        }
        Some(&self.urls[idx])
    }
}

/// Renders the canonical request the hammer feeds into dispatch.
pub(crate) fn render_request(url: &str) -> Vec<u8> {
    format!("GET {url} HTTP/1.1\r\nhost: hammer\r\nconnection: close\r\n\r\n").into_bytes()
}

/// Aggregated result of a hammer run.
#[derive(Debug, Clone, Copy, Default)]
pub struct HammerReport {
    pub requests: u64,
    pub elapsed: Duration,
}

impl HammerReport {
    pub(crate) fn merge(&mut self, other: HammerReport) {
        self.requests += other.requests;
        self.elapsed = self.elapsed.max(other.elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_walks_in_order_and_wraps() {
        let mut cursor = HammerCursor::new(vec!["/a".into(), "/b".into()], 2);
        let mut seen = Vec::new();
        while let Some(url) = cursor.next() {
            seen.push(url.to_string());
        }
        assert_eq!(seen, vec!["/a", "/b", "/a", "/b"]);
        assert!(cursor.next().is_none());
    }

    #[test]
    fn empty_url_list_yields_nothing() {
        let mut cursor = HammerCursor::new(Vec::new(), 5);
        assert!(cursor.next().is_none());

        let mut cursor = HammerCursor::new(vec!["/a".into()], 0);
        assert!(cursor.next().is_none());
    }

    #[test]
    fn rendered_request_is_a_complete_close_delimited_get() {
        let raw = render_request("/metrics");
        let text = std::str::from_utf8(&raw).unwrap();
        assert!(text.starts_with("GET /metrics HTTP/1.1\r\n"));
        assert!(text.contains("connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn reports_merge_by_sum_and_max() {
        let mut total = HammerReport::default();
        total.merge(HammerReport { requests: 4, elapsed: Duration::from_millis(10) });
        total.merge(HammerReport { requests: 6, elapsed: Duration::from_millis(7) });
        assert_eq!(total.requests, 10);
        assert_eq!(total.elapsed, Duration::from_millis(10));
    }
}
