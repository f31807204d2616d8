//! Cached `Date`/`Thread-Id` response header stamp.
//!
//! Formatting an HTTP date per response is wasted work under load; each worker
//! keeps one preformatted stamp and refreshes it from a periodic local task.
//! The stamp lives in an `Rc<RefCell<_>>` because it is only ever touched by
//! its own worker thread.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, SystemTime};

use bytes::BytesMut;
use httpdate::fmt_http_date;

/// Refresh cadence of the cached stamp
const REFRESH_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub(crate) struct HeaderStamp {
    thread_id: usize,
    current: Rc<RefCell<String>>,
}

impl HeaderStamp {
    pub(crate) fn new(thread_id: usize) -> Self {
        Self { thread_id, current: Rc::new(RefCell::new(format_stamp(thread_id))) }
    }

    /// Appends `Date: ...\r\nThread-Id: ...\r\n` to a response head buffer.
    pub(crate) fn render_into(&self, dst: &mut BytesMut) {
        dst.extend_from_slice(self.current.borrow().as_bytes());
    }

    /// Starts the periodic refresh task on the current `LocalSet`.
    ///
    /// The task dies with the worker's local set, so no explicit abort is
    /// needed at teardown.
    pub(crate) fn spawn_refresh(&self) -> tokio::task::JoinHandle<()> {
        let current = Rc::clone(&self.current);
        let thread_id = self.thread_id;
        tokio::task::spawn_local(async move {
            let mut interval = tokio::time::interval(REFRESH_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                *current.borrow_mut() = format_stamp(thread_id);
            }
        })
    }
}

fn format_stamp(thread_id: usize) -> String {
    format!("Date: {}\r\nThread-Id: {:06}\r\n", fmt_http_date(SystemTime::now()), thread_id)
}
