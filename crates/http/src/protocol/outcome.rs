/// Terminal classification of a request's processing result.
///
/// A request leaves the engine with exactly one of these. `Ok` is the default;
/// once a non-`Ok` outcome is recorded the connection is finalized and no
/// further user callbacks fire for that request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    /// Successful completion
    #[default]
    Ok,
    /// Pool or buffer capacity exhausted; rejected at admission, no user
    /// callback was invoked
    SizeExceeded,
    /// Malformed input detected by the wire parser
    BadRequest,
    /// A user callback signaled failure, or an internal invariant broke
    InternalError,
    /// The per-connection idle timeout expired
    TimedOut,
}

impl Outcome {
    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }
}
