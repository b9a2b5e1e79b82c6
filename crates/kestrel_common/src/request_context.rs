//! Per-operation context for log correlation.
//!
//! Long-running consumers detach from their context between batches and
//! reattach when they resume; the merger carries the current context on
//! every outgoing remote command so responses and errors can be correlated
//! back to a specific client operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Global monotonic request ID counter.
static GLOBAL_REQUEST_ID: AtomicU64 = AtomicU64::new(1);
/// Global monotonic query ID counter.
static GLOBAL_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a new unique request ID.
pub fn next_request_id() -> u64 {
    GLOBAL_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Allocate a new unique query ID.
pub fn next_query_id() -> u64 {
    GLOBAL_QUERY_ID.fetch_add(1, Ordering::Relaxed)
}

/// Context of the client operation currently driving the merger.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique per client request (monotonic).
    pub request_id: u64,
    /// Unique per client session (connection lifetime).
    pub session_id: u64,
    /// Unique per query within a session.
    pub query_id: u64,
    /// When this operation started.
    pub started_at: Instant,
}

impl RequestContext {
    /// Create a new context with fresh request and query IDs.
    pub fn new(session_id: u64) -> Self {
        Self {
            request_id: next_request_id(),
            session_id,
            query_id: next_query_id(),
            started_at: Instant::now(),
        }
    }

    /// Create with explicit IDs (for testing).
    pub fn with_ids(request_id: u64, session_id: u64, query_id: u64) -> Self {
        Self {
            request_id,
            session_id,
            query_id,
            started_at: Instant::now(),
        }
    }

    /// Elapsed time since the operation started, in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Format as a structured context string for log/error messages.
    pub fn as_context_str(&self) -> String {
        format!(
            "request_id={}, session_id={}, query_id={}",
            self.request_id, self.session_id, self.query_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_allocates_fresh_ids() {
        let a = RequestContext::new(7);
        let b = RequestContext::new(7);
        assert_eq!(a.session_id, 7);
        assert_ne!(a.request_id, b.request_id);
        assert_ne!(a.query_id, b.query_id);
    }

    #[test]
    fn context_str_format() {
        let ctx = RequestContext::with_ids(1, 2, 3);
        let s = ctx.as_context_str();
        assert!(s.contains("request_id=1"));
        assert!(s.contains("session_id=2"));
        assert!(s.contains("query_id=3"));
    }

    #[test]
    fn elapsed_is_monotonic() {
        let ctx = RequestContext::new(1);
        let t0 = ctx.elapsed_ms();
        let t1 = ctx.elapsed_ms();
        assert!(t1 >= t0);
    }
}
