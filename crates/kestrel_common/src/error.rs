use thiserror::Error;

/// Convenience alias for `Result<T, KestrelError>`.
pub type KestrelResult<T> = Result<T, KestrelError>;

/// Error classification for retry decisions.
///
/// - `User`      — caller misuse: wrong lifecycle state, invalid option
/// - `Retryable` — transport failure or primary change; the fetch is
///   re-armed within the per-host retry cap
/// - `Shutdown`  — the executor is tearing down; no further work can be
///   scheduled
/// - `Internal`  — protocol violation or invariant breach on the remote's
///   side; terminal for that remote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    User,
    Retryable,
    Shutdown,
    Internal,
}

/// Top-level error type for the router tier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KestrelError {
    /// A method was called in a lifecycle state that forbids it.
    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    /// An option or argument is invalid for the configured mode.
    #[error("bad value: {0}")]
    BadValue(String),

    /// Network-level failure reaching a remote.
    #[error("host unreachable: {host}: {reason}")]
    HostUnreachable { host: String, reason: String },

    /// The remote is no longer the primary for its shard.
    #[error("not primary: {host}")]
    NotPrimary { host: String },

    /// A scheduled remote command was canceled before completion.
    #[error("remote command canceled: {0}")]
    CallbackCanceled(String),

    /// The task executor is shutting down.
    #[error("executor shutdown: {0}")]
    ExecutorShutdown(String),

    /// A response could not be decoded or violated the cursor protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invariant breach that should never occur.
    #[error("internal error: {0}")]
    Internal(String),
}

impl KestrelError {
    /// Classify this error for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KestrelError::IllegalOperation(_) => ErrorKind::User,
            KestrelError::BadValue(_) => ErrorKind::User,
            KestrelError::HostUnreachable { .. } => ErrorKind::Retryable,
            KestrelError::NotPrimary { .. } => ErrorKind::Retryable,
            KestrelError::ExecutorShutdown(_) => ErrorKind::Shutdown,
            KestrelError::CallbackCanceled(_) => ErrorKind::Internal,
            KestrelError::Protocol(_) => ErrorKind::Internal,
            KestrelError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True if a fetch that failed with this error may be re-armed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Retryable)
    }

    /// True if the executor is tearing down.
    pub fn is_shutdown(&self) -> bool {
        matches!(self.kind(), ErrorKind::Shutdown)
    }

    /// Network failure against `host`.
    pub fn host_unreachable(host: impl Into<String>, reason: impl Into<String>) -> Self {
        KestrelError::HostUnreachable {
            host: host.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod error_classification {
    use super::*;

    #[test]
    fn illegal_operation_is_user_error() {
        let e = KestrelError::IllegalOperation("next_event() on killed merger".into());
        assert_eq!(e.kind(), ErrorKind::User);
        assert!(!e.is_retryable());
        assert!(!e.is_shutdown());
    }

    #[test]
    fn bad_value_is_user_error() {
        let e = KestrelError::BadValue("await-data timeout without await-data mode".into());
        assert_eq!(e.kind(), ErrorKind::User);
    }

    #[test]
    fn host_unreachable_is_retryable() {
        let e = KestrelError::host_unreachable("shard-a:27017", "connection refused");
        assert_eq!(e.kind(), ErrorKind::Retryable);
        assert!(e.is_retryable());
    }

    #[test]
    fn not_primary_is_retryable() {
        let e = KestrelError::NotPrimary {
            host: "shard-b:27017".into(),
        };
        assert!(e.is_retryable());
    }

    #[test]
    fn executor_shutdown_is_shutdown() {
        let e = KestrelError::ExecutorShutdown("executor stopped".into());
        assert_eq!(e.kind(), ErrorKind::Shutdown);
        assert!(e.is_shutdown());
        assert!(!e.is_retryable());
    }

    #[test]
    fn protocol_and_internal_are_terminal() {
        assert_eq!(
            KestrelError::Protocol("bad cursor response".into()).kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            KestrelError::Internal("missing sort key".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn canceled_is_not_retryable() {
        let e = KestrelError::CallbackCanceled("killed".into());
        assert!(!e.is_retryable());
    }

    #[test]
    fn display_carries_host_and_reason() {
        let e = KestrelError::host_unreachable("shard-a:27017", "timed out");
        let s = e.to_string();
        assert!(s.contains("shard-a:27017"));
        assert!(s.contains("timed out"));
    }
}
