use std::collections::VecDeque;

use kestrel_common::{CursorId, Document, KestrelError, Namespace, ShardHost};

use crate::executor::CallbackHandle;

/// Per-shard cursor state owned by the merger.
///
/// At most one request is in flight per remote, and a remote with
/// buffered documents never has one: fetches are only scheduled against
/// an empty buffer.
#[derive(Debug)]
pub(crate) struct RemoteCursor {
    /// Immutable target address for every follow-up request.
    pub(crate) host: ShardHost,
    /// Immutable cursor namespace.
    pub(crate) namespace: Namespace,
    /// Current server-side cursor id; zero once exhausted on the remote.
    pub(crate) cursor_id: CursorId,
    /// Documents fetched but not yet consumed, in arrival order.
    pub(crate) buffer: VecDeque<Document>,
    /// Handle of the scheduled, not-yet-completed request, if any.
    pub(crate) inflight: Option<CallbackHandle>,
    /// Documents delivered by this remote so far; shrinks requested batch
    /// sizes when an overall cap is configured.
    pub(crate) fetched: u64,
    /// Latched terminal error, if any. `None` means OK.
    pub(crate) status: Option<KestrelError>,
    /// Attempts consumed against the per-host retry cap.
    pub(crate) retries: u32,
}

impl RemoteCursor {
    pub(crate) fn new(host: ShardHost, namespace: Namespace, cursor_id: CursorId) -> Self {
        Self {
            host,
            namespace,
            cursor_id,
            buffer: VecDeque::new(),
            inflight: None,
            fetched: 0,
            status: None,
            retries: 0,
        }
    }

    pub(crate) fn has_next(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// True once the remote has reported cursor id zero: no further
    /// getMore will be sent and no kill is necessary.
    pub(crate) fn exhausted(&self) -> bool {
        self.cursor_id.is_exhausted()
    }

    pub(crate) fn is_ok(&self) -> bool {
        self.status.is_none()
    }

    pub(crate) fn head(&self) -> Option<&Document> {
        self.buffer.front()
    }
}
