//! The task-executor contract the merger consumes.
//!
//! The merger owns no threads. It schedules remote commands through a
//! [`RemoteExecutor`] and wakes its consumer through [`EventHandle`]s the
//! executor hands out. Completion callbacks run on executor-owned threads;
//! implementations must never invoke a callback (including cancellation
//! delivery) synchronously from inside `schedule_remote_command` or
//! `cancel`, since the merger calls both while holding its own lock.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use kestrel_common::{CursorId, Document, KestrelResult, Namespace, RequestContext, ShardHost};

/// Completion callback for a scheduled remote command. Receives the raw
/// response payload or the transport-level error.
pub type RemoteCallback = Box<dyn FnOnce(KestrelResult<Bytes>) + Send + 'static>;

/// Opaque identifier for a scheduled, not-yet-completed remote command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(pub u64);

/// A command addressed to one remote cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Fetch the next batch from an established cursor.
    GetMore {
        namespace: Namespace,
        cursor_id: CursorId,
        batch_size: Option<u64>,
        await_data_timeout: Option<Duration>,
    },
    /// Release the remote's server-side cursor resources.
    KillCursors {
        namespace: Namespace,
        cursor_id: CursorId,
    },
}

/// A remote command plus its routing envelope.
#[derive(Debug, Clone)]
pub struct RemoteCommandRequest {
    pub host: ShardHost,
    pub command: RemoteCommand,
    /// Read-preference metadata blob, attached so a remote role change
    /// yields a clean error rather than silent data drift.
    pub metadata: Option<Document>,
    /// Client operation driving this command, for log correlation.
    pub ctx: Option<RequestContext>,
}

/// External scheduler for remote commands and wake-up events.
pub trait RemoteExecutor: Send + Sync {
    /// Schedule `request` against its target host. The callback fires
    /// exactly once, on an executor thread, with the response or error;
    /// canceled commands still complete with a terminal error.
    fn schedule_remote_command(
        &self,
        request: RemoteCommandRequest,
        callback: RemoteCallback,
    ) -> KestrelResult<CallbackHandle>;

    /// Request cancellation of a scheduled command. The completion
    /// callback is still delivered.
    fn cancel(&self, handle: CallbackHandle);

    /// Create a manual-reset one-shot event. Fails only when the executor
    /// is shutting down.
    fn make_event(&self) -> KestrelResult<EventHandle>;

    /// Signal an event, waking all current and future waiters.
    fn signal_event(&self, event: &EventHandle) {
        event.signal();
    }
}

/// Manual-reset one-shot wake-up primitive.
///
/// Starts unsignaled; `signal()` latches it permanently and wakes every
/// waiter. Cloning yields another handle to the same event.
#[derive(Clone)]
pub struct EventHandle {
    inner: Arc<EventInner>,
}

struct EventInner {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl EventHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventInner {
                signaled: Mutex::new(false),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Latch the event and wake all waiters. Signaling twice is a no-op.
    pub fn signal(&self) {
        let mut signaled = self.inner.signaled.lock();
        *signaled = true;
        self.inner.condvar.notify_all();
    }

    /// Non-blocking check.
    pub fn is_signaled(&self) -> bool {
        *self.inner.signaled.lock()
    }

    /// Block until the event is signaled.
    pub fn wait(&self) {
        let mut signaled = self.inner.signaled.lock();
        while !*signaled {
            self.inner.condvar.wait(&mut signaled);
        }
    }

    /// Block for at most `timeout`. Returns true if the event was signaled.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut signaled = self.inner.signaled.lock();
        if *signaled {
            return true;
        }
        self.inner.condvar.wait_for(&mut signaled, timeout);
        *signaled
    }
}

impl Default for EventHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle identity: two handles are equal iff they refer to the same event.
impl PartialEq for EventHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for EventHandle {}

impl std::fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandle")
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_starts_unsignaled() {
        let ev = EventHandle::new();
        assert!(!ev.is_signaled());
        assert!(!ev.wait_for(Duration::from_millis(10)));
    }

    #[test]
    fn signal_latches() {
        let ev = EventHandle::new();
        ev.signal();
        ev.signal();
        assert!(ev.is_signaled());
        assert!(ev.wait_for(Duration::from_millis(1)));
        ev.wait(); // returns immediately once latched
    }

    #[test]
    fn clones_share_state() {
        let ev = EventHandle::new();
        let clone = ev.clone();
        ev.signal();
        assert!(clone.is_signaled());
        assert_eq!(ev, clone);
        assert_ne!(ev, EventHandle::new());
    }

    #[test]
    fn wait_wakes_on_signal_from_other_thread() {
        let ev = EventHandle::new();
        let waiter = ev.clone();
        let handle = std::thread::spawn(move || {
            waiter.wait();
            true
        });
        std::thread::sleep(Duration::from_millis(10));
        ev.signal();
        assert!(handle.join().unwrap());
    }
}
