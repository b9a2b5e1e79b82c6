//! Deterministic in-process executor for driving the merger in tests.
//!
//! Scheduled commands sit in a queue until the test delivers a response,
//! an error, or a cancellation. Callbacks are never invoked from inside
//! `schedule_remote_command` or `cancel`, matching the executor contract
//! that completions arrive on executor-owned threads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use kestrel_common::{KestrelError, KestrelResult, ShardHost};

use crate::executor::{
    CallbackHandle, EventHandle, RemoteCallback, RemoteCommand, RemoteCommandRequest,
    RemoteExecutor,
};
use crate::wire::CursorResponse;

/// An executor whose completions fire only when the test says so.
pub struct QueuedExecutor {
    pending: Mutex<Vec<PendingCommand>>,
    next_handle: AtomicU64,
    shutdown: AtomicBool,
}

struct PendingCommand {
    handle: CallbackHandle,
    request: RemoteCommandRequest,
    callback: RemoteCallback,
    canceled: bool,
}

impl QueuedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Flip to the shutting-down state: further scheduling and event
    /// creation fail with `ExecutorShutdown`.
    pub fn shut_down(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Scheduled-but-undelivered requests, oldest first.
    pub fn pending_requests(&self) -> Vec<(CallbackHandle, RemoteCommandRequest)> {
        self.pending
            .lock()
            .iter()
            .map(|p| (p.handle, p.request.clone()))
            .collect()
    }

    /// Handle of the pending (non-canceled) getMore addressed to `host`.
    pub fn pending_get_more(&self, host: &ShardHost) -> Option<CallbackHandle> {
        self.pending
            .lock()
            .iter()
            .find(|p| {
                !p.canceled
                    && p.request.host == *host
                    && matches!(p.request.command, RemoteCommand::GetMore { .. })
            })
            .map(|p| p.handle)
    }

    /// Every kill-cursors request dispatched so far (delivered or not).
    pub fn kill_requests(&self) -> Vec<RemoteCommandRequest> {
        self.pending
            .lock()
            .iter()
            .filter(|p| matches!(p.request.command, RemoteCommand::KillCursors { .. }))
            .map(|p| p.request.clone())
            .collect()
    }

    /// Complete a pending command with a raw payload or error.
    ///
    /// Panics if `handle` does not name a pending command, so a test that
    /// delivers twice fails loudly.
    pub fn deliver(&self, handle: CallbackHandle, result: KestrelResult<Bytes>) {
        let callback = {
            let mut pending = self.pending.lock();
            let position = pending
                .iter()
                .position(|p| p.handle == handle)
                .unwrap_or_else(|| panic!("no pending command for {handle:?}"));
            pending.remove(position).callback
        };
        // Invoke outside the queue lock: the callback re-enters the merger
        // and may schedule new commands.
        callback(result);
    }

    /// Complete a pending command with a cursor response.
    pub fn deliver_response(&self, handle: CallbackHandle, response: &CursorResponse) {
        self.deliver(handle, Ok(response.to_bytes()));
    }

    pub fn deliver_error(&self, handle: CallbackHandle, err: KestrelError) {
        self.deliver(handle, Err(err));
    }

    /// Complete every canceled command with `CallbackCanceled`, the way a
    /// real executor drains cancellations on its own threads.
    pub fn run_canceled(&self) {
        let canceled: Vec<RemoteCallback> = {
            let mut pending = self.pending.lock();
            let mut kept = Vec::with_capacity(pending.len());
            let mut drained = Vec::new();
            for command in pending.drain(..) {
                if command.canceled {
                    drained.push(command.callback);
                } else {
                    kept.push(command);
                }
            }
            *pending = kept;
            drained
        };
        for callback in canceled {
            callback(Err(KestrelError::CallbackCanceled(
                "canceled by executor".into(),
            )));
        }
    }
}

impl RemoteExecutor for QueuedExecutor {
    fn schedule_remote_command(
        &self,
        request: RemoteCommandRequest,
        callback: RemoteCallback,
    ) -> KestrelResult<CallbackHandle> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(KestrelError::ExecutorShutdown(
                "queued executor is shut down".into(),
            ));
        }
        let handle = CallbackHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.pending.lock().push(PendingCommand {
            handle,
            request,
            callback,
            canceled: false,
        });
        Ok(handle)
    }

    fn cancel(&self, handle: CallbackHandle) {
        if let Some(command) = self
            .pending
            .lock()
            .iter_mut()
            .find(|p| p.handle == handle)
        {
            command.canceled = true;
        }
    }

    fn make_event(&self) -> KestrelResult<EventHandle> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(KestrelError::ExecutorShutdown(
                "queued executor is shut down".into(),
            ));
        }
        Ok(EventHandle::new())
    }
}
