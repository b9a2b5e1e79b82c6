//! The merging state machine.
//!
//! One [`ResultsMerger`] owns every per-shard cursor record and the sorted
//! merge queue, all behind a single lock. Public methods and executor
//! callbacks acquire that lock; the merger itself never blocks. Consumers
//! alternate between draining buffered results (`ready` / `next_ready`)
//! and re-arming fetches (`next_event`), waiting on the returned event
//! until the next response lands.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use kestrel_common::sort::extract_sort_key;
use kestrel_common::{
    CursorId, Document, KestrelError, KestrelResult, RequestContext, SortSpec,
};

use crate::executor::{
    EventHandle, RemoteCallback, RemoteCommand, RemoteCommandRequest, RemoteExecutor,
};
use crate::wire::{self, CursorResponse};

use super::queue::MergeQueue;
use super::remote::RemoteCursor;
use super::{MergeParams, RemoteCursorSeed, TailableMode};

/// Maximum re-arms per host for network and not-primary errors.
const MAX_HOST_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Alive,
    KillStarted,
    KillComplete,
}

/// Merges result streams from many remote cursors into one logical cursor.
///
/// Destruction requires that every remote is exhausted or that a `kill`
/// has run to completion; dropping a merger with live remote cursors is a
/// programming error.
pub struct ResultsMerger {
    inner: Arc<MergerInner>,
}

struct MergerInner {
    executor: Arc<dyn RemoteExecutor>,
    params: MergeParams,
    /// Read-preference metadata, serialized once and attached to every
    /// follow-up request.
    metadata: Option<Document>,
    state: Mutex<MergerState>,
}

struct MergerState {
    remotes: Vec<RemoteCursor>,
    merge_queue: MergeQueue,
    lifecycle: Lifecycle,
    /// Engine-level error, latched once from the first failed remote.
    status: Option<KestrelError>,
    /// The single outstanding consumer wake-up, if one has been issued.
    current_event: Option<EventHandle>,
    /// Signaled once kill-cursors commands have been dispatched.
    kill_event: Option<EventHandle>,
    /// Round-robin position for unsorted extraction.
    next_unsorted_remote: usize,
    /// One-shot batch-boundary marker for tailable cursors.
    eof_next: bool,
    await_data_timeout: Option<Duration>,
    /// Context of the consumer currently attached to this merger.
    op_ctx: Option<RequestContext>,
}

impl ResultsMerger {
    /// Build a merger over cursors already established on the remotes,
    /// seeding each buffer with the first batch that came back during
    /// establishment. A malformed first batch does not fail construction;
    /// the per-remote failure policy applies, so the error either
    /// surfaces through the first `ready()` or, under partial results,
    /// drops the remote from consideration.
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        ctx: RequestContext,
        params: MergeParams,
        seeds: Vec<RemoteCursorSeed>,
    ) -> Self {
        assert!(
            params.sort.is_empty() || params.tailable == TailableMode::Normal,
            "a sorted merge cannot be tailable"
        );

        let mut state = MergerState {
            remotes: Vec::with_capacity(seeds.len()),
            merge_queue: MergeQueue::new(params.sort.clone()),
            lifecycle: Lifecycle::Alive,
            status: None,
            current_event: None,
            kill_event: None,
            next_unsorted_remote: 0,
            eof_next: false,
            await_data_timeout: None,
            op_ctx: Some(ctx),
        };
        for seed in seeds {
            let index = state.remotes.len();
            state
                .remotes
                .push(RemoteCursor::new(seed.host, seed.namespace, seed.cursor_id));
            if let Err(err) =
                MergerInner::buffer_batch(&params.sort, &mut state, index, seed.first_batch)
            {
                MergerInner::clean_up_failed_batch(
                    params.allow_partial_results,
                    &mut state,
                    index,
                    err,
                );
            }
        }

        let metadata = params.read_preference.map(|rp| rp.to_metadata());
        Self {
            inner: Arc::new(MergerInner {
                executor,
                params,
                metadata,
                state: Mutex::new(state),
            }),
        }
    }

    /// True when the caller may synchronously extract a result, an
    /// end-of-batch/stream marker, or an error from `next_ready`.
    pub fn ready(&self) -> bool {
        let mut state = self.inner.state.lock();
        self.inner.ready_locked(&mut state)
    }

    /// Extract the next merged result. `Ok(None)` means end of batch for
    /// tailable cursors, end of stream otherwise. Must only be called
    /// after `ready()` returned true.
    pub fn next_ready(&self) -> KestrelResult<Option<Document>> {
        let mut state = self.inner.state.lock();
        let is_ready = self.inner.ready_locked(&mut state);
        debug_assert!(is_ready, "next_ready() called before ready() returned true");

        if state.lifecycle != Lifecycle::Alive {
            return Err(KestrelError::IllegalOperation(
                "next_ready() called on a killed results merger".into(),
            ));
        }
        if let Some(err) = &state.status {
            return Err(err.clone());
        }
        if state.eof_next {
            state.eof_next = false;
            return Ok(None);
        }

        if self.inner.params.sort.is_empty() {
            Ok(self.inner.next_ready_unsorted(&mut state))
        } else {
            Ok(self.inner.next_ready_sorted(&mut state))
        }
    }

    /// Schedule follow-up fetches for every remote that needs one and
    /// return an event that fires when the merger should be polled again.
    ///
    /// Only remotes with no buffered results, no outstanding request, and
    /// a live cursor are scheduled — which is also what re-arms a remote
    /// whose transient failure was within the retry cap: failed remotes
    /// keep an OK status and an empty buffer, so they are picked up here,
    /// while remotes that exceeded the cap sit in an error state and
    /// surface below.
    pub fn next_event(&self) -> KestrelResult<EventHandle> {
        let mut state = self.inner.state.lock();

        if state.lifecycle != Lifecycle::Alive {
            return Err(KestrelError::IllegalOperation(
                "next_event() called on a killed results merger".into(),
            ));
        }
        if state.current_event.is_some() {
            // Every issued event must be signaled before another may exist.
            return Err(KestrelError::IllegalOperation(
                "next_event() called before the outstanding event was signaled".into(),
            ));
        }

        for index in 0..state.remotes.len() {
            if let Some(err) = state.remotes[index].status.clone() {
                return Err(err);
            }
            let remote = &state.remotes[index];
            if !remote.has_next() && !remote.exhausted() && remote.inflight.is_none() {
                self.inner.ask_for_next_batch(&mut state, index)?;
            }
        }

        let event = self.inner.executor.make_event()?;
        state.current_event = Some(event.clone());

        // Results may have arrived between the caller's last ready() check
        // and this event's issuance; propagate that readiness immediately.
        self.inner.signal_current_event_if_ready(&mut state);
        Ok(event)
    }

    /// Record the timeout remotes should block for on follow-up fetches.
    /// Only valid in tailable await-data mode.
    pub fn set_await_data_timeout(&self, timeout: Duration) -> KestrelResult<()> {
        let mut state = self.inner.state.lock();
        if self.inner.params.tailable != TailableMode::TailableAndAwaitData {
            return Err(KestrelError::BadValue(
                "await-data timeout is only valid for tailable await-data cursors".into(),
            ));
        }
        state.await_data_timeout = Some(timeout);
        Ok(())
    }

    /// Unbind the consumer's context, e.g. while it checkpoints between
    /// batches.
    pub fn detach_from_context(&self) {
        let mut state = self.inner.state.lock();
        state.op_ctx = None;
        // A pending batch-boundary marker belongs to the previous consumer
        // cycle; a reattached consumer wants a fresh fetch instead.
        state.eof_next = false;
    }

    /// Bind a new consumer context. The previous one must have been
    /// detached.
    pub fn reattach_to_context(&self, ctx: RequestContext) {
        let mut state = self.inner.state.lock();
        debug_assert!(
            state.op_ctx.is_none(),
            "reattach_to_context() while a context is attached"
        );
        state.op_ctx = Some(ctx);
    }

    /// True iff every remote cursor has been exhausted.
    pub fn remotes_exhausted(&self) -> bool {
        let state = self.inner.state.lock();
        state.remotes.iter().all(|r| r.exhausted())
    }

    /// Release every live remote cursor. Idempotent; returns an event that
    /// fires once kill-cursors commands have been dispatched (not
    /// acknowledged), or `None` when the executor is shutting down and no
    /// dispatch is possible.
    pub fn kill(&self, ctx: &RequestContext) -> Option<EventHandle> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        // Idempotent regardless of how the first call ended: a repeat call
        // returns the original event, or None when the executor was
        // already shutting down and no event could be made.
        if state.lifecycle != Lifecycle::Alive {
            return state.kill_event.clone();
        }

        state.lifecycle = Lifecycle::KillStarted;
        state.op_ctx = Some(ctx.clone());

        let event = match inner.executor.make_event() {
            Ok(event) => event,
            Err(err) => {
                // Executor is shutting down; no more work can be scheduled.
                tracing::debug!(error = %err, "kill requested during executor shutdown");
                if !MergerInner::have_outstanding_requests(&state) {
                    state.lifecycle = Lifecycle::KillComplete;
                }
                return None;
            }
        };
        state.kill_event = Some(event.clone());

        if !MergerInner::have_outstanding_requests(&state) {
            inner.schedule_kill_cursors(&state);
            state.lifecycle = Lifecycle::KillComplete;
            inner.executor.signal_event(&event);
        } else {
            // Cancel in-flight fetches; the last completion callback
            // dispatches the kill-cursors commands.
            for remote in &state.remotes {
                if let Some(handle) = remote.inflight {
                    inner.executor.cancel(handle);
                }
            }
        }
        Some(event)
    }
}

impl MergerInner {
    // ── Readiness ────────────────────────────────────────────────────────

    fn ready_locked(&self, state: &mut MergerState) -> bool {
        if state.lifecycle != Lifecycle::Alive {
            return true;
        }
        if state.eof_next {
            return true;
        }
        // The first failed remote becomes the merger's error; latched once.
        if let Some(err) = state.remotes.iter().find_map(|r| r.status.clone()) {
            state.status = Some(err);
            return true;
        }
        if self.params.sort.is_empty() {
            Self::ready_unsorted(state)
        } else {
            self.ready_sorted(state)
        }
    }

    fn ready_sorted(&self, state: &MergerState) -> bool {
        debug_assert_eq!(self.params.tailable, TailableMode::Normal);
        // One unsatisfied remote blocks the merge: its next document could
        // sort ahead of every current candidate.
        state.remotes.iter().all(|r| r.has_next() || r.exhausted())
    }

    fn ready_unsorted(state: &MergerState) -> bool {
        let mut all_exhausted = true;
        for remote in &state.remotes {
            if !remote.exhausted() {
                all_exhausted = false;
            }
            if remote.has_next() {
                return true;
            }
        }
        all_exhausted
    }

    // ── Extraction ───────────────────────────────────────────────────────

    fn next_ready_sorted(&self, state: &mut MergerState) -> Option<Document> {
        debug_assert_eq!(self.params.tailable, TailableMode::Normal);

        let index = state.merge_queue.pop()?;
        debug_assert!(state.remotes[index].is_ok());
        let doc = state.remotes[index].buffer.pop_front()?;

        // Re-enter the queue with the remote's next head, if it has one.
        if let Some(head) = state.remotes[index].head() {
            state.merge_queue.push_head(index, head);
        }
        Some(doc)
    }

    fn next_ready_unsorted(&self, state: &mut MergerState) -> Option<Document> {
        let remote_count = state.remotes.len();
        if remote_count == 0 {
            return None;
        }
        for attempt in 0..remote_count {
            let index = (state.next_unsorted_remote + attempt) % remote_count;
            debug_assert!(state.remotes[index].is_ok());
            if let Some(doc) = state.remotes[index].buffer.pop_front() {
                // Fairness across calls: resume at the following remote.
                state.next_unsorted_remote = (index + 1) % remote_count;
                if self.params.tailable == TailableMode::Tailable
                    && !state.remotes[index].has_next()
                {
                    // Last buffered result of a tailable batch: the next
                    // extraction reports the batch boundary.
                    state.eof_next = true;
                }
                return Some(doc);
            }
        }
        None
    }

    // ── Fetching ─────────────────────────────────────────────────────────

    fn ask_for_next_batch(
        self: &Arc<Self>,
        state: &mut MergerState,
        index: usize,
    ) -> KestrelResult<()> {
        let remote = &state.remotes[index];
        debug_assert!(remote.inflight.is_none());
        debug_assert!(!remote.has_next());
        debug_assert!(!remote.exhausted());

        // Under an overall cap, never request more than the caller still
        // wants, even when results skew to one shard.
        let batch_size = self
            .params
            .batch_size
            .map(|cap| cap.saturating_sub(remote.fetched).max(1));

        let request = RemoteCommandRequest {
            host: remote.host.clone(),
            command: RemoteCommand::GetMore {
                namespace: remote.namespace.clone(),
                cursor_id: remote.cursor_id,
                batch_size,
                await_data_timeout: state.await_data_timeout,
            },
            metadata: self.metadata.clone(),
            ctx: state.op_ctx.clone(),
        };
        tracing::debug!(
            host = %remote.host,
            cursor_id = remote.cursor_id.0,
            batch_size = ?batch_size,
            "scheduling follow-up fetch"
        );

        let weak = Arc::downgrade(self);
        let callback: RemoteCallback = Box::new(move |response| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_batch_response(index, response);
            }
        });

        match self.executor.schedule_remote_command(request, callback) {
            Ok(handle) => {
                state.remotes[index].inflight = Some(handle);
                Ok(())
            }
            Err(err) => {
                state.remotes[index].status = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Executor completion callback for a follow-up fetch.
    fn handle_batch_response(self: &Arc<Self>, index: usize, response: KestrelResult<Bytes>) {
        let mut state = self.state.lock();
        state.remotes[index].inflight = None;

        if state.lifecycle != Lifecycle::Alive {
            // Wake anyone still waiting, then drive the kill path forward;
            // the response itself is not processed.
            self.signal_current_event_if_ready(&mut state);
            self.clean_up_killed_batch(&mut state);
            return;
        }

        self.process_batch_response(&mut state, index, response);
        self.signal_current_event_if_ready(&mut state);
    }

    fn process_batch_response(
        self: &Arc<Self>,
        state: &mut MergerState,
        index: usize,
        response: KestrelResult<Bytes>,
    ) {
        let allow_partial = self.params.allow_partial_results;
        let bytes = match response {
            Ok(bytes) => bytes,
            Err(err) => {
                Self::clean_up_failed_batch(allow_partial, state, index, err);
                return;
            }
        };
        let parsed = match Self::parse_response(&state.remotes[index], &bytes) {
            Ok(parsed) => parsed,
            Err(err) => {
                Self::clean_up_failed_batch(allow_partial, state, index, err);
                return;
            }
        };

        // Zero means the remote cursor is exhausted; no kill is needed.
        state.remotes[index].cursor_id = parsed.cursor_id;

        if let Err(err) = Self::buffer_batch(&self.params.sort, state, index, parsed.batch) {
            Self::clean_up_failed_batch(allow_partial, state, index, err);
            return;
        }

        let remote = &state.remotes[index];
        if self.params.tailable == TailableMode::Tailable && !remote.has_next() {
            // Tailable cursors target a single remote, so the end of its
            // batch is the end of the overall batch. Fetching is re-armed
            // by the next next_event(), not here: tailable batches pass
            // through to the consumer as delivered.
            debug_assert_eq!(state.remotes.len(), 1);
            state.eof_next = true;
        } else if !remote.has_next() && !remote.exhausted() {
            // Nothing buffered after this batch and the cursor is live:
            // fetch again right away.
            if let Err(err) = self.ask_for_next_batch(state, index) {
                tracing::warn!(
                    host = %state.remotes[index].host,
                    error = %err,
                    "failed to schedule follow-up fetch"
                );
            }
        }
    }

    fn parse_response(remote: &RemoteCursor, bytes: &Bytes) -> KestrelResult<CursorResponse> {
        let response = wire::parse_cursor_response(bytes)?;
        // A non-zero id must be the established one; anything else means
        // the remote is answering for a different cursor.
        if !response.cursor_id.is_exhausted() && response.cursor_id != remote.cursor_id {
            return Err(KestrelError::BadValue(format!(
                "expected {} from {} but received {}",
                remote.cursor_id, remote.host, response.cursor_id
            )));
        }
        Ok(response)
    }

    /// Append a batch to `remotes[index]`. With a sort configured, every
    /// document must carry a well-formed sort key; otherwise the batch is
    /// rejected whole (nothing retained, no queue update) and the error is
    /// returned for the caller to run through the per-remote failure
    /// policy.
    fn buffer_batch(
        sort: &SortSpec,
        state: &mut MergerState,
        index: usize,
        batch: Vec<Document>,
    ) -> KestrelResult<()> {
        let became_nonempty;
        {
            let remote = &mut state.remotes[index];
            if !sort.is_empty() {
                for doc in &batch {
                    if extract_sort_key(doc).is_none() {
                        return Err(KestrelError::Internal(format!(
                            "document from {} is missing a well-formed sort key",
                            remote.host
                        )));
                    }
                }
            }
            let was_empty = remote.buffer.is_empty();
            for doc in batch {
                remote.buffer.push_back(doc);
                remote.fetched += 1;
            }
            became_nonempty = was_empty && remote.has_next();
        }
        if !sort.is_empty() && became_nonempty {
            if let Some(head) = state.remotes[index].head() {
                state.merge_queue.push_head(index, head);
            }
        }
        Ok(())
    }

    /// Apply the failure policy to a terminal or transient per-remote
    /// error. Every terminal cause (transport beyond the retry cap,
    /// protocol mismatch, missing sort key) funnels through here so
    /// partial-results mode treats them uniformly.
    fn clean_up_failed_batch(
        allow_partial_results: bool,
        state: &mut MergerState,
        index: usize,
        err: KestrelError,
    ) {
        let remote = &mut state.remotes[index];

        if err.is_retryable() && remote.retries < MAX_HOST_RETRY_ATTEMPTS {
            remote.retries += 1;
            tracing::warn!(
                host = %remote.host,
                error = %err,
                attempt = remote.retries,
                max_attempts = MAX_HOST_RETRY_ATTEMPTS,
                "transient fetch failure; re-arming on the next event"
            );
            // Status stays OK: the next next_event() reschedules the fetch.
            return;
        }

        if allow_partial_results {
            // Swallow the failure and drop the remote from consideration
            // by treating it as exhausted.
            tracing::warn!(
                host = %remote.host,
                error = %err,
                "unreachable remote excluded from partial results"
            );
            remote.buffer.clear();
            remote.cursor_id = CursorId::EXHAUSTED;
            return;
        }

        tracing::warn!(host = %remote.host, error = %err, "remote failed terminally");
        remote.status = Some(err);
    }

    // ── Events ───────────────────────────────────────────────────────────

    fn signal_current_event_if_ready(&self, state: &mut MergerState) {
        if self.ready_locked(state) {
            // Taking the handle is what keeps each issued event signaled
            // at most once and lets the next next_event() call succeed.
            if let Some(event) = state.current_event.take() {
                self.executor.signal_event(&event);
            }
        }
    }

    // ── Kill path ────────────────────────────────────────────────────────

    fn have_outstanding_requests(state: &MergerState) -> bool {
        state.remotes.iter().any(|r| r.inflight.is_some())
    }

    /// Response handler tail once a kill has started: when the last
    /// outstanding fetch clears, dispatch the kill-cursors commands and
    /// make the merger safe to destroy.
    fn clean_up_killed_batch(&self, state: &mut MergerState) {
        debug_assert_eq!(state.lifecycle, Lifecycle::KillStarted);
        if Self::have_outstanding_requests(state) {
            return;
        }
        // A missing kill event means the executor was already shutting
        // down when kill() ran; no dispatch is possible.
        if let Some(kill_event) = state.kill_event.clone() {
            self.schedule_kill_cursors(state);
            self.executor.signal_event(&kill_event);
        }
        state.lifecycle = Lifecycle::KillComplete;
    }

    /// Dispatch a kill-cursors command to every remote that still holds a
    /// live cursor. Fire-and-forget: handles and scheduling failures are
    /// discarded.
    fn schedule_kill_cursors(&self, state: &MergerState) {
        debug_assert_eq!(state.lifecycle, Lifecycle::KillStarted);
        debug_assert!(state.kill_event.is_some());

        for remote in &state.remotes {
            debug_assert!(remote.inflight.is_none());
            if remote.is_ok() && !remote.exhausted() {
                let request = RemoteCommandRequest {
                    host: remote.host.clone(),
                    command: RemoteCommand::KillCursors {
                        namespace: remote.namespace.clone(),
                        cursor_id: remote.cursor_id,
                    },
                    metadata: None,
                    ctx: state.op_ctx.clone(),
                };
                tracing::debug!(
                    host = %remote.host,
                    cursor_id = remote.cursor_id.0,
                    "dispatching kill-cursors"
                );
                if let Err(err) = self
                    .executor
                    .schedule_remote_command(request, Box::new(|_| {}))
                {
                    tracing::debug!(
                        host = %remote.host,
                        error = %err,
                        "kill-cursors dispatch failed"
                    );
                }
            }
        }
    }
}

impl Drop for MergerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        debug_assert!(
            state.lifecycle == Lifecycle::KillComplete
                || state.remotes.iter().all(|r| r.exhausted()),
            "results merger dropped with live remote cursors; drain it or kill() it first"
        );
    }
}
