//! Asynchronous fan-in merge of remote cursor streams.
//!
//! [`ResultsMerger`] owns one cursor record per shard, pulls follow-up
//! batches through the executor, and interleaves buffered documents either
//! by pre-computed sort key (k-way merge) or round-robin.

pub mod engine;
pub mod queue;
pub mod remote;

pub use engine::ResultsMerger;

use kestrel_common::{CursorId, Document, Namespace, ReadPreference, ShardHost, SortSpec};

/// Follow-the-log behavior of the merged cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TailableMode {
    /// The cursor ends once every remote is exhausted.
    #[default]
    Normal,
    /// The cursor survives batch boundaries; an empty extraction marks the
    /// end of the current batch, not the end of the stream.
    Tailable,
    /// Tailable, and remotes block up to a timeout waiting for new data
    /// before replying.
    TailableAndAwaitData,
}

/// Engine configuration. A sort and a tailable mode are mutually
/// exclusive.
#[derive(Debug, Clone, Default)]
pub struct MergeParams {
    /// Ordering spec; empty means unsorted round-robin merging.
    pub sort: SortSpec,
    /// Cap on total documents pulled per remote; follow-up batch sizes
    /// shrink as documents are fetched.
    pub batch_size: Option<u64>,
    pub tailable: TailableMode,
    /// Swallow terminal per-remote errors and treat the remote as
    /// exhausted instead of failing the merged stream.
    pub allow_partial_results: bool,
    /// Attached to every follow-up request.
    pub read_preference: Option<ReadPreference>,
}

/// One established remote cursor, as handed over by cursor establishment:
/// target address, namespace, server-side id, and the first batch that
/// came back with it.
#[derive(Debug, Clone)]
pub struct RemoteCursorSeed {
    pub host: ShardHost,
    pub namespace: Namespace,
    pub cursor_id: CursorId,
    pub first_batch: Vec<Document>,
}

impl RemoteCursorSeed {
    pub fn new(
        host: ShardHost,
        namespace: Namespace,
        cursor_id: CursorId,
        first_batch: Vec<Document>,
    ) -> Self {
        Self {
            host,
            namespace,
            cursor_id,
            first_batch,
        }
    }
}
