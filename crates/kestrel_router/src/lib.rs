//! Query-routing tier for Kestrel: merges result streams from many remote
//! shard cursors into a single logical cursor.
//!
//! The coordinating node issues a query to every data-holding node and
//! receives per-shard cursors with their first batches; [`merge::ResultsMerger`]
//! then pulls follow-up batches asynchronously through a caller-supplied
//! [`executor::RemoteExecutor`], interleaves documents per the configured
//! ordering, and guarantees every remote cursor is drained or killed before
//! the merger is destroyed.

pub mod executor;
pub mod merge;
pub mod testing;
pub mod wire;

pub use executor::{CallbackHandle, EventHandle, RemoteCommand, RemoteCommandRequest, RemoteExecutor};
pub use merge::{MergeParams, RemoteCursorSeed, ResultsMerger, TailableMode};
pub use wire::CursorResponse;
