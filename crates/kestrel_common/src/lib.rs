//! Shared leaf crate for the Kestrel query router: error taxonomy,
//! identifier newtypes, document ordering, and per-request context.

pub mod error;
pub mod request_context;
pub mod sort;
pub mod types;

pub use error::{ErrorKind, KestrelError, KestrelResult};
pub use request_context::RequestContext;
pub use sort::{SortField, SortOrder, SortSpec, SORT_KEY_FIELD};
pub use types::{CursorId, Document, Namespace, ReadPreference, ShardHost};
