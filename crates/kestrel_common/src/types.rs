use serde::{Deserialize, Serialize};
use std::fmt;

/// A result document as returned by a remote. The merger treats documents
/// as opaque except for the pre-computed sort key subfield.
pub type Document = serde_json::Value;

/// Network address of a data-holding node, `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardHost(pub String);

impl ShardHost {
    pub fn new(addr: impl Into<String>) -> Self {
        ShardHost(addr.into())
    }
}

impl fmt::Display for ShardHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side cursor identifier. Zero means the cursor is exhausted on
/// the remote and no follow-up or kill is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorId(pub i64);

impl CursorId {
    pub const EXHAUSTED: CursorId = CursorId(0);

    pub fn is_exhausted(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cursor:{}", self.0)
    }
}

/// Fully qualified cursor namespace, `db.collection`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(pub String);

impl Namespace {
    pub fn new(ns: impl Into<String>) -> Self {
        Namespace(ns.into())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which node role follow-up requests should target.
///
/// Attached to every follow-up request as a metadata blob so that a remote
/// role change yields a clean error instead of silently serving stale data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadPreference {
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadPreference {
    pub fn mode_str(self) -> &'static str {
        match self {
            ReadPreference::Primary => "primary",
            ReadPreference::PrimaryPreferred => "primaryPreferred",
            ReadPreference::Secondary => "secondary",
            ReadPreference::SecondaryPreferred => "secondaryPreferred",
            ReadPreference::Nearest => "nearest",
        }
    }

    /// The metadata document attached to outgoing remote commands.
    pub fn to_metadata(self) -> Document {
        serde_json::json!({ "readPreference": { "mode": self.mode_str() } })
    }
}

impl fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mode_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_id_zero_is_exhausted() {
        assert!(CursorId(0).is_exhausted());
        assert!(CursorId::EXHAUSTED.is_exhausted());
        assert!(!CursorId(42).is_exhausted());
    }

    #[test]
    fn display_formats() {
        assert_eq!(ShardHost::new("shard-a:27017").to_string(), "shard-a:27017");
        assert_eq!(CursorId(7).to_string(), "cursor:7");
        assert_eq!(Namespace::new("app.events").to_string(), "app.events");
    }

    #[test]
    fn read_preference_metadata_shape() {
        let meta = ReadPreference::SecondaryPreferred.to_metadata();
        assert_eq!(
            meta["readPreference"]["mode"],
            serde_json::json!("secondaryPreferred")
        );
    }
}
