//! Wire-format codec for cursor traffic.
//!
//! Responses arrive as a JSON document `{"cursorId": <i64>, "batch": [..]}`;
//! a zero cursor id means the remote cursor is exhausted. Commands encode
//! to the matching request documents for the transport to ship.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;

use kestrel_common::{CursorId, Document, KestrelError, KestrelResult};

use crate::executor::RemoteCommand;

/// A parsed cursor response: the (possibly changed) cursor id and the
/// delivered batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorResponse {
    pub cursor_id: CursorId,
    #[serde(default)]
    pub batch: Vec<Document>,
}

impl CursorResponse {
    pub fn new(cursor_id: CursorId, batch: Vec<Document>) -> Self {
        Self { cursor_id, batch }
    }

    /// Encode to the wire representation.
    pub fn to_bytes(&self) -> Bytes {
        // Serialization of a Value-backed struct cannot fail.
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }
}

/// Parse a response payload into `{cursorId, batch[]}`.
pub fn parse_cursor_response(bytes: &[u8]) -> KestrelResult<CursorResponse> {
    serde_json::from_slice(bytes)
        .map_err(|e| KestrelError::Protocol(format!("malformed cursor response: {e}")))
}

/// Encode a remote command to its wire document.
pub fn encode_command(command: &RemoteCommand) -> Document {
    match command {
        RemoteCommand::GetMore {
            namespace,
            cursor_id,
            batch_size,
            await_data_timeout,
        } => {
            let mut doc = json!({
                "getMore": cursor_id.0,
                "collection": namespace.0,
            });
            if let Some(size) = batch_size {
                doc["batchSize"] = json!(size);
            }
            if let Some(timeout) = await_data_timeout {
                doc["maxTimeMs"] = json!(timeout.as_millis() as u64);
            }
            doc
        }
        RemoteCommand::KillCursors {
            namespace,
            cursor_id,
        } => json!({
            "killCursors": namespace.0,
            "cursors": [cursor_id.0],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::Namespace;
    use std::time::Duration;

    #[test]
    fn response_round_trips() {
        let response = CursorResponse::new(
            CursorId(42),
            vec![json!({"_id": 1}), json!({"_id": 2})],
        );
        let parsed = parse_cursor_response(&response.to_bytes()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn batch_field_is_optional() {
        let parsed = parse_cursor_response(br#"{"cursorId": 0}"#).unwrap();
        assert_eq!(parsed.cursor_id, CursorId(0));
        assert!(parsed.batch.is_empty());
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        let err = parse_cursor_response(b"not json").unwrap_err();
        assert!(matches!(err, KestrelError::Protocol(_)));
    }

    #[test]
    fn get_more_encoding() {
        let cmd = RemoteCommand::GetMore {
            namespace: Namespace::new("app.events"),
            cursor_id: CursorId(99),
            batch_size: Some(25),
            await_data_timeout: Some(Duration::from_millis(500)),
        };
        let doc = encode_command(&cmd);
        assert_eq!(doc["getMore"], json!(99));
        assert_eq!(doc["collection"], json!("app.events"));
        assert_eq!(doc["batchSize"], json!(25));
        assert_eq!(doc["maxTimeMs"], json!(500));
    }

    #[test]
    fn get_more_omits_absent_hints() {
        let cmd = RemoteCommand::GetMore {
            namespace: Namespace::new("app.events"),
            cursor_id: CursorId(99),
            batch_size: None,
            await_data_timeout: None,
        };
        let doc = encode_command(&cmd);
        assert!(doc.get("batchSize").is_none());
        assert!(doc.get("maxTimeMs").is_none());
    }

    #[test]
    fn kill_cursors_encoding() {
        let cmd = RemoteCommand::KillCursors {
            namespace: Namespace::new("app.events"),
            cursor_id: CursorId(7),
        };
        let doc = encode_command(&cmd);
        assert_eq!(doc["killCursors"], json!("app.events"));
        assert_eq!(doc["cursors"], json!([7]));
    }
}
