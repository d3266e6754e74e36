//! Room messages exchanged over the WebSocket transport.
//!
//! Both directions use the same fixed `schema` tag: clients submit patches,
//! the server answers with full trees.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client -> server messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Incremental patch against the room tree.
    Schema { patch: Value },
}

/// Server -> client messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full room tree, sent on join and after every applied change.
    Schema { data: Value },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_tag_round_trip() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"schema","patch":{"count":[5]}}"#).unwrap();
        let ClientMessage::Schema { patch } = msg;
        assert_eq!(patch, json!({"count": [5]}));

        let out = serde_json::to_value(ServerMessage::Schema {
            data: json!({"count": 5}),
        })
        .unwrap();
        assert_eq!(out, json!({"type": "schema", "data": {"count": 5}}));
    }
}
