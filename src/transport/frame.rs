//! Wire Frames
//!
//! One JSON object per line. The `kind` field names the frame.

use crate::domain::ports::{NodeId, NodeOptions};
use crate::error::{Error, RemoteError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// First frame from a connecting client
    Hello { id: NodeId, options: NodeOptions },
    /// Server's answer to `Hello`
    Welcome { id: NodeId },
    /// Client replaces its declared options
    Options { options: NodeOptions },
    Tick { event: String, data: Value },
    Request {
        request_id: u64,
        event: String,
        data: Value,
    },
    Reply { request_id: u64, data: Value },
    ReplyError { request_id: u64, error: RemoteError },
    /// Graceful goodbye; the sender closes the link afterwards
    Stop,
}

impl Frame {
    /// Value of the `kind` field
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::Welcome { .. } => "welcome",
            Frame::Options { .. } => "options",
            Frame::Tick { .. } => "tick",
            Frame::Request { .. } => "request",
            Frame::Reply { .. } => "reply",
            Frame::ReplyError { .. } => "reply_error",
            Frame::Stop => "stop",
        }
    }

    /// Encode as one newline-terminated line
    pub fn encode(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim_end())
            .map_err(|e| Error::Transport(format!("malformed frame: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_frame_shape() {
        let frame = Frame::Request {
            request_id: 7,
            event: "ping".into(),
            data: json!(1),
        };
        let line = frame.encode().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(
            serde_json::from_str::<Value>(&line).unwrap(),
            json!({"kind": "request", "request_id": 7, "event": "ping", "data": 1})
        );
        assert_eq!(Frame::decode(&line).unwrap(), frame);
        assert_eq!(frame.kind(), "request");
        assert_eq!(Frame::decode("{\"kind\":\"stop\"}\n").unwrap(), Frame::Stop);
    }

    #[test]
    fn test_reply_error_keeps_kind() {
        let line = r#"{"kind":"reply_error","request_id":1,"error":{"kind":"NODE_NOT_FOUND","message":"gone"}}"#;
        assert_matches!(
            Frame::decode(line).unwrap(),
            Frame::ReplyError { error: RemoteError { kind: ErrorKind::NodeNotFound, .. }, .. }
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_matches!(Frame::decode("hello"), Err(Error::Transport(_)));
        assert_matches!(Frame::decode(r#"{"kind":"shout"}"#), Err(Error::Transport(_)));
    }
}
