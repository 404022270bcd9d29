// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Streaming protocol frames and the in-process broadcaster.
//!
//! These types are the wire contract between the agent core and whatever
//! transport fronts it (the WebSocket layer is out of scope here). Frames are
//! tagged by `type` so clients can switch on a single discriminator.

use crate::events::EventSeverity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Server → client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        agent_version: String,
    },
    SystemStatus {
        data: Value,
    },
    Pong,
    ThinkingStart,
    ThinkingEnd,
    AssistantMessageDelta {
        content: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        id: String,
        name: String,
        result: Value,
        display_type: String,
    },
    ActionRequest {
        id: String,
        tool: String,
        description: String,
        command: Vec<String>,
        risk_level: String,
        reversible: bool,
    },
    ActionExecuting {
        id: String,
        command: Vec<String>,
    },
    ActionComplete {
        id: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
        duration_ms: u64,
    },
    Alert {
        id: String,
        severity: EventSeverity,
        title: String,
        summary: String,
        source: String,
        timestamp: DateTime<Utc>,
    },
    InvestigationStart {
        investigation_id: String,
        trigger: String,
        severity: EventSeverity,
    },
    InvestigationUpdate {
        investigation_id: String,
        content: String,
    },
    InvestigationEnd {
        investigation_id: String,
        summary: String,
        tokens_used: u64,
    },
    BudgetUpdate {
        data: Value,
    },
    Error {
        message: String,
    },
}

/// Client → server frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    UserMessage {
        content: String,
    },
    ActionResponse {
        action_id: String,
        approved: bool,
        #[serde(default)]
        user: String,
    },
    Cancel,
    Ping,
}

/// Fan-out point for [`ServerMessage`] frames.
///
/// Transports subscribe via [`Broadcaster::subscribe`]; the core publishes
/// without caring whether anyone is connected. Lagging receivers drop frames
/// on their side, never here.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<ServerMessage>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes a frame to all connected receivers. Best-effort.
    pub fn send(&self, message: ServerMessage) {
        // Err just means no receiver is currently subscribed.
        if self.tx.send(message).is_err() {
            trace!("No stream receivers connected");
        }
    }

    /// Creates a new receiver for a transport connection.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_message_tagging() {
        let frame = ServerMessage::AssistantMessageDelta {
            content: "hello".to_string(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "assistant_message_delta");
        assert_eq!(value["content"], "hello");
    }

    #[test]
    fn test_action_request_frame() {
        let frame = ServerMessage::ActionRequest {
            id: "a1".to_string(),
            tool: "run_command".to_string(),
            description: "Restart nginx".to_string(),
            command: vec!["systemctl".to_string(), "restart".to_string(), "nginx".to_string()],
            risk_level: "HIGH".to_string(),
            reversible: false,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "action_request");
        assert_eq!(value["risk_level"], "HIGH");
        assert_eq!(value["command"][0], "systemctl");
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "action_response",
            "action_id": "a1",
            "approved": true,
            "user": "admin"
        }))
        .unwrap();
        match msg {
            ClientMessage::ActionResponse {
                action_id,
                approved,
                user,
            } => {
                assert_eq!(action_id, "a1");
                assert!(approved);
                assert_eq!(user, "admin");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_client_message_user_defaults_empty() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "action_response",
            "action_id": "a1",
            "approved": false
        }))
        .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::ActionResponse { user, .. } if user.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_broadcaster_fanout() {
        let broadcaster = Broadcaster::default();
        let mut rx1 = broadcaster.subscribe();
        let mut rx2 = broadcaster.subscribe();

        broadcaster.send(ServerMessage::ThinkingStart);

        assert!(matches!(
            rx1.recv().await.unwrap(),
            ServerMessage::ThinkingStart
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            ServerMessage::ThinkingStart
        ));
    }

    #[tokio::test]
    async fn test_broadcaster_send_without_receivers() {
        let broadcaster = Broadcaster::default();
        // Must not panic or error when nobody is listening
        broadcaster.send(ServerMessage::Pong);
        assert_eq!(broadcaster.receiver_count(), 0);
    }
}
