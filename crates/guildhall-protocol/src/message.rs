// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! IPC message types.

use serde::{Deserialize, Serialize};

/// Messages sent by a bot process to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChildMessage {
    /// The bot finished logging in and is serving guilds.
    Ready {
        /// Number of guilds the bot is connected to.
        guilds: u64,
    },
    /// The bot hit an error it wants surfaced. Does not imply an exit.
    Error {
        /// Human-readable error description.
        message: String,
    },
}

impl ChildMessage {
    /// Wire name of the message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ChildMessage::Ready { .. } => "ready",
            ChildMessage::Error { .. } => "error",
        }
    }
}

/// Messages sent by the supervisor to a bot process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorMessage {
    /// Request a graceful exit.
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_wire_shape() {
        let json = serde_json::to_value(ChildMessage::Ready { guilds: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "ready", "data": {"guilds": 3}}));
    }

    #[test]
    fn test_error_wire_shape() {
        let msg: ChildMessage =
            serde_json::from_str(r#"{"type":"error","data":{"message":"gateway closed"}}"#)
                .unwrap();
        assert_eq!(
            msg,
            ChildMessage::Error {
                message: "gateway closed".to_string()
            }
        );
        assert_eq!(msg.kind(), "error");
    }

    #[test]
    fn test_shutdown_wire_shape() {
        let json = serde_json::to_string(&SupervisorMessage::Shutdown).unwrap();
        assert_eq!(json, r#"{"type":"shutdown"}"#);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = serde_json::from_str::<ChildMessage>(r#"{"type":"heartbeat","data":{}}"#);
        assert!(result.is_err());
    }
}
