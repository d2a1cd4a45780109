//! Wire types and the outbound transport seam for multiplayer rooms.
//!
//! Events are tagged JSON objects, `type` discriminated, field names in
//! kebab-case. The crate only defines the shapes and the [`Transport`] seam;
//! the actual socket lives with whoever embeds the arbiter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Events this client emits to the room server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom {
        room_id: String,
        identity: String,
    },
    /// A move played locally. `seq` is the total number of moves in the game
    /// including this one, so the server can spot divergence immediately.
    MakeMove {
        room_id: String,
        #[serde(rename = "move")]
        mv: String,
        fen: String,
        seq: u32,
    },
    NewGame {
        room_id: String,
    },
    ChatMessage {
        room_id: String,
        message: String,
    },
    /// Our board no longer matches the server's move stream; ask for the
    /// authoritative state.
    ResyncRequest {
        room_id: String,
    },
}

/// Events the room server pushes to this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Join acknowledgement with the full room state, also the payload of a
    /// resync.
    RoomJoined {
        room_id: String,
        participants: Vec<String>,
        fen: String,
        /// Moves from the start position, long algebraic.
        history: Vec<String>,
        seq: u32,
        #[serde(default)]
        chat: Vec<ChatEntry>,
    },
    /// Both seats are filled; play begins.
    StartGame,
    Move {
        #[serde(rename = "move")]
        mv: String,
        fen: String,
        seq: u32,
    },
    NewGame,
    ChatMessage {
        #[serde(flatten)]
        entry: ChatEntry,
    },
    OpponentLeft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub from: String,
    pub text: String,
}

/// Local view of the joined room.
#[derive(Debug, Clone, Default)]
pub struct Room {
    pub id: String,
    pub participants: Vec<String>,
    pub chat: Vec<ChatEntry>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is gone and will not come back on its own.
    #[error("connection to the room server was lost")]
    ConnectionLost,
    #[error("transport failure: {0}")]
    Other(String),
}

/// Outbound half of the room connection. Inbound events arrive through
/// whatever stream the embedder wires into the arbiter.
#[async_trait]
pub trait Transport: Send {
    async fn emit(&mut self, event: ClientEvent) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_serialize_tagged() {
        let event = ClientEvent::MakeMove {
            room_id: "r1".into(),
            mv: "e2e4".into(),
            fen: "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1".into(),
            seq: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "make-move");
        assert_eq!(json["move"], "e2e4");
        assert_eq!(json["seq"], 1);
    }

    #[test]
    fn server_move_round_trips() {
        let json = r#"{"type":"move","move":"e7e5","fen":"x","seq":2}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ServerEvent::Move { mv: "e7e5".into(), fen: "x".into(), seq: 2 }
        );
    }

    #[test]
    fn room_joined_tolerates_missing_chat() {
        let json = r#"{"type":"room-joined","room_id":"r1","participants":["a"],
                       "fen":"x","history":[],"seq":0}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        let ServerEvent::RoomJoined { chat, .. } = event else {
            panic!("expected a room-joined event");
        };
        assert!(chat.is_empty());
    }

    #[test]
    fn chat_message_flattens_sender() {
        let json = r#"{"type":"chat-message","from":"ada","text":"gg"}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ServerEvent::ChatMessage {
                entry: ChatEntry { from: "ada".into(), text: "gg".into() }
            }
        );
    }
}
