//! Wire types exchanged between clients and the relay
//!
//! Every message is a JSON object tagged by its `"event"` field. Signaling
//! payloads are opaque to the relay and forwarded untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Transport-assigned identifier of one live connection
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConnectionId(pub uuid::Uuid);

impl ConnectionId {
    /// Allocate a fresh random connection id
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for ConnectionId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Room identifier, case-sensitive and otherwise unconstrained
#[derive(
    Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session description or connectivity candidate, tagged by `"type"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalData {
    Offer { offer: Value },
    Answer { answer: Value },
    Candidate { candidate: Value },
}

impl SignalData {
    /// The message kind, as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            SignalData::Offer { .. } => "offer",
            SignalData::Answer { .. } => "answer",
            SignalData::Candidate { .. } => "candidate",
        }
    }
}

/// One entry of the existing-users snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingUser {
    pub id: ConnectionId,
    pub name: String,
}

/// Requests sent by a client (client → server)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientRequest {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: RoomId,
        user_id: String,
        display_name: String,
    },
    Signal {
        to: ConnectionId,
        #[serde(flatten)]
        data: SignalData,
    },
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        room_id: RoomId,
        message: String,
        sender_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Typing {
        room_id: RoomId,
        user_id: String,
        is_typing: bool,
    },
    LeaveRoom,
    /// Acknowledges the existing-users snapshot
    Ready,
    KeepAlive,
}

impl FromStr for ClientRequest {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

/// Events delivered to a client (server → client)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum PeerEvent {
    ExistingUsers {
        users: Vec<ExistingUser>,
    },
    UserConnected {
        id: ConnectionId,
        name: String,
    },
    Signal {
        from: ConnectionId,
        #[serde(flatten)]
        data: SignalData,
    },
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        message: String,
        sender_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Typing {
        user_id: String,
        is_typing: bool,
    },
    UserDisconnected {
        id: ConnectionId,
    },
}

impl PeerEvent {
    /// The `"event"` tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            PeerEvent::ExistingUsers { .. } => "existing-users",
            PeerEvent::UserConnected { .. } => "user-connected",
            PeerEvent::Signal { .. } => "signal",
            PeerEvent::ChatMessage { .. } => "chat-message",
            PeerEvent::Typing { .. } => "typing",
            PeerEvent::UserDisconnected { .. } => "user-disconnected",
        }
    }
}
