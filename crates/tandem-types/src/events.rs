use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DirectoryEntry, Message, Role, Sender};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, name: String, role: Role },

    /// Full replacement of a conversation's message list
    ConversationSnapshot { user_id: Uuid, messages: Vec<Message> },

    /// The typing flag of one direction changed
    TypingUpdate { user_id: Uuid, sender: Sender, typing: bool },

    /// Full replacement of the admin's directory
    DirectorySnapshot { users: Vec<DirectoryEntry> },

    /// A command or subscription failed; the connection stays open
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving snapshots for a target
    Subscribe { target: SubscriptionTarget },

    /// Stop receiving snapshots for a target
    Unsubscribe { target: SubscriptionTarget },
}

/// Something a gateway client can listen to. Conversations are named by
/// their non-admin participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionTarget {
    Conversation { user_id: Uuid },
    Typing { user_id: Uuid },
    Directory,
}

/// Commands accepted on the peer-to-peer relay socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum RelayCommand {
    AddUser(String),
    #[serde(rename_all = "camelCase")]
    Typing { sender_id: String, receiver_id: String },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        sender_id: String,
        receiver_id: String,
        text: String,
    },
}

/// Events emitted on the relay socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum RelayEvent {
    /// Ids of every user currently registered on the relay
    GetUsers(Vec<String>),
    #[serde(rename_all = "camelCase")]
    Typing { sender_id: String },
    #[serde(rename_all = "camelCase")]
    GetMessage {
        sender_id: String,
        text: String,
        created_at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_commands_use_socket_event_names() {
        let cmd: RelayCommand =
            serde_json::from_str(r#"{"event":"addUser","data":"u1"}"#).unwrap();
        assert!(matches!(cmd, RelayCommand::AddUser(ref id) if id == "u1"));

        let cmd: RelayCommand = serde_json::from_str(
            r#"{"event":"sendMessage","data":{"senderId":"a","receiverId":"b","text":"yo"}}"#,
        )
        .unwrap();
        match cmd {
            RelayCommand::SendMessage { sender_id, receiver_id, text } => {
                assert_eq!((sender_id.as_str(), receiver_id.as_str(), text.as_str()), ("a", "b", "yo"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn subscription_target_shape() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"Subscribe","data":{"target":{"kind":"directory"}}}"#)
                .unwrap();
        assert!(matches!(
            cmd,
            GatewayCommand::Subscribe { target: SubscriptionTarget::Directory }
        ));
    }
}
