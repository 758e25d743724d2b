use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Events sent FROM client TO server over the live channel.
///
/// Wire shape is `{"type": "<event>", "data": {...}}`. Field names from the
/// legacy web client (`conversaId`, `conteudo`) are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Attach a user identity to this connection
    Authenticate(Authenticate),

    /// Persist a message and fan it out to the conversation room
    SendMessage(SendMessage),

    /// Mark the other party's messages in a conversation as read
    MarkAsRead(ConversationRef),

    /// Typing indicator, never persisted
    Typing(ConversationRef),

    /// Subscribe this connection to a conversation room
    JoinConversation(ConversationRef),

    /// Unsubscribe this connection from a conversation room
    LeaveConversation(ConversationRef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Authenticate {
    #[serde(rename = "userId")]
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessage {
    #[serde(rename = "conversationId", alias = "conversaId")]
    pub conversation_id: Option<i64>,
    #[serde(alias = "conteudo")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationRef {
    #[serde(rename = "conversationId", alias = "conversaId")]
    pub conversation_id: i64,
}

/// Events sent FROM server TO clients over the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Outcome of an `authenticate` handshake, caller only
    Authenticated {
        success: bool,
        #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
        user_id: Option<i64>,
    },

    /// A message was persisted in a conversation
    NewMessage(Message),

    /// `user_id` read everything the other participants sent
    MessagesRead {
        #[serde(rename = "conversationId")]
        conversation_id: i64,
        #[serde(rename = "userId")]
        user_id: i64,
    },

    /// `user_id` is typing; the sender receives its own echo
    UserTyping {
        #[serde(rename = "conversationId")]
        conversation_id: i64,
        #[serde(rename = "userId")]
        user_id: i64,
    },

    /// A rejected client event, caller only
    ErrorMessage { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::ErrorMessage {
            message: message.into(),
        }
    }
}
