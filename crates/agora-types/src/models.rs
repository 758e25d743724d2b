use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public user fields. The credential hash never leaves the db crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    #[serde(rename = "nome")]
    pub name: String,
    pub email: String,
    #[serde(rename = "foto_perfil")]
    pub avatar: Option<String>,
    #[serde(rename = "descricao")]
    pub bio: Option<String>,
    #[serde(rename = "data_criacao")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

/// Delivery status. Only ever moves `Sent -> Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Read,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// A persisted message joined with its sender's presentation fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    #[serde(rename = "conversa_id")]
    pub conversation_id: i64,
    #[serde(rename = "usuario_id")]
    pub sender_id: i64,
    #[serde(rename = "conteudo")]
    pub content: String,
    #[serde(rename = "data_envio")]
    pub sent_at: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(rename = "usuario_nome")]
    pub sender_name: Option<String>,
    #[serde(rename = "foto_perfil")]
    pub sender_avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub id: i64,
    #[serde(rename = "conteudo")]
    pub content: String,
    #[serde(rename = "data_envio")]
    pub sent_at: DateTime<Utc>,
    #[serde(rename = "usuario_id")]
    pub sender_id: i64,
}

/// One row of a user's conversation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: i64,
    #[serde(rename = "tipo")]
    pub kind: ConversationKind,
    #[serde(rename = "nome")]
    pub name: Option<String>,
    #[serde(rename = "data_criacao")]
    pub created_at: DateTime<Utc>,
    /// Set for direct conversations only.
    #[serde(rename = "outro_usuario")]
    pub other_user: Option<UserProfile>,
    #[serde(rename = "ultima_mensagem")]
    pub last_message: Option<LastMessage>,
    #[serde(rename = "nao_lidas")]
    pub unread_count: i64,
}
