//! Row types that never cross the API boundary as-is.

use agora_types::models::{ConversationKind, UserProfile};
use chrono::{DateTime, Utc};

pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn into_profile(self) -> UserProfile {
        UserProfile {
            id: self.id,
            name: self.name,
            email: self.email,
            avatar: self.avatar,
            bio: self.bio,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRow {
    pub id: i64,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of a find-or-create on a direct conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectConversation {
    pub id: i64,
    pub created: bool,
}
