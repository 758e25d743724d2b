use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::ConversationKind;

/// Envelope every REST route answers with.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn ok_with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// Success that carries only a message.
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

// -- Auth --

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    #[serde(rename = "nome")]
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[validate(email(message = "invalid email"))]
    pub email: String,
    #[serde(rename = "senha")]
    #[validate(length(min = 6, message = "password must have at least 6 characters"))]
    pub password: String,
    #[serde(rename = "descricao", default)]
    pub bio: Option<String>,
}

/// Profile edit. A missing `senha` keeps the current password.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserRequest {
    #[serde(rename = "usuario_id")]
    pub user_id: i64,
    #[serde(rename = "nome")]
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[validate(email(message = "invalid email"))]
    pub email: String,
    #[serde(rename = "senha", default)]
    #[validate(length(min = 6, message = "password must have at least 6 characters"))]
    pub password: Option<String>,
    #[serde(rename = "descricao", default)]
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    #[serde(rename = "senha")]
    pub password: String,
}

// -- Chat --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectConversationRequest {
    #[serde(rename = "usuario1_id")]
    pub first_user_id: i64,
    #[serde(rename = "usuario2_id")]
    pub second_user_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DirectConversationResponse {
    #[serde(rename = "conversa_id")]
    pub conversation_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryQuery {
    #[serde(rename = "usuarioId", alias = "usuario_id")]
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(rename = "conversa_id")]
    pub conversation_id: i64,
    #[serde(rename = "usuario_id")]
    pub user_id: i64,
    #[serde(rename = "conteudo")]
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSearchQuery {
    #[serde(rename = "termo")]
    pub term: String,
    #[serde(rename = "usuarioId")]
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    #[serde(rename = "usuarioId")]
    pub user_id: i64,
    #[serde(rename = "outroUsuarioId")]
    pub other_user_id: i64,
    /// Defaults to `direct`. Accepts the legacy `individual` spelling.
    #[serde(rename = "tipo", default, deserialize_with = "de_kind")]
    pub kind: Option<ConversationKind>,
    #[serde(rename = "nome", default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateConversationResponse {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteConversationRequest {
    #[serde(rename = "usuarioId")]
    pub user_id: i64,
}

fn de_kind<'de, D>(deserializer: D) -> Result<Option<ConversationKind>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None => Ok(None),
        Some("individual") => Ok(Some(ConversationKind::Direct)),
        Some("grupo") => Ok(Some(ConversationKind::Group)),
        Some(other) => ConversationKind::parse(other)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown conversation kind: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_conversation_accepts_legacy_kind() {
        let req: CreateConversationRequest = serde_json::from_str(
            r#"{"usuarioId": 1, "outroUsuarioId": 2, "tipo": "individual"}"#,
        )
        .unwrap();
        assert_eq!(req.kind, Some(ConversationKind::Direct));

        let req: CreateConversationRequest =
            serde_json::from_str(r#"{"usuarioId": 1, "outroUsuarioId": 2}"#).unwrap();
        assert_eq!(req.kind, None);
    }

    #[test]
    fn create_conversation_rejects_unknown_kind() {
        let res = serde_json::from_str::<CreateConversationRequest>(
            r#"{"usuarioId": 1, "outroUsuarioId": 2, "tipo": "channel"}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res = serde_json::from_str::<SendMessageRequest>(
            r#"{"conversa_id": 1, "usuario_id": 2, "conteudo": "hi", "extra": true}"#,
        );
        assert!(res.is_err());
    }

    fn register(json: &str) -> RegisterRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn register_validation() {
        assert!(
            register(r#"{"nome": "Ana", "email": "ana@example.com", "senha": "segredo"}"#)
                .validate()
                .is_ok()
        );

        let errors = register(r#"{"nome": "", "email": "ana", "senha": "123"}"#)
            .validate()
            .unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password"));
    }

    #[test]
    fn update_password_is_optional_but_checked_when_present() {
        let keep: UpdateUserRequest = serde_json::from_str(
            r#"{"usuario_id": 1, "nome": "Ana", "email": "ana@example.com"}"#,
        )
        .unwrap();
        assert!(keep.validate().is_ok());
        assert!(keep.password.is_none());

        let short: UpdateUserRequest = serde_json::from_str(
            r#"{"usuario_id": 1, "nome": "Ana", "email": "ana@example.com", "senha": "1"}"#,
        )
        .unwrap();
        assert!(short.validate().is_err());
    }
}
