//! REST surface of the chat. Every handler is a thin wrapper over
//! [`ChatService`](agora_gateway::ChatService), so the live channel and these
//! routes share validation, persistence and fan-out.

use axum::{Json, extract::State, response::IntoResponse};
use tracing::debug;

use agora_types::api::{
    ApiResponse, CreateConversationRequest, CreateConversationResponse, DeleteConversationRequest,
    DirectConversationRequest, DirectConversationResponse, HistoryQuery, SendMessageRequest,
    UserSearchQuery,
};
use agora_types::models::ConversationKind;

use crate::auth::AppState;
use crate::error::{ApiError, ApiJson, ApiPath, ApiQuery};

/// `POST /api/chat/conversa`
pub async fn find_or_create_direct(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DirectConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = state
        .chat
        .find_or_create_direct(req.first_user_id, req.second_user_id)
        .await?;
    Ok(Json(ApiResponse::ok(DirectConversationResponse {
        conversation_id,
    })))
}

/// `GET /api/chat/conversas/{usuario_id}`
pub async fn list_conversations(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.chat.list_conversations(user_id).await?;
    Ok(Json(ApiResponse::ok(conversations)))
}

/// `GET /api/chat/mensagens/{conversa_id}?usuarioId=`
///
/// Opening the history marks the other party's messages read.
pub async fn history(
    State(state): State<AppState>,
    ApiPath(conversation_id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .chat
        .history_for(conversation_id, query.user_id)
        .await?;
    Ok(Json(ApiResponse::ok(messages)))
}

/// `POST /api/chat/enviar`
pub async fn send_message(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .chat
        .send_message(req.conversation_id, req.user_id, req.content)
        .await?;
    debug!(
        "REST send: message {} in conversation {}",
        message.id, message.conversation_id
    );
    Ok(Json(ApiResponse::ok_with_message("message sent", message)))
}

/// `GET /api/chat/usuarios/buscar?termo=&usuarioId=`
pub async fn search_users(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<UserSearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state.chat.search_users(query.term, query.user_id).await?;
    Ok(Json(ApiResponse::ok(users)))
}

/// `POST /api/chat/conversas/criar`
pub async fn create_conversation(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = req.kind.unwrap_or(ConversationKind::Direct);
    let name = req.name.filter(|name| !name.trim().is_empty());
    let id = state
        .chat
        .create_conversation(req.user_id, req.other_user_id, kind, name)
        .await?;
    Ok(Json(ApiResponse::ok(CreateConversationResponse { id })))
}

/// `DELETE /api/chat/conversas/{conversa_id}` with `{usuarioId}` in the body.
pub async fn delete_conversation(
    State(state): State<AppState>,
    ApiPath(conversation_id): ApiPath<i64>,
    ApiJson(req): ApiJson<DeleteConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .chat
        .delete_conversation(conversation_id, req.user_id)
        .await?;
    Ok(Json(ApiResponse::done("conversation deleted")))
}
