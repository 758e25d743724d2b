pub mod config;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use agora_api::{AppState, AppStateInner, auth, chat, users};
use agora_gateway::{ChatService, ProtocolHandler, connection};

pub use config::Config;

/// Assemble every route around one shared [`ChatService`].
pub fn router(chat: ChatService) -> Router {
    let handler = ProtocolHandler::new(chat.clone());
    let app_state: AppState = AppStateInner::new(chat);

    let public_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/cadastro", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/users", get(users::list_users))
        .route("/api/users/todos", get(users::list_users))
        .route("/api/users/update", put(users::update_user))
        .route("/api/users/{id}", get(users::get_user))
        .with_state(app_state.clone());

    let chat_routes = Router::new()
        .route("/api/chat/conversa", post(chat::find_or_create_direct))
        .route(
            "/api/chat/conversas/{id}",
            get(chat::list_conversations).delete(chat::delete_conversation),
        )
        .route("/api/chat/conversas/criar", post(chat::create_conversation))
        .route("/api/chat/mensagens/{conversa_id}", get(chat::history))
        .route("/api/chat/enviar", post(chat::send_message))
        .route("/api/chat/usuarios/buscar", get(chat::search_users))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(handler);

    Router::new()
        .merge(public_routes)
        .merge(chat_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(
    State(handler): State<ProtocolHandler>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, handler))
}
