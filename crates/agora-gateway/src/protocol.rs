use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use agora_db::Error;
use agora_types::events::{Authenticate, ClientEvent, ConversationRef, SendMessage, ServerEvent};

use crate::chat::ChatService;
use crate::registry::{ConnectionId, SessionRegistry};

/// Lifecycle of one live connection.
///
/// Conversation room membership is tracked by the registry; a connection may
/// sit in any number of rooms once it is authenticated (or even before).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated { user_id: i64 },
    Closed,
}

#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    state: SessionState,
}

impl Session {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user_id(&self) -> Option<i64> {
        match self.state {
            SessionState::Authenticated { user_id } => Some(user_id),
            _ => None,
        }
    }
}

/// Drives the per-connection event state machine.
///
/// `handle` is the single entry point for client events; every emission goes
/// through the session registry, so the handler runs the same with or without
/// a real transport behind it.
#[derive(Clone)]
pub struct ProtocolHandler {
    chat: ChatService,
}

impl ProtocolHandler {
    pub fn new(chat: ChatService) -> Self {
        Self { chat }
    }

    fn registry(&self) -> &SessionRegistry {
        self.chat.registry()
    }

    /// Register a new connection in the `Unauthenticated` state.
    pub async fn open(&self) -> (Session, mpsc::UnboundedReceiver<ServerEvent>) {
        let (id, rx) = self.registry().connect().await;
        debug!("Connection {} opened", id);
        (
            Session {
                id,
                state: SessionState::Unauthenticated,
            },
            rx,
        )
    }

    /// Parse one text frame and dispatch it. Malformed input is answered with
    /// `error_message` and leaves the session untouched.
    pub async fn handle_text(&self, session: &mut Session, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle(session, event).await,
            Err(e) => {
                warn!(
                    "Connection {} sent a bad event: {} -- raw: {}",
                    session.id,
                    e,
                    truncate(text, 200)
                );
                self.reply(session, ServerEvent::error(format!("invalid request: {e}")))
                    .await;
            }
        }
    }

    pub async fn handle(&self, session: &mut Session, event: ClientEvent) {
        if session.state == SessionState::Closed {
            warn!("Event on closed connection {} ignored", session.id);
            return;
        }

        match event {
            ClientEvent::Authenticate(req) => self.authenticate(session, req).await,
            ClientEvent::SendMessage(req) => self.send_message(session, req).await,
            ClientEvent::MarkAsRead(req) => self.mark_as_read(session, req).await,
            ClientEvent::Typing(req) => self.typing(session, req).await,
            // Join and leave are accepted in any open state, authenticated or
            // not. They only change room membership and return no data.
            ClientEvent::JoinConversation(ConversationRef { conversation_id }) => {
                if self.registry().join(session.id, conversation_id).await {
                    debug!("Connection {} joined conversation {}", session.id, conversation_id);
                }
            }
            ClientEvent::LeaveConversation(ConversationRef { conversation_id }) => {
                if self.registry().leave(session.id, conversation_id).await {
                    debug!("Connection {} left conversation {}", session.id, conversation_id);
                }
            }
        }
    }

    /// Release every membership of the connection. Nothing is persisted.
    pub async fn close(&self, session: &mut Session) {
        if session.state == SessionState::Closed {
            return;
        }
        self.disconnect(session.id).await;
        session.state = SessionState::Closed;
    }

    /// Same as `close` for callers that no longer hold the session.
    pub async fn disconnect(&self, id: ConnectionId) {
        self.registry().forget(id).await;
        debug!("Connection {} forgotten", id);
    }

    async fn authenticate(&self, session: &mut Session, req: Authenticate) {
        if let SessionState::Authenticated { user_id } = session.state {
            warn!("Connection {} already authenticated as {}", session.id, user_id);
            self.reply(session, ServerEvent::error("already authenticated"))
                .await;
            return;
        }

        let Some(user_id) = req.user_id else {
            self.reply(session, auth_failed()).await;
            return;
        };

        let rooms = match self.chat.get_user(user_id).await {
            Ok(Some(_)) => self.chat.rooms_for(user_id).await,
            Ok(None) => Err(Error::NotFound("user")),
            Err(e) => Err(e),
        };
        let rooms = match rooms {
            Ok(rooms) => rooms,
            Err(e) => {
                log_failure(session.id, "authenticate", &e);
                self.reply(session, auth_failed()).await;
                return;
            }
        };

        self.registry().authenticate(session.id, user_id, &rooms).await;
        session.state = SessionState::Authenticated { user_id };
        info!(
            "User {} authenticated on connection {} and joined {} conversations",
            user_id,
            session.id,
            rooms.len()
        );
        self.reply(
            session,
            ServerEvent::Authenticated {
                success: true,
                user_id: Some(user_id),
            },
        )
        .await;
    }

    async fn send_message(&self, session: &mut Session, req: SendMessage) {
        let Some(user_id) = self.require_identity(session).await else {
            return;
        };
        let (Some(conversation_id), Some(content)) = (req.conversation_id, req.content) else {
            self.reply(session, ServerEvent::error("incomplete data")).await;
            return;
        };

        if let Err(e) = self.chat.send_message(conversation_id, user_id, content).await {
            log_failure(session.id, "send_message", &e);
            self.reply(session, ServerEvent::error(user_message(&e))).await;
        }
    }

    async fn mark_as_read(&self, session: &mut Session, req: ConversationRef) {
        let Some(user_id) = self.require_identity(session).await else {
            return;
        };

        if let Err(e) = self.chat.mark_read(req.conversation_id, user_id).await {
            log_failure(session.id, "mark_as_read", &e);
            self.reply(session, ServerEvent::error(user_message(&e))).await;
        }
    }

    async fn typing(&self, session: &mut Session, req: ConversationRef) {
        let Some(user_id) = self.require_identity(session).await else {
            return;
        };

        self.registry()
            .broadcast(
                req.conversation_id,
                ServerEvent::UserTyping {
                    conversation_id: req.conversation_id,
                    user_id,
                },
            )
            .await;
    }

    async fn require_identity(&self, session: &Session) -> Option<i64> {
        let user_id = session.user_id();
        if user_id.is_none() {
            self.reply(session, ServerEvent::error("not authenticated"))
                .await;
        }
        user_id
    }

    /// Deliver an event to this connection only.
    pub async fn reply(&self, session: &Session, event: ServerEvent) {
        self.registry().send_to(session.id, event).await;
    }
}

fn auth_failed() -> ServerEvent {
    ServerEvent::Authenticated {
        success: false,
        user_id: None,
    }
}

/// Text shown to the client. Internal detail stays in the logs.
pub fn user_message(err: &Error) -> String {
    match err {
        Error::InvalidRequest(msg) => msg.clone(),
        Error::NotFound(what) => format!("{what} not found"),
        Error::Forbidden => "not a participant of this conversation".into(),
        Error::Timeout(_) => "request timed out, try again".into(),
        Error::Conflict(_) | Error::Sqlite(_) | Error::Task(_) => {
            "internal error".into()
        }
    }
}

fn log_failure(id: ConnectionId, action: &str, err: &Error) {
    if err.is_internal() {
        error!("Connection {} {} failed: {}", id, action, err);
    } else {
        debug!("Connection {} {} rejected: {}", id, action, err);
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
