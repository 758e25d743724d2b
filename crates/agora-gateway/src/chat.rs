use std::sync::Arc;

use tracing::{debug, info};

use agora_db::{Database, Error, Result};
use agora_types::events::ServerEvent;
use agora_types::models::{ConversationKind, ConversationSummary, Message, UserProfile};

use crate::registry::SessionRegistry;

/// Chat operations shared by the REST routes and the live channel.
///
/// Every storage call goes through `Database::run`, so a stalled query turns
/// into `Error::Timeout` for the caller instead of wedging it.
#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    registry: SessionRegistry,
}

impl ChatService {
    pub fn new(db: Arc<Database>, registry: SessionRegistry) -> Self {
        Self { db, registry }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<UserProfile>> {
        self.db.run(move |db| db.get_user_by_id(user_id)).await
    }

    /// Conversations whose rooms a freshly authenticated connection joins.
    pub async fn rooms_for(&self, user_id: i64) -> Result<Vec<i64>> {
        self.db
            .run(move |db| db.conversation_ids_for_user(user_id))
            .await
    }

    /// Persist a message and broadcast `new_message` to the conversation room.
    pub async fn send_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        content: String,
    ) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(Error::InvalidRequest("message content is empty".into()));
        }

        let message = self
            .db
            .run(move |db| {
                if db.get_conversation(conversation_id)?.is_none() {
                    return Err(Error::NotFound("conversation"));
                }
                if !db.is_active_participant(conversation_id, sender_id)? {
                    return Err(Error::Forbidden);
                }
                db.append_message(conversation_id, sender_id, &content)
            })
            .await?;

        let delivered = self
            .registry
            .broadcast(conversation_id, ServerEvent::NewMessage(message.clone()))
            .await;
        debug!(
            "Message {} in conversation {} delivered to {} connections",
            message.id, conversation_id, delivered
        );
        Ok(message)
    }

    /// Mark the other participants' messages read and broadcast `messages_read`.
    pub async fn mark_read(&self, conversation_id: i64, reader_id: i64) -> Result<usize> {
        let changed = self
            .db
            .run(move |db| {
                if !db.is_active_participant(conversation_id, reader_id)? {
                    return Err(Error::Forbidden);
                }
                db.mark_read(conversation_id, reader_id)
            })
            .await?;

        self.registry
            .broadcast(
                conversation_id,
                ServerEvent::MessagesRead {
                    conversation_id,
                    user_id: reader_id,
                },
            )
            .await;
        Ok(changed)
    }

    /// Full history as seen by `viewer_id`. Opening a conversation reads it:
    /// the other party's messages are marked read first.
    pub async fn history_for(&self, conversation_id: i64, viewer_id: i64) -> Result<Vec<Message>> {
        let (changed, history) = self
            .db
            .run(move |db| {
                if db.get_conversation(conversation_id)?.is_none() {
                    return Err(Error::NotFound("conversation"));
                }
                if !db.is_active_participant(conversation_id, viewer_id)? {
                    return Err(Error::Forbidden);
                }
                let changed = db.mark_read(conversation_id, viewer_id)?;
                Ok((changed, db.history(conversation_id)?))
            })
            .await?;

        if changed > 0 {
            self.registry
                .broadcast(
                    conversation_id,
                    ServerEvent::MessagesRead {
                        conversation_id,
                        user_id: viewer_id,
                    },
                )
                .await;
        }
        Ok(history)
    }

    pub async fn find_or_create_direct(&self, a: i64, b: i64) -> Result<i64> {
        let conversation = self
            .db
            .run(move |db| db.find_or_create_direct(a, b))
            .await?;
        Ok(conversation.id)
    }

    /// Start a conversation between two users. Direct conversations are
    /// deduplicated per pair; groups are always new.
    pub async fn create_conversation(
        &self,
        user_id: i64,
        other_user_id: i64,
        kind: ConversationKind,
        name: Option<String>,
    ) -> Result<i64> {
        match kind {
            ConversationKind::Direct => self.find_or_create_direct(user_id, other_user_id).await,
            ConversationKind::Group => {
                if user_id == other_user_id {
                    return Err(Error::InvalidRequest(
                        "cannot start a conversation with yourself".into(),
                    ));
                }
                self.db
                    .run(move |db| db.create_group(name.as_deref(), &[user_id, other_user_id]))
                    .await
            }
        }
    }

    pub async fn list_conversations(&self, user_id: i64) -> Result<Vec<ConversationSummary>> {
        self.db.run(move |db| db.list_conversations(user_id)).await
    }

    /// Delete a conversation and detach every live connection from its room.
    pub async fn delete_conversation(&self, conversation_id: i64, requester_id: i64) -> Result<()> {
        self.db
            .run(move |db| db.delete_conversation(conversation_id, requester_id))
            .await?;
        self.registry.close_room(conversation_id).await;
        info!(
            "Conversation {} closed after delete by user {}",
            conversation_id, requester_id
        );
        Ok(())
    }

    pub async fn search_users(&self, term: String, requester_id: i64) -> Result<Vec<UserProfile>> {
        self.db
            .run(move |db| db.search_users(&term, requester_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agora_types::models::MessageStatus;

    use super::*;

    struct Fixture {
        chat: ChatService,
        ana: i64,
        bruno: i64,
        carla: i64,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let ana = db.create_user("Ana", "ana@example.com", "h", None).unwrap().id;
        let bruno = db.create_user("Bruno", "bruno@example.com", "h", None).unwrap().id;
        let carla = db.create_user("Carla", "carla@example.com", "h", None).unwrap().id;
        Fixture {
            chat: ChatService::new(Arc::new(db), SessionRegistry::new()),
            ana,
            bruno,
            carla,
        }
    }

    #[tokio::test]
    async fn read_receipt_scenario() {
        let f = fixture();
        let conv = f.chat.find_or_create_direct(f.ana, f.bruno).await.unwrap();

        let msg = f.chat.send_message(conv, f.ana, "hi".into()).await.unwrap();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.conversation_id, conv);

        let list = f.chat.list_conversations(f.bruno).await.unwrap();
        assert_eq!(list[0].unread_count, 1);

        let history = f.chat.history_for(conv, f.bruno).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, MessageStatus::Read);

        let list = f.chat.list_conversations(f.bruno).await.unwrap();
        assert_eq!(list[0].unread_count, 0);
    }

    #[tokio::test]
    async fn send_broadcasts_to_room() {
        let f = fixture();
        let conv = f.chat.find_or_create_direct(f.ana, f.bruno).await.unwrap();
        let (listener, mut rx) = f.chat.registry().connect().await;
        f.chat.registry().join(listener, conv).await;

        let msg = f.chat.send_message(conv, f.ana, "hi".into()).await.unwrap();

        assert_eq!(rx.try_recv().unwrap(), ServerEvent::NewMessage(msg));
    }

    #[tokio::test]
    async fn outsiders_cannot_send_read_or_view() {
        let f = fixture();
        let conv = f.chat.find_or_create_direct(f.ana, f.bruno).await.unwrap();

        assert!(matches!(
            f.chat.send_message(conv, f.carla, "hey".into()).await,
            Err(Error::Forbidden)
        ));
        assert!(matches!(
            f.chat.mark_read(conv, f.carla).await,
            Err(Error::Forbidden)
        ));
        assert!(matches!(
            f.chat.history_for(conv, f.carla).await,
            Err(Error::Forbidden)
        ));
    }

    #[tokio::test]
    async fn blank_message_is_invalid() {
        let f = fixture();
        let conv = f.chat.find_or_create_direct(f.ana, f.bruno).await.unwrap();
        assert!(matches!(
            f.chat.send_message(conv, f.ana, " \n".into()).await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn mark_read_twice_reports_zero_the_second_time() {
        let f = fixture();
        let conv = f.chat.find_or_create_direct(f.ana, f.bruno).await.unwrap();
        f.chat.send_message(conv, f.ana, "one".into()).await.unwrap();
        f.chat.send_message(conv, f.ana, "two".into()).await.unwrap();

        assert_eq!(f.chat.mark_read(conv, f.bruno).await.unwrap(), 2);
        assert_eq!(f.chat.mark_read(conv, f.bruno).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_closes_room_and_later_reads_are_not_found() {
        let f = fixture();
        let conv = f.chat.find_or_create_direct(f.ana, f.bruno).await.unwrap();
        f.chat.send_message(conv, f.ana, "hi".into()).await.unwrap();
        let (listener, _rx) = f.chat.registry().connect().await;
        f.chat.registry().join(listener, conv).await;

        assert!(matches!(
            f.chat.delete_conversation(conv, f.carla).await,
            Err(Error::Forbidden)
        ));
        assert_eq!(f.chat.registry().room_size(conv).await, 1);

        f.chat.delete_conversation(conv, f.ana).await.unwrap();
        assert_eq!(f.chat.registry().room_size(conv).await, 0);
        assert!(matches!(
            f.chat.history_for(conv, f.ana).await,
            Err(Error::NotFound("conversation"))
        ));
    }

    #[tokio::test]
    async fn group_conversations_are_not_deduplicated() {
        let f = fixture();
        let first = f
            .chat
            .create_conversation(f.ana, f.bruno, ConversationKind::Group, Some("a".into()))
            .await
            .unwrap();
        let second = f
            .chat
            .create_conversation(f.ana, f.bruno, ConversationKind::Group, None)
            .await
            .unwrap();
        let direct = f
            .chat
            .create_conversation(f.ana, f.bruno, ConversationKind::Direct, None)
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(
            direct,
            f.chat.find_or_create_direct(f.bruno, f.ana).await.unwrap()
        );
    }

    #[tokio::test]
    async fn send_that_cannot_get_a_connection_is_not_persisted() {
        let db = Database::open_in_memory()
            .unwrap()
            .with_query_timeout(Duration::from_millis(50));
        let ana = db.create_user("Ana", "ana@example.com", "h", None).unwrap().id;
        let bruno = db.create_user("Bruno", "bruno@example.com", "h", None).unwrap().id;
        let conv = db.find_or_create_direct(ana, bruno).unwrap().id;
        let db = Arc::new(db);
        let chat = ChatService::new(db.clone(), SessionRegistry::new());
        let (listener, mut rx) = chat.registry().connect().await;
        chat.registry().join(listener, conv).await;

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = db.clone();
        let busy = std::thread::spawn(move || {
            holder
                .with_conn_mut(|_| {
                    locked_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(150));
                    Ok(())
                })
                .unwrap();
        });
        locked_rx.recv().unwrap();

        let res = chat.send_message(conv, ana, "hi".into()).await;
        assert!(matches!(res, Err(Error::Timeout(_))));
        busy.join().unwrap();

        assert!(db.history(conv).unwrap().is_empty());
        assert!(rx.try_recv().is_err());

        let retried = chat.send_message(conv, ana, "hi".into()).await.unwrap();
        let stored: Vec<i64> = db.history(conv).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(stored, vec![retried.id]);
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::NewMessage(retried));
    }
}
