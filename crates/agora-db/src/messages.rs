use agora_types::models::{Message, MessageStatus};
use chrono::Utc;
use rusqlite::Row;
use tracing::debug;

use crate::{Database, Error, Result};

impl Database {
    /// Append a message with status `sent`. Content must not be blank.
    ///
    /// Sender name and avatar are joined in so the result can be broadcast
    /// as-is.
    pub fn append_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(Error::InvalidRequest("message content is empty".into()));
        }

        let sent_at = Utc::now();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (conversation_id, user_id, content, sent_at, status)
                 VALUES (?1, ?2, ?3, ?4, 'sent')",
                rusqlite::params![conversation_id, sender_id, content, sent_at],
            )?;
            let id = conn.last_insert_rowid();

            let (sender_name, sender_avatar) = conn.query_row(
                "SELECT name, avatar FROM users WHERE id = ?1",
                [sender_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )?;

            debug!("Message {} appended to conversation {}", id, conversation_id);
            Ok(Message {
                id,
                conversation_id,
                sender_id,
                content: content.to_string(),
                sent_at,
                status: MessageStatus::Sent,
                sender_name: Some(sender_name),
                sender_avatar,
            })
        })
    }

    /// Full history in send order, ties broken by insertion order.
    pub fn history(&self, conversation_id: i64) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            // JOIN users to fetch sender name and avatar in a single query
            let mut stmt = conn.prepare(
                "SELECT m.id, m.conversation_id, m.user_id, m.content, m.sent_at, m.status,
                        u.name, u.avatar
                 FROM messages m
                 LEFT JOIN users u ON m.user_id = u.id
                 WHERE m.conversation_id = ?1
                 ORDER BY m.sent_at ASC, m.id ASC",
            )?;

            let rows = stmt
                .query_map([conversation_id], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Move every `sent` message not written by `reader_id` to `read`.
    /// Returns how many messages changed; zero is a normal outcome.
    pub fn mark_read(&self, conversation_id: i64, reader_id: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = 'read'
                 WHERE conversation_id = ?1 AND user_id != ?2 AND status = 'sent'",
                [conversation_id, reader_id],
            )?;
            if changed > 0 {
                debug!(
                    "Marked {} messages read in conversation {} for user {}",
                    changed, conversation_id, reader_id
                );
            }
            Ok(changed)
        })
    }

    /// Messages from others that `user_id` has not read yet.
    pub fn unread_count(&self, conversation_id: i64, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND user_id != ?2 AND status = 'sent'",
                [conversation_id, user_id],
                |row| row.get(0),
            )?)
        })
    }
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let status: String = row.get(5)?;
    let status = MessageStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown message status {status:?}").into(),
        )
    })?;

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        sent_at: row.get(4)?,
        status,
        sender_name: row.get(6)?,
        sender_avatar: row.get(7)?,
    })
}
