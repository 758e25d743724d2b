use agora_types::models::{ConversationKind, ConversationSummary, LastMessage, UserProfile};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::{info, warn};

use crate::error::is_unique_violation;
use crate::models::{ConversationRow, DirectConversation};
use crate::users::user_exists;
use crate::{Database, Error, Result};

/// Storage key of a direct conversation: the pair in ascending order.
pub fn direct_key(a: i64, b: i64) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{low}:{high}")
}

impl Database {
    /// Return the direct conversation between `a` and `b`, creating it if needed.
    ///
    /// The UNIQUE index on `direct_key` is what guarantees a single row per
    /// pair. A losing concurrent insert re-reads the winner's row.
    pub fn find_or_create_direct(&self, a: i64, b: i64) -> Result<DirectConversation> {
        if a == b {
            return Err(Error::InvalidRequest(
                "cannot start a conversation with yourself".into(),
            ));
        }

        let key = direct_key(a, b);
        self.with_conn_mut(|conn| {
            for id in [a, b] {
                if !user_exists(conn, id)? {
                    return Err(Error::NotFound("user"));
                }
            }

            if let Some(id) = find_direct(conn, &key)? {
                return Ok(DirectConversation { id, created: false });
            }

            match insert_direct(conn, &key, a, b) {
                Ok(id) => {
                    info!("Created direct conversation {} for pair {}", id, key);
                    Ok(DirectConversation { id, created: true })
                }
                Err(e) if is_unique_violation(&e) => {
                    warn!("Direct conversation for pair {} already created, re-reading", key);
                    let id = find_direct(conn, &key)?
                        .ok_or_else(|| Error::Conflict(format!("direct conversation {key}")))?;
                    Ok(DirectConversation { id, created: false })
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Create a group conversation holding `members`, all active.
    pub fn create_group(&self, name: Option<&str>, members: &[i64]) -> Result<i64> {
        if members.len() < 2 {
            return Err(Error::InvalidRequest(
                "a group needs at least two members".into(),
            ));
        }

        self.with_conn_mut(|conn| {
            for &id in members {
                if !user_exists(conn, id)? {
                    return Err(Error::NotFound("user"));
                }
            }

            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO conversations (kind, name, created_at) VALUES ('group', ?1, ?2)",
                rusqlite::params![name, Utc::now()],
            )?;
            let id = tx.last_insert_rowid();
            for &member in members {
                tx.execute(
                    "INSERT OR IGNORE INTO participants (conversation_id, user_id) VALUES (?1, ?2)",
                    [id, member],
                )?;
            }
            tx.commit()?;

            info!("Created group conversation {} with {} members", id, members.len());
            Ok(id)
        })
    }

    pub fn get_conversation(&self, id: i64) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    pub fn is_active_participant(&self, conversation_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| active_participant(conn, conversation_id, user_id))
    }

    /// Ids of every conversation where `user_id` is an active participant.
    pub fn conversation_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id FROM participants
                 WHERE user_id = ?1 AND status = 'active'
                 ORDER BY conversation_id",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
    }

    /// The user's active conversations, most recent message first.
    /// Conversations without messages sort last, newest conversation first.
    pub fn list_conversations(&self, user_id: i64) -> Result<Vec<ConversationSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "WITH last AS (
                    SELECT m.conversation_id, m.id, m.user_id, m.content, m.sent_at,
                           ROW_NUMBER() OVER (
                               PARTITION BY m.conversation_id
                               ORDER BY m.sent_at DESC, m.id DESC
                           ) AS rn
                    FROM messages m
                 )
                 SELECT c.id, c.kind, c.name, c.created_at,
                        o.id, o.name, o.email, o.avatar, o.bio, o.created_at,
                        l.id, l.user_id, l.content, l.sent_at,
                        (SELECT COUNT(*) FROM messages u
                          WHERE u.conversation_id = c.id
                            AND u.user_id != ?1
                            AND u.status = 'sent') AS unread
                 FROM participants p
                 JOIN conversations c ON c.id = p.conversation_id
                 LEFT JOIN users o ON c.kind = 'direct' AND o.id = (
                     SELECT p2.user_id FROM participants p2
                     WHERE p2.conversation_id = c.id AND p2.user_id != ?1
                     LIMIT 1
                 )
                 LEFT JOIN last l ON l.conversation_id = c.id AND l.rn = 1
                 WHERE p.user_id = ?1 AND p.status = 'active'
                 ORDER BY l.sent_at IS NULL, l.sent_at DESC, l.id DESC, c.id DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    let kind: String = row.get(1)?;
                    let other_id: Option<i64> = row.get(4)?;
                    let other_user = match other_id {
                        Some(id) => Some(UserProfile {
                            id,
                            name: row.get(5)?,
                            email: row.get(6)?,
                            avatar: row.get(7)?,
                            bio: row.get(8)?,
                            created_at: row.get(9)?,
                        }),
                        None => None,
                    };
                    let last_id: Option<i64> = row.get(10)?;
                    let last_message = match last_id {
                        Some(id) => Some(LastMessage {
                            id,
                            sender_id: row.get(11)?,
                            content: row.get(12)?,
                            sent_at: row.get(13)?,
                        }),
                        None => None,
                    };

                    Ok(ConversationSummary {
                        id: row.get(0)?,
                        kind: parse_kind(&kind, 1)?,
                        name: row.get(2)?,
                        created_at: row.get(3)?,
                        other_user,
                        last_message,
                        unread_count: row.get(14)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Delete a conversation with its messages and participants.
    ///
    /// Only an active participant may delete. Rows go in dependency order,
    /// messages first, inside one transaction.
    pub fn delete_conversation(&self, conversation_id: i64, requester_id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            if query_conversation(conn, conversation_id)?.is_none() {
                return Err(Error::NotFound("conversation"));
            }
            if !active_participant(conn, conversation_id, requester_id)? {
                return Err(Error::Forbidden);
            }

            let tx = conn.unchecked_transaction()?;
            let messages = tx.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                [conversation_id],
            )?;
            tx.execute(
                "DELETE FROM participants WHERE conversation_id = ?1",
                [conversation_id],
            )?;
            tx.execute("DELETE FROM conversations WHERE id = ?1", [conversation_id])?;
            tx.commit()?;

            info!(
                "Conversation {} deleted by user {} ({} messages)",
                conversation_id, requester_id, messages
            );
            Ok(())
        })
    }
}

fn find_direct(conn: &Connection, key: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM conversations WHERE kind = 'direct' AND direct_key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?)
}

/// Conversation row plus both participants, committed together or not at all.
pub(crate) fn insert_direct(
    conn: &Connection,
    key: &str,
    a: i64,
    b: i64,
) -> rusqlite::Result<i64> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO conversations (kind, direct_key, created_at) VALUES ('direct', ?1, ?2)",
        rusqlite::params![key, Utc::now()],
    )?;
    let id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO participants (conversation_id, user_id) VALUES (?1, ?2), (?1, ?3)",
        [id, a, b],
    )?;
    tx.commit()?;
    Ok(id)
}

pub(crate) fn query_conversation(conn: &Connection, id: i64) -> Result<Option<ConversationRow>> {
    let row = conn
        .query_row(
            "SELECT id, kind, name, created_at FROM conversations WHERE id = ?1",
            [id],
            |row| {
                let kind: String = row.get(1)?;
                Ok(ConversationRow {
                    id: row.get(0)?,
                    kind: parse_kind(&kind, 1)?,
                    name: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn active_participant(
    conn: &Connection,
    conversation_id: i64,
    user_id: i64,
) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM participants
             WHERE conversation_id = ?1 AND user_id = ?2 AND status = 'active'",
            [conversation_id, user_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn parse_kind(kind: &str, column: usize) -> rusqlite::Result<ConversationKind> {
    ConversationKind::parse(kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            format!("unknown conversation kind {kind:?}").into(),
        )
    })
}
