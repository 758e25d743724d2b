use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT NOT NULL,
                email           TEXT NOT NULL UNIQUE,
                password_hash   TEXT NOT NULL,
                avatar          TEXT,
                bio             TEXT,
                created_at      TEXT NOT NULL
            );

            -- direct_key is '<low id>:<high id>' for direct conversations, so the
            -- UNIQUE constraint allows one direct conversation per unordered pair.
            CREATE TABLE conversations (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                kind        TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
                name        TEXT,
                direct_key  TEXT UNIQUE,
                created_at  TEXT NOT NULL,
                CHECK ((kind = 'direct') = (direct_key IS NOT NULL))
            );

            CREATE TABLE participants (
                conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                user_id         INTEGER NOT NULL REFERENCES users(id),
                status          TEXT NOT NULL DEFAULT 'active'
                                CHECK (status IN ('active', 'left')),
                PRIMARY KEY (conversation_id, user_id)
            );

            CREATE INDEX idx_participants_user
                ON participants(user_id, status);

            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                user_id         INTEGER NOT NULL REFERENCES users(id),
                content         TEXT NOT NULL CHECK (length(content) > 0),
                sent_at         TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'sent'
                                CHECK (status IN ('sent', 'read'))
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, sent_at, id);

            CREATE TRIGGER messages_status_forward_only
                BEFORE UPDATE OF status ON messages
                WHEN OLD.status = 'read' AND NEW.status <> 'read'
            BEGIN
                SELECT RAISE(ABORT, 'message status cannot move back from read');
            END;

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
