pub mod conversations;
pub mod error;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags};
use tracing::info;

pub use error::{Error, Result};

const DEFAULT_READERS: usize = 4;
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool sizing and per-call limits.
#[derive(Debug, Clone, Copy)]
pub struct DbOptions {
    /// Read-only connections next to the single writer.
    pub readers: usize,
    /// Longest wait for a free connection before giving up.
    pub query_timeout: Duration,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            readers: DEFAULT_READERS,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// SQLite database with a reader/writer split.
///
/// Writes are serialized through one connection. Reads round-robin over a
/// small pool of read-only connections, which WAL mode lets run next to the
/// writer. An in-memory database has no readers and reads from the writer.
///
/// The query timeout bounds how long a caller waits to check a connection
/// out. Work that already holds a connection always runs to completion, so
/// a `Timeout` means nothing was executed for that checkout.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
    query_timeout: Duration,
}

impl Database {
    pub fn open(path: &Path, options: DbOptions) -> Result<Self> {
        let writer = Connection::open(path)?;

        // WAL mode for concurrent reads
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        writer.busy_timeout(options.query_timeout)?;
        register_functions(&writer)?;

        migrations::run(&writer)?;

        let reader_count = options.readers.max(1);
        let mut readers = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(options.query_timeout)?;
            register_functions(&conn)?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Database opened at {} (1 writer + {} readers)",
            path.display(),
            reader_count
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
            query_timeout: options.query_timeout,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        register_functions(&conn)?;

        migrations::run(&conn)?;

        Ok(Self {
            writer: Mutex::new(conn),
            readers: Vec::new(),
            reader_idx: AtomicUsize::new(0),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        if self.readers.is_empty() {
            return self.with_conn_mut(f);
        }

        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .try_lock_for(self.query_timeout)
            .ok_or(Error::Timeout(self.query_timeout))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .writer
            .try_lock_for(self.query_timeout)
            .ok_or(Error::Timeout(self.query_timeout))?;
        f(&conn)
    }

    /// Run a blocking database call on the blocking pool.
    ///
    /// Each connection checkout inside `f` waits at most the query timeout
    /// and fails with `Error::Timeout` before touching any data. Once `f`
    /// holds a connection its statements finish and their result is returned.
    pub async fn run<F, T>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }

    /// Override the connection checkout timeout.
    pub fn with_query_timeout(mut self, limit: Duration) -> Self {
        self.query_timeout = limit;
        self
    }
}

/// SQL helpers every connection needs. `unicode_lower` folds case beyond
/// ASCII, which the built-in `lower()` and `LIKE` do not.
fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_executes_on_blocking_pool() {
        let db = Arc::new(testing::db());
        let id = testing::user(&db, "Ana");

        let profile = db.run(move |db| db.get_user_by_id(id)).await.unwrap();
        assert_eq!(profile.unwrap().name, "Ana");
    }

    /// Hold the writer from another thread until the returned sender is
    /// dropped or signalled.
    fn hold_writer(db: &Arc<Database>) -> (std::sync::mpsc::Sender<()>, std::thread::JoinHandle<()>) {
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let holder = Arc::clone(db);
        let handle = std::thread::spawn(move || {
            holder
                .with_conn_mut(|_| {
                    locked_tx.send(()).unwrap();
                    let _ = release_rx.recv();
                    Ok(())
                })
                .unwrap();
        });
        locked_rx.recv().unwrap();
        (release_tx, handle)
    }

    #[tokio::test]
    async fn checkout_timeout_leaves_no_write_behind() {
        let db = Arc::new(testing::db().with_query_timeout(Duration::from_millis(30)));
        let (release, holder) = hold_writer(&db);

        let res = db
            .run(|db| db.create_user("Late", "late@example.com", "h", None))
            .await;
        assert!(matches!(res, Err(Error::Timeout(_))));

        release.send(()).unwrap();
        holder.join().unwrap();
        assert!(db.get_user_by_email("late@example.com").unwrap().is_none());
    }

    #[tokio::test]
    async fn started_work_runs_past_the_timeout() {
        let db = Arc::new(testing::db().with_query_timeout(Duration::from_millis(20)));

        let profile = db
            .run(|db| {
                db.with_conn_mut(|conn| {
                    std::thread::sleep(Duration::from_millis(80));
                    conn.execute(
                        "INSERT INTO users (name, email, password_hash, created_at)
                         VALUES ('Slow', 'slow@example.com', 'h', ?1)",
                        [chrono::Utc::now()],
                    )?;
                    Ok(conn.last_insert_rowid())
                })
            })
            .await
            .unwrap();

        assert_eq!(db.get_user_by_id(profile).unwrap().unwrap().name, "Slow");
    }

    #[test]
    fn unicode_lower_folds_accents() {
        let db = testing::db();
        let folded: String = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT unicode_lower('ÁLVARO Ção')", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(folded, "álvaro ção");
    }

    #[test]
    fn file_backed_pool_reads_committed_writes() {
        let path = std::env::temp_dir().join(format!("agora-{}.db", uuid::Uuid::new_v4()));
        let db = Database::open(
            &path,
            DbOptions {
                readers: 2,
                ..DbOptions::default()
            },
        )
        .unwrap();

        let id = testing::user(&db, "Bia");
        for _ in 0..3 {
            assert_eq!(db.get_user_by_id(id).unwrap().unwrap().name, "Bia");
        }

        drop(db);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}
