use super::{now_millis, NewPlayer, Store, StoreError};
use async_trait::async_trait;
use gather_shared::{Player, Stroke};
use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS player (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT    NOT NULL,
    x          INTEGER NOT NULL DEFAULT 0,
    y          INTEGER NOT NULL DEFAULT 0,
    color      TEXT    NOT NULL,
    account_id INTEGER,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS account (
    id             INTEGER PRIMARY KEY,
    last_player_id INTEGER REFERENCES player(id)
);
CREATE TABLE IF NOT EXISTS drawing (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    player_id  INTEGER NOT NULL REFERENCES player(id),
    x          INTEGER,
    y          INTEGER,
    color      TEXT,
    size       INTEGER,
    image      TEXT    NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL
);
";

/// SQLite-backed store.
///
/// rusqlite is synchronous, so the connection sits behind a mutex and every
/// statement runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and makes sure the tables exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        info!(
            "Opened SQLite store at {} (journal mode {})",
            path.as_ref().display(),
            mode
        );
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn add_account(&self, account_id: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO account (id, last_player_id) VALUES (?1, NULL)",
                params![account_id],
            )?;
            Ok(())
        })
        .await
    }

    /// `None` when the account does not exist, `Some(None)` when it has no last player.
    pub async fn account_last_player(
        &self,
        account_id: i64,
    ) -> Result<Option<Option<i64>>, StoreError> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT last_player_id FROM account WHERE id = ?1",
                    params![account_id],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()?)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_player(&self, player: NewPlayer) -> Result<i64, StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO player (name, x, y, color, account_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    player.name,
                    player.x,
                    player.y,
                    player.color,
                    player.account_id,
                    now_millis()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn update_player_position(&self, id: i64, x: i32, y: i32) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE player SET x = ?1, y = ?2 WHERE id = ?3",
                params![x, y, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_player_name(&self, id: i64, name: &str) -> Result<(), StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE player SET name = ?1 WHERE id = ?2",
                params![name, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_players(&self) -> Result<Vec<Player>, StoreError> {
        self.with_conn(|conn| {
            let mut statement =
                conn.prepare("SELECT id, name, x, y, color FROM player ORDER BY id")?;
            let players = statement
                .query_map([], |row| {
                    Ok(Player {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        x: row.get(2)?,
                        y: row.get(3)?,
                        color: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(players)
        })
        .await
    }

    async fn player_exists(&self, id: i64) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row("SELECT 1 FROM player WHERE id = ?1", params![id], |_| Ok(()))
                .optional()?
                .is_some())
        })
        .await
    }

    async fn set_account_last_player(
        &self,
        account_id: i64,
        player_id: Option<i64>,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE account SET last_player_id = ?1 WHERE id = ?2",
                params![player_id, account_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_drawing_stroke(&self, player_id: i64, stroke: &Stroke) -> Result<(), StoreError> {
        let stroke = stroke.clone();
        self.with_conn(move |conn| {
            match stroke {
                Stroke::Dot { x, y, color, size } => conn.execute(
                    "INSERT INTO drawing (player_id, x, y, color, size, image, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, '', ?6)",
                    params![player_id, x, y, color, size, now_millis()],
                )?,
                Stroke::Image { image } => conn.execute(
                    "INSERT INTO drawing (player_id, image, created_at) VALUES (?1, ?2, ?3)",
                    params![player_id, image, now_millis()],
                )?,
            };
            Ok(())
        })
        .await
    }
}
