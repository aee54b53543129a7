//! Persistence gateway consumed by the router.
//!
//! The router never speaks SQL; it calls the narrow [`Store`] trait and lets the
//! backend worry about connections and statements. Two backends ship with the
//! server:
//! - [`MemoryStore`] keeps everything in process and backs tests and
//!   database-less runs
//! - [`SqliteStore`] persists to a SQLite file through rusqlite
//!
//! Backends follow SQL update semantics: touching a row that does not exist is
//! not an error, it simply changes nothing.

mod memory;
mod sqlite;

pub use memory::{DrawingRecord, MemoryStore};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use gather_shared::{Player, Stroke};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("store connection lock poisoned")]
    Poisoned,
    #[error("player {0} does not exist")]
    MissingPlayer(i64),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Fields the router supplies when allocating a player; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPlayer {
    pub name: String,
    pub color: String,
    pub x: i32,
    pub y: i32,
    pub account_id: Option<i64>,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Inserts a player and returns the id assigned by storage.
    async fn insert_player(&self, player: NewPlayer) -> Result<i64, StoreError>;

    async fn update_player_position(&self, id: i64, x: i32, y: i32) -> Result<(), StoreError>;

    async fn update_player_name(&self, id: i64, name: &str) -> Result<(), StoreError>;

    /// All players ordered by id.
    async fn list_players(&self) -> Result<Vec<Player>, StoreError>;

    async fn player_exists(&self, id: i64) -> Result<bool, StoreError>;

    /// Points an account at the player it last controlled, or clears it with `None`.
    async fn set_account_last_player(
        &self,
        account_id: i64,
        player_id: Option<i64>,
    ) -> Result<(), StoreError>;

    async fn append_drawing_stroke(&self, player_id: i64, stroke: &Stroke) -> Result<(), StoreError>;
}

// Unix time in milliseconds for created_at columns
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis()
        .min(i64::MAX as u128) as i64
}
