use super::{now_millis, NewPlayer, Store, StoreError};
use async_trait::async_trait;
use gather_shared::{Player, Stroke};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredPlayer {
    player: Player,
    account_id: Option<i64>,
    created_at: i64,
}

/// A drawing row as the memory store keeps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawingRecord {
    pub player_id: i64,
    pub stroke: Stroke,
    pub created_at: i64,
}

#[derive(Debug)]
struct Tables {
    next_player_id: i64,
    players: BTreeMap<i64, StoredPlayer>,
    /// account id -> last controlled player
    accounts: HashMap<i64, Option<i64>>,
    drawings: Vec<DrawingRecord>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            next_player_id: 1,
            players: BTreeMap::new(),
            accounts: HashMap::new(),
            drawings: Vec::new(),
        }
    }
}

/// In-process store with the same observable behaviour as the SQL backend.
///
/// Player ids start at 1 and are never reused. Accounts must be seeded with
/// [`MemoryStore::add_account`] before `set_account_last_player` has any effect,
/// matching an `UPDATE ... WHERE id = ?` against a missing row. References to
/// players that do not exist fail with [`StoreError::MissingPlayer`] where the
/// SQL schema has a foreign key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_account(&self, account_id: i64) {
        self.tables
            .lock()
            .await
            .accounts
            .entry(account_id)
            .or_insert(None);
    }

    /// `None` when the account does not exist, `Some(None)` when it has no last player.
    pub async fn account_last_player(&self, account_id: i64) -> Option<Option<i64>> {
        self.tables.lock().await.accounts.get(&account_id).copied()
    }

    pub async fn player(&self, id: i64) -> Option<Player> {
        self.tables
            .lock()
            .await
            .players
            .get(&id)
            .map(|stored| stored.player.clone())
    }

    pub async fn player_account(&self, id: i64) -> Option<i64> {
        self.tables
            .lock()
            .await
            .players
            .get(&id)
            .and_then(|stored| stored.account_id)
    }

    pub async fn player_created_at(&self, id: i64) -> Option<i64> {
        self.tables
            .lock()
            .await
            .players
            .get(&id)
            .map(|stored| stored.created_at)
    }

    pub async fn drawings(&self) -> Vec<DrawingRecord> {
        self.tables.lock().await.drawings.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_player(&self, player: NewPlayer) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock().await;
        let id = tables.next_player_id;
        tables.next_player_id += 1;

        tables.players.insert(
            id,
            StoredPlayer {
                player: Player {
                    id,
                    name: player.name,
                    x: player.x,
                    y: player.y,
                    color: player.color,
                },
                account_id: player.account_id,
                created_at: now_millis(),
            },
        );
        Ok(id)
    }

    async fn update_player_position(&self, id: i64, x: i32, y: i32) -> Result<(), StoreError> {
        if let Some(stored) = self.tables.lock().await.players.get_mut(&id) {
            stored.player.x = x;
            stored.player.y = y;
        }
        Ok(())
    }

    async fn update_player_name(&self, id: i64, name: &str) -> Result<(), StoreError> {
        if let Some(stored) = self.tables.lock().await.players.get_mut(&id) {
            stored.player.name = name.to_string();
        }
        Ok(())
    }

    async fn list_players(&self) -> Result<Vec<Player>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .players
            .values()
            .map(|stored| stored.player.clone())
            .collect())
    }

    async fn player_exists(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.players.contains_key(&id))
    }

    async fn set_account_last_player(
        &self,
        account_id: i64,
        player_id: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.accounts.contains_key(&account_id) {
            return Ok(());
        }
        if let Some(player_id) = player_id {
            if !tables.players.contains_key(&player_id) {
                return Err(StoreError::MissingPlayer(player_id));
            }
        }
        tables.accounts.insert(account_id, player_id);
        Ok(())
    }

    async fn append_drawing_stroke(&self, player_id: i64, stroke: &Stroke) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.players.contains_key(&player_id) {
            return Err(StoreError::MissingPlayer(player_id));
        }
        tables.drawings.push(DrawingRecord {
            player_id,
            stroke: stroke.clone(),
            created_at: now_millis(),
        });
        Ok(())
    }
}
