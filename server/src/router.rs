//! Per-connection read loop and the message dispatch table.
//!
//! Each connection is served by one task running [`Router::serve_connection`]:
//! frames are decoded and handled strictly in arrival order, one at a time.
//! Handlers decide per message type whether to broadcast first and persist
//! later (`move`), persist first and then fan out (`create`, `change_name`),
//! only touch storage (`save_drawing`, `control_player`), or only relay
//! (`delete_player` and the transient combat effects).

use crate::codec::{self, Request};
use crate::connection::ConnectionId;
use crate::hub::Hub;
use crate::store::{NewPlayer, Store};
use crate::transport::{FrameSink, FrameStream};
use gather_shared::{
    kind, ChangeNamePayload, ControlPlayerPayload, CreatePayload, DeletePlayerPayload, Envelope,
    MovePayload, Player, SaveDrawingPayload, PALETTE, WORLD_HEIGHT, WORLD_WIDTH,
};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Colour and position handed to a freshly created player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnPoint {
    pub color: &'static str,
    pub x: i32,
    pub y: i32,
}

/// Picks a palette colour and a position inside the world bounds.
pub fn spawn_point<R: Rng>(rng: &mut R) -> SpawnPoint {
    SpawnPoint {
        color: PALETTE[rng.gen_range(0..PALETTE.len())],
        x: rng.gen_range(0..WORLD_WIDTH),
        y: rng.gen_range(0..WORLD_HEIGHT),
    }
}

pub struct Router {
    hub: Arc<Hub>,
    store: Arc<dyn Store>,
    rng: Mutex<StdRng>,
}

impl Router {
    pub fn new(hub: Arc<Hub>, store: Arc<dyn Store>, rng: StdRng) -> Self {
        Self {
            hub,
            store,
            rng: Mutex::new(rng),
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Runs one connection from registration to unregistration.
    ///
    /// Returns when the peer closes the channel, a read fails, or the hub has
    /// closed the connection (eviction or shutdown).
    pub async fn serve_connection<S, R>(&self, sink: S, mut stream: R)
    where
        S: FrameSink,
        R: FrameStream,
    {
        let mut registration = self.hub.register(sink).await;
        let id = registration.id();
        registration.greet(self.greeting().await);

        loop {
            let frame = tokio::select! {
                _ = registration.closed() => {
                    debug!("Connection {} closed by the server", id);
                    break;
                }
                frame = stream.receive() => frame,
            };

            match frame {
                Ok(Some(bytes)) => self.dispatch(id, &bytes).await,
                Ok(None) => {
                    info!("Connection {} closed by peer", id);
                    break;
                }
                Err(e) => {
                    warn!("Connection {} read failed: {}", id, e);
                    break;
                }
            }
        }

        self.hub.unregister(id).await;
    }

    /// One `new_player` per persisted player, written before anything else.
    pub async fn greeting(&self) -> Vec<Envelope> {
        let players = match self.store.list_players().await {
            Ok(players) => players,
            Err(e) => {
                error!("Failed to load players for join snapshot: {}", e);
                return Vec::new();
            }
        };

        players
            .iter()
            .filter_map(|player| match codec::encode(kind::NEW_PLAYER, player) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    error!("{}", e);
                    None
                }
            })
            .collect()
    }

    /// Decodes and handles a single frame from `from`.
    pub async fn dispatch(&self, from: ConnectionId, frame: &[u8]) {
        let request = match codec::decode(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!("Dropping message from connection {}: {}", from, e);
                return;
            }
        };
        debug!("Connection {} sent {}", from, request.kind());

        match request {
            Request::Move(payload) => self.handle_move(payload).await,
            Request::Create(payload) => self.handle_create(from, payload).await,
            Request::ChangeName(payload) => self.handle_change_name(payload).await,
            Request::GetPlayers => self.handle_get_players(from).await,
            Request::ControlPlayer(payload) => self.handle_control_player(payload).await,
            Request::SaveDrawing(payload) => self.handle_save_drawing(payload).await,
            Request::DeletePlayer(payload) => self.handle_delete_player(payload).await,
            Request::HealthChange(payload) => self.broadcast(kind::HEALTH_CHANGE, &payload).await,
            Request::SpawnBullet(payload) => self.broadcast(kind::SPAWN_BULLET, &payload).await,
            Request::SpawnMedkit(payload) => self.broadcast(kind::SPAWN_MEDKIT, &payload).await,
        }
    }

    // Clients see the move right away; the position write trails behind.
    async fn handle_move(&self, payload: MovePayload) {
        self.broadcast(kind::MOVE, &payload).await;

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let MovePayload { id, x, y } = payload;
            if let Err(e) = store.update_player_position(id, x, y).await {
                error!("Failed to persist position of player {}: {}", id, e);
            }
        });
    }

    async fn handle_create(&self, from: ConnectionId, payload: CreatePayload) {
        let spawn = {
            let mut rng = self.rng.lock().await;
            spawn_point(&mut *rng)
        };

        let new_player = NewPlayer {
            name: payload.name.clone(),
            color: spawn.color.to_string(),
            x: spawn.x,
            y: spawn.y,
            account_id: payload.account_id,
        };
        let id = match self.store.insert_player(new_player).await {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to create player {:?}: {}", payload.name, e);
                return;
            }
        };
        let player = Player {
            id,
            name: payload.name,
            x: spawn.x,
            y: spawn.y,
            color: spawn.color.to_string(),
        };
        info!("Player {} ({}) created", player.id, player.name);

        if let Some(account_id) = payload.account_id {
            if let Err(e) = self
                .store
                .set_account_last_player(account_id, Some(id))
                .await
            {
                error!("Failed to link account {} to player {}: {}", account_id, id, e);
            }
        }

        self.reply(from, kind::CREATED, &player).await;
        self.broadcast(kind::NEW_PLAYER, &player).await;
    }

    async fn handle_change_name(&self, payload: ChangeNamePayload) {
        if let Err(e) = self
            .store
            .update_player_name(payload.id, &payload.name)
            .await
        {
            error!("Failed to rename player {}: {}", payload.id, e);
            return;
        }
        self.broadcast(kind::NAME_CHANGED, &payload).await;
    }

    async fn handle_get_players(&self, from: ConnectionId) {
        match self.store.list_players().await {
            Ok(players) => self.reply(from, kind::PLAYERS, &players).await,
            Err(e) => error!("Failed to list players: {}", e),
        }
    }

    // A missing player clears the account's reference instead of dangling.
    async fn handle_control_player(&self, payload: ControlPlayerPayload) {
        let ControlPlayerPayload {
            player_id,
            account_id,
        } = payload;

        let target = match self.store.player_exists(player_id).await {
            Ok(true) => Some(player_id),
            Ok(false) => {
                debug!(
                    "Account {} asked for missing player {}, clearing",
                    account_id, player_id
                );
                None
            }
            Err(e) => {
                error!("Failed to look up player {}: {}", player_id, e);
                return;
            }
        };

        if let Err(e) = self
            .store
            .set_account_last_player(account_id, target)
            .await
        {
            error!("Failed to update account {}: {}", account_id, e);
        }
    }

    async fn handle_save_drawing(&self, payload: SaveDrawingPayload) {
        if let Err(e) = self
            .store
            .append_drawing_stroke(payload.player_id, &payload.stroke)
            .await
        {
            error!(
                "Failed to save drawing for player {}: {}",
                payload.player_id, e
            );
        }
    }

    // Soft remove: clients drop the player, the row stays in storage.
    async fn handle_delete_player(&self, payload: DeletePlayerPayload) {
        self.broadcast(kind::PLAYER_DELETED, &payload).await;
    }

    async fn broadcast<T: Serialize>(&self, kind: &'static str, payload: &T) {
        match codec::encode(kind, payload) {
            Ok(envelope) => {
                self.hub.broadcast(envelope).await;
            }
            Err(e) => error!("{}", e),
        }
    }

    async fn reply<T: Serialize>(&self, to: ConnectionId, kind: &'static str, payload: &T) {
        match codec::encode(kind, payload) {
            Ok(envelope) => {
                if !self.hub.send_to(to, envelope).await {
                    debug!("Connection {} gone before {} reply", to, kind);
                }
            }
            Err(e) => error!("{}", e),
        }
    }
}
