//! Wire vocabulary shared by the gather server and its clients.
//!
//! Every message on the real-time channel is an [`Envelope`]: a `type`
//! discriminator plus a `data` payload whose shape depends on the type. The
//! payload structs below describe those shapes; the server decodes them at
//! its router boundary and re-encodes them when fanning state out.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const WORLD_WIDTH: i32 = 800;
pub const WORLD_HEIGHT: i32 = 600;

/// Outbound queue slots per connection before it counts as a slow consumer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Colours handed out to newly created players.
pub const PALETTE: [&str; 17] = [
    "teal",
    "tomato",
    "orange",
    "green",
    "gold",
    "pink",
    "cyan",
    "magenta",
    "lime",
    "coral",
    "brown",
    "orchid",
    "lightblue",
    "lightgreen",
    "khaki",
    "peachpuff",
    "lavender",
];

/// Envelope `type` values, inbound and outbound.
pub mod kind {
    pub const MOVE: &str = "move";
    pub const CREATE: &str = "create";
    pub const CHANGE_NAME: &str = "change_name";
    pub const GET_PLAYERS: &str = "get_players";
    pub const CONTROL_PLAYER: &str = "control_player";
    pub const SAVE_DRAWING: &str = "save_drawing";
    pub const DELETE_PLAYER: &str = "delete_player";
    pub const HEALTH_CHANGE: &str = "health_change";
    pub const SPAWN_BULLET: &str = "spawn_bullet";
    pub const SPAWN_MEDKIT: &str = "spawn_medkit";

    pub const CREATED: &str = "created";
    pub const NEW_PLAYER: &str = "new_player";
    pub const PLAYERS: &str = "players";
    pub const NAME_CHANGED: &str = "name_changed";
    pub const PLAYER_DELETED: &str = "player_deleted";
}

/// A single message on the wire: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    /// Missing `data` decodes as `null`.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new<T: Serialize>(kind: &str, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: kind.to_string(),
            data: serde_json::to_value(data)?,
        })
    }
}

/// A player as clients see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: i64,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovePayload {
    pub id: i64,
    #[serde(deserialize_with = "truncating_i32")]
    pub x: i32,
    #[serde(deserialize_with = "truncating_i32")]
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayload {
    pub name: String,
    #[serde(default)]
    pub account_id: Option<i64>,
}

/// Inbound `change_name` and outbound `name_changed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNamePayload {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlayerPayload {
    pub player_id: i64,
    pub account_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDrawingPayload {
    pub player_id: i64,
    #[serde(flatten)]
    pub stroke: Stroke,
}

/// What a drawing record holds: either a positioned dot or an opaque image blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stroke {
    Dot {
        #[serde(deserialize_with = "truncating_i32")]
        x: i32,
        #[serde(deserialize_with = "truncating_i32")]
        y: i32,
        color: String,
        #[serde(deserialize_with = "truncating_i32")]
        size: i32,
    },
    Image {
        image: String,
    },
}

/// Inbound `delete_player` and outbound `player_deleted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePlayerPayload {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthChangePayload {
    pub id: i64,
    pub health: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnBulletPayload {
    pub owner_id: i64,
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnMedkitPayload {
    pub x: f32,
    pub y: f32,
}

/// Accepts any JSON number and truncates it toward zero.
///
/// Browsers compute positions in floating point, so `12.5` is as valid as `12`.
/// Non-finite or out-of-range values are rejected.
pub fn truncating_i32<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value < i32::MIN as f64 || value > i32::MAX as f64 {
        return Err(serde::de::Error::custom(format!(
            "number {} does not fit a coordinate",
            value
        )));
    }
    Ok(value.trunc() as i32)
}
