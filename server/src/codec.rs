//! Envelope codec: raw frame bytes to a typed [`Request`], typed payloads back to envelopes.
//!
//! Decoding happens in two steps. The frame must first parse as an
//! [`Envelope`]; its `data` is then validated against the shape required by its
//! `type`. Unknown types and shape mismatches are errors, never partial values.

use gather_shared::{
    kind, ChangeNamePayload, ControlPlayerPayload, CreatePayload, DeletePlayerPayload, Envelope,
    HealthChangePayload, MovePayload, SaveDrawingPayload, SpawnBulletPayload, SpawnMedkitPayload,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{kind} requires a non-empty name")]
    EmptyName { kind: &'static str },
    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Every inbound message the router understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Move(MovePayload),
    Create(CreatePayload),
    ChangeName(ChangeNamePayload),
    GetPlayers,
    ControlPlayer(ControlPlayerPayload),
    SaveDrawing(SaveDrawingPayload),
    DeletePlayer(DeletePlayerPayload),
    HealthChange(HealthChangePayload),
    SpawnBullet(SpawnBulletPayload),
    SpawnMedkit(SpawnMedkitPayload),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Move(_) => kind::MOVE,
            Request::Create(_) => kind::CREATE,
            Request::ChangeName(_) => kind::CHANGE_NAME,
            Request::GetPlayers => kind::GET_PLAYERS,
            Request::ControlPlayer(_) => kind::CONTROL_PLAYER,
            Request::SaveDrawing(_) => kind::SAVE_DRAWING,
            Request::DeletePlayer(_) => kind::DELETE_PLAYER,
            Request::HealthChange(_) => kind::HEALTH_CHANGE,
            Request::SpawnBullet(_) => kind::SPAWN_BULLET,
            Request::SpawnMedkit(_) => kind::SPAWN_MEDKIT,
        }
    }
}

impl TryFrom<Envelope> for Request {
    type Error = CodecError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let Envelope { kind: tag, data } = envelope;
        let request = match tag.as_str() {
            kind::MOVE => Request::Move(payload(kind::MOVE, data)?),
            kind::CREATE => {
                let mut create: CreatePayload = payload(kind::CREATE, data)?;
                create.name = non_empty_name(kind::CREATE, &create.name)?;
                Request::Create(create)
            }
            kind::CHANGE_NAME => {
                let mut change: ChangeNamePayload = payload(kind::CHANGE_NAME, data)?;
                change.name = non_empty_name(kind::CHANGE_NAME, &change.name)?;
                Request::ChangeName(change)
            }
            // payload, if any, is ignored
            kind::GET_PLAYERS => Request::GetPlayers,
            kind::CONTROL_PLAYER => Request::ControlPlayer(payload(kind::CONTROL_PLAYER, data)?),
            kind::SAVE_DRAWING => Request::SaveDrawing(payload(kind::SAVE_DRAWING, data)?),
            kind::DELETE_PLAYER => Request::DeletePlayer(payload(kind::DELETE_PLAYER, data)?),
            kind::HEALTH_CHANGE => Request::HealthChange(payload(kind::HEALTH_CHANGE, data)?),
            kind::SPAWN_BULLET => Request::SpawnBullet(payload(kind::SPAWN_BULLET, data)?),
            kind::SPAWN_MEDKIT => Request::SpawnMedkit(payload(kind::SPAWN_MEDKIT, data)?),
            _ => return Err(CodecError::UnknownType(tag)),
        };
        Ok(request)
    }
}

/// Decodes one inbound frame.
pub fn decode(frame: &[u8]) -> Result<Request, CodecError> {
    let envelope: Envelope = serde_json::from_slice(frame).map_err(CodecError::Malformed)?;
    Request::try_from(envelope)
}

/// Wraps an outbound payload in an envelope.
pub fn encode<T: Serialize>(kind: &'static str, payload: &T) -> Result<Envelope, CodecError> {
    Envelope::new(kind, payload).map_err(|source| CodecError::Encode { kind, source })
}

fn payload<T: DeserializeOwned>(kind: &'static str, data: Value) -> Result<T, CodecError> {
    serde_json::from_value(data).map_err(|source| CodecError::InvalidPayload { kind, source })
}

fn non_empty_name(kind: &'static str, name: &str) -> Result<String, CodecError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CodecError::EmptyName { kind });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gather_shared::{Player, Stroke};
    use serde_json::json;

    #[test]
    fn test_decode_move() {
        let request = decode(br#"{"type":"move","data":{"id":1,"x":40,"y":80}}"#).unwrap();
        assert_eq!(request, Request::Move(MovePayload { id: 1, x: 40, y: 80 }));
        assert_eq!(request.kind(), "move");
    }

    #[test]
    fn test_decode_create_trims_name() {
        let request = decode(br#"{"type":"create","data":{"name":"  Rex ","accountId":3}}"#).unwrap();
        assert_eq!(
            request,
            Request::Create(CreatePayload {
                name: "Rex".to_string(),
                account_id: Some(3)
            })
        );
    }

    #[test]
    fn test_decode_rejects_blank_names() {
        let result = decode(br#"{"type":"create","data":{"name":"   "}}"#);
        assert!(matches!(result, Err(CodecError::EmptyName { kind: "create" })));

        let result = decode(br#"{"type":"change_name","data":{"id":1,"name":""}}"#);
        assert!(matches!(result, Err(CodecError::EmptyName { kind: "change_name" })));
    }

    #[test]
    fn test_decode_get_players_with_or_without_data() {
        assert_eq!(decode(br#"{"type":"get_players"}"#).unwrap(), Request::GetPlayers);
        assert_eq!(
            decode(br#"{"type":"get_players","data":{}}"#).unwrap(),
            Request::GetPlayers
        );
    }

    #[test]
    fn test_decode_control_player_and_drawing() {
        let request =
            decode(br#"{"type":"control_player","data":{"playerId":9,"accountId":2}}"#).unwrap();
        assert_eq!(
            request,
            Request::ControlPlayer(ControlPlayerPayload {
                player_id: 9,
                account_id: 2
            })
        );

        let request =
            decode(br#"{"type":"save_drawing","data":{"playerId":9,"image":"abc"}}"#).unwrap();
        assert_eq!(
            request,
            Request::SaveDrawing(SaveDrawingPayload {
                player_id: 9,
                stroke: Stroke::Image {
                    image: "abc".to_string()
                }
            })
        );
    }

    #[test]
    fn test_decode_transient_effects() {
        let request =
            decode(br#"{"type":"health_change","data":{"id":4,"health":75}}"#).unwrap();
        assert_eq!(
            request,
            Request::HealthChange(HealthChangePayload { id: 4, health: 75 })
        );

        let request = decode(br#"{"type":"spawn_medkit","data":{"x":10,"y":20}}"#).unwrap();
        assert_eq!(request.kind(), "spawn_medkit");

        let request = decode(
            br#"{"type":"spawn_bullet","data":{"ownerId":4,"x":1,"y":2,"dx":0.5,"dy":-0.5}}"#,
        )
        .unwrap();
        assert_eq!(request.kind(), "spawn_bullet");
    }

    #[test]
    fn test_non_string_type_is_malformed() {
        assert!(matches!(
            decode(br#"{"type": 5}"#),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(decode(b"not json"), Err(CodecError::Malformed(_))));
        assert!(matches!(decode(b""), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        match decode(br#"{"type":"teleport","data":{}}"#) {
            Err(CodecError::UnknownType(tag)) => assert_eq!(tag, "teleport"),
            other => panic!("expected unknown type, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_fields_are_invalid_payload() {
        assert!(matches!(
            decode(br#"{"type":"move","data":{"id":1,"x":40}}"#),
            Err(CodecError::InvalidPayload { kind: "move", .. })
        ));
        assert!(matches!(
            decode(br#"{"type":"move"}"#),
            Err(CodecError::InvalidPayload { kind: "move", .. })
        ));
        assert!(matches!(
            decode(br#"{"type":"delete_player","data":{"id":"one"}}"#),
            Err(CodecError::InvalidPayload {
                kind: "delete_player",
                ..
            })
        ));
    }

    #[test]
    fn test_encode_wraps_payload() {
        let player = Player {
            id: 2,
            name: "Ada".to_string(),
            x: 1,
            y: 2,
            color: "gold".to_string(),
        };
        let envelope = encode(kind::NEW_PLAYER, &player).unwrap();
        assert_eq!(envelope.kind, "new_player");
        assert_eq!(
            envelope.data,
            json!({"id": 2, "name": "Ada", "x": 1, "y": 2, "color": "gold"})
        );
    }
}
