// Typed payloads, one per packet type, with a validating parse.
//
// `Payload::parse(packet_type, &value)` is the single gate between untyped
// wire JSON and the rest of the system: it deserializes into the struct for
// that packet type (serde enforces field presence and JSON types, so
// negative or fractional numbers are rejected for unsigned fields) and then
// runs the `Validate` range checks (board bounds, non-empty ids, legal
// evolution variants). Anything that fails comes back as a `ProtocolError`
// and is dropped by the caller; nothing downstream ever sees a half-checked
// payload.
//
// MOVE carries a `cost` field that is advisory only. The receiving side
// recomputes the cost from its own state (see `minechess_sim::cost`).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::PacketType;
use crate::error::ProtocolError;
use crate::types::{Branch, Coord, GameMode, MineType, PlayerId, ReadyPhase, Role, Seq, UnitType};

/// Range checks applied after serde has accepted the shape.
trait Validate {
    fn validate(&self, packet_type: PacketType) -> Result<(), ProtocolError>;
}

fn check_cell(packet_type: PacketType, r: u8, c: u8) -> Result<(), ProtocolError> {
    if Coord::new(r, c).in_board() {
        Ok(())
    } else {
        Err(ProtocolError::OffBoard { packet_type, r, c })
    }
}

fn check_id(packet_type: PacketType, field: &'static str, id: &str) -> Result<(), ProtocolError> {
    if id.trim().is_empty() {
        return Err(ProtocolError::InvalidField {
            packet_type,
            field,
            reason: "must not be empty".into(),
        });
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub role: Role,
    pub peer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResultPayload {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGamePayload {
    pub mode: GameMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_dev_tools: Option<bool>,
}

impl Validate for StartGamePayload {
    fn validate(&self, packet_type: PacketType) -> Result<(), ProtocolError> {
        match &self.initial_state {
            Some(state) if !state.is_object() => Err(ProtocolError::InvalidField {
                packet_type,
                field: "initialState",
                reason: "must be an object".into(),
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePayload {
    pub unit_id: String,
    pub r: u8,
    pub c: u8,
    /// Sender's own estimate; never applied as-is.
    pub cost: u32,
}

impl MovePayload {
    pub fn target(&self) -> Coord {
        Coord::new(self.r, self.c)
    }
}

impl Validate for MovePayload {
    fn validate(&self, packet_type: PacketType) -> Result<(), ProtocolError> {
        check_id(packet_type, "unitId", &self.unit_id)?;
        check_cell(packet_type, self.r, self.c)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackPayload {
    pub attacker_id: String,
    pub target_id: String,
}

impl Validate for AttackPayload {
    fn validate(&self, packet_type: PacketType) -> Result<(), ProtocolError> {
        check_id(packet_type, "attackerId", &self.attacker_id)?;
        check_id(packet_type, "targetId", &self.target_id)
    }
}

/// Shared by SCAN and SENSOR_SCAN.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanPayload {
    pub unit_id: String,
    pub r: u8,
    pub c: u8,
}

impl ScanPayload {
    pub fn target(&self) -> Coord {
        Coord::new(self.r, self.c)
    }
}

impl Validate for ScanPayload {
    fn validate(&self, packet_type: PacketType) -> Result<(), ProtocolError> {
        check_id(packet_type, "unitId", &self.unit_id)?;
        check_cell(packet_type, self.r, self.c)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceMinePayload {
    pub unit_id: String,
    pub r: u8,
    pub c: u8,
    pub mine_type: MineType,
}

impl PlaceMinePayload {
    pub fn target(&self) -> Coord {
        Coord::new(self.r, self.c)
    }
}

impl Validate for PlaceMinePayload {
    fn validate(&self, packet_type: PacketType) -> Result<(), ProtocolError> {
        check_id(packet_type, "unitId", &self.unit_id)?;
        check_cell(packet_type, self.r, self.c)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolvePayload {
    pub unit_type: UnitType,
    pub branch: Branch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<u8>,
}

impl Validate for EvolvePayload {
    fn validate(&self, packet_type: PacketType) -> Result<(), ProtocolError> {
        match self.variant {
            Some(v) if !(1..=2).contains(&v) => Err(ProtocolError::InvalidField {
                packet_type,
                field: "variant",
                reason: format!("{v} is not 1 or 2"),
            }),
            _ => Ok(()),
        }
    }
}

/// Shared by END_TURN and SKIP_TURN.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnPayload {
    pub acted_unit_id: Option<String>,
}

/// Shared by PICKUP_FLAG and DROP_FLAG.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagPayload {
    pub unit_id: String,
}

impl Validate for FlagPayload {
    fn validate(&self, packet_type: PacketType) -> Result<(), ProtocolError> {
        check_id(packet_type, "unitId", &self.unit_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSyncPayload {
    pub reason: String,
    pub state: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_dev_tools: Option<bool>,
}

impl Validate for StateSyncPayload {
    fn validate(&self, packet_type: PacketType) -> Result<(), ProtocolError> {
        if !self.state.is_object() {
            return Err(ProtocolError::InvalidField {
                packet_type,
                field: "state",
                reason: "must be an object".into(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    pub player_id: PlayerId,
    pub phase: ReadyPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_mines: Option<Vec<Coord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_bid: Option<u32>,
}

impl Validate for ReadyPayload {
    fn validate(&self, packet_type: PacketType) -> Result<(), ProtocolError> {
        for cell in self.setup_mines.iter().flatten() {
            check_cell(packet_type, cell.r, cell.c)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub ack_for: Seq,
}

impl Validate for AckPayload {
    fn validate(&self, packet_type: PacketType) -> Result<(), ProtocolError> {
        if self.ack_for.0 == 0 {
            return Err(ProtocolError::InvalidField {
                packet_type,
                field: "ackFor",
                reason: "sequence numbers start at 1".into(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    pub ping_ts: u64,
}

/// A validated payload, tagged by packet type.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Hello(HelloPayload),
    AuthResult(AuthResultPayload),
    StartGame(StartGamePayload),
    LeaveMatch,
    Move(MovePayload),
    Attack(AttackPayload),
    Scan(ScanPayload),
    SensorScan(ScanPayload),
    PlaceMine(PlaceMinePayload),
    Evolve(EvolvePayload),
    EndTurn(TurnPayload),
    SkipTurn(TurnPayload),
    PickupFlag(FlagPayload),
    DropFlag(FlagPayload),
    StateSync(StateSyncPayload),
    PlayerReady(ReadyPayload),
    Ack(AckPayload),
    Ping,
    Pong(PongPayload),
}

fn typed<T: DeserializeOwned>(packet_type: PacketType, value: &Value) -> Result<T, ProtocolError> {
    T::deserialize(value).map_err(|source| ProtocolError::Payload {
        packet_type,
        source,
    })
}

fn checked<T: DeserializeOwned + Validate>(
    packet_type: PacketType,
    value: &Value,
) -> Result<T, ProtocolError> {
    let payload: T = typed(packet_type, value)?;
    payload.validate(packet_type)?;
    Ok(payload)
}

impl Payload {
    pub fn parse(packet_type: PacketType, value: &Value) -> Result<Payload, ProtocolError> {
        use PacketType as T;
        Ok(match packet_type {
            T::Hello => Payload::Hello(typed(packet_type, value)?),
            T::AuthResult => Payload::AuthResult(typed(packet_type, value)?),
            T::StartGame => Payload::StartGame(checked(packet_type, value)?),
            T::LeaveMatch => Payload::LeaveMatch,
            T::Move => Payload::Move(checked(packet_type, value)?),
            T::Attack => Payload::Attack(checked(packet_type, value)?),
            T::Scan => Payload::Scan(checked(packet_type, value)?),
            T::SensorScan => Payload::SensorScan(checked(packet_type, value)?),
            T::PlaceMine => Payload::PlaceMine(checked(packet_type, value)?),
            T::Evolve => Payload::Evolve(checked(packet_type, value)?),
            T::EndTurn => Payload::EndTurn(typed(packet_type, value)?),
            T::SkipTurn => Payload::SkipTurn(typed(packet_type, value)?),
            T::PickupFlag => Payload::PickupFlag(checked(packet_type, value)?),
            T::DropFlag => Payload::DropFlag(checked(packet_type, value)?),
            T::StateSync => Payload::StateSync(checked(packet_type, value)?),
            T::PlayerReady => Payload::PlayerReady(checked(packet_type, value)?),
            T::Ack => Payload::Ack(checked(packet_type, value)?),
            T::Ping => Payload::Ping,
            T::Pong => Payload::Pong(typed(packet_type, value)?),
        })
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Payload::Hello(_) => PacketType::Hello,
            Payload::AuthResult(_) => PacketType::AuthResult,
            Payload::StartGame(_) => PacketType::StartGame,
            Payload::LeaveMatch => PacketType::LeaveMatch,
            Payload::Move(_) => PacketType::Move,
            Payload::Attack(_) => PacketType::Attack,
            Payload::Scan(_) => PacketType::Scan,
            Payload::SensorScan(_) => PacketType::SensorScan,
            Payload::PlaceMine(_) => PacketType::PlaceMine,
            Payload::Evolve(_) => PacketType::Evolve,
            Payload::EndTurn(_) => PacketType::EndTurn,
            Payload::SkipTurn(_) => PacketType::SkipTurn,
            Payload::PickupFlag(_) => PacketType::PickupFlag,
            Payload::DropFlag(_) => PacketType::DropFlag,
            Payload::StateSync(_) => PacketType::StateSync,
            Payload::PlayerReady(_) => PacketType::PlayerReady,
            Payload::Ack(_) => PacketType::Ack,
            Payload::Ping => PacketType::Ping,
            Payload::Pong(_) => PacketType::Pong,
        }
    }

    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        let packet_type = self.packet_type();
        let result = match self {
            Payload::Hello(p) => serde_json::to_value(p),
            Payload::AuthResult(p) => serde_json::to_value(p),
            Payload::StartGame(p) => serde_json::to_value(p),
            Payload::LeaveMatch | Payload::Ping => Ok(Value::Object(Map::new())),
            Payload::Move(p) => serde_json::to_value(p),
            Payload::Attack(p) => serde_json::to_value(p),
            Payload::Scan(p) | Payload::SensorScan(p) => serde_json::to_value(p),
            Payload::PlaceMine(p) => serde_json::to_value(p),
            Payload::Evolve(p) => serde_json::to_value(p),
            Payload::EndTurn(p) | Payload::SkipTurn(p) => serde_json::to_value(p),
            Payload::PickupFlag(p) | Payload::DropFlag(p) => serde_json::to_value(p),
            Payload::StateSync(p) => serde_json::to_value(p),
            Payload::PlayerReady(p) => serde_json::to_value(p),
            Payload::Ack(p) => serde_json::to_value(p),
            Payload::Pong(p) => serde_json::to_value(p),
        };
        result.map_err(|source| ProtocolError::Encode {
            packet_type,
            source,
        })
    }
}
