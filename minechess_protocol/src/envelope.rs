// The envelope every peer message travels in.
//
// Wire shape (JSON, camelCase):
//
//   { "type": "MOVE", "matchId": "room-1", "turn": 3,
//     "payload": { ... }, "ts": 1700000000000, "seq": 12 }
//
// The payload is kept as an untyped `serde_json::Value` at this level so an
// envelope can always be decoded far enough to ACK it, even if its payload
// later fails validation. Typed access goes through `Envelope::payload()`,
// which dispatches on `packet_type` (see `payload.rs`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::payload::Payload;
use crate::types::Seq;

/// Closed set of packet kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacketType {
    Hello,
    AuthResult,
    StartGame,
    LeaveMatch,
    Move,
    Attack,
    Scan,
    SensorScan,
    PlaceMine,
    Evolve,
    EndTurn,
    SkipTurn,
    PickupFlag,
    DropFlag,
    StateSync,
    PlayerReady,
    Ack,
    Ping,
    Pong,
}

impl PacketType {
    /// Whether a send of this type waits for an ACK unless told otherwise.
    pub fn requires_ack_by_default(self) -> bool {
        self != PacketType::Ack
    }

    /// Game actions are the packets that go through the remote validity
    /// window before being applied.
    pub fn is_game_action(self) -> bool {
        matches!(
            self,
            PacketType::Move
                | PacketType::Attack
                | PacketType::Scan
                | PacketType::SensorScan
                | PacketType::PlaceMine
                | PacketType::Evolve
                | PacketType::EndTurn
                | PacketType::SkipTurn
                | PacketType::PickupFlag
                | PacketType::DropFlag
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub packet_type: PacketType,
    pub match_id: String,
    pub turn: u32,
    #[serde(default)]
    pub payload: Value,
    pub ts: u64,
    pub seq: Seq,
}

impl Envelope {
    /// Wrap an already-typed payload.
    pub fn build(
        payload: &Payload,
        match_id: &str,
        turn: u32,
        ts: u64,
        seq: Seq,
    ) -> Result<Envelope, ProtocolError> {
        Ok(Envelope {
            packet_type: payload.packet_type(),
            match_id: match_id.to_owned(),
            turn,
            payload: payload.to_value()?,
            ts,
            seq,
        })
    }

    pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Envelope)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|source| ProtocolError::Encode {
            packet_type: self.packet_type,
            source,
        })
    }

    /// Validate and type the payload for this envelope's packet type.
    pub fn payload(&self) -> Result<Payload, ProtocolError> {
        Payload::parse(self.packet_type, &self.payload)
    }
}
