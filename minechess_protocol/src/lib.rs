// minechess_protocol — wire protocol for peer-to-peer Minechess matches.
//
// This crate defines what travels between the two peers: the envelope,
// the closed set of packet types, one typed payload per packet type, and a
// length-prefixed text framing for stream transports. It is shared by both
// peers and has no dependency on the game rules crate; snapshot payloads
// carry the game state as an untyped JSON value that `minechess_sim`
// decodes.
//
// Module overview:
// - `types.rs`:    Shared vocabulary (`PlayerId`, `Role`, `Phase`, `UnitType`,
//                  `MineType`, `Coord`, `Seq`, ...).
// - `envelope.rs`: `Envelope` and `PacketType`.
// - `payload.rs`:  `Payload` sum type and the validating `Payload::parse`.
// - `error.rs`:    `ProtocolError`.
// - `framing.rs`:  4-byte big-endian length prefix + UTF-8 body.
//
// Design decisions:
// - **JSON everywhere.** Envelopes are JSON text with camelCase keys so any
//   transport that can move a string can carry them.
// - **Parse, don't check.** Untyped JSON never leaves this crate without
//   passing `Payload::parse`; downstream code matches on `Payload`.
// - **No clocks, no I/O state.** Timestamps and sequence numbers are filled
//   in by the caller (the reliability layer in `minechess_peer`).

pub mod envelope;
pub mod error;
pub mod framing;
pub mod payload;
pub mod types;

pub use envelope::{Envelope, PacketType};
pub use error::ProtocolError;
pub use framing::{MAX_FRAME_SIZE, read_frame, write_frame};
pub use payload::{
    AckPayload, AttackPayload, AuthResultPayload, EvolvePayload, FlagPayload, HelloPayload,
    MovePayload, Payload, PlaceMinePayload, PongPayload, ReadyPayload, ScanPayload,
    StartGamePayload, StateSyncPayload, TurnPayload,
};
pub use types::{
    BOARD_COLS, BOARD_ROWS, Branch, Coord, GameMode, MineType, Phase, PlayerId, ReadyPhase, Role,
    Seq, UnitType,
};

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    /// Build an envelope, encode it, decode it, and parse the payload back.
    fn roundtrip(payload: Payload) {
        let env = Envelope::build(&payload, "room-1", 3, 1_700_000_000_000, Seq(5)).unwrap();
        let text = env.encode().unwrap();
        let decoded = Envelope::decode(&text).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.payload().unwrap(), payload);
    }

    #[test]
    fn roundtrip_hello() {
        roundtrip(Payload::Hello(HelloPayload {
            role: Role::Guest,
            peer_id: "guest-42".into(),
            password: Some("hunter2".into()),
        }));
    }

    #[test]
    fn roundtrip_ready_thinking() {
        roundtrip(Payload::PlayerReady(ReadyPayload {
            player_id: PlayerId::P2,
            phase: ReadyPhase::Thinking,
            setup_mines: None,
            energy_bid: Some(12),
        }));
    }

    #[test]
    fn roundtrip_state_sync() {
        roundtrip(Payload::StateSync(StateSyncPayload {
            reason: "end_turn".into(),
            state: json!({"phase": "action", "turnCount": 2}),
            allow_dev_tools: Some(false),
        }));
    }

    #[test]
    fn roundtrip_pong() {
        roundtrip(Payload::Pong(PongPayload { ping_ts: 42 }));
    }

    proptest! {
        /// Any in-board move survives the full encode/decode/parse path.
        #[test]
        fn in_board_moves_parse(r in 0u8..BOARD_ROWS, c in 0u8..BOARD_COLS, cost in 0u32..100) {
            let payload = Payload::Move(MovePayload { unit_id: "u".into(), r, c, cost });
            let env = Envelope::build(&payload, "m", 1, 0, Seq(1)).unwrap();
            let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded.payload().unwrap(), payload);
        }

        /// Off-board moves never make it past validation.
        #[test]
        fn off_board_moves_fail(r in BOARD_ROWS..=u8::MAX, c in 0u8..=u8::MAX) {
            let value = json!({"unitId": "u", "r": r, "c": c, "cost": 1});
            prop_assert!(Payload::parse(PacketType::Move, &value).is_err());
        }
    }
}
