// Local action origination: who may broadcast, and what goes on the wire.
//
// `can_broadcast_action` is the single guard for every action kind. It
// passes only when all of these hold:
// - we are not in the middle of applying a remote action (no echo);
// - the match is a pvp match;
// - the local seat is known (host plays P1, guest plays P2);
// - it is the local seat's turn;
// - the action's unit, if it names one, belongs to the local seat.
//
// `action_payload` turns a `GameAction` into the envelope payload the peer
// will replay. A MOVE carries the sender's own cost for display only; the
// receiver recomputes it (see `applier.rs`).

use minechess_protocol::{
    AttackPayload, EvolvePayload, FlagPayload, GameMode, MovePayload, Payload, PlaceMinePayload,
    PlayerId, ScanPayload, TurnPayload,
};
use minechess_sim::{GameAction, GameConfig, GameState, cost};

/// What the guard needs to know about the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchContext {
    pub applying_remote: bool,
    pub local_player: Option<PlayerId>,
}

pub fn can_broadcast_action(ctx: DispatchContext, state: &GameState, action: &GameAction) -> bool {
    if ctx.applying_remote || state.game_mode != GameMode::Pvp {
        return false;
    }
    let Some(local) = ctx.local_player else {
        return false;
    };
    if state.current_player != local {
        return false;
    }
    match action.unit_id() {
        Some(unit_id) => state.unit(unit_id).is_some_and(|u| u.owner == local),
        None => true,
    }
}

/// The wire payload for `action`, as seen from `state` before applying it.
pub fn action_payload(action: &GameAction, state: &GameState, cfg: &GameConfig) -> Payload {
    match action {
        GameAction::Move { unit_id, target } => {
            let advisory = state
                .unit(unit_id)
                .map_or(0, |unit| cost::authoritative_move_cost(state, unit, cfg));
            Payload::Move(MovePayload {
                unit_id: unit_id.clone(),
                r: target.r,
                c: target.c,
                cost: advisory,
            })
        }
        GameAction::Attack {
            attacker_id,
            target_id,
        } => Payload::Attack(AttackPayload {
            attacker_id: attacker_id.clone(),
            target_id: target_id.clone(),
        }),
        GameAction::Scan { unit_id, target } => Payload::Scan(ScanPayload {
            unit_id: unit_id.clone(),
            r: target.r,
            c: target.c,
        }),
        GameAction::SensorScan { unit_id, target } => Payload::SensorScan(ScanPayload {
            unit_id: unit_id.clone(),
            r: target.r,
            c: target.c,
        }),
        GameAction::PlaceMine {
            unit_id,
            target,
            mine_type,
        } => Payload::PlaceMine(PlaceMinePayload {
            unit_id: unit_id.clone(),
            r: target.r,
            c: target.c,
            mine_type: *mine_type,
        }),
        GameAction::Evolve {
            unit_type,
            branch,
            variant,
        } => Payload::Evolve(EvolvePayload {
            unit_type: *unit_type,
            branch: *branch,
            variant: *variant,
        }),
        GameAction::EndTurn { acted_unit_id } => Payload::EndTurn(TurnPayload {
            acted_unit_id: acted_unit_id.clone(),
        }),
        GameAction::SkipTurn => Payload::SkipTurn(TurnPayload {
            acted_unit_id: state.active_unit_id.clone(),
        }),
        GameAction::PickupFlag { unit_id } => Payload::PickupFlag(FlagPayload {
            unit_id: unit_id.clone(),
        }),
        GameAction::DropFlag { unit_id } => Payload::DropFlag(FlagPayload {
            unit_id: unit_id.clone(),
        }),
    }
}

/// Snapshot reason label for a locally originated action.
pub fn sync_reason(action: &GameAction) -> &'static str {
    match action {
        GameAction::Move { .. } => "move",
        GameAction::Attack { .. } => "attack",
        GameAction::Scan { .. } => "scan",
        GameAction::SensorScan { .. } => "sensor_scan",
        GameAction::PlaceMine { .. } => "place_mine",
        GameAction::Evolve { .. } => "evolve",
        GameAction::EndTurn { .. } => "end_turn",
        GameAction::SkipTurn => "skip_turn",
        GameAction::PickupFlag { .. } => "pickup_flag",
        GameAction::DropFlag { .. } => "drop_flag",
    }
}
