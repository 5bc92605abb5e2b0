// Remote action replay.
//
// A game-action envelope from the peer is trusted only inside a narrow
// window: action phase, same turn number, game still running, current
// player is the remote seat, and the acting unit (or, for unit-less
// actions, the current player) belongs to the remote seat. Anything else is
// dropped without reply; the next snapshot repairs whatever drift caused
// it.
//
// Inside the window the envelope becomes a `GameAction` and goes through
// the same `apply_action` as a local action, with `Origin::Remote`. Values
// the sender computed for itself are not carried over: a MOVE's `cost`
// field never reaches the rules, which recompute the cost from local state.

use minechess_protocol::{Coord, Envelope, Payload, Phase, PlayerId};
use minechess_sim::{ActionOutcome, GameAction, GameConfig, GameState, Origin, apply_action, cost};

/// The rules action an inbound payload asks for, if it is a game action.
pub fn payload_action(payload: &Payload) -> Option<GameAction> {
    let action = match payload {
        Payload::Move(p) => GameAction::Move {
            unit_id: p.unit_id.clone(),
            target: Coord::new(p.r, p.c),
        },
        Payload::Attack(p) => GameAction::Attack {
            attacker_id: p.attacker_id.clone(),
            target_id: p.target_id.clone(),
        },
        Payload::Scan(p) => GameAction::Scan {
            unit_id: p.unit_id.clone(),
            target: Coord::new(p.r, p.c),
        },
        Payload::SensorScan(p) => GameAction::SensorScan {
            unit_id: p.unit_id.clone(),
            target: Coord::new(p.r, p.c),
        },
        Payload::PlaceMine(p) => GameAction::PlaceMine {
            unit_id: p.unit_id.clone(),
            target: Coord::new(p.r, p.c),
            mine_type: p.mine_type,
        },
        Payload::Evolve(p) => GameAction::Evolve {
            unit_type: p.unit_type,
            branch: p.branch,
            variant: p.variant,
        },
        Payload::EndTurn(p) => GameAction::EndTurn {
            acted_unit_id: p.acted_unit_id.clone(),
        },
        Payload::SkipTurn(_) => GameAction::SkipTurn,
        Payload::PickupFlag(p) => GameAction::PickupFlag {
            unit_id: p.unit_id.clone(),
        },
        Payload::DropFlag(p) => GameAction::DropFlag {
            unit_id: p.unit_id.clone(),
        },
        _ => return None,
    };
    Some(action)
}

/// Why a remote action fell outside the validity window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutsideWindow {
    NotActionPhase,
    TurnMismatch,
    GameOver,
    NotRemoteTurn,
    WrongOwner,
}

pub fn check_remote_window(
    state: &GameState,
    envelope_turn: u32,
    remote: PlayerId,
    action: &GameAction,
) -> Result<(), OutsideWindow> {
    if state.phase != Phase::Action {
        return Err(OutsideWindow::NotActionPhase);
    }
    if state.turn_count != envelope_turn {
        return Err(OutsideWindow::TurnMismatch);
    }
    if state.game_over {
        return Err(OutsideWindow::GameOver);
    }
    if state.current_player != remote {
        return Err(OutsideWindow::NotRemoteTurn);
    }
    if action.owner(state) != Some(remote) {
        return Err(OutsideWindow::WrongOwner);
    }
    Ok(())
}

#[derive(Debug)]
pub enum RemoteVerdict {
    /// Inside the window; the rules ran. The outcome may still be a
    /// rejection, in which case the state is unchanged.
    Applied(ActionOutcome),
    Ignored(OutsideWindow),
    /// Not a game-action payload.
    NotAnAction,
}

/// Validate and replay one remote game action against `state`.
pub fn apply_remote(
    state: &GameState,
    envelope: &Envelope,
    payload: &Payload,
    remote: PlayerId,
    cfg: &GameConfig,
) -> RemoteVerdict {
    let Some(action) = payload_action(payload) else {
        return RemoteVerdict::NotAnAction;
    };
    if let Err(why) = check_remote_window(state, envelope.turn, remote, &action) {
        log::debug!("ignoring remote {:?} (seq {}): {why:?}", envelope.packet_type, envelope.seq);
        return RemoteVerdict::Ignored(why);
    }
    if let (Payload::Move(declared), GameAction::Move { unit_id, .. }) = (payload, &action) {
        if let Some(unit) = state.unit(unit_id) {
            let actual = cost::authoritative_move_cost(state, unit, cfg);
            if actual != declared.cost {
                log::debug!(
                    "remote move of {unit_id} declared cost {} but costs {actual} here",
                    declared.cost
                );
            }
        }
    }
    RemoteVerdict::Applied(apply_action(state, &action, Origin::Remote, cfg))
}

/// Snapshot reason the host uses after applying a remote action.
pub fn remote_sync_reason(payload: &Payload) -> String {
    let kind = format!("{:?}", payload.packet_type());
    let mut snake = String::with_capacity(kind.len() + 4);
    for (i, ch) in kind.chars().enumerate() {
        if ch.is_ascii_uppercase() && i > 0 {
            snake.push('_');
        }
        snake.push(ch.to_ascii_lowercase());
    }
    format!("remote_{snake}_applied")
}
