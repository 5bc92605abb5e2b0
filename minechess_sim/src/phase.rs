// Match phase machine: placement -> thinking -> action, and back to
// thinking at every round rollover.
//
// Placement and thinking end only when both seats have cast a READY vote
// for that phase. A vote cast against a phase the local state has already
// left (or not yet reached) is reported as `PhaseMismatch` and changes
// nothing; the peer layer answers it with a resync.
//
// - Placement: each seat hides up to `placement_mine_limit` setup mines in
//   its own half. A placement vote carries the voter's setup mines, and
//   they are unioned into the receiver's state so a lost snapshot can never
//   make a mine disappear.
// - Thinking: each seat bids energy for the first move. The higher bid
//   moves first; equal bids fall to a hash of the room id and turn number
//   that both peers compute identically.
//
// Outside pvp there is nobody to wait for and a vote advances at once.
//
// See also: `round.rs` (action -> thinking), `snapshot.rs`
// (`union_placement_mines`).

use minechess_protocol::{Coord, GameMode, Phase, PlayerId, ReadyPhase};

use crate::action::Rejection;
use crate::config::GameConfig;
use crate::gamelog::{GameLog, LogKind, push_log};
use crate::snapshot::union_placement_mines;
use crate::state::{BuildingKind, GameState, Mine, PerPlayer};

/// Hide a setup mine for `player` during placement.
pub fn place_setup_mine(
    state: &GameState,
    player: PlayerId,
    cell: Coord,
    cfg: &GameConfig,
) -> Result<GameState, Rejection> {
    if state.phase != Phase::Placement {
        return Err(Rejection::WrongPhase);
    }
    if !cfg.in_board(cell) || !cfg.is_home_half(player, cell) {
        return Err(Rejection::PlacementZone);
    }
    if state.unit_at(cell).is_some() || state.building_at(cell).is_some() {
        return Err(Rejection::Obstacle);
    }
    if state.mines.iter().any(|m| m.pos == cell) {
        return Err(Rejection::SpaceHasMine);
    }
    if state.players[player].placement_mines_placed >= cfg.placement_mine_limit {
        return Err(Rejection::PlacementLimit);
    }
    let mut next = state.clone();
    next.mines.push(Mine::setup(player, cell));
    next.players[player].placement_mines_placed += 1;
    Ok(next)
}

/// Like `place_setup_mine`, but a refused placement leaves the private hint
/// for `player` in the returned state.
pub fn place_setup_mine_or_hint(
    state: &GameState,
    player: PlayerId,
    cell: Coord,
    cfg: &GameConfig,
) -> (GameState, Option<Rejection>) {
    match place_setup_mine(state, player, cell, cfg) {
        Ok(next) => (next, None),
        Err(rejection) => {
            let mut unchanged = state.clone();
            if let Some(hint) = rejection.hint(state.turn_count, player) {
                push_log(&mut unchanged.logs, hint, cfg.max_logs);
            }
            (unchanged, Some(rejection))
        }
    }
}

/// The cells of a peer's placement vote that `place_setup_mine` would have
/// accepted, as setup mines for `player`.
///
/// A cell must be on the board, in `player`'s half, and clear of units,
/// buildings and the other seat's mines. Cells `player` already holds pass
/// through; new ones stop once the seat reaches `placement_mine_limit`.
pub fn admissible_setup_mines(
    state: &GameState,
    player: PlayerId,
    cells: &[Coord],
    cfg: &GameConfig,
) -> Vec<Mine> {
    let mut held: Vec<Coord> = state
        .mines
        .iter()
        .filter(|m| m.is_setup() && m.owner == player)
        .map(|m| m.pos)
        .collect();
    let mut admitted = Vec::new();
    for &cell in cells {
        if admitted.iter().any(|m: &Mine| m.pos == cell) {
            continue;
        }
        if held.contains(&cell) {
            admitted.push(Mine::setup(player, cell));
            continue;
        }
        let clear = cfg.in_board(cell)
            && cfg.is_home_half(player, cell)
            && state.unit_at(cell).is_none()
            && state.building_at(cell).is_none()
            && !state.mines.iter().any(|m| m.pos == cell);
        if !clear || held.len() >= cfg.placement_mine_limit as usize {
            log::debug!("dropping setup mine {cell:?} from {player}'s vote");
            continue;
        }
        held.push(cell);
        admitted.push(Mine::setup(player, cell));
    }
    admitted
}

/// One seat's READY for the current phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadyVote {
    pub player: PlayerId,
    pub phase: ReadyPhase,
    /// Placement only: the voter's setup mine cells.
    pub setup_mines: Vec<Coord>,
    /// Thinking only: energy offered for the first move.
    pub energy_bid: u32,
}

impl ReadyVote {
    /// The vote `player` would cast right now from `state`, or `None` when
    /// the state is in the action phase.
    pub fn from_state(state: &GameState, player: PlayerId) -> Option<ReadyVote> {
        let phase = ReadyPhase::from_phase(state.phase)?;
        let setup_mines = match phase {
            ReadyPhase::Placement => state
                .mines
                .iter()
                .filter(|m| m.is_setup() && m.owner == player)
                .map(|m| m.pos)
                .collect(),
            ReadyPhase::Thinking => Vec::new(),
        };
        Some(ReadyVote {
            player,
            phase,
            setup_mines,
            energy_bid: state.pvp_energy_bids[player],
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteResult {
    /// Vote stored; still waiting on the other seat.
    Recorded,
    /// Both seats were ready and the state moved on.
    Advanced { to: Phase },
    /// The vote names a phase this state is not in. Nothing changed.
    PhaseMismatch,
}

/// Record `vote` and advance the phase if both seats are now ready.
///
/// `remembered` holds the setup mines the caller has seen during this
/// placement; they are merged back in when placement closes. `match_id`
/// seeds the bid tie-break.
pub fn cast_ready_vote(
    state: &GameState,
    vote: &ReadyVote,
    remembered: &[Mine],
    match_id: &str,
    cfg: &GameConfig,
) -> (GameState, VoteResult) {
    if state.phase != Phase::from(vote.phase) {
        return (state.clone(), VoteResult::PhaseMismatch);
    }
    let mut next = state.clone();
    match vote.phase {
        ReadyPhase::Placement => {
            let incoming = admissible_setup_mines(state, vote.player, &vote.setup_mines, cfg);
            let merged = union_placement_mines(&next.setup_mines(), &incoming);
            next.mines.retain(|m| !m.is_setup());
            next.mines.extend(merged);
            next.recount_placement_mines();
        }
        ReadyPhase::Thinking => {
            next.pvp_energy_bids[vote.player] = vote.energy_bid.min(next.players[vote.player].energy);
        }
    }
    next.pvp_ready_state[vote.player] = true;

    let everyone_ready = next.pvp_ready_state.p1 && next.pvp_ready_state.p2;
    if next.game_mode == GameMode::Pvp && !everyone_ready {
        return (next, VoteResult::Recorded);
    }
    let advanced = match vote.phase {
        ReadyPhase::Placement => finish_placement(&next, remembered, cfg),
        ReadyPhase::Thinking => start_action_phase(&next, match_id, cfg),
    };
    let to = advanced.phase;
    log::debug!("both seats ready for {:?}; advancing to {to:?}", vote.phase);
    (advanced, VoteResult::Advanced { to })
}

/// Close placement: lock in every setup mine either side has seen, reset
/// the handshake, and open the first thinking phase.
pub fn finish_placement(state: &GameState, remembered: &[Mine], cfg: &GameConfig) -> GameState {
    let mut next = state.clone();
    let stabilized = union_placement_mines(&state.setup_mines(), remembered);
    next.mines.retain(|m| !m.is_setup());
    next.mines.extend(stabilized);
    next.recount_placement_mines();
    next.phase = Phase::Thinking;
    next.time_left = cfg.thinking_seconds;
    next.selected_unit_id = None;
    next.pvp_ready_state = PerPlayer::default();
    next.pvp_energy_bids = PerPlayer::default();
    let entry = GameLog::new(next.turn_count, "log_round_start", LogKind::Info)
        .param("round", next.turn_count);
    push_log(&mut next.logs, entry, cfg.max_logs);
    next
}

/// Deterministic coin for equal bids: a 31-multiplier string hash over
/// `"{match_id}:{turn}"` in UTF-16 code units, wrapping at 32 bits.
pub fn tie_break_hash(match_id: &str, turn: u32) -> u32 {
    format!("{match_id}:{turn}")
        .encode_utf16()
        .fold(0u32, |hash, unit| hash.wrapping_mul(31).wrapping_add(u32::from(unit)))
}

/// The seat that moves first, and whether it came down to the tie-break.
pub fn resolve_first_mover(bids: PerPlayer<u32>, match_id: &str, turn: u32) -> (PlayerId, bool) {
    if bids.p1 > bids.p2 {
        (PlayerId::P1, false)
    } else if bids.p2 > bids.p1 {
        (PlayerId::P2, false)
    } else if tie_break_hash(match_id, turn) % 2 == 0 {
        (PlayerId::P1, true)
    } else {
        (PlayerId::P2, true)
    }
}

/// Towers reveal every mine in the 3x3 around them to their owner.
fn apply_radar(state: &mut GameState) {
    let towers: Vec<(PlayerId, Coord)> = state
        .buildings
        .iter()
        .filter(|b| b.kind == BuildingKind::Tower)
        .map(|b| (b.owner, b.pos))
        .collect();
    for mine in &mut state.mines {
        for &(owner, pos) in &towers {
            if mine.pos.chebyshev(pos) <= 1 {
                mine.revealed_to.insert(owner);
            }
        }
    }
}

/// Close thinking: charge the bids, pick the first mover, and open the
/// action phase with fresh per-unit budgets.
pub fn start_action_phase(state: &GameState, match_id: &str, cfg: &GameConfig) -> GameState {
    let mut next = state.clone();
    let bids = PerPlayer::new(
        state.pvp_energy_bids.p1.min(state.players[PlayerId::P1].energy),
        state.pvp_energy_bids.p2.min(state.players[PlayerId::P2].energy),
    );
    let (first, tie) = resolve_first_mover(bids, match_id, state.turn_count);
    let entry = if tie {
        GameLog::new(state.turn_count, "log_first_mover_tie", LogKind::Info)
    } else {
        GameLog::new(state.turn_count, "log_first_mover", LogKind::Info).param("player", first.as_str())
    };
    push_log(&mut next.logs, entry, cfg.max_logs);

    for seat in PlayerId::BOTH {
        let player = &mut next.players[seat];
        player.energy -= bids[seat];
        let energy = player.energy;
        for unit in &mut player.units {
            unit.start_of_action_energy = energy;
        }
    }
    apply_radar(&mut next);
    next.phase = Phase::Action;
    next.current_player = first;
    next.time_left = cfg.action_seconds;
    next.selected_unit_id = None;
    next.active_unit_id = None;
    next.is_time_frozen = false;
    next.pvp_ready_state = PerPlayer::default();
    next.pvp_energy_bids = PerPlayer::default();
    next
}

#[cfg(test)]
mod tests {
    use minechess_protocol::MineType;

    use super::*;

    fn placement() -> (GameState, GameConfig) {
        let cfg = GameConfig::default();
        (GameState::new_match(GameMode::Pvp, &cfg), cfg)
    }

    fn vote(player: PlayerId, phase: ReadyPhase, mines: &[(u8, u8)], bid: u32) -> ReadyVote {
        ReadyVote {
            player,
            phase,
            setup_mines: mines.iter().map(|&(r, c)| Coord::new(r, c)).collect(),
            energy_bid: bid,
        }
    }

    #[test]
    fn setup_mines_respect_zone_and_limit() {
        let (state, cfg) = placement();
        let state = place_setup_mine(&state, PlayerId::P1, Coord::new(0, 5), &cfg).unwrap();
        assert_eq!(state.mines[0].id, "pm-P1-0-5");
        assert_eq!(state.mines[0].mine_type, MineType::Normal);
        assert_eq!(
            place_setup_mine(&state, PlayerId::P1, Coord::new(0, 12), &cfg),
            Err(Rejection::PlacementZone)
        );
        assert_eq!(
            place_setup_mine(&state, PlayerId::P1, Coord::new(2, 1), &cfg),
            Err(Rejection::Obstacle)
        );
        assert_eq!(
            place_setup_mine(&state, PlayerId::P1, Coord::new(0, 5), &cfg),
            Err(Rejection::SpaceHasMine)
        );
        let state = place_setup_mine(&state, PlayerId::P1, Coord::new(1, 5), &cfg).unwrap();
        let state = place_setup_mine(&state, PlayerId::P1, Coord::new(2, 5), &cfg).unwrap();
        let (after, rejection) = place_setup_mine_or_hint(&state, PlayerId::P1, Coord::new(3, 5), &cfg);
        assert_eq!(rejection, Some(Rejection::PlacementLimit));
        assert_eq!(after.logs[0].message_key, "log_mine_limit");
    }

    #[test]
    fn placement_closes_when_both_ready() {
        let (state, cfg) = placement();
        let state = place_setup_mine(&state, PlayerId::P1, Coord::new(0, 5), &cfg).unwrap();
        let own = ReadyVote::from_state(&state, PlayerId::P1).unwrap();
        assert_eq!(own.setup_mines, vec![Coord::new(0, 5)]);

        let (state, result) = cast_ready_vote(&state, &own, &[], "room", &cfg);
        assert_eq!(result, VoteResult::Recorded);
        assert!(state.pvp_ready_state.p1);

        let remote = vote(PlayerId::P2, ReadyPhase::Placement, &[(3, 4 + 12)], 0);
        let (state, result) = cast_ready_vote(&state, &remote, &[], "room", &cfg);
        assert_eq!(result, VoteResult::Advanced { to: Phase::Thinking });
        assert_eq!(state.phase, Phase::Thinking);
        assert_eq!(state.time_left, 30);
        assert_eq!(state.setup_mines().len(), 2);
        assert_eq!(state.players[PlayerId::P2].placement_mines_placed, 1);
        assert_eq!(state.pvp_ready_state, PerPlayer::default());
        assert_eq!(state.logs[0].message_key, "log_round_start");
    }

    #[test]
    fn remote_placement_vote_follows_placement_rules() {
        let (state, cfg) = placement();
        let trespass: Vec<(u8, u8)> = (0..6).map(|r| (r, 5)).collect();
        let remote = vote(PlayerId::P2, ReadyPhase::Placement, &trespass, 0);
        let (next, result) = cast_ready_vote(&state, &remote, &[], "room", &cfg);
        assert_eq!(result, VoteResult::Recorded);
        assert!(next.setup_mines().is_empty());
        assert_eq!(next.players[PlayerId::P2].placement_mines_placed, 0);

        // On a unit, then five open cells: only three fit under the limit.
        let crowded = [(0, 22), (0, 16), (1, 16), (1, 16), (2, 16), (3, 16), (4, 16)];
        let remote = vote(PlayerId::P2, ReadyPhase::Placement, &crowded, 0);
        let (next, _) = cast_ready_vote(&state, &remote, &[], "room", &cfg);
        let cells: Vec<Coord> = next.setup_mines().iter().map(|m| m.pos).collect();
        assert_eq!(cells, vec![Coord::new(0, 16), Coord::new(1, 16), Coord::new(2, 16)]);
        assert_eq!(next.players[PlayerId::P2].placement_mines_placed, 3);

        // Re-sending mines the seat already holds does not count twice.
        let again = vote(PlayerId::P2, ReadyPhase::Placement, &[(1, 16), (5, 16)], 0);
        let (next, _) = cast_ready_vote(&next, &again, &[], "room", &cfg);
        assert_eq!(next.players[PlayerId::P2].placement_mines_placed, 3);
        assert!(!next.mines.iter().any(|m| m.pos == Coord::new(5, 16)));
    }

    #[test]
    fn remembered_mines_survive_placement_close() {
        let (state, cfg) = placement();
        let remembered = vec![Mine::setup(PlayerId::P1, Coord::new(3, 4))];
        let next = finish_placement(&state, &remembered, &cfg);
        assert!(next.mines.iter().any(|m| m.pos == Coord::new(3, 4)));
        assert_eq!(next.players[PlayerId::P1].placement_mines_placed, 1);
    }

    #[test]
    fn vote_for_wrong_phase_is_ignored() {
        let (state, cfg) = placement();
        let stale = vote(PlayerId::P2, ReadyPhase::Thinking, &[], 5);
        let (next, result) = cast_ready_vote(&state, &stale, &[], "room", &cfg);
        assert_eq!(result, VoteResult::PhaseMismatch);
        assert_eq!(next, state);
    }

    #[test]
    fn higher_bid_moves_first_and_pays() {
        let (mut state, cfg) = placement();
        state.phase = Phase::Thinking;
        let p1 = vote(PlayerId::P1, ReadyPhase::Thinking, &[], 4);
        let p2 = vote(PlayerId::P2, ReadyPhase::Thinking, &[], 9);
        let (state, _) = cast_ready_vote(&state, &p1, &[], "room", &cfg);
        let (state, result) = cast_ready_vote(&state, &p2, &[], "room", &cfg);
        assert_eq!(result, VoteResult::Advanced { to: Phase::Action });
        assert_eq!(state.current_player, PlayerId::P2);
        assert_eq!(state.players[PlayerId::P1].energy, 46);
        assert_eq!(state.players[PlayerId::P2].energy, 41);
        assert_eq!(state.unit("p2-general").unwrap().start_of_action_energy, 41);
        assert_eq!(state.logs[0].message_key, "log_first_mover");
        assert_eq!(state.time_left, 15);
    }

    #[test]
    fn bids_are_clamped_to_energy() {
        let (mut state, cfg) = placement();
        state.phase = Phase::Thinking;
        let greedy = vote(PlayerId::P1, ReadyPhase::Thinking, &[], 500);
        let (state, _) = cast_ready_vote(&state, &greedy, &[], "r", &cfg);
        assert_eq!(state.pvp_energy_bids.p1, 50);
    }

    #[test]
    fn tie_break_is_stable() {
        // "r:1" -> ((114 * 31) + 58) * 31 + 49
        assert_eq!(tie_break_hash("r", 1), (114 * 31 + 58) * 31 + 49);
        let bids = PerPlayer::new(3, 3);
        let (a, tie) = resolve_first_mover(bids, "room-7", 4);
        let (b, _) = resolve_first_mover(bids, "room-7", 4);
        assert!(tie);
        assert_eq!(a, b);
    }

    #[test]
    fn sandbox_vote_advances_alone() {
        let cfg = GameConfig::default();
        let state = GameState::new_match(GameMode::Sandbox, &cfg);
        let own = ReadyVote::from_state(&state, PlayerId::P1).unwrap();
        let (next, result) = cast_ready_vote(&state, &own, &[], "local", &cfg);
        assert_eq!(result, VoteResult::Advanced { to: Phase::Thinking });
        assert_eq!(next.phase, Phase::Thinking);
    }
}
