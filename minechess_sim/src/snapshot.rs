// Snapshot encoding and reconciliation.
//
// A STATE_SYNC carries the sender's whole `GameState` as JSON. Receiving
// one does not simply replace local state: `merge_snapshot` adopts the
// incoming board but keeps what the receiver knows better.
//
// - Setup mines are monotonic during placement. The merged set is the
//   union of local, remembered, and incoming setup mines (one per owner
//   and cell, incoming copy preferred), so an old snapshot arriving late
//   can never delete a mine. Ready flags are ORed for the same reason.
// - Private hint logs never cross the wire in either direction: the
//   receiver keeps its own and drops incoming hints owned by the sender.
// - Selection survives only when both sides are in the same action phase.
// - `vfx` is local and never leaves the peer.
//
// A unit carrying a mine may also have a board copy of that mine in an
// incoming snapshot; those mirrors are removed before anything else.
//
// See also: `gamelog.rs` (dedup signature), `phase.rs` (placement close
// re-applies the remembered mines).
//
// **Critical constraint: no lost setup mines.** Every merge path in
// placement must keep each owner-cell pair seen by either side.

use std::collections::HashSet;

use minechess_protocol::{GameMode, Phase, PlayerId};
use serde_json::Value;

use crate::config::GameConfig;
use crate::gamelog::dedupe_logs;
use crate::state::{GameState, Mine, PerPlayer};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot state is not a JSON object")]
    NotObject,
    #[error("malformed snapshot: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}

pub fn encode_snapshot(state: &GameState) -> Result<Value, SnapshotError> {
    serde_json::to_value(state).map_err(SnapshotError::Encode)
}

pub fn decode_snapshot(value: &Value) -> Result<GameState, SnapshotError> {
    if !value.is_object() {
        return Err(SnapshotError::NotObject);
    }
    serde_json::from_value(value.clone()).map_err(SnapshotError::Decode)
}

fn cell_key(mine: &Mine) -> (PlayerId, u8, u8) {
    (mine.owner, mine.pos.r, mine.pos.c)
}

/// `synced` plus every mine of `local` whose id and owner-cell are both new.
pub fn merge_placement_mines(local: &[Mine], synced: &[Mine]) -> Vec<Mine> {
    let mut merged = synced.to_vec();
    let mut ids: HashSet<String> = merged.iter().map(|m| m.id.clone()).collect();
    let mut cells: HashSet<_> = merged.iter().map(cell_key).collect();
    for mine in local {
        if ids.contains(&mine.id) || cells.contains(&cell_key(mine)) {
            continue;
        }
        ids.insert(mine.id.clone());
        cells.insert(cell_key(mine));
        merged.push(mine.clone());
    }
    merged
}

/// Union of two setup-mine sets; on a clash the copy in `b` wins.
pub fn union_placement_mines(a: &[Mine], b: &[Mine]) -> Vec<Mine> {
    merge_placement_mines(a, b)
}

/// Drop board mines that are really a carried mine seen twice.
pub fn strip_carried_mine_mirrors(state: &GameState) -> GameState {
    let carried: HashSet<&str> = PlayerId::BOTH
        .iter()
        .flat_map(|&p| state.players[p].units.iter())
        .filter_map(|u| u.carried_mine.as_ref().map(|m| m.id.as_str()))
        .collect();
    let mut next = state.clone();
    if !carried.is_empty() {
        next.mines.retain(|m| !carried.contains(m.id.as_str()));
    }
    next
}

fn progress(state: &GameState) -> (u32, u8) {
    let phase = match state.phase {
        Phase::Placement => 0,
        Phase::Thinking => 1,
        Phase::Action => 2,
    };
    (state.turn_count, phase)
}

/// True when `incoming` is from an earlier turn or phase than `prev`.
/// Turns and phases only move forward, so such a snapshot was overtaken in
/// flight and merging it would undo a transition both sides already made.
pub fn is_stale(prev: &GameState, incoming: &GameState) -> bool {
    progress(incoming) < progress(prev)
}

/// Receiver-side memory that outlives individual snapshots.
#[derive(Clone, Debug, Default)]
pub struct MergeContext {
    /// Every setup mine seen during the current placement phase.
    pub remembered_placement: Vec<Mine>,
}

impl MergeContext {
    pub fn remember(&mut self, mines: &[Mine]) {
        self.remembered_placement = union_placement_mines(&self.remembered_placement, mines);
    }
}

/// Reconcile `incoming` (from the peer) with `prev` (ours).
pub fn merge_snapshot(
    prev: &GameState,
    incoming: &GameState,
    local_player: PlayerId,
    ctx: &mut MergeContext,
    cfg: &GameConfig,
) -> GameState {
    let mut next = strip_carried_mine_mirrors(incoming);

    if next.game_mode == GameMode::Pvp && next.phase == Phase::Placement {
        let ours = merge_placement_mines(&prev.setup_mines(), &ctx.remembered_placement);
        let merged = merge_placement_mines(&ours, &next.setup_mines());
        next.mines.retain(|m| !m.is_setup());
        next.mines.extend(merged.iter().cloned());
        next.recount_placement_mines();
        next.pvp_ready_state = PerPlayer::new(
            prev.pvp_ready_state.p1 || next.pvp_ready_state.p1,
            prev.pvp_ready_state.p2 || next.pvp_ready_state.p2,
        );
        log::trace!("placement merge kept {} setup mines", merged.len());
        ctx.remembered_placement = merged;
    } else if next.phase != Phase::Placement {
        ctx.remembered_placement.clear();
    }

    // Thinking votes are monotonic too, but only within the same round: a
    // flag from the previous thinking phase must not leak into this one.
    let same_thinking = next.phase == Phase::Thinking
        && prev.phase == Phase::Thinking
        && prev.turn_count == next.turn_count;
    if next.game_mode == GameMode::Pvp && same_thinking {
        for seat in PlayerId::BOTH {
            if prev.pvp_ready_state[seat] && !next.pvp_ready_state[seat] {
                next.pvp_ready_state[seat] = true;
                next.pvp_energy_bids[seat] = prev.pvp_energy_bids[seat];
            }
        }
    }

    let kept_private = prev
        .logs
        .iter()
        .filter(|log| log.is_private_hint() && log.owner == Some(local_player));
    let shared = next
        .logs
        .iter()
        .filter(|log| !log.is_private_hint() || log.owner == Some(local_player));
    let mut logs = dedupe_logs(kept_private.chain(shared).cloned().collect());
    logs.truncate(cfg.max_logs);
    next.logs = logs;

    let keep_selection = prev.phase == next.phase && next.phase == Phase::Action;
    if keep_selection {
        next.selected_unit_id = prev.selected_unit_id.clone();
        next.active_unit_id = prev.active_unit_id.clone();
    } else {
        next.selected_unit_id = None;
        next.active_unit_id = None;
    }
    next.vfx = prev.vfx.clone();
    next
}

#[cfg(test)]
mod tests {
    use minechess_protocol::Coord;
    use proptest::prelude::*;

    use super::*;
    use crate::gamelog::{GameLog, LogKind};
    use crate::state::VisualEffect;

    fn fresh() -> (GameState, GameConfig) {
        let cfg = GameConfig::default();
        (GameState::new_match(GameMode::Pvp, &cfg), cfg)
    }

    fn setup(owner: PlayerId, r: u8, c: u8) -> Mine {
        Mine::setup(owner, Coord::new(r, c))
    }

    #[test]
    fn snapshot_roundtrips_without_vfx() {
        let (mut state, _) = fresh();
        state.selected_unit_id = Some("p1-general".into());
        state.vfx.push(VisualEffect {
            kind: "hit".into(),
            pos: Coord::new(1, 1),
        });
        let value = encode_snapshot(&state).unwrap();
        assert!(value.get("vfx").is_none());
        assert_eq!(value["selectedUnitId"], "p1-general");
        let back = decode_snapshot(&value).unwrap();
        assert!(back.vfx.is_empty());
        state.vfx.clear();
        assert_eq!(back, state);
    }

    #[test]
    fn decode_rejects_non_objects() {
        assert!(matches!(
            decode_snapshot(&Value::from(3)),
            Err(SnapshotError::NotObject)
        ));
        assert!(matches!(
            decode_snapshot(&serde_json::json!({"phase": "placement"})),
            Err(SnapshotError::Decode(_))
        ));
    }

    #[test]
    fn merge_prefers_synced_copy() {
        let mut local = setup(PlayerId::P1, 0, 5);
        local.revealed_to.insert(PlayerId::P2);
        let synced = setup(PlayerId::P1, 0, 5);
        let merged = merge_placement_mines(&[local], &[synced.clone()]);
        assert_eq!(merged, vec![synced]);
    }

    #[test]
    fn late_placement_snapshot_keeps_local_mine() {
        let (prev, cfg) = fresh();
        let prev = {
            let mut s = prev;
            s.mines.push(setup(PlayerId::P2, 3, 16));
            s.pvp_ready_state.p2 = true;
            s
        };
        let mut old = prev.clone();
        old.mines.clear();
        old.pvp_ready_state.p2 = false;
        old.mines.push(setup(PlayerId::P1, 3, 4));

        let mut ctx = MergeContext::default();
        let merged = merge_snapshot(&prev, &old, PlayerId::P2, &mut ctx, &cfg);
        assert_eq!(merged.setup_mines().len(), 2);
        assert!(merged.pvp_ready_state.p2);
        assert_eq!(merged.players[PlayerId::P2].placement_mines_placed, 1);
        assert_eq!(ctx.remembered_placement.len(), 2);
    }

    #[test]
    fn private_hints_stay_home() {
        let (mut prev, cfg) = fresh();
        prev.phase = Phase::Action;
        let mine = GameLog::new(1, "log_energy_cap", LogKind::Info).owned_by(PlayerId::P2);
        prev.logs.push(mine.clone());

        let mut incoming = prev.clone();
        incoming.logs = vec![
            GameLog::new(1, "log_energy_cap", LogKind::Info)
                .owned_by(PlayerId::P1)
                .param("cap", 9),
            GameLog::new(1, "log_pass_turn", LogKind::Info).owned_by(PlayerId::P1),
            mine.clone(),
        ];
        let merged = merge_snapshot(&prev, &incoming, PlayerId::P2, &mut MergeContext::default(), &cfg);
        let keys: Vec<_> = merged
            .logs
            .iter()
            .map(|l| (l.message_key.as_str(), l.owner))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("log_energy_cap", Some(PlayerId::P2)),
                ("log_pass_turn", Some(PlayerId::P1)),
            ]
        );
    }

    #[test]
    fn pause_always_follows_the_sender() {
        let (mut prev, cfg) = fresh();
        prev.phase = Phase::Action;
        let mut ctx = MergeContext::default();

        prev.is_paused = true;
        let mut incoming = prev.clone();
        incoming.is_paused = false;
        assert!(!merge_snapshot(&prev, &incoming, PlayerId::P1, &mut ctx, &cfg).is_paused);

        prev.is_paused = false;
        incoming.is_paused = true;
        assert!(merge_snapshot(&prev, &incoming, PlayerId::P1, &mut ctx, &cfg).is_paused);
    }

    #[test]
    fn overtaken_snapshots_are_stale() {
        let (placement, _) = fresh();
        let mut thinking = placement.clone();
        thinking.phase = Phase::Thinking;
        let mut next_round = thinking.clone();
        next_round.turn_count = 2;
        let mut action = thinking.clone();
        action.phase = Phase::Action;

        assert!(is_stale(&thinking, &placement));
        assert!(is_stale(&next_round, &action));
        assert!(!is_stale(&action, &next_round));
        assert!(!is_stale(&action, &action));
    }

    #[test]
    fn thinking_vote_survives_stale_snapshot_of_same_round() {
        let (mut prev, cfg) = fresh();
        prev.phase = Phase::Thinking;
        prev.turn_count = 3;
        prev.pvp_ready_state.p1 = true;
        prev.pvp_energy_bids.p1 = 6;
        let mut stale = prev.clone();
        stale.pvp_ready_state.p1 = false;
        stale.pvp_energy_bids.p1 = 0;

        let mut ctx = MergeContext::default();
        let merged = merge_snapshot(&prev, &stale, PlayerId::P2, &mut ctx, &cfg);
        assert!(merged.pvp_ready_state.p1);
        assert_eq!(merged.pvp_energy_bids.p1, 6);

        let mut next_round = stale.clone();
        next_round.turn_count = 4;
        let merged = merge_snapshot(&prev, &next_round, PlayerId::P2, &mut ctx, &cfg);
        assert!(!merged.pvp_ready_state.p1);
    }

    #[test]
    fn selection_kept_only_within_action() {
        let (mut prev, cfg) = fresh();
        prev.phase = Phase::Action;
        prev.selected_unit_id = Some("p1-general".into());
        prev.vfx.push(VisualEffect {
            kind: "hit".into(),
            pos: Coord::new(0, 0),
        });
        let mut incoming = prev.clone();
        incoming.selected_unit_id = None;
        incoming.vfx.clear();

        let mut ctx = MergeContext::default();
        let kept = merge_snapshot(&prev, &incoming, PlayerId::P1, &mut ctx, &cfg);
        assert_eq!(kept.selected_unit_id.as_deref(), Some("p1-general"));
        assert_eq!(kept.vfx.len(), 1);

        incoming.phase = Phase::Thinking;
        let dropped = merge_snapshot(&prev, &incoming, PlayerId::P1, &mut ctx, &cfg);
        assert_eq!(dropped.selected_unit_id, None);
    }

    #[test]
    fn carried_mine_mirror_removed() {
        let (mut state, _) = fresh();
        let carried = setup(PlayerId::P1, 1, 1);
        state.mines.push(carried.clone());
        state.mines.push(setup(PlayerId::P1, 2, 2));
        state.unit_mut("p1-ranger").unwrap().carried_mine = Some(carried);
        let stripped = strip_carried_mine_mirrors(&state);
        assert_eq!(stripped.mines.len(), 1);
    }

    fn arb_mines() -> impl Strategy<Value = Vec<Mine>> {
        prop::collection::vec((any::<bool>(), 0u8..7, 0u8..24), 0..12).prop_map(|cells| {
            cells
                .into_iter()
                .map(|(p1, r, c)| {
                    let owner = if p1 { PlayerId::P1 } else { PlayerId::P2 };
                    setup(owner, r, c)
                })
                .collect()
        })
    }

    fn cells(mines: &[Mine]) -> HashSet<(PlayerId, u8, u8)> {
        mines.iter().map(cell_key).collect()
    }

    proptest! {
        #[test]
        fn union_is_monotonic(a in arb_mines(), b in arb_mines()) {
            let merged = union_placement_mines(&a, &b);
            let merged_cells = cells(&merged);
            prop_assert!(cells(&a).is_subset(&merged_cells));
            prop_assert!(cells(&b).is_subset(&merged_cells));
        }

        #[test]
        fn union_is_commutative_on_cells(a in arb_mines(), b in arb_mines()) {
            prop_assert_eq!(
                cells(&union_placement_mines(&a, &b)),
                cells(&union_placement_mines(&b, &a))
            );
        }
    }
}
