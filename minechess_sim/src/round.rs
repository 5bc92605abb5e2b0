// Turn hand-off and round rollover.
//
// Within the action phase, control alternates between the seats one unit
// activation at a time. `end_turn` commits a unit and passes control;
// `skip_turn` pays an escalating fee to pass without committing anything.
// When neither seat has a living, unacted unit left, `start_new_round` pays
// out income, ticks timers, and loops back to the thinking phase, where the
// players bid for the first move of the next round.
//
// See also: `action.rs` (dispatches END_TURN / SKIP_TURN here),
// `phase.rs` (thinking -> action transition and first-mover resolution).
//
// **Critical constraint: determinism.** Hand-off order depends only on the
// state; both peers must pick the same next player from the same input.

use minechess_protocol::{Phase, PlayerId, UnitType};

use crate::action::Rejection;
use crate::config::GameConfig;
use crate::cost;
use crate::gamelog::{GameLog, LogKind, push_log};
use crate::state::{GameState, UnitStatus};

/// Respawn delay for a unit that dies on `turn`.
pub fn respawn_delay(turn: u32) -> u32 {
    if turn <= 10 { 2 } else { 3 }
}

fn both_done(state: &GameState) -> bool {
    PlayerId::BOTH
        .iter()
        .all(|&p| !state.players[p].has_unit_available())
}

/// Give control to `to`: reset the step timer, drop the committed unit, and
/// snapshot the seat's energy as the per-unit budget basis.
fn hand_off(next: &mut GameState, to: PlayerId, cfg: &GameConfig) {
    next.current_player = to;
    next.selected_unit_id = None;
    next.active_unit_id = None;
    next.is_time_frozen = false;
    next.time_left = cfg.action_seconds;
    let player = &mut next.players[to];
    let energy = player.energy;
    for unit in player.units.iter_mut().filter(|u| u.can_act()) {
        unit.start_of_action_energy = energy;
    }
    player.quest_stats.flag_spirit_damage_taken_this_turn.clear();
}

/// The seat that moves after `current` finished a step, or `None` when the
/// round is over.
fn next_seat(state: &GameState, current: PlayerId) -> Option<PlayerId> {
    let other = current.opponent();
    if state.players[other].has_unit_available() {
        Some(other)
    } else if state.players[current].has_unit_available() {
        Some(current)
    } else {
        None
    }
}

/// Commit a unit for this round and pass control.
///
/// With `acted_unit_id` naming one of the current player's unacted units,
/// that unit is marked acted; if it spent nothing this round it is healed
/// for passing. Without one, the first available unit is marked instead.
pub fn end_turn(state: &GameState, acted_unit_id: Option<&str>, cfg: &GameConfig) -> GameState {
    let mut next = state.clone();
    let current = state.current_player;
    let turn = state.turn_count;

    let named = acted_unit_id.and_then(|id| {
        state
            .unit(id)
            .filter(|u| u.owner == current && u.can_act())
            .map(|u| u.id.clone())
    });
    let committed = match (acted_unit_id, named) {
        (Some(_), named) => named,
        (None, _) => state.players[current]
            .units
            .iter()
            .find(|u| u.can_act())
            .map(|u| u.id.clone()),
    };

    if let Some(id) = committed {
        let mut healed = false;
        if let Some(unit) = next.unit_mut(&id) {
            unit.has_acted_this_round = true;
            if acted_unit_id.is_some() && unit.energy_used_this_turn == 0 && unit.hp < unit.max_hp {
                unit.hp = (unit.hp + cfg.pass_heal).min(unit.max_hp);
                healed = true;
            }
        }
        let pass = GameLog::new(turn, "log_pass_turn", LogKind::Info).owned_by(current);
        push_log(&mut next.logs, pass, cfg.max_logs);
        if healed {
            let heal = GameLog::new(turn, "log_passive_heal", LogKind::Info)
                .owned_by(current)
                .param("amount", cfg.pass_heal);
            push_log(&mut next.logs, heal, cfg.max_logs);
        }
    }

    if both_done(&next) {
        return start_new_round(&next, cfg);
    }
    let to = next_seat(&next, current).unwrap_or(current);
    hand_off(&mut next, to, cfg);
    next
}

/// Pass control without committing a unit, for an escalating fee.
pub fn skip_turn(state: &GameState, cfg: &GameConfig) -> Result<GameState, Rejection> {
    let current = state.current_player;
    let cost = cost::skip_cost(cfg, &state.players[current]);
    if state.players[current].energy < cost {
        return Err(Rejection::LowEnergy { cost });
    }

    let mut next = state.clone();
    let player = &mut next.players[current];
    player.energy -= cost;
    player.skip_count_this_round += 1;
    let skip_count = player.skip_count_this_round;
    let entry = GameLog::new(next.turn_count, "log_skip_turn", LogKind::Info)
        .owned_by(current)
        .param("cost", cost)
        .param("skipCount", skip_count);
    push_log(&mut next.logs, entry, cfg.max_logs);

    match next_seat(&next, current) {
        Some(to) => hand_off(&mut next, to, cfg),
        None => return Ok(start_new_round(&next, cfg)),
    }
    Ok(next)
}

/// Roll the round over: income, counters, debuffs, respawns, and back to the
/// thinking phase with P1 nominally current.
pub fn start_new_round(state: &GameState, cfg: &GameConfig) -> GameState {
    let mut next = state.clone();
    let turn = state.turn_count + 1;
    next.turn_count = turn;

    for seat in PlayerId::BOTH {
        let player = &mut next.players[seat];
        player.energy = cost::energy_income(cfg, player.energy, turn) + player.energy_from_kills;
        player.energy_from_kills = 0;
        player.skip_count_this_round = 0;
        player.quest_stats.sweeper_scans_this_round = 0;
        player.quest_stats.ranger_mines_moved_this_round.clear();
        player.quest_stats.flag_spirit_damage_taken_this_turn.clear();
        let energy = player.energy;
        for unit in &mut player.units {
            unit.has_acted_this_round = false;
            unit.energy_used_this_turn = 0;
            unit.start_of_action_energy = energy;
            if unit.status.move_cost_debuff_duration > 0 {
                unit.status.move_cost_debuff_duration -= 1;
                if unit.status.move_cost_debuff_duration == 0 {
                    unit.status.move_cost_debuff = 0;
                }
            }
        }
    }

    // Respawns need the board as a whole to check the home cell.
    let due: Vec<String> = PlayerId::BOTH
        .iter()
        .flat_map(|&p| next.players[p].units.iter())
        .filter(|u| u.is_dead && u.unit_type != UnitType::General && u.respawn_timer > 0)
        .map(|u| u.id.clone())
        .collect();
    for id in due {
        let Some(unit) = next.unit(&id) else {
            continue;
        };
        let home = unit.home;
        let timer = unit.respawn_timer - 1;
        let home_free = next.unit_at(home).is_none();
        let Some(unit) = next.unit_mut(&id) else {
            continue;
        };
        if timer > 0 {
            unit.respawn_timer = timer;
        } else if home_free {
            unit.respawn_timer = 0;
            unit.is_dead = false;
            unit.hp = unit.max_hp;
            unit.pos = home;
            unit.status = UnitStatus::default();
        } else {
            // Home is blocked; try again next round.
            unit.respawn_timer = 1;
        }
    }

    next.phase = Phase::Thinking;
    next.current_player = PlayerId::P1;
    next.time_left = cfg.thinking_seconds;
    next.selected_unit_id = None;
    next.active_unit_id = None;
    next.is_time_frozen = false;
    next.pvp_ready_state = Default::default();
    next.pvp_energy_bids = Default::default();
    log::debug!("round {turn} begins");
    let entry = GameLog::new(turn, "log_round_start", LogKind::Info).param("round", turn);
    push_log(&mut next.logs, entry, cfg.max_logs);
    next
}
