// Pure action mutation functions.
//
// `apply_action(&state, &action, origin, &cfg)` is the one entry point for
// every player action in the action phase. It is used both when the local
// player acts and when a validated remote envelope is replayed, so the two
// peers run exactly the same code on (ideally) the same state.
//
// `Origin` changes only side effects, never the rules:
// - a rejected `Local` action leaves a private hint log for the acting
//   player (`log_energy_cap`, `log_out_of_range`, ...);
// - a rejected `Remote` action leaves the state untouched, so hints are
//   never fabricated on the other player's behalf.
//
// Costs always come from `cost.rs`, never from the caller.
//
// END_TURN and SKIP_TURN hand control to the other player and may start a
// new round; they live in `round.rs` and are dispatched from here.

use minechess_protocol::{Branch, Coord, MineType, Phase, PlayerId, UnitType};
use serde_json::json;

use crate::config::GameConfig;
use crate::cost;
use crate::gamelog::{GameLog, LogKind, push_log};
use crate::round;
use crate::state::{BuildingKind, GameState, Mine, SensorKind, SensorResult, Unit, VisualEffect};

/// Every action a player can take once the action phase is running.
#[derive(Clone, Debug, PartialEq)]
pub enum GameAction {
    Move {
        unit_id: String,
        target: Coord,
    },
    Attack {
        attacker_id: String,
        target_id: String,
    },
    Scan {
        unit_id: String,
        target: Coord,
    },
    SensorScan {
        unit_id: String,
        target: Coord,
    },
    PlaceMine {
        unit_id: String,
        target: Coord,
        mine_type: MineType,
    },
    Evolve {
        unit_type: UnitType,
        branch: Branch,
        variant: Option<u8>,
    },
    EndTurn {
        acted_unit_id: Option<String>,
    },
    SkipTurn,
    PickupFlag {
        unit_id: String,
    },
    DropFlag {
        unit_id: String,
    },
}

impl GameAction {
    /// The unit the action is performed by, if it names one.
    pub fn unit_id(&self) -> Option<&str> {
        match self {
            GameAction::Move { unit_id, .. }
            | GameAction::Scan { unit_id, .. }
            | GameAction::SensorScan { unit_id, .. }
            | GameAction::PlaceMine { unit_id, .. }
            | GameAction::PickupFlag { unit_id }
            | GameAction::DropFlag { unit_id } => Some(unit_id),
            GameAction::Attack { attacker_id, .. } => Some(attacker_id),
            GameAction::EndTurn { acted_unit_id } => acted_unit_id.as_deref(),
            GameAction::Evolve { .. } | GameAction::SkipTurn => None,
        }
    }

    /// The seat performing the action: the named unit's owner, or the
    /// player whose turn it is for actions that name no unit.
    pub fn owner(&self, state: &GameState) -> Option<PlayerId> {
        match self.unit_id() {
            Some(id) => state.unit(id).map(|u| u.owner),
            None => Some(state.current_player),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// Why the rules refused an action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    WrongPhase,
    GameOver,
    UnknownUnit,
    NotOwnersTurn,
    NotAllowed,
    UnitActed,
    Committed,
    OutOfRange,
    ScanRange,
    MakerRange,
    Obstacle,
    SpaceHasMine,
    MaxMines,
    ScanBlocked,
    MissingEvolution,
    MaxLevel,
    LowEnergy { cost: u32 },
    LowEnergyAttack { cost: u32 },
    EnergyCap { cap: u32 },
    PlacementZone,
    PlacementLimit,
}

impl Rejection {
    /// The private hint the acting player sees, if this rejection has one.
    pub fn hint(&self, turn: u32, owner: PlayerId) -> Option<GameLog> {
        let (key, kind) = match self {
            Rejection::UnitActed => ("log_unit_acted", LogKind::Info),
            Rejection::Committed => ("log_committed", LogKind::Info),
            Rejection::OutOfRange => ("log_out_of_range", LogKind::Info),
            Rejection::ScanRange => ("log_scan_range", LogKind::Info),
            Rejection::MakerRange => ("log_maker_range", LogKind::Error),
            Rejection::Obstacle => ("log_obstacle", LogKind::Error),
            Rejection::SpaceHasMine => ("log_space_has_mine", LogKind::Error),
            Rejection::MaxMines => ("log_max_mines", LogKind::Error),
            Rejection::ScanBlocked => ("log_scan_smoke_blocked", LogKind::Error),
            Rejection::MissingEvolution => ("log_low_energy_evolve", LogKind::Error),
            Rejection::PlacementZone => ("log_mine_zone", LogKind::Error),
            Rejection::PlacementLimit => ("log_mine_limit", LogKind::Error),
            Rejection::LowEnergy { cost } => {
                return Some(
                    GameLog::new(turn, "log_low_energy", LogKind::Info)
                        .owned_by(owner)
                        .param("cost", *cost),
                );
            }
            Rejection::LowEnergyAttack { cost } => {
                return Some(
                    GameLog::new(turn, "log_low_energy_attack", LogKind::Info)
                        .owned_by(owner)
                        .param("cost", *cost),
                );
            }
            Rejection::EnergyCap { cap } => {
                return Some(
                    GameLog::new(turn, "log_energy_cap", LogKind::Error)
                        .owned_by(owner)
                        .param("cap", *cap),
                );
            }
            Rejection::WrongPhase
            | Rejection::GameOver
            | Rejection::UnknownUnit
            | Rejection::NotOwnersTurn
            | Rejection::NotAllowed
            | Rejection::MaxLevel => return None,
        };
        Some(GameLog::new(turn, key, kind).owned_by(owner))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ActionOutcome {
    pub state: GameState,
    pub rejection: Option<Rejection>,
}

impl ActionOutcome {
    pub fn applied(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Apply `action` to `state`.
pub fn apply_action(
    state: &GameState,
    action: &GameAction,
    origin: Origin,
    cfg: &GameConfig,
) -> ActionOutcome {
    match try_apply(state, action, cfg) {
        Ok(next) => ActionOutcome {
            state: next,
            rejection: None,
        },
        Err(rejection) => {
            let mut unchanged = state.clone();
            if origin == Origin::Local {
                let owner = action.owner(state).unwrap_or(state.current_player);
                if let Some(hint) = rejection.hint(state.turn_count, owner) {
                    push_log(&mut unchanged.logs, hint, cfg.max_logs);
                }
            }
            ActionOutcome {
                state: unchanged,
                rejection: Some(rejection),
            }
        }
    }
}

fn try_apply(state: &GameState, action: &GameAction, cfg: &GameConfig) -> Result<GameState, Rejection> {
    if state.phase != Phase::Action {
        return Err(Rejection::WrongPhase);
    }
    if state.game_over {
        return Err(Rejection::GameOver);
    }
    match action {
        GameAction::Move { unit_id, target } => move_unit(state, unit_id, *target, cfg),
        GameAction::Attack {
            attacker_id,
            target_id,
        } => attack(state, attacker_id, target_id, cfg),
        GameAction::Scan { unit_id, target } => scan(state, unit_id, *target, cfg),
        GameAction::SensorScan { unit_id, target } => sensor_scan(state, unit_id, *target, cfg),
        GameAction::PlaceMine {
            unit_id,
            target,
            mine_type,
        } => place_mine(state, unit_id, *target, *mine_type, cfg),
        GameAction::Evolve {
            unit_type,
            branch,
            variant,
        } => evolve(state, *unit_type, *branch, *variant, cfg),
        GameAction::EndTurn { acted_unit_id } => {
            Ok(round::end_turn(state, acted_unit_id.as_deref(), cfg))
        }
        GameAction::SkipTurn => round::skip_turn(state, cfg),
        GameAction::PickupFlag { unit_id } => pickup_flag(state, unit_id, cfg),
        GameAction::DropFlag { unit_id } => drop_flag(state, unit_id, cfg),
    }
}

// ---------------------------------------------------------------------------
// Shared checks
// ---------------------------------------------------------------------------

/// The acting unit, after the checks every unit action shares.
fn actor<'a>(state: &'a GameState, unit_id: &str) -> Result<&'a Unit, Rejection> {
    let unit = state.unit(unit_id).ok_or(Rejection::UnknownUnit)?;
    if unit.is_dead {
        return Err(Rejection::NotAllowed);
    }
    if unit.owner != state.current_player {
        return Err(Rejection::NotOwnersTurn);
    }
    if unit.has_acted_this_round {
        return Err(Rejection::UnitActed);
    }
    if state
        .active_unit_id
        .as_deref()
        .is_some_and(|active| active != unit.id)
    {
        return Err(Rejection::Committed);
    }
    Ok(unit)
}

fn check_energy(state: &GameState, unit: &Unit, cost: u32, cfg: &GameConfig) -> Result<(), Rejection> {
    if state.players[unit.owner].energy < cost {
        return Err(Rejection::LowEnergy { cost });
    }
    if !cost::within_energy_cap(cfg, unit, cost) {
        return Err(Rejection::EnergyCap {
            cap: cost::energy_cap(cfg, unit),
        });
    }
    Ok(())
}

/// Deduct `cost` from the owner and the unit's per-phase budget, commit the
/// unit, and freeze the turn timer.
fn spend(next: &mut GameState, unit_id: &str, owner: PlayerId, cost: u32) {
    let player = &mut next.players[owner];
    player.energy = player.energy.saturating_sub(cost);
    if let Some(unit) = next.unit_mut(unit_id) {
        unit.energy_used_this_turn += cost;
    }
    next.active_unit_id = Some(unit_id.to_owned());
    next.is_time_frozen = true;
}

fn log(next: &mut GameState, entry: GameLog, cfg: &GameConfig) {
    push_log(&mut next.logs, entry, cfg.max_logs);
}

/// Apply damage to a unit. On death the unit drops any flag where it fell,
/// and a dead General ends the game in favour of the other seat.
fn damage_unit(next: &mut GameState, unit_id: &str, amount: u32) -> bool {
    let turn = next.turn_count;
    let Some(unit) = next.unit_mut(unit_id) else {
        return false;
    };
    unit.hp = unit.hp.saturating_sub(amount);
    if unit.hp > 0 {
        return false;
    }
    unit.is_dead = true;
    unit.has_flag = false;
    unit.respawn_timer = if unit.unit_type == UnitType::General {
        0
    } else {
        round::respawn_delay(turn)
    };
    let owner = unit.owner;
    let is_general = unit.unit_type == UnitType::General;
    if is_general {
        next.game_over = true;
        next.winner = Some(owner.opponent());
    }
    true
}

/// A player wins by bringing their own flag onto the enemy flag base.
fn check_flag_victory(next: &mut GameState, cfg: &GameConfig) {
    for player in PlayerId::BOTH {
        if next.players[player].flag_position == cfg.flag_position(player.opponent()) {
            next.game_over = true;
            next.winner = Some(player);
            let entry = GameLog::new(next.turn_count, "log_victory", LogKind::Info)
                .param("player", player.as_str());
            log(next, entry, cfg);
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

fn move_unit(state: &GameState, unit_id: &str, target: Coord, cfg: &GameConfig) -> Result<GameState, Rejection> {
    let unit = actor(state, unit_id)?;
    if !cfg.in_board(target) || unit.pos.manhattan(target) != 1 {
        return Err(Rejection::OutOfRange);
    }
    if state.unit_at(target).is_some() {
        return Err(Rejection::Obstacle);
    }
    let cost = cost::authoritative_move_cost(state, unit, cfg);
    check_energy(state, unit, cost, cfg)?;

    let owner = unit.owner;
    let from = unit.pos;
    let carries_flag = unit.has_flag;
    let mut next = state.clone();
    spend(&mut next, unit_id, owner, cost);
    if let Some(moved) = next.unit_mut(unit_id) {
        moved.pos = target;
    }
    if carries_flag {
        let player = &mut next.players[owner];
        player.flag_position = target;
        player.quest_stats.flag_moves += 1;
    }
    let entry = GameLog::new(next.turn_count, "log_move_action", LogKind::Move)
        .owned_by(owner)
        .param("fromR", from.r + 1)
        .param("fromC", from.c + 1)
        .param("toR", target.r + 1)
        .param("toC", target.c + 1);
    log(&mut next, entry, cfg);

    let enemy_mine = next
        .mines
        .iter()
        .position(|m| m.pos == target && m.owner != owner);
    if let Some(index) = enemy_mine {
        let mine = next.mines.remove(index);
        let vulnerability = next.unit(unit_id).map_or(0, |u| u.status.mine_vulnerability);
        let damage = cfg.mine_damage + vulnerability;
        damage_unit(&mut next, unit_id, damage);
        next.vfx.push(VisualEffect {
            kind: "explosion".into(),
            pos: target,
        });
        let entry = GameLog::new(next.turn_count, "log_mine_hit", LogKind::Mine)
            .owned_by(owner)
            .param("dmg", damage)
            .param("mineType", json!(mine.mine_type));
        log(&mut next, entry, cfg);
    }

    check_flag_victory(&mut next, cfg);
    Ok(next)
}

fn attack(state: &GameState, attacker_id: &str, target_id: &str, cfg: &GameConfig) -> Result<GameState, Rejection> {
    let attacker = actor(state, attacker_id)?;
    if attacker.unit_type != UnitType::General {
        return Err(Rejection::NotAllowed);
    }
    let target = state.unit(target_id).ok_or(Rejection::UnknownUnit)?;
    if target.is_dead || target.owner == attacker.owner {
        return Err(Rejection::NotAllowed);
    }
    let general = state.players[attacker.owner].evolution(UnitType::General);
    let range = if general.a >= 2 { 2 } else { 1 };
    if attacker.pos.manhattan(target.pos) > range || !attacker.pos.is_cardinal_to(target.pos) {
        return Err(Rejection::OutOfRange);
    }
    let empowered = attacker.has_flag && general.a3(1);
    if attacker.has_flag && !empowered {
        return Err(Rejection::NotAllowed);
    }
    let cost = cost::attack_cost(cfg, attacker, empowered);
    if state.players[attacker.owner].energy < cost {
        return Err(Rejection::LowEnergyAttack { cost });
    }
    check_energy(state, attacker, cost, cfg)?;

    let owner = attacker.owner;
    let victim_owner = target.owner;
    let damage = cfg
        .stats(UnitType::General)
        .and_then(|s| s.attack_damage)
        .unwrap_or(4);
    let victim_energy = state.players[victim_owner].energy;

    let mut next = state.clone();
    spend(&mut next, attacker_id, owner, cost);
    if empowered {
        if let Some(general_unit) = next.unit_mut(attacker_id) {
            general_unit.hp = (general_unit.hp + 4).min(general_unit.max_hp);
        }
    }
    if let Some(victim) = next.unit_mut(target_id) {
        if general.a >= 1 {
            victim.status.mine_vulnerability = (victim.status.mine_vulnerability + 1).min(2);
        }
        if general.a >= 2 {
            victim.status.move_cost_debuff = victim.status.move_cost_debuff.max(2);
            victim.status.move_cost_debuff_duration = victim.status.move_cost_debuff_duration.max(2);
        }
    }
    let victim_pos = target.pos;
    let killed = damage_unit(&mut next, target_id, damage);
    next.players[owner].quest_stats.general_damage += damage;
    next.vfx.push(VisualEffect {
        kind: "hit".into(),
        pos: victim_pos,
    });

    let entry = GameLog::new(next.turn_count, "log_attack_hit", LogKind::Combat)
        .owned_by(owner)
        .param("attacker", json!(UnitType::General))
        .param("target", json!(target.unit_type))
        .param("dmg", damage);
    log(&mut next, entry, cfg);

    if killed {
        let reward = 3 + victim_energy * 15 / 100;
        next.players[owner].energy_from_kills += reward;
        let entry = GameLog::new(next.turn_count, "log_kill_reward", LogKind::Info)
            .owned_by(owner)
            .param("amount", reward);
        log(&mut next, entry, cfg);
    }
    Ok(next)
}

fn scan(state: &GameState, unit_id: &str, target: Coord, cfg: &GameConfig) -> Result<GameState, Rejection> {
    let unit = actor(state, unit_id)?;
    if unit.unit_type != UnitType::Sweeper {
        return Err(Rejection::NotAllowed);
    }
    if unit.pos.manhattan(target) > 3 {
        return Err(Rejection::ScanRange);
    }
    let owner = unit.owner;
    let enemy = owner.opponent();
    let player = &state.players[owner];
    let cost = cost::scan_cost(cfg, unit, player);
    check_energy(state, unit, cost, cfg)?;

    let smoked = state.buildings.iter().any(|b| {
        b.owner == enemy
            && b.kind == BuildingKind::Hub
            && b.level == 3
            && b.variant == Some(1)
            && b.pos.manhattan(target) <= 2
    });
    if smoked {
        return Err(Rejection::ScanBlocked);
    }

    let mut next = state.clone();
    spend(&mut next, unit_id, owner, cost);
    let mut found = false;
    for mine in next
        .mines
        .iter_mut()
        .filter(|m| m.pos == target && m.owner == enemy)
    {
        found = true;
        mine.revealed_to.insert(owner);
    }
    next.sensor_results
        .retain(|s| !(s.kind == SensorKind::Mark && s.owner == owner && s.pos == target));
    next.sensor_results.push(SensorResult {
        pos: target,
        count: u32::from(found),
        kind: SensorKind::Mark,
        success: Some(found),
        owner,
        created_turn: next.turn_count,
    });
    let stats = &mut next.players[owner].quest_stats;
    stats.sweeper_scans_performed += 1;
    stats.sweeper_scans_this_round += 1;
    if found {
        stats.sweeper_mines_marked += 1;
    }
    let key = if found {
        "log_scan_mark_success"
    } else {
        "log_scan_mark_fail"
    };
    let entry = GameLog::new(next.turn_count, key, LogKind::Move)
        .owned_by(owner)
        .param("r", target.r + 1)
        .param("c", target.c + 1);
    log(&mut next, entry, cfg);
    Ok(next)
}

fn sensor_scan(state: &GameState, unit_id: &str, target: Coord, cfg: &GameConfig) -> Result<GameState, Rejection> {
    let unit = actor(state, unit_id)?;
    if unit.unit_type != UnitType::Sweeper {
        return Err(Rejection::NotAllowed);
    }
    if unit.pos.chebyshev(target) > 2 {
        return Err(Rejection::ScanRange);
    }
    let owner = unit.owner;
    let enemy = owner.opponent();
    let sweeper = state.players[owner].evolution(UnitType::Sweeper);
    let cost = cost::sensor_scan_cost(cfg, unit, &state.players[owner]);
    check_energy(state, unit, cost, cfg)?;

    let mut next = state.clone();
    spend(&mut next, unit_id, owner, cost);
    let reveal_all = sweeper.b3(2);
    let area: Vec<Coord> = target.neighborhood().collect();
    let mut count = 0;
    for mine in next
        .mines
        .iter_mut()
        .filter(|m| m.owner == enemy && area.contains(&m.pos))
    {
        count += 1;
        if reveal_all || (sweeper.b >= 2 && mine.pos == target) {
            mine.revealed_to.insert(owner);
        }
    }
    if !reveal_all {
        next.sensor_results.push(SensorResult {
            pos: target,
            count,
            kind: SensorKind::Count,
            success: None,
            owner,
            created_turn: next.turn_count,
        });
    }
    let entry = GameLog::new(next.turn_count, "log_sensor_scan", LogKind::Move)
        .owned_by(owner)
        .param("r", target.r + 1)
        .param("c", target.c + 1)
        .param("count", count);
    log(&mut next, entry, cfg);
    Ok(next)
}

fn place_mine(
    state: &GameState,
    unit_id: &str,
    target: Coord,
    mine_type: MineType,
    cfg: &GameConfig,
) -> Result<GameState, Rejection> {
    let unit = actor(state, unit_id)?;
    if unit.unit_type != UnitType::Maker {
        return Err(Rejection::NotAllowed);
    }
    let owner = unit.owner;
    let player = &state.players[owner];
    let maker = player.evolution(UnitType::Maker);

    let in_factory_range = state
        .buildings
        .iter()
        .filter(|b| b.owner == owner && b.kind == BuildingKind::Factory)
        .any(|f| {
            if f.level >= 2 {
                f.pos.manhattan(target) <= 2
            } else {
                f.pos.chebyshev(target) <= 1
            }
        });
    if !cfg.in_board(target) || (unit.pos.manhattan(target) > 1 && !in_factory_range) {
        return Err(Rejection::MakerRange);
    }
    if state.unit_at(target).is_some_and(|u| u.id != unit.id) || state.building_at(target).is_some() {
        return Err(Rejection::Obstacle);
    }
    let blocked_by_mine = state
        .mines
        .iter()
        .any(|m| m.pos == target && (m.owner == owner || m.revealed_to.contains(&owner)));
    if blocked_by_mine {
        return Err(Rejection::SpaceHasMine);
    }
    let unlocked = match mine_type {
        MineType::Normal => true,
        MineType::Slow => maker.a >= 1,
        MineType::Smoke => maker.a >= 2,
        MineType::Chain => maker.a3(1),
        MineType::Nuke => maker.a3(2),
    };
    if !unlocked {
        return Err(Rejection::MissingEvolution);
    }
    let own_mines = state.mines.iter().filter(|m| m.owner == owner).count();
    if own_mines >= cfg.max_mines_on_board as usize {
        return Err(Rejection::MaxMines);
    }
    let cost = if maker.b3(1) && in_factory_range {
        cost::with_territory(cfg, unit, 3)
    } else {
        cost::place_mine_cost(cfg, unit, mine_type)
    };
    check_energy(state, unit, cost, cfg)?;

    let mut next = state.clone();
    spend(&mut next, unit_id, owner, cost);
    let serial = next.players[owner].quest_stats.maker_mines_placed + 1;
    next.players[owner].quest_stats.maker_mines_placed = serial;
    next.mines.push(Mine {
        id: format!("mk-{owner}-{serial}"),
        owner,
        mine_type,
        pos: target,
        revealed_to: [owner].into(),
    });
    let entry = GameLog::new(next.turn_count, "log_place_mine", LogKind::Mine)
        .owned_by(owner)
        .param("mineType", json!(mine_type));
    log(&mut next, entry, cfg);
    Ok(next)
}

fn evolve(
    state: &GameState,
    unit_type: UnitType,
    branch: Branch,
    variant: Option<u8>,
    cfg: &GameConfig,
) -> Result<GameState, Rejection> {
    let owner = state.current_player;
    let levels = state.players[owner].evolution(unit_type);
    let level = match branch {
        Branch::A => levels.a,
        Branch::B => levels.b,
    };
    let cost = cost::evolution_cost(cfg, level).ok_or(Rejection::MaxLevel)?;
    if state.players[owner].energy < cost {
        return Err(Rejection::LowEnergy { cost });
    }

    let mut next = state.clone();
    let player = &mut next.players[owner];
    player.energy -= cost;
    let entry = player.evolution_levels.entry(unit_type).or_default();
    match branch {
        Branch::A => {
            entry.a = level + 1;
            entry.a_variant = variant.or(entry.a_variant);
        }
        Branch::B => {
            entry.b = level + 1;
            entry.b_variant = variant.or(entry.b_variant);
        }
    }
    next.is_time_frozen = true;
    let entry = GameLog::new(next.turn_count, "log_evolved", LogKind::Move)
        .owned_by(owner)
        .param("unitType", json!(unit_type))
        .param("branch", json!(branch))
        .param("level", level + 1);
    log(&mut next, entry, cfg);
    Ok(next)
}

fn pickup_flag(state: &GameState, unit_id: &str, cfg: &GameConfig) -> Result<GameState, Rejection> {
    let unit = actor(state, unit_id)?;
    if unit.has_flag {
        return Err(Rejection::NotAllowed);
    }
    let player = &state.players[unit.owner];
    let any_unit_may_carry = player.evolution(UnitType::General).b3(1);
    if unit.unit_type != UnitType::General && !any_unit_may_carry {
        return Err(Rejection::NotAllowed);
    }
    if unit.pos != player.flag_position {
        return Err(Rejection::NotAllowed);
    }
    let owner = unit.owner;
    let pos = unit.pos;
    let mut next = state.clone();
    if let Some(carrier) = next.unit_mut(unit_id) {
        carrier.has_flag = true;
    }
    next.active_unit_id = Some(unit_id.to_owned());
    next.is_time_frozen = true;
    let entry = GameLog::new(next.turn_count, "log_flag_pickup", LogKind::Move)
        .owned_by(owner)
        .param("r", pos.r + 1)
        .param("c", pos.c + 1);
    log(&mut next, entry, cfg);
    Ok(next)
}

fn drop_flag(state: &GameState, unit_id: &str, cfg: &GameConfig) -> Result<GameState, Rejection> {
    let unit = state.unit(unit_id).ok_or(Rejection::UnknownUnit)?;
    if unit.owner != state.current_player {
        return Err(Rejection::NotOwnersTurn);
    }
    if !unit.has_flag {
        return Err(Rejection::NotAllowed);
    }
    let owner = unit.owner;
    let pos = unit.pos;
    let mut next = state.clone();
    if let Some(carrier) = next.unit_mut(unit_id) {
        carrier.has_flag = false;
    }
    next.players[owner].flag_position = pos;
    next.active_unit_id = Some(unit_id.to_owned());
    next.is_time_frozen = true;
    let entry = GameLog::new(next.turn_count, "log_flag_drop", LogKind::Move)
        .owned_by(owner)
        .param("r", pos.r + 1)
        .param("c", pos.c + 1);
    log(&mut next, entry, cfg);
    Ok(next)
}
