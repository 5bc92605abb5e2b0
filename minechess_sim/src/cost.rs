// Authoritative energy costs.
//
// Every number a player pays is computed here from the local `GameState`
// alone. Both peers run the same functions on the same state, so a MOVE's
// advisory `cost` field is never trusted: the applier calls
// `authoritative_move_cost` instead. Anything that changes these functions
// must change on both sides at once, or balances diverge silently.
//
// Move cost is built in layers:
//   1. base: unit move cost; flag carriers pay the flag cost (5, or 4 with
//      General B3 variant 1); a Ranger holding a mine pays 3.
//   2. a Ranger with B >= 3 always starts from 2.
//   3. an own hub within Manhattan 2 of the unit takes 1 off (minimum 1).
//   4. the unit's move-cost debuff is added.
//   5. stealth resets the cost to 3, except for a Ranger with B3 variant 1.
//   6. enemy territory surcharge: +1 below 5, +2 at 5 or more.

use minechess_protocol::{MineType, UnitType};

use crate::config::GameConfig;
use crate::state::{BuildingKind, GameState, PlayerState, Unit};

pub fn in_enemy_territory(cfg: &GameConfig, unit: &Unit) -> bool {
    !cfg.is_home_half(unit.owner, unit.pos)
}

/// Apply the enemy-territory surcharge to `base`.
pub fn with_territory(cfg: &GameConfig, unit: &Unit, base: u32) -> u32 {
    if !in_enemy_territory(cfg, unit) {
        base
    } else if base < 5 {
        base + 1
    } else {
        base + 2
    }
}

fn base_move_cost(cfg: &GameConfig, unit: &Unit, player: &PlayerState) -> u32 {
    let general = player.evolution(UnitType::General);
    let empowered_flag = general.b3(1);
    let stats_cost = cfg.stats(unit.unit_type).map_or(0, |s| s.move_cost);

    if unit.has_flag {
        if empowered_flag {
            cfg.empowered_flag_move_cost
        } else if unit.unit_type == UnitType::General {
            cfg.stats(UnitType::General)
                .and_then(|s| s.flag_move_cost)
                .unwrap_or(cfg.carrier_move_cost)
        } else {
            cfg.carrier_move_cost
        }
    } else if unit.unit_type == UnitType::Ranger && unit.carried_mine.is_some() {
        cfg.ranger_carry_move_cost
    } else {
        stats_cost
    }
}

/// The energy `unit` pays for one step, recomputed from `state`.
pub fn authoritative_move_cost(state: &GameState, unit: &Unit, cfg: &GameConfig) -> u32 {
    let player = &state.players[unit.owner];
    let ranger = player.evolution(UnitType::Ranger);
    let mut cost = base_move_cost(cfg, unit, player);

    if unit.unit_type == UnitType::Ranger && ranger.b >= 3 {
        cost = 2;
    }

    let near_own_hub = state
        .buildings
        .iter()
        .find(|b| b.owner == unit.owner && b.kind == BuildingKind::Hub)
        .is_some_and(|hub| hub.pos.manhattan(unit.pos) <= cfg.hub_discount_range);
    if near_own_hub {
        cost = cost.saturating_sub(1).max(1);
    }

    cost += unit.status.move_cost_debuff;

    if unit.status.is_stealthed && !(unit.unit_type == UnitType::Ranger && ranger.b3(1)) {
        cost = cfg.stealth_move_cost;
    }

    with_territory(cfg, unit, cost)
}

/// Largest total a unit may spend during one action phase.
pub fn energy_cap(cfg: &GameConfig, unit: &Unit) -> u32 {
    let scaled = u64::from(unit.start_of_action_energy) * u64::from(cfg.energy_cap_ratio_bp) / 10_000;
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

pub fn within_energy_cap(cfg: &GameConfig, unit: &Unit, cost: u32) -> bool {
    unit.energy_used_this_turn + cost <= energy_cap(cfg, unit)
}

/// `(skips so far this round + 1) * step`.
pub fn skip_cost(cfg: &GameConfig, player: &PlayerState) -> u32 {
    (player.skip_count_this_round + 1) * cfg.skip_cost_step
}

/// Energy after the start-of-round income: regen plus capped interest.
pub fn energy_income(cfg: &GameConfig, energy: u32, turn: u32) -> u32 {
    let interest = (energy / 10).min(cfg.interest_cap);
    energy + cfg.regen_for_turn(turn) + interest
}

pub fn attack_cost(cfg: &GameConfig, unit: &Unit, empowered_flag_attack: bool) -> u32 {
    let base = if empowered_flag_attack {
        6
    } else {
        cfg.stats(UnitType::General)
            .and_then(|s| s.attack_cost)
            .unwrap_or(8)
    };
    with_territory(cfg, unit, base)
}

pub fn scan_cost(cfg: &GameConfig, unit: &Unit, player: &PlayerState) -> u32 {
    let base = if player.quest_stats.sweeper_scans_this_round >= 2 {
        4
    } else {
        3
    };
    with_territory(cfg, unit, base)
}

pub fn sensor_scan_cost(cfg: &GameConfig, unit: &Unit, player: &PlayerState) -> u32 {
    let base = if player.evolution(UnitType::Sweeper).b >= 3 {
        4
    } else {
        5
    };
    with_territory(cfg, unit, base)
}

pub fn place_mine_cost(cfg: &GameConfig, unit: &Unit, mine_type: MineType) -> u32 {
    with_territory(cfg, unit, cfg.mine_cost(mine_type))
}

/// Price of raising a branch from `level`, or `None` once maxed.
pub fn evolution_cost(cfg: &GameConfig, level: u8) -> Option<u32> {
    cfg.evolution_costs.get(usize::from(level)).copied()
}

#[cfg(test)]
mod tests {
    use minechess_protocol::{Coord, GameMode, PlayerId};

    use super::*;
    use crate::state::{Building, EvolutionLevels, Mine};

    fn setup() -> (GameState, GameConfig) {
        let cfg = GameConfig::default();
        (GameState::new_match(GameMode::Pvp, &cfg), cfg)
    }

    fn place(state: &mut GameState, unit_id: &str, pos: Coord) -> Unit {
        let unit = state.unit_mut(unit_id).unwrap();
        unit.pos = pos;
        unit.clone()
    }

    #[test]
    fn base_costs_at_home() {
        let (state, cfg) = setup();
        let general = state.unit("p1-general").unwrap();
        let ranger = state.unit("p1-ranger").unwrap();
        assert_eq!(authoritative_move_cost(&state, general, &cfg), 3);
        assert_eq!(authoritative_move_cost(&state, ranger, &cfg), 2);
    }

    #[test]
    fn territory_surcharge_is_tiered() {
        let (mut state, cfg) = setup();
        let ranger = place(&mut state, "p1-ranger", Coord::new(1, 12));
        assert_eq!(authoritative_move_cost(&state, &ranger, &cfg), 3);

        let general = state.unit_mut("p1-general").unwrap();
        general.pos = Coord::new(2, 14);
        general.has_flag = true;
        let general = general.clone();
        assert_eq!(authoritative_move_cost(&state, &general, &cfg), 7);

        // P2 is in enemy territory left of the midline.
        let p2_sweeper = place(&mut state, "p2-sweeper", Coord::new(0, 11));
        assert_eq!(authoritative_move_cost(&state, &p2_sweeper, &cfg), 4);
    }

    #[test]
    fn flag_costs() {
        let (mut state, cfg) = setup();
        let maker = state.unit_mut("p1-maker").unwrap();
        maker.has_flag = true;
        let maker = maker.clone();
        assert_eq!(authoritative_move_cost(&state, &maker, &cfg), 5);

        state.players[PlayerId::P1].evolution_levels.insert(
            UnitType::General,
            EvolutionLevels {
                b: 3,
                b_variant: Some(1),
                ..EvolutionLevels::default()
            },
        );
        assert_eq!(authoritative_move_cost(&state, &maker, &cfg), 4);
    }

    #[test]
    fn ranger_with_mine_and_evolution() {
        let (mut state, cfg) = setup();
        let ranger = state.unit_mut("p1-ranger").unwrap();
        ranger.carried_mine = Some(Mine::setup(PlayerId::P1, Coord::new(0, 0)));
        let ranger = ranger.clone();
        assert_eq!(authoritative_move_cost(&state, &ranger, &cfg), 3);

        state.players[PlayerId::P1].evolution_levels.insert(
            UnitType::Ranger,
            EvolutionLevels {
                b: 3,
                b_variant: Some(2),
                ..EvolutionLevels::default()
            },
        );
        assert_eq!(authoritative_move_cost(&state, &ranger, &cfg), 2);
    }

    #[test]
    fn hub_discount_debuff_and_stealth() {
        let (mut state, cfg) = setup();
        state.buildings.push(Building {
            id: "hub-1".into(),
            owner: PlayerId::P1,
            kind: crate::state::BuildingKind::Hub,
            pos: Coord::new(0, 3),
            level: 1,
            variant: None,
        });
        let sweeper = state.unit("p1-sweeper").unwrap().clone();
        assert_eq!(sweeper.pos, Coord::new(0, 1));
        assert_eq!(authoritative_move_cost(&state, &sweeper, &cfg), 2);

        let debuffed = state.unit_mut("p1-sweeper").unwrap();
        debuffed.status.move_cost_debuff = 2;
        let debuffed = debuffed.clone();
        assert_eq!(authoritative_move_cost(&state, &debuffed, &cfg), 4);

        let stealthed = state.unit_mut("p1-sweeper").unwrap();
        stealthed.status.is_stealthed = true;
        let stealthed = stealthed.clone();
        assert_eq!(authoritative_move_cost(&state, &stealthed, &cfg), 3);
    }

    #[test]
    fn energy_cap_uses_start_of_action_energy() {
        let (state, cfg) = setup();
        let mut unit = state.unit("p1-general").unwrap().clone();
        unit.start_of_action_energy = 50;
        assert_eq!(energy_cap(&cfg, &unit), 16);
        unit.energy_used_this_turn = 13;
        assert!(within_energy_cap(&cfg, &unit, 3));
        assert!(!within_energy_cap(&cfg, &unit, 4));
        unit.start_of_action_energy = 3;
        assert_eq!(energy_cap(&cfg, &unit), 0);
        // 0.3333, not a true third: multiples of three land one short.
        unit.start_of_action_energy = 30;
        assert_eq!(energy_cap(&cfg, &unit), 9);
        unit.start_of_action_energy = 300;
        assert_eq!(energy_cap(&cfg, &unit), 99);
    }

    #[test]
    fn income_and_skip() {
        let (state, cfg) = setup();
        assert_eq!(energy_income(&cfg, 50, 1), 50 + 35 + 5);
        assert_eq!(energy_income(&cfg, 300, 12), 300 + 50 + 10);
        let mut player = state.players[PlayerId::P1].clone();
        assert_eq!(skip_cost(&cfg, &player), 10);
        player.skip_count_this_round = 2;
        assert_eq!(skip_cost(&cfg, &player), 30);
    }

    #[test]
    fn evolution_prices() {
        let cfg = GameConfig::default();
        assert_eq!(evolution_cost(&cfg, 0), Some(10));
        assert_eq!(evolution_cost(&cfg, 2), Some(30));
        assert_eq!(evolution_cost(&cfg, 3), None);
    }
}
