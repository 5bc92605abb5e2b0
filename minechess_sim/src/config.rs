// Data-driven rules configuration.
//
// Every tunable number the rules read lives in `GameConfig`: board size,
// energy economy, per-unit stats, mine prices, evolution prices, limits and
// phase timers. The rules never hard-code these. Both peers must run with
// identical configs, since cost computation is recomputed independently on
// each side and any divergence is a desync.
//
// See also: `cost.rs`, which turns these numbers into authoritative action
// costs, and `action.rs` / `round.rs`, which spend them.
//
// **Critical constraint: determinism.** Nothing here may depend on wall
// clock or randomness.

use std::collections::BTreeMap;

use minechess_protocol::{BOARD_COLS, BOARD_ROWS, Coord, MineType, PlayerId, UnitType};
use serde::{Deserialize, Serialize};

/// Per-unit-type base numbers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStats {
    pub max_hp: u32,
    pub move_cost: u32,
    /// General only: cost of a move while carrying the flag.
    #[serde(default)]
    pub flag_move_cost: Option<u32>,
    #[serde(default)]
    pub attack_cost: Option<u32>,
    #[serde(default)]
    pub attack_damage: Option<u32>,
}

/// One rung of the per-round energy regeneration ladder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenStep {
    /// First turn this rung applies to.
    pub from_turn: u32,
    pub amount: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    pub rows: u8,
    pub cols: u8,
    pub initial_energy: u32,
    pub unit_stats: BTreeMap<UnitType, UnitStats>,
    pub mine_costs: BTreeMap<MineType, u32>,
    pub mine_damage: u32,
    /// Indexed by current branch level (0, 1, 2).
    pub evolution_costs: [u32; 3],
    /// Setup mines each player may place during placement.
    pub placement_mine_limit: u32,
    /// Own mines a player may have on the board during the action phase.
    pub max_mines_on_board: u32,
    pub flag_positions: [Coord; 2],
    /// Sorted by `from_turn`; the last rung whose `from_turn <= turn` wins.
    pub energy_regen: Vec<RegenStep>,
    /// Interest is `floor(energy / 10)`, capped here.
    pub interest_cap: u32,
    /// Per-unit action budget, in ten-thousandths of the player's energy at
    /// the start of the action phase. 3333 gives `floor(energy * 0.3333)`,
    /// which is one short of a third for multiples of three.
    pub energy_cap_ratio_bp: u32,
    /// Carrying the flag costs this for anyone but a General.
    pub carrier_move_cost: u32,
    /// Flag move cost with General B3 variant 1 (both General and carriers).
    pub empowered_flag_move_cost: u32,
    pub ranger_carry_move_cost: u32,
    pub stealth_move_cost: u32,
    pub hub_discount_range: u32,
    pub pass_heal: u32,
    pub skip_cost_step: u32,
    pub max_logs: usize,
    pub placement_seconds: u32,
    pub thinking_seconds: u32,
    pub action_seconds: u32,
}

impl GameConfig {
    pub fn stats(&self, unit_type: UnitType) -> Option<&UnitStats> {
        self.unit_stats.get(&unit_type)
    }

    pub fn flag_position(&self, player: PlayerId) -> Coord {
        match player {
            PlayerId::P1 => self.flag_positions[0],
            PlayerId::P2 => self.flag_positions[1],
        }
    }

    /// First column of P2's half. P1 owns everything left of it.
    pub fn midline(&self) -> u8 {
        self.cols / 2
    }

    pub fn in_board(&self, cell: Coord) -> bool {
        cell.r < self.rows && cell.c < self.cols
    }

    /// True when `cell` lies in the half of the board `player` defends.
    pub fn is_home_half(&self, player: PlayerId, cell: Coord) -> bool {
        match player {
            PlayerId::P1 => cell.c < self.midline(),
            PlayerId::P2 => cell.c >= self.midline(),
        }
    }

    pub fn regen_for_turn(&self, turn: u32) -> u32 {
        self.energy_regen
            .iter()
            .rev()
            .find(|step| step.from_turn <= turn)
            .map_or(0, |step| step.amount)
    }

    pub fn mine_cost(&self, mine_type: MineType) -> u32 {
        self.mine_costs.get(&mine_type).copied().unwrap_or(0)
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        let mut unit_stats = BTreeMap::new();
        unit_stats.insert(
            UnitType::General,
            UnitStats {
                max_hp: 28,
                move_cost: 3,
                flag_move_cost: Some(5),
                attack_cost: Some(8),
                attack_damage: Some(4),
            },
        );
        let plain = |max_hp, move_cost| UnitStats {
            max_hp,
            move_cost,
            flag_move_cost: None,
            attack_cost: None,
            attack_damage: None,
        };
        unit_stats.insert(UnitType::Sweeper, plain(14, 3));
        unit_stats.insert(UnitType::Ranger, plain(16, 2));
        unit_stats.insert(UnitType::Maker, plain(12, 3));
        unit_stats.insert(UnitType::Defuser, plain(18, 3));

        let mine_costs = BTreeMap::from([
            (MineType::Normal, 5),
            (MineType::Slow, 4),
            (MineType::Smoke, 6),
            (MineType::Nuke, 9),
            (MineType::Chain, 7),
        ]);

        Self {
            rows: BOARD_ROWS,
            cols: BOARD_COLS,
            initial_energy: 50,
            unit_stats,
            mine_costs,
            mine_damage: 8,
            evolution_costs: [10, 20, 30],
            placement_mine_limit: 3,
            max_mines_on_board: 5,
            flag_positions: [Coord::new(3, 0), Coord::new(3, 23)],
            energy_regen: vec![
                RegenStep { from_turn: 1, amount: 35 },
                RegenStep { from_turn: 4, amount: 40 },
                RegenStep { from_turn: 8, amount: 45 },
                RegenStep { from_turn: 12, amount: 50 },
            ],
            interest_cap: 10,
            energy_cap_ratio_bp: 3333,
            carrier_move_cost: 5,
            empowered_flag_move_cost: 4,
            ranger_carry_move_cost: 3,
            stealth_move_cost: 3,
            hub_discount_range: 2,
            pass_heal: 3,
            skip_cost_step: 10,
            max_logs: 100,
            placement_seconds: 45,
            thinking_seconds: 30,
            action_seconds: 15,
        }
    }
}
