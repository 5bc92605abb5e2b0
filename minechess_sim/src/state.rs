// The game state both peers hold a copy of.
//
// `GameState` is a plain value: every rule in this crate takes `&GameState`
// and returns a new one, and the peer layer swaps the whole value in one
// step (see `minechess_peer::holder`). No code outside a single replacement
// ever observes a half-applied mutation.
//
// Field groups:
// - Round control: `phase`, `turn_count`, `current_player`, `game_over`,
//   `winner`, `time_left`, pause/freeze flags.
// - Per-seat data in `PerPlayer<PlayerState>`: energy, units, evolution
//   levels, quest counters, flag position, skip counter.
// - Board contents: `mines`, `buildings`, `sensor_results`.
// - Handshake data: `pvp_ready_state` and `pvp_energy_bids`.
// - Local-only UI data: `selected_unit_id`, `active_unit_id` (also the
//   "committed unit" for the current action step), `vfx` (never serialized).
//
// Set-valued quest counters are `BTreeSet`s so they serialize as JSON arrays
// and come back as sets on the other side.
//
// See also: `snapshot.rs` for the wire encoding and merge, `gamelog.rs` for
// `GameLog`.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Index, IndexMut};

use minechess_protocol::{Coord, GameMode, MineType, Phase, PlayerId, UnitType};
use serde::{Deserialize, Serialize};

use crate::config::GameConfig;
use crate::gamelog::GameLog;

/// Prefix for mine ids created during the placement phase.
pub const SETUP_MINE_PREFIX: &str = "pm-";

/// A value for each seat, serialized as `{"P1": .., "P2": ..}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerPlayer<T> {
    #[serde(rename = "P1")]
    pub p1: T,
    #[serde(rename = "P2")]
    pub p2: T,
}

impl<T> PerPlayer<T> {
    pub fn new(p1: T, p2: T) -> Self {
        Self { p1, p2 }
    }
}

impl<T> Index<PlayerId> for PerPlayer<T> {
    type Output = T;

    fn index(&self, player: PlayerId) -> &T {
        match player {
            PlayerId::P1 => &self.p1,
            PlayerId::P2 => &self.p2,
        }
    }
}

impl<T> IndexMut<PlayerId> for PerPlayer<T> {
    fn index_mut(&mut self, player: PlayerId) -> &mut T {
        match player {
            PlayerId::P1 => &mut self.p1,
            PlayerId::P2 => &mut self.p2,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnitStatus {
    pub move_cost_debuff: u32,
    pub move_cost_debuff_duration: u32,
    pub mine_vulnerability: u32,
    pub is_stealthed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: String,
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    pub owner: PlayerId,
    pub pos: Coord,
    /// Where the unit respawns.
    pub home: Coord,
    pub hp: u32,
    pub max_hp: u32,
    pub is_dead: bool,
    pub respawn_timer: u32,
    pub has_flag: bool,
    pub has_acted_this_round: bool,
    pub energy_used_this_turn: u32,
    /// Player energy when the action phase began; bounds per-unit spending.
    pub start_of_action_energy: u32,
    #[serde(default)]
    pub status: UnitStatus,
    /// A mine the unit is holding. Its id stays the same while carried.
    #[serde(default)]
    pub carried_mine: Option<Mine>,
}

impl Unit {
    pub fn is_alive(&self) -> bool {
        !self.is_dead
    }

    /// Alive and still allowed to act this round.
    pub fn can_act(&self) -> bool {
        !self.is_dead && !self.has_acted_this_round
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mine {
    pub id: String,
    pub owner: PlayerId,
    #[serde(rename = "type")]
    pub mine_type: MineType,
    pub pos: Coord,
    pub revealed_to: BTreeSet<PlayerId>,
}

impl Mine {
    /// A setup mine as created during placement: id `pm-{owner}-{r}-{c}`,
    /// visible to its owner only.
    pub fn setup(owner: PlayerId, pos: Coord) -> Mine {
        Mine {
            id: format!("{SETUP_MINE_PREFIX}{owner}-{}-{}", pos.r, pos.c),
            owner,
            mine_type: MineType::Normal,
            pos,
            revealed_to: BTreeSet::from([owner]),
        }
    }

    pub fn is_setup(&self) -> bool {
        self.id.starts_with(SETUP_MINE_PREFIX)
    }

    pub fn is_visible_to(&self, player: PlayerId) -> bool {
        self.owner == player || self.revealed_to.contains(&player)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildingKind {
    Hub,
    Tower,
    Factory,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    pub id: String,
    pub owner: PlayerId,
    #[serde(rename = "type")]
    pub kind: BuildingKind,
    pub pos: Coord,
    pub level: u8,
    #[serde(default)]
    pub variant: Option<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Single-cell sweeper mark.
    Mark,
    /// 3x3 mine count.
    Count,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorResult {
    pub pos: Coord,
    pub count: u32,
    pub kind: SensorKind,
    #[serde(default)]
    pub success: Option<bool>,
    pub owner: PlayerId,
    pub created_turn: u32,
}

/// Branch levels (0..=3) and the variant chosen at level 3.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvolutionLevels {
    pub a: u8,
    pub b: u8,
    pub a_variant: Option<u8>,
    pub b_variant: Option<u8>,
}

impl EvolutionLevels {
    /// Branch A at level 3 with the given variant.
    pub fn a3(&self, variant: u8) -> bool {
        self.a >= 3 && self.a_variant == Some(variant)
    }

    /// Branch B at level 3 with the given variant.
    pub fn b3(&self, variant: u8) -> bool {
        self.b >= 3 && self.b_variant == Some(variant)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuestStats {
    pub general_damage: u32,
    pub sweeper_mines_marked: u32,
    pub sweeper_scans_performed: u32,
    pub sweeper_scans_this_round: u32,
    pub maker_mines_placed: u32,
    pub flag_moves: u32,
    /// Mine ids a Ranger has already moved this round.
    pub ranger_mines_moved_this_round: BTreeSet<String>,
    /// Unit ids that took flag-spirit damage this turn.
    pub flag_spirit_damage_taken_this_turn: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub id: PlayerId,
    pub energy: u32,
    pub units: Vec<Unit>,
    pub evolution_levels: BTreeMap<UnitType, EvolutionLevels>,
    pub quest_stats: QuestStats,
    pub flag_position: Coord,
    pub placement_mines_placed: u32,
    pub skip_count_this_round: u32,
    pub energy_from_kills: u32,
}

impl PlayerState {
    pub fn evolution(&self, unit_type: UnitType) -> EvolutionLevels {
        self.evolution_levels
            .get(&unit_type)
            .copied()
            .unwrap_or_default()
    }

    pub fn has_unit_available(&self) -> bool {
        self.units.iter().any(Unit::can_act)
    }
}

/// Short-lived visual effect. Local to each peer; never sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisualEffect {
    pub kind: String,
    pub pos: Coord,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub game_mode: GameMode,
    pub phase: Phase,
    pub turn_count: u32,
    pub current_player: PlayerId,
    pub players: PerPlayer<PlayerState>,
    pub mines: Vec<Mine>,
    pub buildings: Vec<Building>,
    /// Newest first.
    pub logs: Vec<GameLog>,
    pub sensor_results: Vec<SensorResult>,
    pub pvp_ready_state: PerPlayer<bool>,
    pub pvp_energy_bids: PerPlayer<u32>,
    pub selected_unit_id: Option<String>,
    pub active_unit_id: Option<String>,
    pub is_paused: bool,
    pub is_time_frozen: bool,
    pub game_over: bool,
    pub winner: Option<PlayerId>,
    pub time_left: u32,
    #[serde(skip)]
    pub vfx: Vec<VisualEffect>,
}

/// Start cells for the five units, in `UnitType::ALL` order. Row 3 is the
/// flag row and is left clear.
fn start_cells(player: PlayerId) -> [Coord; 5] {
    let col = match player {
        PlayerId::P1 => 1,
        PlayerId::P2 => 22,
    };
    [
        Coord::new(2, col),
        Coord::new(0, col),
        Coord::new(1, col),
        Coord::new(4, col),
        Coord::new(5, col),
    ]
}

fn unit_slug(unit_type: UnitType) -> &'static str {
    match unit_type {
        UnitType::General => "general",
        UnitType::Sweeper => "sweeper",
        UnitType::Ranger => "ranger",
        UnitType::Maker => "maker",
        UnitType::Defuser => "defuser",
    }
}

impl PlayerState {
    fn initial(id: PlayerId, cfg: &GameConfig) -> PlayerState {
        let units = UnitType::ALL
            .iter()
            .zip(start_cells(id))
            .map(|(&unit_type, pos)| {
                let max_hp = cfg.stats(unit_type).map_or(1, |s| s.max_hp);
                Unit {
                    id: format!("{}-{}", id.as_str().to_lowercase(), unit_slug(unit_type)),
                    unit_type,
                    owner: id,
                    pos,
                    home: pos,
                    hp: max_hp,
                    max_hp,
                    is_dead: false,
                    respawn_timer: 0,
                    has_flag: false,
                    has_acted_this_round: false,
                    energy_used_this_turn: 0,
                    start_of_action_energy: cfg.initial_energy,
                    status: UnitStatus::default(),
                    carried_mine: None,
                }
            })
            .collect();
        PlayerState {
            id,
            energy: cfg.initial_energy,
            units,
            evolution_levels: UnitType::ALL
                .iter()
                .map(|&t| (t, EvolutionLevels::default()))
                .collect(),
            quest_stats: QuestStats::default(),
            flag_position: cfg.flag_position(id),
            placement_mines_placed: 0,
            skip_count_this_round: 0,
            energy_from_kills: 0,
        }
    }
}

impl GameState {
    /// A fresh match: placement phase, turn 1, P1 to move.
    pub fn new_match(game_mode: GameMode, cfg: &GameConfig) -> GameState {
        GameState {
            game_mode,
            phase: Phase::Placement,
            turn_count: 1,
            current_player: PlayerId::P1,
            players: PerPlayer::new(
                PlayerState::initial(PlayerId::P1, cfg),
                PlayerState::initial(PlayerId::P2, cfg),
            ),
            mines: Vec::new(),
            buildings: Vec::new(),
            logs: Vec::new(),
            sensor_results: Vec::new(),
            pvp_ready_state: PerPlayer::default(),
            pvp_energy_bids: PerPlayer::default(),
            selected_unit_id: None,
            active_unit_id: None,
            is_paused: false,
            is_time_frozen: false,
            game_over: false,
            winner: None,
            time_left: cfg.placement_seconds,
            vfx: Vec::new(),
        }
    }

    pub fn unit(&self, unit_id: &str) -> Option<&Unit> {
        PlayerId::BOTH
            .iter()
            .flat_map(|&p| self.players[p].units.iter())
            .find(|u| u.id == unit_id)
    }

    pub fn unit_mut(&mut self, unit_id: &str) -> Option<&mut Unit> {
        let owner = self.unit(unit_id)?.owner;
        self.players[owner]
            .units
            .iter_mut()
            .find(|u| u.id == unit_id)
    }

    /// The living unit standing on `cell`, if any.
    pub fn unit_at(&self, cell: Coord) -> Option<&Unit> {
        PlayerId::BOTH
            .iter()
            .flat_map(|&p| self.players[p].units.iter())
            .find(|u| u.is_alive() && u.pos == cell)
    }

    pub fn building_at(&self, cell: Coord) -> Option<&Building> {
        self.buildings.iter().find(|b| b.pos == cell)
    }

    pub fn setup_mines(&self) -> Vec<Mine> {
        self.mines.iter().filter(|m| m.is_setup()).cloned().collect()
    }

    /// Recount `placement_mines_placed` from the setup mines on the board.
    pub fn recount_placement_mines(&mut self) {
        for player in PlayerId::BOTH {
            let count = self
                .mines
                .iter()
                .filter(|m| m.is_setup() && m.owner == player)
                .count();
            self.players[player].placement_mines_placed = u32::try_from(count).unwrap_or(u32::MAX);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_match_layout() {
        let cfg = GameConfig::default();
        let state = GameState::new_match(GameMode::Pvp, &cfg);
        assert_eq!(state.phase, Phase::Placement);
        assert_eq!(state.turn_count, 1);
        for player in PlayerId::BOTH {
            let ps = &state.players[player];
            assert_eq!(ps.units.len(), 5);
            assert_eq!(ps.energy, 50);
            assert!(ps.units.iter().all(|u| u.pos.r != 3));
            assert!(ps.units.iter().all(|u| cfg.is_home_half(player, u.pos)));
        }
        assert_eq!(state.unit("p2-ranger").unwrap().max_hp, 16);
        assert_eq!(state.unit_at(Coord::new(2, 1)).unwrap().id, "p1-general");
    }

    #[test]
    fn setup_mine_ids() {
        let mine = Mine::setup(PlayerId::P2, Coord::new(4, 15));
        assert_eq!(mine.id, "pm-P2-4-15");
        assert!(mine.is_setup());
        assert!(mine.is_visible_to(PlayerId::P2));
        assert!(!mine.is_visible_to(PlayerId::P1));
    }

    #[test]
    fn quest_sets_serialize_as_arrays() {
        let mut stats = QuestStats::default();
        stats.ranger_mines_moved_this_round.insert("mine-b".into());
        stats.ranger_mines_moved_this_round.insert("mine-a".into());
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(
            value["rangerMinesMovedThisRound"],
            serde_json::json!(["mine-a", "mine-b"])
        );
        let back: QuestStats = serde_json::from_value(value).unwrap();
        assert!(back.ranger_mines_moved_this_round.contains("mine-a"));
    }

    #[test]
    fn per_player_indexing() {
        let mut ready = PerPlayer::<bool>::default();
        ready[PlayerId::P2] = true;
        assert!(!ready[PlayerId::P1]);
        assert!(ready.p2);
        assert_eq!(
            serde_json::to_value(ready).unwrap(),
            serde_json::json!({"P1": false, "P2": true})
        );
    }
}
