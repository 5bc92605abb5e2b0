// Shared vocabulary types for the peer protocol.
//
// These are the small enums and value types that appear both inside envelope
// payloads and inside the game state carried by STATE_SYNC snapshots. The sim
// crate (`minechess_sim`) re-uses them directly so the two sides of the wire
// never disagree about spelling. Everything here serializes to the exact
// strings the wire format uses (`P1`, `placement`, `Sweeper`, ...).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Board height in rows.
pub const BOARD_ROWS: u8 = 7;

/// Board width in columns.
pub const BOARD_COLS: u8 = 24;

/// One of the two seats in a match. P1 is always the host's seat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlayerId {
    P1,
    P2,
}

impl PlayerId {
    pub const BOTH: [PlayerId; 2] = [PlayerId::P1, PlayerId::P2];

    pub fn opponent(self) -> PlayerId {
        match self {
            PlayerId::P1 => PlayerId::P2,
            PlayerId::P2 => PlayerId::P1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlayerId::P1 => "P1",
            PlayerId::P2 => "P2",
        }
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of the connection a peer is. Exactly one host per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    /// The seat this role plays: host is P1, guest is P2.
    pub fn local_player(self) -> PlayerId {
        match self {
            Role::Host => PlayerId::P1,
            Role::Guest => PlayerId::P2,
        }
    }

    /// The seat the other end of the connection plays.
    pub fn remote_player(self) -> PlayerId {
        self.local_player().opponent()
    }
}

/// Session mode. Only `Pvp` is peer-synchronized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    #[default]
    Pvp,
    Pve,
    Sandbox,
}

/// Round phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Placement,
    Thinking,
    Action,
}

/// The subset of phases a READY vote can name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyPhase {
    Placement,
    Thinking,
}

impl From<ReadyPhase> for Phase {
    fn from(phase: ReadyPhase) -> Phase {
        match phase {
            ReadyPhase::Placement => Phase::Placement,
            ReadyPhase::Thinking => Phase::Thinking,
        }
    }
}

impl ReadyPhase {
    /// The votable phase matching `phase`, if any.
    pub fn from_phase(phase: Phase) -> Option<ReadyPhase> {
        match phase {
            Phase::Placement => Some(ReadyPhase::Placement),
            Phase::Thinking => Some(ReadyPhase::Thinking),
            Phase::Action => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UnitType {
    General,
    Sweeper,
    Ranger,
    Maker,
    Defuser,
}

impl UnitType {
    pub const ALL: [UnitType; 5] = [
        UnitType::General,
        UnitType::Sweeper,
        UnitType::Ranger,
        UnitType::Maker,
        UnitType::Defuser,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MineType {
    Normal,
    Slow,
    Smoke,
    Nuke,
    Chain,
}

/// Evolution branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    A,
    B,
}

/// A board cell. Row first, matching the wire's `{r, c}` objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub r: u8,
    pub c: u8,
}

impl Coord {
    pub const fn new(r: u8, c: u8) -> Coord {
        Coord { r, c }
    }

    pub fn in_board(self) -> bool {
        self.r < BOARD_ROWS && self.c < BOARD_COLS
    }

    pub fn manhattan(self, other: Coord) -> u32 {
        u32::from(self.r.abs_diff(other.r)) + u32::from(self.c.abs_diff(other.c))
    }

    pub fn chebyshev(self, other: Coord) -> u32 {
        u32::from(self.r.abs_diff(other.r).max(self.c.abs_diff(other.c)))
    }

    /// True when the two cells share a row or a column.
    pub fn is_cardinal_to(self, other: Coord) -> bool {
        self.r == other.r || self.c == other.c
    }

    /// The in-board cells of the 3x3 block centred on `self`.
    pub fn neighborhood(self) -> impl Iterator<Item = Coord> {
        let rows = self.r.saturating_sub(1)..=self.r.saturating_add(1).min(BOARD_ROWS - 1);
        rows.flat_map(move |r| {
            let cols = self.c.saturating_sub(1)..=self.c.saturating_add(1).min(BOARD_COLS - 1);
            cols.map(move |c| Coord { r, c })
        })
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.r, self.c)
    }
}

/// Per-sender monotonic envelope sequence number, starting at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Seq(pub u64);

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_map_to_fixed_seats() {
        assert_eq!(Role::Host.local_player(), PlayerId::P1);
        assert_eq!(Role::Guest.local_player(), PlayerId::P2);
        assert_eq!(Role::Host.remote_player(), PlayerId::P2);
        assert_eq!(Role::Guest.remote_player(), PlayerId::P1);
    }

    #[test]
    fn wire_spellings() {
        assert_eq!(serde_json::to_string(&UnitType::Sweeper).unwrap(), "\"Sweeper\"");
        assert_eq!(serde_json::to_string(&Phase::Thinking).unwrap(), "\"thinking\"");
        assert_eq!(serde_json::to_string(&Branch::B).unwrap(), "\"b\"");
        assert_eq!(serde_json::to_string(&Seq(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&PlayerId::P2).unwrap(), "\"P2\"");
    }

    #[test]
    fn neighborhood_clips_at_corner() {
        let cells: Vec<Coord> = Coord::new(0, 0).neighborhood().collect();
        assert_eq!(cells.len(), 4);
        assert!(cells.contains(&Coord::new(1, 1)));

        let far: Vec<Coord> = Coord::new(6, 23).neighborhood().collect();
        assert_eq!(far.len(), 4);
        assert_eq!(Coord::new(3, 10).neighborhood().count(), 9);
    }

    #[test]
    fn distances() {
        let a = Coord::new(1, 2);
        let b = Coord::new(3, 5);
        assert_eq!(a.manhattan(b), 5);
        assert_eq!(a.chebyshev(b), 3);
        assert!(!a.is_cardinal_to(b));
        assert!(a.is_cardinal_to(Coord::new(1, 20)));
    }
}
