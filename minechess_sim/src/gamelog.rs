// Event log entries and the rules for merging log streams.
//
// Logs are kept newest-first. Some entries are *private hints*: feedback
// meant only for the player who triggered them ("not enough energy", "out of
// range", ...). A peer never sends its private hints, and a remotely applied
// action never produces them, so on snapshot merge each side keeps its own
// private hints and drops any that claim to belong to the other seat (see
// `snapshot::merge_snapshot`).
//
// Two entries are the same event when their signature
// `turn|messageKey|owner|params|type` matches. `params` is a `BTreeMap`, so
// its JSON text is canonical and the signature is stable across peers.

use std::collections::{BTreeMap, HashSet};

use minechess_protocol::PlayerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message keys that are never broadcast and never fabricated for the peer.
pub const PRIVATE_HINT_LOG_KEYS: &[&str] = &[
    "log_energy_cap",
    "log_low_energy",
    "log_low_energy_attack",
    "log_low_energy_evolve",
    "log_out_of_range",
    "log_unit_acted",
    "log_committed",
    "log_scan_range",
    "log_disarm_range",
    "log_no_mine",
    "log_space_has_mine",
    "log_obstacle",
    "log_maker_range",
    "log_mine_limit",
    "log_mine_zone",
    "log_own_mine",
    "log_mine_not_revealed",
    "log_general_flag_move_limit",
    "log_flag_move_limit",
    "log_hidden_mine",
    "log_max_mines",
    "log_max_buildings",
    "log_unit_on_hub",
    "log_scan_smoke_blocked",
];

pub fn is_private_hint(message_key: &str) -> bool {
    PRIVATE_HINT_LOG_KEYS.contains(&message_key)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Combat,
    Mine,
    Evolution,
    Error,
    Move,
}

impl LogKind {
    fn as_str(self) -> &'static str {
        match self {
            LogKind::Info => "info",
            LogKind::Combat => "combat",
            LogKind::Mine => "mine",
            LogKind::Evolution => "evolution",
            LogKind::Error => "error",
            LogKind::Move => "move",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameLog {
    pub turn: u32,
    pub message_key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub owner: Option<PlayerId>,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

impl GameLog {
    pub fn new(turn: u32, message_key: &str, kind: LogKind) -> GameLog {
        GameLog {
            turn,
            message_key: message_key.to_owned(),
            params: BTreeMap::new(),
            owner: None,
            kind,
        }
    }

    pub fn owned_by(mut self, owner: PlayerId) -> GameLog {
        self.owner = Some(owner);
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> GameLog {
        self.params.insert(key.to_owned(), value.into());
        self
    }

    pub fn is_private_hint(&self) -> bool {
        is_private_hint(&self.message_key)
    }

    /// Identity used for dedup.
    pub fn signature(&self) -> String {
        let params = serde_json::to_string(&self.params).unwrap_or_default();
        let owner = self.owner.map_or("", PlayerId::as_str);
        format!(
            "{}|{}|{}|{}|{}",
            self.turn,
            self.message_key,
            owner,
            params,
            self.kind.as_str()
        )
    }
}

/// Drop later entries whose signature was already seen. Order is kept.
pub fn dedupe_logs(logs: Vec<GameLog>) -> Vec<GameLog> {
    let mut seen = HashSet::new();
    logs.into_iter()
        .filter(|log| seen.insert(log.signature()))
        .collect()
}

/// Prepend `entry` and trim to `max` entries.
pub fn push_log(logs: &mut Vec<GameLog>, entry: GameLog, max: usize) {
    logs.insert(0, entry);
    logs.truncate(max);
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn hint(turn: u32, owner: PlayerId) -> GameLog {
        GameLog::new(turn, "log_energy_cap", LogKind::Info)
            .owned_by(owner)
            .param("cap", 16)
    }

    #[test]
    fn signature_covers_every_field() {
        let base = hint(2, PlayerId::P1);
        assert_eq!(base.signature(), r#"2|log_energy_cap|P1|{"cap":16}|info"#);
        assert_ne!(base.signature(), hint(3, PlayerId::P1).signature());
        assert_ne!(base.signature(), hint(2, PlayerId::P2).signature());
        assert_ne!(
            base.signature(),
            base.clone().param("cap", 17).signature()
        );
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let a = hint(1, PlayerId::P1);
        let b = GameLog::new(1, "log_move", LogKind::Move);
        let logs = dedupe_logs(vec![a.clone(), b.clone(), a.clone(), b.clone()]);
        assert_eq!(logs, vec![a, b]);
    }

    #[test]
    fn private_hint_classification() {
        assert!(is_private_hint("log_unit_acted"));
        assert!(!is_private_hint("log_attack_hit"));
    }

    #[test]
    fn push_log_truncates_oldest() {
        let mut logs = Vec::new();
        for turn in 0..5 {
            push_log(&mut logs, GameLog::new(turn, "log_move", LogKind::Move), 3);
        }
        let turns: Vec<u32> = logs.iter().map(|l| l.turn).collect();
        assert_eq!(turns, vec![4, 3, 2]);
    }

    proptest! {
        #[test]
        fn dedupe_is_idempotent(turns in proptest::collection::vec(0u32..4, 0..20)) {
            let logs: Vec<GameLog> = turns
                .iter()
                .map(|&t| GameLog::new(t, "log_pass_turn", LogKind::Info))
                .collect();
            let once = dedupe_logs(logs);
            let twice = dedupe_logs(once.clone());
            prop_assert_eq!(once, twice);
        }
    }
}
