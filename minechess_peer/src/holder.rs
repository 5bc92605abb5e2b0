// The one place the session's game state lives.
//
// Every rule in `minechess_sim` returns a new `GameState`; the session
// swaps it in here with `replace`. Readers always go through `current`, so
// nothing ever keeps a captured copy that drifts from the latest value.

use minechess_sim::GameState;

#[derive(Debug, Default)]
pub struct StateHolder {
    state: Option<GameState>,
    /// Bumped on every replacement; lets observers skip unchanged states.
    version: u64,
}

impl StateHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest state, or `None` outside a match.
    pub fn current(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    pub fn replace(&mut self, next: GameState) {
        self.state = Some(next);
        self.version += 1;
    }

    /// Leave the match.
    pub fn clear(&mut self) {
        self.state = None;
        self.version += 1;
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use minechess_protocol::GameMode;
    use minechess_sim::GameConfig;

    use super::*;

    #[test]
    fn replace_and_clear_bump_version() {
        let mut holder = StateHolder::new();
        assert!(holder.current().is_none());
        holder.replace(GameState::new_match(GameMode::Pvp, &GameConfig::default()));
        assert_eq!(holder.version(), 1);
        assert_eq!(holder.current().unwrap().turn_count, 1);
        holder.clear();
        assert!(holder.current().is_none());
        assert_eq!(holder.version(), 2);
    }
}
