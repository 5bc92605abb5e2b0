// READY vote plumbing between the session and `minechess_sim::phase`.
//
// Inbound votes are screened in order: wrong seat (dropped), wrong turn,
// wrong phase. The two mismatches are recoverable: the host answers with a
// snapshot, the guest answers by re-sending its own vote, so both sides
// converge on one phase before either advances.
//
// `ReadyRetry` is the liveness loop for a vote that is stuck: while our
// flag is set and the peer's is not, the vote is re-sent every interval.
// This is a different policy from the ACK retry in `reliability.rs`. An
// ACK proves the envelope arrived, not that the peer still holds the vote
// after a snapshot merge, so the fact is re-asserted until it is observed.

use minechess_protocol::{GameMode, Phase, PlayerId, ReadyPayload, ReadyPhase};
use minechess_sim::{GameState, ReadyVote};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadyCheck {
    Vote(ReadyVote),
    /// Claims to come from a seat other than the remote one.
    WrongPlayer,
    TurnMismatch,
    PhaseMismatch,
}

pub fn vote_from_payload(payload: &ReadyPayload) -> ReadyVote {
    ReadyVote {
        player: payload.player_id,
        phase: payload.phase,
        setup_mines: payload.setup_mines.clone().unwrap_or_default(),
        energy_bid: payload.energy_bid.unwrap_or(0),
    }
}

pub fn payload_from_vote(vote: &ReadyVote) -> ReadyPayload {
    ReadyPayload {
        player_id: vote.player,
        phase: vote.phase,
        setup_mines: (vote.phase == ReadyPhase::Placement).then(|| vote.setup_mines.clone()),
        energy_bid: (vote.phase == ReadyPhase::Thinking).then_some(vote.energy_bid),
    }
}

pub fn check_remote_ready(
    state: &GameState,
    envelope_turn: u32,
    payload: &ReadyPayload,
    remote: PlayerId,
) -> ReadyCheck {
    if payload.player_id != remote {
        return ReadyCheck::WrongPlayer;
    }
    if envelope_turn != state.turn_count {
        return ReadyCheck::TurnMismatch;
    }
    if state.phase != Phase::from(payload.phase) {
        return ReadyCheck::PhaseMismatch;
    }
    ReadyCheck::Vote(vote_from_payload(payload))
}

/// True while `local` has voted in a vote phase and the peer has not.
pub fn vote_is_stuck(state: &GameState, local: PlayerId) -> bool {
    state.game_mode == GameMode::Pvp
        && ReadyPhase::from_phase(state.phase).is_some()
        && state.pvp_ready_state[local]
        && !state.pvp_ready_state[local.opponent()]
}

#[derive(Clone, Debug)]
pub struct ReadyRetry {
    interval_ms: u64,
    next_at: Option<u64>,
}

impl ReadyRetry {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            next_at: None,
        }
    }

    /// Start the loop if it is not already running.
    pub fn arm(&mut self, now: u64) {
        if self.next_at.is_none() {
            self.next_at = Some(now + self.interval_ms);
        }
    }

    pub fn disarm(&mut self) {
        self.next_at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_at.is_some()
    }

    /// True when a re-send is due; schedules the following one.
    pub fn fire(&mut self, now: u64) -> bool {
        match self.next_at {
            Some(at) if at <= now => {
                self.next_at = Some(now + self.interval_ms);
                true
            }
            _ => false,
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.next_at
    }
}

#[cfg(test)]
mod tests {
    use minechess_protocol::Coord;
    use minechess_sim::GameConfig;

    use super::*;

    fn placement() -> GameState {
        GameState::new_match(GameMode::Pvp, &GameConfig::default())
    }

    fn ready(player: PlayerId, phase: ReadyPhase) -> ReadyPayload {
        ReadyPayload {
            player_id: player,
            phase,
            setup_mines: Some(vec![Coord::new(3, 16)]),
            energy_bid: None,
        }
    }

    #[test]
    fn screening_order() {
        let state = placement();
        let vote = ready(PlayerId::P2, ReadyPhase::Placement);
        assert_eq!(
            check_remote_ready(&state, 1, &vote, PlayerId::P1),
            ReadyCheck::WrongPlayer
        );
        assert_eq!(
            check_remote_ready(&state, 2, &vote, PlayerId::P2),
            ReadyCheck::TurnMismatch
        );
        let stale = ready(PlayerId::P2, ReadyPhase::Thinking);
        assert_eq!(
            check_remote_ready(&state, 1, &stale, PlayerId::P2),
            ReadyCheck::PhaseMismatch
        );
        let ReadyCheck::Vote(accepted) = check_remote_ready(&state, 1, &vote, PlayerId::P2) else {
            panic!("vote should pass");
        };
        assert_eq!(accepted.setup_mines, vec![Coord::new(3, 16)]);
    }

    #[test]
    fn payload_fields_follow_phase() {
        let vote = ReadyVote {
            player: PlayerId::P1,
            phase: ReadyPhase::Thinking,
            setup_mines: vec![Coord::new(0, 0)],
            energy_bid: 7,
        };
        let payload = payload_from_vote(&vote);
        assert_eq!(payload.setup_mines, None);
        assert_eq!(payload.energy_bid, Some(7));
    }

    #[test]
    fn stuck_only_while_waiting_on_peer() {
        let mut state = placement();
        assert!(!vote_is_stuck(&state, PlayerId::P1));
        state.pvp_ready_state.p1 = true;
        assert!(vote_is_stuck(&state, PlayerId::P1));
        state.pvp_ready_state.p2 = true;
        assert!(!vote_is_stuck(&state, PlayerId::P1));
    }

    #[test]
    fn retry_loop_cadence() {
        let mut retry = ReadyRetry::new(1500);
        assert!(!retry.fire(10_000));
        retry.arm(0);
        retry.arm(700);
        assert_eq!(retry.next_deadline(), Some(1500));
        assert!(!retry.fire(1499));
        assert!(retry.fire(1500));
        assert_eq!(retry.next_deadline(), Some(3000));
        retry.disarm();
        assert!(!retry.is_armed());
    }
}
