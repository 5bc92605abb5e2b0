// minechess_sim — deterministic rules engine for Minechess.
//
// Everything that decides what a game state *means* lives here: the state
// model, the per-action rules and their energy costs, the turn/round
// machine, the placement/thinking handshake, and snapshot reconciliation.
// The crate does no I/O and reads no clock; every function maps an input
// state to an output state. The peer layer (`minechess_peer`) decides
// *when* to call these functions and what to send afterwards.
//
// Module overview:
// - `config.rs`:   `GameConfig`, every tunable rule number.
// - `state.rs`:    `GameState` and its parts (`Unit`, `Mine`, `PlayerState`, ...).
// - `gamelog.rs`:  Log entries, private hint keys, signature dedup.
// - `cost.rs`:     Authoritative cost functions (move layering, energy cap).
// - `action.rs`:   `GameAction` and `apply_action`, the single mutation entry.
// - `round.rs`:    END_TURN / SKIP_TURN hand-off and round rollover.
// - `phase.rs`:    Setup mines, READY votes, bid resolution.
// - `snapshot.rs`: Snapshot encode/decode and the STATE_SYNC merge.
//
// **Critical constraint: determinism.** Both peers replay the same actions
// on what should be the same state. Any dependence on wall clock, hash
// iteration order, or randomness turns into a silent desync.

pub mod action;
pub mod config;
pub mod cost;
pub mod gamelog;
pub mod phase;
pub mod round;
pub mod snapshot;
pub mod state;

pub use action::{ActionOutcome, GameAction, Origin, Rejection, apply_action};
pub use config::GameConfig;
pub use gamelog::{GameLog, LogKind};
pub use phase::{ReadyVote, VoteResult, admissible_setup_mines, cast_ready_vote, place_setup_mine};
pub use snapshot::{
    MergeContext, SnapshotError, decode_snapshot, encode_snapshot, is_stale, merge_snapshot,
};
pub use state::{GameState, Mine, PerPlayer, PlayerState, Unit};
