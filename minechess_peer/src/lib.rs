// minechess_peer — keeps two independent copies of a Minechess match in
// step over an unreliable link.
//
// There is no server. Each peer runs the full rules (`minechess_sim`) on
// its own copy of the state, broadcasts the actions its player takes, and
// replays the actions the other player takes. This crate is everything
// between the rules and the wire: delivery guarantees, who may act when,
// how remote actions are re-validated, and how full snapshots are merged.
//
// Module overview:
// - `config.rs`:      `PeerConfig` timings, `SessionSettings` identity.
// - `error.rs`:       `TransportError`, `SendError`, `SessionError`.
// - `transport.rs`:   `Transport` / `Connector` traits, `LinkEvent`, `EventSink`.
// - `reliability.rs`: Seq numbering, ACK, bounded retry, received-seq dedup.
// - `holder.rs`:      `StateHolder`, the single owner of the current state.
// - `dispatch.rs`:    Origination guard and action -> payload.
// - `applier.rs`:     Remote validity window and replay.
// - `ready.rs`:       Inbound READY screening and the stuck-vote retry loop.
// - `sync.rs`:        Deferred snapshot schedule with follow-up resyncs.
// - `handshake.rs`:   HELLO judgement and AUTH_RESULT.
// - `reconnect.rs`:   `ConnectionStatus` and exponential backoff.
// - `session.rs`:     `Session`, the dispatcher tying all of the above together.
// - `runner.rs`:      `spawn_peer`, a session on its own thread with one inbox.
// - `tcp.rs`:         `TcpConnector` / `TcpLink`, length-prefixed frames.
//
// **Critical constraint: the session is single-threaded.** Every inbound
// message, local request, and timer is handled to completion before the
// next. Transport threads only ever talk to the session through its inbox.

pub mod applier;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod holder;
pub mod ready;
pub mod reconnect;
pub mod reliability;
pub mod runner;
pub mod session;
pub mod sync;
pub mod tcp;
pub mod transport;

pub use config::{PeerConfig, SessionSettings};
pub use error::{SendError, SessionError, TransportError};
pub use reconnect::ConnectionStatus;
pub use runner::{Command, PeerHandle, spawn_peer};
pub use session::{Session, SessionEvent};
pub use transport::{Connector, EventSink, LinkEvent, LinkId, Transport, TransportEvent};
