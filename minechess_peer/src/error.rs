// Error types for the peer layer.
//
// Three tiers, matching how far a failure reaches:
// - `TransportError`: the link itself failed (connect, write, closed).
// - `SendError`: one outgoing envelope could not be sent. Reported to the
//   caller synchronously; nothing is queued for retry.
// - `SessionError`: a local request the session refused.
//
// Delivery timeouts are not errors here. They surface as
// `SessionEvent::DeliveryFailed` once per envelope (see `reliability.rs`).

use minechess_protocol::{PacketType, ProtocolError};
use minechess_sim::SnapshotError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("link is not open")]
    NotOpen,
    #[error("link i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("cannot send {packet_type:?}: link is not open")]
    NotOpen { packet_type: PacketType },
    #[error(transparent)]
    Encode(#[from] ProtocolError),
    #[error("cannot send {packet_type:?}: {source}")]
    Transport {
        packet_type: PacketType,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no match in progress")]
    NoMatch,
    #[error("only the host can {0}")]
    HostOnly(&'static str),
    #[error("it is not this peer's turn to act")]
    NotEntitled,
    #[error("nothing to vote on in the {0:?} phase")]
    NoVote(minechess_protocol::Phase),
    #[error("snapshot failed: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
