// Errors raised while decoding or validating wire traffic.
//
// Every inbound string goes through `Envelope::decode` and then
// `Payload::parse`; both report failures as `ProtocolError`. The session
// layer treats all of these as protocol violations: it logs them at debug
// level and drops the message, because the periodic snapshot resync is the
// recovery path.

use thiserror::Error;

use crate::envelope::PacketType;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The envelope itself is not valid JSON or lacks a required field.
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// The envelope parsed but its payload does not fit the packet type.
    #[error("malformed {packet_type:?} payload: {source}")]
    Payload {
        packet_type: PacketType,
        #[source]
        source: serde_json::Error,
    },

    /// A payload field is well-typed but outside its legal range.
    #[error("invalid {field} in {packet_type:?} payload: {reason}")]
    InvalidField {
        packet_type: PacketType,
        field: &'static str,
        reason: String,
    },

    /// A coordinate does not name a board cell.
    #[error("cell ({r}, {c}) in {packet_type:?} payload is off the board")]
    OffBoard { packet_type: PacketType, r: u8, c: u8 },

    /// An outgoing payload could not be serialized.
    #[error("failed to encode {packet_type:?}: {source}")]
    Encode {
        packet_type: PacketType,
        #[source]
        source: serde_json::Error,
    },
}
