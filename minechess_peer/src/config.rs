// Timing and capacity knobs for the peer session.
//
// All durations are milliseconds on the session's injected clock (see
// `session.rs`). Defaults mirror what the two peers must agree on only
// loosely: nothing here affects game rules, so peers may run with
// different values, but retry and resync timings that are too aggressive
// just generate redundant traffic.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Wait before resending an unacknowledged envelope.
    pub ack_timeout_ms: u64,
    /// Resends after the first attempt; 2 means 3 attempts in total.
    pub max_retries: u32,
    /// Inbound sequence numbers remembered for dedup.
    pub seq_window: usize,
    /// Interval of the stuck-READY re-send loop.
    pub ready_retry_ms: u64,
    pub resync_first_delay_ms: u64,
    /// Second, labelled `{reason}_resync`, for race-prone transitions.
    pub resync_followup_delay_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_cap_ms: u64,
    pub heartbeat_ms: u64,
    /// Treat the link as dead after this long without any inbound traffic.
    pub silence_timeout_ms: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 2500,
            max_retries: 2,
            seq_window: 512,
            ready_retry_ms: 1500,
            resync_first_delay_ms: 8,
            resync_followup_delay_ms: 32,
            reconnect_base_ms: 1000,
            reconnect_cap_ms: 10_000,
            heartbeat_ms: 5000,
            silence_timeout_ms: 15_000,
        }
    }
}

/// Who this peer is and which room it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    pub role: minechess_protocol::Role,
    pub room_id: String,
    pub peer_id: String,
    /// Host: required password. Guest: password to present.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default)]
    pub allow_dev_tools: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: PeerConfig = serde_json::from_str(r#"{"max_retries": 4}"#).unwrap();
        assert_eq!(cfg.max_retries, 4);
        assert_eq!(cfg.ack_timeout_ms, 2500);
        assert_eq!(cfg.seq_window, 512);
    }
}
