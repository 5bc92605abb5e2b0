// Connection status and reconnect backoff.
//
// A link that drops without the user asking schedules reconnect attempt n
// after `min(base * 2^(n-1), cap)`. A manual disconnect or an auth rejection
// never reconnects. A successful open resets the attempt counter.

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Error,
}

#[derive(Clone, Debug)]
pub struct Backoff {
    base_ms: u64,
    cap_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, cap_ms: u64) -> Self {
        Self {
            base_ms,
            cap_ms,
            attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the counter.
    pub fn next_delay(&mut self) -> u64 {
        self.attempt += 1;
        let shift = (self.attempt - 1).min(20);
        self.base_ms.saturating_mul(1 << shift).min(self.cap_ms)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_caps() {
        let mut backoff = Backoff::new(1000, 10_000);
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000]);
        assert_eq!(backoff.attempt(), 6);
        backoff.reset();
        assert_eq!(backoff.next_delay(), 1000);
    }

    #[test]
    fn huge_attempt_counts_stay_capped() {
        let mut backoff = Backoff::new(1000, 10_000);
        for _ in 0..100 {
            assert!(backoff.next_delay() <= 10_000);
        }
    }
}
