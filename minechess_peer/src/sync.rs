// Deferred snapshot scheduler.
//
// After an externally visible change the session does not send a snapshot
// immediately. It asks for one at +8 ms (so a burst of changes coalesces
// behind the latest state) and, for transitions known to race, a second one
// labelled `{reason}_resync` at +32 ms. The session drains due reasons from
// `tick` and sends one STATE_SYNC per reason, built from the state current
// at that moment rather than the state when it was scheduled.

use crate::config::PeerConfig;

/// Reasons that get the follow-up resync.
const FOLLOWUP_MARKERS: &[&str] = &["skip_turn", "end_turn", "remote_", "ready_phase_mismatch"];

pub fn needs_followup(reason: &str) -> bool {
    FOLLOWUP_MARKERS.iter().any(|marker| reason.contains(marker))
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Scheduled {
    at: u64,
    reason: String,
}

#[derive(Debug, Default)]
pub struct DeferredSync {
    queue: Vec<Scheduled>,
    first_delay_ms: u64,
    followup_delay_ms: u64,
}

impl DeferredSync {
    pub fn new(cfg: &PeerConfig) -> Self {
        Self {
            queue: Vec::new(),
            first_delay_ms: cfg.resync_first_delay_ms,
            followup_delay_ms: cfg.resync_followup_delay_ms,
        }
    }

    pub fn schedule(&mut self, reason: &str, now: u64) {
        self.push(now + self.first_delay_ms, reason.to_owned());
        if needs_followup(reason) {
            self.push(now + self.followup_delay_ms, format!("{reason}_resync"));
        }
    }

    fn push(&mut self, at: u64, reason: String) {
        let entry = Scheduled { at, reason };
        if !self.queue.contains(&entry) {
            self.queue.push(entry);
        }
    }

    /// Remove and return every reason due at `now`, earliest first.
    pub fn take_due(&mut self, now: u64) -> Vec<String> {
        let (mut due, rest): (Vec<_>, Vec<_>) = self.queue.drain(..).partition(|s| s.at <= now);
        self.queue = rest;
        due.sort_by_key(|s| s.at);
        due.into_iter().map(|s| s.reason).collect()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.queue.iter().map(|s| s.at).min()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
