// At-least-once delivery over an unreliable link.
//
// `ReliableChannel` wraps whatever transport is current:
// - Outbound: every envelope gets the next sequence number (starting at 1).
//   Envelopes that require an ACK are remembered in `pending` and resent
//   from `poll_timeouts` until acknowledged or out of attempts. The final
//   failure is reported once per envelope, never once per retry.
// - Inbound: every non-ACK envelope is acknowledged, including duplicates,
//   since the duplicate usually means our first ACK was lost. A sequence
//   number already in the `SeqWindow` is acknowledged but not delivered
//   again. ACKs cancel the matching pending record.
//
// Dedup is per sender session. The session calls `reset_inbound` whenever
// a new link opens, so a restarted peer whose numbering starts over at 1 is
// not mistaken for a stream of duplicates.
//
// This layer does not order messages and does not know what they mean;
// the ready-vote retry in `ready.rs` is a separate policy.

use std::collections::{BTreeMap, HashSet, VecDeque};

use minechess_protocol::{AckPayload, Envelope, PacketType, Payload, ProtocolError, Seq};

use crate::config::PeerConfig;
use crate::error::SendError;
use crate::transport::Transport;

/// Bounded set of recently seen sequence numbers; oldest evicted first.
#[derive(Clone, Debug)]
pub struct SeqWindow {
    order: VecDeque<Seq>,
    seen: HashSet<Seq>,
    capacity: usize,
}

impl SeqWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, seq: Seq) -> bool {
        self.seen.contains(&seq)
    }

    /// Record `seq`. Returns false if it was already present.
    pub fn insert(&mut self, seq: Seq) -> bool {
        if !self.seen.insert(seq) {
            return false;
        }
        self.order.push_back(seq);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

/// Per-send delivery policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendOptions {
    pub require_ack: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl SendOptions {
    /// The default policy for `packet_type` under `cfg`.
    pub fn for_packet(packet_type: PacketType, cfg: &PeerConfig) -> Self {
        Self {
            require_ack: packet_type.requires_ack_by_default(),
            timeout_ms: cfg.ack_timeout_ms,
            max_retries: cfg.max_retries,
        }
    }

    pub fn unacked(cfg: &PeerConfig) -> Self {
        Self {
            require_ack: false,
            ..Self::for_packet(PacketType::Ack, cfg)
        }
    }
}

#[derive(Clone, Debug)]
struct PendingSend {
    packet_type: PacketType,
    text: String,
    /// Attempts made so far, including the first send.
    attempts: u32,
    max_attempts: u32,
    timeout_ms: u64,
    deadline: u64,
}

/// An envelope whose every attempt went unacknowledged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryTimeout {
    pub seq: Seq,
    pub packet_type: PacketType,
    pub attempts: u32,
}

/// What `receive` made of one inbound string.
#[derive(Debug)]
pub enum Inbound {
    /// First sighting of a valid envelope. Already acknowledged.
    Deliver(Envelope, Payload),
    /// Seen before; re-acknowledged and dropped.
    Duplicate(Seq),
    /// An ACK, with whether it matched a pending send.
    Acked { seq: Seq, matched: bool },
    /// Undecodable text or invalid payload. Dropped.
    Malformed(ProtocolError),
}

#[derive(Debug)]
pub struct ReliableChannel {
    cfg: PeerConfig,
    next_seq: u64,
    pending: BTreeMap<Seq, PendingSend>,
    window: SeqWindow,
    last_message_at: Option<u64>,
}

impl ReliableChannel {
    pub fn new(cfg: PeerConfig) -> Self {
        let window = SeqWindow::new(cfg.seq_window);
        Self {
            cfg,
            next_seq: 1,
            pending: BTreeMap::new(),
            window,
            last_message_at: None,
        }
    }

    pub fn config(&self) -> &PeerConfig {
        &self.cfg
    }

    /// Wrap `payload` in an envelope and send it now.
    ///
    /// Fails synchronously when the link is closed or the payload cannot be
    /// encoded. In that case nothing is remembered for retry.
    pub fn send(
        &mut self,
        transport: &mut dyn Transport,
        payload: &Payload,
        match_id: &str,
        turn: u32,
        now: u64,
        opts: SendOptions,
    ) -> Result<Seq, SendError> {
        let packet_type = payload.packet_type();
        if !transport.is_open() {
            return Err(SendError::NotOpen { packet_type });
        }
        let seq = Seq(self.next_seq);
        let envelope = Envelope::build(payload, match_id, turn, now, seq)?;
        let text = envelope.encode()?;
        transport
            .send(&text)
            .map_err(|source| SendError::Transport { packet_type, source })?;
        self.next_seq += 1;
        if opts.require_ack {
            self.pending.insert(
                seq,
                PendingSend {
                    packet_type,
                    text,
                    attempts: 1,
                    max_attempts: opts.max_retries + 1,
                    timeout_ms: opts.timeout_ms,
                    deadline: now + opts.timeout_ms,
                },
            );
        }
        log::trace!("sent {packet_type:?} seq {seq}");
        Ok(seq)
    }

    /// Process one inbound string from the current link.
    pub fn receive(&mut self, transport: &mut dyn Transport, text: &str, now: u64) -> Inbound {
        self.last_message_at = Some(now);
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(err) => return Inbound::Malformed(err),
        };

        if envelope.packet_type == PacketType::Ack {
            return match envelope.payload() {
                Ok(Payload::Ack(AckPayload { ack_for })) => {
                    let matched = self.pending.remove(&ack_for).is_some();
                    Inbound::Acked { seq: ack_for, matched }
                }
                Ok(_) => Inbound::Acked {
                    seq: envelope.seq,
                    matched: false,
                },
                Err(err) => Inbound::Malformed(err),
            };
        }

        let seq = envelope.seq;
        let first_sighting = self.window.insert(seq);
        self.send_ack(transport, &envelope, now);
        if !first_sighting {
            return Inbound::Duplicate(seq);
        }
        match envelope.payload() {
            Ok(payload) => Inbound::Deliver(envelope, payload),
            Err(err) => Inbound::Malformed(err),
        }
    }

    fn send_ack(&mut self, transport: &mut dyn Transport, envelope: &Envelope, now: u64) {
        let ack = Payload::Ack(AckPayload { ack_for: envelope.seq });
        let opts = SendOptions::unacked(&self.cfg);
        if let Err(err) = self.send(transport, &ack, &envelope.match_id, envelope.turn, now, opts) {
            log::debug!("could not acknowledge seq {}: {err}", envelope.seq);
        }
    }

    /// Resend everything whose deadline passed; report envelopes that ran
    /// out of attempts. Each timeout is reported exactly once.
    pub fn poll_timeouts(&mut self, transport: &mut dyn Transport, now: u64) -> Vec<DeliveryTimeout> {
        let due: Vec<Seq> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&seq, _)| seq)
            .collect();
        let mut failed = Vec::new();
        for seq in due {
            let Some(pending) = self.pending.get_mut(&seq) else {
                continue;
            };
            if pending.attempts >= pending.max_attempts {
                let packet_type = pending.packet_type;
                let attempts = pending.attempts;
                self.pending.remove(&seq);
                log::warn!("{packet_type:?} seq {seq} unacknowledged after {attempts} attempts");
                failed.push(DeliveryTimeout {
                    seq,
                    packet_type,
                    attempts,
                });
                continue;
            }
            pending.attempts += 1;
            pending.deadline = now + pending.timeout_ms;
            if let Err(err) = transport.send(&pending.text) {
                log::debug!("resend of seq {seq} failed: {err}");
            }
        }
        failed
    }

    /// Earliest retry deadline, if anything is pending.
    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.values().map(|p| p.deadline).min()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, seq: Seq) -> bool {
        self.pending.contains_key(&seq)
    }

    pub fn last_message_at(&self) -> Option<u64> {
        self.last_message_at
    }

    /// Forget the previous sender session's numbering and our own unacked
    /// sends. Called when a link is replaced.
    pub fn reset_link(&mut self, now: u64) {
        self.window.clear();
        self.pending.clear();
        self.last_message_at = Some(now);
    }
}
