// Test-only two-peer harness for Minechess integration tests.
//
// Runs a host `Session` and a guest `Session` against each other over an
// in-memory link, on a virtual clock, all on the test thread. The link can
// lose, duplicate, and delay (and so reorder) individual envelopes. The fate
// of every envelope is drawn from a seeded `fastrand::Rng`, so a given seed
// replays exactly the same run.
//
// Everything above the transport is the real code: the same `Session`,
// reliability layer, remote applier, and snapshot merge that the `peer`
// binary runs. The only test-specific code is the link and the clock pump.
//
// Link lifecycle mimics a stream socket. A link opens once both sides have
// asked their connector for one; closing either end reports `Closed` to the
// other, which then goes through its normal reconnect path.
//
// See also: `tests/full_pipeline.rs` for the scenarios,
// `minechess_peer::transport` for the traits implemented here.
//
// **Critical constraint: nothing here sleeps.** Time moves only when a test
// calls `advance` or `run_until`, one millisecond per step.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};

use minechess_peer::{
    Connector, EventSink, LinkEvent, LinkId, PeerConfig, Session, SessionError, SessionEvent,
    SessionSettings, Transport, TransportError, TransportEvent,
};
use minechess_protocol::{Coord, Envelope, PacketType, Phase, PlayerId, Role};
use minechess_sim::{
    ActionOutcome, GameAction, GameConfig, GameState, Rejection, VoteResult, encode_snapshot,
};
use serde_json::Value;

/// Upper bound for `run_until`, in virtual milliseconds.
pub const RUN_LIMIT_MS: u64 = 30_000;

/// Long enough for a deferred resync, its follow-up, and a few round trips.
pub const SETTLE_MS: u64 = 400;

pub const TEST_ROOM: &str = "test-room";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Host,
    Guest,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Side::Host => 0,
            Side::Guest => 1,
        }
    }

    pub fn other(self) -> Side {
        match self {
            Side::Host => Side::Guest,
            Side::Guest => Side::Host,
        }
    }

    pub fn role(self) -> Role {
        match self {
            Side::Host => Role::Host,
            Side::Guest => Role::Guest,
        }
    }

    /// The side that plays `player`.
    pub fn playing(player: PlayerId) -> Side {
        match player {
            PlayerId::P1 => Side::Host,
            PlayerId::P2 => Side::Guest,
        }
    }
}

/// How the in-memory link treats each envelope.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkConditions {
    pub latency_ms: u64,
    /// Extra delay drawn from `0..=jitter_ms`. Anything nonzero reorders.
    pub jitter_ms: u64,
    /// Probability that an envelope never arrives.
    pub loss: f64,
    /// Probability that an envelope arrives a second time, later.
    pub duplicate: f64,
}

impl LinkConditions {
    pub fn clean() -> Self {
        Self {
            latency_ms: 5,
            jitter_ms: 0,
            loss: 0.0,
            duplicate: 0.0,
        }
    }
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self::clean()
    }
}

// ---------------------------------------------------------------------------
// In-memory link
// ---------------------------------------------------------------------------

struct End {
    link: LinkId,
    sink: EventSink,
    open: bool,
}

struct InFlight {
    at: u64,
    order: u64,
    to: Side,
    link: LinkId,
    event: TransportEvent,
}

/// Shared medium between the two connectors.
pub struct Net {
    now: u64,
    rng: fastrand::Rng,
    conditions: LinkConditions,
    ends: [Option<End>; 2],
    in_flight: Vec<InFlight>,
    next_order: u64,
    /// Per sending side: drop everything it sends.
    cut: [bool; 2],
    /// Per sending side: park everything it sends in `held`.
    intercept: [bool; 2],
    held: Vec<(Side, String)>,
    sent: Vec<(Side, PacketType)>,
}

fn lock(net: &Mutex<Net>) -> MutexGuard<'_, Net> {
    net.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Net {
    fn new(conditions: LinkConditions, seed: u64) -> Self {
        Self {
            now: 0,
            rng: fastrand::Rng::with_seed(seed),
            conditions,
            ends: [None, None],
            in_flight: Vec::new(),
            next_order: 0,
            cut: [false; 2],
            intercept: [false; 2],
            held: Vec::new(),
            sent: Vec::new(),
        }
    }

    fn register(&mut self, side: Side, link: LinkId, sink: EventSink) {
        self.in_flight.retain(|m| m.to != side);
        self.ends[side.index()] = Some(End {
            link,
            sink,
            open: false,
        });
        if self.ends.iter().all(Option::is_some) {
            for end in self.ends.iter_mut().flatten() {
                if !end.open {
                    end.open = true;
                    end.sink.emit(end.link, TransportEvent::Opened);
                }
            }
        }
    }

    fn unregister(&mut self, side: Side, link: LinkId) {
        let ours = self.ends[side.index()].as_ref().is_some_and(|e| e.link == link);
        if !ours {
            return;
        }
        self.ends[side.index()] = None;
        self.in_flight.retain(|m| m.to != side);
        // Like a stream socket: the other side reads what is already in
        // flight, then end-of-stream.
        let other = side.other();
        let drained = self
            .in_flight
            .iter()
            .filter(|m| m.to == other)
            .map(|m| m.at)
            .max()
            .unwrap_or(0);
        let at = drained.max(self.now + self.conditions.latency_ms);
        self.enqueue(other, at, TransportEvent::Closed);
    }

    fn is_open(&self, side: Side, link: LinkId) -> bool {
        self.ends[side.index()]
            .as_ref()
            .is_some_and(|e| e.link == link && e.open)
    }

    fn send(&mut self, from: Side, link: LinkId, text: &str) -> Result<(), TransportError> {
        if !self.is_open(from, link) {
            return Err(TransportError::NotOpen);
        }
        if let Ok(envelope) = Envelope::decode(text) {
            self.sent.push((from, envelope.packet_type));
        }
        if self.intercept[from.index()] {
            self.held.push((from, text.to_owned()));
            return Ok(());
        }
        if self.cut[from.index()] || self.rng.f64() < self.conditions.loss {
            log::trace!("net: {from:?} envelope lost");
            return Ok(());
        }
        let jitter = self.rng.u64(0..=self.conditions.jitter_ms);
        let at = self.now + self.conditions.latency_ms + jitter;
        self.enqueue(from.other(), at, TransportEvent::Message(text.to_owned()));
        if self.rng.f64() < self.conditions.duplicate {
            let extra = 1 + self.rng.u64(0..=self.conditions.latency_ms + self.conditions.jitter_ms);
            self.enqueue(from.other(), at + extra, TransportEvent::Message(text.to_owned()));
        }
        Ok(())
    }

    fn enqueue(&mut self, to: Side, at: u64, event: TransportEvent) {
        let Some(end) = self.ends[to.index()].as_ref().filter(|e| e.open) else {
            return;
        };
        self.next_order += 1;
        self.in_flight.push(InFlight {
            at,
            order: self.next_order,
            to,
            link: end.link,
            event,
        });
    }

    fn deliver_due(&mut self, now: u64) {
        self.now = now;
        let (mut due, waiting): (Vec<_>, Vec<_>) =
            self.in_flight.drain(..).partition(|m| m.at <= now);
        self.in_flight = waiting;
        due.sort_by_key(|m| (m.at, m.order));
        for message in due {
            let slot = &mut self.ends[message.to.index()];
            if !slot.as_ref().is_some_and(|e| e.link == message.link && e.open) {
                continue;
            }
            let closed = match message.event {
                TransportEvent::Closed => slot.take(),
                _ => None,
            };
            if let Some(end) = closed.as_ref().or(slot.as_ref()) {
                end.sink.emit(end.link, message.event);
            }
        }
    }

    /// Close both ends at once, as if the network dropped the connection.
    fn sever(&mut self) {
        self.in_flight.clear();
        for end in self.ends.iter_mut().filter_map(Option::take) {
            if end.open {
                end.sink.emit(end.link, TransportEvent::Closed);
            }
        }
    }
}

struct MemoryLink {
    side: Side,
    link: LinkId,
    net: Arc<Mutex<Net>>,
}

impl Transport for MemoryLink {
    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        lock(&self.net).send(self.side, self.link, text)
    }

    fn is_open(&self) -> bool {
        lock(&self.net).is_open(self.side, self.link)
    }

    fn close(&mut self) {
        lock(&self.net).unregister(self.side, self.link);
    }
}

struct MemoryConnector {
    side: Side,
    net: Arc<Mutex<Net>>,
}

impl Connector for MemoryConnector {
    fn connect(&mut self, link: LinkId, sink: EventSink) -> Result<Box<dyn Transport>, TransportError> {
        lock(&self.net).register(self.side, link, sink);
        Ok(Box::new(MemoryLink {
            side: self.side,
            link,
            net: Arc::clone(&self.net),
        }))
    }
}

// ---------------------------------------------------------------------------
// Peers and the pair
// ---------------------------------------------------------------------------

/// One session plus the queue its link events land in.
pub struct Peer {
    pub session: Session,
    inbox: Receiver<LinkEvent>,
    /// Every event the session emitted, oldest first.
    pub events: Vec<SessionEvent>,
}

impl Peer {
    /// The current state. Panics when no match is running.
    pub fn state(&self) -> &GameState {
        self.session.state().expect("no match in progress")
    }

    pub fn has_match(&self) -> bool {
        self.session.state().is_some()
    }

    pub fn saw(&self, pred: impl Fn(&SessionEvent) -> bool) -> bool {
        self.events.iter().any(pred)
    }

    fn pump(&mut self, now: u64) {
        while let Ok(event) = self.inbox.try_recv() {
            self.session.handle_link_event(event, now);
        }
        self.session.tick(now);
        self.events.extend(self.session.take_events());
    }
}

/// Settings for `side` in the shared test room, without a password.
pub fn settings(side: Side) -> SessionSettings {
    SessionSettings {
        role: side.role(),
        room_id: TEST_ROOM.into(),
        peer_id: format!("{side:?}").to_lowercase(),
        password: None,
        room_name: Some("Test Room".into()),
        allow_dev_tools: false,
    }
}

/// Peer timings scaled down so retries fit in a short virtual run.
pub fn test_peer_config() -> PeerConfig {
    PeerConfig {
        ack_timeout_ms: 150,
        ready_retry_ms: 600,
        ..PeerConfig::default()
    }
}

/// Install `env_logger` once per test binary. `RUST_LOG=debug` shows the
/// session's view of a failing scenario.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The parts of a state both peers must agree on. Local-only fields (logs
/// with private hints, UI selection) are dropped; mines are sorted by id
/// since merge order may differ between the two sides.
pub fn fingerprint(state: &GameState) -> Value {
    let mut value = encode_snapshot(state).expect("state encodes");
    if let Some(object) = value.as_object_mut() {
        for local_only in ["logs", "selectedUnitId", "activeUnitId"] {
            object.remove(local_only);
        }
    }
    if let Some(mines) = value.get_mut("mines").and_then(Value::as_array_mut) {
        mines.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
    }
    value
}

/// A host and a guest wired together over one in-memory link.
pub struct TestPair {
    net: Arc<Mutex<Net>>,
    pub host: Peer,
    pub guest: Peer,
    now: u64,
}

impl TestPair {
    pub fn new(conditions: LinkConditions, seed: u64) -> Self {
        Self::with_config(conditions, seed, test_peer_config())
    }

    pub fn with_config(conditions: LinkConditions, seed: u64, cfg: PeerConfig) -> Self {
        Self::with_settings(
            conditions,
            seed,
            cfg,
            settings(Side::Host),
            settings(Side::Guest),
        )
    }

    /// Build both sessions and ask each for its first link.
    pub fn with_settings(
        conditions: LinkConditions,
        seed: u64,
        cfg: PeerConfig,
        host: SessionSettings,
        guest: SessionSettings,
    ) -> Self {
        init_logging();
        let net = Arc::new(Mutex::new(Net::new(conditions, seed)));
        let make = |side: Side, settings: SessionSettings| {
            let (sink, inbox) = EventSink::channel();
            let connector = MemoryConnector {
                side,
                net: Arc::clone(&net),
            };
            let mut session = Session::new(
                settings,
                cfg.clone(),
                GameConfig::default(),
                Box::new(connector),
                sink,
            );
            session.connect(0);
            Peer {
                session,
                inbox,
                events: Vec::new(),
            }
        };
        let host = make(Side::Host, host);
        let guest = make(Side::Guest, guest);
        Self {
            net,
            host,
            guest,
            now: 0,
        }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn peer(&self, side: Side) -> &Peer {
        match side {
            Side::Host => &self.host,
            Side::Guest => &self.guest,
        }
    }

    pub fn peer_mut(&mut self, side: Side) -> &mut Peer {
        match side {
            Side::Host => &mut self.host,
            Side::Guest => &mut self.guest,
        }
    }

    // --- clock -------------------------------------------------------------

    /// Advance one millisecond: deliver what is due, then let both
    /// sessions handle their inboxes and timers.
    pub fn step(&mut self) {
        self.now += 1;
        lock(&self.net).deliver_due(self.now);
        self.host.pump(self.now);
        self.guest.pump(self.now);
    }

    pub fn advance(&mut self, ms: u64) {
        for _ in 0..ms {
            self.step();
        }
    }

    pub fn settle(&mut self) {
        self.advance(SETTLE_MS);
    }

    /// Step until `pred` holds. Panics after `RUN_LIMIT_MS`.
    pub fn run_until(&mut self, what: &str, pred: impl Fn(&TestPair) -> bool) {
        let limit = self.now + RUN_LIMIT_MS;
        while !pred(self) {
            assert!(self.now < limit, "timed out waiting for {what}");
            self.step();
        }
    }

    // --- link controls -------------------------------------------------------

    pub fn set_conditions(&mut self, conditions: LinkConditions) {
        lock(&self.net).conditions = conditions;
    }

    /// Drop everything `from` sends until called again with `false`.
    pub fn cut(&mut self, from: Side, cut: bool) {
        lock(&self.net).cut[from.index()] = cut;
    }

    /// Park everything `from` sends instead of delivering it.
    pub fn intercept(&mut self, from: Side, on: bool) {
        lock(&self.net).intercept[from.index()] = on;
    }

    /// Parked envelopes, oldest first, as `(sender, text)`.
    pub fn take_held(&mut self) -> Vec<(Side, String)> {
        std::mem::take(&mut lock(&self.net).held)
    }

    /// Put `text` on the wire from `from`, bypassing loss and interception.
    pub fn inject(&mut self, from: Side, text: &str) {
        let mut net = lock(&self.net);
        let at = net.now + net.conditions.latency_ms;
        net.enqueue(from.other(), at, TransportEvent::Message(text.to_owned()));
    }

    pub fn sever(&mut self) {
        lock(&self.net).sever();
    }

    /// Packet types `from` has handed to the link so far, resends included.
    pub fn sent_types(&self, from: Side) -> Vec<PacketType> {
        lock(&self.net)
            .sent
            .iter()
            .filter(|(side, _)| *side == from)
            .map(|(_, packet_type)| *packet_type)
            .collect()
    }

    // --- session shortcuts --------------------------------------------------

    /// Run until both sides are authenticated.
    pub fn connect(&mut self) {
        self.run_until("handshake", |p| {
            p.host.session.is_authenticated() && p.guest.session.is_authenticated()
        });
    }

    /// Host starts a pvp match; run until the guest has adopted it.
    pub fn start_match(&mut self) {
        let now = self.now;
        self.host.session.start_match(now).expect("host starts match");
        self.run_until("guest match start", |p| p.guest.has_match());
    }

    pub fn place(&mut self, side: Side, r: u8, c: u8) -> Option<Rejection> {
        let now = self.now;
        self.peer_mut(side)
            .session
            .place_setup_mine(Coord::new(r, c), now)
            .expect("placement request accepted")
    }

    pub fn ready(&mut self, side: Side, bid: Option<u32>) -> VoteResult {
        let now = self.now;
        self.peer_mut(side).session.ready(bid, now).expect("vote accepted")
    }

    pub fn perform(&mut self, side: Side, action: GameAction) -> Result<ActionOutcome, SessionError> {
        let now = self.now;
        self.peer_mut(side).session.perform(action, now)
    }

    pub fn both_in(&self, phase: Phase) -> bool {
        [&self.host, &self.guest]
            .iter()
            .all(|p| p.has_match() && p.state().phase == phase)
    }

    /// Vote through placement (no mines) and thinking with the given bids.
    pub fn play_to_action(&mut self, host_bid: u32, guest_bid: u32) {
        if self.both_in(Phase::Placement) {
            self.ready(Side::Host, None);
            self.ready(Side::Guest, None);
            self.run_until("thinking", |p| p.both_in(Phase::Thinking));
        }
        self.ready(Side::Host, Some(host_bid));
        self.ready(Side::Guest, Some(guest_bid));
        self.run_until("action", |p| p.both_in(Phase::Action));
        self.settle();
    }

    /// The side whose turn it is, by the host's copy.
    pub fn current_side(&self) -> Side {
        Side::playing(self.host.state().current_player)
    }

    pub fn in_step(&self) -> bool {
        fingerprint(self.host.state()) == fingerprint(self.guest.state())
    }

    pub fn assert_in_step(&self) {
        let host = fingerprint(self.host.state());
        let guest = fingerprint(self.guest.state());
        assert!(
            host == guest,
            "peers diverged at {} ms\nhost:  {host}\nguest: {guest}",
            self.now
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_opens_when_both_sides_connect() {
        let mut pair = TestPair::new(LinkConditions::clean(), 1);
        pair.connect();
        assert_eq!(pair.sent_types(Side::Host)[0], PacketType::Hello);
        assert_eq!(pair.sent_types(Side::Guest)[0], PacketType::Hello);
        assert_eq!(pair.guest.session.remote_peer_id(), Some("host"));
    }

    #[test]
    fn jitter_reorders_but_delivers_everything() {
        let mut net = Net::new(
            LinkConditions {
                jitter_ms: 50,
                ..LinkConditions::clean()
            },
            7,
        );
        let (host_sink, _host_rx) = EventSink::channel();
        let (guest_sink, guest_rx) = EventSink::channel();
        net.register(Side::Host, LinkId(1), host_sink);
        net.register(Side::Guest, LinkId(1), guest_sink);
        for i in 0..20 {
            net.send(Side::Host, LinkId(1), &i.to_string()).unwrap();
        }
        net.deliver_due(1_000);

        let mut got: Vec<u32> = guest_rx
            .try_iter()
            .filter_map(|e| match e.event {
                TransportEvent::Message(text) => text.parse().ok(),
                _ => None,
            })
            .collect();
        got.sort_unstable();
        assert_eq!(got, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn closing_one_end_tells_the_other() {
        let mut net = Net::new(LinkConditions::clean(), 1);
        let (host_sink, host_rx) = EventSink::channel();
        let (guest_sink, _guest_rx) = EventSink::channel();
        net.register(Side::Host, LinkId(1), host_sink);
        net.register(Side::Guest, LinkId(4), guest_sink);
        net.send(Side::Guest, LinkId(4), "last words").unwrap();
        net.unregister(Side::Guest, LinkId(4));
        assert!(net.is_open(Side::Host, LinkId(1)));

        // Data in flight is read before end-of-stream.
        net.deliver_due(100);
        let events: Vec<_> = host_rx.try_iter().map(|e| e.event).collect();
        assert_eq!(
            events,
            vec![
                TransportEvent::Opened,
                TransportEvent::Message("last words".into()),
                TransportEvent::Closed
            ]
        );
        assert!(!net.is_open(Side::Host, LinkId(1)));
        assert!(net.send(Side::Host, LinkId(1), "late").is_err());
    }
}
