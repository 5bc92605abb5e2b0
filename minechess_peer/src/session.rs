// One peer's view of a two-player match.
//
// `Session` is the single dispatcher for everything that can happen to a
// peer: a transport lifecycle event, an inbound message, a local request
// (perform an action, place a setup mine, vote ready), or the clock
// advancing. Each is handled to completion before the next; nothing is
// shared across threads. The runner (`runner.rs`) feeds it from one inbox;
// tests call it directly with a virtual clock.
//
// Flow for a local action in pvp:
// 1. `can_broadcast_action` guard (turn, owner, not replaying a remote).
// 2. Rules run on the current state (`apply_action`, `Origin::Local`).
// 3. If the rules accepted it, the envelope goes out, stamped with the
//    turn the action was taken in. Only then is the new state swapped in,
//    so an action that could not be sent never diverges the two copies.
// 4. A deferred snapshot is scheduled with the action's reason label.
//
// Inbound game actions go through `applier::apply_remote` with
// `applying_remote` set; the host follows each applied remote action with a
// snapshot so the guest converges on the host's result.
//
// READY votes, snapshot merges, heartbeat, and reconnect are handled here
// too; the decisions live in `ready.rs`, `minechess_sim::snapshot`,
// `handshake.rs`, and `reconnect.rs`.
//
// See also: `reliability.rs` for seq/ACK/retry, `sync.rs` for the deferred
// snapshot schedule.
//
// **Critical constraint: exactly one host.** The role is fixed at
// construction and never inferred from traffic. A HELLO from a peer that
// claims the same role is treated as a fatal misconfiguration: the session
// reports it and disconnects instead of guessing.

use minechess_protocol::{
    Coord, Envelope, GameMode, PacketType, Payload, PlayerId, PongPayload, ReadyPhase, Role, Seq,
    StartGamePayload, StateSyncPayload,
};
use minechess_sim::phase::place_setup_mine_or_hint;
use minechess_sim::{
    ActionOutcome, GameAction, GameConfig, GameState, MergeContext, Origin, Rejection, ReadyVote,
    VoteResult, admissible_setup_mines, apply_action, cast_ready_vote, decode_snapshot,
    encode_snapshot, is_stale, merge_snapshot,
};

use crate::applier::{RemoteVerdict, apply_remote, remote_sync_reason};
use crate::config::{PeerConfig, SessionSettings};
use crate::dispatch::{DispatchContext, action_payload, can_broadcast_action, sync_reason};
use crate::error::{SendError, SessionError};
use crate::handshake::{HelloVerdict, auth_result, judge_hello};
use crate::holder::StateHolder;
use crate::ready::{ReadyCheck, ReadyRetry, check_remote_ready, payload_from_vote, vote_is_stuck};
use crate::reconnect::{Backoff, ConnectionStatus};
use crate::reliability::{Inbound, ReliableChannel, SendOptions};
use crate::sync::DeferredSync;
use crate::transport::{Connector, EventSink, LinkEvent, LinkId, Transport, TransportEvent};

/// Things the embedding application may want to react to.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    StatusChanged(ConnectionStatus),
    /// Guest: the host accepted our HELLO.
    Authenticated { room_name: Option<String> },
    /// Guest: the host refused us. The session has disconnected for good.
    AuthRejected { reason: String },
    /// Host: a guest passed the handshake.
    PeerJoined { peer_id: String },
    MatchStarted,
    MatchLeft,
    StateChanged { version: u64 },
    /// A local action the rules refused. Its hint is already in the log.
    ActionRejected(Rejection),
    /// One envelope exhausted its retries. The session keeps running.
    DeliveryFailed { seq: Seq, packet_type: PacketType },
    Error(String),
}

pub struct Session {
    settings: SessionSettings,
    cfg: PeerConfig,
    game_cfg: GameConfig,
    connector: Box<dyn Connector>,
    sink: EventSink,
    link: LinkId,
    transport: Option<Box<dyn Transport>>,
    channel: ReliableChannel,
    holder: StateHolder,
    merge_ctx: MergeContext,
    deferred: DeferredSync,
    ready_retry: ReadyRetry,
    backoff: Backoff,
    reconnect_at: Option<u64>,
    next_ping_at: Option<u64>,
    status: ConnectionStatus,
    manual_disconnect: bool,
    applying_remote: bool,
    authenticated: bool,
    remote_peer_id: Option<String>,
    events: Vec<SessionEvent>,
}

impl Session {
    pub fn new(
        settings: SessionSettings,
        cfg: PeerConfig,
        game_cfg: GameConfig,
        connector: Box<dyn Connector>,
        sink: EventSink,
    ) -> Self {
        Self {
            channel: ReliableChannel::new(cfg.clone()),
            deferred: DeferredSync::new(&cfg),
            ready_retry: ReadyRetry::new(cfg.ready_retry_ms),
            backoff: Backoff::new(cfg.reconnect_base_ms, cfg.reconnect_cap_ms),
            settings,
            cfg,
            game_cfg,
            connector,
            sink,
            link: LinkId::default(),
            transport: None,
            holder: StateHolder::new(),
            merge_ctx: MergeContext::default(),
            reconnect_at: None,
            next_ping_at: None,
            status: ConnectionStatus::Idle,
            manual_disconnect: false,
            applying_remote: false,
            authenticated: false,
            remote_peer_id: None,
            events: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn role(&self) -> Role {
        self.settings.role
    }

    pub fn local_player(&self) -> PlayerId {
        self.settings.role.local_player()
    }

    pub fn state(&self) -> Option<&GameState> {
        self.holder.current()
    }

    pub fn state_version(&self) -> u64 {
        self.holder.version()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn remote_peer_id(&self) -> Option<&str> {
        self.remote_peer_id.as_deref()
    }

    /// Unacknowledged outgoing envelopes.
    pub fn pending_sends(&self) -> usize {
        self.channel.pending_count()
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn push_event(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    fn is_host(&self) -> bool {
        self.settings.role == Role::Host
    }

    fn dispatch_context(&self) -> DispatchContext {
        DispatchContext {
            applying_remote: self.applying_remote,
            local_player: Some(self.local_player()),
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            log::info!("[{}] status {:?} -> {status:?}", self.settings.peer_id, self.status);
            self.status = status;
            self.events.push(SessionEvent::StatusChanged(status));
        }
    }

    fn replace_state(&mut self, next: GameState) {
        self.holder.replace(next);
        self.events.push(SessionEvent::StateChanged {
            version: self.holder.version(),
        });
    }

    // ------------------------------------------------------------------
    // Link lifecycle
    // ------------------------------------------------------------------

    /// Open the first link. Later links are opened by the reconnect timer.
    pub fn connect(&mut self, now: u64) {
        self.manual_disconnect = false;
        self.backoff.reset();
        self.reconnect_at = None;
        self.open_link(now);
    }

    /// User-initiated teardown. Never reconnects.
    pub fn disconnect(&mut self, now: u64) {
        self.manual_disconnect = true;
        self.drop_link();
        self.reconnect_at = None;
        self.deferred.clear();
        self.ready_retry.disarm();
        self.channel.reset_link(now);
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn open_link(&mut self, now: u64) {
        self.drop_link();
        self.link = LinkId(self.link.0 + 1);
        if self.status != ConnectionStatus::Reconnecting {
            self.set_status(ConnectionStatus::Connecting);
        }
        match self.connector.connect(self.link, self.sink.clone()) {
            Ok(transport) => self.transport = Some(transport),
            Err(err) => {
                log::warn!("[{}] could not open {}: {err}", self.settings.peer_id, self.link);
                self.events.push(SessionEvent::Error(err.to_string()));
                self.schedule_reconnect(now);
            }
        }
    }

    fn drop_link(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.next_ping_at = None;
        self.authenticated = false;
    }

    fn schedule_reconnect(&mut self, now: u64) {
        if self.manual_disconnect {
            self.set_status(ConnectionStatus::Disconnected);
            return;
        }
        let delay = self.backoff.next_delay();
        log::info!(
            "[{}] reconnect attempt {} in {delay} ms",
            self.settings.peer_id,
            self.backoff.attempt()
        );
        self.reconnect_at = Some(now + delay);
        self.set_status(ConnectionStatus::Reconnecting);
    }

    pub fn handle_link_event(&mut self, event: LinkEvent, now: u64) {
        if event.link != self.link {
            log::trace!("dropping {:?} from replaced {}", event.event, event.link);
            return;
        }
        match event.event {
            TransportEvent::Opened => self.on_open(now),
            TransportEvent::Message(text) => self.on_message(&text, now),
            TransportEvent::Closed => self.on_link_lost(now),
            TransportEvent::Error(message) => {
                self.events.push(SessionEvent::Error(message));
                self.on_link_lost(now);
            }
        }
    }

    fn on_open(&mut self, now: u64) {
        self.channel.reset_link(now);
        self.backoff.reset();
        self.reconnect_at = None;
        self.authenticated = false;
        self.next_ping_at = Some(now + self.cfg.heartbeat_ms);
        self.set_status(ConnectionStatus::Connected);
        let hello = Payload::Hello(minechess_protocol::HelloPayload {
            role: self.settings.role,
            peer_id: self.settings.peer_id.clone(),
            password: match self.settings.role {
                Role::Guest => self.settings.password.clone(),
                Role::Host => None,
            },
        });
        if let Err(err) = self.send(&hello, now) {
            log::warn!("[{}] HELLO failed: {err}", self.settings.peer_id);
        }
    }

    fn on_link_lost(&mut self, now: u64) {
        if self.manual_disconnect {
            return;
        }
        log::info!("[{}] {} lost", self.settings.peer_id, self.link);
        self.drop_link();
        self.schedule_reconnect(now);
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    fn current_turn(&self) -> u32 {
        self.holder.current().map_or(0, |s| s.turn_count)
    }

    fn send(&mut self, payload: &Payload, now: u64) -> Result<Seq, SendError> {
        let opts = SendOptions::for_packet(payload.packet_type(), &self.cfg);
        let turn = self.current_turn();
        self.send_at(payload, turn, now, opts)
    }

    fn send_at(
        &mut self,
        payload: &Payload,
        turn: u32,
        now: u64,
        opts: SendOptions,
    ) -> Result<Seq, SendError> {
        let Some(transport) = self.transport.as_deref_mut() else {
            return Err(SendError::NotOpen {
                packet_type: payload.packet_type(),
            });
        };
        self.channel
            .send(transport, payload, &self.settings.room_id, turn, now, opts)
    }

    /// Send a snapshot of the current state now.
    fn send_state(&mut self, reason: &str, now: u64) {
        let Some(state) = self.holder.current() else {
            return;
        };
        let snapshot = match encode_snapshot(state) {
            Ok(value) => value,
            Err(err) => {
                self.events.push(SessionEvent::Error(err.to_string()));
                return;
            }
        };
        let payload = Payload::StateSync(StateSyncPayload {
            reason: reason.to_owned(),
            state: snapshot,
            allow_dev_tools: self.is_host().then_some(self.settings.allow_dev_tools),
        });
        match self.send(&payload, now) {
            Ok(seq) => log::debug!("[{}] STATE_SYNC {reason} as seq {seq}", self.settings.peer_id),
            Err(err) => log::debug!("[{}] STATE_SYNC {reason} not sent: {err}", self.settings.peer_id),
        }
    }

    fn schedule_sync(&mut self, reason: &str, now: u64) {
        self.deferred.schedule(reason, now);
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    fn on_message(&mut self, text: &str, now: u64) {
        let Some(transport) = self.transport.as_deref_mut() else {
            return;
        };
        match self.channel.receive(transport, text, now) {
            Inbound::Deliver(envelope, payload) => self.on_envelope(&envelope, payload, now),
            Inbound::Duplicate(seq) => log::trace!("duplicate seq {seq} re-acknowledged"),
            Inbound::Acked { seq, matched } => {
                if !matched {
                    log::trace!("stray ACK for seq {seq}");
                }
            }
            Inbound::Malformed(err) => log::debug!("dropping malformed envelope: {err}"),
        }
    }

    fn on_envelope(&mut self, envelope: &Envelope, payload: Payload, now: u64) {
        if envelope.match_id != self.settings.room_id {
            log::debug!(
                "dropping {:?} for room {:?} (ours is {:?})",
                envelope.packet_type,
                envelope.match_id,
                self.settings.room_id
            );
            return;
        }
        // Until the handshake completes on this link only session plumbing
        // gets through; game traffic from an unauthenticated peer is dropped.
        let plumbing = matches!(
            payload,
            Payload::Hello(_)
                | Payload::AuthResult(_)
                | Payload::Ping
                | Payload::Pong(_)
                | Payload::Ack(_)
        );
        if !self.authenticated && !plumbing {
            log::debug!(
                "[{}] dropping {:?} before authentication",
                self.settings.peer_id,
                envelope.packet_type
            );
            return;
        }
        match payload {
            Payload::Hello(hello) => self.on_hello(&hello, now),
            Payload::AuthResult(result) => {
                self.on_auth_result(result.accepted, result.reason, result.room_name, now)
            }
            Payload::StartGame(start) => self.on_start_game(start),
            Payload::LeaveMatch => self.end_match(),
            Payload::StateSync(sync) => self.on_state_sync(&sync, now),
            Payload::PlayerReady(ready) => self.on_ready(envelope.turn, &ready, now),
            Payload::Ping => {
                let pong = Payload::Pong(PongPayload { ping_ts: envelope.ts });
                let opts = SendOptions::unacked(&self.cfg);
                let turn = envelope.turn;
                if let Err(err) = self.send_at(&pong, turn, now, opts) {
                    log::debug!("PONG not sent: {err}");
                }
            }
            Payload::Pong(_) | Payload::Ack(_) => {}
            action => self.on_remote_action(envelope, &action, now),
        }
    }

    fn on_hello(&mut self, hello: &minechess_protocol::HelloPayload, now: u64) {
        if hello.role == self.settings.role {
            let message = format!("peer {:?} also claims role {:?}", hello.peer_id, hello.role);
            log::warn!("[{}] {message}", self.settings.peer_id);
            self.events.push(SessionEvent::Error(message));
            self.disconnect(now);
            self.set_status(ConnectionStatus::Error);
            return;
        }
        self.remote_peer_id = Some(hello.peer_id.clone());
        let verdict = judge_hello(self.settings.role, self.settings.password.as_deref(), hello);
        let Some(result) = auth_result(&verdict, self.settings.room_name.as_deref()) else {
            return;
        };
        match verdict {
            HelloVerdict::Accept => {
                if let Err(err) = self.send(&Payload::AuthResult(result), now) {
                    log::warn!("AUTH_RESULT not sent: {err}");
                    return;
                }
                self.authenticated = true;
                log::info!("[{}] guest {:?} joined", self.settings.peer_id, hello.peer_id);
                self.events.push(SessionEvent::PeerJoined {
                    peer_id: hello.peer_id.clone(),
                });
                // A returning guest missed everything while it was away.
                if self.holder.current().is_some() {
                    self.schedule_sync("peer_rejoined", now);
                }
            }
            HelloVerdict::Reject(reason) => {
                log::warn!("[{}] rejecting {:?}: {reason}", self.settings.peer_id, hello.peer_id);
                let opts = SendOptions::unacked(&self.cfg);
                let turn = self.current_turn();
                if let Err(err) = self.send_at(&Payload::AuthResult(result), turn, now, opts) {
                    log::debug!("AUTH_RESULT not sent: {err}");
                }
                self.disconnect(now);
            }
            HelloVerdict::Ignore => {}
        }
    }

    fn on_auth_result(
        &mut self,
        accepted: bool,
        reason: Option<String>,
        room_name: Option<String>,
        now: u64,
    ) {
        if self.is_host() {
            return;
        }
        if accepted {
            self.authenticated = true;
            self.events.push(SessionEvent::Authenticated { room_name });
            return;
        }
        let reason = reason.unwrap_or_else(|| "rejected".to_owned());
        log::warn!("[{}] host rejected us: {reason}", self.settings.peer_id);
        self.events.push(SessionEvent::AuthRejected { reason });
        self.disconnect(now);
        self.set_status(ConnectionStatus::Error);
    }

    fn on_start_game(&mut self, start: StartGamePayload) {
        if self.is_host() {
            log::debug!("host ignores START_GAME");
            return;
        }
        let state = match start.initial_state {
            Some(value) => match decode_snapshot(&value) {
                Ok(state) => state,
                Err(err) => {
                    log::debug!("START_GAME with unusable state: {err}");
                    return;
                }
            },
            None => GameState::new_match(start.mode, &self.game_cfg),
        };
        self.begin_match(state);
    }

    fn begin_match(&mut self, state: GameState) {
        self.merge_ctx = MergeContext::default();
        self.deferred.clear();
        self.ready_retry.disarm();
        self.replace_state(state);
        self.events.push(SessionEvent::MatchStarted);
    }

    fn end_match(&mut self) {
        if self.holder.current().is_none() {
            return;
        }
        self.holder.clear();
        self.merge_ctx = MergeContext::default();
        self.deferred.clear();
        self.ready_retry.disarm();
        self.events.push(SessionEvent::MatchLeft);
    }

    fn on_state_sync(&mut self, sync: &StateSyncPayload, now: u64) {
        let incoming = match decode_snapshot(&sync.state) {
            Ok(state) => state,
            Err(err) => {
                log::debug!("dropping STATE_SYNC {}: {err}", sync.reason);
                return;
            }
        };
        let local = self.local_player();
        let next = match self.holder.current() {
            Some(prev) if is_stale(prev, &incoming) => {
                log::debug!(
                    "[{}] dropping stale STATE_SYNC {} (turn {} {:?}, ours turn {} {:?})",
                    self.settings.peer_id,
                    sync.reason,
                    incoming.turn_count,
                    incoming.phase,
                    prev.turn_count,
                    prev.phase
                );
                // The sender is behind us; our state brings it forward.
                self.schedule_sync("stale_snapshot_answer", now);
                return;
            }
            Some(prev) => merge_snapshot(prev, &incoming, local, &mut self.merge_ctx, &self.game_cfg),
            None => {
                self.begin_match(incoming);
                return;
            }
        };
        log::debug!("[{}] merged STATE_SYNC {}", self.settings.peer_id, sync.reason);
        self.replace_state(next);
    }

    fn on_remote_action(&mut self, envelope: &Envelope, payload: &Payload, now: u64) {
        let Some(state) = self.holder.current() else {
            return;
        };
        let remote = self.settings.role.remote_player();
        self.applying_remote = true;
        let verdict = apply_remote(state, envelope, payload, remote, &self.game_cfg);
        let outcome = match verdict {
            RemoteVerdict::Applied(outcome) => outcome,
            RemoteVerdict::Ignored(_) | RemoteVerdict::NotAnAction => {
                self.applying_remote = false;
                return;
            }
        };
        let applied = outcome.applied();
        if let Some(rejection) = &outcome.rejection {
            log::debug!("remote {:?} refused here: {rejection:?}", envelope.packet_type);
        }
        self.replace_state(outcome.state);
        self.applying_remote = false;
        if applied && self.is_host() {
            self.schedule_sync(&remote_sync_reason(payload), now);
        }
    }

    // ------------------------------------------------------------------
    // Match control
    // ------------------------------------------------------------------

    /// Host: create a fresh pvp match and send it to the guest.
    pub fn start_match(&mut self, now: u64) -> Result<(), SessionError> {
        if !self.is_host() {
            return Err(SessionError::HostOnly("start a match"));
        }
        let state = GameState::new_match(GameMode::Pvp, &self.game_cfg);
        let payload = Payload::StartGame(StartGamePayload {
            mode: GameMode::Pvp,
            initial_state: Some(encode_snapshot(&state)?),
            allow_dev_tools: Some(self.settings.allow_dev_tools),
        });
        let opts = SendOptions::for_packet(PacketType::StartGame, &self.cfg);
        self.send_at(&payload, state.turn_count, now, opts)?;
        self.begin_match(state);
        Ok(())
    }

    /// Start a match that never touches the network (sandbox, vs AI).
    pub fn start_local_match(&mut self, mode: GameMode) {
        self.begin_match(GameState::new_match(mode, &self.game_cfg));
    }

    pub fn leave_match(&mut self, now: u64) -> Result<(), SessionError> {
        if self.holder.current().is_none() {
            return Err(SessionError::NoMatch);
        }
        if let Err(err) = self.send(&Payload::LeaveMatch, now) {
            log::debug!("LEAVE_MATCH not sent: {err}");
        }
        self.end_match();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Local requests
    // ------------------------------------------------------------------

    /// Run one player action through the rules and, in pvp, broadcast it.
    ///
    /// A rules rejection is `Ok` with `outcome.rejection` set; the hint is
    /// in the log and nothing was sent. `Err` means nothing changed at all.
    pub fn perform(&mut self, action: GameAction, now: u64) -> Result<ActionOutcome, SessionError> {
        let state = self.holder.current().ok_or(SessionError::NoMatch)?;
        let pvp = state.game_mode == GameMode::Pvp;
        if pvp && !can_broadcast_action(self.dispatch_context(), state, &action) {
            return Err(SessionError::NotEntitled);
        }
        let turn = state.turn_count;
        let payload = action_payload(&action, state, &self.game_cfg);
        let outcome = apply_action(state, &action, Origin::Local, &self.game_cfg);
        if pvp && outcome.applied() {
            let opts = SendOptions::for_packet(payload.packet_type(), &self.cfg);
            self.send_at(&payload, turn, now, opts)?;
            self.schedule_sync(sync_reason(&action), now);
        }
        if let Some(rejection) = &outcome.rejection {
            self.events.push(SessionEvent::ActionRejected(rejection.clone()));
        }
        self.replace_state(outcome.state.clone());
        Ok(outcome)
    }

    /// Hide one of our setup mines during placement.
    pub fn place_setup_mine(&mut self, cell: Coord, now: u64) -> Result<Option<Rejection>, SessionError> {
        let state = self.holder.current().ok_or(SessionError::NoMatch)?;
        let local = self.local_player();
        let (next, rejection) = place_setup_mine_or_hint(state, local, cell, &self.game_cfg);
        let pvp = next.game_mode == GameMode::Pvp;
        if rejection.is_none() {
            self.merge_ctx.remember(&next.setup_mines());
        }
        self.replace_state(next);
        if let Some(rejection) = &rejection {
            self.events.push(SessionEvent::ActionRejected(rejection.clone()));
        } else if pvp {
            self.schedule_sync("place_setup_mine", now);
        }
        Ok(rejection)
    }

    /// Vote ready for the current phase. `bid` applies to thinking votes.
    pub fn ready(&mut self, bid: Option<u32>, now: u64) -> Result<VoteResult, SessionError> {
        let state = self.holder.current().ok_or(SessionError::NoMatch)?;
        let local = self.local_player();
        if state.pvp_ready_state[local] {
            return Ok(VoteResult::Recorded);
        }
        let mut staged = state.clone();
        if let Some(bid) = bid {
            staged.pvp_energy_bids[local] = bid.min(staged.players[local].energy);
        }
        let vote = ReadyVote::from_state(&staged, local).ok_or(SessionError::NoVote(staged.phase))?;
        let pvp = staged.game_mode == GameMode::Pvp;
        if pvp {
            let payload = Payload::PlayerReady(payload_from_vote(&vote));
            let opts = SendOptions::for_packet(PacketType::PlayerReady, &self.cfg);
            self.send_at(&payload, staged.turn_count, now, opts)?;
        }
        if vote.phase == ReadyPhase::Placement {
            self.merge_ctx.remember(&staged.setup_mines());
        }
        let result = self.cast_vote(&staged, &vote, now);
        if pvp && result == VoteResult::Recorded {
            self.ready_retry.arm(now);
        }
        Ok(result)
    }

    fn cast_vote(&mut self, state: &GameState, vote: &ReadyVote, now: u64) -> VoteResult {
        let (next, result) = cast_ready_vote(
            state,
            vote,
            &self.merge_ctx.remembered_placement,
            &self.settings.room_id,
            &self.game_cfg,
        );
        self.replace_state(next);
        if let VoteResult::Advanced { to } = result {
            log::info!("[{}] phase advanced to {to:?}", self.settings.peer_id);
            self.ready_retry.disarm();
            self.merge_ctx.remembered_placement.clear();
            if self.is_host() {
                self.schedule_sync("ready_phase_advanced", now);
            }
        }
        result
    }

    fn on_ready(&mut self, envelope_turn: u32, ready: &minechess_protocol::ReadyPayload, now: u64) {
        let Some(state) = self.holder.current() else {
            return;
        };
        let remote = self.settings.role.remote_player();
        match check_remote_ready(state, envelope_turn, ready, remote) {
            ReadyCheck::WrongPlayer => {
                log::debug!("dropping READY that claims seat {}", ready.player_id);
            }
            ReadyCheck::TurnMismatch => self.recover_vote("ready_turn_mismatch", now),
            ReadyCheck::PhaseMismatch => self.recover_vote("ready_phase_mismatch", now),
            ReadyCheck::Vote(vote) => {
                let state = state.clone();
                if vote.phase == ReadyPhase::Placement {
                    let mines = admissible_setup_mines(
                        &state,
                        vote.player,
                        &vote.setup_mines,
                        &self.game_cfg,
                    );
                    self.merge_ctx.remember(&mines);
                }
                if self.cast_vote(&state, &vote, now) == VoteResult::PhaseMismatch {
                    self.recover_vote("ready_phase_mismatch", now);
                }
            }
        }
    }

    /// The peer voted for a phase or turn we are not in. The host answers
    /// with its state; the guest re-asserts its own vote, if it has one.
    fn recover_vote(&mut self, reason: &str, now: u64) {
        log::debug!("[{}] READY mismatch: {reason}", self.settings.peer_id);
        if self.is_host() {
            self.schedule_sync(reason, now);
            return;
        }
        let local = self.local_player();
        if self.holder.current().is_some_and(|s| s.pvp_ready_state[local]) {
            self.resend_ready(now);
        }
    }

    fn resend_ready(&mut self, now: u64) {
        let local = self.local_player();
        let Some(state) = self.holder.current() else {
            return;
        };
        let Some(vote) = ReadyVote::from_state(state, local) else {
            return;
        };
        let payload = Payload::PlayerReady(payload_from_vote(&vote));
        if let Err(err) = self.send(&payload, now) {
            log::debug!("READY re-send failed: {err}");
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Run every timer that is due at `now`.
    pub fn tick(&mut self, now: u64) {
        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            self.open_link(now);
        }

        if let Some(transport) = self.transport.as_deref_mut() {
            for failure in self.channel.poll_timeouts(transport, now) {
                self.events.push(SessionEvent::DeliveryFailed {
                    seq: failure.seq,
                    packet_type: failure.packet_type,
                });
            }
        }

        for reason in self.deferred.take_due(now) {
            self.send_state(&reason, now);
        }

        self.tick_ready(now);
        self.tick_heartbeat(now);
    }

    fn tick_ready(&mut self, now: u64) {
        if !self.ready_retry.is_armed() {
            return;
        }
        let local = self.local_player();
        let stuck = self.holder.current().is_some_and(|s| vote_is_stuck(s, local));
        if !stuck {
            self.ready_retry.disarm();
            return;
        }
        if self.ready_retry.fire(now) {
            log::debug!("[{}] READY still unanswered; re-sending", self.settings.peer_id);
            self.resend_ready(now);
            if self.is_host() {
                self.send_state("ready_retry_sync", now);
            }
        }
    }

    fn tick_heartbeat(&mut self, now: u64) {
        if self.status != ConnectionStatus::Connected {
            return;
        }
        let silent_since = self.channel.last_message_at().unwrap_or(now);
        if now.saturating_sub(silent_since) >= self.cfg.silence_timeout_ms {
            log::info!("[{}] peer silent for {} ms", self.settings.peer_id, now - silent_since);
            self.on_link_lost(now);
            return;
        }
        if self.next_ping_at.is_some_and(|at| at <= now) {
            self.next_ping_at = Some(now + self.cfg.heartbeat_ms);
            let opts = SendOptions::unacked(&self.cfg);
            let turn = self.current_turn();
            if let Err(err) = self.send_at(&Payload::Ping, turn, now, opts) {
                log::debug!("PING not sent: {err}");
            }
        }
    }

    /// Earliest time `tick` has work to do.
    pub fn next_deadline(&self) -> Option<u64> {
        let silence = match self.status {
            ConnectionStatus::Connected => self
                .channel
                .last_message_at()
                .map(|at| at + self.cfg.silence_timeout_ms),
            _ => None,
        };
        [
            self.reconnect_at,
            self.channel.next_deadline(),
            self.deferred.next_deadline(),
            self.ready_retry.next_deadline(),
            self.next_ping_at,
            silence,
        ]
        .into_iter()
        .flatten()
        .min()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Receiver;
    use std::sync::{Arc, Mutex};

    use minechess_protocol::{MovePayload, Phase, ReadyPayload};

    use super::*;
    use crate::error::TransportError;

    /// Records outgoing text; opening is reported through the sink.
    #[derive(Clone, Default)]
    struct Wire {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl Wire {
        fn envelopes(&self) -> Vec<Envelope> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|t| Envelope::decode(t).unwrap())
                .collect()
        }

        fn types(&self) -> Vec<PacketType> {
            self.envelopes().iter().map(|e| e.packet_type).collect()
        }

        fn clear(&self) {
            self.sent.lock().unwrap().clear();
        }
    }

    struct WireTransport(Wire);

    impl Transport for WireTransport {
        fn send(&mut self, text: &str) -> Result<(), TransportError> {
            self.0.sent.lock().unwrap().push(text.to_owned());
            Ok(())
        }
        fn is_open(&self) -> bool {
            true
        }
        fn close(&mut self) {}
    }

    struct WireConnector(Wire);

    impl Connector for WireConnector {
        fn connect(&mut self, link: LinkId, sink: EventSink) -> Result<Box<dyn Transport>, TransportError> {
            sink.emit(link, TransportEvent::Opened);
            Ok(Box::new(WireTransport(self.0.clone())))
        }
    }

    struct Harness {
        session: Session,
        wire: Wire,
        inbox: Receiver<LinkEvent>,
        peer_seq: u64,
    }

    impl Harness {
        /// A session whose handshake has already completed.
        fn new(role: Role) -> Self {
            let mut harness = Self::unauthenticated(role, None);
            harness.session.authenticated = true;
            harness
        }

        fn unauthenticated(role: Role, password: Option<&str>) -> Self {
            let wire = Wire::default();
            let (sink, inbox) = EventSink::channel();
            let settings = SessionSettings {
                role,
                room_id: "room-1".into(),
                peer_id: format!("{role:?}").to_lowercase(),
                password: password.map(str::to_owned),
                room_name: None,
                allow_dev_tools: false,
            };
            // ACK retries are covered in `reliability.rs`; keep them out of
            // the way here.
            let cfg = PeerConfig {
                ack_timeout_ms: 60_000,
                ..PeerConfig::default()
            };
            let mut session = Session::new(
                settings,
                cfg,
                GameConfig::default(),
                Box::new(WireConnector(wire.clone())),
                sink,
            );
            session.connect(0);
            let mut harness = Self {
                session,
                wire,
                inbox,
                peer_seq: 0,
            };
            harness.pump(0);
            harness.wire.clear();
            harness
        }

        fn pump(&mut self, now: u64) {
            while let Ok(event) = self.inbox.try_recv() {
                self.session.handle_link_event(event, now);
            }
        }

        fn deliver(&mut self, payload: &Payload, turn: u32, now: u64) {
            self.peer_seq += 1;
            let envelope = Envelope::build(payload, "room-1", turn, now, Seq(self.peer_seq)).unwrap();
            let event = LinkEvent {
                link: self.session.link,
                event: TransportEvent::Message(envelope.encode().unwrap()),
            };
            self.session.handle_link_event(event, now);
        }

        fn action_state(&mut self) {
            let mut state = GameState::new_match(GameMode::Pvp, &GameConfig::default());
            state.phase = Phase::Action;
            self.session.holder.replace(state);
        }
    }

    fn step() -> GameAction {
        GameAction::Move {
            unit_id: "p1-general".into(),
            target: Coord::new(2, 2),
        }
    }

    #[test]
    fn open_sends_hello_and_connects() {
        let wire = Wire::default();
        let (sink, inbox) = EventSink::channel();
        let settings = SessionSettings {
            role: Role::Guest,
            room_id: "room-1".into(),
            peer_id: "g".into(),
            password: Some("pw".into()),
            room_name: None,
            allow_dev_tools: false,
        };
        let mut session = Session::new(
            settings,
            PeerConfig::default(),
            GameConfig::default(),
            Box::new(WireConnector(wire.clone())),
            sink,
        );
        session.connect(0);
        assert_eq!(session.status(), ConnectionStatus::Connecting);
        session.handle_link_event(inbox.recv().unwrap(), 0);
        assert_eq!(session.status(), ConnectionStatus::Connected);
        let hello = &wire.envelopes()[0];
        assert_eq!(hello.packet_type, PacketType::Hello);
        assert_eq!(hello.payload["password"], "pw");
    }

    #[test]
    fn perform_sends_before_swapping_state() {
        let mut h = Harness::new(Role::Host);
        h.action_state();
        let outcome = h.session.perform(step(), 10).unwrap();
        assert!(outcome.applied());
        assert_eq!(h.wire.types(), vec![PacketType::Move]);
        assert_eq!(h.wire.envelopes()[0].turn, 1);
        assert_eq!(h.session.state().unwrap().unit("p1-general").unwrap().pos, Coord::new(2, 2));

        h.session.tick(18);
        assert_eq!(h.wire.types(), vec![PacketType::Move, PacketType::StateSync]);
        assert_eq!(h.wire.envelopes()[1].payload["reason"], "move");
    }

    #[test]
    fn guest_may_not_move_on_host_turn() {
        let mut h = Harness::new(Role::Guest);
        h.action_state();
        let before = h.session.state_version();
        let err = h
            .session
            .perform(
                GameAction::Move {
                    unit_id: "p2-general".into(),
                    target: Coord::new(2, 21),
                },
                0,
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::NotEntitled));
        assert_eq!(h.session.state_version(), before);
        assert!(h.wire.types().is_empty());
    }

    #[test]
    fn rejected_local_action_is_not_broadcast() {
        let mut h = Harness::new(Role::Host);
        h.action_state();
        let far = GameAction::Move {
            unit_id: "p1-general".into(),
            target: Coord::new(6, 6),
        };
        let outcome = h.session.perform(far, 0).unwrap();
        assert_eq!(outcome.rejection, Some(Rejection::OutOfRange));
        assert!(h.wire.types().is_empty());
        assert!(h
            .session
            .take_events()
            .contains(&SessionEvent::ActionRejected(Rejection::OutOfRange)));
    }

    #[test]
    fn host_resyncs_after_remote_action() {
        let mut h = Harness::new(Role::Host);
        h.action_state();
        let mut state = h.session.state().unwrap().clone();
        state.current_player = PlayerId::P2;
        h.session.holder.replace(state);

        let payload = Payload::Move(MovePayload {
            unit_id: "p2-general".into(),
            r: 2,
            c: 21,
            cost: 0,
        });
        h.deliver(&payload, 1, 100);
        let moved = h.session.state().unwrap().unit("p2-general").unwrap().pos;
        assert_eq!(moved, Coord::new(2, 21));

        h.session.tick(140);
        let reasons: Vec<String> = h
            .wire
            .envelopes()
            .iter()
            .filter(|e| e.packet_type == PacketType::StateSync)
            .map(|e| e.payload["reason"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(reasons, vec!["remote_move_applied", "remote_move_applied_resync"]);
    }

    #[test]
    fn stale_thinking_vote_during_placement_forces_host_resync() {
        let mut h = Harness::new(Role::Host);
        h.session.start_match(0).unwrap();
        h.wire.clear();
        let stale = Payload::PlayerReady(ReadyPayload {
            player_id: PlayerId::P2,
            phase: ReadyPhase::Thinking,
            setup_mines: None,
            energy_bid: Some(0),
        });
        h.deliver(&stale, 1, 50);
        let state = h.session.state().unwrap();
        assert_eq!(state.phase, Phase::Placement);
        assert!(!state.pvp_ready_state.p2);

        h.session.tick(100);
        let reasons: Vec<String> = h
            .wire
            .envelopes()
            .iter()
            .filter(|e| e.packet_type == PacketType::StateSync)
            .map(|e| e.payload["reason"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(reasons, vec!["ready_phase_mismatch", "ready_phase_mismatch_resync"]);
    }

    #[test]
    fn game_traffic_before_hello_is_ignored() {
        let mut h = Harness::unauthenticated(Role::Host, Some("secret"));
        h.session.start_match(0).unwrap();
        let vote = Payload::PlayerReady(ReadyPayload {
            player_id: PlayerId::P2,
            phase: ReadyPhase::Placement,
            setup_mines: Some(vec![Coord::new(3, 20)]),
            energy_bid: None,
        });
        h.deliver(&vote, 1, 10);
        assert!(!h.session.is_authenticated());
        let state = h.session.state().unwrap();
        assert!(!state.pvp_ready_state.p2);
        assert!(state.setup_mines().iter().all(|mine| mine.owner != PlayerId::P2));

        // The same vote counts once the guest has proven the password.
        let hello = Payload::Hello(minechess_protocol::HelloPayload {
            role: Role::Guest,
            peer_id: "guest".into(),
            password: Some("secret".into()),
        });
        h.deliver(&hello, 1, 20);
        assert!(h.session.is_authenticated());
        h.deliver(&vote, 1, 30);
        assert!(h.session.state().unwrap().pvp_ready_state.p2);
    }

    #[test]
    fn guest_ignores_match_start_until_accepted() {
        let mut h = Harness::unauthenticated(Role::Guest, Some("pw"));
        let state = GameState::new_match(GameMode::Pvp, &GameConfig::default());
        let start = Payload::StartGame(StartGamePayload {
            mode: GameMode::Pvp,
            initial_state: Some(encode_snapshot(&state).unwrap()),
            allow_dev_tools: None,
        });
        h.deliver(&start, 1, 10);
        assert!(h.session.state().is_none());

        let accepted = Payload::AuthResult(minechess_protocol::AuthResultPayload {
            accepted: true,
            reason: None,
            room_name: None,
        });
        h.deliver(&accepted, 1, 20);
        h.deliver(&start, 1, 30);
        assert_eq!(h.session.state().unwrap().phase, Phase::Placement);
    }

    #[test]
    fn overtaken_snapshot_is_dropped_and_answered() {
        let mut h = Harness::new(Role::Guest);
        h.action_state();
        let behind = GameState::new_match(GameMode::Pvp, &GameConfig::default());
        let sync = Payload::StateSync(StateSyncPayload {
            reason: "ready_retry_sync".into(),
            state: encode_snapshot(&behind).unwrap(),
            allow_dev_tools: Some(false),
        });
        h.deliver(&sync, 1, 10);
        assert_eq!(h.session.state().unwrap().phase, Phase::Action);

        h.session.tick(30);
        let answers: Vec<Envelope> = h
            .wire
            .envelopes()
            .into_iter()
            .filter(|e| e.packet_type == PacketType::StateSync)
            .collect();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].payload["reason"], "stale_snapshot_answer");
        assert_eq!(answers[0].payload["state"]["phase"], "action");
    }

    #[test]
    fn placement_advances_only_when_both_voted() {
        let mut h = Harness::new(Role::Host);
        h.session.start_match(0).unwrap();
        h.session.place_setup_mine(Coord::new(3, 4), 1).unwrap();
        assert_eq!(h.session.ready(None, 2).unwrap(), VoteResult::Recorded);
        assert_eq!(h.session.state().unwrap().phase, Phase::Placement);

        let guest_vote = Payload::PlayerReady(ReadyPayload {
            player_id: PlayerId::P2,
            phase: ReadyPhase::Placement,
            setup_mines: Some(vec![Coord::new(3, 16)]),
            energy_bid: None,
        });
        h.deliver(&guest_vote, 1, 3);
        let state = h.session.state().unwrap();
        assert_eq!(state.phase, Phase::Thinking);
        assert_eq!(state.pvp_ready_state, Default::default());
        let cells: Vec<Coord> = state.setup_mines().iter().map(|m| m.pos).collect();
        assert!(cells.contains(&Coord::new(3, 4)));
        assert!(cells.contains(&Coord::new(3, 16)));
    }

    #[test]
    fn stuck_vote_is_reasserted() {
        let mut h = Harness::new(Role::Guest);
        h.session.start_local_match(GameMode::Pvp);
        h.session.ready(None, 0).unwrap();
        h.wire.clear();
        h.session.tick(1499);
        assert!(h.wire.types().is_empty());
        h.session.tick(1500);
        assert_eq!(h.wire.types(), vec![PacketType::PlayerReady]);

        let mut state = h.session.state().unwrap().clone();
        state.pvp_ready_state.p1 = true;
        h.session.holder.replace(state);
        h.session.tick(3000);
        assert_eq!(h.wire.types(), vec![PacketType::PlayerReady]);
        assert_eq!(h.session.ready_retry.next_deadline(), None);
    }

    #[test]
    fn wrong_room_is_dropped() {
        let mut h = Harness::new(Role::Guest);
        let start = Payload::StartGame(StartGamePayload {
            mode: GameMode::Pvp,
            initial_state: None,
            allow_dev_tools: None,
        });
        let envelope = Envelope::build(&start, "other-room", 1, 0, Seq(1)).unwrap();
        let event = LinkEvent {
            link: h.session.link,
            event: TransportEvent::Message(envelope.encode().unwrap()),
        };
        h.session.handle_link_event(event, 0);
        assert!(h.session.state().is_none());
        // Still acknowledged: dedup and ACK happen before the room check.
        assert_eq!(h.wire.types(), vec![PacketType::Ack]);
    }

    #[test]
    fn duplicate_host_is_fatal() {
        let mut h = Harness::new(Role::Host);
        let hello = Payload::Hello(minechess_protocol::HelloPayload {
            role: Role::Host,
            peer_id: "other".into(),
            password: None,
        });
        h.deliver(&hello, 0, 5);
        assert_eq!(h.session.status(), ConnectionStatus::Error);
        h.session.tick(60_000);
        assert_eq!(h.session.next_deadline(), None);
    }

    #[test]
    fn dropped_link_reconnects_with_backoff() {
        let mut h = Harness::new(Role::Guest);
        let link = h.session.link;
        h.session.handle_link_event(
            LinkEvent {
                link,
                event: TransportEvent::Closed,
            },
            100,
        );
        assert_eq!(h.session.status(), ConnectionStatus::Reconnecting);
        assert_eq!(h.session.next_deadline(), Some(1100));
        h.session.tick(1100);
        h.pump(1100);
        assert_eq!(h.session.status(), ConnectionStatus::Connected);
        assert_ne!(h.session.link, link);
    }

    #[test]
    fn silence_drops_link() {
        let mut h = Harness::new(Role::Guest);
        h.session.tick(5000);
        assert_eq!(h.wire.types(), vec![PacketType::Ping]);
        h.session.tick(15_000);
        assert_eq!(h.session.status(), ConnectionStatus::Reconnecting);
    }
}
