// Threaded runner: one session, one thread, one inbox.
//
// `spawn_peer` moves a `Session` onto its own thread. Transport events and
// local commands share a single `mpsc` inbox, so they are handled strictly
// one at a time in arrival order. Between messages the loop sleeps in
// `recv_timeout` until the session's next timer deadline, then calls
// `tick`. Session events go out on a second channel for the embedding
// application (UI, CLI, test) to drain.
//
// The clock is milliseconds since the runner started. The session never
// reads it directly; every entry point receives `now`.
//
// See also: `session.rs` for what each command does, `tcp.rs` for the
// transport threads that feed the inbox.
//
// **Critical constraint: the session is never touched from another
// thread.** Queries (`PeerHandle::snapshot`) go through the inbox like
// everything else and are answered from inside the loop.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use minechess_protocol::{Coord, GameMode};
use minechess_sim::{GameAction, GameConfig, GameState};

use crate::config::{PeerConfig, SessionSettings};
use crate::session::{Session, SessionEvent};
use crate::transport::{Connector, EventSink, LinkEvent};

/// Upper bound on one `recv_timeout` wait when no timer is pending.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Local requests to the session thread.
#[derive(Debug)]
pub enum Command {
    Connect,
    Disconnect,
    StartMatch,
    StartLocalMatch(GameMode),
    LeaveMatch,
    Perform(GameAction),
    PlaceSetupMine(Coord),
    Ready { bid: Option<u32> },
    Snapshot(Sender<Option<GameState>>),
    Shutdown,
}

enum Inbox {
    Link(LinkEvent),
    Command(Command),
}

/// Owner's side of a running peer. Dropping it stops the thread.
pub struct PeerHandle {
    inbox: Sender<Inbox>,
    events: Receiver<SessionEvent>,
    thread: Option<JoinHandle<()>>,
}

impl PeerHandle {
    /// Queue a command. Returns false once the session thread has exited.
    pub fn send(&self, command: Command) -> bool {
        self.inbox.send(Inbox::Command(command)).is_ok()
    }

    pub fn perform(&self, action: GameAction) -> bool {
        self.send(Command::Perform(action))
    }

    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// Copy of the session's current state, waiting up to `timeout`.
    pub fn snapshot(&self, timeout: Duration) -> Option<GameState> {
        let (reply, answer) = mpsc::channel();
        if !self.send(Command::Snapshot(reply)) {
            return None;
        }
        answer.recv_timeout(timeout).ok().flatten()
    }

    /// Shut the session down and wait for the thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.inbox.send(Inbox::Command(Command::Shutdown));
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Build a session around `connector`, start its thread, and connect.
pub fn spawn_peer(
    settings: SessionSettings,
    cfg: PeerConfig,
    game_cfg: GameConfig,
    connector: Box<dyn Connector>,
) -> std::io::Result<PeerHandle> {
    let (inbox_tx, inbox_rx) = mpsc::channel();
    let (event_tx, event_rx) = mpsc::channel();
    let link_tx = inbox_tx.clone();
    let sink = EventSink::new(move |event| {
        let _ = link_tx.send(Inbox::Link(event));
    });
    let name = format!("peer-{}", settings.peer_id);
    let session = Session::new(settings, cfg, game_cfg, connector, sink);
    let thread = thread::Builder::new()
        .name(name)
        .spawn(move || run_loop(session, inbox_rx, event_tx))?;
    let handle = PeerHandle {
        inbox: inbox_tx,
        events: event_rx,
        thread: Some(thread),
    };
    handle.send(Command::Connect);
    Ok(handle)
}

fn run_loop(mut session: Session, inbox: Receiver<Inbox>, events: Sender<SessionEvent>) {
    let start = Instant::now();
    let clock = || u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    loop {
        let now = clock();
        let wait = session
            .next_deadline()
            .map_or(IDLE_WAIT, |at| Duration::from_millis(at.saturating_sub(now)))
            .min(IDLE_WAIT);

        match inbox.recv_timeout(wait) {
            Ok(Inbox::Link(event)) => session.handle_link_event(event, clock()),
            Ok(Inbox::Command(Command::Shutdown)) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Inbox::Command(command)) => run_command(&mut session, command, clock()),
            Err(RecvTimeoutError::Timeout) => {}
        }

        session.tick(clock());
        for event in session.take_events() {
            let _ = events.send(event);
        }
    }

    session.disconnect(clock());
    for event in session.take_events() {
        let _ = events.send(event);
    }
    log::debug!("session thread exiting");
}

fn run_command(session: &mut Session, command: Command, now: u64) {
    let result = match command {
        Command::Connect => {
            session.connect(now);
            Ok(())
        }
        Command::Disconnect => {
            session.disconnect(now);
            Ok(())
        }
        Command::StartMatch => session.start_match(now),
        Command::StartLocalMatch(mode) => {
            session.start_local_match(mode);
            Ok(())
        }
        Command::LeaveMatch => session.leave_match(now),
        Command::Perform(action) => session.perform(action, now).map(|_| ()),
        Command::PlaceSetupMine(cell) => session.place_setup_mine(cell, now).map(|_| ()),
        Command::Ready { bid } => session.ready(bid, now).map(|_| ()),
        Command::Snapshot(reply) => {
            let _ = reply.send(session.state().cloned());
            Ok(())
        }
        // Handled by the loop.
        Command::Shutdown => Ok(()),
    };
    if let Err(err) = result {
        log::warn!("command failed: {err}");
        session.push_event(SessionEvent::Error(err.to_string()));
    }
}
