// Transport abstraction.
//
// The session never touches sockets. It holds one `Box<dyn Transport>` for
// the current link and learns about link lifecycle through `LinkEvent`s
// pushed into an `EventSink`. A `Connector` opens a fresh link on demand,
// which is how reconnects work: the session asks for a new link, tags it
// with a new `LinkId`, and ignores late events from any older one.
//
// Implementations: `tcp::TcpConnector` (length-prefixed frames over TCP)
// and the in-memory link in `multiplayer_tests`.
//
// **Critical constraint: one live link.** Opening a link replaces the
// previous one. Events carry their `LinkId` so a slow reader thread from a
// replaced link can never feed stale messages into the session.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};

use crate::error::TransportError;

/// Sends opaque text to the remote peer.
pub trait Transport: Send {
    fn send(&mut self, text: &str) -> Result<(), TransportError>;
    fn is_open(&self) -> bool;
    /// Close the link. Idempotent.
    fn close(&mut self);
}

/// Opens links. Called on connect and on every reconnect attempt.
pub trait Connector: Send {
    fn connect(&mut self, link: LinkId, sink: EventSink) -> Result<Box<dyn Transport>, TransportError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed,
    Error(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkEvent {
    pub link: LinkId,
    pub event: TransportEvent,
}

/// Where transports report lifecycle and inbound messages.
#[derive(Clone)]
pub struct EventSink(Arc<dyn Fn(LinkEvent) + Send + Sync>);

impl EventSink {
    pub fn new(deliver: impl Fn(LinkEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(deliver))
    }

    /// A sink backed by a plain channel.
    pub fn channel() -> (EventSink, Receiver<LinkEvent>) {
        let (tx, rx) = mpsc::channel();
        let sink = EventSink::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    pub fn emit(&self, link: LinkId, event: TransportEvent) {
        (self.0)(LinkEvent { link, event });
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_tags_events() {
        let (sink, rx) = EventSink::channel();
        sink.emit(LinkId(3), TransportEvent::Message("hi".into()));
        sink.emit(LinkId(3), TransportEvent::Closed);
        let first = rx.recv().unwrap();
        assert_eq!(first.link, LinkId(3));
        assert_eq!(first.event, TransportEvent::Message("hi".into()));
        assert_eq!(rx.recv().unwrap().event, TransportEvent::Closed);
    }
}
