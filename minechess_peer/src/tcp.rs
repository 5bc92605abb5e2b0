// TCP transport: length-prefixed frames over a plain socket.
//
// `TcpConnector` opens one `TcpLink` per `connect` call. The socket work
// happens on a dedicated reader thread per link, following the usual
// one-reader-thread-per-connection shape:
//
// 1. Dial the host (guest side) or accept one peer on the shared listener
//    (host side). Either may block; the session is not waiting on it. The
//    listener is polled, and a link closed while still waiting gives up
//    without touching the next incoming guest.
// 2. Publish the stream to the link's writer slot, emit `Opened`.
// 3. Read frames with `read_frame` and emit each as `Message`.
// 4. On EOF or error emit `Closed` / `Error` and exit.
//
// Writes happen on the session thread through the writer slot. `close`
// shuts the socket down, which also unblocks the reader.
//
// See also: `minechess_protocol::framing` for the frame format,
// `transport.rs` for the traits.
//
// **Critical constraint: a closed link stays silent.** Once `close` has
// run, the reader thread emits nothing further, so a replaced link cannot
// surface a spurious `Closed` that would trigger a reconnect.

use std::io::BufReader;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use minechess_protocol::{read_frame, write_frame};

use crate::error::TransportError;
use crate::transport::{Connector, EventSink, LinkId, Transport, TransportEvent};

const ACCEPT_POLL: Duration = Duration::from_millis(20);

#[derive(Default)]
struct Slot {
    stream: Option<TcpStream>,
    closed: bool,
}

pub struct TcpLink {
    slot: Arc<Mutex<Slot>>,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    // A panicked writer leaves the slot usable; the stream is the only state.
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Transport for TcpLink {
    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let mut slot = lock(&self.slot);
        if slot.closed {
            return Err(TransportError::NotOpen);
        }
        let stream = slot.stream.as_mut().ok_or(TransportError::NotOpen)?;
        write_frame(stream, text)?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        let slot = lock(&self.slot);
        !slot.closed && slot.stream.is_some()
    }

    fn close(&mut self) {
        let mut slot = lock(&self.slot);
        slot.closed = true;
        if let Some(stream) = slot.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

#[derive(Clone)]
enum Endpoint {
    Dial(SocketAddr),
    Listen(Arc<TcpListener>),
}

impl Endpoint {
    /// `Ok(None)` when the link was closed before a guest arrived.
    fn open(&self, slot: &Mutex<Slot>) -> std::io::Result<Option<TcpStream>> {
        match self {
            Endpoint::Dial(addr) => TcpStream::connect(addr).map(Some),
            Endpoint::Listen(listener) => {
                listener.set_nonblocking(true)?;
                loop {
                    if lock(slot).closed {
                        return Ok(None);
                    }
                    match listener.accept() {
                        Ok((stream, _)) => {
                            stream.set_nonblocking(false)?;
                            return Ok(Some(stream));
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(ACCEPT_POLL);
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }
}

pub struct TcpConnector {
    endpoint: Endpoint,
}

impl TcpConnector {
    /// Guest side: every link dials `addr`.
    pub fn dial(addr: SocketAddr) -> Self {
        Self {
            endpoint: Endpoint::Dial(addr),
        }
    }

    /// Host side: every link accepts the next connection on `listener`.
    pub fn listen(listener: TcpListener) -> Self {
        Self {
            endpoint: Endpoint::Listen(Arc::new(listener)),
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&mut self, link: LinkId, sink: EventSink) -> Result<Box<dyn Transport>, TransportError> {
        let slot = Arc::new(Mutex::new(Slot::default()));
        let endpoint = self.endpoint.clone();
        let reader_slot = Arc::clone(&slot);
        thread::Builder::new()
            .name(format!("tcp-{link}"))
            .spawn(move || run_link(&endpoint, link, &sink, &reader_slot))?;
        Ok(Box::new(TcpLink { slot }))
    }
}

/// Emit `event` unless the link was closed locally.
fn emit_if_live(slot: &Mutex<Slot>, sink: &EventSink, link: LinkId, event: TransportEvent) {
    if !lock(slot).closed {
        sink.emit(link, event);
    }
}

fn run_link(endpoint: &Endpoint, link: LinkId, sink: &EventSink, slot: &Mutex<Slot>) {
    let stream = match endpoint.open(slot) {
        Ok(Some(stream)) => stream,
        Ok(None) => {
            log::debug!("{link} closed before a guest connected");
            return;
        }
        Err(err) => {
            emit_if_live(slot, sink, link, TransportEvent::Error(err.to_string()));
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    let reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(err) => {
            emit_if_live(slot, sink, link, TransportEvent::Error(err.to_string()));
            return;
        }
    };
    {
        let mut guard = lock(slot);
        if guard.closed {
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
        guard.stream = Some(stream);
    }
    log::info!("{link} open");
    sink.emit(link, TransportEvent::Opened);

    let mut reader = BufReader::new(reader);
    loop {
        match read_frame(&mut reader) {
            Ok(text) => emit_if_live(slot, sink, link, TransportEvent::Message(text)),
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                emit_if_live(slot, sink, link, TransportEvent::Closed);
                break;
            }
            Err(err) => {
                emit_if_live(slot, sink, link, TransportEvent::Error(err.to_string()));
                break;
            }
        }
    }
    let mut guard = lock(slot);
    guard.closed = true;
    guard.stream = None;
    log::debug!("{link} reader exiting");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn frames_cross_the_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (host_sink, host_rx) = EventSink::channel();
        let (guest_sink, guest_rx) = EventSink::channel();

        let mut host = TcpConnector::listen(listener)
            .connect(LinkId(1), host_sink)
            .unwrap();
        let mut guest = TcpConnector::dial(addr).connect(LinkId(1), guest_sink).unwrap();

        let wait = Duration::from_secs(5);
        assert_eq!(guest_rx.recv_timeout(wait).unwrap().event, TransportEvent::Opened);
        assert_eq!(host_rx.recv_timeout(wait).unwrap().event, TransportEvent::Opened);

        guest.send("hello").unwrap();
        let got = host_rx.recv_timeout(wait).unwrap();
        assert_eq!(got.event, TransportEvent::Message("hello".into()));

        guest.close();
        assert!(!guest.is_open());
        assert!(guest.send("late").is_err());
        assert_eq!(host_rx.recv_timeout(wait).unwrap().event, TransportEvent::Closed);
        // The side that closed stays silent.
        assert!(guest_rx.recv_timeout(Duration::from_millis(200)).is_err());
        host.close();
    }

    #[test]
    fn replaced_listener_link_leaves_the_next_guest_alone() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut connector = TcpConnector::listen(listener);
        let (host_sink, host_rx) = EventSink::channel();

        let mut stale = connector.connect(LinkId(1), host_sink.clone()).unwrap();
        stale.close();
        // Let the first reader notice before anyone dials.
        thread::sleep(ACCEPT_POLL * 5);
        let mut fresh = connector.connect(LinkId(2), host_sink).unwrap();

        let (guest_sink, guest_rx) = EventSink::channel();
        let mut guest = TcpConnector::dial(addr).connect(LinkId(1), guest_sink).unwrap();

        let wait = Duration::from_secs(5);
        assert_eq!(guest_rx.recv_timeout(wait).unwrap().event, TransportEvent::Opened);
        let opened = host_rx.recv_timeout(wait).unwrap();
        assert_eq!(opened.link, LinkId(2));
        assert_eq!(opened.event, TransportEvent::Opened);

        guest.send("still here").unwrap();
        let got = host_rx.recv_timeout(wait).unwrap();
        assert_eq!(got.link, LinkId(2));
        assert_eq!(got.event, TransportEvent::Message("still here".into()));
        assert!(fresh.is_open());

        guest.close();
        fresh.close();
    }
}
