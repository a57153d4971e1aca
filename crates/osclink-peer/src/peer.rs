//! OSC peer
//!
//! A [`Peer`] is one remote OSC endpoint. It owns the socket, a
//! [`Dispatcher`] that receives every decoded packet, and a
//! [`CallCorrelator`] for request/response exchanges. Incoming traffic is
//! read by one background listener thread between
//! [`Peer::start_listening`] and [`Peer::stop_listening`].

use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use osclink_core::{Bundle, Message, Packet};
use osclink_router::{CallCorrelator, Dispatcher, MessageSender, RouterConfig, RouterError};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::codec;
use crate::error::{PeerError, Result};
use crate::framing::{FrameDecoder, Framing};

/// Receive buffer size; one UDP datagram always fits
const RECV_BUFFER: usize = 64 * 1024;

/// Transport used to reach the remote endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMode {
    /// Connect a stream to the remote address
    Tcp,
    /// Bind `bind` for receiving and send datagrams to the remote address
    Udp { bind: Option<SocketAddr> },
}

/// Peer configuration
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub remote: SocketAddr,
    pub mode: PeerMode,
    /// Stream framing; ignored for UDP
    pub framing: Framing,
    /// Upper bound on how long the listener blocks in one read
    pub poll_interval: Duration,
    pub router: RouterConfig,
}

impl PeerConfig {
    pub fn tcp(remote: SocketAddr) -> Self {
        Self {
            remote,
            mode: PeerMode::Tcp,
            framing: Framing::default(),
            poll_interval: Duration::from_millis(10),
            router: RouterConfig::default(),
        }
    }

    pub fn udp(remote: SocketAddr, bind: SocketAddr) -> Self {
        Self {
            mode: PeerMode::Udp { bind: Some(bind) },
            ..Self::tcp(remote)
        }
    }

    pub fn framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }
}

/// Connection lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Connected,
    Disconnected,
    Error(String),
}

type EventHandler = Arc<dyn Fn(&PeerEvent) + Send + Sync>;

enum Transport {
    Tcp(Mutex<TcpStream>),
    Udp(UdpSocket),
}

struct PeerInner {
    config: PeerConfig,
    transport: Transport,
    dispatcher: Dispatcher,
    handlers: Mutex<Vec<EventHandler>>,
    connected: AtomicBool,
    stop: AtomicBool,
    last_error: Mutex<Option<String>>,
}

/// A remote OSC endpoint
pub struct Peer {
    inner: Arc<PeerInner>,
    correlator: CallCorrelator,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Peer {
    /// Open the transport. TCP connects immediately; UDP binds its receive
    /// address.
    pub fn connect(config: PeerConfig) -> Result<Self> {
        let transport = match &config.mode {
            PeerMode::Tcp => {
                let stream = TcpStream::connect(config.remote).map_err(|e| {
                    PeerError::Connection(format!(
                        "could not connect to TCP peer at {}: {}",
                        config.remote, e
                    ))
                })?;
                stream.set_nodelay(true)?;
                Transport::Tcp(Mutex::new(stream))
            }
            PeerMode::Udp { bind } => {
                let bind = bind.ok_or_else(|| {
                    PeerError::Configuration("UDP peers need a receive address".to_string())
                })?;
                let socket = UdpSocket::bind(bind).map_err(|e| {
                    PeerError::Connection(format!("could not bind UDP peer at {}: {}", bind, e))
                })?;
                Transport::Udp(socket)
            }
        };

        let dispatcher = Dispatcher::new(config.router.clone());
        let inner = Arc::new(PeerInner {
            config,
            transport,
            dispatcher,
            handlers: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            last_error: Mutex::new(None),
        });
        let correlator = CallCorrelator::new(&inner.dispatcher, inner.clone());
        inner.set_connected(true);
        info!("peer {} ready ({:?})", inner.config.remote, inner.config.mode);

        Ok(Self {
            inner,
            correlator,
            listener: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PeerConfig {
        &self.inner.config
    }

    /// Dispatcher fed by the listener
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Request/response correlation over this peer
    pub fn call_handler(&self) -> &CallCorrelator {
        &self.correlator
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Most recent error reported through [`PeerEvent::Error`]
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /// Local socket address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(match &self.inner.transport {
            Transport::Tcp(stream) => stream.lock().local_addr()?,
            Transport::Udp(socket) => socket.local_addr()?,
        })
    }

    /// Subscribe to connection events. A subscriber added while connected
    /// sees [`PeerEvent::Connected`] right away.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&PeerEvent) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        self.inner.handlers.lock().push(handler.clone());
        if self.is_connected() {
            handler(&PeerEvent::Connected);
        }
    }

    pub fn send_message(&self, message: &Message) -> Result<()> {
        self.inner.send(&Packet::Message(message.clone()))
    }

    pub fn send_bundle(&self, bundle: &Bundle) -> Result<()> {
        self.inner.send(&Packet::Bundle(bundle.clone()))
    }

    pub fn send(&self, packet: &Packet) -> Result<()> {
        self.inner.send(packet)
    }

    /// Start the bundle scheduler and the background listener
    pub fn start_listening(&self) -> Result<()> {
        let mut listener = self.listener.lock();
        if let Some(handle) = listener.take() {
            if !handle.is_finished() {
                *listener = Some(handle);
                return Ok(());
            }
            let _ = handle.join();
        }
        if !self.is_connected() {
            return Err(PeerError::Connection(format!(
                "peer {} is disconnected",
                self.inner.config.remote
            )));
        }

        self.inner.dispatcher.start_scheduler()?;
        self.inner.stop.store(false, Ordering::SeqCst);

        let reader = self.inner.reader()?;
        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name("osclink-listener".to_string())
            .spawn(move || inner.listen(reader))
            .map_err(|e| PeerError::Listener(format!("could not spawn listener: {}", e)))?;

        *listener = Some(handle);
        info!("listening to peer {}", self.inner.config.remote);
        Ok(())
    }

    /// Stop the listener, report the disconnect and stop the scheduler
    pub fn stop_listening(&self) {
        self.halt();
        if let Transport::Tcp(stream) = &self.inner.transport {
            let _ = stream.lock().shutdown(Shutdown::Both);
        }
        self.inner.set_connected(false);
        self.inner.dispatcher.stop_scheduler();
        info!("stopped listening to peer {}", self.inner.config.remote);
    }

    fn halt(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.listener.lock().take() {
            if handle.join().is_err() {
                error!("listener thread for {} panicked", self.inner.config.remote);
            }
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.halt();
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("remote", &self.inner.config.remote)
            .field("mode", &self.inner.config.mode)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl MessageSender for PeerInner {
    fn send_message(&self, message: &Message) -> osclink_router::Result<()> {
        self.send(&Packet::Message(message.clone()))
            .map_err(RouterError::from)
    }
}

/// Read half handed to the listener thread
enum Reader {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl PeerInner {
    fn send(&self, packet: &Packet) -> Result<()> {
        let bytes = codec::encode(packet)?;
        let sent = match &self.transport {
            Transport::Tcp(stream) => {
                let frame = self.config.framing.encode(&bytes)?;
                stream.lock().write_all(&frame)
            }
            Transport::Udp(socket) => socket.send_to(&bytes, self.config.remote).map(|_| ()),
        };

        match sent {
            Ok(()) => {
                trace!("sent {} bytes to {}", bytes.len(), self.config.remote);
                Ok(())
            }
            Err(e) => {
                let error = PeerError::Connection(format!(
                    "failed to send to {}: {}",
                    self.config.remote, e
                ));
                self.report(&error);
                Err(error)
            }
        }
    }

    fn reader(&self) -> Result<Reader> {
        let timeout = Some(self.config.poll_interval);
        Ok(match &self.transport {
            Transport::Tcp(stream) => {
                let reader = stream.lock().try_clone()?;
                reader.set_read_timeout(timeout)?;
                Reader::Tcp(reader)
            }
            Transport::Udp(socket) => {
                let reader = socket.try_clone()?;
                reader.set_read_timeout(timeout)?;
                Reader::Udp(reader)
            }
        })
    }

    fn listen(&self, reader: Reader) {
        let result = match reader {
            Reader::Tcp(stream) => self.listen_tcp(stream),
            Reader::Udp(socket) => self.listen_udp(socket),
        };
        if let Err(e) = result {
            let error = PeerError::Listener(format!("{} ({})", e, self.config.remote));
            self.report(&error);
            self.set_connected(false);
        }
        debug!("listener for {} exited", self.config.remote);
    }

    fn listen_tcp(&self, mut stream: TcpStream) -> Result<()> {
        let mut decoder = FrameDecoder::new(self.config.framing);
        let mut buf = vec![0u8; RECV_BUFFER];

        while !self.stop.load(Ordering::SeqCst) {
            let len = match stream.read(&mut buf) {
                Ok(0) => {
                    info!("peer {} closed the connection", self.config.remote);
                    self.set_connected(false);
                    return Ok(());
                }
                Ok(len) => len,
                Err(e) if is_poll_timeout(&e) => continue,
                Err(e) => return Err(e.into()),
            };

            for frame in decoder.push(&buf[..len])? {
                self.receive(&frame);
            }
        }
        Ok(())
    }

    fn listen_udp(&self, socket: UdpSocket) -> Result<()> {
        let mut buf = vec![0u8; RECV_BUFFER];

        while !self.stop.load(Ordering::SeqCst) {
            let (len, from) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if is_poll_timeout(&e) => continue,
                Err(e) => return Err(e.into()),
            };

            if !is_from_remote(self.config.remote.ip(), from) {
                trace!("ignoring datagram from {}", from);
                continue;
            }
            self.receive(&buf[..len]);
        }
        Ok(())
    }

    fn receive(&self, bytes: &[u8]) {
        match codec::decode(bytes) {
            Ok(packet) => {
                if let Err(e) = self.dispatcher.dispatch(packet) {
                    warn!("dispatch from {} failed: {}", self.config.remote, e);
                }
            }
            Err(e) => {
                debug!("dropping undecodable packet from {}: {}", self.config.remote, e);
                self.report(&e);
            }
        }
    }

    fn report(&self, error: &PeerError) {
        let text = error.to_string();
        *self.last_error.lock() = Some(text.clone());
        self.emit(&PeerEvent::Error(text));
    }

    /// Emit `Connected`/`Disconnected` on a state change only
    fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) == connected {
            return;
        }
        let event = if connected {
            PeerEvent::Connected
        } else {
            PeerEvent::Disconnected
        };
        self.emit(&event);
    }

    fn emit(&self, event: &PeerEvent) {
        let handlers: Vec<EventHandler> = self.handlers.lock().clone();
        for handler in handlers {
            handler(event);
        }
    }
}

fn is_poll_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

/// Datagrams are accepted from the remote peer's host only
fn is_from_remote(remote: IpAddr, from: SocketAddr) -> bool {
    if remote.is_unspecified() {
        return true;
    }
    remote == from.ip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_source_filter() {
        let remote: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(is_from_remote(remote, "127.0.0.1:9000".parse().unwrap()));
        assert!(!is_from_remote(remote, "10.0.0.7:9000".parse().unwrap()));
        assert!(is_from_remote(
            "0.0.0.0".parse().unwrap(),
            "10.0.0.7:9000".parse().unwrap()
        ));
    }

    #[test]
    fn test_udp_requires_bind_address() {
        let config = PeerConfig {
            mode: PeerMode::Udp { bind: None },
            ..PeerConfig::tcp("127.0.0.1:9000".parse().unwrap())
        };
        assert!(matches!(
            Peer::connect(config),
            Err(PeerError::Configuration(_))
        ));
    }

    #[test]
    fn test_poll_timeouts_are_not_errors() {
        assert!(is_poll_timeout(&std::io::Error::from(ErrorKind::WouldBlock)));
        assert!(!is_poll_timeout(&std::io::Error::from(ErrorKind::ConnectionReset)));
    }
}
