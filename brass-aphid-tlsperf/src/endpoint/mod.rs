//! One side of one secured connection.
//!
//! An Endpoint owns its transport socket(s) and its secure-session, and is a
//! poll-driven state machine:
//!
//! ```text
//! Created ──► Listening ──────────► HandshakeInProgress ──► Established
//!    │        (server)                       ▲
//!    └──────► AwaitingConnect ───────────────┘
//!             (client, stream transport)
//!
//! any non-terminal state ──► Closed
//! ```
//!
//! Progress is reported through [`EndpointEvent`]s returned from
//! [`Endpoint::poll_event`]. After an `Error` event the Endpoint is `Closed`
//! and never produces another event.
//!
//! Client and server are separate types. Only [`ClientEndpoint`] can be
//! started, and only [`ServerEndpoint`] accepts.

mod datagram;
mod session;

use std::{
    future::{poll_fn, Future},
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    pin::Pin,
    rc::Rc,
    task::{ready, Context, Poll},
};

use tokio::{
    io::ReadBuf,
    net::{TcpListener, TcpSocket, TcpStream, UdpSocket},
};

use crate::{
    context::{SecureContext, Transport},
    error::{Error, TransportOp},
};
use datagram::{ConnectedDatagram, DemuxedDatagram, InboundQueue, MAX_DATAGRAM};
use session::Session;

/// Ephemeral port on the IPv4 loopback.
pub const LOOPBACK: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);

const LISTEN_BACKLOG: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum EndpointState {
    Created,
    Listening,
    AwaitingConnect,
    HandshakeInProgress,
    Established,
    Closed,
}

#[derive(Debug)]
pub enum EndpointEvent {
    /// The secure-session finished negotiating.
    Established {
        role: Role,
        cipher: String,
        protocol_version: &'static str,
    },
    /// The transport or the handshake failed. Delivered at most once.
    Error { role: Role, error: Error },
}

impl EndpointEvent {
    pub fn role(&self) -> Role {
        match self {
            EndpointEvent::Established { role, .. } | EndpointEvent::Error { role, .. } => *role,
        }
    }
}

/// The capabilities shared by both sides of a connection.
pub trait Endpoint {
    fn role(&self) -> Role;

    /// The bound address. For a stream client this is the loopback wildcard
    /// until the connection is made.
    fn local_addr(&self) -> SocketAddr;

    fn state(&self) -> EndpointState;

    fn is_established(&self) -> bool {
        self.state() == EndpointState::Established
    }

    /// Drive the Endpoint. Returns `Ready` whenever the Endpoint has something
    /// to report; the task is woken when more progress is possible.
    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<EndpointEvent>;

    /// Release the secure-session and the connection. Safe to call in any
    /// state, any number of times.
    fn teardown(&mut self);
}

/// Wait for the next event from a single Endpoint.
pub async fn next_event<E: Endpoint>(endpoint: &mut E) -> EndpointEvent {
    poll_fn(|cx| endpoint.poll_event(cx)).await
}

/// The state common to both roles. The session lives here so that it is
/// always dropped before the role-specific transport.
struct Core<'ctx> {
    context: &'ctx SecureContext,
    role: Role,
    verbose: bool,
    local_addr: SocketAddr,
    state: EndpointState,
    session: Option<Session>,
}

impl<'ctx> Core<'ctx> {
    fn new(context: &'ctx SecureContext, role: Role, verbose: bool, local_addr: SocketAddr) -> Self {
        Self {
            context,
            role,
            verbose,
            local_addr,
            state: EndpointState::Created,
            session: None,
        }
    }

    fn transition(&mut self, state: EndpointState) {
        tracing::debug!("[{}] {} -> {}", self.role, self.state, state);
        self.state = state;
    }

    fn begin_handshake(&mut self, session: Session) {
        self.session = Some(session);
        self.transition(EndpointState::HandshakeInProgress);
    }

    /// Drive the secure-session, if there is one.
    fn poll_session(&mut self, cx: &mut Context<'_>) -> Poll<EndpointEvent> {
        let Some(session) = self.session.as_mut() else {
            return Poll::Pending;
        };
        match self.state {
            EndpointState::HandshakeInProgress => {
                match ready!(session.poll_handshake(self.role, cx)) {
                    Ok(()) => Poll::Ready(self.establish()),
                    Err(error) => Poll::Ready(self.fail(error)),
                }
            }
            EndpointState::Established => {
                let error = ready!(session.poll_failure(cx));
                Poll::Ready(self.fail(error))
            }
            _ => Poll::Pending,
        }
    }

    fn establish(&mut self) -> EndpointEvent {
        let (cipher, version) = match &self.session {
            Some(session) => (session.cipher_name(), session.protocol_version()),
            None => ("(none)".to_string(), "unknown"),
        };
        self.transition(EndpointState::Established);

        if self.verbose {
            println!(
                "[ {} ] {} established, cipher is {} ({})",
                self.role,
                self.context.transport(),
                cipher,
                version
            );
        }

        EndpointEvent::Established {
            role: self.role,
            cipher,
            protocol_version: version,
        }
    }

    fn fail(&mut self, error: Error) -> EndpointEvent {
        tracing::debug!("[{}] closing after error: {error}", self.role);
        self.close();
        EndpointEvent::Error {
            role: self.role,
            error,
        }
    }

    fn close(&mut self) {
        self.session = None;
        if self.state != EndpointState::Closed {
            self.transition(EndpointState::Closed);
        }
    }
}

fn set_nodelay(tcp: &TcpStream) {
    if let Err(e) = tcp.set_nodelay(true) {
        tracing::warn!("unable to set TCP_NODELAY: {e}");
    }
}

fn bind_udp(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = std::net::UdpSocket::bind(addr)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

////////////////////////////////////////////////////////////////////////////////
/////////////////////////////////// server /////////////////////////////////////
////////////////////////////////////////////////////////////////////////////////

enum ServerTransport {
    Stream(TcpListener),
    Datagram {
        socket: Rc<UdpSocket>,
        /// the peer owning the active session
        peer: Option<SocketAddr>,
        inbound: InboundQueue,
        scratch: Box<[u8]>,
    },
}

/// The accepting side. Bound on construction, waits for exactly one peer.
pub struct ServerEndpoint<'ctx> {
    core: Core<'ctx>,
    transport: ServerTransport,
}

impl<'ctx> ServerEndpoint<'ctx> {
    /// Bind to an ephemeral loopback port.
    pub fn new(context: &'ctx SecureContext, verbose: bool) -> Result<Self, Error> {
        Self::bind(context, LOOPBACK, verbose)
    }

    pub fn bind(context: &'ctx SecureContext, addr: SocketAddr, verbose: bool) -> Result<Self, Error> {
        let (transport, local_addr) = match context.transport() {
            Transport::Stream => {
                let socket = match addr {
                    SocketAddr::V4(_) => TcpSocket::new_v4(),
                    SocketAddr::V6(_) => TcpSocket::new_v6(),
                }
                .map_err(|e| Error::transport(TransportOp::Bind, e))?;
                socket
                    .bind(addr)
                    .map_err(|e| Error::transport(TransportOp::Bind, e))?;
                let listener = socket
                    .listen(LISTEN_BACKLOG)
                    .map_err(|e| Error::transport(TransportOp::Listen, e))?;
                let local_addr = listener
                    .local_addr()
                    .map_err(|e| Error::transport(TransportOp::Listen, e))?;
                (ServerTransport::Stream(listener), local_addr)
            }
            Transport::Datagram => {
                let socket = bind_udp(addr)
                    .and_then(UdpSocket::from_std)
                    .map_err(|e| Error::transport(TransportOp::Bind, e))?;
                let local_addr = socket
                    .local_addr()
                    .map_err(|e| Error::transport(TransportOp::Bind, e))?;
                let transport = ServerTransport::Datagram {
                    socket: Rc::new(socket),
                    peer: None,
                    inbound: Default::default(),
                    scratch: vec![0; MAX_DATAGRAM].into_boxed_slice(),
                };
                (transport, local_addr)
            }
        };

        let mut core = Core::new(context, Role::Server, verbose, local_addr);
        core.transition(EndpointState::Listening);
        tracing::debug!("server listening on {local_addr}");
        Ok(Self { core, transport })
    }

    /// The address a client should target. A wildcard bind is reached
    /// through the loopback of the same family.
    pub fn connect_addr(&self) -> SocketAddr {
        let mut addr = self.core.local_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr {
                SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        addr
    }
}

/// Read every queued datagram off the server socket and route it.
///
/// The first datagram from an unknown peer is the handshake indication and
/// creates the session. While a session is active, datagrams from any other
/// peer are a protocol violation: there is no queueing of concurrent
/// handshakes.
fn drain_datagrams(
    core: &mut Core<'_>,
    socket: &Rc<UdpSocket>,
    peer: &mut Option<SocketAddr>,
    inbound: &InboundQueue,
    scratch: &mut [u8],
    cx: &mut Context<'_>,
) -> Result<(), Error> {
    loop {
        let mut buf = ReadBuf::new(scratch);
        let from = match socket.poll_recv_from(cx, &mut buf) {
            Poll::Pending => return Ok(()),
            Poll::Ready(Ok(from)) => from,
            Poll::Ready(Err(e)) => return Err(Error::transport(TransportOp::Exchange, e)),
        };
        let datagram = buf.filled().to_vec();
        tracing::trace!("received {} byte datagram from {from}", datagram.len());

        match *peer {
            Some(active) if active == from => inbound.borrow_mut().push_back(datagram),
            Some(active) => {
                tracing::debug!("rejecting handshake from {from}, session with {active} is active");
                return Err(Error::Protocol("handshake attempt on a busy datagram server"));
            }
            None => {
                tracing::debug!("incoming DTLS handshake from {from}");
                *peer = Some(from);
                inbound.borrow_mut().push_back(datagram);
                let io = DemuxedDatagram::new(socket.clone(), from, inbound.clone());
                let session = Session::demuxed_datagram(core.context, io)?;
                core.begin_handshake(session);
            }
        }
    }
}

impl Endpoint for ServerEndpoint<'_> {
    fn role(&self) -> Role {
        Role::Server
    }

    fn local_addr(&self) -> SocketAddr {
        self.core.local_addr
    }

    fn state(&self) -> EndpointState {
        self.core.state
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<EndpointEvent> {
        if self.core.state == EndpointState::Closed {
            return Poll::Pending;
        }

        match &mut self.transport {
            ServerTransport::Stream(listener) => {
                if self.core.state == EndpointState::Listening {
                    let tcp = match ready!(listener.poll_accept(cx)) {
                        Ok((tcp, peer)) => {
                            tracing::debug!("accepted TCP connection from {peer}");
                            tcp
                        }
                        Err(e) => {
                            return Poll::Ready(
                                self.core.fail(Error::transport(TransportOp::Accept, e)),
                            )
                        }
                    };
                    set_nodelay(&tcp);
                    match Session::stream(self.core.context, tcp) {
                        Ok(session) => self.core.begin_handshake(session),
                        Err(error) => return Poll::Ready(self.core.fail(error)),
                    }
                }
            }
            ServerTransport::Datagram {
                socket,
                peer,
                inbound,
                scratch,
            } => {
                if let Err(error) = drain_datagrams(&mut self.core, socket, peer, inbound, scratch, cx) {
                    return Poll::Ready(self.core.fail(error));
                }
            }
        }

        self.core.poll_session(cx)
    }

    fn teardown(&mut self) {
        self.core.close();
    }
}

impl Drop for ServerEndpoint<'_> {
    fn drop(&mut self) {
        // session before socket
        self.teardown();
    }
}

////////////////////////////////////////////////////////////////////////////////
/////////////////////////////////// client /////////////////////////////////////
////////////////////////////////////////////////////////////////////////////////

type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>>>>;

enum ClientTransport {
    /// the TCP connection is only created by `start`
    Stream { connecting: Option<ConnectFuture> },
    /// bound on construction, consumed by `start`
    Datagram { socket: Option<std::net::UdpSocket> },
}

/// The initiating side. Performs one connection and handshake per `start`.
pub struct ClientEndpoint<'ctx> {
    core: Core<'ctx>,
    transport: ClientTransport,
}

impl<'ctx> ClientEndpoint<'ctx> {
    pub fn new(context: &'ctx SecureContext, verbose: bool) -> Result<Self, Error> {
        Self::bind(context, LOOPBACK, verbose)
    }

    /// `local` is only bound eagerly for datagram transport; a stream client
    /// lets the connect pick its source address.
    pub fn bind(context: &'ctx SecureContext, local: SocketAddr, verbose: bool) -> Result<Self, Error> {
        let (transport, local_addr) = match context.transport() {
            Transport::Stream => (ClientTransport::Stream { connecting: None }, local),
            Transport::Datagram => {
                let socket = bind_udp(local).map_err(|e| Error::transport(TransportOp::Bind, e))?;
                let local_addr = socket
                    .local_addr()
                    .map_err(|e| Error::transport(TransportOp::Bind, e))?;
                (
                    ClientTransport::Datagram {
                        socket: Some(socket),
                    },
                    local_addr,
                )
            }
        };
        Ok(Self {
            core: Core::new(context, Role::Client, verbose, local_addr),
            transport,
        })
    }

    /// Begin connecting to `target`. Returns once the attempt is under way;
    /// completion is reported through [`Endpoint::poll_event`].
    pub fn start(&mut self, target: SocketAddr) -> Result<(), Error> {
        if self.core.state != EndpointState::Created {
            return Err(Error::Protocol("client endpoint was already started"));
        }

        let result = self.initiate(target);
        if result.is_err() {
            self.core.close();
        }
        result
    }

    fn initiate(&mut self, target: SocketAddr) -> Result<(), Error> {
        match &mut self.transport {
            ClientTransport::Stream { connecting } => {
                tracing::debug!("connecting to {target}");
                *connecting = Some(Box::pin(TcpStream::connect(target)));
                self.core.transition(EndpointState::AwaitingConnect);
            }
            ClientTransport::Datagram { socket } => {
                let socket = socket
                    .take()
                    .ok_or(Error::Protocol("client endpoint was already started"))?;
                socket
                    .connect(target)
                    .map_err(|e| Error::transport(TransportOp::Connect, e))?;
                let socket =
                    UdpSocket::from_std(socket).map_err(|e| Error::transport(TransportOp::Connect, e))?;
                tracing::debug!("starting DTLS handshake with {target}");
                let session =
                    Session::connected_datagram(self.core.context, ConnectedDatagram::new(socket))?;
                self.core.begin_handshake(session);
            }
        }
        Ok(())
    }
}

impl Endpoint for ClientEndpoint<'_> {
    fn role(&self) -> Role {
        Role::Client
    }

    fn local_addr(&self) -> SocketAddr {
        self.core.local_addr
    }

    fn state(&self) -> EndpointState {
        self.core.state
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<EndpointEvent> {
        if self.core.state == EndpointState::AwaitingConnect {
            if let ClientTransport::Stream {
                connecting: Some(connecting),
            } = &mut self.transport
            {
                let connected = ready!(connecting.as_mut().poll(cx));
                self.transport = ClientTransport::Stream { connecting: None };
                let tcp = match connected {
                    Ok(tcp) => tcp,
                    Err(e) => {
                        return Poll::Ready(self.core.fail(Error::transport(TransportOp::Connect, e)))
                    }
                };
                if let Ok(local_addr) = tcp.local_addr() {
                    self.core.local_addr = local_addr;
                }
                set_nodelay(&tcp);
                match Session::stream(self.core.context, tcp) {
                    Ok(session) => self.core.begin_handshake(session),
                    Err(error) => return Poll::Ready(self.core.fail(error)),
                }
            }
        }

        self.core.poll_session(cx)
    }

    fn teardown(&mut self) {
        self.core.close();
        if let ClientTransport::Stream { connecting } = &mut self.transport {
            *connecting = None;
        }
    }
}

impl Drop for ClientEndpoint<'_> {
    fn drop(&mut self) {
        // session before socket
        self.teardown();
    }
}
