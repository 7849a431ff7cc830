//! Datagram adapters that let a DTLS session run over a UDP socket.
//!
//! OpenSSL drives its I/O through a byte-stream BIO. For DTLS every BIO write
//! is a complete record flight and every BIO read must return exactly one
//! datagram, so the adapters below map one `poll_read` to one received
//! datagram and one `poll_write` to one sent datagram.

use std::{
    cell::RefCell,
    collections::VecDeque,
    io,
    net::SocketAddr,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::UdpSocket,
};

/// Largest datagram the server socket will read.
pub(crate) const MAX_DATAGRAM: usize = 65_535;

/// Client side: a UDP socket connected to the server.
#[derive(Debug)]
pub(crate) struct ConnectedDatagram {
    socket: UdpSocket,
}

impl ConnectedDatagram {
    pub(crate) fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl AsyncRead for ConnectedDatagram {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.socket.poll_recv(cx, buf)
    }
}

impl AsyncWrite for ConnectedDatagram {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        /* no op */
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

pub(crate) type InboundQueue = Rc<RefCell<VecDeque<Vec<u8>>>>;

/// Server side: one peer's view of a shared, unconnected UDP socket.
///
/// The owning Endpoint reads the socket and pushes the datagrams that belong
/// to `peer` into `inbound`. Reading from an empty queue returns `Pending`
/// without registering a waker: the Endpoint always drains the socket (which
/// does register one) before it drives the session.
#[derive(Debug)]
pub(crate) struct DemuxedDatagram {
    socket: Rc<UdpSocket>,
    peer: SocketAddr,
    inbound: InboundQueue,
}

impl DemuxedDatagram {
    pub(crate) fn new(socket: Rc<UdpSocket>, peer: SocketAddr, inbound: InboundQueue) -> Self {
        Self {
            socket,
            peer,
            inbound,
        }
    }
}

impl AsyncRead for DemuxedDatagram {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.inbound.borrow_mut().pop_front() {
            Some(datagram) => {
                // a datagram that does not fit is truncated, like recv(2)
                let len = datagram.len().min(buf.remaining());
                buf.put_slice(&datagram[..len]);
                Poll::Ready(Ok(()))
            }
            None => Poll::Pending,
        }
    }
}

impl AsyncWrite for DemuxedDatagram {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.socket.poll_send_to(cx, buf, self.peer)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        /* no op */
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
