use std::{
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_openssl::SslStream;

use super::{
    datagram::{ConnectedDatagram, DemuxedDatagram},
    Role,
};
use crate::{
    context::SecureContext,
    error::{Error, TransportOp},
};

/// The live secure channel of one Endpoint.
#[derive(Debug)]
pub(crate) enum Session {
    Stream(SslStream<TcpStream>),
    ConnectedDatagram(SslStream<ConnectedDatagram>),
    DemuxedDatagram(SslStream<DemuxedDatagram>),
}

impl Session {
    pub(crate) fn stream(context: &SecureContext, tcp: TcpStream) -> Result<Self, Error> {
        Ok(Session::Stream(new_stream(context, tcp)?))
    }

    pub(crate) fn connected_datagram(
        context: &SecureContext,
        io: ConnectedDatagram,
    ) -> Result<Self, Error> {
        Ok(Session::ConnectedDatagram(new_stream(context, io)?))
    }

    pub(crate) fn demuxed_datagram(
        context: &SecureContext,
        io: DemuxedDatagram,
    ) -> Result<Self, Error> {
        Ok(Session::DemuxedDatagram(new_stream(context, io)?))
    }

    /// Advance the handshake. `Ready(Ok(()))` once negotiation is complete.
    pub(crate) fn poll_handshake(
        &mut self,
        role: Role,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), Error>> {
        match self {
            Session::Stream(stream) => poll_handshake(stream, role, cx),
            Session::ConnectedDatagram(stream) => poll_handshake(stream, role, cx),
            Session::DemuxedDatagram(stream) => poll_handshake(stream, role, cx),
        }
    }

    /// Watch an established session. Resolves only when the session fails or
    /// the peer closes it; application data is discarded.
    pub(crate) fn poll_failure(&mut self, cx: &mut Context<'_>) -> Poll<Error> {
        match self {
            Session::Stream(stream) => poll_failure(stream, cx),
            Session::ConnectedDatagram(stream) => poll_failure(stream, cx),
            Session::DemuxedDatagram(stream) => poll_failure(stream, cx),
        }
    }

    pub(crate) fn cipher_name(&self) -> String {
        self.ssl()
            .current_cipher()
            .map(|cipher| cipher.name().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    }

    pub(crate) fn protocol_version(&self) -> &'static str {
        self.ssl().version_str()
    }

    fn ssl(&self) -> &openssl::ssl::SslRef {
        match self {
            Session::Stream(stream) => stream.ssl(),
            Session::ConnectedDatagram(stream) => stream.ssl(),
            Session::DemuxedDatagram(stream) => stream.ssl(),
        }
    }
}

fn new_stream<S>(context: &SecureContext, io: S) -> Result<SslStream<S>, Error>
where
    S: AsyncRead + AsyncWrite,
{
    let ssl = context.new_ssl()?;
    SslStream::new(ssl, io).map_err(|e| Error::Handshake(format!("unable to attach session: {e}")))
}

fn poll_handshake<S>(
    stream: &mut SslStream<S>,
    role: Role,
    cx: &mut Context<'_>,
) -> Poll<Result<(), Error>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stream = Pin::new(stream);
    let poll = match role {
        Role::Client => stream.poll_connect(cx),
        Role::Server => stream.poll_accept(cx),
    };
    poll.map_err(Error::from_ssl)
}

fn poll_failure<S>(stream: &mut SslStream<S>, cx: &mut Context<'_>) -> Poll<Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut scratch = [0; 512];
    loop {
        let mut buf = ReadBuf::new(&mut scratch);
        match Pin::new(&mut *stream).poll_read(cx, &mut buf) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(())) if buf.filled().is_empty() => return Poll::Ready(Error::PeerClosed),
            Poll::Ready(Ok(())) => {
                tracing::trace!("discarding {} bytes of application data", buf.filled().len());
            }
            Poll::Ready(Err(e)) => {
                return Poll::Ready(Error::transport(TransportOp::Exchange, e));
            }
        }
    }
}
