use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;

use crate::{
    context::{ContextConfig, SecureContext, Transport},
    endpoint::{next_event, ClientEndpoint, Endpoint, EndpointEvent, EndpointState, Role, ServerEndpoint},
    error::{Error, TransportOp},
    identity::{Identity, SelfSignedCert, SigType},
    key_log::NssLog,
    testing::utilities::{context, establish, is_quiet, started_pair, temp_path, unavailable_addr},
};

#[tokio::test]
async fn tls_over_tcp() -> anyhow::Result<()> {
    let context = context(Transport::Stream)?;
    let (mut server, mut client) = started_pair(&context)?;
    assert_eq!(server.state(), EndpointState::Listening);
    assert_eq!(client.state(), EndpointState::AwaitingConnect);

    let negotiated = establish(&mut server, &mut client).await?;
    assert_eq!(negotiated.server_cipher, negotiated.client_cipher);
    assert_ne!(negotiated.client_cipher, "(none)");
    assert!(negotiated.protocol_version.starts_with("TLSv1"));

    assert!(server.is_established());
    assert!(client.is_established());
    assert_ne!(client.local_addr().port(), 0);
    Ok(())
}

#[tokio::test]
async fn dtls_over_udp() -> anyhow::Result<()> {
    let context = context(Transport::Datagram)?;
    let (mut server, mut client) = started_pair(&context)?;
    assert_eq!(server.state(), EndpointState::Listening);
    // datagram clients hand the socket straight to the session
    assert_eq!(client.state(), EndpointState::HandshakeInProgress);
    assert_ne!(client.local_addr().port(), 0);

    let negotiated = establish(&mut server, &mut client).await?;
    assert_eq!(negotiated.server_cipher, negotiated.client_cipher);
    assert!(negotiated.protocol_version.starts_with("DTLS"));
    assert!(server.is_established());
    assert!(client.is_established());
    Ok(())
}

#[tokio::test]
async fn established_endpoints_stay_quiet() -> anyhow::Result<()> {
    for transport in [Transport::Stream, Transport::Datagram] {
        let context = context(transport)?;
        let (mut server, mut client) = started_pair(&context)?;
        establish(&mut server, &mut client).await?;

        assert!(is_quiet(&mut server).await);
        assert!(is_quiet(&mut client).await);
    }
    Ok(())
}

#[tokio::test]
async fn busy_datagram_server_rejects_other_peers() -> anyhow::Result<()> {
    let context = context(Transport::Datagram)?;
    let (mut server, mut client) = started_pair(&context)?;
    establish(&mut server, &mut client).await?;

    let rogue = std::net::UdpSocket::bind("127.0.0.1:0")?;
    rogue.send_to(b"second client hello", server.connect_addr())?;

    match next_event(&mut server).await {
        EndpointEvent::Error {
            role: Role::Server,
            error: error @ Error::Protocol(_),
        } => assert!(error.is_handshake_failure()),
        event => panic!("unexpected event {event:?}"),
    }
    assert_eq!(server.state(), EndpointState::Closed);

    // closed endpoints report nothing further
    rogue.send_to(b"third client hello", server.connect_addr())?;
    assert!(is_quiet(&mut server).await);
    Ok(())
}

#[tokio::test]
async fn server_bind_failure() -> anyhow::Result<()> {
    for transport in [Transport::Stream, Transport::Datagram] {
        let context = context(transport)?;
        let Err(error) = ServerEndpoint::bind(&context, unavailable_addr(), false) else {
            panic!("bind to {} succeeded", unavailable_addr());
        };
        assert!(matches!(
            error,
            Error::Transport {
                op: TransportOp::Bind,
                ..
            }
        ));
        assert_eq!(error.code(), libc::EADDRNOTAVAIL);
    }
    Ok(())
}

#[tokio::test]
async fn connection_refused() -> anyhow::Result<()> {
    let context = context(Transport::Stream)?;
    let closed: SocketAddr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?
    };

    let mut client = ClientEndpoint::new(&context, false)?;
    client.start(closed)?;
    match next_event(&mut client).await {
        EndpointEvent::Error {
            role: Role::Client,
            error,
        } => {
            assert!(matches!(
                error,
                Error::Transport {
                    op: TransportOp::Connect,
                    ..
                }
            ));
            assert_eq!(error.code(), libc::ECONNREFUSED);
        }
        event => panic!("unexpected event {event:?}"),
    }
    assert_eq!(client.state(), EndpointState::Closed);
    Ok(())
}

#[tokio::test]
async fn garbage_client_hello_is_a_handshake_failure() -> anyhow::Result<()> {
    let context = context(Transport::Stream)?;
    let mut server = ServerEndpoint::new(&context, false)?;

    let mut plaintext = tokio::net::TcpStream::connect(server.connect_addr()).await?;
    plaintext.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await?;

    match next_event(&mut server).await {
        EndpointEvent::Error { role, error } => {
            assert_eq!(role, Role::Server);
            assert!(error.is_handshake_failure(), "{error}");
            assert_eq!(error.code(), libc::EPROTO);
        }
        event => panic!("unexpected event {event:?}"),
    }
    assert_eq!(server.state(), EndpointState::Closed);
    Ok(())
}

#[tokio::test]
async fn start_twice_is_rejected() -> anyhow::Result<()> {
    for transport in [Transport::Stream, Transport::Datagram] {
        let context = context(transport)?;
        let server = ServerEndpoint::new(&context, false)?;
        let mut client = ClientEndpoint::new(&context, false)?;
        client.start(server.connect_addr())?;
        let state = client.state();

        assert!(matches!(
            client.start(server.connect_addr()),
            Err(Error::Protocol(_))
        ));
        // the attempt already under way is unaffected
        assert_eq!(client.state(), state);
    }
    Ok(())
}

#[tokio::test]
async fn teardown_in_any_state() -> anyhow::Result<()> {
    for transport in [Transport::Stream, Transport::Datagram] {
        let context = context(transport)?;

        // never started
        let server = ServerEndpoint::new(&context, false)?;
        let client = ClientEndpoint::new(&context, false)?;
        drop(client);
        drop(server);

        // started, handshake never driven
        let (server, client) = started_pair(&context)?;
        drop(server);
        drop(client);

        // established, explicit teardown repeated before drop
        let (mut server, mut client) = started_pair(&context)?;
        establish(&mut server, &mut client).await?;
        client.teardown();
        client.teardown();
        server.teardown();
        assert_eq!(client.state(), EndpointState::Closed);
        assert_eq!(server.state(), EndpointState::Closed);
        assert!(is_quiet(&mut client).await);
    }
    Ok(())
}

#[tokio::test]
async fn peer_teardown_is_reported() -> anyhow::Result<()> {
    let context = context(Transport::Stream)?;
    let (mut server, mut client) = started_pair(&context)?;
    establish(&mut server, &mut client).await?;

    drop(client);
    match next_event(&mut server).await {
        EndpointEvent::Error {
            role: Role::Server,
            error,
        } => assert!(matches!(
            error,
            Error::PeerClosed | Error::Transport { op: TransportOp::Exchange, .. }
        )),
        event => panic!("unexpected event {event:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn key_log_lines_are_written() -> anyhow::Result<()> {
    let path = temp_path("handshake-keys.log");
    let context = SecureContext::new(&ContextConfig {
        transport: Transport::Stream,
        identity: Identity::SelfSigned(SigType::Ecdsa256),
        key_log: Some(path.clone()),
    })?;

    let (mut server, mut client) = started_pair(&context)?;
    establish(&mut server, &mut client).await?;
    drop(server);
    drop(client);

    let contents = std::fs::read_to_string(&path)?;
    std::fs::remove_file(&path)?;

    let lines: Vec<NssLog> = contents
        .lines()
        .map(NssLog::from_log_line)
        .collect::<anyhow::Result<_>>()?;
    assert!(!lines.is_empty());
    for line in &lines {
        assert_eq!(line.client_random.len(), 32);
        assert!(!line.secret.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn pem_file_identity() -> anyhow::Result<()> {
    let path = temp_path("identity.pem");
    std::fs::write(&path, SelfSignedCert::generate(SigType::Ecdsa384)?.to_pem()?)?;

    for transport in [Transport::Stream, Transport::Datagram] {
        let context = SecureContext::new(&ContextConfig {
            transport,
            identity: Identity::PemFile(path.clone()),
            key_log: None,
        })?;
        let (mut server, mut client) = started_pair(&context)?;
        establish(&mut server, &mut client).await?;
    }

    std::fs::remove_file(&path)?;
    Ok(())
}
