use std::num::NonZeroU32;

use crate::{
    context::{ContextConfig, SecureContext, Transport},
    driver::{Driver, Flow, RunConfig},
    endpoint::{EndpointEvent, Role},
    error::{Error, TransportOp},
    testing::utilities::unavailable_addr,
};

/// RSA signing keeps every run comfortably above the millisecond resolution
/// of the report.
fn rsa_context(transport: Transport) -> anyhow::Result<SecureContext> {
    Ok(SecureContext::new(&ContextConfig {
        transport,
        ..Default::default()
    })?)
}

fn run_config(connections: u32) -> RunConfig {
    RunConfig {
        connections: NonZeroU32::new(connections).unwrap(),
        ..Default::default()
    }
}

#[tokio::test]
async fn stream_run() -> anyhow::Result<()> {
    let context = rsa_context(Transport::Stream)?;
    let report = Driver::new(&context, run_config(5)).run().await?;

    assert_eq!(report.transport, Transport::Stream);
    assert_eq!(report.num_connections.get(), 5);
    assert!(report.connections_per_sec()? > 0.0);
    assert!(report.protocol_version.starts_with("TLSv1"));
    assert!(!report.cipher.is_empty());
    assert!(report.to_string().contains("num_connections:      5"));
    Ok(())
}

#[tokio::test]
async fn datagram_run() -> anyhow::Result<()> {
    let context = rsa_context(Transport::Datagram)?;
    let report = Driver::new(&context, run_config(3)).run().await?;

    assert_eq!(report.transport, Transport::Datagram);
    assert_eq!(report.num_connections.get(), 3);
    assert!(report.connections_per_sec()? > 0.0);
    assert!(report.protocol_version.starts_with("DTLS"));
    assert_ne!(report.cipher, "(none)");
    Ok(())
}

#[tokio::test]
async fn bind_failure_aborts_before_any_handshake() -> anyhow::Result<()> {
    let context = rsa_context(Transport::Stream)?;
    let config = RunConfig {
        bind_addr: unavailable_addr(),
        ..run_config(4)
    };

    let error = Driver::new(&context, config.clone()).run().await.unwrap_err();
    assert!(matches!(
        error,
        Error::Transport {
            op: TransportOp::Bind,
            ..
        }
    ));
    assert_eq!(error.code(), libc::EADDRNOTAVAIL);

    let mut driver = Driver::new(&context, config);
    assert!(driver.start_cycle().is_err());
    assert_eq!(driver.server_addr(), None);
    assert!(driver.next_event().await.is_none());
    // the run is over
    assert!(matches!(driver.start_cycle(), Err(Error::Protocol(_))));
    Ok(())
}

#[tokio::test]
async fn handshake_on_busy_datagram_server_aborts_run() -> anyhow::Result<()> {
    let context = rsa_context(Transport::Datagram)?;
    let mut driver = Driver::new(&context, run_config(3));
    driver.start_cycle()?;

    // a stray peer reaches the server before the real client does
    let rogue = std::net::UdpSocket::bind("127.0.0.1:0")?;
    let server_addr = driver.server_addr().unwrap();
    rogue.send_to(b"stray client hello", server_addr)?;

    let error = loop {
        let event = driver.next_event().await.unwrap();
        match driver.handle_event(event) {
            Ok(Flow::Continue) => continue,
            Ok(Flow::Done(report)) => panic!("run completed: {report}"),
            Err(error) => break error,
        }
    };
    assert!(error.is_handshake_failure(), "{error}");
    assert_ne!(error.code(), 0);
    assert_eq!(driver.cycle(), 1);

    // the pair is gone and the run cannot be resumed
    assert!(driver.next_event().await.is_none());
    assert!(driver.start_cycle().is_err());
    Ok(())
}

#[tokio::test]
async fn cycle_advances_only_after_both_endpoints() -> anyhow::Result<()> {
    let context = rsa_context(Transport::Stream)?;
    let mut driver = Driver::new(&context, run_config(3));
    assert_eq!(driver.cycle(), 0);
    driver.start_cycle()?;
    assert_eq!(driver.cycle(), 1);

    let mut events = 0;
    let report = loop {
        let event = driver.next_event().await.unwrap();
        events += 1;
        let cycle = driver.cycle();
        let one_side_done = driver.client_established() || driver.server_established();

        match driver.handle_event(event)? {
            Flow::Done(report) => break report,
            Flow::Continue if driver.cycle() == cycle => {
                // first of the two events of this cycle
                assert!(!one_side_done);
                assert!(driver.client_established() ^ driver.server_established());
            }
            Flow::Continue => {
                assert_eq!(driver.cycle(), cycle + 1);
                assert!(one_side_done);
                assert!(!driver.client_established());
                assert!(!driver.server_established());
            }
        }
    };

    assert_eq!(events, 6);
    assert_eq!(driver.cycle(), 3);
    assert_eq!(report.num_connections.get(), 3);

    let late = EndpointEvent::Established {
        role: Role::Client,
        cipher: report.cipher.clone(),
        protocol_version: "TLSv1.3",
    };
    assert!(matches!(driver.handle_event(late), Err(Error::Protocol(_))));
    assert!(driver.start_cycle().is_err());
    Ok(())
}

#[tokio::test]
async fn first_pair_setup_is_separate_from_the_run() -> anyhow::Result<()> {
    let context = rsa_context(Transport::Stream)?;

    // a bind failure surfaces from the setup step, before any handshake
    let mut driver = Driver::new(
        &context,
        RunConfig {
            bind_addr: unavailable_addr(),
            ..run_config(2)
        },
    );
    let error = driver.start_cycle().unwrap_err();
    assert!(matches!(
        error,
        Error::Transport {
            op: TransportOp::Bind,
            ..
        }
    ));
    assert!(!driver.client_established());
    assert!(!driver.server_established());

    let mut driver = Driver::new(&context, run_config(2));
    driver.start_cycle()?;
    let report = driver.run_cycles().await?;
    assert_eq!(report.num_connections.get(), 2);
    assert_eq!(driver.cycle(), 2);
    Ok(())
}
