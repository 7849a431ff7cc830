//! The benchmark driver: repeated handshake cycles over fresh Endpoint pairs.
//!
//! Each cycle constructs a server (bound to an ephemeral address) and a client,
//! starts the client against the server, and waits for both to report
//! `Established`. The two events may arrive in either order. Only once both
//! flags are set does the driver either finish, or tear the pair down and
//! start the next cycle. The first error from either Endpoint aborts the run.

use std::{
    future::poll_fn,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    num::NonZeroU32,
    task::{Context, Poll},
    time::Instant,
};

use crate::{
    context::SecureContext,
    endpoint::{ClientEndpoint, Endpoint, EndpointEvent, Role, ServerEndpoint, LOOPBACK},
    error::Error,
    report::Report,
};

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// number of handshake cycles
    pub connections: NonZeroU32,
    /// print a line for every established Endpoint
    pub verbose: bool,
    /// print a progress indicator to stderr
    pub progress: bool,
    /// where each server Endpoint binds
    pub bind_addr: SocketAddr,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            connections: NonZeroU32::MIN,
            verbose: false,
            progress: false,
            bind_addr: LOOPBACK,
        }
    }
}

/// What the caller should do after an event was handled.
#[derive(Debug)]
pub enum Flow {
    Continue,
    Done(Report),
}

/// The Endpoints of the cycle in progress. Server first, so it is also
/// released first.
struct Pair<'ctx> {
    server: ServerEndpoint<'ctx>,
    client: ClientEndpoint<'ctx>,
}

impl Pair<'_> {
    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<EndpointEvent> {
        if let Poll::Ready(event) = self.server.poll_event(cx) {
            return Poll::Ready(event);
        }
        self.client.poll_event(cx)
    }
}

pub struct Driver<'ctx> {
    context: &'ctx SecureContext,
    config: RunConfig,
    pair: Option<Pair<'ctx>>,
    /// incremented when a cycle starts
    cycle: u32,
    client_established: bool,
    server_established: bool,
    started_at: Instant,
    finished: bool,
}

impl<'ctx> Driver<'ctx> {
    /// The run's start timestamp is captured here.
    pub fn new(context: &'ctx SecureContext, config: RunConfig) -> Self {
        Self {
            context,
            config,
            pair: None,
            cycle: 0,
            client_established: false,
            server_established: false,
            started_at: Instant::now(),
            finished: false,
        }
    }

    /// Run every cycle to completion. Consumes the driver, the run reaches
    /// its terminal state exactly once.
    pub async fn run(mut self) -> Result<Report, Error> {
        self.start_cycle()?;
        self.run_cycles().await
    }

    /// Drive the cycle in progress, and every one after it, until the run
    /// finishes. The first cycle must already have been started.
    pub async fn run_cycles(&mut self) -> Result<Report, Error> {
        loop {
            let event = self
                .next_event()
                .await
                .ok_or(Error::Protocol("no cycle in progress"))?;
            if let Flow::Done(report) = self.handle_event(event)? {
                return Ok(report);
            }
        }
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub fn client_established(&self) -> bool {
        self.client_established
    }

    pub fn server_established(&self) -> bool {
        self.server_established
    }

    /// The address the current cycle's client targets.
    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.pair.as_ref().map(|pair| pair.server.connect_addr())
    }

    /// Tear down the current pair, if any, and construct and start the next
    /// one.
    pub fn start_cycle(&mut self) -> Result<(), Error> {
        if self.finished {
            return Err(Error::Protocol("benchmark run already finished"));
        }
        if self.cycle >= self.config.connections.get() {
            return Err(Error::Protocol("all cycles have already been started"));
        }

        // the previous pair is fully released before new sockets are bound
        self.pair = None;
        self.client_established = false;
        self.server_established = false;
        self.cycle += 1;
        tracing::info!("starting cycle {}/{}", self.cycle, self.config.connections);

        let result = self.construct_pair();
        if result.is_err() {
            self.finished = true;
        }
        result
    }

    fn construct_pair(&mut self) -> Result<(), Error> {
        let verbose = self.config.verbose;
        let server = ServerEndpoint::bind(self.context, self.config.bind_addr, verbose)?;
        let target = server.connect_addr();

        let loopback = match target.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        };
        let mut client = ClientEndpoint::bind(self.context, SocketAddr::new(loopback, 0), verbose)?;
        client.start(target)?;

        self.pair = Some(Pair { server, client });
        Ok(())
    }

    /// Wait for the next event of the current pair. `None` when no cycle is
    /// in progress.
    pub async fn next_event(&mut self) -> Option<EndpointEvent> {
        let pair = self.pair.as_mut()?;
        Some(poll_fn(|cx| pair.poll_event(cx)).await)
    }

    /// Advance the run state machine by one event.
    pub fn handle_event(&mut self, event: EndpointEvent) -> Result<Flow, Error> {
        if self.finished {
            return Err(Error::Protocol("benchmark run already finished"));
        }

        let (role, cipher, protocol_version) = match event {
            EndpointEvent::Established {
                role,
                cipher,
                protocol_version,
            } => (role, cipher, protocol_version),
            EndpointEvent::Error { role, error } => {
                tracing::debug!("{role} error in cycle {}, aborting: {error}", self.cycle);
                self.finished = true;
                self.pair = None;
                return Err(error);
            }
        };

        match role {
            Role::Client => self.client_established = true,
            Role::Server => self.server_established = true,
        }
        if self.config.progress {
            eprint!("\r[ {} .. {} ]", self.cycle, progress_char(self.cycle));
        }

        if !(self.client_established && self.server_established) {
            return Ok(Flow::Continue);
        }

        if self.cycle >= self.config.connections.get() {
            let elapsed = self.started_at.elapsed();
            self.finished = true;
            self.pair = None;
            let report = Report::new(
                self.context.transport(),
                self.config.connections,
                elapsed,
                cipher,
                protocol_version.to_string(),
            );
            tracing::info!("finished {} cycles in {} ms", self.cycle, report.total_duration_ms);
            return Ok(Flow::Done(report));
        }

        self.start_cycle()?;
        Ok(Flow::Continue)
    }
}

/// Cycles through the printable ASCII range.
fn progress_char(cycle: u32) -> char {
    char::from(0x20 + (cycle % 0x60) as u8)
}
