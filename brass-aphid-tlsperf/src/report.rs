use std::{fmt, num::NonZeroU32, time::Duration};

use crate::{context::Transport, error::Error};

/// Aggregate timing of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub transport: Transport,
    pub num_connections: NonZeroU32,
    /// whole milliseconds, truncated
    pub total_duration_ms: u64,
    pub cipher: String,
    pub protocol_version: String,
}

impl Report {
    pub fn new(
        transport: Transport,
        num_connections: NonZeroU32,
        elapsed: Duration,
        cipher: String,
        protocol_version: String,
    ) -> Self {
        Self {
            transport,
            num_connections,
            total_duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            cipher,
            protocol_version,
        }
    }

    /// Milliseconds per connection.
    pub fn avg_time_per_conn(&self) -> f64 {
        self.total_duration_ms as f64 / f64::from(self.num_connections.get())
    }

    /// Fails with [`Error::DurationTooShort`] when the run finished in under a
    /// millisecond, instead of reporting an infinite rate.
    pub fn connections_per_sec(&self) -> Result<f64, Error> {
        if self.total_duration_ms == 0 {
            return Err(Error::DurationTooShort);
        }
        Ok(1000.0 * f64::from(self.num_connections.get()) / self.total_duration_ms as f64)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&Summary::from(self))
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "~~~ Summary: ~~~")?;
        writeln!(f, "num_connections:      {}", self.num_connections)?;
        writeln!(f, "total_duration:       {} ms", self.total_duration_ms)?;
        writeln!(f, "avg_time_per_conn:    {:.3} ms", self.avg_time_per_conn())?;
        match self.connections_per_sec() {
            Ok(rate) => writeln!(f, "connections_per_sec:  {rate:.3}"),
            Err(e) => writeln!(f, "connections_per_sec:  {e}"),
        }
    }
}

/// The serialized form of a [`Report`], with the derived statistics.
#[derive(Debug, serde::Serialize)]
struct Summary<'a> {
    transport: Transport,
    protocol_version: &'a str,
    cipher: &'a str,
    num_connections: u32,
    total_duration_ms: u64,
    avg_time_per_conn_ms: f64,
    /// `null` when the duration was too short to measure
    connections_per_sec: Option<f64>,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

impl<'a> From<&'a Report> for Summary<'a> {
    fn from(report: &'a Report) -> Self {
        Self {
            transport: report.transport,
            protocol_version: &report.protocol_version,
            cipher: &report.cipher,
            num_connections: report.num_connections.get(),
            total_duration_ms: report.total_duration_ms,
            avg_time_per_conn_ms: round3(report.avg_time_per_conn()),
            connections_per_sec: report.connections_per_sec().ok().map(round3),
        }
    }
}
