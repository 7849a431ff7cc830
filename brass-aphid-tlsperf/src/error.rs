use std::io;

/// The transport operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TransportOp {
    Bind,
    Listen,
    Accept,
    Connect,
    /// reading or writing on an established transport
    Exchange,
}

/// Everything that can go wrong while setting up or running a benchmark.
///
/// Every variant maps onto an errno-style [`Error::code`], which the `tlsperf`
/// binary uses as its exit status.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{op} failed: {source}")]
    Transport {
        op: TransportOp,
        #[source]
        source: io::Error,
    },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("connection closed by peer")]
    PeerClosed,

    #[error("configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("duration too short to measure")]
    DurationTooShort,
}

impl Error {
    pub fn transport(op: TransportOp, source: io::Error) -> Self {
        Error::Transport { op, source }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Config {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Map a failure reported by OpenSSL while a handshake was in flight.
    ///
    /// Syscall failures surface as transport errors, everything else is a
    /// negotiation failure.
    pub fn from_ssl(error: openssl::ssl::Error) -> Self {
        match error.into_io_error() {
            Ok(io_error) => Error::transport(TransportOp::Exchange, io_error),
            Err(error) => Error::Handshake(error.to_string()),
        }
    }

    /// Protocol violations are negotiation failures that were caught before
    /// OpenSSL ever saw the bytes.
    pub fn is_handshake_failure(&self) -> bool {
        matches!(self, Error::Handshake(_) | Error::Protocol(_))
    }

    pub fn code(&self) -> i32 {
        match self {
            Error::Transport { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            Error::Handshake(_) | Error::Protocol(_) => libc::EPROTO,
            Error::PeerClosed => libc::ECONNRESET,
            Error::Config { source, .. } => source
                .as_ref()
                .and_then(io::Error::raw_os_error)
                .unwrap_or(libc::EINVAL),
            Error::DurationTooShort => libc::ERANGE,
        }
    }
}
