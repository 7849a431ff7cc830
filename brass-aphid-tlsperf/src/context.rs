use std::path::PathBuf;

use openssl::ssl::{Ssl, SslContext, SslMethod, SslOptions, SslVerifyMode};

use crate::{error::Error, identity::Identity, key_log::KeyLogFile};

/// DTLS records are sized for a loopback link without relying on path MTU
/// discovery through the custom BIO.
pub const DTLS_MTU: u32 = 1400;

/// The transport an Endpoint runs over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// TLS over TCP
    #[default]
    #[strum(serialize = "TLS")]
    Stream,
    /// DTLS over UDP
    #[strum(serialize = "DTLS")]
    Datagram,
}

#[derive(Debug, Clone, Default)]
pub struct ContextConfig {
    pub transport: Transport,
    pub identity: Identity,
    pub key_log: Option<PathBuf>,
}

/// Configuration and identity shared by every handshake of a run.
///
/// The context is immutable once built. Endpoints borrow it, so it necessarily
/// outlives all of them.
pub struct SecureContext {
    transport: Transport,
    ssl_context: SslContext,
}

impl SecureContext {
    pub fn new(config: &ContextConfig) -> Result<Self, Error> {
        let method = match config.transport {
            Transport::Stream => SslMethod::tls(),
            Transport::Datagram => SslMethod::dtls(),
        };

        let mut builder = SslContext::builder(method)
            .map_err(|e| Error::config(format!("unable to create {} context: {e}", config.transport)))?;

        // peer certificates are never verified
        builder.set_verify(SslVerifyMode::NONE);
        if config.transport == Transport::Datagram {
            // the link MTU is fixed per session in `new_ssl`
            builder.set_options(SslOptions::NO_QUERY_MTU);
        }

        config.identity.install(&mut builder)?;

        if let Some(path) = &config.key_log {
            let key_log = KeyLogFile::create(path)?;
            builder.set_keylog_callback(move |_ssl, line| key_log.append(line));
        }

        tracing::debug!(
            "built {} context with identity {}",
            config.transport,
            config.identity.describe()
        );

        Ok(Self {
            transport: config.transport,
            ssl_context: builder.build(),
        })
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Create the per-connection state for a new secure-session.
    pub(crate) fn new_ssl(&self) -> Result<Ssl, Error> {
        let mut ssl = Ssl::new(&self.ssl_context)
            .map_err(|e| Error::Handshake(format!("unable to create session: {e}")))?;
        if self.transport == Transport::Datagram {
            ssl.set_mtu(DTLS_MTU)
                .map_err(|e| Error::Handshake(format!("unable to set DTLS MTU: {e}")))?;
        }
        Ok(ssl)
    }
}

impl std::fmt::Debug for SecureContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureContext")
            .field("transport", &self.transport)
            .finish()
    }
}
