use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf};

use clap::Parser;

use crate::{
    context::{ContextConfig, Transport},
    driver::RunConfig,
    endpoint::LOOPBACK,
    identity::{Identity, SigType},
};

#[derive(Parser, Debug)]
#[command(name = "tlsperf", version, about = "TLS/DTLS handshake performance testing")]
pub struct Cli {
    #[arg(short = 'c', long = "cert", value_name = "PEM", help = "Use this certificate file")]
    pub cert: Option<PathBuf>,

    #[arg(short = 'd', long = "dtls", help = "Use DTLS protocol")]
    pub dtls: bool,

    #[arg(
        short = 'n',
        long = "num",
        value_name = "NUM",
        default_value = "1",
        help = "Number of TLS connections"
    )]
    pub num: NonZeroU32,

    #[arg(short = 'v', long = "verbose", help = "Verbose output")]
    pub verbose: bool,

    #[arg(short = 'q', long = "quiet", help = "Do not print the progress indicator")]
    pub quiet: bool,

    #[arg(
        long,
        value_enum,
        default_value_t = SigType::default(),
        help = "Key type of the generated self-signed certificate"
    )]
    pub sig_type: SigType,

    #[arg(
        long,
        value_name = "ADDR",
        default_value_t = LOOPBACK,
        help = "Address the server endpoints bind to"
    )]
    pub bind: SocketAddr,

    #[arg(long, value_name = "PATH", help = "Append NSS key log lines to this file")]
    pub keylog: Option<PathBuf>,

    #[arg(long, help = "Print the summary as JSON")]
    pub json: bool,
}

/// Everything a run needs, resolved from the command line.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub context: ContextConfig,
    pub run: RunConfig,
    pub json: bool,
}

impl Cli {
    pub fn into_config(self) -> BenchConfig {
        let transport = if self.dtls {
            Transport::Datagram
        } else {
            Transport::Stream
        };
        let identity = match self.cert {
            Some(path) => Identity::PemFile(path),
            None => Identity::SelfSigned(self.sig_type),
        };

        BenchConfig {
            context: ContextConfig {
                transport,
                identity,
                key_log: self.keylog,
            },
            run: RunConfig {
                connections: self.num,
                verbose: self.verbose,
                progress: !self.quiet && !self.json,
                bind_addr: self.bind,
            },
            json: self.json,
        }
    }
}
