use std::process::ExitCode;

use brass_aphid_tlsperf::{
    cli::{BenchConfig, Cli},
    Driver, Error, SecureContext,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Cli::parse().into_config();

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("program failed with error: {error}");
            ExitCode::from(exit_status(&error))
        }
    }
}

fn run(config: &BenchConfig) -> Result<(), Error> {
    if !config.json {
        print_banner(config);
    }

    // setup failures end the process before any cycle runs
    let context = SecureContext::new(&config.context)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::config_io("unable to start the event loop", e))?;

    if !config.json {
        println!("starting tests now. (num={})", config.run.connections);
    }

    let mut driver = Driver::new(&context, config.run.clone());
    // failing to bind the first pair is a setup error, not an aborted run
    runtime.block_on(async { driver.start_cycle() })?;
    let report = runtime.block_on(driver.run_cycles());

    if config.run.progress {
        eprintln!();
    }

    let report = report.inspect_err(|error| {
        eprintln!("TLS Endpoint error ({error}) -- ABORT");
    })?;

    if config.json {
        match report.to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::error!("unable to serialize report: {e}"),
        }
    } else {
        println!("DONE!");
        println!("cipher:        {}", report.cipher);
        println!("version:       {}", report.protocol_version);
        println!("{report}");
    }
    Ok(())
}

fn print_banner(config: &BenchConfig) {
    println!("tlsperf -- TLS performance testing program");
    println!("version:       {}", env!("CARGO_PKG_VERSION"));
    println!("openssl:       {}", openssl::version::version());
    println!("os:            {}", std::env::consts::OS);
    println!("arch:          {}", std::env::consts::ARCH);
    println!("protocol:      {}", config.context.transport);
    println!("certificate:   {}", config.context.identity.describe());
}

/// The error code as a process exit status, never zero.
fn exit_status(error: &Error) -> u8 {
    match u8::try_from(error.code()) {
        Ok(0) | Err(_) => 1,
        Ok(code) => code,
    }
}
