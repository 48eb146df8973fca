//! `cortex-adapter`: device-side session host.
//!
//! Takes one positional argument, the transport URI, and serves exactly one
//! session over it. Exit codes: 0 for a clean shutdown (peer close or
//! signal), 1 for a fatal protocol/kernel error, 2 for a bootstrap problem
//! (bad URI, unreachable carrier).

use std::process::ExitCode;

use clap::Parser;
use cortex_adapter::{AdapterConfig, AdapterSession, SessionError, ShutdownFlag, kernels};
use cortex_transport::{Role, TransportError, TransportUri, open_endpoint};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cortex-adapter", about = "CORTEX device adapter", version)]
struct Cli {
    /// Transport URI: local://, tcp://HOST:PORT, tcp://:PORT,
    /// serial:///dev/tty?baud=N, or shm://NAME.
    uri: String,

    /// Log filter (tracing env-filter syntax). RUST_LOG overrides.
    #[arg(long, default_value = "info")]
    log: String,

    /// Adapter name advertised in HELLO.
    #[arg(long, default_value = "cortex-adapter")]
    name: String,
}

enum AdapterError {
    Bootstrap(TransportError),
    Session(SessionError),
}

fn run(cli: &Cli) -> Result<(), AdapterError> {
    let uri = TransportUri::parse(&cli.uri).map_err(AdapterError::Bootstrap)?;
    let transport = open_endpoint(&uri, Role::Adapter).map_err(AdapterError::Bootstrap)?;
    let shutdown = ShutdownFlag::install()
        .map_err(|e| AdapterError::Bootstrap(TransportError::Io(e)))?;

    let config = AdapterConfig { adapter_name: cli.name.clone(), ..AdapterConfig::default() };
    let session = AdapterSession::new(transport, kernels::builtin_registry(), config, shutdown);
    session.run().map(|_| ()).map_err(AdapterError::Session)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(AdapterError::Session(e)) => {
            tracing::error!(error = %e, "fatal session error");
            ExitCode::FAILURE
        }
        Err(AdapterError::Bootstrap(e)) => {
            tracing::error!(error = %e, "could not bring up the transport");
            ExitCode::from(2)
        }
    }
}
