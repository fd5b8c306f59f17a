//! Node lifecycle manager daemon entry point.
//!
//! Wires together configuration loading, the lifecycle engine, the
//! Unix-socket transport, and signal-driven shutdown. Exit codes follow §6:
//! `0` for a user- or system-initiated shutdown that completed cleanly, `-1`
//! (via `std::process::exit`) for an internal error that prevented the
//! daemon from running at all.

mod error;
mod protocol;
mod signals;
mod transport;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use nsm_config::ConfigLoader;
use nsm_core::{EngineLimits, LifecycleEngine, NullPlatform, RequestSurface, SystemClock};

use error::DaemonError;
use transport::UnixSocketTransport;

/// Node lifecycle manager daemon.
#[derive(Parser)]
#[command(name = "nsmd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Override the configured Unix domain socket path.
    #[arg(long)]
    socket: Option<std::path::PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("nsmd: {err}");
            std::process::exit(-1);
        }
    }
}

fn run(cli: Cli) -> Result<(), DaemonError> {
    let config = ConfigLoader::new().load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.filter.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let socket_path = cli.socket.unwrap_or_else(|| config.daemon.socket_path.clone());
    tracing::info!(socket = %socket_path.display(), "starting node lifecycle manager");

    let listener = transport::bind(&socket_path)?;

    let limits = EngineLimits {
        default_client_timeout_ms: config.timeouts.default_client_timeout_ms,
        aggregate_ceiling_ms: config.timeouts.aggregate_ceiling_ms,
    };
    let client_transport = UnixSocketTransport::new();
    let engine = LifecycleEngine::with_clock_and_limits(
        SystemClock,
        client_transport.clone(),
        Arc::new(NullPlatform),
        limits,
    );
    let surface = Arc::new(RequestSurface::new(engine));

    let shutdown_flag = signals::shutdown_requested_flag();
    signals::install(&shutdown_flag)?;

    let result = transport::accept_loop(&listener, surface, client_transport, &shutdown_flag);

    if shutdown_flag.load(Ordering::Relaxed) {
        tracing::info!("shutdown requested, exiting");
    }
    let _ = std::fs::remove_file(&socket_path);
    result
}
