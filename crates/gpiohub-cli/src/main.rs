use anyhow::Context;
use clap::Parser;
use gpiohub_cli::{Cli, Config, Gateway, gateway};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    init_tracing(cli.verbose, &config.logging.filter);
    info!(version = gpiohub_core::VERSION, config = %cli.config.display(), backend = ?cli.backend, "Starting gpiohubd");

    let backend = gateway::backend(cli.backend, &config)?;
    let gateway = Gateway::start(config, backend)
        .await
        .context("starting gateway")?;

    // No broker client is built in; outbound messages are logged instead.
    let mut outbound = gateway.transport().subscribe("#");
    let console = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            info!(topic = %message.topic, payload = %message.payload, retain = message.retain, "Outbound");
        }
    });

    shutdown_signal().await;
    gateway.shutdown().await;
    console.abort();
    Ok(())
}

/// `RUST_LOG` wins, then `-v` flags, then the configured filter.
fn init_tracing(verbose: u8, configured: &str) {
    let directive = match verbose {
        0 => configured,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
