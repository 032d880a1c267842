#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;

use std::process::ExitCode;

use args::Args;
use clap::Parser;
use crossbar_config::Config;
use crossbar_server::Server;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Exit code when a reload fails under `--strict-reload`
const EXIT_RELOAD_FAILED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = Config::load(&args.config)?;

    tracing::info!(config_path = %args.config.display(), "starting crossbar");

    let server = Server::new(config)?;
    #[cfg(unix)]
    let reloader = server.reload_handle();

    let shutdown = CancellationToken::new();
    let exit_code = std::sync::Arc::new(std::sync::atomic::AtomicU8::new(0));

    // SIGINT/SIGTERM stop the server; SIGHUP reloads configuration
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    #[cfg(unix)]
    tokio::spawn({
        let shutdown = shutdown.clone();
        let exit_code = std::sync::Arc::clone(&exit_code);
        let config_path = args.config.clone();
        let strict = args.strict_reload;
        async move {
            let Ok(mut hangup) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) else {
                return;
            };
            while hangup.recv().await.is_some() {
                let outcome = Config::load(&config_path).and_then(|config| reloader.reload(&config));
                if let Err(e) = outcome {
                    tracing::error!(error = %format!("{e:#}"), "config reload failed");
                    if strict {
                        exit_code.store(EXIT_RELOAD_FAILED, std::sync::atomic::Ordering::Relaxed);
                        shutdown.cancel();
                        return;
                    }
                }
            }
        }
    });

    server.serve(shutdown).await?;

    tracing::info!("crossbar stopped");
    Ok(ExitCode::from(exit_code.load(std::sync::atomic::Ordering::Relaxed)))
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
