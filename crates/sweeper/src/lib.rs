//! Background worker that reclaims expired stock reservations.
//!
//! Wires the expiry sweeper to PostgreSQL, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;

use std::future::Future;
use std::io;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::{Config, LogFormat};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` in the environment takes precedence over the configured level.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Resolves with the name of the first termination signal received.
///
/// Fails if a signal handler cannot be installed.
pub async fn termination_signal() -> io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => interrupted.map(|()| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
    }
}

/// Waits for `trigger`, then tells the sweeper loop to stop after its
/// current sweep.
///
/// A trigger that fails still stops the loop.
pub async fn stop_on<F>(trigger: F, stop: watch::Sender<bool>)
where
    F: Future<Output = io::Result<&'static str>>,
{
    match trigger.await {
        Ok(signal) => tracing::info!(signal, "shutdown requested, finishing current sweep"),
        Err(e) => tracing::error!(error = %e, "signal handler failed, shutting down"),
    }
    stop.send_replace(true);
}
