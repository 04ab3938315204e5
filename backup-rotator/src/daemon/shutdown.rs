//! Shutdown signal handling for daemon mode (SIGTERM and SIGINT).
//!
//! A run that is in progress when the signal arrives is allowed to finish
//! before the scheduler is stopped.

use std::future::Future;
use tokio::signal;
use tracing::info;

/// Signal that ended daemon mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

/// Shutdown coordinator
#[derive(Debug, Default)]
pub struct ShutdownCoordinator;

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Wait for SIGTERM or SIGINT
    pub async fn wait_for_signal(&self) -> std::io::Result<ShutdownSignal> {
        #[cfg(unix)]
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        #[cfg(unix)]
        let terminate = sigterm.recv();

        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        first_signal(signal::ctrl_c(), terminate).await
    }
}

/// Resolve with whichever of the two signal sources fires first.
async fn first_signal<I, T>(interrupt: I, terminate: T) -> std::io::Result<ShutdownSignal>
where
    I: Future<Output = std::io::Result<()>>,
    T: Future<Output = Option<()>>,
{
    tokio::select! {
        result = interrupt => {
            result?;
            info!("Received SIGINT (Ctrl+C), stopping scheduler...");
            Ok(ShutdownSignal::Interrupt)
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping scheduler...");
            Ok(ShutdownSignal::Terminate)
        }
    }
}
