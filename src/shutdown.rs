//! Process termination handling for the composition point.
//!
//! The bridge itself never touches process-global signal state. The binary
//! installs `ShutdownSignals` once, waits for a reason, then calls `shutdown`.

use std::fmt;
use std::process::ExitCode;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::coordinator::Bridge;

/// Why the process is terminating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    Quit,
    /// A panic on any thread, including spawned tasks.
    Panic(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
            Self::Quit => f.write_str("SIGQUIT"),
            Self::Panic(message) => write!(f, "panic: {}", message),
        }
    }
}

/// How shutdown went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Clean,
    Failed,
}

impl From<ShutdownOutcome> for ExitCode {
    fn from(outcome: ShutdownOutcome) -> Self {
        match outcome {
            ShutdownOutcome::Clean => ExitCode::SUCCESS,
            ShutdownOutcome::Failed => ExitCode::FAILURE,
        }
    }
}

/// Termination sources: unix signals plus panics.
pub struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    quit: tokio::signal::unix::Signal,
    panics: mpsc::UnboundedReceiver<String>,
}

impl ShutdownSignals {
    /// Register signal listeners and chain a panic hook.
    ///
    /// Call once per process, from inside the runtime.
    pub fn install() -> std::io::Result<Self> {
        let (tx, panics) = mpsc::unbounded_channel();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = tx.send(info.to_string());
            previous(info);
        }));

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
                quit: signal(SignalKind::quit())?,
                panics,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self { panics })
        }
    }

    /// Wait for the first termination reason.
    pub async fn recv(&mut self) -> ShutdownReason {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.interrupt.recv() => ShutdownReason::Interrupt,
                _ = self.terminate.recv() => ShutdownReason::Terminate,
                _ = self.quit.recv() => ShutdownReason::Quit,
                Some(message) = self.panics.recv() => ShutdownReason::Panic(message),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => ShutdownReason::Interrupt,
                Some(message) = self.panics.recv() => ShutdownReason::Panic(message),
            }
        }
    }
}

/// Close the bridge and report how it went.
pub async fn shutdown(bridge: &Bridge, reason: &ShutdownReason) -> ShutdownOutcome {
    match bridge.close().await {
        Ok(()) => {
            info!(reason = %reason, "RabbitMQ bridge shut down");
            ShutdownOutcome::Clean
        }
        Err(e) => {
            error!(
                reason = %reason,
                error = %e,
                "Error closing RabbitMQ connection during shutdown"
            );
            ShutdownOutcome::Failed
        }
    }
}
