//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT/SIGTERM as a group actor
//! - Stop the whole group when one arrives
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A received signal is reported as an error so the group exits non-zero

use tokio_util::sync::CancellationToken;

use crate::lifecycle::group::Group;
use crate::transport::BoxError;

/// Reason the signal actor returned.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("received signal {0}")]
    Received(&'static str),

    #[error("failed to install signal handler: {0}")]
    Install(#[from] std::io::Error),
}

/// Register an actor that returns when the process is asked to stop.
pub fn register_signal_handler(group: &mut Group) -> &mut Group {
    let token = CancellationToken::new();
    let waiter = token.clone();
    group.register_named(
        "signals",
        move || async move {
            tokio::select! {
                received = wait_for_signal() => match received {
                    Ok(name) => {
                        tracing::info!(signal = name, "Shutdown signal received");
                        Err(BoxError::from(SignalError::Received(name)))
                    }
                    Err(err) => Err(BoxError::from(err)),
                },
                _ = waiter.cancelled() => Ok::<(), BoxError>(()),
            }
        },
        move |_| token.cancel(),
    )
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str, SignalError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT").map_err(SignalError::from),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str, SignalError> {
    tokio::signal::ctrl_c().await?;
    Ok("SIGINT")
}
