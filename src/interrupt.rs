//! SIGINT/SIGTERM handling while an experiment holds a network.
//!
//! Once [`Interrupts`] is installed a signal no longer kills the process.
//! It ends the running procedure instead, so the caller still reaches its
//! teardown.

use std::fmt;
use std::future::Future;

use anyhow::{Result, anyhow};
#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    CtrlC,
    Terminate,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::CtrlC => write!(f, "SIGINT"),
            Interrupt::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Listeners for the signals that end a run.
pub struct Interrupts {
    #[cfg(unix)]
    interrupt: Signal,
    #[cfg(unix)]
    terminate: Signal,
}

impl Interrupts {
    /// Must be called from within a tokio runtime.
    #[cfg(unix)]
    pub fn install() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    pub async fn recv(&mut self) -> Interrupt {
        tokio::select! {
            _ = self.interrupt.recv() => Interrupt::CtrlC,
            _ = self.terminate.recv() => Interrupt::Terminate,
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> Interrupt {
        if tokio::signal::ctrl_c().await.is_err() {
            // No handler means no interrupt will ever arrive
            std::future::pending::<()>().await;
        }
        Interrupt::CtrlC
    }
}

/// Drive `work` until it finishes or `interrupt` resolves.
///
/// An interrupt drops `work` where it stands and becomes an error.
pub async fn until_interrupted<F, I>(work: F, interrupt: I) -> Result<()>
where
    F: Future<Output = Result<()>>,
    I: Future<Output = Interrupt>,
{
    tokio::select! {
        result = work => result,
        sig = interrupt => {
            warn!("*** Received {sig}, tearing down");
            Err(anyhow!("interrupted by {sig}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future;

    use super::*;

    #[tokio::test]
    async fn finished_work_wins() {
        until_interrupted(async { Ok(()) }, future::pending())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn interrupt_cancels_pending_work() {
        let err = until_interrupted(future::pending(), async { Interrupt::Terminate })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "interrupted by SIGTERM");
    }

    #[tokio::test]
    async fn work_error_passes_through() {
        let err = until_interrupted(async { Err(anyhow!("boom")) }, future::pending())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
