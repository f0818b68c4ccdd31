//! Operator checkpoint between pipeline stages.
//!
//! The gate is a single-use signal. A procedure awaits it before moving on;
//! who opens it (a person at the keyboard, automation, a test) is decided
//! by whoever builds the gate.

use std::io::{self, BufRead, Write};

use anyhow::{Result, anyhow};
use tokio::sync::oneshot;
use tracing::debug;

/// Opens the matching [`OperatorGate`]. Dropping it unfired abandons the
/// gate.
pub struct GateTrigger {
    tx: oneshot::Sender<()>,
}

impl GateTrigger {
    pub fn fire(self) {
        // Receiver gone means nobody waits any more
        let _ = self.tx.send(());
    }
}

pub struct OperatorGate {
    rx: oneshot::Receiver<()>,
}

impl OperatorGate {
    pub fn channel() -> (GateTrigger, Self) {
        let (tx, rx) = oneshot::channel();
        (GateTrigger { tx }, Self { rx })
    }

    /// A gate that is already open.
    pub fn open() -> Self {
        let (trigger, gate) = Self::channel();
        trigger.fire();
        gate
    }

    /// A gate opened by a line on stdin. EOF or a read error abandons it.
    pub fn stdin(prompt: String) -> Self {
        Self::reading(prompt, || io::stdin().lock())
    }

    /// Print `prompt`, then open the gate on the first line read from the
    /// input `open` returns. The read happens on its own thread, so a
    /// caller that stops waiting is never held up by it.
    pub fn reading<F, R>(prompt: String, open: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
        R: BufRead,
    {
        let (trigger, gate) = Self::channel();
        std::thread::spawn(move || {
            print!("{prompt}");
            let _ = io::stdout().flush();

            let mut line = String::new();
            match open().read_line(&mut line) {
                Ok(n) if n > 0 => trigger.fire(),
                other => debug!(?other, "input closed before the operator confirmed"),
            }
        });
        gate
    }

    /// Wait until the gate opens. There is no timeout.
    pub async fn wait(self) -> Result<()> {
        self.rx
            .await
            .map_err(|_| anyhow!("operator checkpoint abandoned: no confirmation received"))
    }
}
