use tokio::sync::watch;
use tracing::{info, warn};

/// Cancellation signal observed by the sequencer while a step's command runs.
///
/// Interruption drops the in-flight command (its child is killed) and leaves
/// persisted state where it was before the step.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

/// Test and embedding handle that fires a `ShutdownSignal`.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl ShutdownSignal {
    pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, ShutdownSignal { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_trigger, signal) = Self::channel();
        signal
    }

    /// Install a Ctrl-C handler feeding the returned signal. Must be called
    /// inside a tokio runtime.
    pub fn install_ctrl_c() -> Self {
        let (trigger, signal) = Self::channel();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping the current step");
                trigger.trigger();
            }
        });
        info!("Installed Ctrl-C handler");
        signal
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once triggered; pends forever if the trigger is gone.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
