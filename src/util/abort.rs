//! Job-wide abort signal
//!
//! An [`AbortTrigger`] fires once; every cloned [`AbortSignal`] observes it. The
//! process wires SIGINT/SIGTERM to the trigger so an interrupted leader can still
//! emit whatever it collected.

use tokio::sync::watch;

/// Firing side of the abort signal
#[derive(Debug)]
pub struct AbortTrigger {
    tx: watch::Sender<bool>,
}

/// Observing side of the abort signal
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected trigger/signal pair
pub fn abort_pair() -> (AbortTrigger, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortTrigger { tx }, AbortSignal { rx })
}

impl AbortTrigger {
    /// Fire the signal (idempotent)
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl AbortSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal fires; pends forever if the trigger is dropped unfired
    pub async fn triggered(&self) {
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

/// Fire `trigger` on SIGINT or SIGTERM
pub fn install_signal_handlers(trigger: AbortTrigger) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::warn!("abort signal received, abandoning in-flight lookups");
        trigger.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::debug!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
