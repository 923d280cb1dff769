//! Graceful shutdown helper.

use tokio::{
    signal::unix::{signal, SignalKind},
    sync::broadcast,
};
use tracing::{error, info};

/// Listens for SIGTERM and SIGINT and broadcasts a shutdown notification to every
/// subscribed component
pub struct Shutdown {
    tx_shutdown: broadcast::Sender<()>,
}

impl Default for Shutdown {
    fn default() -> Self {
        let (tx_shutdown, _) = broadcast::channel(1);
        Self { tx_shutdown }
    }
}

impl Shutdown {
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx_shutdown.subscribe()
    }

    /// Notify subscribers without waiting for a signal
    pub fn trigger(&self) -> Result<(), ()> {
        self.tx_shutdown.send(()).map(|_| ()).map_err(|_| ())
    }

    pub async fn run(&self) -> Result<(), ()> {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(err), _) | (_, Err(err)) => {
                    error!("Failed to install signal handlers: {}", err);
                    // Take the other components down with us
                    let _ = self.trigger();
                    return Err(());
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown..."),
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown..."),
        };

        self.trigger()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_every_subscriber() {
        let shutdown = Shutdown::default();
        let mut rx1 = shutdown.subscribe();
        let mut rx2 = shutdown.subscribe();
        shutdown.trigger().unwrap();
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }

    #[test]
    fn test_trigger_without_subscribers_fails() {
        assert!(Shutdown::default().trigger().is_err());
    }
}
