use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Turns SIGINT into cancellation of in-flight evaluations and landings
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token passed to every cancellable operation
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the token on Ctrl-C. Must be called inside a Tokio runtime.
    pub fn install_signal_handlers(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, cancelling in-flight operations");
                    token.cancel();
                }
                Err(e) => warn!("Failed to listen for interrupt: {}", e),
            }
        });
    }

    pub fn shutdown(&self) {
        info!("Initiating graceful shutdown");
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }
}
