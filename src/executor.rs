use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::device_registry::RegistryHandle;
use crate::error::{ProviderError, Result};
use crate::session::Session;

/// Runs work against whichever device is currently active.
pub struct SessionExecutor {
    registry: RegistryHandle,
    warmup: Duration,
    settled: OnceCell<()>,
}

impl SessionExecutor {
    pub fn new(registry: RegistryHandle, warmup: Duration) -> Self {
        Self {
            registry,
            warmup,
            settled: OnceCell::new(),
        }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Wait out the warm-up delay. Only the first call sleeps; concurrent
    /// first callers all wait for the same delay.
    pub async fn settle_once(&self) {
        self.settled
            .get_or_init(|| async {
                if !self.warmup.is_zero() {
                    info!("Waiting {:?} for the device to settle", self.warmup);
                    tokio::time::sleep(self.warmup).await;
                }
            })
            .await;
    }

    /// Run `work` with exclusive access to the active device.
    ///
    /// Fails with `NoDevice` without touching any device when none is connected.
    pub async fn with_session<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let active = self.registry.active_device().await?.ok_or(ProviderError::NoDevice)?;
        debug!("Routing session to {}", active.info.name());
        active.queue.with_session(work).await
    }
}
