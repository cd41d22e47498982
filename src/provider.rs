//! The wallet-facing surface: an async provider contract and a callback adapter over it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ProviderConfig;
use crate::device_registry::{AcquirePolicy, AutoApprove, DeviceRegistry, RegistryHandle, RegistryOptions};
use crate::error::{ProviderError, Result};
use crate::executor::SessionExecutor;
use crate::path::DerivationPath;
use crate::pin::{PinProvider, StdinPinProvider};
use crate::pipeline::{MsgParams, SigningPipeline, TxParams};

/// What a wallet needs from a signer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Accounts as `0x`-prefixed lowercase addresses.
    async fn get_accounts(&self) -> Result<Vec<String>>;

    /// Signed transaction as `0x`-prefixed RLP hex.
    async fn sign_transaction(&self, params: &TxParams) -> Result<String>;

    /// Signature as `0x` + r + s + recovery id.
    async fn sign_personal_message(&self, params: &MsgParams) -> Result<String>;
}

/// Provider backed by the first connected Trezor.
///
/// Must be created inside a tokio runtime; the registry task is spawned on it.
#[derive(Clone)]
pub struct TrezorProvider {
    pipeline: Arc<SigningPipeline>,
    registry: RegistryHandle,
}

impl TrezorProvider {
    /// PIN prompts are read from stdin.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Self::with_pin_provider(config, Arc::new(StdinPinProvider))
    }

    pub fn with_pin_provider(config: ProviderConfig, pin: Arc<dyn PinProvider>) -> Result<Self> {
        let acquire = Arc::new(AutoApprove::new(config.acquire_delay()));
        Self::with_parts(config, pin, acquire)
    }

    pub fn with_parts(
        config: ProviderConfig,
        pin: Arc<dyn PinProvider>,
        acquire: Arc<dyn AcquirePolicy>,
    ) -> Result<Self> {
        let path = config.validate()?;
        info!("Creating Trezor provider for path {}", path);

        let registry = DeviceRegistry::spawn(RegistryOptions {
            pin,
            acquire,
            operation_timeout: config.operation_timeout(),
        });
        let executor = SessionExecutor::new(registry.clone(), config.warmup());
        let pipeline = SigningPipeline::new(executor, path, config.chain_id);

        Ok(Self {
            pipeline: Arc::new(pipeline),
            registry,
        })
    }

    /// Where the hot-plug layer reports devices.
    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn pipeline(&self) -> &SigningPipeline {
        &self.pipeline
    }

    /// Switch to another derivation path.
    pub fn reconfigure(&self, path: &str) -> Result<()> {
        let path: DerivationPath = path.parse()?;
        self.pipeline.reconfigure(path);
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

#[async_trait]
impl WalletProvider for TrezorProvider {
    async fn get_accounts(&self) -> Result<Vec<String>> {
        self.pipeline.get_accounts().await
    }

    async fn sign_transaction(&self, params: &TxParams) -> Result<String> {
        self.pipeline.sign_transaction(params).await
    }

    async fn sign_personal_message(&self, params: &MsgParams) -> Result<String> {
        self.pipeline.sign_personal_message(params).await
    }
}

/// Adapts a [`WalletProvider`] to callback-style consumers. Each call runs on
/// the current tokio runtime and invokes its callback exactly once, error
/// first: exactly one of the two arguments is `Some`.
pub struct CallbackProvider<P> {
    inner: Arc<P>,
}

impl<P> Clone for CallbackProvider<P> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<P: WalletProvider + 'static> CallbackProvider<P> {
    pub fn new(inner: P) -> Self {
        Self { inner: Arc::new(inner) }
    }

    pub fn get_accounts<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Option<ProviderError>, Option<Vec<String>>) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { complete(inner.get_accounts().await, callback) })
    }

    pub fn sign_transaction<F>(&self, params: TxParams, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Option<ProviderError>, Option<String>) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { complete(inner.sign_transaction(&params).await, callback) })
    }

    pub fn sign_personal_message<F>(&self, params: MsgParams, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Option<ProviderError>, Option<String>) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { complete(inner.sign_personal_message(&params).await, callback) })
    }
}

fn complete<T, F>(result: Result<T>, callback: F)
where
    F: FnOnce(Option<ProviderError>, Option<T>),
{
    match result {
        Ok(value) => callback(None, Some(value)),
        Err(e) => callback(Some(e), None),
    }
}
