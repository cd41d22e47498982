//! Headless wallet-provider bridge for Trezor hardware wallets.

pub mod config;
pub mod device;
pub mod device_queue;
pub mod device_registry;
pub mod error;
pub mod executor;
pub mod hex_util;
pub mod logging;
pub mod messages;
pub mod path;
pub mod pin;
pub mod pipeline;
pub mod provider;
pub mod session;
pub mod transaction;
pub mod transport;

pub use config::ProviderConfig;
pub use device::{DeviceInfo, DeviceLink};
pub use device_registry::{AcquirePolicy, AutoApprove, DeviceEvent, RegistryHandle};
pub use error::{ProviderError, Result};
pub use path::DerivationPath;
pub use pipeline::{MsgParams, TxParams};
pub use provider::{CallbackProvider, TrezorProvider, WalletProvider};
pub use transaction::SignedLegacyTransaction;
