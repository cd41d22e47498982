//! Wallet requests in, device calls through the session executor, wallet-ready encodings out.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use crate::error::{ProviderError, Result};
use crate::executor::SessionExecutor;
use crate::hex_util::{normalize_hex, strip_hex_prefix, to_bytes};
use crate::path::DerivationPath;
use crate::session::UnsignedTx;
use crate::transaction::SignedLegacyTransaction;

/// Recovery codes above this would not fit the two-digit suffix.
const MAX_RECOVERY_CODE: u32 = 27 + 0xff;

/// Transaction as handed over by the wallet consumer. Every field is an
/// optional hex string; `from` is accepted and ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxParams {
    pub from: Option<String>,
    pub nonce: Option<String>,
    pub gas_price: Option<String>,
    pub gas: Option<String>,
    pub to: Option<String>,
    pub value: Option<String>,
    pub data: Option<String>,
}

/// Personal message to sign. `data` is the hex-encoded payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MsgParams {
    pub data: String,
    pub from: Option<String>,
}

pub struct SigningPipeline {
    executor: SessionExecutor,
    path: watch::Sender<DerivationPath>,
    chain_id: Option<u32>,
}

impl SigningPipeline {
    pub fn new(executor: SessionExecutor, path: DerivationPath, chain_id: Option<u32>) -> Self {
        let (path, _) = watch::channel(path);
        Self { executor, path, chain_id }
    }

    pub fn path(&self) -> DerivationPath {
        self.path.borrow().clone()
    }

    /// Observe path changes made through [`reconfigure`](Self::reconfigure).
    pub fn subscribe_path(&self) -> watch::Receiver<DerivationPath> {
        self.path.subscribe()
    }

    /// Replace the derivation path. Operations already started keep theirs.
    pub fn reconfigure(&self, path: DerivationPath) {
        info!("Derivation path set to {}", path);
        self.path.send_replace(path);
    }

    /// The single account at the configured path, as `0x` + 40 lowercase hex.
    #[instrument(level = "info", skip(self))]
    pub async fn get_accounts(&self) -> Result<Vec<String>> {
        self.executor.settle_once().await;

        let path = self.path();
        let address = self
            .executor
            .with_session(move |session| session.ethereum_get_address(&path, false))
            .await?;

        debug!("Device reported address 0x{}", address);
        Ok(vec![format!("0x{}", address)])
    }

    /// Sign a legacy transaction and return its RLP serialization as `0x` hex.
    #[instrument(level = "info", skip(self, params))]
    pub async fn sign_transaction(&self, params: &TxParams) -> Result<String> {
        let unsigned = UnsignedTx {
            nonce: normalize_hex(params.nonce.as_deref()),
            gas_price: normalize_hex(params.gas_price.as_deref()),
            gas_limit: normalize_hex(params.gas.as_deref()),
            to: normalize_hex(params.to.as_deref()),
            value: normalize_hex(params.value.as_deref()),
            data: normalize_hex(params.data.as_deref()),
        };

        // Decode up front so malformed input never reaches the device.
        let mut signed = SignedLegacyTransaction {
            nonce: to_bytes(unsigned.nonce.as_deref())?,
            gas_price: to_bytes(unsigned.gas_price.as_deref())?,
            gas_limit: to_bytes(unsigned.gas_limit.as_deref())?,
            to: to_bytes(unsigned.to.as_deref())?,
            value: to_bytes(unsigned.value.as_deref())?,
            data: to_bytes(unsigned.data.as_deref())?,
            ..Default::default()
        };

        let path = self.path();
        let chain_id = self.chain_id;
        let signature = self
            .executor
            .with_session(move |session| session.ethereum_sign_tx(&path, &unsigned, chain_id))
            .await?;

        signed.v = signature.v;
        signed.r = hex::decode(&signature.r)?;
        signed.s = hex::decode(&signature.s)?;

        Ok(signed.to_hex())
    }

    /// Sign a personal message; the result is `0x` + r + s + two-digit recovery id.
    #[instrument(level = "info", skip(self, params))]
    pub async fn sign_personal_message(&self, params: &MsgParams) -> Result<String> {
        let message = hex::decode(strip_hex_prefix(&params.data))
            .map_err(|e| ProviderError::Format(format!("message payload: {}", e)))?;

        let path = self.path();
        let signature = self
            .executor
            .with_session(move |session| session.ethereum_sign_message(&path, &message))
            .await?;

        let recovery = recovery_id_hex(&signature.v)?;
        Ok(format!("0x{}{}{}", signature.r, signature.s, recovery))
    }
}

/// Turn the device's decimal recovery code (27/28) into the two hex digits
/// appended to a message signature.
pub fn recovery_id_hex(v: &str) -> Result<String> {
    let code: u32 = v
        .trim()
        .parse()
        .map_err(|_| ProviderError::Protocol(format!("recovery code '{}' is not a number", v)))?;
    if !(27..=MAX_RECOVERY_CODE).contains(&code) {
        return Err(ProviderError::Protocol(format!("recovery code {} out of range", code)));
    }
    Ok(format!("{:02x}", code - 27))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::device::DeviceInfo;
    use crate::device_registry::{AutoApprove, DeviceRegistry, RegistryOptions};
    use crate::messages::Message;
    use crate::pin::FixedPinProvider;
    use crate::transport::{EmulatedDevice, EmulatorBehaviour};

    async fn pipeline_with(device: Option<Arc<EmulatedDevice>>) -> SigningPipeline {
        let registry = DeviceRegistry::spawn(RegistryOptions {
            pin: Arc::new(FixedPinProvider::new("")),
            acquire: Arc::new(AutoApprove::new(Duration::ZERO)),
            operation_timeout: None,
        });
        if let Some(device) = device {
            registry.connect(device).await.unwrap();
        }
        let executor = SessionExecutor::new(registry, Duration::ZERO);
        SigningPipeline::new(executor, DerivationPath::parse("44'/60'/0'/0").unwrap(), Some(1))
    }

    fn emulator(behaviour: EmulatorBehaviour) -> Arc<EmulatedDevice> {
        Arc::new(EmulatedDevice::new(DeviceInfo::new("pipe", None, false), behaviour))
    }

    #[test]
    fn recovery_codes_become_two_hex_digits() {
        assert_eq!(recovery_id_hex("28").unwrap(), "01");
        assert_eq!(recovery_id_hex("27").unwrap(), "00");
        assert_eq!(recovery_id_hex("43").unwrap(), "10");
        assert!(matches!(recovery_id_hex("26"), Err(ProviderError::Protocol(_))));
        assert!(matches!(recovery_id_hex("283"), Err(ProviderError::Protocol(_))));
        assert!(matches!(recovery_id_hex("x"), Err(ProviderError::Protocol(_))));
    }

    #[test]
    fn tx_params_use_camel_case() {
        let params: TxParams = serde_json::from_str(
            r#"{"from":"0x01","nonce":"0x1","gasPrice":"0x2","gas":"0x5208","to":"0x35","value":"0x0"}"#,
        )
        .unwrap();
        assert_eq!(params.gas_price.as_deref(), Some("0x2"));
        assert_eq!(params.gas.as_deref(), Some("0x5208"));
        assert_eq!(params.data, None);
    }

    #[tokio::test]
    async fn malformed_hex_never_reaches_the_device() {
        let device = emulator(EmulatorBehaviour::default());
        let pipeline = pipeline_with(Some(device.clone())).await;

        let params = TxParams { nonce: Some("0xzz".into()), ..Default::default() };
        let err = pipeline.sign_transaction(&params).await.unwrap_err();
        assert!(matches!(err, ProviderError::Format(_)));

        let msg = MsgParams { data: "0x123".into(), from: None };
        let err = pipeline.sign_personal_message(&msg).await.unwrap_err();
        assert!(matches!(err, ProviderError::Format(_)));

        assert!(device.requests().is_empty());
    }

    #[tokio::test]
    async fn personal_message_signature_layout() {
        let pipeline = pipeline_with(Some(emulator(EmulatorBehaviour::default()))).await;
        let msg = MsgParams { data: hex::encode("hello"), from: None };
        let signature = pipeline.sign_personal_message(&msg).await.unwrap();
        assert_eq!(signature, format!("0x{}{}01", "11".repeat(32), "22".repeat(32)));
    }

    #[tokio::test]
    async fn device_rejection_is_passed_through() {
        let behaviour = EmulatorBehaviour {
            reject_with: Some("Action cancelled by user".into()),
            ..Default::default()
        };
        let pipeline = pipeline_with(Some(emulator(behaviour))).await;
        let msg = MsgParams { data: "00".into(), from: None };
        let err = pipeline.sign_personal_message(&msg).await.unwrap_err();
        assert!(matches!(err, ProviderError::DeviceRejected(ref m) if m == "Action cancelled by user"));
    }

    #[tokio::test]
    async fn reconfigure_changes_the_path_sent_to_the_device() {
        let device = emulator(EmulatorBehaviour::default());
        let pipeline = pipeline_with(Some(device.clone())).await;
        let mut watcher = pipeline.subscribe_path();

        let ledger = DerivationPath::parse("m/44'/60'/1'/0/0").unwrap();
        pipeline.reconfigure(ledger.clone());
        assert!(watcher.has_changed().unwrap());
        assert_eq!(*watcher.borrow_and_update(), ledger);

        pipeline.get_accounts().await.unwrap();
        match device.requests().last() {
            Some(Message::EthereumGetAddress(req)) => assert_eq!(req.address_n, ledger.to_vec()),
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[tokio::test]
    async fn operations_without_a_device_fail() {
        let pipeline = pipeline_with(None).await;
        assert!(matches!(pipeline.get_accounts().await, Err(ProviderError::NoDevice)));
        assert!(matches!(
            pipeline.sign_transaction(&TxParams::default()).await,
            Err(ProviderError::NoDevice)
        ));
    }
}
