//! Typed device operations, run while the device worker holds the transport.

use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};
use crate::messages::{
    EthereumGetAddress, EthereumSignMessage, EthereumSignTx, EthereumTxAck, Features, Initialize,
    Message,
};
use crate::path::DerivationPath;
use crate::pin::PinProvider;
use crate::transport::{interaction_handler, ProtocolAdapter};

/// Largest data chunk the device accepts in one message.
const DATA_CHUNK_SIZE: usize = 1024;

/// Transaction fields as sent to the device: normalized hex, no prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnsignedTx {
    pub nonce: Option<String>,
    pub gas_price: Option<String>,
    pub gas_limit: Option<String>,
    pub to: Option<String>,
    pub value: Option<String>,
    pub data: Option<String>,
}

/// Signature over a transaction. `v` is exactly what the device returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignature {
    pub v: u32,
    pub r: String,
    pub s: String,
}

/// Signature over a personal message. `v` is the decimal recovery code (27/28).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSignature {
    pub address: Option<String>,
    pub v: String,
    pub r: String,
    pub s: String,
}

/// Exclusive access to one device for the duration of a queued job.
pub struct Session {
    transport: Box<dyn ProtocolAdapter + Send>,
    pin: Arc<dyn PinProvider>,
}

impl Session {
    pub fn new(transport: Box<dyn ProtocolAdapter + Send>, pin: Arc<dyn PinProvider>) -> Self {
        Self { transport, pin }
    }

    /// Send `msg` and answer button/PIN/passphrase prompts until the real reply arrives.
    pub fn call(&mut self, msg: Message) -> Result<Message> {
        let pin = self.pin.as_ref();
        let handler = move |m: &Message| interaction_handler(m, pin);
        let mut adapter = self.transport.with_handler(&handler);
        adapter.handle(msg)
    }

    pub fn get_features(&mut self) -> Result<Features> {
        match self.call(Initialize {}.into())? {
            Message::Features(features) => Ok(features),
            other => Err(unexpected("Initialize", &other)),
        }
    }

    /// Address at `path` as 40 lowercase hex characters without prefix.
    pub fn ethereum_get_address(&mut self, path: &DerivationPath, show_display: bool) -> Result<String> {
        let request = EthereumGetAddress {
            address_n: path.to_vec(),
            show_display: Some(show_display),
        };

        let reply = match self.call(request.into())? {
            Message::EthereumAddress(reply) => reply,
            other => return Err(unexpected("EthereumGetAddress", &other)),
        };

        let address = match (reply.old_address, reply.address) {
            (Some(raw), _) if !raw.is_empty() => hex::encode(raw),
            (_, Some(text)) => crate::hex_util::strip_hex_prefix(&text).to_ascii_lowercase(),
            _ => return Err(ProviderError::Protocol("device returned no address".to_string())),
        };

        if address.len() != 40 || !address.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProviderError::Protocol(format!(
                "device returned malformed address '{}'",
                address
            )));
        }

        Ok(address)
    }

    /// Sign a legacy transaction, streaming `data` in chunks as the device asks for it.
    pub fn ethereum_sign_tx(
        &mut self,
        path: &DerivationPath,
        tx: &UnsignedTx,
        chain_id: Option<u32>,
    ) -> Result<TxSignature> {
        let data = field_bytes(&tx.data)?;
        let data_length = u32::try_from(data.len())
            .map_err(|_| ProviderError::Format("transaction data too large".to_string()))?;
        let (initial, mut rest) = data.split_at(data.len().min(DATA_CHUNK_SIZE));

        let request = EthereumSignTx {
            address_n: path.to_vec(),
            nonce: non_empty(field_bytes(&tx.nonce)?),
            gas_price: non_empty(field_bytes(&tx.gas_price)?),
            gas_limit: non_empty(field_bytes(&tx.gas_limit)?),
            to: non_empty(field_bytes(&tx.to)?),
            value: non_empty(field_bytes(&tx.value)?),
            data_initial_chunk: non_empty(initial.to_vec()),
            data_length: (data_length > 0).then_some(data_length),
            chain_id,
        };

        let mut reply = self.call(request.into())?;
        loop {
            let req = match reply {
                Message::EthereumTxRequest(req) => req,
                other => return Err(unexpected("EthereumSignTx", &other)),
            };

            match req.data_length {
                Some(len) if len > 0 => {
                    let len = len as usize;
                    if len > rest.len() {
                        return Err(ProviderError::Protocol(format!(
                            "device asked for {} more data bytes, only {} left",
                            len,
                            rest.len()
                        )));
                    }
                    let (chunk, remaining) = rest.split_at(len);
                    rest = remaining;
                    info!("Session: sending {} byte data chunk", chunk.len());
                    reply = self.call(EthereumTxAck { data_chunk: Some(chunk.to_vec()) }.into())?;
                }
                _ => {
                    let v = req.signature_v.ok_or_else(|| missing("signature_v"))?;
                    let r = req.signature_r.ok_or_else(|| missing("signature_r"))?;
                    let s = req.signature_s.ok_or_else(|| missing("signature_s"))?;
                    return Ok(TxSignature {
                        v,
                        r: hex::encode(r),
                        s: hex::encode(s),
                    });
                }
            }
        }
    }

    /// Sign `message` with the personal-message prefix applied by the device.
    pub fn ethereum_sign_message(&mut self, path: &DerivationPath, message: &[u8]) -> Result<MessageSignature> {
        let request = EthereumSignMessage {
            address_n: path.to_vec(),
            message: message.to_vec(),
        };

        let reply = match self.call(request.into())? {
            Message::EthereumMessageSignature(reply) => reply,
            other => return Err(unexpected("EthereumSignMessage", &other)),
        };

        let signature = reply.signature.ok_or_else(|| missing("signature"))?;
        if signature.len() != 65 {
            return Err(ProviderError::Protocol(format!(
                "expected a 65 byte signature, got {}",
                signature.len()
            )));
        }

        let address = match (reply.address, reply.old_address) {
            (Some(text), _) => Some(crate::hex_util::strip_hex_prefix(&text).to_ascii_lowercase()),
            (None, Some(raw)) => Some(hex::encode(raw)),
            (None, None) => None,
        };

        Ok(MessageSignature {
            address,
            r: hex::encode(&signature[..32]),
            s: hex::encode(&signature[32..64]),
            v: signature[64].to_string(),
        })
    }
}

fn field_bytes(field: &Option<String>) -> Result<Vec<u8>> {
    crate::hex_util::to_bytes(field.as_deref())
}

fn non_empty(bytes: Vec<u8>) -> Option<Vec<u8>> {
    (!bytes.is_empty()).then_some(bytes)
}

fn missing(field: &str) -> ProviderError {
    ProviderError::Protocol(format!("device reply is missing {}", field))
}

fn unexpected(request: &str, reply: &Message) -> ProviderError {
    ProviderError::Protocol(format!(
        "unexpected response to {}: {:?}",
        request,
        reply.message_type()
    ))
}
