//! In-memory device speaking the framed message protocol.
//!
//! Used by the `trezor-provider` binary for dry runs and by the test suite.
//! Signatures are fixed byte patterns, not real ECDSA.

use std::collections::VecDeque;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;

use super::{ProtocolAdapter, Transport};
use crate::device::{DeviceInfo, DeviceLink};
use crate::error::{ProviderError, Result};
use crate::messages::{
    ButtonRequest, EthereumAddress, EthereumMessageSignature, EthereumTxRequest, Failure, Features,
    Message, PinMatrixRequest, PinMatrixRequestType,
};

const MAX_DATA_CHUNK: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("device disconnected")]
    Disconnected,
    #[error("no reply pending")]
    NothingToRead,
    #[error("malformed frame: {0}")]
    Frame(String),
}

/// How the emulated device answers.
#[derive(Debug, Clone)]
pub struct EmulatorBehaviour {
    pub address: [u8; 20],
    pub tx_signature_v: u32,
    pub tx_signature_r: [u8; 32],
    pub tx_signature_s: [u8; 32],
    /// 65 bytes, `r ‖ s ‖ v`.
    pub message_signature: Vec<u8>,
    /// Ask for this PIN before the first sensitive reply.
    pub pin: Option<String>,
    /// Ask for a button press before signing.
    pub confirm_with_button: bool,
    /// Answer every signing request with `Failure(reason)`.
    pub reject_with: Option<String>,
}

impl Default for EmulatorBehaviour {
    fn default() -> Self {
        let mut message_signature = vec![0x11; 32];
        message_signature.extend_from_slice(&[0x22; 32]);
        message_signature.push(28);

        Self {
            address: [
                0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45,
                0x67, 0x89, 0xab, 0xcd, 0xef, 0x01,
            ],
            tx_signature_v: 28,
            tx_signature_r: [0x5a; 32],
            tx_signature_s: [0x3c; 32],
            message_signature,
            pin: None,
            confirm_with_button: true,
            reject_with: None,
        }
    }
}

/// Shared between the device and every transport opened on it.
#[derive(Debug, Default)]
struct EmulatorState {
    unlocked: bool,
    requests: Vec<Message>,
    opened: usize,
    stolen: usize,
}

/// A device the registry can connect to without any hardware attached.
pub struct EmulatedDevice {
    info: DeviceInfo,
    behaviour: EmulatorBehaviour,
    state: Arc<Mutex<EmulatorState>>,
    stall: Option<Arc<Mutex<Receiver<()>>>>,
}

impl EmulatedDevice {
    pub fn new(info: DeviceInfo, behaviour: EmulatorBehaviour) -> Self {
        Self {
            info,
            behaviour,
            state: Arc::new(Mutex::new(EmulatorState::default())),
            stall: None,
        }
    }

    /// Block every read until `gate` yields a value; a dropped sender
    /// makes the read fail as if the cable was pulled.
    pub fn with_stall(mut self, gate: Receiver<()>) -> Self {
        self.stall = Some(Arc::new(Mutex::new(gate)));
        self
    }

    /// Messages the device has received so far, in order.
    pub fn requests(&self) -> Vec<Message> {
        self.state.lock().map(|s| s.requests.clone()).unwrap_or_default()
    }

    /// Number of transports opened on this device.
    pub fn open_count(&self) -> usize {
        self.state.lock().map(|s| s.opened).unwrap_or_default()
    }

    pub fn steal_count(&self) -> usize {
        self.state.lock().map(|s| s.stolen).unwrap_or_default()
    }
}

impl DeviceLink for EmulatedDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn open(&self) -> Result<Box<dyn ProtocolAdapter + Send>> {
        let mut state = self.state.lock().map_err(|e| ProviderError::Transport(e.to_string()))?;
        state.opened += 1;
        Ok(Box::new(EmulatedTransport {
            info: self.info.clone(),
            behaviour: self.behaviour.clone(),
            state: Arc::clone(&self.state),
            stall: self.stall.clone(),
            replies: VecDeque::new(),
            deferred: None,
            data_remaining: 0,
        }))
    }

    fn steal(&self) -> Result<()> {
        let mut state = self.state.lock().map_err(|e| ProviderError::Transport(e.to_string()))?;
        state.stolen += 1;
        Ok(())
    }
}

pub struct EmulatedTransport {
    info: DeviceInfo,
    behaviour: EmulatorBehaviour,
    state: Arc<Mutex<EmulatorState>>,
    stall: Option<Arc<Mutex<Receiver<()>>>>,
    replies: VecDeque<Message>,
    // Reply held back until a PIN or button round trip completes.
    deferred: Option<(Message, bool)>,
    data_remaining: usize,
}

impl EmulatedTransport {
    fn unlocked(&self) -> bool {
        self.behaviour.pin.is_none() || self.state.lock().map(|s| s.unlocked).unwrap_or(false)
    }

    fn deliver(&mut self, reply: Message, needs_button: bool) {
        if !self.unlocked() {
            self.deferred = Some((reply, needs_button));
            self.replies.push_back(
                PinMatrixRequest { r#type: Some(PinMatrixRequestType::Current as i32) }.into(),
            );
        } else if needs_button && self.behaviour.confirm_with_button {
            self.deferred = Some((reply, false));
            self.replies.push_back(ButtonRequest { code: Some(8), data: None }.into());
        } else {
            self.replies.push_back(reply);
        }
    }

    fn signing_reply(&mut self, reply: Message) {
        match &self.behaviour.reject_with {
            Some(reason) => self.replies.push_back(failure(reason)),
            None => self.deliver(reply, true),
        }
    }

    fn tx_request(&mut self) -> Message {
        if self.data_remaining > 0 {
            let next = self.data_remaining.min(MAX_DATA_CHUNK);
            EthereumTxRequest { data_length: Some(next as u32), ..Default::default() }.into()
        } else {
            EthereumTxRequest {
                data_length: None,
                signature_v: Some(self.behaviour.tx_signature_v),
                signature_r: Some(self.behaviour.tx_signature_r.to_vec()),
                signature_s: Some(self.behaviour.tx_signature_s.to_vec()),
            }
            .into()
        }
    }

    fn respond(&mut self, msg: Message) {
        match msg {
            Message::Initialize(_) | Message::GetFeatures(_) => {
                let features = Features {
                    vendor: Some("trezor.io".to_string()),
                    major_version: Some(1),
                    minor_version: Some(12),
                    patch_version: Some(1),
                    bootloader_mode: Some(self.info.bootloader_mode),
                    device_id: Some(self.info.unique_id.clone()),
                    pin_protection: Some(self.behaviour.pin.is_some()),
                    passphrase_protection: Some(false),
                    label: self.info.label.clone(),
                    initialized: Some(true),
                };
                self.replies.push_back(features.into());
            }
            Message::PinMatrixAck(ack) => {
                if Some(&ack.pin) == self.behaviour.pin.as_ref() {
                    if let Ok(mut state) = self.state.lock() {
                        state.unlocked = true;
                    }
                    if let Some((reply, needs_button)) = self.deferred.take() {
                        self.deliver(reply, needs_button);
                    }
                } else {
                    self.deferred = None;
                    self.replies.push_back(failure("PIN invalid"));
                }
            }
            Message::ButtonAck(_) => match self.deferred.take() {
                Some((reply, _)) => self.deliver(reply, false),
                None => self.replies.push_back(failure("Unexpected ButtonAck")),
            },
            Message::EthereumGetAddress(req) => {
                let reply = EthereumAddress {
                    old_address: Some(self.behaviour.address.to_vec()),
                    address: None,
                };
                self.deliver(reply.into(), req.show_display == Some(true));
            }
            Message::EthereumSignTx(req) => {
                let total = req.data_length.unwrap_or(0) as usize;
                let initial = req.data_initial_chunk.as_ref().map_or(0, Vec::len);
                self.data_remaining = total.saturating_sub(initial);
                if self.data_remaining > 0 {
                    let next = self.tx_request();
                    self.replies.push_back(next);
                } else {
                    let reply = self.tx_request();
                    self.signing_reply(reply);
                }
            }
            Message::EthereumTxAck(ack) => {
                let chunk = ack.data_chunk.as_ref().map_or(0, Vec::len);
                self.data_remaining = self.data_remaining.saturating_sub(chunk);
                let reply = self.tx_request();
                if self.data_remaining > 0 {
                    self.replies.push_back(reply);
                } else {
                    self.signing_reply(reply);
                }
            }
            Message::EthereumSignMessage(_) => {
                let reply = EthereumMessageSignature {
                    old_address: None,
                    signature: Some(self.behaviour.message_signature.clone()),
                    address: Some(format!("0x{}", hex::encode(self.behaviour.address))),
                };
                self.signing_reply(reply.into());
            }
            other => {
                self.replies
                    .push_back(failure(&format!("Unexpected message {:?}", other.message_type())));
            }
        }
    }
}

fn failure(reason: &str) -> Message {
    Failure { code: Some(99), message: Some(reason.to_string()) }.into()
}

impl Transport for EmulatedTransport {
    type Error = EmulatorError;

    fn write(&mut self, msg: &[u8], _timeout: Duration) -> std::result::Result<usize, Self::Error> {
        let decoded = Message::decode(&mut &msg[..]).map_err(|e| EmulatorError::Frame(e.to_string()))?;
        debug!("EmulatedTransport: received {:?}", decoded.message_type());
        if let Ok(mut state) = self.state.lock() {
            state.requests.push(decoded.clone());
        }
        self.respond(decoded);
        Ok(msg.len())
    }

    fn read(&mut self, buf: &mut Vec<u8>, _timeout: Duration) -> std::result::Result<(), Self::Error> {
        if let Some(stall) = &self.stall {
            let gate = stall.lock().map_err(|_| EmulatorError::Disconnected)?;
            gate.recv().map_err(|_| EmulatorError::Disconnected)?;
        }
        let reply = self.replies.pop_front().ok_or(EmulatorError::NothingToRead)?;
        reply.encode(buf).map_err(|e| EmulatorError::Frame(e.to_string()))
    }

    fn reset(&mut self) -> std::result::Result<(), Self::Error> {
        self.replies.clear();
        self.deferred = None;
        self.data_remaining = 0;
        Ok(())
    }
}
