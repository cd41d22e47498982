#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use trezor_provider::device::DeviceInfo;
use trezor_provider::pin::FixedPinProvider;
use trezor_provider::transport::{EmulatedDevice, EmulatorBehaviour};
use trezor_provider::{ProviderConfig, TrezorProvider};

pub const ADDRESS: &str = "0xabcdef0123456789abcdef0123456789abcdef01";

pub fn provider() -> TrezorProvider {
    provider_with(ProviderConfig {
        warmup_ms: 0,
        acquire_delay_ms: 0,
        chain_id: Some(1),
        ..Default::default()
    })
}

pub fn provider_with(config: ProviderConfig) -> TrezorProvider {
    TrezorProvider::with_pin_provider(config, Arc::new(FixedPinProvider::new("1234")))
        .expect("valid test configuration")
}

pub fn device(id: &str) -> Arc<EmulatedDevice> {
    device_with(id, EmulatorBehaviour::default())
}

pub fn device_with(id: &str, behaviour: EmulatorBehaviour) -> Arc<EmulatedDevice> {
    Arc::new(EmulatedDevice::new(DeviceInfo::new(id, Some(format!("Trezor {}", id)), false), behaviour))
}

pub fn bootloader_device(id: &str) -> Arc<EmulatedDevice> {
    Arc::new(EmulatedDevice::new(DeviceInfo::new(id, None, true), EmulatorBehaviour::default()))
}

/// Wait until `device` has received at least one message.
pub async fn wait_for_request(device: &EmulatedDevice) {
    for _ in 0..200 {
        if !device.requests().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("device never received a request");
}
