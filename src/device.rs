use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::transport::ProtocolAdapter;

/// Vendor ID for Trezor One devices
pub const TREZOR_VID: u16 = 0x534c;

/// What the hot-plug layer knows about a connected device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub unique_id: String,
    pub label: Option<String>,
    pub vid: u16,
    pub pid: u16,
    pub bootloader_mode: bool,
}

impl DeviceInfo {
    pub fn new(unique_id: impl Into<String>, label: Option<String>, bootloader_mode: bool) -> Self {
        Self {
            unique_id: unique_id.into(),
            label,
            vid: TREZOR_VID,
            pid: 0x0001,
            bootloader_mode,
        }
    }

    /// Label for log lines.
    pub fn name(&self) -> String {
        match &self.label {
            Some(label) => format!("{} ({})", label, self.unique_id),
            None => format!("Trezor (VID: {:04x}, PID: {:04x}) {}", self.vid, self.pid, self.unique_id),
        }
    }
}

/// A physical device as handed to the registry by the hot-plug layer.
///
/// Both methods block on USB I/O and are only called from blocking threads.
pub trait DeviceLink: Send + Sync + 'static {
    fn info(&self) -> &DeviceInfo;

    /// Open an exclusive transport to the device.
    fn open(&self) -> Result<Box<dyn ProtocolAdapter + Send>>;

    /// Take the device away from whichever process currently holds it.
    fn steal(&self) -> Result<()>;
}
