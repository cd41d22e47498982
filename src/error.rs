use thiserror::Error;

/// Errors surfaced by the provider, the device queue and the device session.
///
/// Device and session failures are passed through to the caller unchanged;
/// nothing in this crate retries on its own.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Malformed derivation path or invalid configuration value.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// An operation needed a device but none is connected.
    #[error("no device connected")]
    NoDevice,

    /// The device connected in bootloader mode and cannot sign.
    #[error("device {device_id} is in bootloader mode, re-connect it")]
    BootloaderMode { device_id: String },

    /// The device went away while the operation was queued or running.
    #[error("device {device_id} is no longer available")]
    DeviceUnavailable { device_id: String },

    /// The device answered with a `Failure` message.
    #[error("device rejected the request: {0}")]
    DeviceRejected(String),

    /// Malformed hex input.
    #[error("invalid hex value: {0}")]
    Format(String),

    /// Malformed or unexpected reply from the device.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Failure reported by the underlying transport.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("device operation timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl From<hex::FromHexError> for ProviderError {
    fn from(e: hex::FromHexError) -> Self {
        ProviderError::Format(e.to_string())
    }
}

impl From<prost::DecodeError> for ProviderError {
    fn from(e: prost::DecodeError) -> Self {
        ProviderError::Protocol(format!("failed to decode message: {}", e))
    }
}

impl From<prost::EncodeError> for ProviderError {
    fn from(e: prost::EncodeError) -> Self {
        ProviderError::Protocol(format!("failed to encode message: {}", e))
    }
}

impl From<rlp::DecoderError> for ProviderError {
    fn from(e: rlp::DecoderError) -> Self {
        ProviderError::Format(format!("invalid RLP: {}", e))
    }
}
