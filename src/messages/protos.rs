//! Protobuf payloads of the device messages this crate exchanges.
//!
//! Field numbers follow the device's `messages.proto` / `messages-ethereum.proto`
//! (legacy, proto2). Unknown fields in replies are skipped by prost.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PinMatrixRequestType {
    Current = 1,
    NewFirst = 2,
    NewSecond = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Initialize {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetFeatures {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Features {
    #[prost(string, optional, tag = "1")]
    pub vendor: Option<String>,
    #[prost(uint32, optional, tag = "2")]
    pub major_version: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub minor_version: Option<u32>,
    #[prost(uint32, optional, tag = "4")]
    pub patch_version: Option<u32>,
    #[prost(bool, optional, tag = "5")]
    pub bootloader_mode: Option<bool>,
    #[prost(string, optional, tag = "6")]
    pub device_id: Option<String>,
    #[prost(bool, optional, tag = "7")]
    pub pin_protection: Option<bool>,
    #[prost(bool, optional, tag = "8")]
    pub passphrase_protection: Option<bool>,
    #[prost(string, optional, tag = "10")]
    pub label: Option<String>,
    #[prost(bool, optional, tag = "12")]
    pub initialized: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Success {
    #[prost(string, optional, tag = "1")]
    pub message: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Failure {
    #[prost(int32, optional, tag = "1")]
    pub code: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub message: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Cancel {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ButtonRequest {
    #[prost(int32, optional, tag = "1")]
    pub code: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub data: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ButtonAck {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PinMatrixRequest {
    #[prost(enumeration = "PinMatrixRequestType", optional, tag = "1")]
    pub r#type: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PinMatrixAck {
    #[prost(string, required, tag = "1")]
    pub pin: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PassphraseRequest {
    #[prost(bool, optional, tag = "1")]
    pub on_device: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PassphraseAck {
    #[prost(string, optional, tag = "1")]
    pub passphrase: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EthereumGetAddress {
    #[prost(uint32, repeated, packed = "false", tag = "1")]
    pub address_n: Vec<u32>,
    #[prost(bool, optional, tag = "2")]
    pub show_display: Option<bool>,
}

/// Address reply. Older firmware fills `old_address` with the 20 raw bytes,
/// newer firmware sends the checksummed string in `address`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EthereumAddress {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub old_address: Option<Vec<u8>>,
    #[prost(string, optional, tag = "2")]
    pub address: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EthereumSignTx {
    #[prost(uint32, repeated, packed = "false", tag = "1")]
    pub address_n: Vec<u32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub nonce: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub gas_price: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub gas_limit: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub to: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "6")]
    pub value: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub data_initial_chunk: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "8")]
    pub data_length: Option<u32>,
    #[prost(uint32, optional, tag = "9")]
    pub chain_id: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EthereumTxRequest {
    #[prost(uint32, optional, tag = "1")]
    pub data_length: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub signature_v: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub signature_r: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub signature_s: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EthereumTxAck {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub data_chunk: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EthereumSignMessage {
    #[prost(uint32, repeated, packed = "false", tag = "1")]
    pub address_n: Vec<u32>,
    #[prost(bytes = "vec", required, tag = "2")]
    pub message: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EthereumMessageSignature {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub old_address: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub signature: Option<Vec<u8>>,
    #[prost(string, optional, tag = "3")]
    pub address: Option<String>,
}
