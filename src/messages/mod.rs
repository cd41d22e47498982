mod encoding;
mod macros;
mod protos;
mod timeouts;

pub use encoding::HEADER_LEN;
pub use protos::*;

use macros::trezor_message;

trezor_message!(
    // Core device messages
    Initialize = 0,
    Success = 2,
    Failure = 3,
    Features = 17,
    GetFeatures = 55,

    // PIN and passphrase
    PinMatrixRequest = 18,
    PinMatrixAck = 19,
    PassphraseRequest = 41,
    PassphraseAck = 42,

    // User interaction
    Cancel = 20,
    ButtonRequest = 26,
    ButtonAck = 27,

    // Ethereum
    EthereumGetAddress = 56,
    EthereumAddress = 57,
    EthereumSignTx = 58,
    EthereumTxRequest = 59,
    EthereumTxAck = 60,
    EthereumSignMessage = 64,
    EthereumMessageSignature = 66,
);
