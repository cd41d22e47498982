//! Canonical RLP form of a signed pre-EIP-1559 transaction.

use rlp::{Rlp, RlpStream};

use crate::error::{ProviderError, Result};

const FIELD_COUNT: usize = 9;

/// A legacy transaction plus the device's signature, ready for broadcast.
///
/// Quantities (`nonce`, `gas_price`, `gas_limit`, `value`, `r`, `s`) are
/// big-endian bytes; leading zeros are dropped when encoding, so zero encodes
/// as the empty string. `to` and `data` are encoded as given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedLegacyTransaction {
    pub nonce: Vec<u8>,
    pub gas_price: Vec<u8>,
    pub gas_limit: Vec<u8>,
    pub to: Vec<u8>,
    pub value: Vec<u8>,
    pub data: Vec<u8>,
    pub v: u32,
    pub r: Vec<u8>,
    pub s: Vec<u8>,
}

impl SignedLegacyTransaction {
    /// `[nonce, gasPrice, gasLimit, to, value, data, v, r, s]`
    pub fn rlp_bytes(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(FIELD_COUNT);
        stream.append(&quantity(&self.nonce));
        stream.append(&quantity(&self.gas_price));
        stream.append(&quantity(&self.gas_limit));
        stream.append(&self.to);
        stream.append(&quantity(&self.value));
        stream.append(&self.data);
        stream.append(&self.v);
        stream.append(&quantity(&self.r));
        stream.append(&quantity(&self.s));
        stream.out().to_vec()
    }

    /// `0x`-prefixed lowercase hex of [`rlp_bytes`](Self::rlp_bytes).
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.rlp_bytes()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let rlp = Rlp::new(bytes);
        if !rlp.is_list() {
            return Err(ProviderError::Format("signed transaction is not an RLP list".to_string()));
        }
        let count = rlp.item_count()?;
        if count != FIELD_COUNT {
            return Err(ProviderError::Format(format!(
                "expected {} transaction fields, found {}",
                FIELD_COUNT, count
            )));
        }

        Ok(Self {
            nonce: rlp.val_at(0)?,
            gas_price: rlp.val_at(1)?,
            gas_limit: rlp.val_at(2)?,
            to: rlp.val_at(3)?,
            value: rlp.val_at(4)?,
            data: rlp.val_at(5)?,
            v: rlp.val_at(6)?,
            r: rlp.val_at(7)?,
            s: rlp.val_at(8)?,
        })
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        Self::decode(&hex::decode(crate::hex_util::strip_hex_prefix(hex))?)
    }
}

fn quantity(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SignedLegacyTransaction {
        SignedLegacyTransaction {
            nonce: vec![0x09],
            gas_price: hex::decode("04a817c800").unwrap(),
            gas_limit: hex::decode("5208").unwrap(),
            to: hex::decode("3535353535353535353535353535353535353535").unwrap(),
            value: hex::decode("0de0b6b3a7640000").unwrap(),
            data: Vec::new(),
            v: 37,
            r: hex::decode("28ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276").unwrap(),
            s: hex::decode("67cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83").unwrap(),
        }
    }

    #[test]
    fn encodes_known_signed_transaction() {
        // EIP-155 reference transaction, chain id 1.
        assert_eq!(
            sample().to_hex(),
            "0xf86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a0\
             28ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a0\
             67cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
    }

    #[test]
    fn quantities_lose_leading_zeros() {
        let tx = SignedLegacyTransaction {
            nonce: vec![0x00],
            value: vec![0x00, 0x00, 0x01],
            r: vec![0x00, 0xaa],
            v: 27,
            ..sample()
        };
        let decoded = SignedLegacyTransaction::decode(&tx.rlp_bytes()).unwrap();
        assert!(decoded.nonce.is_empty());
        assert_eq!(decoded.value, vec![0x01]);
        assert_eq!(decoded.r, vec![0xaa]);
        assert_eq!(decoded.v, 27);
        assert_eq!(decoded.to, tx.to);
    }

    #[test]
    fn decodes_hex_with_prefix() {
        let decoded = SignedLegacyTransaction::from_hex(&sample().to_hex()).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn rejects_wrong_field_count() {
        let mut stream = RlpStream::new_list(2);
        stream.append(&1u8);
        stream.append(&2u8);
        let err = SignedLegacyTransaction::decode(&stream.out()).unwrap_err();
        assert!(matches!(err, ProviderError::Format(_)));
    }
}
