use std::fmt;
use std::str::FromStr;

use crate::error::{ProviderError, Result};

pub const HARDENED_BIT: u32 = 0x8000_0000;

/// A BIP-32 derivation path as the sequence of `u32` indices sent to the device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    /// Parse a path like `"44'/60'/0'/0"` or `"m/44h/60h/0h/0"`.
    ///
    /// The leading `m/` is optional. Hardened segments are marked with `'`,
    /// `h` or `H`; every index must be below 2^31.
    pub fn parse(path: &str) -> Result<Self> {
        let path = path.trim();
        let body = match path {
            "m" | "M" => return Ok(Self::default()),
            _ => path
                .strip_prefix("m/")
                .or_else(|| path.strip_prefix("M/"))
                .unwrap_or(path),
        };

        if body.is_empty() {
            return Err(ProviderError::Configuration(
                "derivation path is empty".to_string(),
            ));
        }

        let mut segments = Vec::new();
        for component in body.split('/') {
            segments.push(parse_segment(component).map_err(|reason| {
                ProviderError::Configuration(format!(
                    "invalid derivation path '{}': {}",
                    path, reason
                ))
            })?);
        }

        Ok(Self(segments))
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.0.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn parse_segment(component: &str) -> std::result::Result<u32, String> {
    if component.is_empty() {
        return Err("empty segment".to_string());
    }

    let (is_hardened, number_str) = match component.strip_suffix(['\'', 'h', 'H']) {
        Some(rest) => (true, rest),
        None => (false, component),
    };

    if number_str.is_empty() || !number_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{}' is not an index", component));
    }

    let number: u32 = number_str
        .parse()
        .map_err(|_| format!("index '{}' out of range", number_str))?;
    if number >= HARDENED_BIT {
        return Err(format!("index '{}' out of range", number_str));
    }

    Ok(if is_hardened { number | HARDENED_BIT } else { number })
}

impl FromStr for DerivationPath {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for &segment in &self.0 {
            if segment & HARDENED_BIT != 0 {
                write!(f, "/{}'", segment & !HARDENED_BIT)?;
            } else {
                write!(f, "/{}", segment)?;
            }
        }
        Ok(())
    }
}
