//! Chain addresses: 32-byte public keys displayed as bech32 with the `erd`
//! human readable part.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{OpsResult, ResolutionError};

/// Human readable part of every address.
pub const ADDRESS_HRP: &str = "erd";

/// Length of an address in bytes.
pub const ADDRESS_LENGTH: usize = 32;

/// Leading zero bytes shared by every smart contract address.
const CONTRACT_PREFIX_ZEROS: usize = 8;

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const GENERATORS: [u32; 5] = [0x3b6a_57b2, 0x2650_8e6d, 0x1ea1_19fa, 0x3d42_33dd, 0x2a14_62b3];

/// A chain address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LENGTH]);

/// The system contract handling token issuance.
pub const ESDT_SYSTEM_CONTRACT: Address = Address([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 0xff, 0xff,
]);

impl Address {
    /// Creates an address from raw public key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// The all-zero address, receiver of contract deployments.
    #[must_use]
    pub const fn zero() -> Self {
        Self([0; ADDRESS_LENGTH])
    }

    /// Creates an address from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns a parsing error if the slice is not 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> OpsResult<Self> {
        let array: [u8; ADDRESS_LENGTH] = bytes.try_into().map_err(|_| {
            ResolutionError::parsing(format!(
                "address must be {ADDRESS_LENGTH} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Hex form of the public key.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns true for smart contract addresses.
    #[must_use]
    pub fn is_smart_contract(&self) -> bool {
        self.0[..CONTRACT_PREFIX_ZEROS].iter().all(|b| *b == 0)
    }

    /// Encodes the address as bech32.
    #[must_use]
    pub fn to_bech32(&self) -> String {
        let data = convert_bits(&self.0, 8, 5, true).unwrap_or_default();
        let checksum = create_checksum(ADDRESS_HRP, &data);
        let mut out = String::with_capacity(ADDRESS_HRP.len() + 1 + data.len() + checksum.len());
        out.push_str(ADDRESS_HRP);
        out.push('1');
        for d in data.iter().chain(checksum.iter()) {
            out.push(char::from(CHARSET[usize::from(*d)]));
        }
        out
    }

    /// Decodes a bech32 address.
    ///
    /// # Errors
    ///
    /// Returns a parsing error for bad characters, mixed case, a wrong
    /// human readable part, a bad checksum or a wrong payload length.
    pub fn from_bech32(text: &str) -> OpsResult<Self> {
        let fail = |reason: &str| -> OpsResult<Self> {
            Err(ResolutionError::parsing(format!("invalid bech32 address '{text}': {reason}")).into())
        };

        let has_lower = text.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = text.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper {
            return fail("mixed case");
        }
        let lowered = text.to_ascii_lowercase();
        let Some(separator) = lowered.rfind('1') else {
            return fail("missing separator");
        };
        let (hrp, payload) = (&lowered[..separator], &lowered[separator + 1..]);
        if hrp != ADDRESS_HRP {
            return fail("wrong human readable part");
        }
        if payload.len() < 6 {
            return fail("too short");
        }

        let mut values = Vec::with_capacity(payload.len());
        for c in payload.bytes() {
            let Some(pos) = CHARSET.iter().position(|x| *x == c) else {
                return fail("invalid character");
            };
            #[allow(clippy::cast_possible_truncation)]
            values.push(pos as u8);
        }
        if !verify_checksum(hrp, &values) {
            return fail("bad checksum");
        }
        let data = &values[..values.len() - 6];
        let Some(bytes) = convert_bits(data, 5, 8, false) else {
            return fail("bad padding");
        };
        Self::from_slice(&bytes)
    }
}

fn polymod(values: &[u8]) -> u32 {
    let mut chk: u32 = 1;
    for v in values {
        let top = chk >> 25;
        chk = ((chk & 0x01ff_ffff) << 5) ^ u32::from(*v);
        for (i, generator) in GENERATORS.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= generator;
            }
        }
    }
    chk
}

fn hrp_expand(hrp: &str) -> Vec<u8> {
    let mut out: Vec<u8> = hrp.bytes().map(|b| b >> 5).collect();
    out.push(0);
    out.extend(hrp.bytes().map(|b| b & 31));
    out
}

fn create_checksum(hrp: &str, data: &[u8]) -> Vec<u8> {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    values.extend_from_slice(&[0; 6]);
    let modulo = polymod(&values) ^ 1;
    #[allow(clippy::cast_possible_truncation)]
    (0..6).map(|i| ((modulo >> (5 * (5 - i))) & 31) as u8).collect()
}

fn verify_checksum(hrp: &str, data: &[u8]) -> bool {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    polymod(&values) == 1
}

fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let max_value: u32 = (1 << to) - 1;
    let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);
    for value in data {
        let v = u32::from(*value);
        if v >> from != 0 {
            return None;
        }
        acc = (acc << from) | v;
        bits += from;
        while bits >= to {
            bits -= to;
            #[allow(clippy::cast_possible_truncation)]
            out.push(((acc >> bits) & max_value) as u8);
        }
    }
    if pad {
        if bits > 0 {
            #[allow(clippy::cast_possible_truncation)]
            out.push(((acc << (to - bits)) & max_value) as u8);
        }
    } else if bits >= from || ((acc << (to - bits)) & max_value) != 0 {
        return None;
    }
    Some(out)
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_bech32())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_bech32())
    }
}

impl FromStr for Address {
    type Err = crate::error::OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bech32(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_bech32())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_bech32(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Address {
        let mut bytes = [0u8; ADDRESS_LENGTH];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = u8::try_from(i * 7 % 256).unwrap();
        }
        bytes[0] = 0xab;
        Address::from_bytes(bytes)
    }

    #[test]
    fn test_bech32_round_trip() {
        let address = sample();
        let text = address.to_bech32();
        assert!(text.starts_with("erd1"));
        assert_eq!(text.len(), 62);
        assert_eq!(Address::from_bech32(&text).unwrap(), address);
        assert_eq!(Address::from_bech32(&text.to_ascii_uppercase()).unwrap(), address);
    }

    #[test]
    fn test_bech32_rejects_corruption() {
        let text = sample().to_bech32();
        let mut corrupted: Vec<char> = text.chars().collect();
        let last = corrupted.len() - 1;
        corrupted[last] = if corrupted[last] == 'q' { 'p' } else { 'q' };
        let corrupted: String = corrupted.into_iter().collect();
        assert!(Address::from_bech32(&corrupted).is_err());
        assert!(Address::from_bech32("alice").is_err());
        assert!(Address::from_bech32("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4").is_err());
    }

    #[test]
    fn test_smart_contract_detection() {
        assert!(!sample().is_smart_contract());
        assert!(ESDT_SYSTEM_CONTRACT.is_smart_contract());
        assert!(Address::zero().is_smart_contract());
    }

    #[test]
    fn test_serde_as_bech32_string() {
        let address = sample();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", address.to_bech32()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
