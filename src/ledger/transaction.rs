//! Transactions and their finalized on-chain form.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

use crate::address::Address;
use crate::error::{OpsResult, TransactionError};

/// Transaction version written in the signing payload.
pub const TRANSACTION_VERSION: u32 = 1;

/// Separator between call data arguments.
pub const ARG_SEPARATOR: char = '@';

/// VM type of WASM contracts.
pub const WASM_VM: &str = "0500";

/// An unsigned or signed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: u64,
    pub value: u128,
    pub sender: Address,
    pub receiver: Address,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub data: Vec<u8>,
    pub chain_id: String,
    pub version: u32,
    pub signature: Option<Vec<u8>>,
}

#[derive(Serialize)]
struct SigningPayload<'a> {
    nonce: u64,
    value: String,
    receiver: String,
    sender: String,
    #[serde(rename = "gasPrice")]
    gas_price: u64,
    #[serde(rename = "gasLimit")]
    gas_limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(rename = "chainID")]
    chain_id: &'a str,
    version: u32,
}

impl Transaction {
    /// Creates an unsigned transaction with a zero nonce.
    #[must_use]
    pub fn new(sender: Address, receiver: Address, value: u128, data: Vec<u8>) -> Self {
        Self {
            nonce: 0,
            value,
            sender,
            receiver,
            gas_price: 0,
            gas_limit: 0,
            data,
            chain_id: String::new(),
            version: TRANSACTION_VERSION,
            signature: None,
        }
    }

    /// Bytes covered by the signature: canonical JSON of every field but
    /// the signature, with base64 data.
    ///
    /// # Errors
    ///
    /// Returns a signing error if serialization fails.
    pub fn signing_payload(&self) -> OpsResult<Vec<u8>> {
        let payload = SigningPayload {
            nonce: self.nonce,
            value: self.value.to_string(),
            receiver: self.receiver.to_bech32(),
            sender: self.sender.to_bech32(),
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            data: (!self.data.is_empty()).then(|| BASE64.encode(&self.data)),
            chain_id: &self.chain_id,
            version: self.version,
        };
        serde_json::to_vec(&payload).map_err(|e| {
            TransactionError::Signing {
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Hex hash of the signed transaction.
    ///
    /// # Errors
    ///
    /// Returns a signing error if serialization fails.
    pub fn hash(&self) -> OpsResult<String> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.signing_payload()?);
        if let Some(signature) = &self.signature {
            hasher.update(signature);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Data field as text.
    #[must_use]
    pub fn data_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Builds `function@arg1@arg2...` call data from hex encoded arguments.
#[must_use]
pub fn call_data(function: &str, args: &[Vec<u8>]) -> Vec<u8> {
    let mut data = function.to_string();
    for arg in args {
        data.push(ARG_SEPARATOR);
        data.push_str(&hex::encode(arg));
    }
    data.into_bytes()
}

/// Minimal big-endian encoding of an unsigned integer (empty for zero).
#[must_use]
pub fn encode_unsigned(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

/// Minimal two's complement big-endian encoding of a signed integer.
#[must_use]
pub fn encode_signed(value: i128) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let bytes = value.to_be_bytes();
    let filler = if value < 0 { 0xff } else { 0x00 };
    let mut start = 0;
    while start + 1 < bytes.len() && bytes[start] == filler && (bytes[start + 1] & 0x80 == filler & 0x80) {
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Outcome of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
    Invalid,
}

impl TxStatus {
    /// Status name as reported by gateways.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "fail",
            Self::Invalid => "invalid",
        }
    }

    /// Returns true once the outcome is final.
    #[must_use]
    pub const fn is_completed(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A result emitted while executing a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractResult {
    pub sender: Address,
    pub receiver: Address,
    pub value: u128,
    pub data: String,
    pub is_refund: bool,
}

/// A log event of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub identifier: String,
    pub address: Address,
    pub topics: Vec<Vec<u8>>,
    pub data: Vec<u8>,
}

impl Event {
    /// Creates an event.
    #[must_use]
    pub fn new(identifier: impl Into<String>, address: Address, topics: Vec<Vec<u8>>) -> Self {
        Self {
            identifier: identifier.into(),
            address,
            topics,
            data: Vec::new(),
        }
    }

    /// Attaches data to the event.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }
}

/// A transaction as seen on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainTransaction {
    pub hash: String,
    pub sender: Address,
    pub receiver: Address,
    pub value: u128,
    pub data: Vec<u8>,
    pub status: TxStatus,
    /// Unix timestamp (seconds) of the block.
    pub timestamp: i64,
    pub results: Vec<ContractResult>,
    pub events: Vec<Event>,
}

impl OnChainTransaction {
    /// Data field as text.
    #[must_use]
    pub fn data_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// First event with the given identifier.
    #[must_use]
    pub fn find_event(&self, identifier: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.identifier == identifier)
    }

    /// Values returned by the called endpoint (`@6f6b@...` results).
    #[must_use]
    pub fn return_data(&self) -> Vec<Vec<u8>> {
        const OK_PREFIX: &str = "@6f6b";
        self.results
            .iter()
            .find(|r| r.data.starts_with(OK_PREFIX))
            .map(|r| {
                r.data[OK_PREFIX.len()..]
                    .split(ARG_SEPARATOR)
                    .skip(1)
                    .map(|part| hex::decode(part).unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_data() {
        let data = call_data("add", &[vec![0x05], b"ab".to_vec(), Vec::new()]);
        assert_eq!(String::from_utf8(data).unwrap(), "add@05@6162@");
    }

    #[test]
    fn test_integer_encodings() {
        assert!(encode_unsigned(0).is_empty());
        assert_eq!(encode_unsigned(256), vec![1, 0]);
        assert_eq!(encode_signed(-1), vec![0xff]);
        assert_eq!(encode_signed(127), vec![0x7f]);
        assert_eq!(encode_signed(128), vec![0x00, 0x80]);
        assert_eq!(encode_signed(-129), vec![0xff, 0x7f]);
    }

    #[test]
    fn test_signing_payload_field_order() {
        let mut tx = Transaction::new(Address::from_bytes([1; 32]), Address::from_bytes([2; 32]), 10, b"hi".to_vec());
        tx.chain_id = "D".to_string();
        let payload = String::from_utf8(tx.signing_payload().unwrap()).unwrap();
        assert!(payload.starts_with("{\"nonce\":0,\"value\":\"10\",\"receiver\":\"erd1"));
        assert!(payload.contains("\"data\":\"aGk=\""));
        assert!(payload.ends_with("\"chainID\":\"D\",\"version\":1}"));

        let unsigned = tx.hash().unwrap();
        tx.signature = Some(vec![1, 2, 3]);
        assert_ne!(tx.hash().unwrap(), unsigned);
    }

    #[test]
    fn test_return_data() {
        let tx = OnChainTransaction {
            hash: "h".to_string(),
            sender: Address::zero(),
            receiver: Address::zero(),
            value: 0,
            data: Vec::new(),
            status: TxStatus::Success,
            timestamp: 0,
            results: vec![ContractResult {
                sender: Address::zero(),
                receiver: Address::zero(),
                value: 0,
                data: "@6f6b@05@".to_string(),
                is_refund: false,
            }],
            events: Vec::new(),
        };
        assert_eq!(tx.return_data(), vec![vec![5], Vec::new()]);
    }
}
