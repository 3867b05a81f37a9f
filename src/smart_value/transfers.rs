//! Token references, transfers and result save keys.

use std::fmt;

use crate::address::Address;
use crate::error::{OpsResult, ResolutionError};
use crate::value::{Value, ValueMap};

/// Identifier of the native token.
pub const NATIVE_TOKEN: &str = "EGLD";

/// A token identifier with its nonce (zero for fungible tokens).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenRef {
    pub identifier: String,
    pub nonce: u64,
}

impl TokenRef {
    /// Creates a token reference.
    #[must_use]
    pub fn new(identifier: impl Into<String>, nonce: u64) -> Self {
        Self {
            identifier: identifier.into(),
            nonce,
        }
    }

    /// The native token.
    #[must_use]
    pub fn native() -> Self {
        Self::new(NATIVE_TOKEN, 0)
    }

    /// Returns true for the native token.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.identifier == NATIVE_TOKEN
    }
}

impl fmt::Display for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nonce == 0 {
            write!(f, "{}", self.identifier)
        } else {
            write!(f, "{}-{:02x}", self.identifier, self.nonce)
        }
    }
}

/// An amount of one token, as attached to an outgoing transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub token: TokenRef,
    pub amount: u128,
}

impl TokenTransfer {
    /// Creates a transfer.
    #[must_use]
    pub const fn new(token: TokenRef, amount: u128) -> Self {
        Self { token, amount }
    }
}

impl fmt::Display for TokenTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.token)
    }
}

/// A token movement observed in a finalized transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainTransfer {
    pub sender: Address,
    pub receiver: Address,
    pub token: TokenRef,
    pub amount: u128,
}

impl fmt::Display for OnChainTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} from {} to {}", self.amount, self.token, self.sender, self.receiver)
    }
}

/// Where the decoded results of a call or query are saved.
///
/// - `"key"` saves the whole result list under `key`
/// - `["a", null, "b"]` saves each result under its own key, skipping nulls
/// - `{"key": ["a", "b"]}` nests the per-result keys under `key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsSaveKeys {
    pub master_key: Option<String>,
    pub sub_keys: Option<Vec<Option<String>>>,
}

impl ResultsSaveKeys {
    /// Parses the definition forms listed on the type.
    ///
    /// # Errors
    ///
    /// Returns a parsing error for any other shape.
    pub fn from_value(value: &Value) -> OpsResult<Self> {
        match value {
            Value::String(key) => Ok(Self {
                master_key: Some(key.clone()),
                sub_keys: None,
            }),
            Value::List(keys) => Ok(Self {
                master_key: None,
                sub_keys: Some(sub_keys(keys)?),
            }),
            Value::Map(map) => {
                let mut entries = map.iter();
                match (entries.next(), entries.next()) {
                    (Some((master, Value::List(keys))), None) => Ok(Self {
                        master_key: Some(master.clone()),
                        sub_keys: Some(sub_keys(keys)?),
                    }),
                    _ => Err(ResolutionError::parsing(format!(
                        "results save keys as a dict need exactly one root key with a list of keys, got {}",
                        value.repr()
                    ))
                    .into()),
                }
            }
            other => Err(ResolutionError::parsing(format!(
                "results save keys cannot be built from a {}: {}",
                other.type_name(),
                other.repr()
            ))
            .into()),
        }
    }

    /// Splits results into the key/value pairs to save.
    ///
    /// # Errors
    ///
    /// Returns a parsing error if the number of results does not match the
    /// number of sub keys.
    pub fn to_save(&self, results: &[Value]) -> OpsResult<ValueMap> {
        let mut out = ValueMap::new();
        match (&self.master_key, &self.sub_keys) {
            (Some(master), None) => {
                out.insert(master.clone(), Value::List(results.to_vec()));
            }
            (master, Some(keys)) => {
                if keys.len() != results.len() {
                    return Err(ResolutionError::parsing(format!(
                        "{} results cannot be saved under {} keys",
                        results.len(),
                        keys.len()
                    ))
                    .into());
                }
                let mut pairs = ValueMap::new();
                for (key, result) in keys.iter().zip(results) {
                    if let Some(key) = key {
                        pairs.insert(key.clone(), result.clone());
                    }
                }
                match master {
                    Some(master) => {
                        out.insert(master.clone(), Value::Map(pairs));
                    }
                    None => out = pairs,
                }
            }
            (None, None) => {}
        }
        Ok(out)
    }

    /// Inverse of [`ResultsSaveKeys::from_value`].
    #[must_use]
    pub fn to_value(&self) -> Value {
        let keys = self.sub_keys.as_ref().map(|keys| {
            Value::List(
                keys.iter()
                    .map(|k| k.as_deref().map_or(Value::Null, Value::from))
                    .collect(),
            )
        });
        match (&self.master_key, keys) {
            (Some(master), None) => Value::from(master.as_str()),
            (Some(master), Some(keys)) => {
                let mut map = ValueMap::new();
                map.insert(master.clone(), keys);
                Value::Map(map)
            }
            (None, Some(keys)) => keys,
            (None, None) => Value::Null,
        }
    }
}

fn sub_keys(keys: &[Value]) -> OpsResult<Vec<Option<String>>> {
    keys.iter()
        .map(|k| match k {
            Value::String(s) => Ok(Some(s.clone())),
            Value::Null => Ok(None),
            other => Err(ResolutionError::parsing(format!(
                "save keys must be strings or null, got {}",
                other.repr()
            ))
            .into()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(items: &[i64]) -> Vec<Value> {
        items.iter().map(|i| Value::from(*i)).collect()
    }

    #[test]
    fn test_master_key_only() {
        let keys = ResultsSaveKeys::from_value(&Value::from("results")).unwrap();
        let saved = keys.to_save(&values(&[1, 2])).unwrap();
        assert_eq!(saved["results"], Value::List(values(&[1, 2])));
    }

    #[test]
    fn test_sub_keys_skip_nulls() {
        let raw = Value::List(vec![Value::from("a"), Value::Null, Value::from("c")]);
        let keys = ResultsSaveKeys::from_value(&raw).unwrap();
        let saved = keys.to_save(&values(&[1, 2, 3])).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved["a"], Value::Int(1));
        assert_eq!(saved["c"], Value::Int(3));
        assert_eq!(keys.to_value(), raw);
    }

    #[test]
    fn test_nested_keys() {
        let mut map = ValueMap::new();
        map.insert("pool".to_string(), Value::List(vec![Value::from("fee")]));
        let keys = ResultsSaveKeys::from_value(&Value::Map(map)).unwrap();
        let saved = keys.to_save(&values(&[30])).unwrap();
        assert_eq!(saved["pool"].as_map().unwrap()["fee"], Value::Int(30));
        assert!(keys.to_save(&values(&[1, 2])).is_err());
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(ResultsSaveKeys::from_value(&Value::Int(3)).is_err());
        assert!(ResultsSaveKeys::from_value(&Value::List(vec![Value::Int(3)])).is_err());
    }

    #[test]
    fn test_token_display() {
        assert_eq!(TokenRef::new("SFT-abcdef", 10).to_string(), "SFT-abcdef-0a");
        assert_eq!(TokenRef::native().to_string(), "EGLD");
        assert!(TokenRef::native().is_native());
    }
}
