//! Entities tracked by a scenario: accounts, contracts and tokens.
//!
//! Every entity exposes a few fixed attributes plus a free-form
//! `saved_values` tree, both reachable through [`EntityData::get_value`].

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{OpsResult, ResolutionError};
use crate::path::{self, KeyPath, PathSegment};
use crate::value::Value;

/// A user or wallet account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountData {
    pub id: String,
    pub address: Address,
    #[serde(default = "Value::empty_map")]
    pub saved_values: Value,
}

/// A contract deployed by a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractData {
    pub id: String,
    pub address: Address,
    /// Hex blake3 hash of the deployed bytecode.
    pub code_hash: String,
    /// Unix timestamp (seconds) of the deployment.
    pub deploy_time: i64,
    /// Unix timestamp (seconds) of the last upgrade, or the deployment.
    pub last_upgrade_time: i64,
    #[serde(default = "Value::empty_map")]
    pub saved_values: Value,
}

/// A contract imported by address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalContractData {
    pub id: String,
    pub address: Address,
    #[serde(default = "Value::empty_map")]
    pub saved_values: Value,
}

/// An addressable chain actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityData {
    Account(AccountData),
    Contract(ContractData),
    ExternalContract(ExternalContractData),
}

impl EntityData {
    /// Creates account data with an empty saved values tree.
    #[must_use]
    pub fn account(id: impl Into<String>, address: Address) -> Self {
        Self::Account(AccountData {
            id: id.into(),
            address,
            saved_values: Value::empty_map(),
        })
    }

    /// Creates external contract data with an empty saved values tree.
    #[must_use]
    pub fn external_contract(id: impl Into<String>, address: Address) -> Self {
        Self::ExternalContract(ExternalContractData {
            id: id.into(),
            address,
            saved_values: Value::empty_map(),
        })
    }

    /// Creates data for a freshly deployed contract.
    #[must_use]
    pub fn contract(id: impl Into<String>, address: Address, code_hash: impl Into<String>, deploy_time: i64) -> Self {
        Self::Contract(ContractData {
            id: id.into(),
            address,
            code_hash: code_hash.into(),
            deploy_time,
            last_upgrade_time: deploy_time,
            saved_values: Value::empty_map(),
        })
    }

    /// Identifier chosen by the scene author.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Account(d) => &d.id,
            Self::Contract(d) => &d.id,
            Self::ExternalContract(d) => &d.id,
        }
    }

    /// Chain address.
    #[must_use]
    pub const fn address(&self) -> Address {
        match self {
            Self::Account(d) => d.address,
            Self::Contract(d) => d.address,
            Self::ExternalContract(d) => d.address,
        }
    }

    /// Discriminator written in persisted documents.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Account(_) => "account",
            Self::Contract(_) => "contract",
            Self::ExternalContract(_) => "external_contract",
        }
    }

    /// Free-form values attached to this entity.
    #[must_use]
    pub const fn saved_values(&self) -> &Value {
        match self {
            Self::Account(d) => &d.saved_values,
            Self::Contract(d) => &d.saved_values,
            Self::ExternalContract(d) => &d.saved_values,
        }
    }

    fn saved_values_mut(&mut self) -> &mut Value {
        match self {
            Self::Account(d) => &mut d.saved_values,
            Self::Contract(d) => &mut d.saved_values,
            Self::ExternalContract(d) => &mut d.saved_values,
        }
    }

    pub(crate) fn set_address(&mut self, address: Address) {
        match self {
            Self::Account(d) => d.address = address,
            Self::Contract(d) => d.address = address,
            Self::ExternalContract(d) => d.address = address,
        }
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "id" | "account_id" | "contract_id" => Some(Value::from(self.id())),
            "address" | "bech32" => Some(Value::from(self.address().to_bech32())),
            _ => match self {
                Self::Contract(d) => match name {
                    "code_hash" => Some(Value::from(d.code_hash.as_str())),
                    "deploy_time" => Some(Value::from(d.deploy_time)),
                    "last_upgrade_time" => Some(Value::from(d.last_upgrade_time)),
                    _ => None,
                },
                _ => None,
            },
        }
    }

    /// Reads a fixed attribute (single segment paths) or a saved value.
    ///
    /// # Errors
    ///
    /// Returns `WrongDataKeyPath` if the path does not exist.
    pub fn get_value(&self, path: &KeyPath) -> OpsResult<Value> {
        if let [PathSegment::Key(name)] = path.segments() {
            if let Some(value) = self.attribute(name) {
                return Ok(value);
            }
        }
        path::get_value(self.saved_values(), path).cloned()
    }

    /// Writes a saved value. Fixed attributes are read-only.
    ///
    /// # Errors
    ///
    /// Returns `WrongDataKeyPath` when targeting a fixed attribute or on a
    /// container kind mismatch.
    pub fn set_value(&mut self, path: &KeyPath, value: Value) -> OpsResult<()> {
        if let [PathSegment::Key(name)] = path.segments() {
            if self.attribute(name).is_some() {
                return Err(ResolutionError::wrong_path(
                    format!("{}.{name}", self.id()),
                    "fixed entity attributes are read-only",
                )
                .into());
            }
        }
        path::set_value(self.saved_values_mut(), path, value)
    }
}

/// Kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Fungible,
    SemiFungible,
    NonFungible,
    Meta,
}

impl TokenKind {
    /// Name used in persisted documents and path lookups.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fungible => "fungible",
            Self::SemiFungible => "semi_fungible",
            Self::NonFungible => "non_fungible",
            Self::Meta => "meta",
        }
    }
}

/// A token issued or imported by a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenData {
    pub name: String,
    pub ticker: String,
    pub identifier: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    #[serde(default = "Value::empty_map")]
    pub saved_values: Value,
}

impl TokenData {
    /// Creates token data with an empty saved values tree.
    #[must_use]
    pub fn new(name: impl Into<String>, ticker: impl Into<String>, identifier: impl Into<String>, kind: TokenKind) -> Self {
        Self {
            name: name.into(),
            ticker: ticker.into(),
            identifier: identifier.into(),
            kind,
            saved_values: Value::empty_map(),
        }
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::from(self.name.as_str())),
            "ticker" => Some(Value::from(self.ticker.as_str())),
            "identifier" => Some(Value::from(self.identifier.as_str())),
            "type" => Some(Value::from(self.kind.as_str())),
            _ => None,
        }
    }

    /// Reads a fixed attribute (single segment paths) or a saved value.
    ///
    /// # Errors
    ///
    /// Returns `WrongDataKeyPath` if the path does not exist.
    pub fn get_value(&self, path: &KeyPath) -> OpsResult<Value> {
        if let [PathSegment::Key(name)] = path.segments() {
            if let Some(value) = self.attribute(name) {
                return Ok(value);
            }
        }
        path::get_value(&self.saved_values, path).cloned()
    }

    /// Writes a saved value. Fixed attributes are read-only.
    ///
    /// # Errors
    ///
    /// Returns `WrongDataKeyPath` when targeting a fixed attribute or on a
    /// container kind mismatch.
    pub fn set_value(&mut self, path: &KeyPath, value: Value) -> OpsResult<()> {
        if let [PathSegment::Key(name)] = path.segments() {
            if self.attribute(name).is_some() {
                return Err(ResolutionError::wrong_path(
                    format!("{}.{name}", self.name),
                    "fixed token attributes are read-only",
                )
                .into());
            }
        }
        path::set_value(&mut self.saved_values, path, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> EntityData {
        EntityData::contract("my-contract", Address::from_bytes([3; 32]), "abcd", 1_700_000_000)
    }

    #[test]
    fn test_entity_attributes() {
        let entity = contract();
        let get = |p: &str| entity.get_value(&KeyPath::parse(p).unwrap()).unwrap();
        assert_eq!(get("address"), get("bech32"));
        assert_eq!(get("contract_id"), Value::from("my-contract"));
        assert_eq!(get("deploy_time"), Value::Int(1_700_000_000));
        assert_eq!(get("code_hash"), Value::from("abcd"));
    }

    #[test]
    fn test_entity_saved_values() {
        let mut entity = EntityData::account("alice", Address::from_bytes([1; 32]));
        let path = KeyPath::parse("stake.amounts[0]").unwrap();
        entity.set_value(&path, Value::Int(10)).unwrap();
        assert_eq!(entity.get_value(&path).unwrap(), Value::Int(10));
        assert!(entity.set_value(&KeyPath::parse("address").unwrap(), Value::Null).is_err());
        assert!(entity.get_value(&KeyPath::parse("code_hash").unwrap()).is_err());
    }

    #[test]
    fn test_entity_discriminator_round_trip() {
        let entity = contract();
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["kind"], "contract");
        let back: EntityData = serde_json::from_value(json).unwrap();
        assert_eq!(back, entity);
        assert_eq!(back.kind_name(), "contract");
    }

    #[test]
    fn test_token_values() {
        let mut token = TokenData::new("bob_token", "BOBT", "BOBT-123456", TokenKind::Fungible);
        assert_eq!(
            token.get_value(&KeyPath::parse("identifier").unwrap()).unwrap(),
            Value::from("BOBT-123456")
        );
        token.set_value(&KeyPath::parse("decimals").unwrap(), Value::Int(18)).unwrap();
        assert_eq!(token.get_value(&KeyPath::parse("decimals").unwrap()).unwrap(), Value::Int(18));
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["type"], "fungible");
    }
}
