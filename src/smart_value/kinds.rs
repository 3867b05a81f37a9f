//! Typed smart value kinds.

use std::path::PathBuf;

use crate::address::Address;
use crate::error::{OpsResult, ResolutionError};
use crate::smart_value::resolver::{Resolver, Traversal};
use crate::smart_value::transfers::{OnChainTransfer, ResultsSaveKeys, TokenRef, TokenTransfer};
use crate::smart_value::{SmartKind, SmartValue};
use crate::value::{Value, ValueMap};

fn cannot_convert<T>(value: &Value, target: &str) -> OpsResult<T> {
    Err(ResolutionError::parsing(format!(
        "cannot convert {} {} to {target}",
        value.type_name(),
        value.repr()
    ))
    .into())
}

/// Signed integer (`i128`). Floats are truncated, strings parsed.
#[derive(Debug, Clone, Copy)]
pub struct IntKind;

impl SmartKind for IntKind {
    type Output = i128;
    const NAME: &'static str = "int";

    #[allow(clippy::cast_possible_truncation)]
    fn enforce(value: Value, _: &Resolver<'_>) -> OpsResult<i128> {
        match &value {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i128::from(*b)),
            Value::Float(f) if f.is_finite() && f.abs() < 1e38 => Ok(f.trunc() as i128),
            Value::String(s) => match s.trim().parse::<i128>() {
                Ok(i) => Ok(i),
                Err(_) => cannot_convert(&value, Self::NAME),
            },
            _ => cannot_convert(&value, Self::NAME),
        }
    }

    fn describe(output: &i128) -> Option<Value> {
        Some(Value::Int(*output))
    }
}

/// Floating point number.
#[derive(Debug, Clone, Copy)]
pub struct FloatKind;

impl SmartKind for FloatKind {
    type Output = f64;
    const NAME: &'static str = "float";

    fn enforce(value: Value, _: &Resolver<'_>) -> OpsResult<f64> {
        match &value {
            Value::Bool(b) => Ok(f64::from(u8::from(*b))),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) => Ok(f),
                Err(_) => cannot_convert(&value, Self::NAME),
            },
            other => match other.as_float() {
                Some(f) => Ok(f),
                None => cannot_convert(&value, Self::NAME),
            },
        }
    }

    fn describe(output: &f64) -> Option<Value> {
        Some(Value::Float(*output))
    }
}

/// Boolean. Accepts `true/false/yes/no/1/0` strings in any case.
#[derive(Debug, Clone, Copy)]
pub struct BoolKind;

impl SmartKind for BoolKind {
    type Output = bool;
    const NAME: &'static str = "bool";

    fn enforce(value: Value, _: &Resolver<'_>) -> OpsResult<bool> {
        match &value {
            Value::Bool(b) => Ok(*b),
            Value::Null => Ok(false),
            Value::Int(i) => Ok(*i != 0),
            Value::Float(f) => Ok(*f != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" | "" => Ok(false),
                _ => cannot_convert(&value, Self::NAME),
            },
            Value::List(items) => Ok(!items.is_empty()),
            Value::Map(map) => Ok(!map.is_empty()),
            Value::Bytes(_) => cannot_convert(&value, Self::NAME),
        }
    }

    fn describe(output: &bool) -> Option<Value> {
        Some(Value::Bool(*output))
    }
}

/// Text. Any value is accepted through its display form; UTF-8 bytes are
/// decoded.
#[derive(Debug, Clone, Copy)]
pub struct StrKind;

impl SmartKind for StrKind {
    type Output = String;
    const NAME: &'static str = "str";

    fn enforce(value: Value, _: &Resolver<'_>) -> OpsResult<String> {
        Ok(match value {
            Value::String(s) => s,
            Value::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(s) => s,
                Err(e) => Value::Bytes(e.into_bytes()).to_string(),
            },
            other => other.to_string(),
        })
    }

    fn describe(output: &String) -> Option<Value> {
        Some(Value::from(output.as_str()))
    }
}

/// Raw bytes. Strings are taken as UTF-8.
#[derive(Debug, Clone, Copy)]
pub struct BytesKind;

impl SmartKind for BytesKind {
    type Output = Vec<u8>;
    const NAME: &'static str = "bytes";

    fn enforce(value: Value, _: &Resolver<'_>) -> OpsResult<Vec<u8>> {
        match value {
            Value::Bytes(bytes) => Ok(bytes),
            Value::String(s) => Ok(s.into_bytes()),
            other => cannot_convert(&other, Self::NAME),
        }
    }

    fn describe(output: &Vec<u8>) -> Option<Value> {
        Some(Value::Bytes(output.clone()))
    }
}

/// Filesystem path.
#[derive(Debug, Clone, Copy)]
pub struct PathKind;

impl SmartKind for PathKind {
    type Output = PathBuf;
    const NAME: &'static str = "path";

    fn enforce(value: Value, _: &Resolver<'_>) -> OpsResult<PathBuf> {
        match value {
            Value::String(s) if !s.is_empty() => Ok(PathBuf::from(s)),
            other => cannot_convert(&other, Self::NAME),
        }
    }

    fn describe(output: &PathBuf) -> Option<Value> {
        Some(Value::from(output.to_string_lossy().into_owned()))
    }
}

fn to_address(value: &Value, resolver: &Resolver<'_>) -> OpsResult<Address> {
    match value {
        Value::String(text) => {
            if let Ok(address) = Address::from_bech32(text) {
                return Ok(address);
            }
            if let Ok(scenario) = resolver.scenario() {
                if let Some(entity) = scenario.entity(text) {
                    return Ok(entity.address());
                }
            }
            Err(ResolutionError::parsing(format!(
                "'{text}' is neither a bech32 address nor a known account or contract"
            ))
            .into())
        }
        Value::Bytes(bytes) => Address::from_slice(bytes),
        other => cannot_convert(other, AddressKind::NAME),
    }
}

/// Chain address: a bech32 literal or the id of a known entity.
#[derive(Debug, Clone, Copy)]
pub struct AddressKind;

impl SmartKind for AddressKind {
    type Output = Address;
    const NAME: &'static str = "address";

    fn enforce(value: Value, resolver: &Resolver<'_>) -> OpsResult<Address> {
        to_address(&value, resolver)
    }

    fn describe(output: &Address) -> Option<Value> {
        Some(Value::from(output.to_bech32()))
    }
}

/// List of chain addresses.
#[derive(Debug, Clone, Copy)]
pub struct AddressesKind;

impl SmartKind for AddressesKind {
    type Output = Vec<Address>;
    const NAME: &'static str = "addresses";

    fn enforce(value: Value, resolver: &Resolver<'_>) -> OpsResult<Vec<Address>> {
        match &value {
            Value::List(items) => items.iter().map(|v| to_address(v, resolver)).collect(),
            _ => cannot_convert(&value, Self::NAME),
        }
    }

    fn describe(output: &Vec<Address>) -> Option<Value> {
        Some(Value::List(output.iter().map(|a| Value::from(a.to_bech32())).collect()))
    }
}

/// Any value, resolved all the way down.
#[derive(Debug, Clone, Copy)]
pub struct AnyKind;

impl SmartKind for AnyKind {
    type Output = Value;
    const NAME: &'static str = "any";

    fn enforce(value: Value, _: &Resolver<'_>) -> OpsResult<Value> {
        Ok(value)
    }

    fn describe(output: &Value) -> Option<Value> {
        Some(output.clone())
    }
}

fn into_list(value: Value, target: &str) -> OpsResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items),
        other => cannot_convert(&other, target),
    }
}

fn into_map(value: Value, target: &str) -> OpsResult<ValueMap> {
    match value {
        Value::Map(map) => Ok(map),
        other => cannot_convert(&other, target),
    }
}

/// List whose elements are resolved.
#[derive(Debug, Clone, Copy)]
pub struct ListKind;

impl SmartKind for ListKind {
    type Output = Vec<Value>;
    const NAME: &'static str = "list";

    fn enforce(value: Value, _: &Resolver<'_>) -> OpsResult<Vec<Value>> {
        into_list(value, Self::NAME)
    }

    fn describe(output: &Vec<Value>) -> Option<Value> {
        Some(Value::List(output.clone()))
    }
}

/// List whose elements are left for the caller to resolve.
#[derive(Debug, Clone, Copy)]
pub struct RawListKind;

impl SmartKind for RawListKind {
    type Output = Vec<Value>;
    const NAME: &'static str = "raw list";
    const TRAVERSAL: Traversal = Traversal::Shallow;

    fn enforce(value: Value, _: &Resolver<'_>) -> OpsResult<Vec<Value>> {
        into_list(value, Self::NAME)
    }

    fn describe(output: &Vec<Value>) -> Option<Value> {
        Some(Value::List(output.clone()))
    }
}

/// Map whose keys and values are resolved.
#[derive(Debug, Clone, Copy)]
pub struct MapKind;

impl SmartKind for MapKind {
    type Output = ValueMap;
    const NAME: &'static str = "dict";

    fn enforce(value: Value, _: &Resolver<'_>) -> OpsResult<ValueMap> {
        into_map(value, Self::NAME)
    }

    fn describe(output: &ValueMap) -> Option<Value> {
        Some(Value::Map(output.clone()))
    }
}

/// Map whose entries are left for the caller to resolve.
#[derive(Debug, Clone, Copy)]
pub struct RawMapKind;

impl SmartKind for RawMapKind {
    type Output = ValueMap;
    const NAME: &'static str = "raw dict";
    const TRAVERSAL: Traversal = Traversal::Shallow;

    fn enforce(value: Value, _: &Resolver<'_>) -> OpsResult<ValueMap> {
        into_map(value, Self::NAME)
    }

    fn describe(output: &ValueMap) -> Option<Value> {
        Some(Value::Map(output.clone()))
    }
}

fn amount(value: &Value, resolver: &Resolver<'_>) -> OpsResult<u128> {
    let raw = SmartValue::<IntKind>::resolve(value.clone(), resolver)?;
    u128::try_from(raw)
        .map_err(|_| ResolutionError::parsing(format!("amount must not be negative, got {raw}")).into())
}

fn nonce(value: Option<&Value>, resolver: &Resolver<'_>) -> OpsResult<u64> {
    let Some(value) = value else {
        return Ok(0);
    };
    let raw = SmartValue::<IntKind>::resolve(value.clone(), resolver)?;
    u64::try_from(raw).map_err(|_| ResolutionError::parsing(format!("invalid token nonce {raw}")).into())
}

fn identifier(value: &Value, resolver: &Resolver<'_>) -> OpsResult<String> {
    SmartValue::<StrKind>::resolve(value.clone(), resolver)
}

fn amount_value(amount: u128) -> Value {
    i128::try_from(amount).map_or_else(|_| Value::from(amount.to_string()), Value::Int)
}

fn aliased<'m>(map: &'m ValueMap, names: &[&str]) -> Option<&'m Value> {
    names.iter().find_map(|name| map.get(*name))
}

fn required<'m>(map: &'m ValueMap, names: &[&str], target: &str) -> OpsResult<&'m Value> {
    aliased(map, names).ok_or_else(|| {
        ResolutionError::parsing(format!("missing {} for the {target}", names.join(" or "))).into()
    })
}

const IDENTIFIER_KEYS: [&str; 2] = ["identifier", "token_identifier"];
const NONCE_KEYS: [&str; 2] = ["nonce", "token_nonce"];

fn token_ref(value: &Value, resolver: &Resolver<'_>) -> OpsResult<TokenRef> {
    match value {
        Value::List(items) if !items.is_empty() => Ok(TokenRef {
            identifier: identifier(&items[0], resolver)?,
            nonce: nonce(items.get(1), resolver)?,
        }),
        Value::Map(map) => Ok(TokenRef {
            identifier: identifier(required(map, &IDENTIFIER_KEYS, TokenRefKind::NAME)?, resolver)?,
            nonce: nonce(aliased(map, &NONCE_KEYS), resolver)?,
        }),
        Value::String(_) => Ok(TokenRef::new(identifier(value, resolver)?, 0)),
        other => cannot_convert(other, TokenRefKind::NAME),
    }
}

/// Token identifier and nonce: `[identifier, nonce?]`, a map with
/// `identifier|token_identifier` and `nonce|token_nonce`, or a bare
/// identifier.
#[derive(Debug, Clone, Copy)]
pub struct TokenRefKind;

impl SmartKind for TokenRefKind {
    type Output = TokenRef;
    const NAME: &'static str = "token";

    fn enforce(value: Value, resolver: &Resolver<'_>) -> OpsResult<TokenRef> {
        token_ref(&value, resolver)
    }

    fn describe(output: &TokenRef) -> Option<Value> {
        Some(Value::List(vec![
            Value::from(output.identifier.as_str()),
            Value::from(output.nonce),
        ]))
    }
}

fn token_transfer(value: &Value, resolver: &Resolver<'_>) -> OpsResult<TokenTransfer> {
    match value {
        Value::List(items) if items.len() >= 2 => Ok(TokenTransfer {
            token: TokenRef {
                identifier: identifier(&items[0], resolver)?,
                nonce: nonce(items.get(2), resolver)?,
            },
            amount: amount(&items[1], resolver)?,
        }),
        Value::List(_) => Err(ResolutionError::parsing(
            "a token transfer needs at least an identifier and an amount",
        )
        .into()),
        Value::Map(map) => Ok(TokenTransfer {
            token: TokenRef {
                identifier: identifier(required(map, &IDENTIFIER_KEYS, TokenTransferKind::NAME)?, resolver)?,
                nonce: nonce(aliased(map, &NONCE_KEYS), resolver)?,
            },
            amount: amount(required(map, &["amount"], TokenTransferKind::NAME)?, resolver)?,
        }),
        other => cannot_convert(other, TokenTransferKind::NAME),
    }
}

fn describe_transfer(transfer: &TokenTransfer) -> Value {
    Value::List(vec![
        Value::from(transfer.token.identifier.as_str()),
        amount_value(transfer.amount),
        Value::from(transfer.token.nonce),
    ])
}

/// Outgoing token transfer: `[identifier, amount, nonce?]` or a map.
#[derive(Debug, Clone, Copy)]
pub struct TokenTransferKind;

impl SmartKind for TokenTransferKind {
    type Output = TokenTransfer;
    const NAME: &'static str = "token transfer";

    fn enforce(value: Value, resolver: &Resolver<'_>) -> OpsResult<TokenTransfer> {
        token_transfer(&value, resolver)
    }

    fn describe(output: &TokenTransfer) -> Option<Value> {
        Some(describe_transfer(output))
    }
}

/// List of outgoing token transfers.
#[derive(Debug, Clone, Copy)]
pub struct TokenTransfersKind;

impl SmartKind for TokenTransfersKind {
    type Output = Vec<TokenTransfer>;
    const NAME: &'static str = "token transfers";

    fn enforce(value: Value, resolver: &Resolver<'_>) -> OpsResult<Vec<TokenTransfer>> {
        match &value {
            Value::List(items) => items.iter().map(|v| token_transfer(v, resolver)).collect(),
            Value::Null => Ok(Vec::new()),
            _ => cannot_convert(&value, Self::NAME),
        }
    }

    fn describe(output: &Vec<TokenTransfer>) -> Option<Value> {
        Some(Value::List(output.iter().map(describe_transfer).collect()))
    }
}

fn on_chain_transfer(value: &Value, resolver: &Resolver<'_>) -> OpsResult<OnChainTransfer> {
    match value {
        Value::List(items) if items.len() >= 4 => Ok(OnChainTransfer {
            sender: SmartValue::<AddressKind>::resolve(items[0].clone(), resolver)?,
            receiver: SmartValue::<AddressKind>::resolve(items[1].clone(), resolver)?,
            token: TokenRef {
                identifier: identifier(&items[2], resolver)?,
                nonce: nonce(items.get(4), resolver)?,
            },
            amount: amount(&items[3], resolver)?,
        }),
        Value::List(_) => Err(ResolutionError::parsing(
            "an on-chain transfer needs a sender, a receiver, an identifier and an amount",
        )
        .into()),
        Value::Map(map) => Ok(OnChainTransfer {
            sender: SmartValue::<AddressKind>::resolve(
                required(map, &["sender"], OnChainTransferKind::NAME)?.clone(),
                resolver,
            )?,
            receiver: SmartValue::<AddressKind>::resolve(
                required(map, &["receiver"], OnChainTransferKind::NAME)?.clone(),
                resolver,
            )?,
            token: TokenRef {
                identifier: identifier(required(map, &IDENTIFIER_KEYS, OnChainTransferKind::NAME)?, resolver)?,
                nonce: nonce(aliased(map, &NONCE_KEYS), resolver)?,
            },
            amount: amount(required(map, &["amount"], OnChainTransferKind::NAME)?, resolver)?,
        }),
        other => cannot_convert(other, OnChainTransferKind::NAME),
    }
}

fn describe_on_chain(transfer: &OnChainTransfer) -> Value {
    Value::List(vec![
        Value::from(transfer.sender.to_bech32()),
        Value::from(transfer.receiver.to_bech32()),
        Value::from(transfer.token.identifier.as_str()),
        amount_value(transfer.amount),
        Value::from(transfer.token.nonce),
    ])
}

/// Expected on-chain movement: `[sender, receiver, identifier, amount,
/// nonce?]` or a map.
#[derive(Debug, Clone, Copy)]
pub struct OnChainTransferKind;

impl SmartKind for OnChainTransferKind {
    type Output = OnChainTransfer;
    const NAME: &'static str = "on-chain transfer";

    fn enforce(value: Value, resolver: &Resolver<'_>) -> OpsResult<OnChainTransfer> {
        on_chain_transfer(&value, resolver)
    }

    fn describe(output: &OnChainTransfer) -> Option<Value> {
        Some(describe_on_chain(output))
    }
}

/// List of expected on-chain movements.
#[derive(Debug, Clone, Copy)]
pub struct OnChainTransfersKind;

impl SmartKind for OnChainTransfersKind {
    type Output = Vec<OnChainTransfer>;
    const NAME: &'static str = "on-chain transfers";

    fn enforce(value: Value, resolver: &Resolver<'_>) -> OpsResult<Vec<OnChainTransfer>> {
        match &value {
            Value::List(items) => items.iter().map(|v| on_chain_transfer(v, resolver)).collect(),
            _ => cannot_convert(&value, Self::NAME),
        }
    }

    fn describe(output: &Vec<OnChainTransfer>) -> Option<Value> {
        Some(Value::List(output.iter().map(describe_on_chain).collect()))
    }
}

/// Keys under which call or query results are saved.
#[derive(Debug, Clone, Copy)]
pub struct ResultsSaveKeysKind;

impl SmartKind for ResultsSaveKeysKind {
    type Output = ResultsSaveKeys;
    const NAME: &'static str = "results save keys";

    fn enforce(value: Value, _: &Resolver<'_>) -> OpsResult<ResultsSaveKeys> {
        ResultsSaveKeys::from_value(&value)
    }

    fn describe(output: &ResultsSaveKeys) -> Option<Value> {
        Some(output.to_value())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::config::{Config, MapEnv};
    use crate::scenario::{EntityData, Scenario};

    fn alice() -> Address {
        Address::from_bytes([9; 32])
    }

    fn with_resolver<R>(f: impl FnOnce(&Resolver<'_>) -> R) -> R {
        let mut scenario = Scenario::new("unit", "devnet");
        scenario.add_entity(EntityData::account("alice", alice())).unwrap();
        scenario.set_value("amount", Value::Int(1_000)).unwrap();
        let config = Config::builtin("devnet").unwrap();
        let env = MapEnv::new().with("TOKEN", "WEGLD-abcdef");
        let rng = RefCell::new(StdRng::seed_from_u64(3));
        let resolver = Resolver::new(&config, &env, &rng).with_scenario(&scenario);
        f(&resolver)
    }

    fn enforce_twice<K: SmartKind>(value: Value) -> (K::Output, K::Output)
    where
        K::Output: PartialEq,
    {
        with_resolver(|r| {
            let once = K::enforce(value, r).unwrap();
            let described = K::describe(&once).unwrap();
            let twice = K::enforce(described, r).unwrap();
            (once, twice)
        })
    }

    #[test]
    fn test_scalar_coercions() {
        with_resolver(|r| {
            assert_eq!(IntKind::enforce(Value::from(" 12 "), r).unwrap(), 12);
            assert_eq!(IntKind::enforce(Value::Float(3.9), r).unwrap(), 3);
            assert_eq!(IntKind::enforce(Value::Bool(true), r).unwrap(), 1);
            assert!(IntKind::enforce(Value::from("abc"), r).is_err());
            assert!((FloatKind::enforce(Value::from("2.5"), r).unwrap() - 2.5).abs() < f64::EPSILON);
            assert!(BoolKind::enforce(Value::from("Yes"), r).unwrap());
            assert!(!BoolKind::enforce(Value::from("false"), r).unwrap());
            assert!(BoolKind::enforce(Value::from("maybe"), r).is_err());
            assert_eq!(StrKind::enforce(Value::Int(5), r).unwrap(), "5");
            assert_eq!(StrKind::enforce(Value::Bytes(b"hi".to_vec()), r).unwrap(), "hi");
            assert_eq!(BytesKind::enforce(Value::from("hi"), r).unwrap(), b"hi".to_vec());
            assert_eq!(PathKind::enforce(Value::from("a/b.wasm"), r).unwrap(), PathBuf::from("a/b.wasm"));
        });
    }

    #[test]
    fn test_enforcement_is_idempotent() {
        let (a, b) = enforce_twice::<IntKind>(Value::from("7"));
        assert_eq!(a, b);
        let (a, b) = enforce_twice::<BoolKind>(Value::from("no"));
        assert_eq!(a, b);
        let (a, b) = enforce_twice::<StrKind>(Value::Float(1.5));
        assert_eq!(a, b);
        let (a, b) = enforce_twice::<AddressKind>(Value::from("alice"));
        assert_eq!(a, b);
        let (a, b) = enforce_twice::<TokenRefKind>(Value::from("TOK-123456"));
        assert_eq!(a, b);
        let mut map = ValueMap::new();
        map.insert("token_identifier".to_string(), Value::from("TOK-123456"));
        map.insert("amount".to_string(), Value::Int(5));
        let (a, b) = enforce_twice::<TokenTransferKind>(Value::Map(map));
        assert_eq!(a, b);
        let (a, b) = enforce_twice::<ResultsSaveKeysKind>(Value::from("key"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_address_resolution() {
        with_resolver(|r| {
            assert_eq!(AddressKind::enforce(Value::from("alice"), r).unwrap(), alice());
            let bech32 = alice().to_bech32();
            assert_eq!(AddressKind::enforce(Value::from(bech32), r).unwrap(), alice());
            assert!(AddressKind::enforce(Value::from("nobody"), r).is_err());
            let list = Value::List(vec![Value::from("alice"), Value::from("alice")]);
            assert_eq!(AddressesKind::enforce(list, r).unwrap().len(), 2);
        });
    }

    #[test]
    fn test_token_transfer_shorthands() {
        with_resolver(|r| {
            let list = Value::List(vec![Value::from("$TOKEN"), Value::from("%amount")]);
            let transfer = TokenTransferKind::enforce(list, r).unwrap();
            assert_eq!(transfer.token, TokenRef::new("WEGLD-abcdef", 0));
            assert_eq!(transfer.amount, 1_000);

            let mut map = ValueMap::new();
            map.insert("identifier".to_string(), Value::from("SFT-123456"));
            map.insert("token_nonce".to_string(), Value::Int(4));
            map.insert("amount".to_string(), Value::Int(2));
            let transfer = TokenTransferKind::enforce(Value::Map(map), r).unwrap();
            assert_eq!(transfer.token.nonce, 4);

            assert!(TokenTransferKind::enforce(Value::List(vec![Value::from("X")]), r).is_err());
            let negative = Value::List(vec![Value::from("X"), Value::Int(-1)]);
            assert!(TokenTransferKind::enforce(negative, r).is_err());
        });
    }

    #[test]
    fn test_on_chain_transfer() {
        with_resolver(|r| {
            let raw = Value::List(vec![
                Value::from("alice"),
                Value::from(alice().to_bech32()),
                Value::from("EGLD"),
                Value::Int(10),
            ]);
            let transfer = OnChainTransferKind::enforce(raw, r).unwrap();
            assert_eq!(transfer.sender, transfer.receiver);
            assert!(transfer.token.is_native());
        });
    }

    #[test]
    fn test_raw_kinds_do_not_descend() {
        with_resolver(|r| {
            let raw = Value::List(vec![Value::from("$TOKEN")]);
            let shallow = SmartValue::<RawListKind>::resolve(raw.clone(), r).unwrap();
            assert_eq!(shallow, vec![Value::from("$TOKEN")]);
            let deep = SmartValue::<ListKind>::resolve(raw, r).unwrap();
            assert_eq!(deep, vec![Value::from("WEGLD-abcdef")]);
        });
    }
}
