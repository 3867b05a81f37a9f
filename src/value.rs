//! Dynamic values held by scenes, scenario documents and smart values.
//!
//! A [`Value`] is the untyped tree every declarative field starts as. Raw
//! bytes travel on the wire as `"bytes:" + base64` so a persisted document
//! can be decoded without any external schema.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use indexmap::IndexMap;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Prefix marking base64-encoded raw bytes inside strings.
pub const BYTES_MARKER: &str = "bytes:";

/// An ordered string-keyed map of values.
pub type ValueMap = IndexMap<String, Value>;

/// Possible values of a declarative field or stored variable.
///
/// # Examples
///
/// ```
/// use sceneops::Value;
///
/// let int_val = Value::Int(42);
/// let str_val = Value::from("hello");
///
/// assert!(int_val.is_int());
/// assert!(str_val.is_string());
/// assert_eq!(str_val.to_string(), "hello");
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i128),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(ValueMap),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub const fn is_bytes(&self) -> bool {
        matches!(self, Self::Bytes(_))
    }

    pub const fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    pub const fn is_map(&self) -> bool {
        matches!(self, Self::Map(_))
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i128> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Self::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the name of this value's type, as used in error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Creates an empty map value.
    #[must_use]
    pub fn empty_map() -> Self {
        Self::Map(ValueMap::new())
    }

    /// Renders the value the way it appears nested inside a container:
    /// strings are quoted, everything else matches `Display`.
    #[must_use]
    pub fn repr(&self) -> String {
        match self {
            Self::String(s) => quote(s),
            other => other.to_string(),
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{}", format_float(*v)),
            Self::String(v) => write!(f, "{v}"),
            Self::Bytes(v) => write!(f, "{BYTES_MARKER}{}", BASE64.encode(v)),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.repr())?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", quote(k), v.repr())?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Int(v) => {
                if let Ok(small) = i64::try_from(*v) {
                    serializer.serialize_i64(small)
                } else if let Ok(unsigned) = u64::try_from(*v) {
                    serializer.serialize_u64(unsigned)
                } else {
                    serializer.serialize_str(&v.to_string())
                }
            }
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::String(v) => serializer.serialize_str(v),
            Self::Bytes(v) => serializer.serialize_str(&format!("{BYTES_MARKER}{}", BASE64.encode(v))),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "any JSON-compatible value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(i128::from(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Int(i128::from(v)))
    }

    fn visit_i128<E: de::Error>(self, v: i128) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        if let Some(encoded) = v.strip_prefix(BYTES_MARKER) {
            if let Ok(bytes) = BASE64.decode(encoded) {
                return Ok(Value::Bytes(bytes));
            }
        }
        Ok(Value::String(v.to_string()))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = ValueMap::new();
        while let Some((key, value)) = access.next_entry::<MapKey, Value>()? {
            map.insert(key.0, value);
        }
        Ok(Value::Map(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Map keys may be written as scalars in YAML (`1: foo`); they are kept as text.
struct MapKey(String);

impl<'de> Deserialize<'de> for MapKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(s) => Ok(Self(s)),
            Value::List(_) | Value::Map(_) => Err(de::Error::custom("map keys must be scalars")),
            other => Ok(Self(other.to_string())),
        }
    }
}

// Convenient From implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i128::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(i128::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Int(i128::from(v))
    }
}

impl From<i128> for Value {
    fn from(v: i128) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<ValueMap> for Value {
    fn from(v: ValueMap) -> Self {
        Self::Map(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(|i| Self::Int(i128::from(i)))
                .or_else(|| n.as_u64().map(|u| Self::Int(i128::from(u))))
                .unwrap_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN))),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<serde_yaml::Value> for Value {
    fn from(v: serde_yaml::Value) -> Self {
        match v {
            serde_yaml::Value::Null => Self::Null,
            serde_yaml::Value::Bool(b) => Self::Bool(b),
            serde_yaml::Value::Number(n) => n
                .as_i64()
                .map(|i| Self::Int(i128::from(i)))
                .or_else(|| n.as_u64().map(|u| Self::Int(i128::from(u))))
                .unwrap_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN))),
            serde_yaml::Value::String(s) => Self::String(s),
            serde_yaml::Value::Sequence(items) => Self::List(items.into_iter().map(Self::from).collect()),
            serde_yaml::Value::Mapping(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| {
                        let key = match Self::from(k) {
                            Self::String(s) => s,
                            other => other.to_string(),
                        };
                        (key, Self::from(v))
                    })
                    .collect(),
            ),
            serde_yaml::Value::Tagged(tagged) => Self::from(tagged.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Int(3).as_int(), Some(3));
        assert_eq!(Value::Int(3).as_float(), Some(3.0));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert!(Value::Null.is_null());
        assert!(Value::empty_map().is_map());
        assert_eq!(Value::Bytes(vec![1]).type_name(), "bytes");
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Int(-7).to_string(), "-7");
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Float(3.5).to_string(), "3.5");
        assert_eq!(Value::Bool(true).to_string(), "true");
        let list = Value::List(vec![Value::from("a"), Value::Int(1)]);
        assert_eq!(list.to_string(), "[\"a\", 1]");
        let mut map = ValueMap::new();
        map.insert("k".to_string(), Value::from("v"));
        assert_eq!(Value::Map(map).to_string(), "{\"k\": \"v\"}");
    }

    #[test]
    fn test_bytes_marker_serialization() {
        let value = Value::List(vec![Value::Bytes(b"abc".to_vec()), Value::from("plain")]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, "[\"bytes:YWJj\",\"plain\"]");
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_large_int_serialized_as_string() {
        let big = Value::Int(i128::from(u64::MAX) * 4);
        let json = serde_json::to_string(&big).unwrap();
        assert!(json.starts_with('"'));
        let small = serde_json::to_string(&Value::Int(u64::MAX.into())).unwrap();
        assert_eq!(small, u64::MAX.to_string());
    }

    #[test]
    fn test_yaml_conversion_keeps_order_and_scalar_keys() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("b: 1\na: [x, 2.5]\n3: three\n").unwrap();
        let value = Value::from(yaml);
        let map = value.as_map().unwrap();
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["b", "a", "3"]);
        assert_eq!(map["a"], Value::List(vec![Value::from("x"), Value::Float(2.5)]));
    }

    #[test]
    fn test_invalid_bytes_marker_stays_string() {
        let back: Value = serde_json::from_str("\"bytes:***\"").unwrap();
        assert_eq!(back, Value::from("bytes:***"));
    }
}
