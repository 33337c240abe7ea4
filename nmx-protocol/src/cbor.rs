//! CBOR body codec.
//!
//! NMP bodies and OIC resource payloads are CBOR maps keyed by short text
//! strings. [`CborMap`] keeps insertion order so that `decode(encode(m)) == m`
//! holds exactly, and [`CborValue`] is the closed set of value kinds the
//! management protocol uses.

use crate::error::ProtocolError;
use ciborium::value::{Integer, Value};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// A dynamically typed body value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CborValue {
    /// CBOR `null`, used for absent values.
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
    Bytes(Vec<u8>),
    Array(Vec<CborValue>),
    Map(CborMap),
}

impl CborValue {
    /// Name of the value kind, used in field type errors.
    pub fn kind(&self) -> &'static str {
        match self {
            CborValue::Null => "null",
            CborValue::Bool(_) => "bool",
            CborValue::Integer(_) => "integer",
            CborValue::Text(_) => "text",
            CborValue::Bytes(_) => "bytes",
            CborValue::Array(_) => "array",
            CborValue::Map(_) => "map",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CborValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            CborValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CborValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CborValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&CborMap> {
        match self {
            CborValue::Map(m) => Some(m),
            _ => None,
        }
    }

    fn into_ciborium(self) -> Value {
        match self {
            CborValue::Null => Value::Null,
            CborValue::Bool(b) => Value::Bool(b),
            CborValue::Integer(i) => Value::Integer(Integer::from(i)),
            CborValue::Text(s) => Value::Text(s),
            CborValue::Bytes(b) => Value::Bytes(b),
            CborValue::Array(items) => {
                Value::Array(items.into_iter().map(CborValue::into_ciborium).collect())
            }
            CborValue::Map(map) => map.into_ciborium(),
        }
    }

    fn from_ciborium(value: Value) -> Result<Self, ProtocolError> {
        let v = match value {
            Value::Null => CborValue::Null,
            Value::Bool(b) => CborValue::Bool(b),
            Value::Integer(i) => {
                CborValue::Integer(i64::try_from(i).map_err(|_| ProtocolError::IntegerOutOfRange)?)
            }
            Value::Text(s) => CborValue::Text(s),
            Value::Bytes(b) => CborValue::Bytes(b),
            Value::Array(items) => CborValue::Array(
                items
                    .into_iter()
                    .map(CborValue::from_ciborium)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(entries) => CborValue::Map(CborMap::from_ciborium(entries)?),
            Value::Float(_) => {
                return Err(ProtocolError::CborDecode(
                    "floating point values are not supported".to_string(),
                ))
            }
            Value::Tag(tag, _) => {
                return Err(ProtocolError::CborDecode(format!(
                    "tagged values are not supported (tag {tag})"
                )))
            }
            _ => {
                return Err(ProtocolError::CborDecode(
                    "unsupported value kind".to_string(),
                ))
            }
        };
        Ok(v)
    }
}

impl From<&str> for CborValue {
    fn from(s: &str) -> Self {
        CborValue::Text(s.to_string())
    }
}

impl From<String> for CborValue {
    fn from(s: String) -> Self {
        CborValue::Text(s)
    }
}

impl From<i64> for CborValue {
    fn from(i: i64) -> Self {
        CborValue::Integer(i)
    }
}

impl From<i32> for CborValue {
    fn from(i: i32) -> Self {
        CborValue::Integer(i64::from(i))
    }
}

impl From<u32> for CborValue {
    fn from(i: u32) -> Self {
        CborValue::Integer(i64::from(i))
    }
}

impl From<bool> for CborValue {
    fn from(b: bool) -> Self {
        CborValue::Bool(b)
    }
}

impl From<Vec<u8>> for CborValue {
    fn from(b: Vec<u8>) -> Self {
        CborValue::Bytes(b)
    }
}

impl From<CborMap> for CborValue {
    fn from(m: CborMap) -> Self {
        CborValue::Map(m)
    }
}

impl<T: Into<CborValue>> From<Option<T>> for CborValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CborValue::Null)
    }
}

/// An ordered map of text keys to values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CborMap {
    entries: Vec<(String, CborValue)>,
}

impl CborMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing an existing entry with the same key in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<CborValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder form of [`CborMap::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<CborValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&CborValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<CborValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Returns a text field, `Ok(None)` if absent, or an error if the key
    /// holds another kind of value.
    pub fn get_text(&self, key: &str) -> Result<Option<&str>, ProtocolError> {
        match self.get(key) {
            None => Ok(None),
            Some(CborValue::Text(s)) => Ok(Some(s)),
            Some(_) => Err(ProtocolError::InvalidField {
                key: key.to_string(),
                expected: "text",
            }),
        }
    }

    /// Returns an integer field, `Ok(None)` if absent.
    pub fn get_int(&self, key: &str) -> Result<Option<i64>, ProtocolError> {
        match self.get(key) {
            None => Ok(None),
            Some(CborValue::Integer(i)) => Ok(Some(*i)),
            Some(_) => Err(ProtocolError::InvalidField {
                key: key.to_string(),
                expected: "integer",
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CborValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn into_ciborium(self) -> Value {
        Value::Map(
            self.entries
                .into_iter()
                .map(|(k, v)| (Value::Text(k), v.into_ciborium()))
                .collect(),
        )
    }

    fn from_ciborium(entries: Vec<(Value, Value)>) -> Result<Self, ProtocolError> {
        let mut map = CborMap::new();
        for (k, v) in entries {
            let key = match k {
                Value::Text(s) => s,
                _ => return Err(ProtocolError::NonTextKey),
            };
            if map.get(&key).is_some() {
                return Err(ProtocolError::CborDecode(format!("duplicate map key {key:?}")));
            }
            map.insert(key, CborValue::from_ciborium(v)?);
        }
        Ok(map)
    }
}

impl<K: Into<String>, V: Into<CborValue>> FromIterator<(K, V)> for CborMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = CborMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for CborValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CborValue::Null => serializer.serialize_none(),
            CborValue::Bool(b) => serializer.serialize_bool(*b),
            CborValue::Integer(i) => serializer.serialize_i64(*i),
            CborValue::Text(s) => serializer.serialize_str(s),
            CborValue::Bytes(b) => serializer.serialize_bytes(b),
            CborValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            CborValue::Map(map) => map.serialize(serializer),
        }
    }
}

impl Serialize for CborMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut m = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            m.serialize_entry(k, v)?;
        }
        m.end()
    }
}

/// Encodes a map into CBOR bytes.
pub fn encode(map: &CborMap) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(64);
    ciborium::ser::into_writer(&map.clone().into_ciborium(), &mut buf)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(buf)
}

/// Decodes CBOR bytes into a map.
///
/// Empty input decodes as an empty map. Anything other than exactly one
/// well-formed top-level map is an error.
pub fn decode(bytes: &[u8]) -> Result<CborMap, ProtocolError> {
    if bytes.is_empty() {
        return Ok(CborMap::new());
    }

    let mut rest = bytes;
    let value: Value = ciborium::de::from_reader(&mut rest)
        .map_err(|e| ProtocolError::CborDecode(e.to_string()))?;
    if !rest.is_empty() {
        return Err(ProtocolError::TrailingBytes(rest.len()));
    }

    match value {
        Value::Map(entries) => CborMap::from_ciborium(entries),
        _ => Err(ProtocolError::NotAMap),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_map() -> CborMap {
        CborMap::new()
            .with("d", "hello")
            .with("rc", 0)
            .with("neg", -42i64)
            .with("ok", true)
            .with("data", vec![0xdeu8, 0xad, 0xbe, 0xef])
            .with("none", CborValue::Null)
            .with(
                "list",
                CborValue::Array(vec![CborValue::from(1), CborValue::from("two")]),
            )
            .with("nested", CborMap::new().with("k", "v"))
    }

    #[test]
    fn test_roundtrip_preserves_order_and_values() {
        let map = sample_map();
        let bytes = encode(&map).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, map);

        let keys: Vec<&str> = decoded.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec!["d", "rc", "neg", "ok", "data", "none", "list", "nested"]
        );
    }

    #[test]
    fn test_known_encoding() {
        // {"r": "hi"}
        let map = CborMap::new().with("r", "hi");
        assert_eq!(encode(&map).unwrap(), vec![0xa1, 0x61, 0x72, 0x62, 0x68, 0x69]);
    }

    #[test]
    fn test_empty_input_is_empty_map() {
        assert!(decode(&[]).unwrap().is_empty());
        assert_eq!(encode(&CborMap::new()).unwrap(), vec![0xa0]);
    }

    #[test]
    fn test_malformed_input_is_error() {
        // Map header promising one entry, then nothing.
        assert!(matches!(
            decode(&[0xa1]),
            Err(ProtocolError::CborDecode(_))
        ));
        // Text string header with truncated body.
        assert!(decode(&[0xa1, 0x61, 0x72, 0x65, 0x68]).is_err());
    }

    #[test]
    fn test_non_map_top_level() {
        // Unsigned integer 1.
        assert!(matches!(decode(&[0x01]), Err(ProtocolError::NotAMap)));
    }

    #[test]
    fn test_non_text_key() {
        // {1: 2}
        assert!(matches!(
            decode(&[0xa1, 0x01, 0x02]),
            Err(ProtocolError::NonTextKey)
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = encode(&CborMap::new().with("a", 1)).unwrap();
        bytes.push(0x00);
        assert!(matches!(
            decode(&bytes),
            Err(ProtocolError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_integer_out_of_range() {
        // {"a": 2^64 - 1}
        let bytes = [
            0xa1, 0x61, 0x61, 0x1b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        ];
        assert!(matches!(
            decode(&bytes),
            Err(ProtocolError::IntegerOutOfRange)
        ));
    }

    #[test]
    fn test_typed_getters() {
        let map = sample_map();
        assert_eq!(map.get_text("d").unwrap(), Some("hello"));
        assert_eq!(map.get_int("rc").unwrap(), Some(0));
        assert_eq!(map.get_text("missing").unwrap(), None);
        assert!(matches!(
            map.get_text("rc"),
            Err(ProtocolError::InvalidField { .. })
        ));
        assert!(map.get_int("d").is_err());
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut map = CborMap::new().with("a", 1).with("b", 2);
        map.insert("a", 3);
        assert_eq!(map.len(), 2);
        assert_eq!(map.iter().next(), Some(("a", &CborValue::Integer(3))));
        assert_eq!(map.remove("a"), Some(CborValue::Integer(3)));
        assert_eq!(map.len(), 1);
    }

    fn arb_value() -> impl Strategy<Value = CborValue> {
        let leaf = prop_oneof![
            Just(CborValue::Null),
            any::<bool>().prop_map(CborValue::Bool),
            any::<i64>().prop_map(CborValue::Integer),
            "[a-z0-9]{0,12}".prop_map(CborValue::Text),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(CborValue::Bytes),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(CborValue::Array),
                proptest::collection::vec(("[a-z]{1,4}", inner), 0..4)
                    .prop_map(|entries| CborValue::Map(entries.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_roundtrip(entries in proptest::collection::vec(("[a-z]{1,6}", arb_value()), 0..8)) {
            let map: CborMap = entries.into_iter().collect();
            let bytes = encode(&map).unwrap();
            prop_assert_eq!(decode(&bytes).unwrap(), map);
        }
    }

    #[test]
    fn test_decode_rejects_duplicate_keys() {
        // {"a": 1, "a": 2}
        let err = decode(&[0xa2, 0x61, 0x61, 0x01, 0x61, 0x61, 0x02]).unwrap_err();
        assert!(matches!(err, ProtocolError::CborDecode(msg) if msg.contains("\"a\"")));
    }
}
