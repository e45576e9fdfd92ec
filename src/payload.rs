//! Structured records attached to vectors, and their byte codec.
//!
//! A [`Record`] is an insertion-ordered mapping from field name to
//! [`FieldValue`]. Field order matters: the orchestration layer builds the text
//! to embed by walking a record's fields in order, so the codec must hand back
//! fields in exactly the order they were stored.
//!
//! [`PayloadCodec`] turns records into UTF-8 JSON objects and back.

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{Result, SemantraError};

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Map(Record),
}

impl FieldValue {
    /// The string content, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The integer content, if this is an integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    fn check_finite(&self) -> Result<()> {
        match self {
            FieldValue::Float(f) if !f.is_finite() => Err(SemantraError::invalid_argument(
                format!("non-finite float {f} cannot be stored"),
            )),
            FieldValue::Map(record) => record.check_finite(),
            _ => Ok(()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<Record> for FieldValue {
    fn from(value: Record) -> Self {
        FieldValue::Map(value)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FieldValue::String(s) => serializer.serialize_str(s),
            FieldValue::Integer(i) => serializer.serialize_i64(*i),
            FieldValue::Float(f) => serializer.serialize_f64(*f),
            FieldValue::Boolean(b) => serializer.serialize_bool(*b),
            FieldValue::Map(record) => record.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(FieldValueVisitor)
    }
}

struct FieldValueVisitor;

impl<'de> Visitor<'de> for FieldValueVisitor {
    type Value = FieldValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string, number, boolean or object")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<FieldValue, E> {
        Ok(FieldValue::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<FieldValue, E> {
        Ok(FieldValue::String(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<FieldValue, E> {
        Ok(FieldValue::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<FieldValue, E> {
        i64::try_from(v)
            .map(FieldValue::Integer)
            .map_err(|_| E::custom(format!("integer {v} out of range")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<FieldValue, E> {
        Ok(FieldValue::Float(v))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<FieldValue, E> {
        Ok(FieldValue::Boolean(v))
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> std::result::Result<FieldValue, A::Error> {
        RecordVisitor.visit_map(map).map(FieldValue::Map)
    }
}

/// An insertion-ordered structured record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`.
    ///
    /// An existing field keeps its position and has its value replaced; a new
    /// field is appended. Returns the previous value, if any.
    pub fn insert<K: Into<String>, V: Into<FieldValue>>(
        &mut self,
        name: K,
        value: V,
    ) -> Option<FieldValue> {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    /// Builder-style [`Record::insert`].
    pub fn with<K: Into<String>, V: Into<FieldValue>>(mut self, name: K, value: V) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        let position = self.fields.iter().position(|(k, _)| k == name)?;
        Some(self.fields.remove(position).1)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn check_finite(&self) -> Result<()> {
        self.fields.iter().try_for_each(|(_, v)| v.check_finite())
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(RecordVisitor)
    }
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
    type Value = Record;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object of field values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Record, A::Error> {
        let mut record = Record::new();
        while let Some((k, v)) = map.next_entry::<String, FieldValue>()? {
            record.insert(k, v);
        }
        Ok(record)
    }
}

impl TryFrom<Value> for Record {
    type Error = SemantraError;

    /// Convert a JSON object. `null` and arrays have no [`FieldValue`]
    /// counterpart and are rejected.
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                let mut record = Record::new();
                for (k, v) in map {
                    let field = field_from_json(&k, v)?;
                    record.insert(k, field);
                }
                Ok(record)
            }
            other => Err(SemantraError::invalid_argument(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }
}

fn field_from_json(name: &str, value: Value) -> Result<FieldValue> {
    match value {
        Value::String(s) => Ok(FieldValue::String(s)),
        Value::Bool(b) => Ok(FieldValue::Boolean(b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(FieldValue::Integer(i))
            } else if n.is_u64() {
                Err(SemantraError::invalid_argument(format!(
                    "field '{name}': integer {n} out of range"
                )))
            } else if let Some(f) = n.as_f64() {
                Ok(FieldValue::Float(f))
            } else {
                Err(SemantraError::invalid_argument(format!(
                    "field '{name}': number {n} out of range"
                )))
            }
        }
        Value::Object(_) => Record::try_from(value).map(FieldValue::Map),
        Value::Null | Value::Array(_) => Err(SemantraError::invalid_argument(format!(
            "field '{name}': null and array values are not supported"
        ))),
    }
}

/// Serializes records to and from their stored byte form.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode(record: &Record) -> Result<Vec<u8>> {
        record.check_finite()?;
        Ok(serde_json::to_vec(record)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Record> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
