//! Job inputs and outputs that may embed output references.
//!
//! `Input` is the value type of job arguments and job outputs. Any nested
//! element can be an [`OutputReference`] instead of a literal. On the wire an
//! `Input` is plain JSON, with references encoded as
//! `{"@reference": {...}}` objects.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::reference::OutputReference;

/// Object key marking an encoded reference in JSON.
pub const REFERENCE_MARKER: &str = "@reference";

/// A literal value, a reference, or a composite of both.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// A literal JSON value containing no references.
    Value(Value),
    /// A reference to another job's output.
    Reference(OutputReference),
    /// A list whose elements may contain references.
    List(Vec<Input>),
    /// A map whose values may contain references.
    Map(BTreeMap<String, Input>),
}

impl Default for Input {
    fn default() -> Self {
        Input::Value(Value::Null)
    }
}

impl Input {
    /// Build an input from its JSON encoding, decoding reference markers.
    ///
    /// Subtrees without references collapse into `Input::Value`.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(encoded) = map.get(REFERENCE_MARKER) {
                        if let Ok(reference) =
                            serde_json::from_value::<OutputReference>(encoded.clone())
                        {
                            return Input::Reference(reference);
                        }
                    }
                }
                let entries: BTreeMap<String, Input> = map
                    .into_iter()
                    .map(|(k, v)| (k, Input::from_json(v)))
                    .collect();
                if entries.values().all(Input::is_literal) {
                    Input::Value(Value::Object(
                        entries
                            .into_iter()
                            .map(|(k, v)| (k, v.into_literal()))
                            .collect(),
                    ))
                } else {
                    Input::Map(entries)
                }
            }
            Value::Array(items) => {
                let items: Vec<Input> = items.into_iter().map(Input::from_json).collect();
                if items.iter().all(Input::is_literal) {
                    Input::Value(Value::Array(
                        items.into_iter().map(Input::into_literal).collect(),
                    ))
                } else {
                    Input::List(items)
                }
            }
            other => Input::Value(other),
        }
    }

    /// Encode this input as JSON, writing references as marker objects.
    pub fn to_json(&self) -> Value {
        match self {
            Input::Value(value) => value.clone(),
            Input::Reference(reference) => {
                let mut map = Map::new();
                map.insert(
                    REFERENCE_MARKER.to_string(),
                    serde_json::to_value(reference).unwrap_or(Value::Null),
                );
                Value::Object(map)
            }
            Input::List(items) => Value::Array(items.iter().map(Input::to_json).collect()),
            Input::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// True when this input contains no references.
    pub fn is_literal(&self) -> bool {
        match self {
            Input::Value(_) => true,
            Input::Reference(_) => false,
            Input::List(items) => items.iter().all(Input::is_literal),
            Input::Map(entries) => entries.values().all(Input::is_literal),
        }
    }

    /// All references contained in this input, in traversal order.
    pub fn references(&self) -> Vec<&OutputReference> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a OutputReference>) {
        match self {
            Input::Value(_) => {}
            Input::Reference(reference) => found.push(reference),
            Input::List(items) => items.iter().for_each(|i| i.collect_references(found)),
            Input::Map(entries) => entries.values().for_each(|i| i.collect_references(found)),
        }
    }

    /// Visit every reference mutably.
    pub fn for_each_reference_mut(&mut self, f: &mut impl FnMut(&mut OutputReference)) {
        match self {
            Input::Value(_) => {}
            Input::Reference(reference) => f(reference),
            Input::List(items) => items.iter_mut().for_each(|i| i.for_each_reference_mut(f)),
            Input::Map(entries) => entries
                .values_mut()
                .for_each(|i| i.for_each_reference_mut(f)),
        }
    }

    /// Replace every reference with the value produced by `resolve`.
    pub fn substitute<E>(
        &self,
        resolve: &mut impl FnMut(&OutputReference) -> Result<Value, E>,
    ) -> Result<Value, E> {
        match self {
            Input::Value(value) => Ok(value.clone()),
            Input::Reference(reference) => resolve(reference),
            Input::List(items) => items
                .iter()
                .map(|i| i.substitute(resolve))
                .collect::<Result<Vec<_>, E>>()
                .map(Value::Array),
            Input::Map(entries) => {
                let mut map = Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), v.substitute(resolve)?);
                }
                Ok(Value::Object(map))
            }
        }
    }

    fn into_literal(self) -> Value {
        match self {
            Input::Value(value) => value,
            other => other.to_json(),
        }
    }
}

impl Serialize for Input {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Input {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Input::from_json)
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Value(value)
    }
}

impl From<OutputReference> for Input {
    fn from(reference: OutputReference) -> Self {
        Input::Reference(reference)
    }
}

impl From<&str> for Input {
    fn from(s: &str) -> Self {
        Input::Value(Value::String(s.to_string()))
    }
}

impl From<String> for Input {
    fn from(s: String) -> Self {
        Input::Value(Value::String(s))
    }
}

impl From<i32> for Input {
    fn from(n: i32) -> Self {
        Input::Value(Value::from(n))
    }
}

impl From<i64> for Input {
    fn from(n: i64) -> Self {
        Input::Value(Value::from(n))
    }
}

impl From<u64> for Input {
    fn from(n: u64) -> Self {
        Input::Value(Value::from(n))
    }
}

impl From<f64> for Input {
    fn from(n: f64) -> Self {
        Input::Value(Value::from(n))
    }
}

impl From<bool> for Input {
    fn from(b: bool) -> Self {
        Input::Value(Value::Bool(b))
    }
}

impl From<Vec<Input>> for Input {
    fn from(items: Vec<Input>) -> Self {
        Input::List(items)
    }
}

impl From<BTreeMap<String, Input>> for Input {
    fn from(entries: BTreeMap<String, Input>) -> Self {
        Input::Map(entries)
    }
}
