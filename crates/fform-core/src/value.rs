#![forbid(unsafe_code)]

//! Persistent value tree shared by form values, initial values and error trees.
//!
//! # Design
//!
//! [`Value`] is a small JSON-like tree whose containers are `im` persistent
//! collections. Cloning a value is O(1) and copy-on-write updates share every
//! untouched subtree with the original, which is what lets the path store hand
//! out snapshots freely while the engine keeps mutating its own copy.
//!
//! "Absent" is never a `Value`: lookups return `Option<&Value>` and writes take
//! `Option<Value>`, with `None` meaning "remove". An array slot that was never
//! written reads back as [`Value::Null`].
//!
//! [`Array`] carries an optional whole-array error. Error trees use it to attach
//! an error to a collection field without losing the per-element errors stored
//! in the same array.
//!
//! # Truthiness
//!
//! Error merging follows loose truthiness: `Null`, `false`, `0`, `0.0`, `NaN`
//! and `""` are falsy, everything else (including empty containers) is truthy.

use std::fmt;

use im::{OrdMap, Vector};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordered map used for object values.
pub type Map = OrdMap<String, Value>;

/// A persistent, cheaply clonable value.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Array),
    Object(Map),
}

/// Sequence value with an optional error describing the collection as a whole.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Array {
    items: Vector<Value>,
    error: Option<Box<Value>>,
}

impl Array {
    /// Create an empty array.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots, holes included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }

    /// Underlying persistent vector.
    #[must_use]
    pub fn items(&self) -> &Vector<Value> {
        &self.items
    }

    pub fn push(&mut self, value: Value) {
        self.items.push_back(value);
    }

    /// Write `value` at `index`, padding any gap with `Null` holes.
    pub fn set(&mut self, index: usize, value: Value) {
        while self.items.len() < index {
            self.items.push_back(Value::Null);
        }
        if index == self.items.len() {
            self.items.push_back(value);
        } else {
            self.items.set(index, value);
        }
    }

    /// Remove the slot at `index`, shifting later slots down.
    pub fn remove(&mut self, index: usize) -> Option<Value> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    /// Error attached to the collection as a whole.
    #[must_use]
    pub fn error(&self) -> Option<&Value> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, error: Option<Value>) {
        self.error = error.map(Box::new);
    }

    /// Attach a whole-array error, keeping the per-slot values.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<Value>) -> Self {
        self.set_error(Some(error.into()));
        self
    }
}

impl From<Vector<Value>> for Array {
    fn from(items: Vector<Value>) -> Self {
        Self { items, error: None }
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        items.into_iter().collect()
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
            error: None,
        }
    }
}

impl Value {
    /// An empty object.
    #[must_use]
    pub fn object() -> Self {
        Self::Object(Map::new())
    }

    /// An empty array.
    #[must_use]
    pub fn array() -> Self {
        Self::Array(Array::new())
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Objects and arrays.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Object(_))
    }

    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0 && !f.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Array(_) | Self::Object(_) => true,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Self::Object(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a single path segment: an object key, or a numeric index into
    /// an array.
    #[must_use]
    pub fn child(&self, segment: &str) -> Option<&Value> {
        match self {
            Self::Object(map) => map.get(segment),
            Self::Array(array) => array.get(segment.parse().ok()?),
            _ => None,
        }
    }

    /// Short name of the variant, used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::Float(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            other => write!(f, "{}", serde_json::Value::from(other)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Self::Array(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v.into())
    }
}

impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Self::Object(v)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Object(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Lossy: whole-array errors are dropped and non-finite floats become `null`.
impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Self::Null, Self::Number),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(a) => Self::Array(a.iter().map(Self::from).collect()),
            Value::Object(m) => Self::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde_json::Value::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}
