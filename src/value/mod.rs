//! The JSON value type flowing through every plan operator, plus the
//! [`AnnotatedValue`] specialization used while a row is in flight (see
//! [`annotated`]).

mod annotated;
mod number;

pub use annotated::AnnotatedValue;
pub use number::Number;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::ops::{Deref, DerefMut};

/// Invariant: keys never contain NUL bytes (mirrors the JSON document model
/// this engine runs on).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Object(pub BTreeMap<String, Value>);

impl Deref for Object {
	type Target = BTreeMap<String, Value>;
	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl DerefMut for Object {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.0
	}
}

impl From<BTreeMap<String, Value>> for Object {
	fn from(v: BTreeMap<String, Value>) -> Self {
		Self(v)
	}
}

impl FromIterator<(String, Value)> for Object {
	fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
		Self(iter.into_iter().collect())
	}
}

/// A tagged-union JSON value.
///
/// `Missing` is distinct from `Null`: it is the result of navigating to a
/// field that is not present, and is never equal to `Null` under expression
/// equivalence or comparison.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum Value {
	#[default]
	#[serde(skip)]
	Missing,
	Null,
	Bool(bool),
	Number(Number),
	String(String),
	Array(Vec<Value>),
	Object(Object),
	#[serde(with = "serde_bytes_binary")]
	Binary(Vec<u8>),
}

mod serde_bytes_binary {
	use serde::{Deserializer, Serializer};

	pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
		s.serialize_bytes(v)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
		serde::Deserialize::deserialize(d)
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::String(v.to_owned())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::String(v)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Number(Number::Int(v))
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::Number(Number::Float(v))
	}
}

impl From<Number> for Value {
	fn from(v: Number) -> Self {
		Value::Number(v)
	}
}

impl From<Vec<Value>> for Value {
	fn from(v: Vec<Value>) -> Self {
		Value::Array(v)
	}
}

impl From<Object> for Value {
	fn from(v: Object) -> Self {
		Value::Object(v)
	}
}

impl Value {
	pub fn is_truthy(&self) -> bool {
		match self {
			Value::Bool(b) => *b,
			Value::Number(n) => n.is_truthy(),
			Value::String(s) => !s.is_empty(),
			Value::Array(a) => !a.is_empty(),
			Value::Object(o) => !o.is_empty(),
			Value::Binary(b) => !b.is_empty(),
			Value::Null | Value::Missing => false,
		}
	}

	pub fn is_some(&self) -> bool {
		!matches!(self, Value::Missing | Value::Null)
	}

	pub fn is_none(&self) -> bool {
		!self.is_some()
	}

	pub fn is_array(&self) -> bool {
		matches!(self, Value::Array(_))
	}

	pub fn as_array(&self) -> Option<&[Value]> {
		match self {
			Value::Array(a) => Some(a),
			_ => None,
		}
	}

	pub fn as_object(&self) -> Option<&Object> {
		match self {
			Value::Object(o) => Some(o),
			_ => None,
		}
	}

	/// Navigates a single field of an object value; any non-object, or a
	/// missing key, yields [`Value::Missing`].
	pub fn get_field(&self, name: &str) -> Value {
		match self {
			Value::Object(o) => o.get(name).cloned().unwrap_or(Value::Missing),
			_ => Value::Missing,
		}
	}

	/// Returns a copy of this value with `name` set to `value` on its top-level
	/// object fields. If this value is not an object, a fresh single-field
	/// object is returned instead (the spec only ever calls this on row values,
	/// which are always objects, but this keeps the operation total).
	pub fn with_field(&self, name: &str, value: Value) -> Value {
		let mut obj = match self {
			Value::Object(o) => o.clone(),
			_ => Object::default(),
		};
		obj.insert(name.to_owned(), value);
		Value::Object(obj)
	}

	/// Navigates a dotted path, e.g. `"a.children"`, field by field.
	pub fn get_path(&self, path: &str) -> Value {
		let mut current = self.clone();
		for segment in path.split('.') {
			current = current.get_field(segment);
			if matches!(current, Value::Missing) {
				break;
			}
		}
		current
	}

	/// The trailing identifier of a dotted path, used to default an UNNEST
	/// alias when no explicit `AS` clause is given.
	pub fn path_trailing_identifier(path: &str) -> Option<&str> {
		path.rsplit('.').next().filter(|s| !s.is_empty())
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			Value::Missing => write!(f, "MISSING"),
			Value::Null => write!(f, "NULL"),
			Value::Bool(b) => write!(f, "{b}"),
			Value::Number(n) => write!(f, "{n}"),
			Value::String(s) => write!(f, "{s:?}"),
			Value::Array(a) => {
				write!(f, "[")?;
				for (i, v) in a.iter().enumerate() {
					if i > 0 {
						write!(f, ", ")?;
					}
					write!(f, "{v}")?;
				}
				write!(f, "]")
			}
			Value::Object(o) => {
				write!(f, "{{")?;
				for (i, (k, v)) in o.iter().enumerate() {
					if i > 0 {
						write!(f, ", ")?;
					}
					write!(f, "{k:?}: {v}")?;
				}
				write!(f, "}}")
			}
			Value::Binary(b) => write!(f, "<binary {} bytes>", b.len()),
		}
	}
}

impl From<serde_json::Value> for Value {
	fn from(v: serde_json::Value) -> Self {
		match v {
			serde_json::Value::Null => Value::Null,
			serde_json::Value::Bool(b) => Value::Bool(b),
			serde_json::Value::Number(n) => Value::Number(n.into()),
			serde_json::Value::String(s) => Value::String(s),
			serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
			serde_json::Value::Object(o) => {
				Value::Object(Object(o.into_iter().map(|(k, v)| (k, v.into())).collect()))
			}
		}
	}
}
