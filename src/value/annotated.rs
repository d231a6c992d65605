use super::{Object, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A [`Value`] in flight through the execution runtime: a shared, immutable
/// base document plus a small per-row overlay of field writes and attachment
/// metadata (cover values, `unnest_position`, bookmarks, original document
/// identity).
///
/// Cloning an `AnnotatedValue` is cheap — it bumps the base's reference count
/// and clones the (usually tiny or empty) overlay maps — which is what makes
/// the "every fork but the last is a cheap copy" rule in the UNNEST algorithm
/// possible: a fork that is not the last calls [`Self::with_field`] (borrowing
/// `self`), and the last fork calls [`Self::into_with_field`] (consuming
/// `self`), so only the very last fork avoids the base-pointer clone
/// entirely by reusing the original `Arc` in place.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotatedValue {
	base: Arc<Value>,
	overlay: BTreeMap<String, Value>,
	attachments: BTreeMap<String, Value>,
}

impl AnnotatedValue {
	pub fn new(base: Value) -> Self {
		AnnotatedValue {
			base: Arc::new(base),
			overlay: BTreeMap::new(),
			attachments: BTreeMap::new(),
		}
	}

	/// A cheap fork: clones the shared base pointer and the overlay, and sets
	/// `name` on the clone. Use this for every fork except the last one
	/// produced from a given parent row.
	pub fn with_field(&self, name: &str, value: Value) -> Self {
		let mut forked = self.clone();
		forked.overlay.insert(name.to_owned(), value);
		forked
	}

	/// The ownership-transferring fork: mutates and returns `self` in place,
	/// with no clone of the base pointer or the overlay. Use this for the last
	/// fork produced from a given parent row, since nothing else needs the
	/// parent afterwards.
	pub fn into_with_field(mut self, name: &str, value: Value) -> Self {
		self.overlay.insert(name.to_owned(), value);
		self
	}

	pub fn attach(&mut self, key: impl Into<String>, value: Value) {
		self.attachments.insert(key.into(), value);
	}

	pub fn into_attached(mut self, key: impl Into<String>, value: Value) -> Self {
		self.attach(key, value);
		self
	}

	pub fn attachment(&self, key: &str) -> Option<&Value> {
		self.attachments.get(key)
	}

	/// Every attachment currently set on this row, used when a row crosses an
	/// exchange boundary and has to be packed back into an [`crate::datastore::IndexEntry`]'s
	/// metadata field.
	pub fn attachments(&self) -> &BTreeMap<String, Value> {
		&self.attachments
	}

	/// The field named on this row, checking the overlay before the base.
	pub fn get_field(&self, name: &str) -> Value {
		match self.overlay.get(name) {
			Some(v) => v.clone(),
			None => self.base.get_field(name),
		}
	}

	pub fn get_path(&self, path: &str) -> Value {
		let mut segments = path.splitn(2, '.');
		let head = segments.next().unwrap_or(path);
		match segments.next() {
			Some(rest) => self.get_field(head).get_path(rest),
			None => self.get_field(head),
		}
	}

	/// Merges the base document with the field overlay into a single,
	/// consistent [`Value`]. This is what leaves the exchange for the Stream
	/// sink to emit.
	pub fn materialize(&self) -> Value {
		if self.overlay.is_empty() {
			return (*self.base).clone();
		}
		let mut fields = match &*self.base {
			Value::Object(o) => o.0.clone(),
			_ => BTreeMap::new(),
		};
		for (k, v) in &self.overlay {
			fields.insert(k.clone(), v.clone());
		}
		Value::Object(Object(fields))
	}

	pub fn base(&self) -> &Value {
		&self.base
	}
}

impl From<Value> for AnnotatedValue {
	fn from(v: Value) -> Self {
		AnnotatedValue::new(v)
	}
}
