//! Per-query shared state.
//!
//! One [`Context`] is created for a query and handed, by reference, to every
//! operator task in its plan tree. Child contexts are created while descending
//! into correlated subqueries; they see their parent's values unless
//! `isolated`, and they share the parent's error log, authenticated-user list
//! and cancellation flag so that a `sendStop` issued anywhere in the tree is
//! observable everywhere.

use crate::err::Error;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trice::Instant;

use crate::value::Value;

/// A query-scoped context, reference counted so every operator task can hold one.
pub type Context = Arc<MutableContext>;

/// Why a context is no longer runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
	Canceled,
	Timedout,
}

#[non_exhaustive]
pub struct MutableContext {
	parent: Option<Context>,
	deadline: Option<Instant>,
	cancelled: Arc<AtomicBool>,
	values: HashMap<Cow<'static, str>, Arc<Value>>,
	isolated: bool,
	/// Append-only; shared by every context derived from the same query root.
	errors: Arc<Mutex<Vec<Error>>>,
	/// The authenticated-user list, visible to predicates such as `CURRENT_USERS()`.
	authenticated_users: Arc<Vec<String>>,
	readonly: bool,
}

impl Default for MutableContext {
	fn default() -> Self {
		MutableContext::background()
	}
}

impl MutableContext {
	/// A fresh, top-level context with no parent: the root of a new query.
	pub fn background() -> Self {
		MutableContext {
			parent: None,
			deadline: None,
			cancelled: Arc::new(AtomicBool::new(false)),
			values: HashMap::new(),
			isolated: false,
			errors: Arc::new(Mutex::new(Vec::new())),
			authenticated_users: Arc::new(Vec::new()),
			readonly: false,
		}
	}

	/// A child context that inherits the parent's error log, authenticated-user
	/// list, readonly flag and cancellation, but starts with no local values.
	pub fn new(parent: &Context) -> Self {
		MutableContext {
			parent: Some(parent.clone()),
			deadline: None,
			cancelled: Arc::new(AtomicBool::new(false)),
			values: HashMap::new(),
			isolated: false,
			errors: parent.errors.clone(),
			authenticated_users: parent.authenticated_users.clone(),
			readonly: parent.readonly,
		}
	}

	/// Like [`Self::new`], but values on the parent are not visible through this
	/// context: used when entering a correlated subquery scope that must not see
	/// the enclosing row's fields by accident.
	pub fn new_isolated(parent: &Context) -> Self {
		let mut ctx = Self::new(parent);
		ctx.isolated = true;
		ctx
	}

	pub fn add_value<K>(&mut self, key: K, value: impl Into<Arc<Value>>)
	where
		K: Into<Cow<'static, str>>,
	{
		self.values.insert(key.into(), value.into());
	}

	pub fn set_readonly(&mut self, readonly: bool) {
		self.readonly = readonly;
	}

	pub fn set_authenticated_users(&mut self, users: Vec<String>) {
		self.authenticated_users = Arc::new(users);
	}

	pub fn add_deadline(&mut self, deadline: Instant) {
		self.deadline = Some(deadline);
	}

	pub fn add_timeout(&mut self, timeout: Duration) {
		self.deadline = Some(Instant::now() + timeout);
	}

	pub fn value(&self, key: &str) -> Option<&Value> {
		match self.values.get(key) {
			Some(v) => Some(v),
			None if !self.isolated => self.parent.as_ref().and_then(|p| p.value(key)),
			None => None,
		}
	}

	pub fn authenticated_users(&self) -> &[String] {
		&self.authenticated_users
	}

	pub fn readonly(&self) -> bool {
		self.readonly
	}

	/// Signals `sendStop` to this context and, by construction, to every
	/// descendant context created from it (their [`Self::done`] walks back up
	/// through this flag).
	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
	}

	pub fn done(&self) -> Option<Reason> {
		if self.cancelled.load(Ordering::Relaxed) {
			return Some(Reason::Canceled);
		}
		if let Some(deadline) = &self.deadline {
			if deadline.elapsed() > Duration::ZERO {
				return Some(Reason::Timedout);
			}
		}
		self.parent.as_ref().and_then(|ctx| ctx.done())
	}

	pub fn is_ok(&self) -> bool {
		self.done().is_none()
	}

	pub fn is_done(&self) -> bool {
		self.done().is_some()
	}

	/// Appends an error to the per-query error log. Serialized by the log's own
	/// mutex; reads (via [`Self::errors`]) take the same lock only momentarily.
	pub fn push_error(&self, err: Error) {
		error!(%err, "operator reported an error");
		self.errors.lock().expect("error log mutex poisoned").push(err);
	}

	pub fn errors(&self) -> Vec<Error> {
		self.errors.lock().expect("error log mutex poisoned").clone()
	}

	pub fn has_errors(&self) -> bool {
		!self.errors.lock().expect("error log mutex poisoned").is_empty()
	}

	pub fn freeze(self) -> Context {
		Arc::new(self)
	}
}

impl MutableContext {
	/// Builds a standalone, ready-to-use root [`Context`]. Convenience wrapper
	/// around [`Self::background`] + [`Self::freeze`] for call sites that don't
	/// need to mutate the context after construction.
	pub fn background_frozen() -> Context {
		Self::background().freeze()
	}
}
