//! The single error type shared by every component: value, expression, algebra,
//! plan, planner and execution all return `Result<_, Error>`.

use thiserror::Error;

/// A formalization failure: alias resolution during `Formalizer` rewriting.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormalizeError {
	#[error("no-term-name: FROM term has no explicit alias and none could be derived")]
	NoTermName,
	#[error("duplicate-alias: alias `{0}` is already visible in this scope")]
	DuplicateAlias(String),
	#[error("unresolved identifier `{0}`")]
	UnresolvedIdentifier(String),
}

/// The error type returned by every fallible operation in this crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
	#[error("formalization error: {0}")]
	Formalize(#[from] FormalizeError),

	#[error("privilege check failed: {0}")]
	Unauthorized(String),

	#[error("plan error: {0}")]
	Plan(String),

	#[error("namespace not found: {0}")]
	NamespaceNotFound(String),

	#[error("keyspace not found: {0}")]
	KeyspaceNotFound(String),

	#[error("evaluation error in {context}: {message}")]
	Evaluation {
		context: &'static str,
		message: String,
	},

	#[error("datastore error: {0}")]
	Datastore(String),

	#[error("collection `{0}` already exists")]
	CollectionExists(String),

	#[error("statement is read-only: write operation `{0}` refused")]
	ReadonlyViolation(&'static str),

	#[error("operator panicked: {0}")]
	OperatorPanicked(String),

	#[error("plan JSON error: {0}")]
	Json(String),
}

impl Error {
	/// Wraps an underlying evaluation failure with the contextual label the spec
	/// requires (e.g. `"UNNEST path"`, `"UNNEST filter"`).
	pub fn evaluation(context: &'static str, message: impl Into<String>) -> Self {
		Error::Evaluation {
			context,
			message: message.into(),
		}
	}
}

impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Self {
		Error::Json(e.to_string())
	}
}

pub type Result<T> = std::result::Result<T, Error>;
