//! The narrow contract the core consumes from the storage layer. Everything
//! below this module's boundary (wire protocol, on-disk layout, index-server
//! internals) is a named non-goal.

#[cfg(feature = "test-datastore")]
pub mod memory;

use crate::err::Result;
use crate::value::Value;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The special namespace name that routes to the system datastore rather
/// than the user datastore, matched case-insensitively.
pub const SYSTEM_NAMESPACE: &str = "#system";

pub fn is_system_namespace(name: &str) -> bool {
	name.eq_ignore_ascii_case(SYSTEM_NAMESPACE)
}

/// A single record produced by a scan: a primary key, whatever fields the
/// scan covers, and optional scan-specific metadata. Owned by the scan
/// executor until it is written into an exchange, from which point it is
/// owned by the reader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
	pub primary_key: String,
	pub covers: Value,
	pub metadata: Option<Value>,
}

#[async_trait]
pub trait Scope: Send + Sync {
	async fn create_collection(&self, name: &str) -> Result<()>;
	async fn scan(&self, collection: &str) -> Result<Vec<IndexEntry>>;
}

#[async_trait]
pub trait Keyspace: Send + Sync {
	async fn scope(&self, name: &str) -> Result<std::sync::Arc<dyn Scope>>;
}

#[async_trait]
pub trait Namespace: Send + Sync {
	async fn keyspace_by_name(&self, name: &str) -> Result<std::sync::Arc<dyn Keyspace>>;
}

#[async_trait]
pub trait Datastore: Send + Sync {
	async fn namespace_by_name(&self, name: &str) -> Result<std::sync::Arc<dyn Namespace>>;
}

/// Resolves a FROM term's namespace to either the user or the system
/// datastore, per the `#system` routing rule (matched case-insensitively).
pub fn select_datastore<'a>(
	namespace: &str,
	user: &'a std::sync::Arc<dyn Datastore>,
	system: &'a std::sync::Arc<dyn Datastore>,
) -> &'a std::sync::Arc<dyn Datastore> {
	if is_system_namespace(namespace) {
		system
	} else {
		user
	}
}
