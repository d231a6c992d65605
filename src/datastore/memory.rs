//! An in-memory [`Datastore`] used only by this crate's own tests (gated
//! behind the `test-datastore` feature, never built into a default build).

use super::{Datastore, IndexEntry, Keyspace, Namespace, Scope};
use crate::err::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct MemoryScope {
	collections: DashMap<String, Vec<IndexEntry>>,
}

#[async_trait]
impl Scope for MemoryScope {
	async fn create_collection(&self, name: &str) -> Result<()> {
		if self.collections.contains_key(name) {
			return Err(Error::CollectionExists(name.to_owned()));
		}
		self.collections.insert(name.to_owned(), Vec::new());
		Ok(())
	}

	async fn scan(&self, collection: &str) -> Result<Vec<IndexEntry>> {
		Ok(self.collections.get(collection).map(|v| v.clone()).unwrap_or_default())
	}
}

impl MemoryScope {
	pub fn seed(&self, collection: &str, entries: Vec<IndexEntry>) {
		self.collections.insert(collection.to_owned(), entries);
	}

	pub fn has_collection(&self, name: &str) -> bool {
		self.collections.contains_key(name)
	}
}

#[derive(Default)]
pub struct MemoryKeyspace {
	scopes: DashMap<String, Arc<MemoryScope>>,
}

#[async_trait]
impl Keyspace for MemoryKeyspace {
	async fn scope(&self, name: &str) -> Result<Arc<dyn Scope>> {
		let scope = self.scopes.entry(name.to_owned()).or_default().clone();
		Ok(scope)
	}
}

impl MemoryKeyspace {
	pub fn scope_handle(&self, name: &str) -> Arc<MemoryScope> {
		self.scopes.entry(name.to_owned()).or_default().clone()
	}
}

#[derive(Default)]
pub struct MemoryNamespace {
	keyspaces: DashMap<String, Arc<MemoryKeyspace>>,
}

#[async_trait]
impl Namespace for MemoryNamespace {
	async fn keyspace_by_name(&self, name: &str) -> Result<Arc<dyn Keyspace>> {
		self
			.keyspaces
			.get(name)
			.map(|k| k.clone() as Arc<dyn Keyspace>)
			.ok_or_else(|| Error::KeyspaceNotFound(name.to_owned()))
	}
}

impl MemoryNamespace {
	pub fn keyspace_handle(&self, name: &str) -> Arc<MemoryKeyspace> {
		self.keyspaces.entry(name.to_owned()).or_default().clone()
	}
}

#[derive(Default)]
pub struct MemoryDatastore {
	namespaces: DashMap<String, Arc<MemoryNamespace>>,
}

#[async_trait]
impl Datastore for MemoryDatastore {
	async fn namespace_by_name(&self, name: &str) -> Result<Arc<dyn Namespace>> {
		self
			.namespaces
			.get(name)
			.map(|n| n.clone() as Arc<dyn Namespace>)
			.ok_or_else(|| Error::NamespaceNotFound(name.to_owned()))
	}
}

impl MemoryDatastore {
	pub fn namespace_handle(&self, name: &str) -> Arc<MemoryNamespace> {
		self.namespaces.entry(name.to_owned()).or_default().clone()
	}
}
