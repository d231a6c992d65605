//! The privilege contract the core exposes to an external auth collaborator:
//! `Statement::privileges() -> set`. Checking those privileges against a
//! caller's credentials is someone else's job; this module only shapes the
//! set.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
	Select,
	Insert,
	Update,
	Delete,
	Ddl,
}

/// One (target, action, properties) triple. `dynamic` marks a target that can
/// only be resolved at run time (e.g. a computed keyspace name), which the
/// planner uses to decide whether the Authorize operator needs to defer the
/// check past plan-build time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privilege {
	pub namespace: String,
	pub keyspace: String,
	pub action: Action,
	pub dynamic: bool,
}

impl Privilege {
	pub fn select(namespace: String, keyspace: String) -> Self {
		Privilege {
			namespace,
			keyspace,
			action: Action::Select,
			dynamic: false,
		}
	}

	pub fn ddl(namespace: String, keyspace: String) -> Self {
		Privilege {
			namespace,
			keyspace,
			action: Action::Ddl,
			dynamic: false,
		}
	}
}

pub type PrivilegeSet = Vec<Privilege>;
