//! The logical statement tree: FROM terms, projection, predicates, grouping,
//! ordering, limit/offset, set operations and DDL, all over the closed
//! [`crate::expr::Expr`] family.

mod formalize;

pub use formalize::Formalizer;

use crate::auth::Privilege;
use crate::err::Result;
use crate::expr::Expr;
use serde::{Deserialize, Serialize};

/// A single projected output column: `expr AS alias`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectionItem {
	pub expr: Expr,
	pub alias: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
	Asc,
	Desc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderTerm {
	pub expr: Expr,
	pub direction: OrderDirection,
}

/// A FROM-clause term. Each variant owns the children and expressions it
/// contributes; formalization rewrites these into a child [`Formalizer`] scope
/// (see [`formalize`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[non_exhaustive]
pub enum FromTerm {
	/// A keyspace scan: `FROM namespace:keyspace [AS alias]`.
	Keyspace {
		namespace: String,
		keyspace: String,
		alias: Option<String>,
	},
	/// `left JOIN right ON on`.
	Join {
		left: Box<FromTerm>,
		right: Box<FromTerm>,
		on: Expr,
		outer: bool,
	},
	/// `left NEST right ON on` — like Join, but the right-hand matches are
	/// collected into an array field on the left row rather than fanning it
	/// out.
	Nest {
		left: Box<FromTerm>,
		right: Box<FromTerm>,
		on: Expr,
		alias: String,
		outer: bool,
	},
	/// `left UNNEST source [AS alias]`.
	Unnest {
		left: Box<FromTerm>,
		source: Expr,
		alias: Option<String>,
		filter: Option<Expr>,
		outer: bool,
	},
	/// No table at all: a fixed list of literal rows (`SELECT 1`, `VALUES (...)`).
	Values {
		rows: Vec<Expr>,
	},
}

impl FromTerm {
	pub fn alias_hint(&self) -> Option<&str> {
		match self {
			FromTerm::Keyspace {
				alias,
				keyspace,
				..
			} => alias.as_deref().or(Some(keyspace.as_str())),
			FromTerm::Unnest {
				alias,
				..
			} => alias.as_deref(),
			FromTerm::Nest {
				alias,
				..
			} => Some(alias.as_str()),
			FromTerm::Join {
				..
			}
			| FromTerm::Values {
				..
			} => None,
		}
	}

	/// The terms whose privileges fold into the statement's overall set: scans
	/// contribute a read privilege per keyspace they touch.
	fn privileges(&self, out: &mut Vec<Privilege>) {
		match self {
			FromTerm::Keyspace {
				namespace,
				keyspace,
				..
			} => out.push(Privilege::select(namespace.clone(), keyspace.clone())),
			FromTerm::Join {
				left,
				right,
				..
			}
			| FromTerm::Nest {
				left,
				right,
				..
			} => {
				left.privileges(out);
				right.privileges(out);
			}
			FromTerm::Unnest {
				left,
				..
			} => left.privileges(out),
			FromTerm::Values {
				..
			} => {}
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOpKind {
	Union,
	UnionAll,
	Intersect,
	Except,
}

/// A logical statement. Each variant supports formalize, collect-expressions,
/// privileges, stringify and (via `#[serde(tag = "type")]`) a JSON round trip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[non_exhaustive]
pub enum Statement {
	Select {
		from: FromTerm,
		filter: Option<Expr>,
		projection: Vec<ProjectionItem>,
		distinct: bool,
		group: Option<Vec<Expr>>,
		order: Option<Vec<OrderTerm>>,
		limit: Option<i64>,
		offset: Option<i64>,
	},
	SetOp {
		left: Box<Statement>,
		op: SetOpKind,
		right: Box<Statement>,
	},
	CreateCollection {
		namespace: String,
		keyspace: String,
		scope: String,
		name: String,
		fail_if_exists: bool,
	},
}

impl Statement {
	/// Privileges contributed by this statement: one read privilege per
	/// keyspace named in its FROM terms, plus a write privilege for DDL.
	pub fn privileges(&self) -> Vec<Privilege> {
		let mut out = Vec::new();
		match self {
			Statement::Select {
				from,
				..
			} => from.privileges(&mut out),
			Statement::SetOp {
				left,
				right,
				..
			} => {
				out.extend(left.privileges());
				out.extend(right.privileges());
			}
			Statement::CreateCollection {
				namespace,
				keyspace,
				..
			} => out.push(Privilege::ddl(namespace.clone(), keyspace.clone())),
		}
		out
	}

	/// Every scalar expression this node owns directly (not the expressions
	/// owned by nested FROM terms or sub-statements), used by pushdown
	/// absorption checks.
	pub fn collect_expressions(&self) -> Vec<&Expr> {
		match self {
			Statement::Select {
				filter,
				projection,
				group,
				order,
				..
			} => {
				let mut out: Vec<&Expr> = Vec::new();
				out.extend(filter.iter());
				out.extend(projection.iter().map(|p| &p.expr));
				if let Some(g) = group {
					out.extend(g.iter());
				}
				if let Some(o) = order {
					out.extend(o.iter().map(|t| &t.expr));
				}
				out
			}
			Statement::SetOp {
				..
			}
			| Statement::CreateCollection {
				..
			} => Vec::new(),
		}
	}

	pub fn formalize(&self) -> Result<()> {
		if let Statement::Select {
			from,
			..
		} = self
		{
			let root = Formalizer::root();
			root.formalize_from(from)?;
		}
		Ok(())
	}

	pub fn is_readonly(&self) -> bool {
		!matches!(self, Statement::CreateCollection { .. })
	}
}
