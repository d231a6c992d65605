//! The physical plan tree: the operators the execution runtime actually
//! schedules. Every node has a readonly-ness, a set of contributed
//! privileges, a cost/cardinality estimate (computed, not stored — see
//! DESIGN.md for why that keeps the JSON round-trip trivially exact), and a
//! bidirectional JSON shape keyed by the `#operator` discriminator.

use crate::algebra::{OrderTerm, ProjectionItem, SetOpKind};
use crate::auth::Privilege;
use crate::expr::Expr;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A physical operator node. `#[serde(tag = "#operator")]` gives every
/// variant the `"#operator": "<Name>"` discriminator the JSON contract
/// requires; child operators nest under fields renamed to `~child`/
/// `~children` to match it exactly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "#operator")]
#[non_exhaustive]
pub enum Operator {
	/// A fixed list of literal rows and no backing keyspace — used for
	/// `SELECT 1` and `VALUES (...)`.
	ValueScan {
		rows: Vec<Value>,
	},
	/// An index/collection scan against a resolved keyspace. Each scanned
	/// document is bound under `alias` (the term's explicit alias, or the
	/// keyspace name if it didn't have one — see
	/// `Formalizer::formalize_from`) so downstream operators can navigate
	/// paths rooted at it, e.g. `a.children` for alias `a`.
	Scan {
		namespace: String,
		keyspace: String,
		scope: String,
		collection: String,
		alias: String,
		covered: Option<Vec<Expr>>,
	},
	Filter {
		#[serde(rename = "~child")]
		child: Box<Operator>,
		predicate: Expr,
	},
	Project {
		#[serde(rename = "~child")]
		child: Box<Operator>,
		items: Vec<ProjectionItem>,
	},
	Unnest {
		#[serde(rename = "~child")]
		child: Box<Operator>,
		source: Expr,
		alias: String,
		filter: Option<Expr>,
		outer: bool,
	},
	Join {
		#[serde(rename = "~children")]
		children: [Box<Operator>; 2],
		on: Expr,
		outer: bool,
	},
	Nest {
		#[serde(rename = "~children")]
		children: [Box<Operator>; 2],
		on: Expr,
		alias: String,
		outer: bool,
	},
	Order {
		#[serde(rename = "~child")]
		child: Box<Operator>,
		terms: Vec<OrderTerm>,
	},
	Limit {
		#[serde(rename = "~child")]
		child: Box<Operator>,
		count: i64,
	},
	Offset {
		#[serde(rename = "~child")]
		child: Box<Operator>,
		count: i64,
	},
	SetOp {
		#[serde(rename = "~children")]
		children: [Box<Operator>; 2],
		op: SetOpKind,
	},
	/// `SELECT DISTINCT` — folds duplicate output rows. Always restored after
	/// pushdown regardless of the pagination flag; see the planner.
	Distinct {
		#[serde(rename = "~child")]
		child: Box<Operator>,
	},
	Authorize {
		#[serde(rename = "~child")]
		child: Box<Operator>,
		privileges: Vec<Privilege>,
	},
	/// The mandatory pipeline sink: every non-subquery, non-prepared plan's
	/// root is `Sequence(Authorize(body), Stream)`.
	Stream {
		#[serde(rename = "~child")]
		child: Box<Operator>,
	},
	CreateCollection {
		namespace: String,
		keyspace: String,
		scope: String,
		name: String,
		fail_if_exists: bool,
	},
}

impl Operator {
	/// Wraps `body` in the mandatory `Sequence(Authorize(body, privileges),
	/// Stream)` shape. Inserted even when `privileges` is empty: downstream
	/// execution needs the authenticated-user list available for predicates
	/// like `CURRENT_USERS()` regardless of whether this particular statement
	/// needed privilege checking.
	pub fn wrap_with_authorize_and_stream(body: Operator, privileges: Vec<Privilege>) -> Operator {
		Operator::Stream {
			child: Box::new(Operator::Authorize {
				child: Box::new(body),
				privileges,
			}),
		}
	}

	pub fn is_readonly(&self) -> bool {
		!matches!(self, Operator::CreateCollection { .. })
			&& self.children().iter().all(|c| c.is_readonly())
	}

	pub fn privileges(&self) -> Vec<Privilege> {
		match self {
			Operator::Authorize {
				privileges,
				..
			} => privileges.clone(),
			Operator::CreateCollection {
				namespace,
				keyspace,
				..
			} => vec![Privilege::ddl(namespace.clone(), keyspace.clone())],
			Operator::Scan {
				namespace,
				keyspace,
				..
			} => vec![Privilege::select(namespace.clone(), keyspace.clone())],
			_ => self.children().iter().flat_map(|c| c.privileges()).collect(),
		}
	}

	/// A coarse, monotonic cost estimate: leaves cost 1, each operator adds a
	/// constant overhead on top of its children's summed cost. Good enough to
	/// rank access paths; not claimed to model real I/O cost.
	pub fn cost(&self) -> f64 {
		let children_cost: f64 = self.children().iter().map(|c| c.cost()).sum();
		let overhead = match self {
			Operator::ValueScan {
				..
			}
			| Operator::Scan {
				..
			} => 1.0,
			Operator::Join {
				..
			}
			| Operator::Nest {
				..
			} => 2.0,
			_ => 0.1,
		};
		children_cost + overhead
	}

	pub fn cardinality(&self) -> f64 {
		match self {
			Operator::ValueScan {
				rows,
			} => rows.len() as f64,
			Operator::Scan {
				..
			} => 100.0,
			Operator::Limit {
				child,
				count,
			} => child.cardinality().min(*count as f64),
			Operator::Filter {
				child,
				..
			} => child.cardinality() * 0.5,
			Operator::Join {
				children,
				..
			} => children[0].cardinality() * children[1].cardinality().max(1.0),
			_ => self.children().first().map(|c| c.cardinality()).unwrap_or(0.0),
		}
	}

	fn children(&self) -> Vec<&Operator> {
		match self {
			Operator::ValueScan {
				..
			}
			| Operator::Scan {
				..
			}
			| Operator::CreateCollection {
				..
			} => Vec::new(),
			Operator::Filter {
				child,
				..
			}
			| Operator::Project {
				child,
				..
			}
			| Operator::Unnest {
				child,
				..
			}
			| Operator::Order {
				child,
				..
			}
			| Operator::Limit {
				child,
				..
			}
			| Operator::Offset {
				child,
				..
			}
			| Operator::Distinct {
				child,
			}
			| Operator::Authorize {
				child,
				..
			}
			| Operator::Stream {
				child,
			} => vec![child],
			Operator::Join {
				children,
				..
			}
			| Operator::Nest {
				children,
				..
			}
			| Operator::SetOp {
				children,
				..
			} => children.iter().map(|b| b.as_ref()).collect(),
		}
	}
}
