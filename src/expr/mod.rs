//! The closed expression algebra: a fixed, finite set of node variants, each
//! supporting dispatch-by-variant (`evaluate`, `Display`), a generic
//! child-rewriting mapper (`map_children`), structural equivalence (derived
//! `PartialEq`), and the AND-boundary sub-expression remover used by
//! predicate pushdown.

mod remove;

pub use remove::remove_expr;

use crate::ctx::Context;
use crate::err::{Error, Result};
use crate::value::{AnnotatedValue, Value};
use async_recursion::async_recursion;
use std::fmt::{self, Display, Formatter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
	Neg,
	Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
	And,
	Or,
	Add,
	Sub,
	Mul,
	Div,
	Rem,
	Equal,
	NotEqual,
	LessThan,
	LessThanOrEqual,
	MoreThan,
	MoreThanOrEqual,
	Contain,
}

/// An immutable expression-tree node. Every concrete node is one of this
/// fixed, finite set of variants.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Expr {
	/// A literal scalar or pre-evaluated constant.
	Literal(Value),
	/// A named bind parameter, e.g. `$id`.
	Param(String),
	/// Navigation: a dotted field path evaluated against the current row,
	/// e.g. `a.children`.
	Path(String),
	/// An index-covered field reference: resolved from the scan's covered
	/// attachment rather than by re-navigating the base document.
	Cover(String),
	Unary(UnaryOp, Box<Expr>),
	Binary(Box<Expr>, BinaryOp, Box<Expr>),
	ArrayLit(Vec<Expr>),
	ObjectLit(Vec<(String, Expr)>),
	Case {
		whens: Vec<(Expr, Expr)>,
		else_branch: Option<Box<Expr>>,
	},
	Function {
		name: String,
		args: Vec<Expr>,
	},
	/// A scalar/ANY subquery. The planner resolves `id` against its own table
	/// of correlated subquery plans; the expression layer only needs to know
	/// the variant exists so it participates in formalize/remove/evaluate
	/// dispatch like any other node.
	Subquery(SubqueryRef),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubqueryRef(pub u64);

impl Expr {
	pub fn and(conjuncts: impl IntoIterator<Item = Expr>) -> Option<Expr> {
		let mut iter = conjuncts.into_iter();
		let mut acc = iter.next()?;
		for next in iter {
			acc = Expr::Binary(Box::new(acc), BinaryOp::And, Box::new(next));
		}
		Some(acc)
	}

	/// Applies `f` to each immediate child, preserving this node's variant —
	/// the generic mapper callers build rewrites on top of (formalization's
	/// identifier substitution, for instance). Leaf variants return an
	/// unchanged clone.
	pub fn map_children(&self, f: &mut dyn FnMut(&Expr) -> Expr) -> Expr {
		match self {
			Expr::Literal(_) | Expr::Param(_) | Expr::Path(_) | Expr::Cover(_) | Expr::Subquery(_) => {
				self.clone()
			}
			Expr::Unary(op, e) => Expr::Unary(*op, Box::new(f(e))),
			Expr::Binary(l, op, r) => Expr::Binary(Box::new(f(l)), *op, Box::new(f(r))),
			Expr::ArrayLit(items) => Expr::ArrayLit(items.iter().map(f).collect()),
			Expr::ObjectLit(fields) => {
				Expr::ObjectLit(fields.iter().map(|(k, v)| (k.clone(), f(v))).collect())
			}
			Expr::Case {
				whens,
				else_branch,
			} => Expr::Case {
				whens: whens.iter().map(|(c, v)| (f(c), f(v))).collect(),
				else_branch: else_branch.as_ref().map(|e| Box::new(f(e))),
			},
			Expr::Function {
				name,
				args,
			} => Expr::Function {
				name: name.clone(),
				args: args.iter().map(f).collect(),
			},
		}
	}

	/// Structural-semantic equivalence, as required by the remover and by
	/// predicate-pushdown absorption checks. Distinct from `==` only in name:
	/// derived `PartialEq` already implements the right notion here because
	/// every variant's payload is itself structurally comparable.
	pub fn equivalent(&self, other: &Expr) -> bool {
		self == other
	}

	pub fn evaluate_sync(&self, row: &AnnotatedValue) -> Result<Value> {
		match self {
			Expr::Literal(v) => Ok(v.clone()),
			Expr::Path(path) => Ok(row.get_path(path)),
			Expr::Cover(key) => Ok(row.attachment(key).cloned().unwrap_or(Value::Missing)),
			Expr::Param(_) | Expr::Subquery(_) => Ok(Value::Missing),
			Expr::Unary(op, e) => {
				let v = e.evaluate_sync(row)?;
				eval_unary(*op, v)
			}
			Expr::Binary(l, op, r) => {
				let lv = l.evaluate_sync(row)?;
				if let Some(short) = short_circuit(*op, &lv) {
					return Ok(short);
				}
				let rv = r.evaluate_sync(row)?;
				eval_binary(*op, lv, rv)
			}
			Expr::ArrayLit(items) => {
				let mut out = Vec::with_capacity(items.len());
				for i in items {
					out.push(i.evaluate_sync(row)?);
				}
				Ok(Value::Array(out))
			}
			Expr::ObjectLit(fields) => {
				let mut obj = crate::value::Object::default();
				for (k, v) in fields {
					obj.insert(k.clone(), v.evaluate_sync(row)?);
				}
				Ok(Value::Object(obj))
			}
			Expr::Case {
				whens,
				else_branch,
			} => {
				for (cond, then) in whens {
					if cond.evaluate_sync(row)?.is_truthy() {
						return then.evaluate_sync(row);
					}
				}
				match else_branch {
					Some(e) => e.evaluate_sync(row),
					None => Ok(Value::Null),
				}
			}
			Expr::Function {
				..
			} => Ok(Value::Missing),
		}
	}

	/// Full evaluation, including functions that consult the query `Context`
	/// (e.g. `CURRENT_USERS()`) or would invoke a subquery. Suspension only
	/// happens here, never in [`Self::evaluate_sync`].
	#[async_recursion]
	pub async fn evaluate(&self, row: &AnnotatedValue, ctx: &Context) -> Result<Value> {
		match self {
			Expr::Unary(op, e) => {
				let v = e.evaluate(row, ctx).await?;
				eval_unary(*op, v)
			}
			Expr::Binary(l, op, r) => {
				let lv = l.evaluate(row, ctx).await?;
				if let Some(short) = short_circuit(*op, &lv) {
					return Ok(short);
				}
				let rv = r.evaluate(row, ctx).await?;
				eval_binary(*op, lv, rv)
			}
			Expr::ArrayLit(items) => {
				let mut out = Vec::with_capacity(items.len());
				for i in items {
					out.push(i.evaluate(row, ctx).await?);
				}
				Ok(Value::Array(out))
			}
			Expr::ObjectLit(fields) => {
				let mut obj = crate::value::Object::default();
				for (k, v) in fields {
					obj.insert(k.clone(), v.evaluate(row, ctx).await?);
				}
				Ok(Value::Object(obj))
			}
			Expr::Case {
				whens,
				else_branch,
			} => {
				for (cond, then) in whens {
					if cond.evaluate(row, ctx).await?.is_truthy() {
						return then.evaluate(row, ctx).await;
					}
				}
				match else_branch {
					Some(e) => e.evaluate(row, ctx).await,
					None => Ok(Value::Null),
				}
			}
			Expr::Function {
				name,
				args,
			} => eval_function(name, args, row, ctx).await,
			Expr::Param(name) => Ok(ctx.value(name).cloned().unwrap_or(Value::Missing)),
			// Path/Cover/Literal/Subquery never suspend.
			_ => self.evaluate_sync(row),
		}
	}
}

async fn eval_function(
	name: &str,
	args: &[Expr],
	row: &AnnotatedValue,
	ctx: &Context,
) -> Result<Value> {
	match name.to_ascii_uppercase().as_str() {
		"CURRENT_USERS" => {
			let users = ctx
				.authenticated_users()
				.iter()
				.map(|u| Value::String(u.clone()))
				.collect();
			Ok(Value::Array(users))
		}
		"ARRAY_LENGTH" => {
			let arg = args
				.first()
				.ok_or_else(|| Error::evaluation("ARRAY_LENGTH", "missing argument"))?;
			let v = arg.evaluate(row, ctx).await?;
			match v {
				Value::Array(a) => Ok(Value::Number((a.len() as i64).into())),
				_ => Ok(Value::Missing),
			}
		}
		other => Err(Error::evaluation("function", format!("unknown function `{other}`"))),
	}
}

fn short_circuit(op: BinaryOp, l: &Value) -> Option<Value> {
	match op {
		BinaryOp::Or if l.is_truthy() => Some(l.clone()),
		BinaryOp::And if !l.is_truthy() => Some(l.clone()),
		_ => None,
	}
}

fn eval_unary(op: UnaryOp, v: Value) -> Result<Value> {
	match op {
		UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
		UnaryOp::Neg => match v {
			Value::Number(n) => Ok(Value::Number((-n.to_f64()).into())),
			_ => Err(Error::evaluation("unary -", "operand is not a number")),
		},
	}
}

fn eval_binary(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
	use BinaryOp::*;
	match op {
		And => Ok(Value::Bool(l.is_truthy() && r.is_truthy())),
		Or => Ok(Value::Bool(l.is_truthy() || r.is_truthy())),
		Equal => Ok(Value::Bool(l == r)),
		NotEqual => Ok(Value::Bool(l != r)),
		LessThan | LessThanOrEqual | MoreThan | MoreThanOrEqual => {
			let ord = compare(&l, &r);
			let keep = match (op, ord) {
				(LessThan, Some(std::cmp::Ordering::Less)) => true,
				(LessThanOrEqual, Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)) => true,
				(MoreThan, Some(std::cmp::Ordering::Greater)) => true,
				(MoreThanOrEqual, Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)) => {
					true
				}
				_ => false,
			};
			Ok(Value::Bool(keep))
		}
		Contain => match l {
			Value::Array(items) => Ok(Value::Bool(items.contains(&r))),
			_ => Ok(Value::Bool(false)),
		},
		Add | Sub | Mul | Div | Rem => {
			let (Value::Number(ln), Value::Number(rn)) = (l, r) else {
				return Err(Error::evaluation("arithmetic", "operands are not both numbers"));
			};
			let (a, b) = (ln.to_f64(), rn.to_f64());
			let result = match op {
				Add => a + b,
				Sub => a - b,
				Mul => a * b,
				Div => {
					if b == 0.0 {
						return Err(Error::evaluation("arithmetic", "division by zero"));
					}
					a / b
				}
				Rem => a % b,
				_ => unreachable!(),
			};
			Ok(Value::Number(result.into()))
		}
	}
}

fn compare(l: &Value, r: &Value) -> Option<std::cmp::Ordering> {
	match (l, r) {
		(Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
		(Value::String(a), Value::String(b)) => a.partial_cmp(b),
		(Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
		_ => None,
	}
}

impl Display for UnaryOp {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			UnaryOp::Neg => write!(f, "-"),
			UnaryOp::Not => write!(f, "NOT "),
		}
	}
}

impl Display for BinaryOp {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		let s = match self {
			BinaryOp::And => "AND",
			BinaryOp::Or => "OR",
			BinaryOp::Add => "+",
			BinaryOp::Sub => "-",
			BinaryOp::Mul => "*",
			BinaryOp::Div => "/",
			BinaryOp::Rem => "%",
			BinaryOp::Equal => "=",
			BinaryOp::NotEqual => "!=",
			BinaryOp::LessThan => "<",
			BinaryOp::LessThanOrEqual => "<=",
			BinaryOp::MoreThan => ">",
			BinaryOp::MoreThanOrEqual => ">=",
			BinaryOp::Contain => "CONTAINS",
		};
		write!(f, "{s}")
	}
}

impl Display for Expr {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			Expr::Literal(v) => write!(f, "{v}"),
			Expr::Param(name) => write!(f, "${name}"),
			Expr::Path(path) => write!(f, "{path}"),
			Expr::Cover(key) => write!(f, "COVER({key})"),
			Expr::Unary(op, e) => write!(f, "{op}{e}"),
			Expr::Binary(l, op, r) => write!(f, "({l} {op} {r})"),
			Expr::ArrayLit(items) => {
				write!(f, "[")?;
				for (i, e) in items.iter().enumerate() {
					if i > 0 {
						write!(f, ", ")?;
					}
					write!(f, "{e}")?;
				}
				write!(f, "]")
			}
			Expr::ObjectLit(fields) => {
				write!(f, "{{")?;
				for (i, (k, v)) in fields.iter().enumerate() {
					if i > 0 {
						write!(f, ", ")?;
					}
					write!(f, "{k:?}: {v}")?;
				}
				write!(f, "}}")
			}
			Expr::Case {
				whens,
				else_branch,
			} => {
				write!(f, "CASE")?;
				for (c, v) in whens {
					write!(f, " WHEN {c} THEN {v}")?;
				}
				if let Some(e) = else_branch {
					write!(f, " ELSE {e}")?;
				}
				write!(f, " END")
			}
			Expr::Function {
				name,
				args,
			} => {
				write!(f, "{name}(")?;
				for (i, a) in args.iter().enumerate() {
					if i > 0 {
						write!(f, ", ")?;
					}
					write!(f, "{a}")?;
				}
				write!(f, ")")
			}
			Expr::Subquery(id) => write!(f, "SUBQUERY(#{})", id.0),
		}
	}
}
