//! Turns a formalized [`crate::algebra::Statement`] into a [`crate::plan::Operator`]
//! tree. Owns term resolution (routing a FROM term's namespace to the user or
//! system datastore and surfacing namespace/keyspace lookup failures as
//! distinct errors), the pushdown state stack that subquery planning saves
//! and restores around, and the mandatory `Authorize`/`Stream` wrapping every
//! non-subquery top-level plan gets.

use crate::algebra::{FromTerm, Statement};
use crate::datastore::{select_datastore, Datastore};
use crate::err::{Error, FormalizeError, Result};
use crate::expr::Expr;
use crate::plan::Operator;
use crate::value::{AnnotatedValue, Value};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

/// The scope every keyspace scan this builder produces targets. FROM terms in
/// this algebra don't carry a scope name of their own — DDL statements are
/// the only place one is named explicitly — so plain scans are all built
/// against this default and only a scope-resolution failure at execution
/// time (not plan-build time) can surface a problem with it.
pub const DEFAULT_SCOPE: &str = "default";

/// Feature flags the builder consults while choosing access paths. None of
/// these currently change which operator shape comes out, only whether the
/// scan-building subcomponent is allowed to consider certain strategies; kept
/// as plain fields rather than a bitset since the set is small and growing it
/// should not require touching every call site.
#[derive(Clone, Copy, Debug, Default)]
pub struct FeatureFlags {
	pub cost_based_access_paths: bool,
	pub covering_scans: bool,
}

/// The pushdown state a subquery's planning saves before it starts and a
/// parent restores afterward. `order`/`limit`/`offset` are pagination state:
/// restored only when the caller asks for pagination-gated restore (a
/// correlated subquery used as a scalar value shouldn't leak its own LIMIT
/// onto the enclosing query). Everything else restores unconditionally,
/// since grouping, aggregation and `DISTINCT` are never meant to leak across
/// a subquery boundary at all.
#[derive(Clone, Debug, Default)]
pub struct PushdownState {
	pub order_absorbed: bool,
	pub limit_absorbed: bool,
	pub offset_absorbed: bool,
	pub distinct_absorbed: bool,
	pub group_absorbed: bool,
	pub aggregates_absorbed: bool,
	pub aggregate_constraint_absorbed: bool,
}

/// Builds a [`Operator`] tree out of a [`Statement`]. One `Builder` is
/// constructed per top-level query; subquery planning pushes and pops
/// pushdown frames on the same instance rather than constructing a nested
/// one, so that the save/restore discipline in §4.3 is enforced in one
/// place.
pub struct Builder {
	user: Arc<dyn Datastore>,
	system: Arc<dyn Datastore>,
	default_namespace: String,
	is_subquery: bool,
	named_params: HashMap<String, Value>,
	positional_params: Vec<Value>,
	index_api_version: u32,
	feature_flags: FeatureFlags,
	pushdown: PushdownState,
	saved_pushdown: Vec<PushdownState>,
}

impl Builder {
	pub fn new(
		user: Arc<dyn Datastore>,
		system: Arc<dyn Datastore>,
		default_namespace: impl Into<String>,
		index_api_version: u32,
		feature_flags: FeatureFlags,
	) -> Self {
		Builder {
			user,
			system,
			default_namespace: default_namespace.into(),
			is_subquery: false,
			named_params: HashMap::new(),
			positional_params: Vec::new(),
			index_api_version,
			feature_flags,
			pushdown: PushdownState::default(),
			saved_pushdown: Vec::new(),
		}
	}

	pub fn with_named_params(mut self, params: HashMap<String, Value>) -> Self {
		self.named_params = params;
		self
	}

	pub fn with_positional_params(mut self, params: Vec<Value>) -> Self {
		self.positional_params = params;
		self
	}

	pub fn index_api_version(&self) -> u32 {
		self.index_api_version
	}

	pub fn feature_flags(&self) -> FeatureFlags {
		self.feature_flags
	}

	/// Saves the current pushdown frame and starts a fresh one for a
	/// correlated subquery's own planning.
	fn enter_subquery_scope(&mut self) {
		self.saved_pushdown.push(std::mem::take(&mut self.pushdown));
	}

	/// Restores the frame saved by [`Self::enter_subquery_scope`]. `pagination`
	/// controls whether the subquery's own order/limit/offset absorption
	/// survives into the restored frame; group/aggregate/distinct absorption
	/// is always dropped back to the parent's, regardless of `pagination`.
	fn exit_subquery_scope(&mut self, pagination: bool) {
		let inner = std::mem::take(&mut self.pushdown);
		let mut restored = self.saved_pushdown.pop().unwrap_or_default();
		if pagination {
			restored.order_absorbed = inner.order_absorbed;
			restored.limit_absorbed = inner.limit_absorbed;
			restored.offset_absorbed = inner.offset_absorbed;
		}
		self.pushdown = restored;
	}

	/// Builds `stmt` into a complete, runnable plan. Non-subquery statements
	/// always come back wrapped in the mandatory `Stream(Authorize(body))`
	/// shape (see [`Operator::wrap_with_authorize_and_stream`]); a builder
	/// already marked as planning a subquery returns the bare body instead,
	/// since only the outermost statement owns the pipeline sink.
	pub async fn build(&mut self, stmt: &Statement) -> Result<Operator> {
		stmt.formalize()?;
		let body = self.build_statement(stmt).await?;
		if self.is_subquery {
			return Ok(body);
		}
		Ok(Operator::wrap_with_authorize_and_stream(body, stmt.privileges()))
	}

	/// Builds a correlated subquery's statement against a fresh pushdown
	/// frame, restoring the caller's frame (pagination-gated) on the way out.
	pub async fn build_subquery(&mut self, stmt: &Statement, pagination: bool) -> Result<Operator> {
		let was_subquery = self.is_subquery;
		self.is_subquery = true;
		self.enter_subquery_scope();
		let result = self.build_statement(stmt).await;
		self.exit_subquery_scope(pagination);
		self.is_subquery = was_subquery;
		result
	}

	fn build_statement<'a>(&'a mut self, stmt: &'a Statement) -> BoxFuture<'a, Result<Operator>> {
		Box::pin(async move {
			match stmt {
				Statement::Select {
					from,
					filter,
					projection,
					distinct,
					group,
					order,
					limit,
					offset,
				} => {
					let mut op = self.build_from(from).await?;
					if let Some(predicate) = filter {
						op = Operator::Filter {
							child: Box::new(op),
							predicate: predicate.clone(),
						};
					}
					if !projection.is_empty() {
						op = Operator::Project {
							child: Box::new(op),
							items: projection.clone(),
						};
					}
					// Grouping and aggregation only exist in this builder as
					// pushdown-restoration state (see `PushdownState`); no
					// physical operator models `GROUP BY` yet, so absorbing
					// the clause here only means "don't let it leak across a
					// subquery boundary unrestored", not "this was pushed
					// into a scan".
					if group.is_some() {
						self.pushdown.group_absorbed = true;
					}
					if *distinct {
						self.pushdown.distinct_absorbed = true;
						op = Operator::Distinct {
							child: Box::new(op),
						};
					}
					if let Some(terms) = order {
						if !terms.is_empty() {
							self.pushdown.order_absorbed = true;
							op = Operator::Order {
								child: Box::new(op),
								terms: terms.clone(),
							};
						}
					}
					if let Some(count) = offset {
						self.pushdown.offset_absorbed = true;
						op = Operator::Offset {
							child: Box::new(op),
							count: *count,
						};
					}
					if let Some(count) = limit {
						self.pushdown.limit_absorbed = true;
						op = Operator::Limit {
							child: Box::new(op),
							count: *count,
						};
					}
					Ok(op)
				}
				Statement::SetOp {
					left,
					op,
					right,
				} => {
					let l = self.build_statement(left).await?;
					let r = self.build_statement(right).await?;
					Ok(Operator::SetOp {
						children: [Box::new(l), Box::new(r)],
						op: *op,
					})
				}
				Statement::CreateCollection {
					namespace,
					keyspace,
					scope,
					name,
					fail_if_exists,
				} => Ok(Operator::CreateCollection {
					namespace: namespace.clone(),
					keyspace: keyspace.clone(),
					scope: scope.clone(),
					name: name.clone(),
					fail_if_exists: *fail_if_exists,
				}),
			}
		})
	}

	fn build_from<'a>(&'a self, term: &'a FromTerm) -> BoxFuture<'a, Result<Operator>> {
		Box::pin(async move {
			match term {
				FromTerm::Keyspace {
					namespace,
					keyspace,
					alias,
				} => {
					let namespace = self.resolve_namespace(namespace);
					let ds = select_datastore(&namespace, &self.user, &self.system);
					// Namespace and keyspace lookups are kept as two separate
					// `?`s rather than chained with `.and_then` so the two
					// failure modes stay distinguishable: a missing namespace
					// surfaces as `Error::NamespaceNotFound`, a missing
					// keyspace inside an existing namespace as
					// `Error::KeyspaceNotFound`, never conflated into one.
					let ns = ds.namespace_by_name(&namespace).await?;
					ns.keyspace_by_name(keyspace).await?;
					// Mirrors `Formalizer::formalize_from`'s effective-alias
					// rule: an explicit alias wins, otherwise the keyspace
					// name itself, so `a.children` resolves against a scan
					// of keyspace `a` even when no `AS a` was written.
					let alias = alias.clone().unwrap_or_else(|| keyspace.clone());
					Ok(Operator::Scan {
						namespace,
						keyspace: keyspace.clone(),
						scope: DEFAULT_SCOPE.to_owned(),
						collection: keyspace.clone(),
						alias,
						covered: None,
					})
				}
				FromTerm::Join {
					left,
					right,
					on,
					outer,
				} => {
					let l = self.build_from(left).await?;
					let r = self.build_from(right).await?;
					Ok(Operator::Join {
						children: [Box::new(l), Box::new(r)],
						on: on.clone(),
						outer: *outer,
					})
				}
				FromTerm::Nest {
					left,
					right,
					on,
					alias,
					outer,
				} => {
					let l = self.build_from(left).await?;
					let r = self.build_from(right).await?;
					Ok(Operator::Nest {
						children: [Box::new(l), Box::new(r)],
						on: on.clone(),
						alias: alias.clone(),
						outer: *outer,
					})
				}
				FromTerm::Unnest {
					left,
					source,
					alias,
					filter,
					outer,
				} => {
					let child = self.build_from(left).await?;
					let alias = effective_unnest_alias(alias, source)?;
					Ok(Operator::Unnest {
						child: Box::new(child),
						source: source.clone(),
						alias,
						filter: filter.clone(),
						outer: *outer,
					})
				}
				FromTerm::Values {
					rows,
				} => {
					let placeholder = AnnotatedValue::new(Value::Null);
					let mut values = Vec::with_capacity(rows.len());
					for expr in rows {
						values.push(expr.evaluate_sync(&placeholder)?);
					}
					Ok(Operator::ValueScan {
						rows: values,
					})
				}
			}
		})
	}

	/// A FROM term's namespace name, substituting the builder's default
	/// namespace for terms that left it implicit. The `#system` name, when
	/// given explicitly, is left untouched — routing happens on whatever name
	/// comes out of here, not before.
	fn resolve_namespace(&self, namespace: &str) -> String {
		if namespace.is_empty() {
			self.default_namespace.clone()
		} else {
			namespace.to_owned()
		}
	}
}

/// Mirrors [`crate::algebra::Formalizer::formalize_from`]'s UNNEST alias rule:
/// an explicit alias wins, otherwise the source path's trailing identifier,
/// otherwise a formalization error. Recomputed here rather than threaded
/// through from formalization because `FromTerm` is immutable and formalize
/// only validates the tree, it doesn't rewrite it.
fn effective_unnest_alias(alias: &Option<String>, source: &Expr) -> Result<String> {
	if let Some(a) = alias {
		return Ok(a.clone());
	}
	let path = match source {
		Expr::Path(p) => Some(p.as_str()),
		_ => None,
	};
	path.and_then(Value::path_trailing_identifier)
		.map(str::to_owned)
		.ok_or(Error::Formalize(FormalizeError::NoTermName))
}

#[cfg(all(test, feature = "test-datastore"))]
mod tests {
	use super::*;
	use crate::algebra::{OrderDirection, OrderTerm, ProjectionItem};
	use crate::datastore::memory::MemoryDatastore;

	fn builder() -> Builder {
		let ds: Arc<dyn Datastore> = Arc::new(MemoryDatastore::default());
		Builder::new(ds.clone(), ds, "test", 1, FeatureFlags::default())
	}

	fn select_one() -> Statement {
		Statement::Select {
			from: FromTerm::Values {
				rows: vec![Expr::Literal(Value::Number(1.into()))],
			},
			filter: None,
			projection: vec![ProjectionItem {
				expr: Expr::Path("it".into()),
				alias: Some("it".into()),
			}],
			distinct: false,
			group: None,
			order: None,
			limit: None,
			offset: None,
		}
	}

	#[tokio::test]
	async fn select_one_is_a_value_scan_wrapped_in_stream_and_authorize() {
		let mut b = builder();
		let plan = b.build(&select_one()).await.unwrap();
		let Operator::Stream {
			child,
		} = plan
		else {
			panic!("expected Stream root");
		};
		let Operator::Authorize {
			child,
			privileges,
		} = *child
		else {
			panic!("expected Authorize under Stream");
		};
		assert!(privileges.is_empty());
		assert!(matches!(*child, Operator::Project { .. }));
	}

	#[tokio::test]
	async fn missing_keyspace_from_term_surfaces_as_namespace_not_found() {
		let mut b = builder();
		let stmt = Statement::Select {
			from: FromTerm::Keyspace {
				namespace: "nope".into(),
				keyspace: "widgets".into(),
				alias: None,
			},
			filter: None,
			projection: Vec::new(),
			distinct: false,
			group: None,
			order: None,
			limit: None,
			offset: None,
		};
		let err = b.build(&stmt).await.unwrap_err();
		assert!(matches!(err, Error::NamespaceNotFound(_)));
	}

	#[tokio::test]
	async fn distinct_and_order_wrap_in_declared_order() {
		let mut b = builder();
		let stmt = Statement::Select {
			from: FromTerm::Values {
				rows: vec![Expr::Literal(Value::Number(1.into()))],
			},
			filter: None,
			projection: Vec::new(),
			distinct: true,
			group: None,
			order: Some(vec![OrderTerm {
				expr: Expr::Path("it".into()),
				direction: OrderDirection::Asc,
			}]),
			limit: Some(10),
			offset: None,
		};
		let plan = b.build(&stmt).await.unwrap();
		let Operator::Stream {
			child,
		} = plan
		else {
			panic!("expected Stream root");
		};
		let Operator::Authorize {
			child,
			..
		} = *child
		else {
			panic!("expected Authorize under Stream");
		};
		// Limit was applied last, so it's the outermost operator under Authorize.
		assert!(matches!(*child, Operator::Limit { .. }));
		assert!(b.pushdown.distinct_absorbed);
		assert!(b.pushdown.order_absorbed);
		assert!(b.pushdown.limit_absorbed);
	}
}
