//! Concrete operator task bodies. Every function here is spawned via
//! [`super::lifecycle::spawn_guarded`] by [`spawn_node`], which recursively
//! wires a plan subtree into a chain of [`super::exchange::EntryExchange`]s —
//! the contract in §4.6 that operators never talk to each other any other
//! way.

use super::exchange::{EntryExchange, Received};
use super::lifecycle::{self, Lifecycle};
use super::{entry_to_row, row_to_entry};
use crate::algebra::{OrderDirection, OrderTerm, ProjectionItem, SetOpKind};
use crate::auth::{Action, Privilege};
use crate::ctx::Context;
use crate::datastore::Datastore;
use crate::err::{Error, Result};
use crate::expr::Expr;
use crate::plan::Operator;
use crate::value::{AnnotatedValue, Object, Value};
use std::cmp::Ordering;
use std::sync::Arc;

/// Recursively spawns `op` and everything below it, returning the exchange
/// its output will arrive on. The returned exchange's two-phase close is
/// owned jointly by the task spawned here (producer side) and whatever reads
/// from it (consumer side).
pub(super) fn spawn_node(ctx: Context, ds: Arc<dyn Datastore>, op: Operator) -> Arc<EntryExchange> {
	match op {
		Operator::ValueScan {
			rows,
		} => {
			let output = Arc::new(EntryExchange::standard());
			spawn(ctx, "ValueScan", run_value_scan(rows, output.clone()));
			output
		}
		Operator::Scan {
			namespace,
			keyspace,
			scope,
			collection,
			alias,
			..
		} => {
			let output = Arc::new(EntryExchange::standard());
			spawn(
				ctx.clone(),
				"Scan",
				run_scan(ctx, ds, namespace, keyspace, scope, collection, alias, output.clone()),
			);
			output
		}
		Operator::Filter {
			child,
			predicate,
		} => {
			let input = spawn_node(ctx.clone(), ds, *child);
			let output = Arc::new(EntryExchange::standard());
			spawn(
				ctx.clone(),
				"Filter",
				run_filter(ctx, input, predicate, output.clone()),
			);
			output
		}
		Operator::Project {
			child,
			items,
		} => {
			let input = spawn_node(ctx.clone(), ds, *child);
			let output = Arc::new(EntryExchange::standard());
			spawn(
				ctx.clone(),
				"Project",
				run_project(ctx, input, items, output.clone()),
			);
			output
		}
		Operator::Unnest {
			child,
			source,
			alias,
			filter,
			outer,
		} => {
			let input = spawn_node(ctx.clone(), ds, *child);
			let output = Arc::new(EntryExchange::standard());
			spawn(
				ctx.clone(),
				"Unnest",
				run_unnest(ctx, input, source, alias, filter, outer, output.clone()),
			);
			output
		}
		Operator::Join {
			children: [left, right],
			on,
			outer,
		} => {
			let left = spawn_node(ctx.clone(), ds.clone(), *left);
			let right = spawn_node(ctx.clone(), ds, *right);
			let output = Arc::new(EntryExchange::standard());
			spawn(
				ctx.clone(),
				"Join",
				run_join(ctx, left, right, on, outer, output.clone()),
			);
			output
		}
		Operator::Nest {
			children: [left, right],
			on,
			alias,
			outer,
		} => {
			let left = spawn_node(ctx.clone(), ds.clone(), *left);
			let right = spawn_node(ctx.clone(), ds, *right);
			let output = Arc::new(EntryExchange::standard());
			spawn(
				ctx.clone(),
				"Nest",
				run_nest(ctx, left, right, on, alias, outer, output.clone()),
			);
			output
		}
		Operator::Order {
			child,
			terms,
		} => {
			let input = spawn_node(ctx.clone(), ds, *child);
			let output = Arc::new(EntryExchange::standard());
			spawn(ctx.clone(), "Order", run_order(ctx, input, terms, output.clone()));
			output
		}
		Operator::Limit {
			child,
			count,
		} => {
			let input = spawn_node(ctx.clone(), ds, *child);
			let output = Arc::new(EntryExchange::standard());
			spawn(ctx.clone(), "Limit", run_limit(input, count, output.clone()));
			output
		}
		Operator::Offset {
			child,
			count,
		} => {
			let input = spawn_node(ctx.clone(), ds, *child);
			let output = Arc::new(EntryExchange::standard());
			spawn(ctx.clone(), "Offset", run_offset(input, count, output.clone()));
			output
		}
		Operator::SetOp {
			children: [left, right],
			op,
		} => {
			let left = spawn_node(ctx.clone(), ds.clone(), *left);
			let right = spawn_node(ctx.clone(), ds, *right);
			let output = Arc::new(EntryExchange::standard());
			spawn(ctx.clone(), "SetOp", run_setop(left, right, op, output.clone()));
			output
		}
		Operator::Distinct {
			child,
		} => {
			let input = spawn_node(ctx.clone(), ds, *child);
			let output = Arc::new(EntryExchange::standard());
			spawn(ctx.clone(), "Distinct", run_distinct(ctx, input, output.clone()));
			output
		}
		Operator::Authorize {
			child,
			privileges,
		} => {
			let input = spawn_node(ctx.clone(), ds, *child);
			let output = Arc::new(EntryExchange::standard());
			spawn(
				ctx.clone(),
				"Authorize",
				run_authorize(ctx, input, privileges, output.clone()),
			);
			output
		}
		Operator::Stream {
			child,
		} => spawn_node(ctx, ds, *child),
		Operator::CreateCollection {
			namespace,
			keyspace,
			scope,
			name,
			fail_if_exists,
		} => {
			let output = Arc::new(EntryExchange::standard());
			spawn(
				ctx.clone(),
				"CreateCollection",
				run_create_collection_leaf(ctx, ds, namespace, keyspace, scope, name, fail_if_exists, output.clone()),
			);
			output
		}
	}
}

/// Wraps `spawn_guarded`, discarding the join handle — the caller drives the
/// pipeline by draining the root `Stream` channel, not by joining tasks.
fn spawn(ctx: Context, name: &'static str, fut: impl std::future::Future<Output = Result<()>> + Send + 'static) {
	lifecycle::spawn_guarded(ctx, name, fut);
}

pub(super) async fn run_stream(input: Arc<EntryExchange>, tx: channel::Sender<Value>) -> Result<()> {
	loop {
		match input.receive().await {
			Received::Item(entry) => {
				let row = entry_to_row(entry);
				if tx.send(row.materialize()).await.is_err() {
					// Receiver dropped: the caller stopped reading early.
					input.send_stop();
					break;
				}
			}
			Received::Stopped | Received::Exhausted => break,
		}
	}
	input.close();
	Ok(())
}

async fn run_value_scan(rows: Vec<Value>, output: Arc<EntryExchange>) -> Result<()> {
	for v in rows {
		let row = AnnotatedValue::new(v);
		if !output.send(row_to_entry(String::new(), &row)).await {
			break;
		}
	}
	output.close();
	Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_scan(
	ctx: Context,
	ds: Arc<dyn Datastore>,
	namespace: String,
	keyspace: String,
	scope: String,
	collection: String,
	alias: String,
	output: Arc<EntryExchange>,
) -> Result<()> {
	let result = async {
		let ns = ds.namespace_by_name(&namespace).await?;
		let ks = ns.keyspace_by_name(&keyspace).await?;
		let sc = ks.scope(&scope).await?;
		sc.scan(&collection).await
	}
	.await;
	match result {
		Ok(entries) => {
			for mut entry in entries {
				if ctx.is_done() {
					break;
				}
				// Bind the scanned document under its alias so downstream
				// path expressions like `a.children` resolve against it;
				// the entry's own metadata (attachments) passes through
				// unwrapped, it isn't part of the aliased document.
				let mut fields = std::collections::BTreeMap::new();
				fields.insert(alias.clone(), entry.covers);
				entry.covers = Value::Object(Object(fields));
				if !output.send(entry).await {
					break;
				}
			}
			output.close();
			Ok(())
		}
		Err(err) => {
			output.close();
			Err(err)
		}
	}
}

async fn run_filter(ctx: Context, input: Arc<EntryExchange>, predicate: Expr, output: Arc<EntryExchange>) -> Result<()> {
	// Run the body in its own block so an evaluation error propagated by `?`
	// still falls through to the unconditional closes below: the two-phase
	// close contract (§4.6) must hold on every return, not only the loop's
	// normal exits, or a downstream `receive()` blocks forever.
	let result = async {
		loop {
			match input.receive().await {
				Received::Item(entry) => {
					let pk = entry.primary_key.clone();
					let row = entry_to_row(entry);
					let keep = predicate.evaluate(&row, &ctx).await?.is_truthy();
					if keep && !output.send(row_to_entry(pk, &row)).await {
						break;
					}
				}
				Received::Stopped => {
					output.send_stop();
					break;
				}
				Received::Exhausted => break,
			}
		}
		Ok(())
	}
	.await;
	input.close();
	output.close();
	result
}

fn projection_key(item: &ProjectionItem) -> String {
	if let Some(alias) = &item.alias {
		return alias.clone();
	}
	match &item.expr {
		Expr::Path(p) => Value::path_trailing_identifier(p).unwrap_or(p).to_owned(),
		other => other.to_string(),
	}
}

async fn run_project(
	ctx: Context,
	input: Arc<EntryExchange>,
	items: Vec<ProjectionItem>,
	output: Arc<EntryExchange>,
) -> Result<()> {
	// See `run_filter`'s comment: the body runs in its own block so a
	// propagated evaluation error still reaches the unconditional closes.
	let result = async {
		loop {
			match input.receive().await {
				Received::Item(entry) => {
					let pk = entry.primary_key.clone();
					let row = entry_to_row(entry);
					let mut fields = std::collections::BTreeMap::new();
					for item in &items {
						let value = item.expr.evaluate(&row, &ctx).await?;
						fields.insert(projection_key(item), value);
					}
					let projected = AnnotatedValue::new(Value::Object(Object(fields)));
					if !output.send(row_to_entry(pk, &projected)).await {
						break;
					}
				}
				Received::Stopped => {
					output.send_stop();
					break;
				}
				Received::Exhausted => break,
			}
		}
		Ok(())
	}
	.await;
	input.close();
	output.close();
	result
}

#[allow(clippy::too_many_arguments)]
async fn run_unnest(
	ctx: Context,
	input: Arc<EntryExchange>,
	source: Expr,
	alias: String,
	filter: Option<Expr>,
	outer: bool,
	output: Arc<EntryExchange>,
) -> Result<()> {
	// See `run_filter`'s comment: the body runs in its own block so a
	// propagated evaluation error still reaches the unconditional closes.
	let result = async {
		'outer: loop {
			match input.receive().await {
				Received::Item(entry) => {
					let pk = entry.primary_key.clone();
					let row = entry_to_row(entry);
					let sourced = source
						.evaluate(&row, &ctx)
						.await
						.map_err(|e| Error::evaluation("UNNEST path", e.to_string()))?;
					let elements = match sourced {
						Value::Array(a) => a,
						_ => Vec::new(),
					};
					if elements.is_empty() {
						if outer {
							// Forwarded unchanged: no `alias` field, no
							// `unnest_position` attachment. An outer UNNEST over
							// an empty array means "there was nothing to unnest",
							// not "unnest produced one null element".
							if !output.send(row_to_entry(pk, &row)).await {
								break 'outer;
							}
						}
						continue;
					}
					// The filter runs against a scope independent of the parent row
					// (`{alias: element}` alone), so rejecting an element never forces
					// a clone of the parent. Survivors are collected up front so the
					// copy/move fork decision in the loop below can key off "is this
					// the last *surviving* element", not the last element overall.
					let mut survivors: Vec<(usize, Value)> = Vec::with_capacity(elements.len());
					for (i, element) in elements.into_iter().enumerate() {
						if let Some(f) = &filter {
							let scope_obj: Object = std::iter::once((alias.clone(), element.clone())).collect();
							let scope = AnnotatedValue::new(Value::Object(scope_obj));
							let keep = f
								.evaluate(&scope, &ctx)
								.await
								.map_err(|e| Error::evaluation("UNNEST filter", e.to_string()))?
								.is_truthy();
							if !keep {
								continue;
							}
						}
						survivors.push((i, element));
					}
					if survivors.is_empty() {
						continue;
					}
					let last = survivors.len() - 1;
					let mut row_opt = Some(row);
					for (pos, (i, element)) in survivors.into_iter().enumerate() {
						let mut forked = if pos == last {
							row_opt.take().unwrap().into_with_field(&alias, element)
						} else {
							row_opt.as_ref().unwrap().with_field(&alias, element)
						};
						forked.attach("unnest_position", Value::Number((i as i64).into()));
						if !output.send(row_to_entry(pk.clone(), &forked)).await {
							break 'outer;
						}
					}
				}
				Received::Stopped => {
					output.send_stop();
					break;
				}
				Received::Exhausted => break,
			}
		}
		Ok(())
	}
	.await;
	input.close();
	output.close();
	result
}

fn merge_rows(left: &AnnotatedValue, right: &AnnotatedValue) -> AnnotatedValue {
	let mut fields = match left.materialize() {
		Value::Object(o) => o.0,
		_ => Default::default(),
	};
	if let Value::Object(o) = right.materialize() {
		fields.extend(o.0);
	}
	AnnotatedValue::new(Value::Object(Object(fields)))
}

async fn drain_all_rows(ex: &EntryExchange) -> Vec<(String, AnnotatedValue)> {
	let mut out = Vec::new();
	loop {
		match ex.receive().await {
			Received::Item(entry) => {
				let pk = entry.primary_key.clone();
				out.push((pk, entry_to_row(entry)));
			}
			Received::Stopped | Received::Exhausted => break,
		}
	}
	ex.close();
	out
}

async fn drain_all_values(ex: &EntryExchange) -> Vec<Value> {
	drain_all_rows(ex).await.into_iter().map(|(_, row)| row.materialize()).collect()
}

async fn run_join(
	ctx: Context,
	left: Arc<EntryExchange>,
	right: Arc<EntryExchange>,
	on: Expr,
	outer: bool,
	output: Arc<EntryExchange>,
) -> Result<()> {
	let right_rows: Vec<AnnotatedValue> = drain_all_rows(&right).await.into_iter().map(|(_, r)| r).collect();
	loop {
		match left.receive().await {
			Received::Item(entry) => {
				let pk = entry.primary_key.clone();
				let lrow = entry_to_row(entry);
				let mut matched = false;
				for rrow in &right_rows {
					let combined = merge_rows(&lrow, rrow);
					if on.evaluate(&combined, &ctx).await?.is_truthy() {
						matched = true;
						if !output.send(row_to_entry(pk.clone(), &combined)).await {
							left.close();
							output.close();
							return Ok(());
						}
					}
				}
				if !matched && outer && !output.send(row_to_entry(pk, &lrow)).await {
					break;
				}
			}
			Received::Stopped => {
				output.send_stop();
				break;
			}
			Received::Exhausted => break,
		}
	}
	left.close();
	output.close();
	Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_nest(
	ctx: Context,
	left: Arc<EntryExchange>,
	right: Arc<EntryExchange>,
	on: Expr,
	alias: String,
	outer: bool,
	output: Arc<EntryExchange>,
) -> Result<()> {
	let right_rows: Vec<AnnotatedValue> = drain_all_rows(&right).await.into_iter().map(|(_, r)| r).collect();
	loop {
		match left.receive().await {
			Received::Item(entry) => {
				let pk = entry.primary_key.clone();
				let lrow = entry_to_row(entry);
				let mut matches = Vec::new();
				for rrow in &right_rows {
					let combined = merge_rows(&lrow, rrow);
					if on.evaluate(&combined, &ctx).await?.is_truthy() {
						matches.push(rrow.materialize());
					}
				}
				if matches.is_empty() && !outer {
					continue;
				}
				let forked = lrow.into_with_field(&alias, Value::Array(matches));
				if !output.send(row_to_entry(pk, &forked)).await {
					break;
				}
			}
			Received::Stopped => {
				output.send_stop();
				break;
			}
			Received::Exhausted => break,
		}
	}
	left.close();
	output.close();
	Ok(())
}

fn order_key_cmp(a: &Value, b: &Value) -> Ordering {
	match (a, b) {
		(Value::Number(x), Value::Number(y)) => x.cmp(y),
		(Value::String(x), Value::String(y)) => x.cmp(y),
		(Value::Bool(x), Value::Bool(y)) => x.cmp(y),
		(Value::Null, Value::Null) | (Value::Missing, Value::Missing) => Ordering::Equal,
		(Value::Missing, _) => Ordering::Less,
		(_, Value::Missing) => Ordering::Greater,
		(Value::Null, _) => Ordering::Less,
		(_, Value::Null) => Ordering::Greater,
		_ => Ordering::Equal,
	}
}

async fn run_order(ctx: Context, input: Arc<EntryExchange>, terms: Vec<OrderTerm>, output: Arc<EntryExchange>) -> Result<()> {
	let rows = drain_all_rows(&input).await;
	let mut keyed = Vec::with_capacity(rows.len());
	for (pk, row) in rows {
		let mut keys = Vec::with_capacity(terms.len());
		for term in &terms {
			keys.push(term.expr.evaluate(&row, &ctx).await?);
		}
		keyed.push((keys, pk, row));
	}
	keyed.sort_by(|a, b| {
		for (i, term) in terms.iter().enumerate() {
			let mut ord = order_key_cmp(&a.0[i], &b.0[i]);
			if term.direction == OrderDirection::Desc {
				ord = ord.reverse();
			}
			if ord != Ordering::Equal {
				return ord;
			}
		}
		Ordering::Equal
	});
	for (_, pk, row) in keyed {
		if !output.send(row_to_entry(pk, &row)).await {
			break;
		}
	}
	output.close();
	Ok(())
}

async fn run_limit(input: Arc<EntryExchange>, count: i64, output: Arc<EntryExchange>) -> Result<()> {
	let mut emitted = 0i64;
	loop {
		if emitted >= count {
			input.send_stop();
			break;
		}
		match input.receive().await {
			Received::Item(entry) => {
				if !output.send(entry).await {
					break;
				}
				emitted += 1;
			}
			Received::Stopped => {
				output.send_stop();
				break;
			}
			Received::Exhausted => break,
		}
	}
	input.close();
	output.close();
	Ok(())
}

async fn run_offset(input: Arc<EntryExchange>, count: i64, output: Arc<EntryExchange>) -> Result<()> {
	let mut skipped = 0i64;
	loop {
		match input.receive().await {
			Received::Item(entry) => {
				if skipped < count {
					skipped += 1;
					continue;
				}
				if !output.send(entry).await {
					break;
				}
			}
			Received::Stopped => {
				output.send_stop();
				break;
			}
			Received::Exhausted => break,
		}
	}
	input.close();
	output.close();
	Ok(())
}

async fn run_setop(left: Arc<EntryExchange>, right: Arc<EntryExchange>, op: SetOpKind, output: Arc<EntryExchange>) -> Result<()> {
	let lvals = drain_all_values(&left).await;
	let rvals = drain_all_values(&right).await;
	let result: Vec<Value> = match op {
		SetOpKind::UnionAll => lvals.into_iter().chain(rvals).collect(),
		SetOpKind::Union => {
			let mut out: Vec<Value> = Vec::new();
			for v in lvals.into_iter().chain(rvals) {
				if !out.contains(&v) {
					out.push(v);
				}
			}
			out
		}
		SetOpKind::Intersect => {
			let mut out: Vec<Value> = Vec::new();
			for v in lvals {
				if rvals.contains(&v) && !out.contains(&v) {
					out.push(v);
				}
			}
			out
		}
		SetOpKind::Except => {
			let mut out: Vec<Value> = Vec::new();
			for v in lvals {
				if !rvals.contains(&v) && !out.contains(&v) {
					out.push(v);
				}
			}
			out
		}
	};
	for v in result {
		let row = AnnotatedValue::new(v);
		if !output.send(row_to_entry(String::new(), &row)).await {
			break;
		}
	}
	output.close();
	Ok(())
}

async fn run_distinct(ctx: Context, input: Arc<EntryExchange>, output: Arc<EntryExchange>) -> Result<()> {
	let mut seen: radix_trie::Trie<String, ()> = radix_trie::Trie::new();
	loop {
		if ctx.is_done() {
			input.send_stop();
		}
		match input.receive().await {
			Received::Item(entry) => {
				let pk = entry.primary_key.clone();
				let row = entry_to_row(entry);
				let key = serde_json::to_string(&row.materialize())?;
				if seen.get(&key).is_none() {
					seen.insert(key, ());
					if !output.send(row_to_entry(pk, &row)).await {
						break;
					}
				}
			}
			Received::Stopped => {
				output.send_stop();
				break;
			}
			Received::Exhausted => break,
		}
	}
	input.close();
	output.close();
	Ok(())
}

/// Enforces the hard readonly refusal (§4.7): a readonly context may never
/// reach an operator that contributes a non-`Select` privilege.
pub(super) fn check_readonly(ctx: &Context, privileges: &[Privilege]) -> Result<()> {
	if ctx.readonly() && privileges.iter().any(|p| p.action != Action::Select) {
		return Err(Error::ReadonlyViolation("write operation in a readonly context"));
	}
	Ok(())
}

async fn run_authorize(
	ctx: Context,
	input: Arc<EntryExchange>,
	privileges: Vec<Privilege>,
	output: Arc<EntryExchange>,
) -> Result<()> {
	if let Err(err) = check_readonly(&ctx, &privileges) {
		input.send_stop();
		input.close();
		output.close();
		return Err(err);
	}
	loop {
		match input.receive().await {
			Received::Item(entry) => {
				if !output.send(entry).await {
					break;
				}
			}
			Received::Stopped => {
				output.send_stop();
				break;
			}
			Received::Exhausted => break,
		}
	}
	input.close();
	output.close();
	Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_create_collection_leaf(
	ctx: Context,
	ds: Arc<dyn Datastore>,
	namespace: String,
	keyspace: String,
	scope: String,
	name: String,
	fail_if_exists: bool,
	output: Arc<EntryExchange>,
) -> Result<()> {
	let result = run_create_collection(ctx, ds, namespace, keyspace, scope, name, fail_if_exists).await;
	// A DDL statement never produces rows; it either succeeds silently or
	// propagates an error through the spawned task's Context error log.
	output.close();
	result
}

#[allow(clippy::too_many_arguments)]
pub(super) async fn run_create_collection(
	ctx: Context,
	ds: Arc<dyn Datastore>,
	namespace: String,
	keyspace: String,
	scope: String,
	name: String,
	fail_if_exists: bool,
) -> Result<()> {
	if ctx.readonly() {
		return Err(Error::ReadonlyViolation("CREATE COLLECTION"));
	}
	let lifecycle = Lifecycle::default();
	lifecycle.enter_run_once();
	let outcome = async {
		let ns = ds.namespace_by_name(&namespace).await?;
		let ks = ns.keyspace_by_name(&keyspace).await?;
		let sc = ks.scope(&scope).await?;
		sc.create_collection(&name).await
	}
	.await;
	lifecycle.transition_stopping();
	let result = match outcome {
		Ok(()) => Ok(()),
		Err(Error::CollectionExists(existing)) if !fail_if_exists => {
			tracing::debug!(collection = %existing, "CREATE COLLECTION IF NOT EXISTS: swallowing existing-collection error");
			Ok(())
		}
		Err(err) => Err(err),
	};
	lifecycle.transition_closed();
	result
}
