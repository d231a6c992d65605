//! The execution runtime: turns a [`crate::plan::Operator`] tree into a
//! running set of tasks wired together by [`exchange::EntryExchange`]s, and
//! drains the root `Stream` operator into a channel the caller can read
//! result rows from.

pub mod exchange;
pub mod lifecycle;
mod operators;

use crate::ctx::Context;
use crate::datastore::{Datastore, IndexEntry};
use crate::err::{Error, Result};
use crate::plan::Operator;
use crate::value::{AnnotatedValue, Object, Value};
use exchange::EntryExchange;
use std::sync::Arc;

/// Unpacks an [`IndexEntry`] that crossed an exchange back into the row shape
/// operators reason about: the `covers` value as the row's base document, and
/// `metadata` (if present) restored as per-row attachments.
pub(crate) fn entry_to_row(entry: IndexEntry) -> AnnotatedValue {
	let mut row = AnnotatedValue::new(entry.covers);
	if let Some(Value::Object(obj)) = entry.metadata {
		for (k, v) in obj.0 {
			row.attach(k, v);
		}
	}
	row
}

/// Packs a row back into the wire shape an exchange carries. `primary_key` is
/// threaded through unchanged from the upstream entry where one exists, or
/// left empty for rows synthesized by an operator (`ValueScan`, a join
/// result, ...).
pub(crate) fn row_to_entry(primary_key: String, row: &AnnotatedValue) -> IndexEntry {
	let covers = row.materialize();
	let metadata = if row.attachments().is_empty() {
		None
	} else {
		Some(Value::Object(Object(row.attachments().clone())))
	};
	IndexEntry {
		primary_key,
		covers,
		metadata,
	}
}

/// Runs a plan whose root is the mandatory `Stream` wrapper, returning a
/// channel of result rows. The caller drains the channel to exhaustion (or
/// drops it early to cooperatively stop the whole tree) and then checks
/// [`Context::errors`] for anything an operator logged along the way.
pub async fn execute(
	ctx: Context,
	ds: Arc<dyn Datastore>,
	plan: Operator,
) -> Result<channel::Receiver<Value>> {
	let Operator::Stream {
		child,
	} = plan
	else {
		return Err(Error::Plan("plan root must be a Stream operator".into()));
	};
	let feed = operators::spawn_node(ctx.clone(), ds, *child);
	let (tx, rx) = channel::bounded(*crate::cnf::STANDARD_SCAN_CAP);
	lifecycle::spawn_guarded(ctx, "Stream", operators::run_stream(feed, tx));
	Ok(rx)
}

/// Runs a standalone DDL statement (never wrapped in `Stream`) to completion.
pub async fn execute_ddl(ctx: Context, ds: Arc<dyn Datastore>, plan: Operator) -> Result<()> {
	match plan {
		Operator::CreateCollection {
			namespace,
			keyspace,
			scope,
			name,
			fail_if_exists,
		} => {
			operators::run_create_collection(ctx, ds, namespace, keyspace, scope, name, fail_if_exists)
				.await
		}
		Operator::Authorize {
			child,
			privileges,
		} => {
			operators::check_readonly(&ctx, &privileges)?;
			Box::pin(execute_ddl(ctx, ds, *child)).await
		}
		other => Err(Error::Plan(format!("not a DDL plan: {other:?}"))),
	}
}

pub(crate) use exchange::{EntryExchange as Exchange, Received};
