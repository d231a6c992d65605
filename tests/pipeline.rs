#![cfg(feature = "test-datastore")]

use flowql_core::algebra::{FromTerm, ProjectionItem, Statement};
use flowql_core::ctx::MutableContext;
use flowql_core::datastore::memory::MemoryDatastore;
use flowql_core::datastore::{Datastore, IndexEntry};
use flowql_core::err::Error;
use flowql_core::exec;
use flowql_core::expr::Expr;
use flowql_core::plan::Operator;
use flowql_core::planner::{Builder, FeatureFlags};
use flowql_core::value::{Number, Object, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

fn seed_document(ds: &MemoryDatastore, keyspace: &str, pk: &str, doc: Value) {
	ds.namespace_handle("ns")
		.keyspace_handle(keyspace)
		.scope_handle("default")
		.seed(
			keyspace,
			vec![IndexEntry {
				primary_key: pk.to_owned(),
				covers: doc,
				metadata: None,
			}],
		);
}

fn doc(fields: &[(&str, Value)]) -> Value {
	let mut map = BTreeMap::new();
	for (k, v) in fields {
		map.insert((*k).to_owned(), v.clone());
	}
	Value::Object(Object(map))
}

fn unnest_statement(children_alias: &str, outer: bool, projection: Vec<ProjectionItem>) -> Statement {
	Statement::Select {
		from: FromTerm::Unnest {
			left: Box::new(FromTerm::Keyspace {
				namespace: "ns".into(),
				keyspace: "a".into(),
				alias: Some("a".into()),
			}),
			source: Expr::Path("a.children".into()),
			alias: Some(children_alias.to_owned()),
			filter: None,
			outer,
		},
		filter: None,
		projection,
		distinct: false,
		group: None,
		order: None,
		limit: None,
		offset: None,
	}
}

async fn drain(rx: channel::Receiver<Value>) -> Vec<Value> {
	let mut out = Vec::new();
	while let Ok(v) = rx.recv().await {
		out.push(v);
	}
	out
}

fn ds_pair() -> (Arc<dyn Datastore>, Arc<dyn Datastore>) {
	let user: Arc<dyn Datastore> = Arc::new(MemoryDatastore::default());
	let system: Arc<dyn Datastore> = Arc::new(MemoryDatastore::default());
	(user, system)
}

/// S1: `SELECT c FROM a UNNEST a.children AS c` over a single document with a
/// non-empty array — expect one output row per array element, in order.
#[tokio::test]
async fn s1_inner_unnest_over_nonempty_array() {
	let (_, system) = ds_pair();
	let concrete = Arc::new(MemoryDatastore::default());
	let user: Arc<dyn Datastore> = concrete.clone();
	seed_document(
		&concrete,
		"a",
		"1",
		doc(&[
			("id", Value::Number(Number::Int(1))),
			(
				"children",
				Value::Array(vec![
					Value::Number(Number::Int(10)),
					Value::Number(Number::Int(20)),
					Value::Number(Number::Int(30)),
				]),
			),
		]),
	);

	let projection = vec![ProjectionItem {
		expr: Expr::Path("c".into()),
		alias: Some("c".into()),
	}];
	let mut builder = Builder::new(user, system, "ns", 1, FeatureFlags::default());
	let plan = builder.build(&unnest_statement("c", false, projection)).await.unwrap();
	let ctx = MutableContext::background_frozen();
	let rx = exec::execute(ctx, concrete, plan).await.unwrap();
	let rows = drain(rx).await;

	assert_eq!(
		rows,
		vec![
			doc(&[("c", Value::Number(Number::Int(10)))]),
			doc(&[("c", Value::Number(Number::Int(20)))]),
			doc(&[("c", Value::Number(Number::Int(30)))]),
		]
	);
}

/// S2: the same statement shape with `LEFT OUTER UNNEST` against a document
/// whose array is empty. No projection here: this isolates the UNNEST
/// operator's own output (a bare `Scan -> Unnest`, no `Project`) so the
/// assertion is exactly what §4.5 step 3 promises — the row forwarded
/// unchanged, with no `c` field ever attached — rather than being entangled
/// with how a downstream `Project` happens to render a field that was never
/// set.
#[tokio::test]
async fn s2_outer_unnest_over_empty_array_forwards_row_unchanged() {
	let concrete = Arc::new(MemoryDatastore::default());
	let user: Arc<dyn Datastore> = concrete.clone();
	let system: Arc<dyn Datastore> = Arc::new(MemoryDatastore::default());
	let original = doc(&[("id", Value::Number(Number::Int(2))), ("children", Value::Array(Vec::new()))]);
	seed_document(&concrete, "a", "2", original.clone());

	let mut builder = Builder::new(user, system, "ns", 1, FeatureFlags::default());
	let plan = builder.build(&unnest_statement("c", true, Vec::new())).await.unwrap();
	let ctx = MutableContext::background_frozen();
	let rx = exec::execute(ctx, concrete, plan).await.unwrap();
	let rows = drain(rx).await;

	// The scan binds the document under its keyspace alias (`a`) before
	// UNNEST ever sees it, so "unchanged" here means unchanged relative to
	// that bound shape, not the bare seeded document.
	assert_eq!(rows, vec![doc(&[("a", original)])]);
}

/// Property #9, inner-empty case: a non-`outer` UNNEST over an empty array
/// drops the row entirely — zero output rows.
#[tokio::test]
async fn inner_unnest_over_empty_array_drops_the_row() {
	let concrete = Arc::new(MemoryDatastore::default());
	let user: Arc<dyn Datastore> = concrete.clone();
	let system: Arc<dyn Datastore> = Arc::new(MemoryDatastore::default());
	seed_document(
		&concrete,
		"a",
		"3",
		doc(&[("id", Value::Number(Number::Int(3))), ("children", Value::Array(Vec::new()))]),
	);

	let mut builder = Builder::new(user, system, "ns", 1, FeatureFlags::default());
	let plan = builder.build(&unnest_statement("c", false, Vec::new())).await.unwrap();
	let ctx = MutableContext::background_frozen();
	let rx = exec::execute(ctx, concrete, plan).await.unwrap();
	let rows = drain(rx).await;

	assert!(rows.is_empty());
}

/// S4: `SELECT 1` (no FROM) plans to `Stream(Authorize(Project(ValueScan)))`
/// with an empty privilege set.
#[tokio::test]
async fn s4_select_one_shape() {
	let (user, system) = ds_pair();
	let mut builder = Builder::new(user, system, "ns", 1, FeatureFlags::default());
	let stmt = Statement::Select {
		from: FromTerm::Values {
			rows: vec![Expr::Literal(Value::Number(Number::Int(1)))],
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
	};
	let plan = builder.build(&stmt).await.unwrap();
	let Operator::Stream {
		child,
	} = &plan
	else {
		panic!("expected Stream root");
	};
	let Operator::Authorize {
		child,
		privileges,
	} = child.as_ref()
	else {
		panic!("expected Authorize under Stream");
	};
	assert!(privileges.is_empty());
	let Operator::Project {
		child,
		..
	} = child.as_ref()
	else {
		panic!("expected Project under Authorize");
	};
	assert!(matches!(child.as_ref(), Operator::ValueScan { rows } if rows.len() == 1));

	// Round-trip through JSON reproduces the same tree (property #3).
	let json = serde_json::to_string(&plan).unwrap();
	let back: Operator = serde_json::from_str(&json).unwrap();
	assert_eq!(plan, back);
}

/// S5: stopping the root exchange early drains the pipeline to completion
/// without posting any error to the context.
#[tokio::test]
async fn s5_early_stop_is_not_an_error() {
	let concrete = Arc::new(MemoryDatastore::default());
	let user: Arc<dyn Datastore> = concrete.clone();
	let system: Arc<dyn Datastore> = Arc::new(MemoryDatastore::default());
	let mut entries = Vec::new();
	for i in 0i64..200 {
		entries.push(IndexEntry {
			primary_key: i.to_string(),
			covers: doc(&[("n", Value::Number(Number::Int(i)))]),
			metadata: None,
		});
	}
	concrete.namespace_handle("ns").keyspace_handle("a").scope_handle("default").seed("a", entries);

	let mut builder = Builder::new(user, system, "ns", 1, FeatureFlags::default());
	let stmt = Statement::Select {
		from: FromTerm::Keyspace {
			namespace: "ns".into(),
			keyspace: "a".into(),
			alias: Some("a".into()),
		},
		filter: None,
		projection: Vec::new(),
		distinct: false,
		group: None,
		order: None,
		limit: None,
		offset: None,
	};
	let plan = builder.build(&stmt).await.unwrap();
	let ctx = MutableContext::background_frozen();
	let rx = exec::execute(ctx.clone(), concrete, plan).await.unwrap();

	// Read exactly one row, then drop the receiver, standing in for an
	// early `sendStop`: the `Stream` sink observes the send failure and
	// propagates stop upstream.
	let _ = rx.recv().await.unwrap();
	drop(rx);
	// Give the spawned tasks a chance to observe the stop and close.
	tokio::time::sleep(std::time::Duration::from_millis(50)).await;

	assert!(ctx.errors().is_empty());
}

/// S6 / property #10: `CREATE COLLECTION IF NOT EXISTS` against an existing
/// collection posts no error; `CREATE COLLECTION` (fail_if_exists) against
/// the same posts exactly one.
#[tokio::test]
async fn s6_ddl_swallow_and_surface() {
	let concrete = Arc::new(MemoryDatastore::default());
	let ds: Arc<dyn Datastore> = concrete.clone();
	concrete.namespace_handle("ns").keyspace_handle("a");

	let mut builder = Builder::new(ds.clone(), ds.clone(), "ns", 1, FeatureFlags::default());
	let create = |fail_if_exists: bool| Statement::CreateCollection {
		namespace: "ns".into(),
		keyspace: "a".into(),
		scope: "default".into(),
		name: "widgets".into(),
		fail_if_exists,
	};

	let plan = builder.build(&create(false)).await.unwrap();
	let Operator::Stream {
		child,
	} = plan
	else {
		panic!()
	};
	let ctx = MutableContext::background_frozen();
	exec::execute_ddl(ctx.clone(), ds.clone(), *child).await.unwrap();
	assert!(ctx.errors().is_empty());

	// Second attempt without FAIL_IF_EXISTS: swallowed, still no error.
	let plan = builder.build(&create(false)).await.unwrap();
	let Operator::Stream {
		child,
	} = plan
	else {
		panic!()
	};
	let ctx2 = MutableContext::background_frozen();
	exec::execute_ddl(ctx2.clone(), ds.clone(), *child).await.unwrap();
	assert!(ctx2.errors().is_empty());

	// Third attempt with FAIL_IF_EXISTS=true: surfaces as an error from
	// execute_ddl itself (standalone DDL returns its error directly rather
	// than only appending to the context, since it has no Stream sink task
	// to fail it asynchronously).
	let plan = builder.build(&create(true)).await.unwrap();
	let Operator::Stream {
		child,
	} = plan
	else {
		panic!()
	};
	let ctx3 = MutableContext::background_frozen();
	let err = exec::execute_ddl(ctx3, ds, *child).await.unwrap_err();
	assert!(matches!(err, Error::CollectionExists(_)));
}

/// A readonly context refuses DDL before any datastore call is made.
#[tokio::test]
async fn readonly_context_refuses_ddl_before_datastore_call() {
	let concrete = Arc::new(MemoryDatastore::default());
	let ds: Arc<dyn Datastore> = concrete.clone();
	let mut builder = Builder::new(ds.clone(), ds.clone(), "ns", 1, FeatureFlags::default());
	let plan = builder
		.build(&Statement::CreateCollection {
			namespace: "ns".into(),
			keyspace: "a".into(),
			scope: "default".into(),
			name: "widgets".into(),
			fail_if_exists: false,
		})
		.await
		.unwrap();
	let Operator::Stream {
		child,
	} = plan
	else {
		panic!()
	};
	let mut root = MutableContext::background();
	root.set_readonly(true);
	let ctx = root.freeze();
	let err = exec::execute_ddl(ctx, ds, *child).await.unwrap_err();
	assert!(matches!(err, Error::ReadonlyViolation(_)));
	// The collection was never created: the readonly check short-circuited
	// before CreateCollection's own datastore call.
	assert!(!concrete
		.namespace_handle("ns")
		.keyspace_handle("a")
		.scope_handle("default")
		.has_collection("widgets"));
}
