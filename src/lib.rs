//! A SQL-for-JSON query algebra, planner and streaming execution engine.
//!
//! The pipeline a query runs through is: parse (out of scope for this crate)
//! produces a [`algebra::Statement`] over the closed [`expr::Expr`] algebra;
//! [`planner`] turns a formalized statement into a [`plan::Operator`] tree;
//! [`exec`] wires that tree into a running set of tasks connected by
//! [`exec::exchange::EntryExchange`]s and drains the result.

#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

pub mod algebra;
pub mod auth;
#[doc(hidden)]
pub mod cnf;
#[doc(hidden)]
pub mod ctx;
pub mod datastore;
#[doc(hidden)]
pub mod err;
pub mod exec;
pub mod expr;
pub mod plan;
pub mod planner;
pub mod value;
