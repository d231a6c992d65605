use super::{BinaryOp, Expr};

/// Removes every occurrence of `target` from `candidate`, but only at AND
/// boundaries: an AND tree is flattened and each flattened conjunct is
/// compared to `target` directly (not recursed into further); every other
/// variant is compared to `target` as a whole and returned unchanged or
/// dropped. A nested AND that appears as the child of some other, non-AND
/// variant (a function argument, the operand of NOT, ...) is deliberately
/// never flattened or descended into — this is not "deep" removal.
///
/// Returns `None` when nothing of `candidate` survives.
pub fn remove_expr(candidate: &Expr, target: &Expr) -> Option<Expr> {
	match candidate {
		Expr::Binary(_, BinaryOp::And, _) => {
			let conjuncts = flatten_and(candidate);
			let survivors: Vec<Expr> = conjuncts
				.into_iter()
				.filter(|c| !c.equivalent(target))
				.collect();
			Expr::and(survivors)
		}
		other => {
			if other.equivalent(target) {
				None
			} else {
				Some(other.clone())
			}
		}
	}
}

/// Flattens a left- or right-nested chain of AND nodes into its conjuncts, in
/// left-to-right order. Does not descend past a non-AND node.
fn flatten_and(expr: &Expr) -> Vec<Expr> {
	match expr {
		Expr::Binary(l, BinaryOp::And, r) => {
			let mut out = flatten_and(l);
			out.extend(flatten_and(r));
			out
		}
		other => vec![other.clone()],
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::{Number, Value};

	fn eq(field: &str, n: i64) -> Expr {
		Expr::Binary(
			Box::new(Expr::Path(field.to_owned())),
			BinaryOp::Equal,
			Box::new(Expr::Literal(Value::Number(Number::Int(n)))),
		)
	}

	#[test]
	fn removes_all_equivalent_conjuncts_at_and_boundary() {
		// (x=1 AND y=2 AND x=1) -> survivors {y=2}
		let x1 = eq("x", 1);
		let y2 = eq("y", 2);
		let tree = Expr::and(vec![x1.clone(), y2.clone(), x1.clone()]).unwrap();

		let result = remove_expr(&tree, &x1).unwrap();
		assert_eq!(result, y2);
	}

	#[test]
	fn non_and_node_equivalent_to_target_is_removed_entirely() {
		let x1 = eq("x", 1);
		assert_eq!(remove_expr(&x1, &x1), None);
	}

	#[test]
	fn non_and_node_not_equivalent_is_unchanged() {
		let x1 = eq("x", 1);
		let y2 = eq("y", 2);
		assert_eq!(remove_expr(&y2, &x1), Some(y2));
	}

	#[test]
	fn nested_and_inside_non_and_variant_is_not_descended_into() {
		let x1 = eq("x", 1);
		// NOT(x=1 AND x=1): the AND is nested under a unary NOT, a non-AND
		// variant, so the remover must not flatten into it.
		let inner = Expr::and(vec![x1.clone(), x1.clone()]).unwrap();
		let wrapped = Expr::Unary(crate::expr::UnaryOp::Not, Box::new(inner.clone()));
		// The whole NOT(...) node is not equivalent to `x=1`, so it survives
		// completely unchanged -- the AND inside it is untouched.
		let result = remove_expr(&wrapped, &x1).unwrap();
		assert_eq!(result, wrapped);
	}

	#[test]
	fn removing_every_conjunct_yields_none() {
		let x1 = eq("x", 1);
		let tree = Expr::and(vec![x1.clone(), x1.clone()]).unwrap();
		assert_eq!(remove_expr(&tree, &x1), None);
	}

	#[test]
	fn removing_all_but_one_yields_the_bare_survivor() {
		let x1 = eq("x", 1);
		let y2 = eq("y", 2);
		let tree = Expr::and(vec![x1.clone(), y2.clone()]).unwrap();
		let result = remove_expr(&tree, &x1).unwrap();
		assert_eq!(result, y2);
	}
}
