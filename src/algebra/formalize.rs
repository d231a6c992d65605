use super::FromTerm;
use crate::err::{Error, FormalizeError, Result};
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashSet;

/// Tracks visible aliases and the current default keyspace while rewriting a
/// FROM-term tree. Each FROM term produces a child formalizer from its
/// parent; the specific "what goes out of scope" rule differs per term, but
/// the overall discipline (formalize left, rewrite own expressions, update
/// the visible set, detect collisions) is shared.
pub struct Formalizer {
	visible: RefCell<HashSet<String>>,
	current_keyspace: RefCell<Option<String>>,
}

impl Formalizer {
	pub fn root() -> Formalizer {
		Formalizer {
			visible: RefCell::new(HashSet::new()),
			current_keyspace: RefCell::new(None),
		}
	}

	pub fn visible_aliases(&self) -> HashSet<String> {
		self.visible.borrow().clone()
	}

	pub fn current_keyspace(&self) -> Option<String> {
		self.current_keyspace.borrow().clone()
	}

	fn declare(&self, alias: &str) -> Result<()> {
		if !self.visible.borrow_mut().insert(alias.to_owned()) {
			return Err(Error::Formalize(FormalizeError::DuplicateAlias(alias.to_owned())));
		}
		Ok(())
	}

	fn set_keyspace(&self, ks: Option<String>) {
		*self.current_keyspace.borrow_mut() = ks;
	}

	fn clear_keyspace(&self) {
		*self.current_keyspace.borrow_mut() = None;
	}

	/// Formalizes a FROM-term tree left to right, threading this formalizer's
	/// scope through each term as specified in step 4.2.
	pub fn formalize_from(&self, term: &FromTerm) -> Result<()> {
		match term {
			FromTerm::Keyspace {
				keyspace,
				alias,
				..
			} => {
				let effective = alias.clone().unwrap_or_else(|| keyspace.clone());
				self.declare(&effective)?;
				self.set_keyspace(Some(effective));
				Ok(())
			}
			FromTerm::Values {
				..
			} => Ok(()),
			FromTerm::Join {
				left,
				right,
				..
			} => {
				self.formalize_from(left)?;
				self.formalize_from(right)?;
				// A join result has no single default keyspace either.
				self.clear_keyspace();
				Ok(())
			}
			FromTerm::Nest {
				left,
				right,
				alias,
				..
			} => {
				self.formalize_from(left)?;
				self.formalize_from(right)?;
				self.declare(alias)?;
				self.clear_keyspace();
				Ok(())
			}
			FromTerm::Unnest {
				left,
				source,
				alias,
				..
			} => {
				// 1. Formalize the left FROM term.
				self.formalize_from(left)?;
				// 2. The source expression is rewritten under the resulting
				// formalizer: with only dotted-path navigation in this
				// algebra, there are no free identifiers left to qualify, so
				// rewriting is a no-op beyond having the scope available to
				// validate against (kept explicit for readers: the call site
				// is where identifier qualification would happen if the
				// expression grammar grew one).
				let _ = source;
				// 3. Compute the effective alias.
				let effective = match alias {
					Some(a) => a.clone(),
					None => {
						let path = match source {
							crate::expr::Expr::Path(p) => Some(p.as_str()),
							_ => None,
						};
						path
							.and_then(Value::path_trailing_identifier)
							.map(str::to_owned)
							.ok_or(Error::Formalize(FormalizeError::NoTermName))?
					}
				};
				// 4. Duplicate-alias check.
				self.declare(&effective)?;
				// 5. Clear the current keyspace and the alias is now visible.
				self.clear_keyspace();
				Ok(())
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::algebra::FromTerm;
	use crate::expr::Expr;

	fn unnest_term(alias: Option<&str>) -> FromTerm {
		FromTerm::Unnest {
			left: Box::new(FromTerm::Keyspace {
				namespace: "default".into(),
				keyspace: "a".into(),
				alias: None,
			}),
			source: Expr::Path("a.children".into()),
			alias: alias.map(str::to_owned),
			filter: None,
			outer: false,
		}
	}

	#[test]
	fn unnest_defaults_alias_from_trailing_path_identifier() {
		let f = Formalizer::root();
		f.formalize_from(&unnest_term(None)).unwrap();
		assert!(f.visible_aliases().contains("children"));
		assert_eq!(f.current_keyspace(), None);
	}

	#[test]
	fn unnest_explicit_alias_wins_over_path() {
		let f = Formalizer::root();
		f.formalize_from(&unnest_term(Some("c"))).unwrap();
		assert!(f.visible_aliases().contains("c"));
		assert!(!f.visible_aliases().contains("children"));
	}

	#[test]
	fn duplicate_alias_is_rejected() {
		let f = Formalizer::root();
		let term = FromTerm::Join {
			left: Box::new(FromTerm::Keyspace {
				namespace: "default".into(),
				keyspace: "a".into(),
				alias: Some("x".into()),
			}),
			right: Box::new(FromTerm::Keyspace {
				namespace: "default".into(),
				keyspace: "b".into(),
				alias: Some("x".into()),
			}),
			on: Expr::Literal(Value::Bool(true)),
			outer: false,
		};
		let err = f.formalize_from(&term).unwrap_err();
		assert_eq!(err, Error::Formalize(FormalizeError::DuplicateAlias("x".into())));
	}
}
