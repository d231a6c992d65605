use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};

/// A JSON number, kept as whichever of the three representations it was built
/// from, rather than collapsing everything to `f64` up front.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Number {
	Int(i64),
	Float(f64),
	Decimal(Decimal),
}

impl Default for Number {
	fn default() -> Self {
		Self::Int(0)
	}
}

macro_rules! from_prim_ints {
	($($int:ty),*) => {
		$(impl From<$int> for Number {
			fn from(i: $int) -> Self {
				Self::Int(i as i64)
			}
		})*
	};
}

from_prim_ints!(i8, i16, i32, i64, isize, u8, u16, u32);

impl From<f64> for Number {
	fn from(f: f64) -> Self {
		Self::Float(f)
	}
}

impl From<Decimal> for Number {
	fn from(d: Decimal) -> Self {
		Self::Decimal(d)
	}
}

impl Number {
	pub fn is_truthy(&self) -> bool {
		match self {
			Self::Int(v) => *v != 0,
			Self::Float(v) => *v != 0.0,
			Self::Decimal(v) => !v.is_zero(),
		}
	}

	pub fn to_f64(self) -> f64 {
		match self {
			Self::Int(v) => v as f64,
			Self::Float(v) => v,
			Self::Decimal(v) => v.to_f64().unwrap_or(0.0),
		}
	}

	pub fn to_decimal(self) -> Decimal {
		match self {
			Self::Int(v) => Decimal::from(v),
			Self::Float(v) => Decimal::from_f64(v).unwrap_or_default(),
			Self::Decimal(v) => v,
		}
	}
}

impl Display for Number {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			Self::Int(v) => write!(f, "{v}"),
			Self::Float(v) => write!(f, "{v}"),
			Self::Decimal(v) => write!(f, "{v}"),
		}
	}
}

impl PartialEq for Number {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::Int(a), Self::Int(b)) => a == b,
			(Self::Decimal(a), Self::Decimal(b)) => a == b,
			_ => self.to_decimal() == other.to_decimal(),
		}
	}
}

impl Eq for Number {}

impl PartialOrd for Number {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Number {
	fn cmp(&self, other: &Self) -> Ordering {
		match (self, other) {
			(Self::Int(a), Self::Int(b)) => a.cmp(b),
			(Self::Decimal(a), Self::Decimal(b)) => a.cmp(b),
			_ => self
				.to_decimal()
				.partial_cmp(&other.to_decimal())
				.unwrap_or(Ordering::Equal),
		}
	}
}

impl std::hash::Hash for Number {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.to_decimal().hash(state);
	}
}

impl From<serde_json::Number> for Number {
	fn from(n: serde_json::Number) -> Self {
		if let Some(i) = n.as_i64() {
			Number::Int(i)
		} else {
			Number::Float(n.as_f64().unwrap_or(0.0))
		}
	}
}
