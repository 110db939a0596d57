//! Operator signatures as consumed by the registry.
//!
//! Parsing signature text into a [`FunctionSchema`] happens elsewhere; this module
//! only carries the parsed form and the two properties the registry relies on:
//! structural equality and the alias-analysis kind with its "unspecified" marker.

use std::fmt;

use crate::OperatorName;

/// How an operator's arguments and outputs may alias memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum AliasAnalysisKind {
	InternalSpecialCase,
	FromSchema,
	Conservative,
	PureFunction,
}

impl AliasAnalysisKind {
	/// Kind assumed when a schema does not specify one.
	pub const DEFAULT: Self = Self::Conservative;
}

/// A single argument or return slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaArgument {
	name: Option<Box<str>>,
	ty: Box<str>,
}

impl SchemaArgument {
	/// An unnamed slot of the given type, as used for returns.
	pub fn new(ty: impl Into<Box<str>>) -> Self {
		Self {
			name: None,
			ty: ty.into(),
		}
	}

	pub fn named(name: impl Into<Box<str>>, ty: impl Into<Box<str>>) -> Self {
		Self {
			name: Some(name.into()),
			ty: ty.into(),
		}
	}

	pub fn name(&self) -> Option<&str> {
		self.name.as_deref()
	}

	pub fn ty(&self) -> &str {
		&self.ty
	}
}

impl fmt::Display for SchemaArgument {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.name {
			Some(name) => write!(f, "{} {}", self.ty, name),
			None => f.write_str(&self.ty),
		}
	}
}

/// Type signature and aliasing metadata attached by a definition.
///
/// Equality is structural over name, overload, arguments and returns. The
/// alias-analysis kind is metadata layered on top of the signature and does not
/// take part in equality; the registry checks it separately.
#[derive(Debug, Clone)]
pub struct FunctionSchema {
	name: OperatorName,
	arguments: Vec<SchemaArgument>,
	returns: Vec<SchemaArgument>,
	alias_kind: Option<AliasAnalysisKind>,
}

impl FunctionSchema {
	pub fn new(
		name: OperatorName,
		arguments: impl IntoIterator<Item = SchemaArgument>,
		returns: impl IntoIterator<Item = SchemaArgument>,
	) -> Self {
		Self {
			name,
			arguments: arguments.into_iter().collect(),
			returns: returns.into_iter().collect(),
			alias_kind: None,
		}
	}

	/// Sets an explicit alias-analysis kind.
	#[must_use]
	pub fn with_alias_analysis(mut self, kind: AliasAnalysisKind) -> Self {
		self.alias_kind = Some(kind);
		self
	}

	pub fn set_alias_analysis(&mut self, kind: AliasAnalysisKind) {
		self.alias_kind = Some(kind);
	}

	pub fn operator_name(&self) -> &OperatorName {
		&self.name
	}

	pub fn arguments(&self) -> &[SchemaArgument] {
		&self.arguments
	}

	pub fn returns(&self) -> &[SchemaArgument] {
		&self.returns
	}

	/// Effective alias-analysis kind, resolving the unspecified marker to
	/// [`AliasAnalysisKind::DEFAULT`].
	pub fn alias_analysis(&self) -> AliasAnalysisKind {
		self.alias_kind.unwrap_or(AliasAnalysisKind::DEFAULT)
	}

	/// True if no registration site specified an alias-analysis kind.
	pub fn is_default_alias_analysis_kind(&self) -> bool {
		self.alias_kind.is_none()
	}
}

impl PartialEq for FunctionSchema {
	fn eq(&self, other: &Self) -> bool {
		self.name == other.name
			&& self.arguments == other.arguments
			&& self.returns == other.returns
	}
}

impl Eq for FunctionSchema {}

impl fmt::Display for FunctionSchema {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}(", self.name)?;
		for (i, arg) in self.arguments.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{arg}")?;
		}
		f.write_str(") -> ")?;
		match self.returns.as_slice() {
			[single] => write!(f, "{single}"),
			returns => {
				f.write_str("(")?;
				for (i, ret) in returns.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{ret}")?;
				}
				f.write_str(")")
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn add_schema() -> FunctionSchema {
		FunctionSchema::new(
			OperatorName::new("pkg::add", ""),
			[SchemaArgument::named("a", "Int"), SchemaArgument::named("b", "Int")],
			[SchemaArgument::new("Int")],
		)
	}

	#[test]
	fn renders_signature() {
		assert_eq!(add_schema().to_string(), "pkg::add(Int a, Int b) -> Int");
		let unit = FunctionSchema::new(OperatorName::new("pkg::sync", ""), [], []);
		assert_eq!(unit.to_string(), "pkg::sync() -> ()");
	}

	#[test]
	fn alias_kind_does_not_affect_equality() {
		let plain = add_schema();
		let pure = add_schema().with_alias_analysis(AliasAnalysisKind::PureFunction);
		assert_eq!(plain, pure);
		assert!(plain.is_default_alias_analysis_kind());
		assert_eq!(plain.alias_analysis(), AliasAnalysisKind::Conservative);
		assert!(!pure.is_default_alias_analysis_kind());
	}

	#[test]
	fn argument_types_affect_equality() {
		let float = FunctionSchema::new(
			OperatorName::new("pkg::add", ""),
			[SchemaArgument::named("a", "Float"), SchemaArgument::named("b", "Float")],
			[SchemaArgument::new("Float")],
		);
		assert_ne!(add_schema(), float);
	}
}
