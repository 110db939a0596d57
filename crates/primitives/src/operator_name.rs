use std::fmt;
use std::str::FromStr;

/// Identity of an operator: a namespaced base name plus an overload discriminator.
///
/// Equality and hashing are structural. The empty overload is the default overload
/// and renders without a suffix (`pkg::add`); other overloads render as
/// `pkg::add.Scalar`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperatorName {
	name: Box<str>,
	overload_name: Box<str>,
}

/// Failure to parse an [`OperatorName`] from its textual form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseOperatorNameError {
	#[error("operator name is empty")]
	Empty,
	#[error("operator name {0:?} has an empty overload after '.'")]
	EmptyOverload(String),
}

impl OperatorName {
	pub fn new(name: impl Into<Box<str>>, overload_name: impl Into<Box<str>>) -> Self {
		Self {
			name: name.into(),
			overload_name: overload_name.into(),
		}
	}

	/// Parses `base` or `base.overload`.
	pub fn parse(text: &str) -> Result<Self, ParseOperatorNameError> {
		if text.is_empty() {
			return Err(ParseOperatorNameError::Empty);
		}
		match text.split_once('.') {
			Some((_, "")) => Err(ParseOperatorNameError::EmptyOverload(text.to_string())),
			Some(("", _)) => Err(ParseOperatorNameError::Empty),
			Some((name, overload)) => Ok(Self::new(name, overload)),
			None => Ok(Self::new(text, "")),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn overload_name(&self) -> &str {
		&self.overload_name
	}

	/// Returns the namespace prefix (`pkg` for `pkg::add`), if any.
	pub fn namespace(&self) -> Option<&str> {
		self.name.split_once("::").map(|(ns, _)| ns)
	}
}

impl fmt::Display for OperatorName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.overload_name.is_empty() {
			f.write_str(&self.name)
		} else {
			write!(f, "{}.{}", self.name, self.overload_name)
		}
	}
}

impl FromStr for OperatorName {
	type Err = ParseOperatorNameError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}
