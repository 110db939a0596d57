use std::fmt;

use opdispatch_primitives::{AliasAnalysisKind, DispatchKey, FunctionSchema, OperatorName};

use crate::dispatcher::OperatorHandle;

/// Recoverable registry failures. Every variant leaves the registry exactly as it
/// was before the failed call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
	#[error(
		"Tried to register multiple operators with the same name and the same overload name but different schemas: {incoming} vs {existing}"
	)]
	SchemaConflict {
		existing: Box<FunctionSchema>,
		incoming: Box<FunctionSchema>,
	},

	#[error(
		"Tried to define the schema for {name} with different alias analysis kinds: {existing} vs {incoming}"
	)]
	AliasAnalysisConflict {
		name: OperatorName,
		existing: AliasAnalysisKind,
		incoming: AliasAnalysisKind,
	},

	#[error(
		"Tried to register a backend fallback kernel for {key} but there was already one registered."
	)]
	DuplicateFallback { key: DispatchKey },

	#[error("{0}")]
	UnresolvedDispatch(UnresolvedDispatch),

	#[error(
		"Could not find schema for {name} but we found an implementation; did you forget to def() the operator?"
	)]
	MissingSchema { name: OperatorName },

	#[error("Could not find schema for {name}")]
	OperatorNotFound { name: OperatorName },

	#[error("operator handle {handle:?} no longer refers to a registered operator")]
	StaleHandle { handle: OperatorHandle },
}

/// Renders a key list as `[CPU, CUDA]`.
pub(crate) struct KeyList<'a>(pub &'a [DispatchKey]);

impl fmt::Display for KeyList<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("[")?;
		for (i, key) in self.0.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{key}")?;
		}
		f.write_str("]")
	}
}

/// No kernel and no applicable fallback for the requested backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDispatch {
	pub name: OperatorName,
	/// Requested backend. `Undefined` means the call carried no backend-tagged
	/// arguments at all.
	pub key: DispatchKey,
	/// Backends for which the operator has a kernel or a real fallback exists.
	pub available: Vec<DispatchKey>,
}

impl fmt::Display for UnresolvedDispatch {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let available = KeyList(&self.available);
		if self.key == DispatchKey::Undefined {
			write!(
				f,
				"There were no backend-tagged arguments to this call, but no fallback function is registered for schema {}. \
				 This usually means that this function requires at least one backend-tagged argument. \
				 Available functions are {available}",
				self.name
			)
		} else {
			write!(
				f,
				"Could not run '{name}' with arguments from the '{key}' backend. \
				 '{name}' is only available for these backends: {available}.",
				name = self.name,
				key = self.key
			)
		}
	}
}

/// Configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("invalid dispatcher config: {0}")]
	Parse(#[from] toml::de::Error),
}

/// Aborts after logging a broken registry invariant.
///
/// These indicate a defect in the registry or a caller violating the
/// release-once contract. Continuing would risk further corruption.
macro_rules! internal_violation {
	($($arg:tt)+) => {{
		let message = format!($($arg)+);
		tracing::error!(%message, "registry invariant violated");
		panic!("internal registry invariant violated: {message}");
	}};
}

macro_rules! internal_assert {
	($cond:expr, $($arg:tt)+) => {
		if !$cond {
			$crate::error::internal_violation!($($arg)+);
		}
	};
}

pub(crate) use {internal_assert, internal_violation};
