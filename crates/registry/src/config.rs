//! Dispatcher configuration.
//!
//! ```toml
//! label = "ops"
//! verify_invariants = true
//! warn_on_kernel_override = false
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
	/// Attached to every log record emitted by the dispatcher.
	pub label: String,
	/// Runs the full invariant walk after every mutation.
	pub verify_invariants: bool,
	/// Logs a warning when a kernel shadows an active kernel for the same slot.
	pub warn_on_kernel_override: bool,
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self {
			label: "dispatcher".to_string(),
			verify_invariants: cfg!(debug_assertions),
			warn_on_kernel_override: true,
		}
	}
}

impl DispatcherConfig {
	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(text)?)
	}

	#[must_use]
	pub fn with_label(mut self, label: impl Into<String>) -> Self {
		self.label = label.into();
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_document_yields_defaults() {
		assert_eq!(DispatcherConfig::from_toml_str("").unwrap(), DispatcherConfig::default());
	}

	#[test]
	fn partial_document_keeps_other_defaults() {
		let config = DispatcherConfig::from_toml_str(
			r#"
label = "ops"
warn_on_kernel_override = false
"#,
		)
		.unwrap();
		assert_eq!(config.label, "ops");
		assert!(!config.warn_on_kernel_override);
		assert_eq!(config.verify_invariants, cfg!(debug_assertions));
	}

	#[test]
	fn unknown_keys_are_rejected() {
		let err = DispatcherConfig::from_toml_str("lable = \"typo\"").unwrap_err();
		assert!(matches!(err, ConfigError::Parse(_)));
		assert!(err.to_string().contains("lable"));
	}
}
