//! Per-operator registration state.
//!
//! # Invariants
//!
//! - `def_and_impl_count == def_count + total registered kernels`.
//! - `schema.is_some() == (def_count > 0)`.
//! - No kernel slot holds an empty sequence, and none is keyed by `Undefined`.
//!
//! Violations are reported by [`OperatorEntry::check_invariants`].

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use opdispatch_primitives::{DispatchKey, FunctionSchema, KernelFunction, OperatorName};

use crate::error::internal_assert;

/// Identifies one kernel registration within its operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct KernelId(pub(crate) u64);

#[derive(Debug, Clone)]
pub(crate) struct KernelEntry {
	pub(crate) id: KernelId,
	pub(crate) kernel: KernelFunction,
	pub(crate) inferred_schema: Option<Arc<FunctionSchema>>,
	pub(crate) debug: Arc<str>,
}

/// Registration state for a single operator name.
///
/// Kernels are keyed by `Some(key)` for backend-specific kernels and `None` for
/// the catch-all slot. Within a slot the last registered kernel is active.
#[derive(Debug, Clone)]
pub(crate) struct OperatorEntry {
	name: OperatorName,
	schema: Option<FunctionSchema>,
	kernels: BTreeMap<Option<DispatchKey>, Vec<KernelEntry>>,
	pub(crate) def_count: usize,
	pub(crate) def_and_impl_count: usize,
}

impl OperatorEntry {
	pub(crate) fn new(name: OperatorName) -> Self {
		Self {
			name,
			schema: None,
			kernels: BTreeMap::new(),
			def_count: 0,
			def_and_impl_count: 0,
		}
	}

	pub(crate) fn name(&self) -> &OperatorName {
		&self.name
	}

	pub(crate) fn schema(&self) -> Option<&FunctionSchema> {
		self.schema.as_ref()
	}

	pub(crate) fn register_schema(&mut self, schema: FunctionSchema) {
		internal_assert!(
			self.schema.is_none(),
			"schema for {} registered twice without deregistration",
			self.name
		);
		internal_assert!(
			schema.operator_name() == &self.name,
			"schema {} attached to operator entry {}",
			schema,
			self.name
		);
		self.schema = Some(schema);
	}

	/// Adopts an explicit alias-analysis kind onto a schema registered without one.
	pub(crate) fn adopt_alias_analysis(&mut self, incoming: &FunctionSchema) {
		if let Some(schema) = &mut self.schema {
			if schema.is_default_alias_analysis_kind() && !incoming.is_default_alias_analysis_kind() {
				schema.set_alias_analysis(incoming.alias_analysis());
			}
		}
	}

	pub(crate) fn deregister_schema(&mut self) {
		internal_assert!(
			self.schema.is_some(),
			"deregistering schema of {} but none is registered",
			self.name
		);
		self.schema = None;
	}

	/// Appends a kernel to its slot. Returns the entry it shadows, if any.
	pub(crate) fn register_kernel(
		&mut self,
		key: Option<DispatchKey>,
		entry: KernelEntry,
	) -> Option<KernelEntry> {
		let slot = self.kernels.entry(key).or_default();
		let shadowed = slot.last().cloned();
		slot.push(entry);
		shadowed
	}

	/// Removes a kernel by id. Returns false if no such kernel is registered.
	pub(crate) fn deregister_kernel(&mut self, key: Option<DispatchKey>, id: KernelId) -> bool {
		let Some(slot) = self.kernels.get_mut(&key) else {
			return false;
		};
		let Some(pos) = slot.iter().position(|k| k.id == id) else {
			return false;
		};
		slot.remove(pos);
		if slot.is_empty() {
			self.kernels.remove(&key);
		}
		true
	}

	/// Active kernel for a backend-specific slot.
	pub(crate) fn kernel_for(&self, key: DispatchKey) -> Option<&KernelEntry> {
		self.kernels.get(&Some(key)).and_then(|slot| slot.last())
	}

	/// Active catch-all kernel.
	pub(crate) fn catch_all(&self) -> Option<&KernelEntry> {
		self.kernels.get(&None).and_then(|slot| slot.last())
	}

	/// Backend tags with at least one kernel, in priority order.
	pub(crate) fn registered_keys(&self) -> impl Iterator<Item = DispatchKey> + '_ {
		self.kernels.keys().filter_map(|key| *key)
	}

	pub(crate) fn kernel_count(&self) -> usize {
		self.kernels.values().map(Vec::len).sum()
	}

	/// Asserts the entry holds no obligations before it is erased.
	pub(crate) fn assert_deregistration_invariants(&self) {
		internal_assert!(
			self.schema.is_none(),
			"erasing {} while it still has a schema",
			self.name
		);
		internal_assert!(
			self.kernels.is_empty(),
			"erasing {} while it still has {} kernel(s)",
			self.name,
			self.kernel_count()
		);
	}

	pub(crate) fn check_invariants(&self) {
		internal_assert!(
			self.def_and_impl_count >= self.def_count,
			"{}: def_and_impl_count {} < def_count {}",
			self.name,
			self.def_and_impl_count,
			self.def_count
		);
		internal_assert!(
			self.def_and_impl_count == self.def_count + self.kernel_count(),
			"{}: def_and_impl_count {} != def_count {} + kernels {}",
			self.name,
			self.def_and_impl_count,
			self.def_count,
			self.kernel_count()
		);
		internal_assert!(
			self.schema.is_some() == (self.def_count > 0),
			"{}: schema presence disagrees with def_count {}",
			self.name,
			self.def_count
		);
		if let Some(schema) = &self.schema {
			internal_assert!(
				schema.operator_name() == &self.name,
				"{}: carries schema for {}",
				self.name,
				schema.operator_name()
			);
		}
		for (key, slot) in &self.kernels {
			internal_assert!(!slot.is_empty(), "{}: empty kernel slot {:?}", self.name, key);
			internal_assert!(
				*key != Some(DispatchKey::Undefined),
				"{}: kernel stored under Undefined instead of the catch-all slot",
				self.name
			);
		}
	}

	pub(crate) fn dump_state(&self) -> String {
		let mut out = String::new();
		let _ = writeln!(out, "name: {}", self.name);
		match &self.schema {
			Some(schema) => {
				let _ = writeln!(out, "schema: {schema}");
				let _ = writeln!(out, "alias analysis: {}", schema.alias_analysis());
			}
			None => {
				let _ = writeln!(out, "schema: (none)");
			}
		}
		let _ = writeln!(
			out,
			"def_count: {}, def_and_impl_count: {}",
			self.def_count, self.def_and_impl_count
		);
		for (key, slot) in &self.kernels {
			let label = key.map_or_else(|| "CatchAll".to_string(), |k| k.to_string());
			for (i, kernel) in slot.iter().rev().enumerate() {
				let state = if i == 0 { "active" } else { "shadowed" };
				let fallthrough = if kernel.kernel.is_fallthrough() {
					" fallthrough"
				} else {
					""
				};
				let _ = write!(out, "{label}: {} [{state}{fallthrough}]", kernel.debug);
				if let Some(inferred) = &kernel.inferred_schema {
					let _ = write!(out, " inferred {inferred}");
				}
				out.push('\n');
			}
		}
		out
	}
}

#[cfg(test)]
mod tests {
	use opdispatch_primitives::{AliasAnalysisKind, SchemaArgument};

	use super::*;

	fn kernel(id: u64, debug: &str) -> KernelEntry {
		KernelEntry {
			id: KernelId(id),
			kernel: KernelFunction::from_fn(|_, _| {}),
			inferred_schema: None,
			debug: Arc::from(debug),
		}
	}

	fn name() -> OperatorName {
		OperatorName::new("pkg::add", "")
	}

	#[test]
	fn later_kernel_shadows_earlier_until_removed() {
		let mut entry = OperatorEntry::new(name());
		assert!(entry.register_kernel(Some(DispatchKey::CPU), kernel(1, "first")).is_none());
		let shadowed = entry.register_kernel(Some(DispatchKey::CPU), kernel(2, "second"));
		assert_eq!(shadowed.map(|k| k.id), Some(KernelId(1)));
		assert_eq!(entry.kernel_for(DispatchKey::CPU).unwrap().id, KernelId(2));

		assert!(entry.deregister_kernel(Some(DispatchKey::CPU), KernelId(2)));
		assert_eq!(entry.kernel_for(DispatchKey::CPU).unwrap().id, KernelId(1));
		assert!(entry.deregister_kernel(Some(DispatchKey::CPU), KernelId(1)));
		assert_eq!(entry.kernel_count(), 0);
		assert!(!entry.deregister_kernel(Some(DispatchKey::CPU), KernelId(1)));
	}

	#[test]
	fn catch_all_is_separate_from_keys() {
		let mut entry = OperatorEntry::new(name());
		entry.register_kernel(None, kernel(1, "any"));
		entry.register_kernel(Some(DispatchKey::CUDA), kernel(2, "cuda"));
		assert_eq!(entry.catch_all().unwrap().id, KernelId(1));
		assert!(entry.kernel_for(DispatchKey::CPU).is_none());
		assert_eq!(entry.registered_keys().collect::<Vec<_>>(), vec![DispatchKey::CUDA]);
	}

	#[test]
	fn adopts_explicit_alias_kind_only_over_default() {
		let base = FunctionSchema::new(name(), [SchemaArgument::new("Int")], [SchemaArgument::new("Int")]);
		let mut entry = OperatorEntry::new(name());
		entry.register_schema(base.clone());
		entry.adopt_alias_analysis(&base.clone().with_alias_analysis(AliasAnalysisKind::PureFunction));
		assert_eq!(entry.schema().unwrap().alias_analysis(), AliasAnalysisKind::PureFunction);

		entry.adopt_alias_analysis(&base.with_alias_analysis(AliasAnalysisKind::FromSchema));
		assert_eq!(entry.schema().unwrap().alias_analysis(), AliasAnalysisKind::PureFunction);
	}

	#[test]
	#[should_panic(expected = "internal registry invariant violated")]
	fn counter_mismatch_is_fatal() {
		let mut entry = OperatorEntry::new(name());
		entry.register_kernel(None, kernel(1, "any"));
		entry.check_invariants();
	}
}
