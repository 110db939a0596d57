//! Published read views of the registry.
//!
//! # Role
//!
//! The writer builds a [`Snapshot`] after every mutation and swaps it in
//! atomically. Readers load the current snapshot without locking and never see a
//! partially applied mutation. Snapshots share every untouched part with their
//! predecessor.
//!
//! # Invariants
//!
//! - An [`OperatorHandle`] only dereferences while its slot generation matches;
//!   erasing an operator bumps the generation, so a surviving handle fails
//!   safely instead of reaching a reused slot.
//! - An [`OperatorRef`] pins the entry version it was built from.

use std::sync::Arc;

use opdispatch_primitives::{
	DispatchKey, DispatchKeySet, FunctionSchema, KernelFunction, OperatorName, Stack,
};
use rustc_hash::FxHashMap;

use crate::entry::OperatorEntry;
use crate::error::{DispatchError, KeyList, UnresolvedDispatch};
use crate::fallback::FallbackTable;

/// Generation-checked reference to an operator slot.
///
/// Cheap to copy. Resolve it with [`Dispatcher::operator`](crate::Dispatcher::operator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperatorHandle {
	pub(crate) slot: u32,
	pub(crate) generation: u32,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Slot {
	pub(crate) generation: u32,
	pub(crate) entry: Option<Arc<OperatorEntry>>,
}

/// Immutable registry state as seen by readers.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
	pub(crate) slots: Arc<Vec<Slot>>,
	pub(crate) by_name: Arc<FxHashMap<OperatorName, OperatorHandle>>,
	pub(crate) fallbacks: Arc<FallbackTable>,
}

impl Snapshot {
	#[inline]
	pub(crate) fn find(&self, name: &OperatorName) -> Option<OperatorHandle> {
		self.by_name.get(name).copied()
	}

	pub(crate) fn entry(&self, handle: OperatorHandle) -> Option<&Arc<OperatorEntry>> {
		let slot = self.slots.get(handle.slot as usize)?;
		if slot.generation != handle.generation {
			return None;
		}
		slot.entry.as_ref()
	}

	pub(crate) fn operator(&self, handle: OperatorHandle) -> Option<OperatorRef> {
		let entry = self.entry(handle)?.clone();
		Some(OperatorRef {
			handle,
			entry,
			fallbacks: self.fallbacks.clone(),
		})
	}

	/// Live operators in slot order.
	pub(crate) fn operators(&self) -> impl Iterator<Item = OperatorRef> + '_ {
		self.slots.iter().enumerate().filter_map(|(idx, slot)| {
			let entry = slot.entry.clone()?;
			Some(OperatorRef {
				handle: OperatorHandle {
					slot: idx as u32,
					generation: slot.generation,
				},
				entry,
				fallbacks: self.fallbacks.clone(),
			})
		})
	}
}

/// Pinned view of one operator and the fallback table it dispatches against.
///
/// Always safe to use. It reflects the registry at the moment it was obtained and
/// does not observe later mutations; fetch a new one through the handle to see
/// them.
#[derive(Debug, Clone)]
pub struct OperatorRef {
	handle: OperatorHandle,
	entry: Arc<OperatorEntry>,
	fallbacks: Arc<FallbackTable>,
}

impl OperatorRef {
	pub fn handle(&self) -> OperatorHandle {
		self.handle
	}

	pub fn operator_name(&self) -> &OperatorName {
		self.entry.name()
	}

	pub fn schema(&self) -> Option<&FunctionSchema> {
		self.entry.schema()
	}

	pub fn has_schema(&self) -> bool {
		self.entry.schema().is_some()
	}

	/// Live definition registrations.
	pub fn def_count(&self) -> usize {
		self.entry.def_count
	}

	/// Live registrations of either kind.
	pub fn def_and_impl_count(&self) -> usize {
		self.entry.def_and_impl_count
	}

	pub fn has_kernel_for_dispatch_key(&self, key: DispatchKey) -> bool {
		self.entry.kernel_for(key).is_some()
	}

	pub fn has_catch_all_kernel(&self) -> bool {
		self.entry.catch_all().is_some()
	}

	/// Tags with an operator kernel, as a set.
	pub fn registered_dispatch_keys(&self) -> DispatchKeySet {
		self.entry.registered_keys().collect()
	}

	/// Backends this operator can run on: tags whose active kernel does real work
	/// plus every tag with a real backend fallback, in priority order.
	pub fn available_backends(&self) -> Vec<DispatchKey> {
		let set: DispatchKeySet = self
			.entry
			.registered_keys()
			.filter(|key| {
				self.entry
					.kernel_for(*key)
					.is_some_and(|k| !k.kernel.is_fallthrough())
			})
			.chain(self.fallbacks.non_fallthrough_keys())
			.collect();
		set.keys().collect()
	}

	/// Renders [`Self::available_backends`] as `[CPU, CUDA]`.
	pub fn list_all_dispatch_keys(&self) -> String {
		KeyList(&self.available_backends()).to_string()
	}

	/// Resolves the kernel to run for `key`.
	///
	/// Order: the operator's kernel for `key`, the backend fallback for `key`,
	/// the operator's catch-all kernel. A pass-through at any step defers to the
	/// next step.
	pub fn lookup(&self, key: DispatchKey) -> Result<KernelFunction, DispatchError> {
		let candidates = [
			self.entry.kernel_for(key).map(|k| &k.kernel),
			self.fallbacks.get(key),
			self.entry.catch_all().map(|k| &k.kernel),
		];
		candidates
			.into_iter()
			.flatten()
			.find(|kernel| !kernel.is_fallthrough())
			.cloned()
			.ok_or_else(|| {
				DispatchError::UnresolvedDispatch(UnresolvedDispatch {
					name: self.operator_name().clone(),
					key,
					available: self.available_backends(),
				})
			})
	}

	/// Resolves and invokes the kernel for `key`.
	pub fn call(&self, key: DispatchKey, stack: &mut Stack) -> Result<(), DispatchError> {
		let kernel = self.lookup(key)?;
		kernel.call(self.operator_name(), stack);
		Ok(())
	}

	/// Human-readable registration state, for diagnostics.
	pub fn dump_state(&self) -> String {
		self.entry.dump_state()
	}
}
