//! The operator registry.
//!
//! # Mental Model
//!
//! 1. **Writers** (registration, token release, fallback changes, listener
//!    addition) serialize on one mutex. Each mutation edits the writer state
//!    copy-on-write and publishes a fresh [`Snapshot`] before returning.
//! 2. **Readers** (name lookup, dispatch) load the current snapshot through
//!    `ArcSwap` and never touch the mutex.
//! 3. **Handles** are `(slot, generation)` pairs into the operator arena.
//!    Dereferencing re-checks the generation.
//!
//! # Invariants
//!
//! - An operator entry exists exactly while `def_and_impl_count > 0`.
//!   - Enforced in: [`Dispatcher::release`] via `cleanup`.
//!   - Checked by: [`Dispatcher::check_invariants`].
//! - A rejected registration leaves counters, schema and tables untouched.
//!   - Enforced in: [`Dispatcher::register_def`], [`Dispatcher::register_fallback`]
//!     (all checks run before the first write).
//! - Listeners see every live definition exactly once per listener.
//!   - Enforced in: [`Dispatcher::add_listener`] (replay under the writer lock).
//!
//! # Ownership
//!
//! Tokens must be released before their dispatcher is dropped. The dispatcher
//! does not track outstanding tokens beyond logging leftovers on drop.

mod invariants;
mod snapshot;


use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use opdispatch_primitives::{
	DispatchKey, DispatchKeySet, FunctionSchema, KernelFunction, OperatorName, Stack,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
pub use snapshot::{OperatorHandle, OperatorRef};
use snapshot::{Slot, Snapshot};

use crate::config::DispatcherConfig;
use crate::entry::{KernelEntry, KernelId, OperatorEntry};
use crate::error::{DispatchError, internal_assert, internal_violation};
use crate::fallback::FallbackTable;
use crate::listener::{ListenerList, OpRegistrationListener};
use crate::token::{Registration, RegistrationHandle};

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a dispatcher instance, carried by the tokens it issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DispatcherId(u64);

/// Registry of operator definitions, kernels and backend fallbacks.
pub struct Dispatcher {
	id: DispatcherId,
	config: DispatcherConfig,
	snap: ArcSwap<Snapshot>,
	state: Mutex<State>,
}

/// Writer-side state. The published snapshot shares its `Arc`s.
#[derive(Default)]
struct State {
	slots: Arc<Vec<Slot>>,
	free: Vec<u32>,
	by_name: Arc<FxHashMap<OperatorName, OperatorHandle>>,
	fallbacks: Arc<FallbackTable>,
	listeners: ListenerList,
	next_kernel_id: u64,
}

impl State {
	fn snapshot(&self) -> Snapshot {
		Snapshot {
			slots: self.slots.clone(),
			by_name: self.by_name.clone(),
			fallbacks: self.fallbacks.clone(),
		}
	}

	fn entry(&self, handle: OperatorHandle) -> &OperatorEntry {
		let entry = self
			.slots
			.get(handle.slot as usize)
			.filter(|slot| slot.generation == handle.generation)
			.and_then(|slot| slot.entry.as_deref());
		match entry {
			Some(entry) => entry,
			None => internal_violation!("operator handle {handle:?} does not refer to a live entry"),
		}
	}

	fn entry_mut(&mut self, handle: OperatorHandle) -> &mut OperatorEntry {
		let slots = Arc::make_mut(&mut self.slots);
		match slots.get_mut(handle.slot as usize) {
			Some(Slot {
				generation,
				entry: Some(entry),
			}) if *generation == handle.generation => Arc::make_mut(entry),
			_ => internal_violation!("operator handle {handle:?} does not refer to a live entry"),
		}
	}

	fn find_or_register_name(&mut self, name: &OperatorName) -> OperatorHandle {
		if let Some(handle) = self.by_name.get(name) {
			return *handle;
		}

		let entry = Some(Arc::new(OperatorEntry::new(name.clone())));
		let slots = Arc::make_mut(&mut self.slots);
		let handle = match self.free.pop() {
			Some(idx) => {
				let slot = &mut slots[idx as usize];
				slot.entry = entry;
				OperatorHandle {
					slot: idx,
					generation: slot.generation,
				}
			}
			None => {
				let Ok(idx) = u32::try_from(slots.len()) else {
					internal_violation!("operator arena exhausted at {} slots", slots.len());
				};
				slots.push(Slot {
					generation: 0,
					entry,
				});
				OperatorHandle {
					slot: idx,
					generation: 0,
				}
			}
		};
		Arc::make_mut(&mut self.by_name).insert(name.clone(), handle);
		handle
	}

	/// Erases the entry if nothing keeps it alive any more.
	fn cleanup(&mut self, handle: OperatorHandle, name: &OperatorName) {
		let entry = self.entry(handle);
		if entry.def_and_impl_count != 0 {
			return;
		}
		entry.assert_deregistration_invariants();

		let slots = Arc::make_mut(&mut self.slots);
		let slot = &mut slots[handle.slot as usize];
		slot.entry = None;
		slot.generation = slot.generation.wrapping_add(1);
		self.free.push(handle.slot);

		let removed = Arc::make_mut(&mut self.by_name).remove(name);
		internal_assert!(
			removed == Some(handle),
			"lookup index for {name} pointed at {removed:?}, expected {handle:?}"
		);
	}

	fn next_kernel_id(&mut self) -> KernelId {
		let id = KernelId(self.next_kernel_id);
		self.next_kernel_id += 1;
		id
	}
}

impl Default for Dispatcher {
	fn default() -> Self {
		Self::new()
	}
}

impl Dispatcher {
	pub fn new() -> Self {
		Self::with_config(DispatcherConfig::default())
	}

	pub fn with_config(config: DispatcherConfig) -> Self {
		let state = State::default();
		Self {
			id: DispatcherId(NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed)),
			config,
			snap: ArcSwap::from_pointee(state.snapshot()),
			state: Mutex::new(state),
		}
	}

	pub fn config(&self) -> &DispatcherConfig {
		&self.config
	}

	/// Looks up an operator by name, with or without a schema.
	#[inline]
	pub fn find_operator_by_name(&self, name: &OperatorName) -> Option<OperatorHandle> {
		self.snap.load().find(name)
	}

	/// Looks up an operator that has a live definition.
	///
	/// Returns `None` both for unknown operators and for operators that only have
	/// kernels; use [`Self::find_operator_by_name`] to tell them apart.
	pub fn find_schema(&self, name: &OperatorName) -> Option<OperatorHandle> {
		let snap = self.snap.load();
		let handle = snap.find(name)?;
		snap.entry(handle)?.schema().is_some().then_some(handle)
	}

	/// Like [`Self::find_schema`], but explains a miss.
	pub fn find_schema_or_throw(
		&self,
		name: &str,
		overload_name: &str,
	) -> Result<OperatorHandle, DispatchError> {
		let name = OperatorName::new(name, overload_name);
		let snap = self.snap.load();
		let Some(handle) = snap.find(&name) else {
			return Err(DispatchError::OperatorNotFound { name });
		};
		match snap.entry(handle) {
			Some(entry) if entry.schema().is_some() => Ok(handle),
			_ => Err(DispatchError::MissingSchema { name }),
		}
	}

	/// Dereferences a handle against the current registry state.
	///
	/// Returns `None` once the operator has been erased, even if its slot has been
	/// reused since.
	pub fn operator(&self, handle: OperatorHandle) -> Option<OperatorRef> {
		self.snap.load().operator(handle)
	}

	/// Name lookup and dereference against a single snapshot.
	pub fn find_operator(&self, name: &OperatorName) -> Option<OperatorRef> {
		let snap = self.snap.load();
		snap.operator(snap.find(name)?)
	}

	/// Resolves the kernel for `key` and runs it on `stack`.
	pub fn call(
		&self,
		handle: OperatorHandle,
		key: DispatchKey,
		stack: &mut Stack,
	) -> Result<(), DispatchError> {
		self.operator(handle)
			.ok_or(DispatchError::StaleHandle { handle })?
			.call(key, stack)
	}

	/// Names of every registered operator, sorted.
	pub fn all_operator_names(&self) -> Vec<OperatorName> {
		let mut names: Vec<_> = self.snap.load().by_name.keys().cloned().collect();
		names.sort_unstable();
		names
	}

	/// Number of registered operators.
	pub fn len(&self) -> usize {
		self.snap.load().by_name.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Tags whose backend fallback is absent or does real work.
	pub fn backends_without_fallthrough(&self) -> DispatchKeySet {
		self.snap.load().fallbacks.backends_without_fallthrough()
	}

	/// Attaches a schema to its operator, or checks it against the one already
	/// attached.
	///
	/// A second definition must be structurally equal to the first. An
	/// unspecified alias-analysis kind is accepted against anything; an explicit
	/// kind is adopted over an unspecified one; two explicit kinds must match.
	pub fn register_def(&self, schema: FunctionSchema) -> Result<RegistrationHandle, DispatchError> {
		let mut state = self.state.lock();
		let name = schema.operator_name().clone();

		if let Some(handle) = state.by_name.get(&name).copied() {
			if let Some(existing) = state.entry(handle).schema() {
				check_schema_compatibility(existing, &schema)?;
			}
		}

		let handle = state.find_or_register_name(&name);
		let entry = state.entry_mut(handle);
		let first_def = entry.def_count == 0;
		if first_def {
			entry.register_schema(schema);
		} else {
			entry.adopt_alias_analysis(&schema);
		}
		entry.def_count += 1;
		entry.def_and_impl_count += 1;
		let def_count = entry.def_count;

		let snap = self.publish(&state);
		if first_def {
			if let Some(op) = snap.operator(handle) {
				state.listeners.call_on_operator_registered(&op);
			}
		}
		tracing::debug!(
			dispatcher = %self.config.label,
			op = %name,
			def_count,
			"registered definition"
		);
		Ok(RegistrationHandle::new(
			self.id,
			Registration::Def { op: handle, name },
		))
	}

	/// Adds a kernel for `key`, or to the catch-all slot when `key` is `None`.
	///
	/// The operator need not have a definition. The newest kernel in a slot
	/// shadows older ones until it is released. `Some(DispatchKey::Undefined)`
	/// names no backend and lands in the catch-all slot.
	pub fn register_impl(
		&self,
		name: OperatorName,
		key: Option<DispatchKey>,
		kernel: KernelFunction,
		inferred_schema: Option<FunctionSchema>,
		debug: impl Into<Arc<str>>,
	) -> RegistrationHandle {
		let key = key.filter(|k| *k != DispatchKey::Undefined);
		let label: Arc<str> = debug.into();
		let mut state = self.state.lock();
		let id = state.next_kernel_id();

		let handle = state.find_or_register_name(&name);
		let entry = state.entry_mut(handle);
		let shadowed = entry.register_kernel(
			key,
			KernelEntry {
				id,
				kernel,
				inferred_schema: inferred_schema.map(Arc::new),
				debug: label.clone(),
			},
		);
		entry.def_and_impl_count += 1;

		if let Some(previous) = shadowed {
			if self.config.warn_on_kernel_override {
				tracing::warn!(
					dispatcher = %self.config.label,
					op = %name,
					key = ?key,
					previous = %previous.debug,
					new = %label,
					"kernel registration overrides a previously registered kernel"
				);
			}
		}

		self.publish(&state);
		tracing::debug!(
			dispatcher = %self.config.label,
			op = %name,
			key = ?key,
			kernel = %label,
			"registered kernel"
		);
		RegistrationHandle::new(
			self.id,
			Registration::Impl {
				op: handle,
				name,
				key,
				kernel: id,
			},
		)
	}

	/// Installs the backend fallback for `key`. Each tag holds at most one.
	pub fn register_fallback(
		&self,
		key: DispatchKey,
		kernel: KernelFunction,
	) -> Result<RegistrationHandle, DispatchError> {
		let mut state = self.state.lock();
		if state.fallbacks.get(key).is_some() {
			return Err(DispatchError::DuplicateFallback { key });
		}
		let fallthrough = kernel.is_fallthrough();
		if Arc::make_mut(&mut state.fallbacks)
			.set_kernel(key, kernel)
			.is_err()
		{
			internal_violation!("fallback slot for {key} filled while the writer lock was held");
		}

		self.publish(&state);
		tracing::debug!(
			dispatcher = %self.config.label,
			key = %key,
			fallthrough,
			"registered backend fallback"
		);
		Ok(RegistrationHandle::new(self.id, Registration::Fallback { key }))
	}

	/// Subscribes a listener, first replaying every live definition to it.
	pub fn add_listener(&self, listener: Box<dyn OpRegistrationListener>) {
		let mut state = self.state.lock();
		let snap = self.snap.load_full();
		let mut replayed = 0usize;
		for op in snap.operators().filter(|op| op.def_count() > 0) {
			listener.on_operator_registered(&op);
			replayed += 1;
		}
		state.listeners.push(listener);
		tracing::debug!(
			dispatcher = %self.config.label,
			replayed,
			listeners = state.listeners.len(),
			"added registration listener"
		);
	}

	/// Reverses the registration `token` stands for.
	///
	/// # Panics
	///
	/// Panics if the token was issued by another dispatcher or if the
	/// registration it names no longer exists. Both indicate a broken contract.
	pub fn release(&self, mut token: RegistrationHandle) {
		internal_assert!(
			token.owner() == self.id,
			"registration handle from dispatcher {:?} released into {:?}",
			token.owner(),
			self.id
		);
		let Some(registration) = token.take() else {
			internal_violation!("registration handle released twice");
		};
		match registration {
			Registration::Def { op, name } => self.deregister_def(op, &name),
			Registration::Impl {
				op,
				name,
				key,
				kernel,
			} => self.deregister_impl(op, &name, key, kernel),
			Registration::Fallback { key } => self.deregister_fallback(key),
		}
	}

	fn deregister_def(&self, handle: OperatorHandle, name: &OperatorName) {
		let mut state = self.state.lock();
		let entry = state.entry_mut(handle);
		internal_assert!(
			entry.name() == name,
			"definition token for {name} points at {}",
			entry.name()
		);
		internal_assert!(entry.def_count > 0, "def_count underflow for {name}");
		internal_assert!(
			entry.def_and_impl_count > 0,
			"def_and_impl_count underflow for {name}"
		);
		entry.def_count -= 1;
		entry.def_and_impl_count -= 1;

		if entry.def_count == 0 {
			// Counters already reflect the release; the schema is still attached.
			if let Some(op) = state.snapshot().operator(handle) {
				state.listeners.call_on_operator_deregistered(&op);
			}
			state.entry_mut(handle).deregister_schema();
		}

		state.cleanup(handle, name);
		self.publish(&state);
		tracing::debug!(dispatcher = %self.config.label, op = %name, "released definition");
	}

	fn deregister_impl(
		&self,
		handle: OperatorHandle,
		name: &OperatorName,
		key: Option<DispatchKey>,
		kernel: KernelId,
	) {
		let mut state = self.state.lock();
		let entry = state.entry_mut(handle);
		internal_assert!(
			entry.name() == name,
			"kernel token for {name} points at {}",
			entry.name()
		);
		let removed = entry.deregister_kernel(key, kernel);
		internal_assert!(
			removed,
			"kernel {kernel:?} for {name} under {key:?} is not registered"
		);
		internal_assert!(
			entry.def_and_impl_count > 0,
			"def_and_impl_count underflow for {name}"
		);
		entry.def_and_impl_count -= 1;

		state.cleanup(handle, name);
		self.publish(&state);
		tracing::debug!(
			dispatcher = %self.config.label,
			op = %name,
			key = ?key,
			"released kernel"
		);
	}

	fn deregister_fallback(&self, key: DispatchKey) {
		let mut state = self.state.lock();
		let removed = Arc::make_mut(&mut state.fallbacks).remove_kernel(key);
		internal_assert!(
			removed.is_some(),
			"tried to deregister a backend fallback kernel for {key} but there was none registered"
		);
		self.publish(&state);
		tracing::debug!(dispatcher = %self.config.label, key = %key, "released backend fallback");
	}

	/// Publishes the writer state to readers. Caller holds the writer lock.
	fn publish(&self, state: &State) -> Arc<Snapshot> {
		let snap = Arc::new(state.snapshot());
		self.snap.store(snap.clone());
		if self.config.verify_invariants {
			state.check_invariants();
		}
		snap
	}
}

impl std::fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Dispatcher")
			.field("id", &self.id)
			.field("label", &self.config.label)
			.field("operators", &self.len())
			.finish()
	}
}

impl Drop for Dispatcher {
	fn drop(&mut self) {
		let snap = self.snap.load();
		let fallbacks = snap.fallbacks.len();
		if !snap.by_name.is_empty() || fallbacks > 0 {
			tracing::warn!(
				dispatcher = %self.config.label,
				operators = snap.by_name.len(),
				fallbacks,
				"dispatcher dropped with live registrations; their handles can no longer be released"
			);
		}
	}
}

fn check_schema_compatibility(
	existing: &FunctionSchema,
	incoming: &FunctionSchema,
) -> Result<(), DispatchError> {
	if existing != incoming {
		return Err(DispatchError::SchemaConflict {
			existing: Box::new(existing.clone()),
			incoming: Box::new(incoming.clone()),
		});
	}
	// An unspecified kind on either side is accepted. Which site registers first
	// depends on initialization order, so a site that omits the kind cannot be
	// rejected merely for arriving second.
	if incoming.is_default_alias_analysis_kind() || existing.is_default_alias_analysis_kind() {
		return Ok(());
	}
	if existing.alias_analysis() != incoming.alias_analysis() {
		return Err(DispatchError::AliasAnalysisConflict {
			name: existing.operator_name().clone(),
			existing: existing.alias_analysis(),
			incoming: incoming.alias_analysis(),
		});
	}
	Ok(())
}
