//! Full-registry consistency walk.
//!
//! Not for the hot path. Runs after every mutation when
//! [`DispatcherConfig::verify_invariants`](crate::DispatcherConfig::verify_invariants)
//! is set, and on demand through [`Dispatcher::check_invariants`].

use opdispatch_primitives::DispatchKey;

use super::{Dispatcher, OperatorHandle, State};
use crate::error::internal_assert;

impl State {
	pub(super) fn check_invariants(&self) {
		let mut live = 0usize;
		for (idx, slot) in self.slots.iter().enumerate() {
			let Some(entry) = &slot.entry else {
				continue;
			};
			live += 1;
			entry.check_invariants();
			internal_assert!(
				entry.def_and_impl_count > 0,
				"{} has no live registrations but was not erased",
				entry.name()
			);
			let expected = OperatorHandle {
				slot: idx as u32,
				generation: slot.generation,
			};
			internal_assert!(
				self.by_name.get(entry.name()) == Some(&expected),
				"lookup index entry for {} does not point at slot {idx}",
				entry.name()
			);
		}
		internal_assert!(
			live == self.by_name.len(),
			"lookup index has {} names but the arena holds {live} operators",
			self.by_name.len()
		);
		for idx in &self.free {
			internal_assert!(
				self.slots
					.get(*idx as usize)
					.is_some_and(|slot| slot.entry.is_none()),
				"free list names occupied slot {idx}"
			);
		}

		let without_fallthrough = self.fallbacks.backends_without_fallthrough();
		for key in DispatchKey::all().filter(|k| *k != DispatchKey::Undefined) {
			let fallback = self.fallbacks.get(key);
			let is_fallthrough = fallback.is_some_and(|k| k.is_fallthrough());
			internal_assert!(
				without_fallthrough.has(key) != is_fallthrough,
				"{key}: fallthrough mask says {} but fallback is {fallback:?}",
				without_fallthrough.has(key)
			);
		}
	}
}

impl Dispatcher {
	/// Walks the whole registry and panics on the first inconsistency.
	///
	/// Checks every operator entry's counters, schema and kernel slots, that the
	/// lookup index and the operator arena agree, and that every tag missing from
	/// [`Self::backends_without_fallthrough`] has a pass-through fallback.
	pub fn check_invariants(&self) {
		self.state.lock().check_invariants();
	}
}
