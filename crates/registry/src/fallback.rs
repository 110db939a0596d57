use opdispatch_primitives::{DispatchKey, DispatchKeySet, KernelFunction};

/// Backend fallback kernels, at most one per tag, independent of any operator.
///
/// `backends_without_fallthrough` starts full. A tag leaves the set only while its
/// fallback is a trivial pass-through, so callers can mask out tags that have
/// nothing interesting to run without consulting the table.
#[derive(Debug, Clone)]
pub(crate) struct FallbackTable {
	kernels: [Option<KernelFunction>; DispatchKey::NUM_KEYS],
	backends_without_fallthrough: DispatchKeySet,
}

impl Default for FallbackTable {
	fn default() -> Self {
		Self {
			kernels: std::array::from_fn(|_| None),
			backends_without_fallthrough: DispatchKeySet::FULL,
		}
	}
}

impl FallbackTable {
	/// Installs a fallback. Hands the kernel back if the tag already has one.
	pub(crate) fn set_kernel(
		&mut self,
		key: DispatchKey,
		kernel: KernelFunction,
	) -> Result<(), KernelFunction> {
		let slot = &mut self.kernels[key.index()];
		if slot.is_some() {
			return Err(kernel);
		}
		if kernel.is_fallthrough() {
			self.backends_without_fallthrough = self.backends_without_fallthrough.removed(key);
		}
		*slot = Some(kernel);
		Ok(())
	}

	pub(crate) fn remove_kernel(&mut self, key: DispatchKey) -> Option<KernelFunction> {
		let removed = self.kernels[key.index()].take();
		self.backends_without_fallthrough = self.backends_without_fallthrough.added(key);
		removed
	}

	pub(crate) fn get(&self, key: DispatchKey) -> Option<&KernelFunction> {
		self.kernels[key.index()].as_ref()
	}

	/// Number of tags with a fallback installed.
	pub(crate) fn len(&self) -> usize {
		self.kernels.iter().filter(|k| k.is_some()).count()
	}

	pub(crate) fn backends_without_fallthrough(&self) -> DispatchKeySet {
		self.backends_without_fallthrough
	}

	/// Tags whose fallback does real work.
	pub(crate) fn non_fallthrough_keys(&self) -> impl Iterator<Item = DispatchKey> + '_ {
		DispatchKey::all().filter(|key| self.get(*key).is_some_and(|k| !k.is_fallthrough()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fallthrough_clears_mask_until_removed() {
		let mut table = FallbackTable::default();
		table.set_kernel(DispatchKey::Autograd, KernelFunction::fallthrough()).unwrap();
		assert!(!table.backends_without_fallthrough().has(DispatchKey::Autograd));
		assert!(table.non_fallthrough_keys().next().is_none());

		assert!(table.remove_kernel(DispatchKey::Autograd).is_some());
		assert_eq!(table.backends_without_fallthrough(), DispatchKeySet::FULL);
	}

	#[test]
	fn real_fallback_keeps_tag_in_mask() {
		let mut table = FallbackTable::default();
		table.set_kernel(DispatchKey::Named, KernelFunction::from_fn(|_, _| {})).unwrap();
		assert!(table.backends_without_fallthrough().has(DispatchKey::Named));
		assert_eq!(table.non_fallthrough_keys().collect::<Vec<_>>(), vec![DispatchKey::Named]);
	}

	#[test]
	fn second_kernel_for_tag_is_refused() {
		let mut table = FallbackTable::default();
		table.set_kernel(DispatchKey::CPU, KernelFunction::fallthrough()).unwrap();
		let refused = table.set_kernel(DispatchKey::CPU, KernelFunction::from_fn(|_, _| {}));
		assert!(refused.is_err_and(|k| !k.is_fallthrough()));
		assert!(table.get(DispatchKey::CPU).unwrap().is_fallthrough());
		assert!(!table.backends_without_fallthrough().has(DispatchKey::CPU));
	}
}
